//! The unit of telemetry.
//!
//! An [`Event`] is immutable once built: the fields are private and there are no setters, so a
//! retry always resends the payload that was captured. The JSON shape is what the collector
//! endpoints accept (`event`, `category`, `action`, `label`, `value`, `sessionId`, `timestamp`,
//! `page`, `userAgent`, `metadata`).

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const SESSION_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// One observed interaction or business occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "event")]
    kind: String,
    category: String,
    action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(rename = "value", default, skip_serializing_if = "Option::is_none")]
    numeric_value: Option<f64>,
    session_id: String,
    #[serde(rename = "timestamp")]
    captured_at: u64,
    #[serde(rename = "page")]
    source_page: String,
    #[serde(rename = "userAgent")]
    client_context: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
}

impl Event {
    pub fn builder(
        kind: impl Into<String>,
        category: impl Into<String>,
        action: impl Into<String>,
    ) -> EventBuilder {
        EventBuilder {
            event: Event {
                kind: kind.into(),
                category: category.into(),
                action: action.into(),
                label: None,
                numeric_value: None,
                session_id: String::new(),
                captured_at: 0,
                source_page: String::new(),
                client_context: String::new(),
                metadata: Map::new(),
            },
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn numeric_value(&self) -> Option<f64> {
        self.numeric_value
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Milliseconds since the Unix epoch at capture.
    pub fn captured_at(&self) -> u64 {
        self.captured_at
    }

    pub fn source_page(&self) -> &str {
        &self.source_page
    }

    pub fn client_context(&self) -> &str {
        &self.client_context
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Throttle key used when the capture layer does not name the element.
    pub fn source_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.kind,
            self.category,
            self.action,
            self.label.as_deref().unwrap_or_default()
        )
    }

    /// Request body sent by every network transport.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Assembles an [`Event`]; the result is frozen at [`EventBuilder::build`].
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.event.label = Some(label.into());
        self
    }

    /// Non-finite values have no JSON form and are dropped.
    pub fn value(mut self, value: f64) -> Self {
        if value.is_finite() {
            self.event.numeric_value = Some(value);
        } else {
            tracing::debug!(value, "dropping non-finite event value");
            self.event.numeric_value = None;
        }
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.event.session_id = session_id.into();
        self
    }

    pub fn captured_at(mut self, millis: u64) -> Self {
        self.event.captured_at = millis;
        self
    }

    pub fn source_page(mut self, page: impl Into<String>) -> Self {
        self.event.source_page = page.into();
        self
    }

    pub fn client_context(mut self, context: impl Into<String>) -> Self {
        self.event.client_context = context.into();
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.event.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Event {
        self.event
    }
}

/// `session_{millis}_{9 base-36 chars}`.
pub fn new_session_id(now_millis: u64) -> String {
    format!("session_{}_{}", now_millis, base36_suffix(SESSION_SUFFIX_LEN))
}

pub(crate) fn base36_suffix(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len).map(|_| BASE36[rng.random_range(0..BASE36.len())] as char).collect()
}

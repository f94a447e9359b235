use super::{QueueBackend, StoredRecord};
use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Mutex;

/// Process-local backend. Records do not survive a restart.
///
/// Every method holds the lock for its whole body, which makes each one a transaction.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    // (insertion sequence, record); kept in insertion order
    records: Vec<(u64, StoredRecord)>,
    next_seq: u64,
}

impl Inner {
    fn oldest_index(&self) -> Option<usize> {
        self.records
            .iter()
            .enumerate()
            .min_by_key(|(_, (seq, record))| (record.enqueued_at, *seq))
            .map(|(index, _)| index)
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored record in insertion order.
    pub fn snapshot(&self) -> Vec<StoredRecord> {
        self.lock().records.iter().map(|(_, r)| r.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn insert_capped(
        &self,
        record: StoredRecord,
        max_records: usize,
    ) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        let mut evicted = 0;
        while inner.records.len() >= max_records {
            match inner.oldest_index() {
                Some(index) => {
                    inner.records.remove(index);
                    evicted += 1;
                }
                None => break,
            }
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.records.push((seq, record));
        Ok(evicted)
    }

    async fn list_eligible(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let inner = self.lock();
        let mut eligible: Vec<&(u64, StoredRecord)> =
            inner.records.iter().filter(|(_, r)| !r.is_exhausted(max_retries)).collect();
        eligible.sort_by_key(|(seq, r)| (r.enqueued_at, *seq));
        Ok(eligible.into_iter().take(limit).map(|(_, r)| r.clone()).collect())
    }

    async fn increment_attempt(
        &self,
        id: &str,
        attempted_at: u64,
        max_retries: u32,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.records.iter_mut().find(|(_, r)| r.id == id) {
            Some((_, record)) => {
                record.attempt_count = record.attempt_count.saturating_add(1).min(max_retries);
                record.last_attempt_at = Some(attempted_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let before = inner.records.len();
        inner.records.retain(|(_, r)| r.id != id);
        Ok(inner.records.len() != before)
    }

    async fn remove_exhausted(&self, max_retries: u32) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        let before = inner.records.len();
        inner.records.retain(|(_, r)| !r.is_exhausted(max_retries));
        Ok(before - inner.records.len())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.lock().records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_event;

    fn record(id: &str, enqueued_at: u64) -> StoredRecord {
        StoredRecord {
            id: id.into(),
            event: sample_event(id),
            enqueued_at,
            attempt_count: 0,
            last_attempt_at: None,
        }
    }

    #[tokio::test]
    async fn equal_timestamps_evict_in_insertion_order() {
        let backend = MemoryBackend::new();
        backend.insert_capped(record("a", 7), 2).await.unwrap();
        backend.insert_capped(record("b", 7), 2).await.unwrap();
        let evicted = backend.insert_capped(record("c", 7), 2).await.unwrap();

        assert_eq!(evicted, 1);
        let ids: Vec<_> = backend.snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn remove_reports_whether_anything_went() {
        let backend = MemoryBackend::new();
        backend.insert_capped(record("a", 1), 10).await.unwrap();
        assert!(backend.remove("a").await.unwrap());
        assert!(!backend.remove("a").await.unwrap());
        assert!(!backend.increment_attempt("a", 5, 5).await.unwrap());
    }
}

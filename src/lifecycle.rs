//! Host lifecycle checkpoints.
//!
//! The embedding host publishes [`LifecycleSignal`]s through a [`Lifecycle`] hub; the engine
//! subscribes and flushes on each one.

use tokio::sync::broadcast;

const HUB_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The host finished loading.
    Loaded,
    /// The host is about to be discarded; only unload-safe work will finish.
    Unloading,
}

/// Broadcast hub for lifecycle signals. Clones publish to the same subscribers.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    sender: broadcast::Sender<LifecycleSignal>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleSignal> {
        self.sender.subscribe()
    }

    /// Returns the number of subscribers that will see the signal.
    pub fn publish(&self, signal: LifecycleSignal) -> usize {
        self.sender.send(signal).unwrap_or(0)
    }

    pub fn loaded(&self) -> usize {
        self.publish(LifecycleSignal::Loaded)
    }

    pub fn unloading(&self) -> usize {
        self.publish(LifecycleSignal::Unloading)
    }
}

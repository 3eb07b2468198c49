//! Change Notification
//!
//! Engines publish a `ChangeEvent` after every committed mutation.
//! Anything that caches a judgement about engine state (the validation
//! gate, preview caches) subscribes here instead of trusting callers.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    Crop,
    Placement,
    Source,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub source: ChangeSource,
    /// Short operation name, e.g. `update_drag`.
    pub operation: &'static str,
}

impl ChangeEvent {
    pub fn new(source: ChangeSource, operation: &'static str) -> Self {
        Self { source, operation }
    }
}

pub trait ChangeObserver: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

/// Fan-out list of observers. Clones share the same subscriber list.
#[derive(Clone, Default)]
pub struct ChangeBus {
    observers: Arc<std::sync::RwLock<Vec<Arc<dyn ChangeObserver>>>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn ChangeObserver>) {
        match self.observers.write() {
            Ok(mut list) => list.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    pub fn emit(&self, event: ChangeEvent) {
        tracing::trace!(source = ?event.source, operation = event.operation, "change");
        let list = match self.observers.read() {
            Ok(list) => list,
            Err(poisoned) => poisoned.into_inner(),
        };
        for observer in list.iter() {
            observer.on_change(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        match self.observers.read() {
            Ok(list) => list.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter(AtomicU32);

    impl ChangeObserver for Counter {
        fn on_change(&self, _event: &ChangeEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_clones_share_subscribers() {
        let bus = ChangeBus::new();
        let counter = Arc::new(Counter(AtomicU32::new(0)));
        bus.subscribe(counter.clone());

        let other = bus.clone();
        other.emit(ChangeEvent::new(ChangeSource::Crop, "test"));
        bus.emit(ChangeEvent::new(ChangeSource::Placement, "test"));

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert_eq!(other.subscriber_count(), 1);
    }
}

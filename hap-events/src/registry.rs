use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::EventError;
use crate::handler::Handler;
use crate::metadata::EventData;

/// Concurrent map from handler id to handler state.
pub(crate) struct Registry<D> {
    handlers: DashMap<String, Arc<Handler<D>>>,
}

impl<D: EventData> Registry<D> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Insert `handler` unless its id is already taken.
    pub(crate) fn insert(&self, handler: Arc<Handler<D>>) -> Result<(), EventError> {
        match self.handlers.entry(handler.id.clone()) {
            Entry::Occupied(_) => Err(EventError::DuplicateHandler(handler.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// Retire `handler` and drop its entry. A newer handler that reuses the
    /// same id is left alone.
    pub(crate) fn remove(&self, handler: &Arc<Handler<D>>) {
        handler.retire();
        self.handlers
            .remove_if(&handler.id, |_, current| Arc::ptr_eq(current, handler));
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Clone out every live handler so no shard lock is held while dispatching.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Handler<D>>> {
        self.handlers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub(crate) fn clear(&self) {
        for handler in self.snapshot() {
            self.remove(&handler);
        }
    }
}

/// Capability returned by handler registration; calling [`remove`](Self::remove)
/// unregisters the handler and stops its periodic flush.
///
/// Cloneable and idempotent. Holds the handler weakly, so a handler pruned
/// by the channel is freed even while its capability is still around. A
/// registration that was rejected yields an inert capability whose `remove`
/// does nothing.
#[derive(Clone)]
pub struct RemoveHandler {
    id: Option<String>,
    remove: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl RemoveHandler {
    pub(crate) fn new<D: EventData>(registry: Arc<Registry<D>>, handler: Arc<Handler<D>>) -> Self {
        let id = handler.id.clone();
        let handler: Weak<Handler<D>> = Arc::downgrade(&handler);
        Self {
            id: Some(id),
            remove: Some(Arc::new(move || {
                if let Some(handler) = handler.upgrade() {
                    registry.remove(&handler);
                }
            })),
        }
    }

    /// A capability that removes nothing.
    pub fn noop() -> Self {
        Self {
            id: None,
            remove: None,
        }
    }

    pub fn remove(&self) {
        if let Some(remove) = &self.remove {
            remove();
        }
    }

    /// The id the handler was registered under, or `None` when inert.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_inert(&self) -> bool {
        self.remove.is_none()
    }
}

impl std::fmt::Debug for RemoveHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoveHandler").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::metadata::Metadata;

    fn handler(id: &str) -> Arc<Handler<Metadata>> {
        Arc::new(Handler::direct(
            id.into(),
            Context::background(),
            Arc::new(|_| Box::pin(async {})),
        ))
    }

    #[test]
    fn insert_rejects_duplicate_ids() {
        let registry = Registry::new();
        registry.insert(handler("a")).unwrap();
        let err = registry.insert(handler("a")).unwrap_err();
        assert_eq!(err, EventError::DuplicateHandler("a".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_remove_keeps_newer_handler() {
        let registry = Registry::new();
        let first = handler("a");
        registry.insert(first.clone()).unwrap();
        registry.remove(&first);
        assert!(registry.is_empty());

        let second = handler("a");
        registry.insert(second.clone()).unwrap();
        registry.remove(&first);
        assert_eq!(registry.len(), 1);
        assert!(!second.is_retired());
    }

    #[test]
    fn remove_handler_is_idempotent() {
        let registry = Arc::new(Registry::new());
        let h = handler("a");
        registry.insert(h.clone()).unwrap();
        let remove = RemoveHandler::new(registry.clone(), h);
        assert_eq!(remove.id(), Some("a"));
        remove.remove();
        remove.clone().remove();
        assert!(registry.is_empty());
    }

    #[test]
    fn noop_is_inert() {
        let remove = RemoveHandler::noop();
        remove.remove();
        assert!(remove.is_inert());
        assert!(remove.id().is_none());
    }

    #[test]
    fn clear_retires_everything() {
        let registry = Registry::new();
        let a = handler("a");
        let b = handler("b");
        registry.insert(a.clone()).unwrap();
        registry.insert(b.clone()).unwrap();
        assert_eq!(registry.snapshot().len(), 2);
        registry.clear();
        assert!(registry.is_empty());
        assert!(a.is_retired() && b.is_retired());
    }
}

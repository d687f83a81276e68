//! Handler dispatch: task type -> handler function.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::ConveyorError;
use crate::task::TaskType;

/// Collaborator-supplied work for one task type.
///
/// The payload is opaque bytes; the handler decodes it however it likes and
/// returns opaque result bytes. Errors feed the retry state machine.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<Vec<u8>, ConveyorError>;
}

/// Registry of handlers, keyed by task type.
///
/// Registration is allowed while workers are executing: lookups take the read
/// lock, registration the write lock, and the lock is never held across an
/// await. The last registration for a given type wins.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `task_type`, replacing any previous one.
    pub fn register(&self, task_type: impl Into<TaskType>, handler: Arc<dyn TaskHandler>) {
        self.handlers.write().insert(task_type.into(), handler);
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(task_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TaggedHandler(&'static str);

    #[async_trait]
    impl TaskHandler for TaggedHandler {
        async fn handle(&self, _payload: &[u8]) -> Result<Vec<u8>, ConveyorError> {
            Ok(self.0.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn register_then_get_round_trips() {
        let registry = HandlerRegistry::new();
        registry.register("greet", Arc::new(TaggedHandler("hello")));

        let handler = registry.get(&TaskType::new("greet")).unwrap();
        assert_eq!(handler.handle(b"").await.unwrap(), b"hello");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = HandlerRegistry::new();
        registry.register("greet", Arc::new(TaggedHandler("first")));
        registry.register("greet", Arc::new(TaggedHandler("second")));

        let handler = registry.get(&TaskType::new("greet")).unwrap();
        assert_eq!(handler.handle(b"").await.unwrap(), b"second");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_type_returns_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.get(&TaskType::new("nope")).is_none());
        assert!(registry.is_empty());
    }
}

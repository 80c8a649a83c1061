//! Handler registry: event name to invocation callback.

use std::collections::HashMap;
use std::sync::Arc;

use skein_core::{Receiver, Sender};

/// Invocation callback. Runs synchronously on the worker loop task when a
/// matching `invoke` frame arrives; long work should be spawned from
/// inside the handler.
pub type Handler = Arc<dyn Fn(Sender, Receiver) + Send + Sync>;

/// Event-name dispatch table. Filled before the worker starts, immutable
/// afterwards; consulted only for top-level `invoke` frames.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, event: impl Into<String>, handler: F)
    where
        F: Fn(Sender, Receiver) + Send + Sync + 'static,
    {
        self.handlers.insert(event.into(), Arc::new(handler));
    }

    pub fn get(&self, event: &str) -> Option<&Handler> {
        self.handlers.get(event)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("events", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_registrations() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());

        registry.register("echo", |_tx, _rx| {});
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
        assert!(registry.get("echo").is_some());
        assert!(registry.get("other").is_none());
    }
}

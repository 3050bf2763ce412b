//! Step type to handler registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::ActionHandler;
use super::builtin::{TerminatorHandler, TriggerHandler};
use crate::definition::StepType;

/// Registry mapping step types to handlers.
///
/// Populated at process start, then moved into an
/// [`ActionDispatcher`](super::ActionDispatcher) where it is read-only.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<StepType, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in `trigger` and `terminator` handlers.
    pub fn with_builtins() -> Self {
        Self::new()
            .with_handler(StepType::Trigger, TriggerHandler)
            .with_handler(StepType::Terminator, TerminatorHandler)
    }

    /// Registers a handler, replacing any previous one for the type.
    pub fn register(&mut self, step_type: StepType, handler: impl ActionHandler) {
        self.register_arc(step_type, Arc::new(handler));
    }

    /// Registers a shared handler.
    pub fn register_arc(&mut self, step_type: StepType, handler: Arc<dyn ActionHandler>) {
        if self.handlers.insert(step_type.clone(), handler).is_some() {
            tracing::debug!(
                target: crate::TRACING_TARGET_DISPATCH,
                step_type = %step_type,
                "Replaced action handler"
            );
        }
    }

    /// Registers a handler (builder pattern).
    #[must_use]
    pub fn with_handler(mut self, step_type: StepType, handler: impl ActionHandler) -> Self {
        self.register(step_type, handler);
        self
    }

    /// Looks up the handler for a step type.
    #[inline]
    pub fn get(&self, step_type: &StepType) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(step_type)
    }

    /// Returns whether a handler is registered for the type.
    #[inline]
    pub fn contains(&self, step_type: &StepType) -> bool {
        self.handlers.contains_key(step_type)
    }

    /// Returns the number of registered handlers.
    #[inline]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns whether no handlers are registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("step_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = ActionRegistry::with_builtins();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&StepType::Trigger));
        assert!(registry.contains(&StepType::Terminator));
        assert!(!registry.contains(&StepType::SlackAlert));
    }

    #[test]
    fn test_custom_type_lookup() {
        let registry = ActionRegistry::new().with_handler("crm-sync".into(), TriggerHandler);
        assert!(registry.get(&StepType::Custom("crm-sync".into())).is_some());
    }
}

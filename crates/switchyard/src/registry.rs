//! Name-to-action table built at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::action::{Action, GraphError};

/// Errors raised while registering actions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The name is already taken.
    #[error("action '{name}' is already registered")]
    Duplicate {
        /// Repeated action name.
        name: String,
    },
    /// The action graph failed validation.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Registered actions, read-only once shared with the dispatcher.
#[derive(Debug, Default)]
pub struct Registry {
    actions: BTreeMap<String, Arc<Action>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a validated action.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when the name is taken.
    pub fn register(&mut self, action: Action) -> Result<(), RegistryError> {
        let name = action.name().to_owned();
        if self.actions.contains_key(&name) {
            return Err(RegistryError::Duplicate { name });
        }
        self.actions.insert(name, Arc::new(action));
        Ok(())
    }

    /// Looks up an action by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Action>> {
        self.actions.get(name)
    }

    /// Registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Number of registered actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionBuilder, Context, ProcessError, Processor, ReturnCode};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Processor for Noop {
        async fn process(&mut self, _ctx: &mut Context<'_>) -> Result<ReturnCode, ProcessError> {
            Ok(ReturnCode::OK)
        }

        fn reset(&mut self) {}
    }

    fn action(name: &str) -> Action {
        ActionBuilder::new(name)
            .node("only", || Noop)
            .build(1)
            .expect("valid action")
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = Registry::new();
        registry.register(action("user.get")).expect("first");
        assert_eq!(
            registry.register(action("user.get")),
            Err(RegistryError::Duplicate {
                name: "user.get".to_owned()
            })
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn names_are_listed_in_order() {
        let mut registry = Registry::new();
        registry.register(action("b")).expect("b");
        registry.register(action("a")).expect("a");
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(registry.get("a").is_some());
        assert!(registry.get("c").is_none());
    }
}

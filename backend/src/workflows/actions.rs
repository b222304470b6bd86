// Workflow Actions - Handler contract and the registry steps dispatch through

use async_trait::async_trait;
use automation_shared::{ActionType, ContextData, WorkflowStep};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::handlers::{DelayHandler, UpdateFieldHandler, WebhookHandler};

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Invalid action config: {0}")]
    InvalidConfig(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Performs the side effect behind one action type.
///
/// The returned object is merged into the execution context, so later steps can
/// read it. Handlers may be retried and should tolerate running twice.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, config: &Value, context: &ContextData) -> Result<Value, ActionError>;
}

/// Handlers keyed by action type, assembled once at startup.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<ActionType, Arc<dyn ActionHandler>>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<&str> = self.handlers.keys().map(|a| a.as_str()).collect();
        registered.sort_unstable();
        f.debug_struct("ActionRegistry")
            .field("registered", &registered)
            .finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the handlers that need nothing from the host
    /// application: webhook, delay and update_field.
    pub fn with_builtin_handlers() -> Self {
        Self::new()
            .with_handler(ActionType::Webhook, WebhookHandler::new())
            .with_handler(ActionType::Delay, DelayHandler)
            .with_handler(ActionType::UpdateField, UpdateFieldHandler)
    }

    /// Replaces any handler already registered for `action_type`.
    pub fn register(&mut self, action_type: ActionType, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action_type, handler);
    }

    pub fn with_handler(mut self, action_type: ActionType, handler: impl ActionHandler + 'static) -> Self {
        self.register(action_type, Arc::new(handler));
        self
    }

    pub fn get(&self, action_type: ActionType) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&action_type).cloned()
    }

    pub fn contains(&self, action_type: ActionType) -> bool {
        self.handlers.contains_key(&action_type)
    }

    /// Action types used by `steps` that have no handler. Flow-control steps
    /// never need one.
    pub fn missing_for(&self, steps: &[WorkflowStep]) -> Vec<ActionType> {
        let mut missing: Vec<ActionType> = steps
            .iter()
            .map(|s| s.action_type)
            .filter(|a| !a.is_flow_control() && !self.contains(*a))
            .collect();
        missing.sort_by_key(|a| a.as_str());
        missing.dedup();
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ActionHandler for Echo {
        async fn execute(&self, config: &Value, _context: &ContextData) -> Result<Value, ActionError> {
            Ok(config.clone())
        }
    }

    #[test]
    fn test_builtin_handlers() {
        let registry = ActionRegistry::with_builtin_handlers();
        assert!(registry.contains(ActionType::Webhook));
        assert!(registry.contains(ActionType::Delay));
        assert!(registry.contains(ActionType::UpdateField));
        assert!(!registry.contains(ActionType::SendEmail));
    }

    #[test]
    fn test_missing_ignores_flow_control() {
        let registry = ActionRegistry::new().with_handler(ActionType::AddTag, Echo);
        let steps = vec![
            WorkflowStep::create(1, ActionType::Condition, json!({})),
            WorkflowStep::create(2, ActionType::AddTag, json!({})),
            WorkflowStep::create(3, ActionType::SendEmail, json!({})),
            WorkflowStep::create(4, ActionType::SendEmail, json!({})),
            WorkflowStep::create(5, ActionType::Merge, json!({})),
        ];

        assert_eq!(registry.missing_for(&steps), vec![ActionType::SendEmail]);
    }

    #[tokio::test]
    async fn test_registered_handler_is_dispatched() {
        let registry = ActionRegistry::new().with_handler(ActionType::CreateTask, Echo);
        let handler = registry.get(ActionType::CreateTask).unwrap();
        let output = handler
            .execute(&json!({"title": "Call back"}), &ContextData::new())
            .await
            .unwrap();
        assert_eq!(output, json!({"title": "Call back"}));
    }
}

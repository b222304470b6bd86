// Workflow Automation
//
// Events come in as `TriggerEvent`s, the matcher admits workflows, and the
// runner executes their steps through the action registry.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod handlers;
pub mod matcher;
pub mod runner;
pub mod schedule;
pub mod triggers;
pub mod validation;

pub use actions::{ActionError, ActionHandler, ActionRegistry};
pub use conditions::{Condition, ConditionEvaluator, ConditionGroup, ConditionOperator, JsonConditionEvaluator};
pub use engine::{SCHEDULED_TRIGGER, WorkflowEngine};
pub use handlers::{DelayHandler, UpdateFieldHandler, WebhookHandler, render_templates};
pub use matcher::{ChangeType, MatchRejection, TriggerMatcher};
pub use runner::StepRunner;
pub use schedule::{next_run_after, parse_schedule};
pub use triggers::{EventPayload, EventSource, TriggerEvent};
pub use validation::WorkflowValidator;

// Workflow Automation - Shared domain model
//
// Entities and value objects used by the automation engine and by anything
// that stores or displays workflows: Workflow, WorkflowStep, WorkflowExecution
// and WorkflowStepLog, plus the status state machines that guard them.

pub mod error;
pub mod execution;
pub mod step;
pub mod step_log;
pub mod workflow;

pub use error::{DomainError, DomainResult};
pub use execution::{ExecutionStatus, WorkflowExecution};
pub use step::{ActionType, WorkflowStep};
pub use step_log::{StepLogStatus, WorkflowStepLog};
pub use workflow::{ExecutionSettings, TriggerTiming, TriggerType, Workflow, WorkflowUpdate};

/// Free-form data carried across the steps of one execution.
pub type ContextData = serde_json::Map<String, serde_json::Value>;

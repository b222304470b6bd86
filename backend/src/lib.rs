// Workflow Automation Engine
//
// Decides which workflows fire for a domain event or schedule tick and runs
// their ordered, branching steps with retries, daily quotas and per-attempt
// audit logs. Storage, action effects and condition grammar sit behind traits.

pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod jobs;
pub mod repository;
pub mod workflows;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, EngineConfig, StopOnFirstMatchPolicy};
pub use error::{EngineError, EngineResult, ValidationBuilder};
pub use repository::{
    ExecutionRepository, RepositoryError, RepositoryResult, RunHistoryStore, RunKey,
    WorkflowRepository,
};
pub use workflows::{
    ActionError, ActionHandler, ActionRegistry, ConditionEvaluator, JsonConditionEvaluator,
    MatchRejection, StepRunner, TriggerEvent, TriggerMatcher, WorkflowEngine, WorkflowValidator,
};

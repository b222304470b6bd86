// Workflow Persistence - Storage seams for workflows, executions and run history
//
// The engine only talks to these traits. `memory` backs tests and embedded use,
// `postgres` backs the worker binary.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use automation_shared::{
    ExecutionStatus, TriggerType, Workflow, WorkflowExecution, WorkflowStepLog,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use memory::{InMemoryExecutionRepository, InMemoryRunHistory, InMemoryWorkflowRepository};
pub use postgres::{PgExecutionRepository, PgRunHistory, PgWorkflowRepository};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Insert or replace a workflow together with its steps.
    async fn save(&self, workflow: &Workflow) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Workflow>>;

    /// Removes the workflow and its steps. Returns false if it did not exist.
    /// Executions and run history live in their own stores; see
    /// `WorkflowEngine::delete_workflow` for the full cascade.
    async fn delete(&self, id: Uuid) -> RepositoryResult<bool>;

    async fn find_by_module(&self, module_id: Uuid) -> RepositoryResult<Vec<Workflow>>;

    async fn find_by_trigger_type(&self, trigger_type: TriggerType) -> RepositoryResult<Vec<Workflow>>;

    /// Active workflows with one of `trigger_types`, highest priority first.
    /// `module_id = None` searches every module.
    async fn find_active_for_event(
        &self,
        module_id: Option<Uuid>,
        trigger_types: &[TriggerType],
    ) -> RepositoryResult<Vec<Workflow>>;

    /// Active time-based workflows whose `next_run_at` is unset or not after `now`.
    async fn find_due(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<Workflow>>;

    /// Conditional compare-and-increment of the daily counter.
    ///
    /// Returns false, changing nothing, when today's quota is already used up.
    async fn try_consume_daily_quota(&self, id: Uuid, today: NaiveDate) -> RepositoryResult<bool>;

    async fn record_execution_outcome(
        &self,
        id: Uuid,
        success: bool,
        at: DateTime<Utc>,
    ) -> RepositoryResult<()>;

    async fn record_schedule_run(
        &self,
        id: Uuid,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: DateTime<Utc>,
    ) -> RepositoryResult<()>;
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Insert or overwrite the execution row.
    async fn save_execution(&self, execution: &WorkflowExecution) -> RepositoryResult<()>;

    async fn find_execution(&self, id: Uuid) -> RepositoryResult<Option<WorkflowExecution>>;

    async fn find_by_workflow(&self, workflow_id: Uuid) -> RepositoryResult<Vec<WorkflowExecution>>;

    async fn find_by_status(&self, status: ExecutionStatus) -> RepositoryResult<Vec<WorkflowExecution>>;

    /// Step logs are written once and never updated.
    async fn append_step_log(&self, log: &WorkflowStepLog) -> RepositoryResult<()>;

    /// Logs for one execution in insertion order.
    async fn step_logs_for(&self, execution_id: Uuid) -> RepositoryResult<Vec<WorkflowStepLog>>;

    /// Drops every execution of a workflow together with its step logs.
    /// Returns how many executions were removed.
    async fn delete_for_workflow(&self, workflow_id: Uuid) -> RepositoryResult<u64>;
}

/// Identity of a "has this workflow already run for this record" entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub workflow_id: Uuid,
    pub record_id: Uuid,
    pub record_type: String,
    pub trigger_type: String,
}

impl RunKey {
    pub fn new(workflow_id: Uuid, record_id: Uuid, record_type: &str, trigger_type: &str) -> Self {
        Self {
            workflow_id,
            record_id,
            record_type: record_type.to_string(),
            trigger_type: trigger_type.to_string(),
        }
    }
}

#[async_trait]
pub trait RunHistoryStore: Send + Sync {
    async fn has_run_for_record(&self, key: &RunKey) -> RepositoryResult<bool>;

    /// Atomic check-and-record. Returns true only for the caller that inserted the entry.
    async fn try_record_run(&self, key: &RunKey, at: DateTime<Utc>) -> RepositoryResult<bool>;

    /// Forget every record a workflow has run for.
    async fn clear_workflow(&self, workflow_id: Uuid) -> RepositoryResult<()>;

    async fn record_run_for_record(&self, key: &RunKey, at: DateTime<Utc>) -> RepositoryResult<()> {
        self.try_record_run(key, at).await?;
        Ok(())
    }
}

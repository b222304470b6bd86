// Workflow Execution - One run of a workflow and its status state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::ContextData;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// The fixed transition table. `Queued` is optional on the way to `Running`.
    pub fn allowed_transitions(&self) -> &'static [ExecutionStatus] {
        use ExecutionStatus::*;

        match self {
            Pending => &[Queued, Running, Cancelled],
            Queued => &[Running, Cancelled],
            Running => &[Completed, Failed, Cancelled],
            Completed | Failed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::unknown("execution status", other)),
        }
    }
}

/// One run instance of a workflow.
///
/// Status only moves through the `mark_as_*` methods, which consult
/// [`ExecutionStatus::can_transition_to`] before mutating anything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowExecution {
    id: Uuid,
    workflow_id: Uuid,
    trigger_type: String,
    trigger_record_id: Option<Uuid>,
    trigger_record_type: Option<String>,
    status: ExecutionStatus,
    queued_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    context_data: ContextData,
    steps_completed: i32,
    steps_failed: i32,
    steps_skipped: i32,
    error_message: Option<String>,
    triggered_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl WorkflowExecution {
    pub fn create(workflow_id: Uuid, trigger_type: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            trigger_type: trigger_type.into(),
            trigger_record_id: None,
            trigger_record_type: None,
            status: ExecutionStatus::Pending,
            queued_at: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            context_data: ContextData::new(),
            steps_completed: 0,
            steps_failed: 0,
            steps_skipped: 0,
            error_message: None,
            triggered_by: None,
            created_at: now,
        }
    }

    pub fn with_trigger_record(mut self, record_id: Uuid, record_type: impl Into<String>) -> Self {
        self.trigger_record_id = Some(record_id);
        self.trigger_record_type = Some(record_type.into());
        self
    }

    pub fn with_context(mut self, context: ContextData) -> Self {
        self.context_data = context;
        self
    }

    pub fn with_triggered_by(mut self, user_id: Option<Uuid>) -> Self {
        self.triggered_by = user_id;
        self
    }

    fn transition(&mut self, next: ExecutionStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::illegal("execution", self.status, next));
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_as_queued(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(ExecutionStatus::Queued)?;
        self.queued_at = Some(now);
        Ok(())
    }

    pub fn mark_as_started(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(ExecutionStatus::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn mark_as_completed(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(ExecutionStatus::Completed)?;
        self.completed_at = Some(now);
        self.calculate_duration();
        Ok(())
    }

    pub fn mark_as_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(ExecutionStatus::Failed)?;
        self.completed_at = Some(now);
        self.error_message = Some(message.into());
        self.calculate_duration();
        Ok(())
    }

    pub fn mark_as_cancelled(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(ExecutionStatus::Cancelled)?;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn increment_steps_completed(&mut self) {
        self.steps_completed += 1;
    }

    pub fn increment_steps_failed(&mut self) {
        self.steps_failed += 1;
    }

    pub fn increment_steps_skipped(&mut self) {
        self.steps_skipped += 1;
    }

    /// Merge `data` into the context; existing keys are overwritten, others kept.
    pub fn update_context_data(&mut self, data: ContextData) {
        self.context_data.extend(data);
    }

    pub fn total_steps_processed(&self) -> i32 {
        self.steps_completed + self.steps_failed + self.steps_skipped
    }

    fn calculate_duration(&mut self) {
        if let (Some(started), Some(completed)) = (self.started_at, self.completed_at) {
            self.duration_ms = Some((completed - started).num_milliseconds());
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    pub fn trigger_type(&self) -> &str {
        &self.trigger_type
    }

    pub fn trigger_record_id(&self) -> Option<Uuid> {
        self.trigger_record_id
    }

    pub fn trigger_record_type(&self) -> Option<&str> {
        self.trigger_record_type.as_deref()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn queued_at(&self) -> Option<DateTime<Utc>> {
        self.queued_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.duration_ms
    }

    pub fn context_data(&self) -> &ContextData {
        &self.context_data
    }

    pub fn steps_completed(&self) -> i32 {
        self.steps_completed
    }

    pub fn steps_failed(&self) -> i32 {
        self.steps_failed
    }

    pub fn steps_skipped(&self) -> i32 {
        self.steps_skipped
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn triggered_by(&self) -> Option<Uuid> {
        self.triggered_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

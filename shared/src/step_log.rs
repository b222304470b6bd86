// Step Logs - Audit row for a single attempt of a single step

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::step::{ActionType, WorkflowStep};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepLogStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepLogStatus {
    pub fn allowed_transitions(&self) -> &'static [StepLogStatus] {
        use StepLogStatus::*;

        match self {
            Pending => &[Running, Skipped, Failed],
            Running => &[Completed, Failed],
            Completed | Failed | Skipped => &[],
        }
    }

    pub fn can_transition_to(&self, next: StepLogStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepLogStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(DomainError::unknown("step log status", other)),
        }
    }
}

/// One attempt at one step. Retries produce a fresh log with the next
/// `attempt_number`; a log is never touched again once terminal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStepLog {
    id: Uuid,
    execution_id: Uuid,
    step_id: Uuid,
    action_type: ActionType,
    status: StepLogStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    input_data: Value,
    output_data: Value,
    error_message: Option<String>,
    attempt_number: i32,
    created_at: DateTime<Utc>,
}

impl WorkflowStepLog {
    pub fn create(execution_id: Uuid, step: &WorkflowStep, attempt_number: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_id: step.id,
            action_type: step.action_type,
            status: StepLogStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            input_data: Value::Null,
            output_data: Value::Null,
            error_message: None,
            attempt_number: attempt_number.max(1),
            created_at: now,
        }
    }

    fn transition(&mut self, next: StepLogStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::illegal("step log", self.status, next));
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_as_started(&mut self, input: Value, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(StepLogStatus::Running)?;
        self.started_at = Some(now);
        self.input_data = input;
        Ok(())
    }

    pub fn mark_as_completed(&mut self, output: Value, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(StepLogStatus::Completed)?;
        self.completed_at = Some(now);
        self.output_data = output;
        self.calculate_duration();
        Ok(())
    }

    pub fn mark_as_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(StepLogStatus::Failed)?;
        self.completed_at = Some(now);
        self.error_message = Some(message.into());
        self.calculate_duration();
        Ok(())
    }

    pub fn mark_as_skipped(&mut self, reason: &str, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(StepLogStatus::Skipped)?;
        self.completed_at = Some(now);
        self.output_data = json!({ "reason": reason });
        Ok(())
    }

    fn calculate_duration(&mut self) {
        if let (Some(started), Some(completed)) = (self.started_at, self.completed_at) {
            self.duration_ms = Some((completed - started).num_milliseconds());
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn step_id(&self) -> Uuid {
        self.step_id
    }

    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    pub fn status(&self) -> StepLogStatus {
        self.status
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

    pub fn input_data(&self) -> &Value {
        &self.input_data
    }

    pub fn output_data(&self) -> &Value {
        &self.output_data
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn attempt_number(&self) -> i32 {
        self.attempt_number
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 30, 0).unwrap()
    }

    fn step() -> WorkflowStep {
        WorkflowStep::create(1, ActionType::Webhook, json!({"url": "https://hooks.test/a"}))
    }

    #[test]
    fn test_completed_attempt() {
        let step = step();
        let mut log = WorkflowStepLog::create(Uuid::new_v4(), &step, 1, now());
        log.mark_as_started(json!({"url": "https://hooks.test/a"}), now()).unwrap();
        log.mark_as_completed(json!({"status": 200}), now() + Duration::milliseconds(40)).unwrap();

        assert_eq!(log.status(), StepLogStatus::Completed);
        assert_eq!(log.step_id(), step.id);
        assert_eq!(log.action_type(), ActionType::Webhook);
        assert_eq!(log.duration_ms(), Some(40));
        assert_eq!(log.output_data()["status"], json!(200));
    }

    #[test]
    fn test_skip_records_reason() {
        let mut log = WorkflowStepLog::create(Uuid::new_v4(), &step(), 1, now());
        log.mark_as_skipped("conditions not met", now()).unwrap();

        assert_eq!(log.status(), StepLogStatus::Skipped);
        assert_eq!(log.output_data()["reason"], json!("conditions not met"));
        assert!(log.duration_ms().is_none());
    }

    #[test]
    fn test_terminal_log_is_immutable() {
        let mut log = WorkflowStepLog::create(Uuid::new_v4(), &step(), 2, now());
        log.mark_as_started(Value::Null, now()).unwrap();
        log.mark_as_failed("timeout", now()).unwrap();

        let err = log.mark_as_completed(json!({}), now()).unwrap_err();
        assert!(err.is_illegal_transition());
        assert_eq!(log.error_message(), Some("timeout"));
        assert_eq!(log.attempt_number(), 2);
    }

    #[test]
    fn test_cannot_complete_without_starting() {
        let mut log = WorkflowStepLog::create(Uuid::new_v4(), &step(), 1, now());
        assert!(log.mark_as_completed(json!({}), now()).is_err());
        assert!(log.mark_as_failed("missing handler", now()).is_ok());
    }

    #[test]
    fn test_attempt_number_is_one_based() {
        let log = WorkflowStepLog::create(Uuid::new_v4(), &step(), 0, now());
        assert_eq!(log.attempt_number(), 1);
    }
}

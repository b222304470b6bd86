// Scheduled Workflows Job - Runs due time-based workflows and advances their schedules

use automation_shared::{ExecutionStatus, Workflow};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::scheduler::JobResult;
use crate::workflows::{WorkflowEngine, next_run_after};

pub struct ScheduledWorkflowsJob {
    engine: Arc<WorkflowEngine>,
}

#[derive(Debug, Default)]
pub struct ScheduledRunResult {
    pub due: i32,
    pub executed: i32,
    pub skipped: i32,
    pub failed: i32,
    /// Workflows whose cron could not be parsed and were pushed out by the fallback interval
    pub flagged: Vec<Uuid>,
    pub errors: Vec<String>,
}

impl ScheduledWorkflowsJob {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    /// One scheduler tick. A failing workflow never stops the others, and every
    /// due workflow gets a new `next_run_at` whatever happened to its run.
    pub async fn run(&self) -> JobResult<ScheduledRunResult> {
        let now = self.engine.clock().now();
        let due = self.engine.workflows().find_due(now).await?;

        let mut result = ScheduledRunResult {
            due: due.len() as i32,
            ..Default::default()
        };

        for workflow in &due {
            let ran = match self.engine.execute_scheduled(workflow).await {
                Ok(Some(execution)) => {
                    if execution.status() == ExecutionStatus::Completed {
                        result.executed += 1;
                    } else {
                        result.failed += 1;
                    }
                    true
                }
                Ok(None) => {
                    result.skipped += 1;
                    false
                }
                Err(e) => {
                    error!(workflow_id = %workflow.id, "Scheduled run of '{}' failed: {}", workflow.name, e);
                    result.failed += 1;
                    result.errors.push(format!("{}: {}", workflow.id, e));
                    false
                }
            };

            let next_run_at = self.next_run_at(workflow, now, &mut result);
            let last_run_at = ran.then_some(now);

            if let Err(e) = self
                .engine
                .workflows()
                .record_schedule_run(workflow.id, last_run_at, next_run_at)
                .await
            {
                error!(workflow_id = %workflow.id, "Failed to advance schedule: {}", e);
                result.errors.push(format!("{}: {}", workflow.id, e));
            }
        }

        if result.due > 0 {
            info!(
                "Scheduled workflows: {} due, {} executed, {} skipped, {} failed",
                result.due, result.executed, result.skipped, result.failed
            );
        }

        Ok(result)
    }

    fn next_run_at(&self, workflow: &Workflow, now: DateTime<Utc>, result: &mut ScheduledRunResult) -> DateTime<Utc> {
        let parsed = match workflow.schedule_cron.as_deref() {
            Some(cron) => next_run_after(cron, now),
            None => Err("no cron schedule configured".to_string()),
        };

        match parsed {
            Ok(next) => next,
            Err(e) => {
                let fallback = now + self.engine.config().cron_fallback_interval();
                warn!(
                    workflow_id = %workflow.id,
                    "Workflow '{}' flagged for operator attention: {}; next run pushed to {}",
                    workflow.name,
                    e,
                    fallback
                );
                result.flagged.push(workflow.id);
                fallback
            }
        }
    }
}

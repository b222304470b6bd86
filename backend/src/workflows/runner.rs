// Step Runner - Executes a workflow's ordered step groups for one execution

use automation_shared::{
    ActionType, ContextData, ExecutionStatus, WorkflowExecution, WorkflowStep, WorkflowStepLog,
};
use futures::future::join_all;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::actions::ActionRegistry;
use super::conditions::{ConditionEvaluator, is_blank};
use super::validation::MAX_RETRY_COUNT;
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::repository::ExecutionRepository;

/// What one step did, applied to the execution in step order.
#[derive(Debug, Clone, PartialEq)]
enum StepOutcome {
    Completed(Value),
    Skipped,
    /// A condition step selected a branch, or none
    Routed(Option<String>),
    Merged,
    Failed { message: String, continue_on_error: bool },
}

/// Runs steps for executions it is handed. One runner may serve many
/// executions concurrently, but each execution belongs to a single `run` call.
#[derive(Clone)]
pub struct StepRunner {
    registry: Arc<ActionRegistry>,
    evaluator: Arc<dyn ConditionEvaluator>,
    executions: Arc<dyn ExecutionRepository>,
    clock: Arc<dyn Clock>,
    max_retry_delay: Duration,
}

impl StepRunner {
    pub fn new(
        registry: Arc<ActionRegistry>,
        evaluator: Arc<dyn ConditionEvaluator>,
        executions: Arc<dyn ExecutionRepository>,
        clock: Arc<dyn Clock>,
        max_retry_delay: Duration,
    ) -> Self {
        Self {
            registry,
            evaluator,
            executions,
            clock,
            max_retry_delay,
        }
    }

    /// Drive `execution` through `steps` to a terminal status.
    ///
    /// Groups of equal `order` run in ascending order. Within a group the
    /// sequential steps run first, then the parallel siblings run concurrently
    /// against the same context snapshot. Cancellation is checked between groups.
    pub async fn run(
        &self,
        execution: &mut WorkflowExecution,
        steps: &[WorkflowStep],
        cancel: &CancellationToken,
    ) -> EngineResult<ExecutionStatus> {
        if execution.status() != ExecutionStatus::Running {
            execution.mark_as_started(self.clock.now())?;
        }

        if let Some(action_type) = self.registry.missing_for(steps).into_iter().next() {
            let message = EngineError::UnknownAction(action_type).to_string();
            warn!(execution_id = %execution.id(), "{}", message);
            return self.finish_failed(execution, message).await;
        }

        self.executions.save_execution(execution).await?;

        let mut selected_branch: Option<String> = None;

        for (order, group) in group_by_order(steps) {
            if cancel.is_cancelled() {
                info!(execution_id = %execution.id(), "Execution cancelled before group {}", order);
                execution.mark_as_cancelled(self.clock.now())?;
                self.executions.save_execution(execution).await?;
                return Ok(ExecutionStatus::Cancelled);
            }

            let (parallel, sequential): (Vec<&WorkflowStep>, Vec<&WorkflowStep>) =
                group.into_iter().partition(|s| s.is_parallel);

            let mut abort: Option<String> = None;

            for step in sequential {
                let outcome = self
                    .run_step(execution.id(), step, execution.context_data(), selected_branch.as_deref())
                    .await?;
                if let Some(message) = apply_outcome(execution, &mut selected_branch, outcome) {
                    abort = Some(message);
                    break;
                }
            }

            if abort.is_none() && !parallel.is_empty() {
                let execution_id = execution.id();
                let snapshot = execution.context_data().clone();
                let branch = selected_branch.clone();
                let results = join_all(
                    parallel
                        .iter()
                        .map(|step| self.run_step(execution_id, step, &snapshot, branch.as_deref())),
                )
                .await;

                for result in results {
                    if let Some(message) = apply_outcome(execution, &mut selected_branch, result?) {
                        abort.get_or_insert(message);
                    }
                }
            }

            if let Some(message) = abort {
                return self.finish_failed(execution, message).await;
            }

            self.executions.save_execution(execution).await?;
        }

        execution.mark_as_completed(self.clock.now())?;
        self.executions.save_execution(execution).await?;
        info!(
            execution_id = %execution.id(),
            "Execution completed: {} completed, {} failed, {} skipped",
            execution.steps_completed(),
            execution.steps_failed(),
            execution.steps_skipped()
        );
        Ok(ExecutionStatus::Completed)
    }

    async fn finish_failed(
        &self,
        execution: &mut WorkflowExecution,
        message: String,
    ) -> EngineResult<ExecutionStatus> {
        execution.mark_as_failed(message, self.clock.now())?;
        self.executions.save_execution(execution).await?;
        warn!(
            execution_id = %execution.id(),
            "Execution failed: {}",
            execution.error_message().unwrap_or_default()
        );
        Ok(ExecutionStatus::Failed)
    }

    async fn run_step(
        &self,
        execution_id: Uuid,
        step: &WorkflowStep,
        context: &ContextData,
        selected_branch: Option<&str>,
    ) -> EngineResult<StepOutcome> {
        if let Some(branch) = step.branch_id.as_deref().filter(|b| !b.is_empty()) {
            if selected_branch != Some(branch) {
                self.log_skipped(execution_id, step, "branch not selected").await?;
                return Ok(StepOutcome::Skipped);
            }
        }

        if !is_blank(&step.conditions) && !self.evaluator.evaluate(&step.conditions, context) {
            self.log_skipped(execution_id, step, "conditions not met").await?;
            return Ok(StepOutcome::Skipped);
        }

        match step.action_type {
            ActionType::Condition => {
                let branch = self.select_branch(&step.action_config, context);
                debug!(execution_id = %execution_id, step_id = %step.id, "Condition selected branch {:?}", branch);
                self.log_completed(execution_id, step, json!({ "selected_branch": branch }))
                    .await?;
                Ok(StepOutcome::Routed(branch))
            }
            ActionType::Merge => {
                self.log_completed(execution_id, step, json!({ "merged": true })).await?;
                Ok(StepOutcome::Merged)
            }
            _ => self.run_action(execution_id, step, context).await,
        }
    }

    /// First branch whose conditions hold, else `default_branch`.
    ///
    /// Config: `{"branches": [{"branch_id", "conditions"}], "default_branch"}`.
    fn select_branch(&self, config: &Value, context: &ContextData) -> Option<String> {
        let branches = config.get("branches").and_then(Value::as_array);

        branches
            .into_iter()
            .flatten()
            .find(|branch| {
                let conditions = branch.get("conditions").unwrap_or(&Value::Null);
                is_blank(conditions) || self.evaluator.evaluate(conditions, context)
            })
            .and_then(|branch| branch.get("branch_id"))
            .or_else(|| config.get("default_branch"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    async fn run_action(
        &self,
        execution_id: Uuid,
        step: &WorkflowStep,
        context: &ContextData,
    ) -> EngineResult<StepOutcome> {
        let handler = self
            .registry
            .get(step.action_type)
            .ok_or(EngineError::UnknownAction(step.action_type))?;

        let attempts = step.retry_count.clamp(0, MAX_RETRY_COUNT) + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let mut log = WorkflowStepLog::create(execution_id, step, attempt, self.clock.now());
            log.mark_as_started(step.action_config.clone(), self.clock.now())?;

            match handler.execute(&step.action_config, context).await {
                Ok(output) => {
                    log.mark_as_completed(output.clone(), self.clock.now())?;
                    self.executions.append_step_log(&log).await?;
                    debug!(
                        execution_id = %execution_id,
                        step_id = %step.id,
                        attempt,
                        "Step {} completed",
                        step.display_name()
                    );
                    return Ok(StepOutcome::Completed(output));
                }
                Err(e) => {
                    last_error = e.to_string();
                    log.mark_as_failed(last_error.clone(), self.clock.now())?;
                    self.executions.append_step_log(&log).await?;
                    warn!(
                        execution_id = %execution_id,
                        step_id = %step.id,
                        attempt,
                        "Step {} failed: {}",
                        step.display_name(),
                        last_error
                    );
                }
            }

            if attempt < attempts {
                let delay = Duration::from_secs(step.retry_delay_seconds.max(0) as u64).min(self.max_retry_delay);
                tokio::time::sleep(delay).await;
            }
        }

        Ok(StepOutcome::Failed {
            message: last_error,
            continue_on_error: step.continue_on_error,
        })
    }

    async fn log_skipped(&self, execution_id: Uuid, step: &WorkflowStep, reason: &str) -> EngineResult<()> {
        let mut log = WorkflowStepLog::create(execution_id, step, 1, self.clock.now());
        log.mark_as_skipped(reason, self.clock.now())?;
        self.executions.append_step_log(&log).await?;
        debug!(execution_id = %execution_id, step_id = %step.id, "Step skipped: {}", reason);
        Ok(())
    }

    async fn log_completed(&self, execution_id: Uuid, step: &WorkflowStep, output: Value) -> EngineResult<()> {
        let mut log = WorkflowStepLog::create(execution_id, step, 1, self.clock.now());
        log.mark_as_started(step.action_config.clone(), self.clock.now())?;
        log.mark_as_completed(output, self.clock.now())?;
        self.executions.append_step_log(&log).await?;
        Ok(())
    }
}

/// Steps bucketed by `order`, ascending. Input order is kept inside a bucket.
fn group_by_order(steps: &[WorkflowStep]) -> BTreeMap<i32, Vec<&WorkflowStep>> {
    let mut groups: BTreeMap<i32, Vec<&WorkflowStep>> = BTreeMap::new();
    for step in steps {
        groups.entry(step.order).or_default().push(step);
    }
    groups
}

/// Fold one outcome into the execution. Returns the abort message when the
/// step failed without `continue_on_error`.
fn apply_outcome(
    execution: &mut WorkflowExecution,
    selected_branch: &mut Option<String>,
    outcome: StepOutcome,
) -> Option<String> {
    match outcome {
        StepOutcome::Completed(output) => {
            if let Value::Object(map) = output {
                execution.update_context_data(map);
            }
            execution.increment_steps_completed();
        }
        StepOutcome::Skipped => execution.increment_steps_skipped(),
        StepOutcome::Routed(branch) => {
            *selected_branch = branch;
            execution.increment_steps_completed();
        }
        StepOutcome::Merged => {
            *selected_branch = None;
            execution.increment_steps_completed();
        }
        StepOutcome::Failed {
            message,
            continue_on_error,
        } => {
            execution.increment_steps_failed();
            if !continue_on_error {
                return Some(message);
            }
        }
    }
    None
}

// Workflow Engine - Admission, execution and cancellation of workflow runs

use automation_shared::{
    ContextData, ExecutionStatus, TriggerType, Workflow, WorkflowExecution,
};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::actions::ActionRegistry;
use super::conditions::ConditionEvaluator;
use super::matcher::{MatchRejection, TriggerMatcher};
use super::runner::StepRunner;
use super::triggers::TriggerEvent;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::repository::{ExecutionRepository, RunHistoryStore, RunKey, WorkflowRepository};

/// Trigger type recorded on executions started by the scheduler.
pub const SCHEDULED_TRIGGER: &str = "scheduled";

pub struct WorkflowEngine {
    workflows: Arc<dyn WorkflowRepository>,
    executions: Arc<dyn ExecutionRepository>,
    run_history: Arc<dyn RunHistoryStore>,
    matcher: TriggerMatcher,
    runner: StepRunner,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    running: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl WorkflowEngine {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        executions: Arc<dyn ExecutionRepository>,
        run_history: Arc<dyn RunHistoryStore>,
        registry: ActionRegistry,
        evaluator: Arc<dyn ConditionEvaluator>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let runner = StepRunner::new(
            Arc::new(registry),
            evaluator.clone(),
            executions.clone(),
            clock.clone(),
            config.max_retry_delay(),
        );

        Self {
            workflows,
            executions,
            run_history,
            matcher: TriggerMatcher::new(evaluator),
            runner,
            clock,
            config,
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn workflows(&self) -> &Arc<dyn WorkflowRepository> {
        &self.workflows
    }

    pub fn executions(&self) -> &Arc<dyn ExecutionRepository> {
        &self.executions
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ids of executions currently owned by this engine.
    pub async fn running_executions(&self) -> Vec<Uuid> {
        self.running.read().await.keys().copied().collect()
    }

    /// Offer an event to every candidate workflow, highest priority first, and run
    /// the ones that are admitted. Returns the finished executions.
    pub async fn process_event(&self, event: &TriggerEvent) -> EngineResult<Vec<WorkflowExecution>> {
        let candidates = match event.trigger_type {
            TriggerType::Manual => TriggerType::ALL.to_vec(),
            event_type => TriggerType::candidate_triggers(event_type),
        };

        let workflows = self
            .workflows
            .find_active_for_event(event.module_id, &candidates)
            .await?;

        info!(
            "Processing {} event {}: {} candidate workflow(s)",
            event.trigger_type,
            event.event_id,
            workflows.len()
        );

        let context = event.context_data();
        let today = self.clock.today();
        let mut finished = Vec::new();

        for workflow in workflows {
            if let Err(reason) = self.admit(&workflow, event, &context, today, true).await? {
                debug!(workflow_id = %workflow.id, "Workflow '{}' not triggered: {}", workflow.name, reason);
                continue;
            }

            let execution = self.build_execution(&workflow, event, &context);
            let execution = self.execute(&workflow, execution).await?;
            finished.push(execution);

            if workflow.stop_on_first_match && self.config.honors_stop_on_first_match() {
                info!(workflow_id = %workflow.id, "Stopping event processing after '{}'", workflow.name);
                break;
            }
        }

        Ok(finished)
    }

    /// Run one workflow on request. Run-once-per-record does not apply; the quota does.
    pub async fn trigger_manual(
        &self,
        workflow_id: Uuid,
        user_id: Option<Uuid>,
        record: Option<(Uuid, &str)>,
        payload: Value,
    ) -> EngineResult<WorkflowExecution> {
        let workflow = self
            .workflows
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| EngineError::workflow_not_found(workflow_id))?;

        if !workflow.allow_manual_trigger {
            return Err(EngineError::ManualTriggerNotAllowed(workflow_id));
        }

        let event = TriggerEvent::manual(user_id, record, payload).with_module(workflow.module_id);
        let context = event.context_data();

        if let Err(reason) = self.admit(&workflow, &event, &context, self.clock.today(), false).await? {
            return Err(EngineError::NotAdmitted { workflow_id, reason });
        }

        let execution = self.build_execution(&workflow, &event, &context);
        self.execute(&workflow, execution).await
    }

    /// Run a due time-based workflow. `None` means the matcher turned it away,
    /// for example because today's quota is spent.
    pub async fn execute_scheduled(&self, workflow: &Workflow) -> EngineResult<Option<WorkflowExecution>> {
        let now = self.clock.now();
        let event = TriggerEvent::scheduled(now).with_module(workflow.module_id);
        let context = event.context_data();

        if let Err(reason) = self.admit(workflow, &event, &context, self.clock.today(), false).await? {
            info!(workflow_id = %workflow.id, "Scheduled workflow '{}' skipped: {}", workflow.name, reason);
            return Ok(None);
        }

        let execution = WorkflowExecution::create(workflow.id, SCHEDULED_TRIGGER, now)
            .with_context(context);
        self.execute(workflow, execution).await.map(Some)
    }

    /// The pure matcher check followed by the two atomic reservations: the daily
    /// quota and, for run-once workflows, the run-history entry.
    async fn admit(
        &self,
        workflow: &Workflow,
        event: &TriggerEvent,
        context: &ContextData,
        today: NaiveDate,
        enforce_run_once: bool,
    ) -> EngineResult<Result<(), MatchRejection>> {
        if let Err(reason) = self.matcher.check(workflow, event, context, today) {
            return Ok(Err(reason));
        }

        let run_key = match (event.record_id, event.record_type.as_deref()) {
            (Some(record_id), Some(record_type)) if enforce_run_once && workflow.run_once_per_record => Some(
                RunKey::new(workflow.id, record_id, record_type, event.trigger_type.as_str()),
            ),
            _ => None,
        };

        if let Some(key) = &run_key {
            if self.run_history.has_run_for_record(key).await? {
                return Ok(Err(MatchRejection::AlreadyRanForRecord));
            }
        }

        if !self.workflows.try_consume_daily_quota(workflow.id, today).await? {
            return Ok(Err(MatchRejection::QuotaExhausted));
        }

        if let Some(key) = &run_key {
            if !self.run_history.try_record_run(key, self.clock.now()).await? {
                warn!(workflow_id = %workflow.id, "Lost run-once race for record {}", key.record_id);
                return Ok(Err(MatchRejection::AlreadyRanForRecord));
            }
        }

        Ok(Ok(()))
    }

    fn build_execution(&self, workflow: &Workflow, event: &TriggerEvent, context: &ContextData) -> WorkflowExecution {
        let execution = WorkflowExecution::create(workflow.id, event.trigger_type.as_str(), self.clock.now())
            .with_context(context.clone())
            .with_triggered_by(event.triggered_by);

        match (event.record_id, event.record_type.as_deref()) {
            (Some(record_id), Some(record_type)) => execution.with_trigger_record(record_id, record_type),
            _ => execution,
        }
    }

    /// Run an admitted execution to a terminal status and record the outcome on
    /// the workflow. Step and handler failures end up in the returned status,
    /// never in the `Err` arm.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        mut execution: WorkflowExecution,
    ) -> EngineResult<WorkflowExecution> {
        self.executions.save_execution(&execution).await?;

        let token = CancellationToken::new();
        self.running.write().await.insert(execution.id(), token.clone());

        info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id(),
            "Executing workflow '{}'",
            workflow.name
        );

        let result = self.drive(workflow, &mut execution, &token).await;
        self.running.write().await.remove(&execution.id());

        if let Err(e) = result {
            error!(execution_id = %execution.id(), "Execution aborted: {}", e);
            if !execution.status().is_terminal() {
                if let Err(transition) = execution.mark_as_failed(e.to_string(), self.clock.now()) {
                    error!(execution_id = %execution.id(), "Could not fail execution: {}", transition);
                }
                if let Err(save) = self.executions.save_execution(&execution).await {
                    error!(execution_id = %execution.id(), "Could not persist failed execution: {}", save);
                }
            }
        }

        if execution.status().is_terminal() {
            let success = execution.status() == ExecutionStatus::Completed;
            if let Err(e) = self
                .workflows
                .record_execution_outcome(workflow.id, success, self.clock.now())
                .await
            {
                error!(workflow_id = %workflow.id, "Failed to record execution outcome: {}", e);
            }
        }

        Ok(execution)
    }

    async fn drive(
        &self,
        workflow: &Workflow,
        execution: &mut WorkflowExecution,
        token: &CancellationToken,
    ) -> EngineResult<()> {
        if workflow.delay_seconds > 0 {
            execution.mark_as_queued(self.clock.now())?;
            self.executions.save_execution(execution).await?;

            let delay = Duration::from_secs(workflow.delay_seconds as u64);
            tokio::select! {
                _ = token.cancelled() => {
                    info!(execution_id = %execution.id(), "Queued execution cancelled");
                    execution.mark_as_cancelled(self.clock.now())?;
                    self.executions.save_execution(execution).await?;
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let steps = workflow.ordered_steps();
        self.runner.run(execution, &steps, token).await?;
        Ok(())
    }

    /// Request cancellation of an execution this engine is running. Queued
    /// executions stop at once; running ones stop at the next step group.
    /// Returns false when the execution is not in flight here.
    pub async fn cancel(&self, execution_id: Uuid) -> bool {
        match self.running.read().await.get(&execution_id) {
            Some(token) => {
                info!(execution_id = %execution_id, "Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Delete a workflow with its executions, their step logs and its run history.
    /// Returns false when the workflow did not exist.
    pub async fn delete_workflow(&self, workflow_id: Uuid) -> EngineResult<bool> {
        let executions = self.executions.delete_for_workflow(workflow_id).await?;
        self.run_history.clear_workflow(workflow_id).await?;
        let existed = self.workflows.delete(workflow_id).await?;

        info!(workflow_id = %workflow_id, "Deleted workflow and {} execution(s)", executions);
        Ok(existed)
    }
}

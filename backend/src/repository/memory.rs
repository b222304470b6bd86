// In-memory repositories - Lock-guarded maps with the same atomicity as the SQL versions

use async_trait::async_trait;
use automation_shared::{
    ExecutionStatus, TriggerType, Workflow, WorkflowExecution, WorkflowStepLog,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{
    ExecutionRepository, RepositoryError, RepositoryResult, RunHistoryStore, RunKey,
    WorkflowRepository,
};

fn workflow_not_found(id: Uuid) -> RepositoryError {
    RepositoryError::NotFound {
        entity: "Workflow",
        id,
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkflowRepository {
    workflows: Arc<RwLock<HashMap<Uuid, Workflow>>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select(&self, filter: impl Fn(&Workflow) -> bool) -> Vec<Workflow> {
        let workflows = self.workflows.read().await;
        let mut found: Vec<Workflow> = workflows.values().filter(|w| filter(w)).cloned().collect();
        found.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        found
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save(&self, workflow: &Workflow) -> RepositoryResult<()> {
        let mut stored = workflow.clone();
        for step in &mut stored.steps {
            step.assign_to_workflow(workflow.id);
        }
        self.workflows.write().await.insert(workflow.id, stored);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Workflow>> {
        Ok(self.workflows.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<bool> {
        Ok(self.workflows.write().await.remove(&id).is_some())
    }

    async fn find_by_module(&self, module_id: Uuid) -> RepositoryResult<Vec<Workflow>> {
        Ok(self.select(|w| w.module_id == module_id).await)
    }

    async fn find_by_trigger_type(&self, trigger_type: TriggerType) -> RepositoryResult<Vec<Workflow>> {
        Ok(self.select(|w| w.trigger_type == trigger_type).await)
    }

    async fn find_active_for_event(
        &self,
        module_id: Option<Uuid>,
        trigger_types: &[TriggerType],
    ) -> RepositoryResult<Vec<Workflow>> {
        Ok(self
            .select(|w| {
                w.is_active
                    && module_id.is_none_or(|m| w.module_id == m)
                    && trigger_types.contains(&w.trigger_type)
            })
            .await)
    }

    async fn find_due(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<Workflow>> {
        Ok(self
            .select(|w| w.is_active && w.is_scheduled() && w.next_run_at.is_none_or(|next| next <= now))
            .await)
    }

    async fn try_consume_daily_quota(&self, id: Uuid, today: NaiveDate) -> RepositoryResult<bool> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows.get_mut(&id).ok_or_else(|| workflow_not_found(id))?;

        if !workflow.can_execute_today(today) {
            return Ok(false);
        }
        workflow.increment_today_executions(today);
        Ok(true)
    }

    async fn record_execution_outcome(
        &self,
        id: Uuid,
        success: bool,
        at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows.get_mut(&id).ok_or_else(|| workflow_not_found(id))?;
        workflow.record_execution(success, at);
        Ok(())
    }

    async fn record_schedule_run(
        &self,
        id: Uuid,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows.get_mut(&id).ok_or_else(|| workflow_not_found(id))?;
        if last_run_at.is_some() {
            workflow.last_run_at = last_run_at;
        }
        workflow.next_run_at = Some(next_run_at);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutionRepository {
    executions: Arc<RwLock<HashMap<Uuid, WorkflowExecution>>>,
    step_logs: Arc<RwLock<Vec<WorkflowStepLog>>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select(&self, filter: impl Fn(&WorkflowExecution) -> bool) -> Vec<WorkflowExecution> {
        let executions = self.executions.read().await;
        let mut found: Vec<WorkflowExecution> =
            executions.values().filter(|e| filter(e)).cloned().collect();
        found.sort_by_key(|e| e.created_at());
        found
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save_execution(&self, execution: &WorkflowExecution) -> RepositoryResult<()> {
        self.executions
            .write()
            .await
            .insert(execution.id(), execution.clone());
        Ok(())
    }

    async fn find_execution(&self, id: Uuid) -> RepositoryResult<Option<WorkflowExecution>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn find_by_workflow(&self, workflow_id: Uuid) -> RepositoryResult<Vec<WorkflowExecution>> {
        Ok(self.select(|e| e.workflow_id() == workflow_id).await)
    }

    async fn find_by_status(&self, status: ExecutionStatus) -> RepositoryResult<Vec<WorkflowExecution>> {
        Ok(self.select(|e| e.status() == status).await)
    }

    async fn append_step_log(&self, log: &WorkflowStepLog) -> RepositoryResult<()> {
        self.step_logs.write().await.push(log.clone());
        Ok(())
    }

    async fn step_logs_for(&self, execution_id: Uuid) -> RepositoryResult<Vec<WorkflowStepLog>> {
        Ok(self
            .step_logs
            .read()
            .await
            .iter()
            .filter(|l| l.execution_id() == execution_id)
            .cloned()
            .collect())
    }

    async fn delete_for_workflow(&self, workflow_id: Uuid) -> RepositoryResult<u64> {
        let mut executions = self.executions.write().await;
        let removed: Vec<Uuid> = executions
            .values()
            .filter(|e| e.workflow_id() == workflow_id)
            .map(|e| e.id())
            .collect();
        for id in &removed {
            executions.remove(id);
        }

        self.step_logs
            .write()
            .await
            .retain(|l| !removed.contains(&l.execution_id()));
        Ok(removed.len() as u64)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRunHistory {
    runs: Arc<Mutex<HashMap<RunKey, DateTime<Utc>>>>,
}

impl InMemoryRunHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunHistoryStore for InMemoryRunHistory {
    async fn has_run_for_record(&self, key: &RunKey) -> RepositoryResult<bool> {
        Ok(self.runs.lock().await.contains_key(key))
    }

    async fn try_record_run(&self, key: &RunKey, at: DateTime<Utc>) -> RepositoryResult<bool> {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(key) {
            return Ok(false);
        }
        runs.insert(key.clone(), at);
        Ok(true)
    }

    async fn clear_workflow(&self, workflow_id: Uuid) -> RepositoryResult<()> {
        self.runs.lock().await.retain(|key, _| key.workflow_id != workflow_id);
        Ok(())
    }
}

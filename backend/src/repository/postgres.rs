// PostgreSQL repositories - sqlx runtime queries, rows decoded through to_jsonb

use async_trait::async_trait;
use automation_shared::{
    ExecutionStatus, TriggerType, Workflow, WorkflowExecution, WorkflowStepLog,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    ExecutionRepository, RepositoryError, RepositoryResult, RunHistoryStore, RunKey,
    WorkflowRepository,
};

const WORKFLOW_SELECT: &str = r#"
    SELECT to_jsonb(w) || jsonb_build_object(
        'steps',
        COALESCE(
            (SELECT jsonb_agg(to_jsonb(s) ORDER BY s.position)
             FROM workflow_steps s
             WHERE s.workflow_id = w.id),
            '[]'::jsonb
        )
    )
    FROM workflows w
"#;

const WORKFLOW_ORDER: &str = "ORDER BY w.priority DESC, w.created_at ASC, w.id";

fn decode_rows<T: DeserializeOwned>(rows: Vec<serde_json::Value>) -> RepositoryResult<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(RepositoryError::from))
        .collect()
}

fn decode_row<T: DeserializeOwned>(row: Option<serde_json::Value>) -> RepositoryResult<Option<T>> {
    row.map(serde_json::from_value)
        .transpose()
        .map_err(RepositoryError::from)
}

#[derive(Debug, Clone)]
pub struct PgWorkflowRepository {
    pool: PgPool,
}

impl PgWorkflowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowRepository for PgWorkflowRepository {
    async fn save(&self, workflow: &Workflow) -> RepositoryResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO workflows (
                id, name, description, module_id, is_active, priority,
                trigger_type, trigger_config, trigger_timing, watched_fields, webhook_secret,
                conditions, stop_on_first_match, max_executions_per_day, executions_today,
                executions_today_date, run_once_per_record, allow_manual_trigger, delay_seconds,
                schedule_cron, last_run_at, next_run_at, execution_count, success_count,
                failure_count, created_by, updated_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                module_id = EXCLUDED.module_id,
                is_active = EXCLUDED.is_active,
                priority = EXCLUDED.priority,
                trigger_type = EXCLUDED.trigger_type,
                trigger_config = EXCLUDED.trigger_config,
                trigger_timing = EXCLUDED.trigger_timing,
                watched_fields = EXCLUDED.watched_fields,
                webhook_secret = EXCLUDED.webhook_secret,
                conditions = EXCLUDED.conditions,
                stop_on_first_match = EXCLUDED.stop_on_first_match,
                max_executions_per_day = EXCLUDED.max_executions_per_day,
                executions_today = EXCLUDED.executions_today,
                executions_today_date = EXCLUDED.executions_today_date,
                run_once_per_record = EXCLUDED.run_once_per_record,
                allow_manual_trigger = EXCLUDED.allow_manual_trigger,
                delay_seconds = EXCLUDED.delay_seconds,
                schedule_cron = EXCLUDED.schedule_cron,
                last_run_at = EXCLUDED.last_run_at,
                next_run_at = EXCLUDED.next_run_at,
                execution_count = EXCLUDED.execution_count,
                success_count = EXCLUDED.success_count,
                failure_count = EXCLUDED.failure_count,
                updated_by = EXCLUDED.updated_by,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.module_id)
        .bind(workflow.is_active)
        .bind(workflow.priority)
        .bind(workflow.trigger_type.as_str())
        .bind(&workflow.trigger_config)
        .bind(workflow.trigger_timing.as_str())
        .bind(serde_json::to_value(&workflow.watched_fields)?)
        .bind(&workflow.webhook_secret)
        .bind(&workflow.conditions)
        .bind(workflow.stop_on_first_match)
        .bind(workflow.max_executions_per_day)
        .bind(workflow.executions_today)
        .bind(workflow.executions_today_date)
        .bind(workflow.run_once_per_record)
        .bind(workflow.allow_manual_trigger)
        .bind(workflow.delay_seconds)
        .bind(&workflow.schedule_cron)
        .bind(workflow.last_run_at)
        .bind(workflow.next_run_at)
        .bind(workflow.execution_count)
        .bind(workflow.success_count)
        .bind(workflow.failure_count)
        .bind(workflow.created_by)
        .bind(workflow.updated_by)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM workflow_steps WHERE workflow_id = $1")
            .bind(workflow.id)
            .execute(&mut *tx)
            .await?;

        for (position, step) in workflow.steps.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO workflow_steps (
                    id, workflow_id, "order", position, name, action_type, action_config,
                    conditions, branch_id, is_parallel, continue_on_error, retry_count,
                    retry_delay_seconds
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(step.id)
            .bind(workflow.id)
            .bind(step.order)
            .bind(position as i32)
            .bind(&step.name)
            .bind(step.action_type.as_str())
            .bind(&step.action_config)
            .bind(&step.conditions)
            .bind(&step.branch_id)
            .bind(step.is_parallel)
            .bind(step.continue_on_error)
            .bind(step.retry_count)
            .bind(step.retry_delay_seconds)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Workflow>> {
        let sql = format!("{WORKFLOW_SELECT} WHERE w.id = $1");
        let row: Option<serde_json::Value> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        decode_row(row)
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_module(&self, module_id: Uuid) -> RepositoryResult<Vec<Workflow>> {
        let sql = format!("{WORKFLOW_SELECT} WHERE w.module_id = $1 {WORKFLOW_ORDER}");
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(&sql)
            .bind(module_id)
            .fetch_all(&self.pool)
            .await?;
        decode_rows(rows)
    }

    async fn find_by_trigger_type(&self, trigger_type: TriggerType) -> RepositoryResult<Vec<Workflow>> {
        let sql = format!("{WORKFLOW_SELECT} WHERE w.trigger_type = $1 {WORKFLOW_ORDER}");
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(&sql)
            .bind(trigger_type.as_str())
            .fetch_all(&self.pool)
            .await?;
        decode_rows(rows)
    }

    async fn find_active_for_event(
        &self,
        module_id: Option<Uuid>,
        trigger_types: &[TriggerType],
    ) -> RepositoryResult<Vec<Workflow>> {
        let types: Vec<String> = trigger_types.iter().map(|t| t.as_str().to_string()).collect();
        let sql = format!(
            "{WORKFLOW_SELECT} WHERE w.is_active \
             AND w.trigger_type = ANY($1) \
             AND ($2::uuid IS NULL OR w.module_id = $2) \
             {WORKFLOW_ORDER}"
        );
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(&sql)
            .bind(types)
            .bind(module_id)
            .fetch_all(&self.pool)
            .await?;
        decode_rows(rows)
    }

    async fn find_due(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<Workflow>> {
        let sql = format!(
            "{WORKFLOW_SELECT} WHERE w.is_active \
             AND w.trigger_type = 'time_based' \
             AND (w.next_run_at IS NULL OR w.next_run_at <= $1) \
             {WORKFLOW_ORDER}"
        );
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        decode_rows(rows)
    }

    async fn try_consume_daily_quota(&self, id: Uuid, today: NaiveDate) -> RepositoryResult<bool> {
        let consumed: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE workflows
            SET executions_today = CASE
                    WHEN executions_today_date = $2 THEN executions_today + 1
                    ELSE 1
                END,
                executions_today_date = $2
            WHERE id = $1
              AND (
                  max_executions_per_day IS NULL
                  OR executions_today_date IS NULL
                  OR executions_today_date < $2
                  OR executions_today < max_executions_per_day
              )
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(today)
        .fetch_optional(&self.pool)
        .await?;

        Ok(consumed.is_some())
    }

    async fn record_execution_outcome(
        &self,
        id: Uuid,
        success: bool,
        at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET execution_count = execution_count + 1,
                success_count = success_count + CASE WHEN $2 THEN 1 ELSE 0 END,
                failure_count = failure_count + CASE WHEN $2 THEN 0 ELSE 1 END,
                last_run_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(success)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Workflow",
                id,
            });
        }
        Ok(())
    }

    async fn record_schedule_run(
        &self,
        id: Uuid,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE workflows
            SET last_run_at = COALESCE($2, last_run_at),
                next_run_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(last_run_at)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgExecutionRepository {
    pool: PgPool,
}

impl PgExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionRepository for PgExecutionRepository {
    async fn save_execution(&self, execution: &WorkflowExecution) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions (
                id, workflow_id, trigger_type, trigger_record_id, trigger_record_type, status,
                queued_at, started_at, completed_at, duration_ms, context_data,
                steps_completed, steps_failed, steps_skipped, error_message, triggered_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                queued_at = EXCLUDED.queued_at,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                duration_ms = EXCLUDED.duration_ms,
                context_data = EXCLUDED.context_data,
                steps_completed = EXCLUDED.steps_completed,
                steps_failed = EXCLUDED.steps_failed,
                steps_skipped = EXCLUDED.steps_skipped,
                error_message = EXCLUDED.error_message
            "#,
        )
        .bind(execution.id())
        .bind(execution.workflow_id())
        .bind(execution.trigger_type())
        .bind(execution.trigger_record_id())
        .bind(execution.trigger_record_type())
        .bind(execution.status().as_str())
        .bind(execution.queued_at())
        .bind(execution.started_at())
        .bind(execution.completed_at())
        .bind(execution.duration_ms())
        .bind(serde_json::Value::Object(execution.context_data().clone()))
        .bind(execution.steps_completed())
        .bind(execution.steps_failed())
        .bind(execution.steps_skipped())
        .bind(execution.error_message())
        .bind(execution.triggered_by())
        .bind(execution.created_at())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_execution(&self, id: Uuid) -> RepositoryResult<Option<WorkflowExecution>> {
        let row: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT to_jsonb(e) FROM workflow_executions e WHERE e.id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        decode_row(row)
    }

    async fn find_by_workflow(&self, workflow_id: Uuid) -> RepositoryResult<Vec<WorkflowExecution>> {
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(
            "SELECT to_jsonb(e) FROM workflow_executions e WHERE e.workflow_id = $1 ORDER BY e.created_at",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        decode_rows(rows)
    }

    async fn find_by_status(&self, status: ExecutionStatus) -> RepositoryResult<Vec<WorkflowExecution>> {
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(
            "SELECT to_jsonb(e) FROM workflow_executions e WHERE e.status = $1 ORDER BY e.created_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        decode_rows(rows)
    }

    async fn append_step_log(&self, log: &WorkflowStepLog) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_step_logs (
                id, execution_id, step_id, action_type, status, started_at, completed_at,
                duration_ms, input_data, output_data, error_message, attempt_number, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(log.id())
        .bind(log.execution_id())
        .bind(log.step_id())
        .bind(log.action_type().as_str())
        .bind(log.status().as_str())
        .bind(log.started_at())
        .bind(log.completed_at())
        .bind(log.duration_ms())
        .bind(log.input_data())
        .bind(log.output_data())
        .bind(log.error_message())
        .bind(log.attempt_number())
        .bind(log.created_at())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn step_logs_for(&self, execution_id: Uuid) -> RepositoryResult<Vec<WorkflowStepLog>> {
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(
            "SELECT to_jsonb(l) FROM workflow_step_logs l WHERE l.execution_id = $1 ORDER BY l.seq",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        decode_rows(rows)
    }

    async fn delete_for_workflow(&self, workflow_id: Uuid) -> RepositoryResult<u64> {
        // step logs follow through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM workflow_executions WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
pub struct PgRunHistory {
    pool: PgPool,
}

impl PgRunHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunHistoryStore for PgRunHistory {
    async fn has_run_for_record(&self, key: &RunKey) -> RepositoryResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM workflow_run_history
                WHERE workflow_id = $1 AND record_id = $2 AND record_type = $3 AND trigger_type = $4
            )
            "#,
        )
        .bind(key.workflow_id)
        .bind(key.record_id)
        .bind(&key.record_type)
        .bind(&key.trigger_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn try_record_run(&self, key: &RunKey, at: DateTime<Utc>) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_run_history (workflow_id, record_id, record_type, trigger_type, executed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(key.workflow_id)
        .bind(key.record_id)
        .bind(&key.record_type)
        .bind(&key.trigger_type)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn clear_workflow(&self, workflow_id: Uuid) -> RepositoryResult<()> {
        sqlx::query("DELETE FROM workflow_run_history WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

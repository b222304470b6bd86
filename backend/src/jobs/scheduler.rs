// Job Scheduler - Drives the scheduled-workflows tick on a cron

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::scheduled_workflows::{ScheduledRunResult, ScheduledWorkflowsJob};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::repository::RepositoryError;
use crate::workflows::WorkflowEngine;

const MAX_EXECUTION_LOGS: usize = 100;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Repository error: {0}")]
    RepositoryError(#[from] RepositoryError),
    #[error("Engine error: {0}")]
    EngineError(#[from] EngineError),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: i32,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    PartialFailure,
    /// The previous tick was still running
    Skipped,
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    engine: Arc<WorkflowEngine>,
    execution_logs: Arc<RwLock<Vec<JobExecutionLog>>>,
    tick_lock: Arc<Mutex<()>>,
}

impl JobScheduler {
    pub async fn new(engine: Arc<WorkflowEngine>) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            engine,
            execution_logs: Arc::new(RwLock::new(Vec::new())),
            tick_lock: Arc::new(Mutex::new(())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting workflow scheduler");

        self.schedule_workflow_tick().await?;
        self.scheduler.start().await?;

        info!("Workflow scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down workflow scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule_workflow_tick(&self) -> JobResult<()> {
        let cron_expr = self.engine.config().scheduler_tick_cron.clone();
        if cron_expr.trim().is_empty() {
            return Err(JobError::ConfigError("scheduler tick cron is empty".to_string()));
        }

        let engine = self.engine.clone();
        let logs = self.execution_logs.clone();
        let tick_lock = self.tick_lock.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let engine = engine.clone();
            let logs = logs.clone();
            let tick_lock = tick_lock.clone();

            Box::pin(async move {
                if let Err(e) = run_tick(engine, logs, tick_lock).await {
                    error!("Scheduled workflows tick failed: {}", e);
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled workflow tick on '{}'", cron_expr);

        Ok(())
    }

    /// Run one tick now, outside the cron. Returns `None` if a tick is already running.
    pub async fn tick(&self) -> JobResult<Option<ScheduledRunResult>> {
        run_tick(self.engine.clone(), self.execution_logs.clone(), self.tick_lock.clone()).await
    }

    pub async fn get_execution_logs(&self) -> Vec<JobExecutionLog> {
        self.execution_logs.read().await.clone()
    }
}

async fn run_tick(
    engine: Arc<WorkflowEngine>,
    logs: Arc<RwLock<Vec<JobExecutionLog>>>,
    tick_lock: Arc<Mutex<()>>,
) -> JobResult<Option<ScheduledRunResult>> {
    let clock = engine.clock().clone();
    let started_at = clock.now();

    let Ok(_guard) = tick_lock.try_lock() else {
        warn!("Previous scheduled workflows tick still running, skipping");
        let log = finished_log(started_at, clock.now(), JobStatus::Skipped, 0, Vec::new());
        push_log(&logs, log).await;
        return Ok(None);
    };

    match ScheduledWorkflowsJob::new(engine).run().await {
        Ok(result) => {
            let status = if result.errors.is_empty() {
                JobStatus::Completed
            } else {
                JobStatus::PartialFailure
            };
            let log = finished_log(started_at, clock.now(), status, result.due, result.errors.clone());
            push_log(&logs, log).await;
            Ok(Some(result))
        }
        Err(e) => {
            let log = finished_log(started_at, clock.now(), JobStatus::Failed, 0, vec![e.to_string()]);
            push_log(&logs, log).await;
            Err(e)
        }
    }
}

fn finished_log(
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    status: JobStatus,
    items_processed: i32,
    errors: Vec<String>,
) -> JobExecutionLog {
    JobExecutionLog {
        id: Uuid::new_v4(),
        job_name: "Scheduled Workflows".to_string(),
        started_at,
        completed_at: Some(completed_at),
        status,
        items_processed,
        errors,
        duration_ms: Some((completed_at - started_at).num_milliseconds()),
    }
}

async fn push_log(logs: &RwLock<Vec<JobExecutionLog>>, log: JobExecutionLog) {
    let mut logs = logs.write().await;
    logs.push(log);
    if logs.len() > MAX_EXECUTION_LOGS {
        logs.remove(0);
    }
}

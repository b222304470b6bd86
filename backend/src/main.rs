use automation_engine::{
    ActionRegistry, Config, JsonConditionEvaluator, SystemClock, WorkflowEngine,
    database,
    jobs::JobScheduler,
    repository::{PgExecutionRepository, PgRunHistory, PgWorkflowRepository},
};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let db_pool = database::create_pool(&config.database_url, &config.pool).await?;

    database::migrate(&db_pool).await?;
    if !database::health_check(&db_pool).await {
        anyhow::bail!("database did not answer the health check");
    }

    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(PgWorkflowRepository::new(db_pool.clone())),
        Arc::new(PgExecutionRepository::new(db_pool.clone())),
        Arc::new(PgRunHistory::new(db_pool.clone())),
        ActionRegistry::with_builtin_handlers(),
        Arc::new(JsonConditionEvaluator),
        Arc::new(SystemClock),
        config.engine.clone(),
    ));

    let mut scheduler = JobScheduler::new(engine).await?;
    scheduler.start().await?;
    tracing::info!("Automation worker running; press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;

    scheduler.shutdown().await?;
    db_pool.close().await;
    tracing::info!("Automation worker stopped");

    Ok(())
}

// Common test utilities that are shared across integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use automation_engine::repository::{
    InMemoryExecutionRepository, InMemoryRunHistory, InMemoryWorkflowRepository,
};
use automation_engine::{
    ActionError, ActionHandler, ActionRegistry, EngineConfig, JsonConditionEvaluator, ManualClock,
    WorkflowEngine, WorkflowRepository,
};
use automation_shared::{ContextData, TriggerType, Workflow};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init()
            .ok();
    });
}

/// Monday 2026-06-01 09:00 UTC
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
}

/// Handler that replays a script of results and remembers every context it saw.
/// Once the script runs out it keeps succeeding with `{}`.
#[derive(Clone, Default)]
pub struct ScriptedHandler {
    script: Arc<Mutex<VecDeque<Result<Value, String>>>>,
    calls: Arc<Mutex<Vec<ContextData>>>,
    sleep: Option<std::time::Duration>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeeding_with(output: Value) -> Self {
        Self::new().then_ok(output)
    }

    pub fn then_ok(self, output: Value) -> Self {
        self.script.lock().unwrap().push_back(Ok(output));
        self
    }

    pub fn then_err(self, message: &str) -> Self {
        self.script.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn always_failing(message: &str) -> Self {
        let handler = Self::new();
        for _ in 0..32 {
            handler.script.lock().unwrap().push_back(Err(message.to_string()));
        }
        handler
    }

    /// Sleep on the tokio clock before answering.
    pub fn with_sleep(mut self, secs: u64) -> Self {
        self.sleep = Some(std::time::Duration::from_secs(secs));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn contexts(&self) -> Vec<ContextData> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionHandler for ScriptedHandler {
    async fn execute(&self, _config: &Value, context: &ContextData) -> Result<Value, ActionError> {
        self.calls.lock().unwrap().push(context.clone());
        if let Some(duration) = self.sleep {
            tokio::time::sleep(duration).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(ActionError::failed(message)),
            None => Ok(Value::Object(Default::default())),
        }
    }
}

/// An engine over in-memory stores and a manual clock.
pub struct Harness {
    pub workflows: Arc<InMemoryWorkflowRepository>,
    pub executions: Arc<InMemoryExecutionRepository>,
    pub run_history: Arc<InMemoryRunHistory>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<WorkflowEngine>,
}

impl Harness {
    pub fn new(registry: ActionRegistry) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: ActionRegistry, config: EngineConfig) -> Self {
        init_test_logging();

        let workflows = Arc::new(InMemoryWorkflowRepository::new());
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let run_history = Arc::new(InMemoryRunHistory::new());
        let clock = Arc::new(ManualClock::new(start_time()));

        let engine = Arc::new(WorkflowEngine::new(
            workflows.clone(),
            executions.clone(),
            run_history.clone(),
            registry,
            Arc::new(JsonConditionEvaluator),
            clock.clone(),
            config,
        ));

        Self {
            workflows,
            executions,
            run_history,
            clock,
            engine,
        }
    }

    /// An active workflow in `module_id`, not yet saved.
    pub fn workflow(&self, name: &str, module_id: Uuid, trigger_type: TriggerType) -> Workflow {
        let mut workflow = Workflow::create(name, module_id, trigger_type, None, start_time());
        workflow.activate(start_time());
        workflow
    }

    pub async fn save(&self, workflow: &Workflow) {
        self.workflows.save(workflow).await.unwrap();
    }

    pub async fn reload(&self, id: Uuid) -> Workflow {
        self.workflows.find_by_id(id).await.unwrap().unwrap()
    }
}

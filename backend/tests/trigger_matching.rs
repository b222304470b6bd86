// Trigger admission: quotas, timing, run-once, stop-on-first-match and manual runs

mod common;

use automation_engine::{
    ActionRegistry, Clock, EngineConfig, EngineError, ExecutionRepository, MatchRejection,
    StopOnFirstMatchPolicy, TriggerEvent,
};
use automation_shared::{ActionType, ExecutionStatus, TriggerTiming, TriggerType, WorkflowStep};
use chrono::Duration;
use common::{Harness, ScriptedHandler};
use serde_json::json;
use uuid::Uuid;

fn tagging_registry(handler: &ScriptedHandler) -> ActionRegistry {
    ActionRegistry::new().with_handler(ActionType::AddTag, handler.clone())
}

fn tag_step() -> WorkflowStep {
    WorkflowStep::create(1, ActionType::AddTag, json!({"tag": "new"}))
}

#[tokio::test]
async fn test_quota_blocks_second_run_of_the_day() {
    let handler = ScriptedHandler::new();
    let h = Harness::new(tagging_registry(&handler));
    let module = Uuid::new_v4();

    let mut wf = h.workflow("Tag new deals", module, TriggerType::RecordCreated);
    wf.max_executions_per_day = Some(1);
    wf.add_step(tag_step());
    h.save(&wf).await;

    let first = h
        .engine
        .process_event(&TriggerEvent::record_created(module, Uuid::new_v4(), "deal", json!({})))
        .await
        .unwrap();
    assert_eq!(first.len(), 1);

    let second = h
        .engine
        .process_event(&TriggerEvent::record_created(module, Uuid::new_v4(), "deal", json!({})))
        .await
        .unwrap();
    assert!(second.is_empty());
    assert_eq!(handler.call_count(), 1);

    let stored = h.reload(wf.id).await;
    assert_eq!(stored.executions_today, 1);
    assert_eq!(stored.execution_count, 1);
    assert_eq!(h.executions.find_by_workflow(wf.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_quota_resets_on_a_new_day() {
    let handler = ScriptedHandler::new();
    let h = Harness::new(tagging_registry(&handler));
    let module = Uuid::new_v4();

    let mut wf = h.workflow("Tag new deals", module, TriggerType::RecordCreated);
    wf.max_executions_per_day = Some(1);
    wf.add_step(tag_step());
    h.save(&wf).await;

    let event = || TriggerEvent::record_created(module, Uuid::new_v4(), "deal", json!({}));
    assert_eq!(h.engine.process_event(&event()).await.unwrap().len(), 1);
    assert!(h.engine.process_event(&event()).await.unwrap().is_empty());

    h.clock.advance(Duration::days(1));
    assert_eq!(h.engine.process_event(&event()).await.unwrap().len(), 1);

    let stored = h.reload(wf.id).await;
    assert_eq!(stored.executions_today, 1);
    assert_eq!(stored.executions_today_date, Some(h.clock.now().date_naive()));
}

#[tokio::test]
async fn test_unlimited_quota_always_admits() {
    let handler = ScriptedHandler::new();
    let h = Harness::new(tagging_registry(&handler));
    let module = Uuid::new_v4();

    let mut wf = h.workflow("Tag everything", module, TriggerType::RecordCreated);
    wf.add_step(tag_step());
    h.save(&wf).await;

    for _ in 0..5 {
        let event = TriggerEvent::record_created(module, Uuid::new_v4(), "deal", json!({}));
        assert_eq!(h.engine.process_event(&event).await.unwrap().len(), 1);
    }
    assert_eq!(h.reload(wf.id).await.execution_count, 5);
}

#[tokio::test]
async fn test_non_match_leaves_no_trace() {
    let handler = ScriptedHandler::new();
    let h = Harness::new(tagging_registry(&handler));
    let module = Uuid::new_v4();

    let mut wf = h
        .workflow("High value only", module, TriggerType::RecordUpdated)
        .with_timing(TriggerTiming::UpdateOnly)
        .with_conditions(json!({"field": "amount", "operator": "greater_than", "value": 10000}));
    wf.max_executions_per_day = Some(3);
    wf.add_step(tag_step());
    h.save(&wf).await;
    let before = h.reload(wf.id).await;

    let event = TriggerEvent::record_updated(module, Uuid::new_v4(), "deal", None, json!({"amount": 50}));
    assert!(h.engine.process_event(&event).await.unwrap().is_empty());

    let after = h.reload(wf.id).await;
    assert_eq!(after.executions_today, before.executions_today);
    assert_eq!(after.executions_today_date, before.executions_today_date);
    assert_eq!(after.execution_count, 0);
    assert!(h.executions.find_by_workflow(wf.id).await.unwrap().is_empty());
    assert_eq!(handler.call_count(), 0);
}

#[tokio::test]
async fn test_timing_and_aliases() {
    let handler = ScriptedHandler::new();
    let h = Harness::new(tagging_registry(&handler));
    let module = Uuid::new_v4();

    let mut saved = h
        .workflow("On save, creates only", module, TriggerType::RecordSaved)
        .with_timing(TriggerTiming::CreateOnly);
    saved.add_step(tag_step());
    h.save(&saved).await;

    let created = TriggerEvent::record_created(module, Uuid::new_v4(), "deal", json!({}));
    let updated = TriggerEvent::record_updated(module, Uuid::new_v4(), "deal", None, json!({}));

    assert_eq!(h.engine.process_event(&created).await.unwrap().len(), 1);
    assert!(h.engine.process_event(&updated).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_other_modules_are_ignored() {
    let handler = ScriptedHandler::new();
    let h = Harness::new(tagging_registry(&handler));

    let mut wf = h.workflow("Contacts only", Uuid::new_v4(), TriggerType::RecordCreated);
    wf.add_step(tag_step());
    h.save(&wf).await;

    let event = TriggerEvent::record_created(Uuid::new_v4(), Uuid::new_v4(), "deal", json!({}));
    assert!(h.engine.process_event(&event).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_watched_fields_need_known_changes() {
    let handler = ScriptedHandler::new();
    let h = Harness::new(tagging_registry(&handler));
    let module = Uuid::new_v4();

    let mut wf = h
        .workflow("Stage changed", module, TriggerType::FieldChanged)
        .with_watched_fields(&["stage"]);
    wf.add_step(tag_step());
    h.save(&wf).await;

    let unknown = TriggerEvent::record_updated(module, Uuid::new_v4(), "deal", None, json!({}));
    assert!(h.engine.process_event(&unknown).await.unwrap().is_empty());

    let other = TriggerEvent::record_updated(module, Uuid::new_v4(), "deal", Some(vec!["notes".into()]), json!({}));
    assert!(h.engine.process_event(&other).await.unwrap().is_empty());

    let stage = TriggerEvent::record_updated(module, Uuid::new_v4(), "deal", Some(vec!["stage".into()]), json!({}));
    assert_eq!(h.engine.process_event(&stage).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_once_per_record() {
    let handler = ScriptedHandler::new();
    let h = Harness::new(tagging_registry(&handler));
    let module = Uuid::new_v4();
    let record = Uuid::new_v4();

    let mut wf = h.workflow("Welcome once", module, TriggerType::RecordSaved);
    wf.run_once_per_record = true;
    wf.add_step(tag_step());
    h.save(&wf).await;

    let created = TriggerEvent::record_created(module, record, "contact", json!({}));
    assert_eq!(h.engine.process_event(&created).await.unwrap().len(), 1);
    assert!(h.engine.process_event(&created).await.unwrap().is_empty());

    let other_record = TriggerEvent::record_created(module, Uuid::new_v4(), "contact", json!({}));
    assert_eq!(h.engine.process_event(&other_record).await.unwrap().len(), 1);

    // different trigger type, different history entry
    let updated = TriggerEvent::record_updated(module, record, "contact", None, json!({}));
    assert_eq!(h.engine.process_event(&updated).await.unwrap().len(), 1);

    assert_eq!(handler.call_count(), 3);
}

#[tokio::test]
async fn test_priority_order_and_stop_on_first_match() {
    let handler = ScriptedHandler::new();
    let h = Harness::new(tagging_registry(&handler));
    let module = Uuid::new_v4();

    let mut low = h.workflow("Low", module, TriggerType::RecordCreated);
    low.priority = 1;
    low.add_step(tag_step());
    let mut high = h.workflow("High", module, TriggerType::RecordCreated);
    high.priority = 50;
    high.stop_on_first_match = true;
    high.add_step(tag_step());
    h.save(&low).await;
    h.save(&high).await;

    let event = TriggerEvent::record_created(module, Uuid::new_v4(), "deal", json!({}));
    let executions = h.engine.process_event(&event).await.unwrap();

    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].workflow_id(), high.id);
    assert_eq!(h.reload(low.id).await.execution_count, 0);
}

#[tokio::test]
async fn test_stop_on_first_match_can_be_ignored() {
    let handler = ScriptedHandler::new();
    let config = EngineConfig {
        stop_on_first_match: StopOnFirstMatchPolicy::Ignore,
        ..EngineConfig::default()
    };
    let h = Harness::with_config(tagging_registry(&handler), config);
    let module = Uuid::new_v4();

    let mut first = h.workflow("First", module, TriggerType::RecordCreated);
    first.priority = 10;
    first.stop_on_first_match = true;
    first.add_step(tag_step());
    let mut second = h.workflow("Second", module, TriggerType::RecordCreated);
    second.add_step(tag_step());
    h.save(&first).await;
    h.save(&second).await;

    let event = TriggerEvent::record_created(module, Uuid::new_v4(), "deal", json!({}));
    let executions = h.engine.process_event(&event).await.unwrap();

    let order: Vec<Uuid> = executions.iter().map(|e| e.workflow_id()).collect();
    assert_eq!(order, vec![first.id, second.id]);
}

#[tokio::test]
async fn test_rejected_first_match_does_not_stop_processing() {
    let handler = ScriptedHandler::new();
    let h = Harness::new(tagging_registry(&handler));
    let module = Uuid::new_v4();

    let mut gated = h
        .workflow("Gated", module, TriggerType::RecordCreated)
        .with_conditions(json!({"field": "vip", "operator": "is_true"}));
    gated.priority = 10;
    gated.stop_on_first_match = true;
    gated.add_step(tag_step());
    let mut fallback = h.workflow("Fallback", module, TriggerType::RecordCreated);
    fallback.add_step(tag_step());
    h.save(&gated).await;
    h.save(&fallback).await;

    let event = TriggerEvent::record_created(module, Uuid::new_v4(), "deal", json!({"vip": false}));
    let executions = h.engine.process_event(&event).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].workflow_id(), fallback.id);
}

#[tokio::test]
async fn test_manual_trigger() {
    let handler = ScriptedHandler::new();
    let h = Harness::new(tagging_registry(&handler));
    let user = Uuid::new_v4();
    let record = Uuid::new_v4();

    let mut wf = h.workflow("Run on demand", Uuid::new_v4(), TriggerType::RecordCreated);
    wf.run_once_per_record = true;
    wf.add_step(tag_step());
    h.save(&wf).await;

    for _ in 0..2 {
        let execution = h
            .engine
            .trigger_manual(wf.id, Some(user), Some((record, "deal")), json!({"note": "retry"}))
            .await
            .unwrap();
        assert_eq!(execution.status(), ExecutionStatus::Completed);
        assert_eq!(execution.trigger_type(), "manual");
        assert_eq!(execution.triggered_by(), Some(user));
        assert_eq!(execution.trigger_record_id(), Some(record));
    }
    assert_eq!(handler.call_count(), 2);
}

#[tokio::test]
async fn test_manual_trigger_errors() {
    let h = Harness::new(ActionRegistry::new());

    let missing = h.engine.trigger_manual(Uuid::new_v4(), None, None, json!({})).await;
    assert!(matches!(missing, Err(EngineError::NotFound { .. })));

    let mut locked = h.workflow("No manual", Uuid::new_v4(), TriggerType::RecordCreated);
    locked.allow_manual_trigger = false;
    h.save(&locked).await;
    let refused = h.engine.trigger_manual(locked.id, None, None, json!({})).await;
    assert!(matches!(refused, Err(EngineError::ManualTriggerNotAllowed(id)) if id == locked.id));

    let mut inactive = h.workflow("Paused", Uuid::new_v4(), TriggerType::RecordCreated);
    inactive.deactivate(h.clock.now());
    h.save(&inactive).await;
    let rejected = h.engine.trigger_manual(inactive.id, None, None, json!({})).await;
    assert!(matches!(
        rejected,
        Err(EngineError::NotAdmitted { reason: MatchRejection::Inactive, .. })
    ));
}

#[tokio::test]
async fn test_webhook_endpoint_routing() {
    let handler = ScriptedHandler::new();
    let h = Harness::new(tagging_registry(&handler));

    let mut orders = h
        .workflow("Orders hook", Uuid::new_v4(), TriggerType::Webhook)
        .with_trigger_config(json!({"endpoint_id": "orders"}));
    orders.add_step(tag_step());
    h.save(&orders).await;

    let hit = h
        .engine
        .process_event(&TriggerEvent::webhook_received("orders", json!({"order": 7})))
        .await
        .unwrap();
    assert_eq!(hit.len(), 1);
    assert_eq!(hit[0].context_data()["order"], json!(7));

    let miss = h
        .engine
        .process_event(&TriggerEvent::webhook_received("refunds", json!({})))
        .await
        .unwrap();
    assert!(miss.is_empty());
}

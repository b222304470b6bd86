// Workflow Triggers - Normalized inbound events that may start workflows

use automation_shared::{ContextData, TriggerType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Payload for trigger events
pub type EventPayload = Value;

/// Source of the trigger event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventSource {
    System,
    User(Uuid),
    Api,
    Webhook,
    Scheduler,
    Integration(String),
}

/// A domain event offered to the trigger matcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_id: Uuid,
    pub trigger_type: TriggerType,
    /// Restricts candidates to one module; `None` offers the event to all of them
    pub module_id: Option<Uuid>,
    pub is_create: bool,
    pub record_id: Option<Uuid>,
    pub record_type: Option<String>,
    /// `None` means the caller does not know which fields changed
    pub changed_fields: Option<Vec<String>>,
    /// Record values before an update, for change-type matching
    #[serde(default)]
    pub old_data: Option<EventPayload>,
    /// Endpoint id the request arrived on, for webhook events
    pub webhook_endpoint: Option<String>,
    pub payload: EventPayload,
    pub source: EventSource,
    pub triggered_by: Option<Uuid>,
}

impl TriggerEvent {
    pub fn new(trigger_type: TriggerType, payload: EventPayload, source: EventSource) -> Self {
        let triggered_by = match source {
            EventSource::User(id) => Some(id),
            _ => None,
        };

        Self {
            event_id: Uuid::new_v4(),
            trigger_type,
            module_id: None,
            is_create: false,
            record_id: None,
            record_type: None,
            changed_fields: None,
            old_data: None,
            webhook_endpoint: None,
            payload,
            source,
            triggered_by,
        }
    }

    pub fn record_created(module_id: Uuid, record_id: Uuid, record_type: &str, data: EventPayload) -> Self {
        let mut event = Self::new(TriggerType::RecordCreated, data, EventSource::System)
            .with_module(module_id)
            .with_record(record_id, record_type);
        event.is_create = true;
        event
    }

    pub fn record_updated(
        module_id: Uuid,
        record_id: Uuid,
        record_type: &str,
        changed_fields: Option<Vec<String>>,
        data: EventPayload,
    ) -> Self {
        let mut event = Self::new(TriggerType::RecordUpdated, data, EventSource::System)
            .with_module(module_id)
            .with_record(record_id, record_type);
        event.changed_fields = changed_fields;
        event
    }

    pub fn record_deleted(module_id: Uuid, record_id: Uuid, record_type: &str, data: EventPayload) -> Self {
        Self::new(TriggerType::RecordDeleted, data, EventSource::System)
            .with_module(module_id)
            .with_record(record_id, record_type)
    }

    /// A user pressing "run" on a workflow, optionally against a record.
    pub fn manual(user_id: Option<Uuid>, record: Option<(Uuid, &str)>, data: EventPayload) -> Self {
        let source = match user_id {
            Some(id) => EventSource::User(id),
            None => EventSource::Api,
        };
        let event = Self::new(TriggerType::Manual, data, source);
        match record {
            Some((record_id, record_type)) => event.with_record(record_id, record_type),
            None => event,
        }
    }

    pub fn webhook_received(endpoint_id: &str, payload: EventPayload) -> Self {
        let mut event = Self::new(TriggerType::Webhook, payload, EventSource::Webhook);
        event.webhook_endpoint = Some(endpoint_id.to_string());
        event
    }

    /// The synthetic event the scheduler offers to a due time-based workflow.
    pub fn scheduled(scheduled_for: DateTime<Utc>) -> Self {
        Self::new(
            TriggerType::TimeBased,
            serde_json::json!({ "scheduled_at": scheduled_for }),
            EventSource::Scheduler,
        )
    }

    pub fn with_module(mut self, module_id: Uuid) -> Self {
        self.module_id = Some(module_id);
        self
    }

    pub fn with_record(mut self, record_id: Uuid, record_type: &str) -> Self {
        self.record_id = Some(record_id);
        self.record_type = Some(record_type.to_string());
        self
    }

    pub fn with_old_data(mut self, old_data: EventPayload) -> Self {
        self.old_data = Some(old_data);
        self
    }

    pub fn with_triggered_by(mut self, user_id: Uuid) -> Self {
        self.triggered_by = Some(user_id);
        self
    }

    /// Events that describe a record being written, where trigger timing applies.
    pub fn is_record_write(&self) -> bool {
        matches!(
            self.trigger_type,
            TriggerType::RecordCreated
                | TriggerType::RecordUpdated
                | TriggerType::RecordSaved
                | TriggerType::FieldChanged
        )
    }

    /// Initial execution context: the payload's fields plus the record identity.
    pub fn context_data(&self) -> ContextData {
        let mut context = match &self.payload {
            Value::Object(map) => map.clone(),
            Value::Null => ContextData::new(),
            other => {
                let mut map = ContextData::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };

        context.insert("trigger_type".to_string(), Value::from(self.trigger_type.as_str()));
        if let Some(record_id) = self.record_id {
            context.insert("record_id".to_string(), Value::from(record_id.to_string()));
        }
        if let Some(record_type) = &self.record_type {
            context.insert("record_type".to_string(), Value::from(record_type.as_str()));
        }
        if let Some(changed) = &self.changed_fields {
            context.insert("changed_fields".to_string(), serde_json::json!(changed));
        }
        if let Some(old_data) = &self.old_data {
            context.insert("old_data".to_string(), old_data.clone());
        }
        context
    }
}

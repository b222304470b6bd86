// Trigger Matcher - Decides whether a workflow fires for an event

use automation_shared::{ContextData, TriggerType, Workflow};
use chrono::NaiveDate;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::conditions::{ConditionEvaluator, is_blank, lookup, loose_eq};
use super::triggers::TriggerEvent;

/// Why a workflow did not match an event. Rejections are ordinary outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRejection {
    Inactive,
    QuotaExhausted,
    TimingMismatch,
    TriggerMismatch,
    WatchedFieldsUnchanged,
    ConditionsNotMet,
    AlreadyRanForRecord,
}

impl fmt::Display for MatchRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Inactive => "workflow is inactive",
            Self::QuotaExhausted => "daily execution quota exhausted",
            Self::TimingMismatch => "trigger timing does not match",
            Self::TriggerMismatch => "trigger type does not match",
            Self::WatchedFieldsUnchanged => "no watched field changed",
            Self::ConditionsNotMet => "conditions not met",
            Self::AlreadyRanForRecord => "already ran for this record",
        };
        f.write_str(reason)
    }
}

/// Pure admission check. It reads the workflow and event and never mutates state,
/// so a rejection has no side effects.
#[derive(Clone)]
pub struct TriggerMatcher {
    evaluator: Arc<dyn ConditionEvaluator>,
}

impl TriggerMatcher {
    pub fn new(evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        Self { evaluator }
    }

    pub fn should_trigger(
        &self,
        workflow: &Workflow,
        event: &TriggerEvent,
        context: &ContextData,
        today: NaiveDate,
    ) -> bool {
        self.check(workflow, event, context, today).is_ok()
    }

    /// Runs the checks in a fixed order and reports the first one that fails.
    pub fn check(
        &self,
        workflow: &Workflow,
        event: &TriggerEvent,
        context: &ContextData,
        today: NaiveDate,
    ) -> Result<(), MatchRejection> {
        if !workflow.is_active {
            return Err(MatchRejection::Inactive);
        }

        if !workflow.can_execute_today(today) {
            return Err(MatchRejection::QuotaExhausted);
        }

        if event.is_record_write() && !workflow.trigger_timing.matches(event.is_create) {
            return Err(MatchRejection::TimingMismatch);
        }

        if !Self::trigger_matches(workflow, event) {
            return Err(MatchRejection::TriggerMismatch);
        }

        if !Self::watched_fields_changed(workflow, event) {
            return Err(MatchRejection::WatchedFieldsUnchanged);
        }

        if !is_blank(&workflow.conditions) && !self.evaluator.evaluate(&workflow.conditions, context) {
            return Err(MatchRejection::ConditionsNotMet);
        }

        Ok(())
    }

    fn trigger_matches(workflow: &Workflow, event: &TriggerEvent) -> bool {
        match event.trigger_type {
            TriggerType::Manual => workflow.allow_manual_trigger,
            TriggerType::Webhook => {
                workflow.trigger_type == TriggerType::Webhook
                    && match workflow.webhook_endpoint() {
                        Some(endpoint) => event.webhook_endpoint.as_deref() == Some(endpoint),
                        None => true,
                    }
            }
            event_type => workflow.trigger_type.matches_event(event_type),
        }
    }

    /// Watched fields only constrain update events. A field counts as changed
    /// when `changed_fields` lists it or, with `old_data`, when its value differs.
    /// Knowing neither proves nothing. A `field_changed` workflow must watch at
    /// least one field and also honours its `change_type`.
    fn watched_fields_changed(workflow: &Workflow, event: &TriggerEvent) -> bool {
        let is_update = matches!(
            event.trigger_type,
            TriggerType::RecordUpdated | TriggerType::FieldChanged
        ) || (event.trigger_type == TriggerType::RecordSaved && !event.is_create);

        if !is_update {
            return true;
        }

        let is_field_changed = workflow.trigger_type == TriggerType::FieldChanged;
        let watched = workflow.effective_watched_fields();
        if watched.is_empty() {
            return !is_field_changed;
        }

        let change_type = if is_field_changed {
            ChangeType::from_config(&workflow.trigger_config)
        } else {
            ChangeType::Any
        };

        let new_data = event.payload.as_object();
        let old_data = event.old_data.as_ref().and_then(Value::as_object);

        watched.iter().any(|field| {
            let new_value = new_data.and_then(|d| lookup(d, field));
            let old_value = old_data.and_then(|d| lookup(d, field));

            let listed = event.changed_fields.as_ref().map(|c| c.contains(field));
            let changed = match (listed, old_data) {
                (Some(false), _) | (None, None) => false,
                (_, Some(_)) => old_value != new_value,
                (Some(true), None) => true,
            };

            changed && change_type.accepts(old_data.is_some(), old_value, new_value)
        })
    }
}

/// How a watched field must change for a `field_changed` trigger, read from
/// `trigger_config.change_type` with `from_value` / `to_value`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeType {
    Any,
    FromValue(Value),
    ToValue(Value),
    FromTo(Value, Value),
}

impl ChangeType {
    /// Unknown or missing change types behave as `any`.
    pub fn from_config(config: &Value) -> Self {
        let value = |key: &str| config.get(key).cloned().unwrap_or(Value::Null);

        match config.get("change_type").and_then(Value::as_str) {
            Some("from_value") => Self::FromValue(value("from_value")),
            Some("to_value") => Self::ToValue(value("to_value")),
            Some("from_to") => Self::FromTo(value("from_value"), value("to_value")),
            _ => Self::Any,
        }
    }

    /// Checks on the previous value fail when the event carries no old data.
    fn accepts(&self, old_known: bool, old: Option<&Value>, new: Option<&Value>) -> bool {
        match self {
            Self::Any => true,
            Self::FromValue(from) => old_known && same_value(old, from),
            Self::ToValue(to) => same_value(new, to),
            Self::FromTo(from, to) => old_known && same_value(old, from) && same_value(new, to),
        }
    }
}

/// Null only equals a missing or null value; strings compare case-insensitively.
fn same_value(actual: Option<&Value>, expected: &Value) -> bool {
    let actual = actual.unwrap_or(&Value::Null);
    match (actual, expected) {
        (_, Value::Null) => actual.is_null(),
        (Value::String(a), Value::String(e)) => a.to_lowercase() == e.to_lowercase(),
        _ => loose_eq(actual, expected),
    }
}

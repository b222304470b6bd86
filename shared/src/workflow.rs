// Workflow - Aggregate root for one automation rule bound to a module

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DomainError;
use crate::step::WorkflowStep;

/// Types of events that can trigger workflows
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    // Record lifecycle
    RecordCreated,
    RecordUpdated,
    RecordDeleted,
    /// Both create and update
    RecordSaved,
    FieldChanged,
    RecordConverted,

    // Related records
    RelatedCreated,
    RelatedUpdated,

    // Schedule
    TimeBased,

    // External
    Webhook,
    Manual,
}

impl TriggerType {
    pub const ALL: [TriggerType; 11] = [
        TriggerType::RecordCreated,
        TriggerType::RecordUpdated,
        TriggerType::RecordDeleted,
        TriggerType::RecordSaved,
        TriggerType::FieldChanged,
        TriggerType::RecordConverted,
        TriggerType::RelatedCreated,
        TriggerType::RelatedUpdated,
        TriggerType::TimeBased,
        TriggerType::Webhook,
        TriggerType::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordCreated => "record_created",
            Self::RecordUpdated => "record_updated",
            Self::RecordDeleted => "record_deleted",
            Self::RecordSaved => "record_saved",
            Self::FieldChanged => "field_changed",
            Self::RecordConverted => "record_converted",
            Self::RelatedCreated => "related_created",
            Self::RelatedUpdated => "related_updated",
            Self::TimeBased => "time_based",
            Self::Webhook => "webhook",
            Self::Manual => "manual",
        }
    }

    /// Whether a workflow configured with this trigger responds to `event_type`.
    ///
    /// Exact equality, plus the aliases: `record_saved` answers both created and
    /// updated events, `field_changed` answers updated events.
    pub fn matches_event(&self, event_type: TriggerType) -> bool {
        if *self == event_type {
            return true;
        }

        matches!(
            (self, event_type),
            (Self::RecordSaved, Self::RecordCreated | Self::RecordUpdated)
                | (Self::FieldChanged, Self::RecordUpdated)
        )
    }

    /// Every workflow trigger type that may respond to an event of this type.
    pub fn candidate_triggers(event_type: TriggerType) -> Vec<TriggerType> {
        Self::ALL
            .into_iter()
            .filter(|t| t.matches_event(event_type))
            .collect()
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::unknown("trigger type", s))
    }
}

/// Restricts record triggers to create events, update events, or both.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerTiming {
    #[default]
    All,
    CreateOnly,
    UpdateOnly,
}

impl TriggerTiming {
    pub fn matches(&self, is_create: bool) -> bool {
        match self {
            Self::All => true,
            Self::CreateOnly => is_create,
            Self::UpdateOnly => !is_create,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::CreateOnly => "create_only",
            Self::UpdateOnly => "update_only",
        }
    }
}

impl FromStr for TriggerTiming {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "create_only" => Ok(Self::CreateOnly),
            "update_only" => Ok(Self::UpdateOnly),
            other => Err(DomainError::unknown("trigger timing", other)),
        }
    }
}

/// Core fields replaced by [`Workflow::update`].
#[derive(Debug, Clone)]
pub struct WorkflowUpdate {
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub trigger_config: Value,
    pub trigger_timing: TriggerTiming,
    pub watched_fields: Vec<String>,
    pub conditions: Value,
    pub updated_by: Option<Uuid>,
}

/// Quota, ordering and manual-trigger knobs set by [`Workflow::configure_execution`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionSettings {
    pub priority: i32,
    pub stop_on_first_match: bool,
    pub max_executions_per_day: Option<i32>,
    pub run_once_per_record: bool,
    pub allow_manual_trigger: bool,
    pub delay_seconds: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub module_id: Uuid,
    pub is_active: bool,
    /// Higher runs first
    pub priority: i32,
    pub trigger_type: TriggerType,
    pub trigger_config: Value,
    pub trigger_timing: TriggerTiming,
    pub watched_fields: Vec<String>,
    pub webhook_secret: Option<String>,
    pub conditions: Value,
    pub stop_on_first_match: bool,
    pub max_executions_per_day: Option<i32>,
    pub executions_today: i32,
    pub executions_today_date: Option<NaiveDate>,
    pub run_once_per_record: bool,
    pub allow_manual_trigger: bool,
    pub delay_seconds: i32,
    pub schedule_cron: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub execution_count: i32,
    pub success_count: i32,
    pub failure_count: i32,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    /// New workflows start inactive with no quota and manual triggering allowed.
    pub fn create(
        name: &str,
        module_id: Uuid,
        trigger_type: TriggerType,
        created_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            module_id,
            is_active: false,
            priority: 0,
            trigger_type,
            trigger_config: Value::Object(Default::default()),
            trigger_timing: TriggerTiming::All,
            watched_fields: Vec::new(),
            webhook_secret: None,
            conditions: Value::Null,
            stop_on_first_match: false,
            max_executions_per_day: None,
            executions_today: 0,
            executions_today_date: None,
            run_once_per_record: false,
            allow_manual_trigger: true,
            delay_seconds: 0,
            schedule_cron: None,
            last_run_at: None,
            next_run_at: None,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            created_by,
            updated_by: None,
            created_at: now,
            updated_at: None,
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_trigger_config(mut self, config: Value) -> Self {
        self.trigger_config = config;
        self
    }

    pub fn with_timing(mut self, timing: TriggerTiming) -> Self {
        self.trigger_timing = timing;
        self
    }

    pub fn with_watched_fields(mut self, fields: &[&str]) -> Self {
        self.watched_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_conditions(mut self, conditions: Value) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.is_active = true;
        self.updated_at = Some(now);
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.updated_at = Some(now);
    }

    pub fn update(&mut self, update: WorkflowUpdate, now: DateTime<Utc>) {
        self.name = update.name;
        self.description = update.description;
        self.trigger_type = update.trigger_type;
        self.trigger_config = update.trigger_config;
        self.trigger_timing = update.trigger_timing;
        self.watched_fields = update.watched_fields;
        self.conditions = update.conditions;
        self.updated_by = update.updated_by;
        self.updated_at = Some(now);
    }

    pub fn configure_execution(&mut self, settings: ExecutionSettings, now: DateTime<Utc>) {
        self.priority = settings.priority;
        self.stop_on_first_match = settings.stop_on_first_match;
        self.max_executions_per_day = settings.max_executions_per_day;
        self.run_once_per_record = settings.run_once_per_record;
        self.allow_manual_trigger = settings.allow_manual_trigger;
        self.delay_seconds = settings.delay_seconds;
        self.updated_at = Some(now);
    }

    pub fn configure_schedule(
        &mut self,
        cron_expression: Option<String>,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        self.schedule_cron = cron_expression;
        self.next_run_at = next_run_at;
        self.updated_at = Some(now);
    }

    /// Replace the webhook secret with 32 fresh random bytes, hex encoded.
    pub fn generate_webhook_secret(&mut self, now: DateTime<Utc>) -> String {
        let bytes: [u8; 32] = rand::random();
        let secret = hex::encode(bytes);
        self.webhook_secret = Some(secret.clone());
        self.updated_at = Some(now);
        secret
    }

    /// Endpoint id a webhook trigger is bound to, if one is configured.
    pub fn webhook_endpoint(&self) -> Option<&str> {
        self.trigger_config.get("endpoint_id").and_then(Value::as_str)
    }

    /// Fields a change-driven trigger watches: `watched_fields`, falling back to
    /// `trigger_config.fields`.
    pub fn effective_watched_fields(&self) -> Vec<String> {
        if !self.watched_fields.is_empty() {
            return self.watched_fields.clone();
        }

        self.trigger_config
            .get("fields")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Daily quota check. A counter dated before `today` is stale and counts as unconsumed.
    pub fn can_execute_today(&self, today: NaiveDate) -> bool {
        let Some(limit) = self.max_executions_per_day else {
            return true;
        };

        match self.executions_today_date {
            Some(date) if date >= today => self.executions_today < limit,
            _ => true,
        }
    }

    pub fn increment_today_executions(&mut self, today: NaiveDate) {
        match self.executions_today_date {
            Some(date) if date == today => self.executions_today += 1,
            _ => {
                self.executions_today = 1;
                self.executions_today_date = Some(today);
            }
        }
    }

    pub fn record_execution(&mut self, success: bool, now: DateTime<Utc>) {
        self.execution_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last_run_at = Some(now);
    }

    pub fn success_rate(&self) -> f64 {
        if self.execution_count == 0 {
            return 0.0;
        }
        f64::from(self.success_count) / f64::from(self.execution_count) * 100.0
    }

    pub fn is_scheduled(&self) -> bool {
        self.trigger_type == TriggerType::TimeBased
    }

    pub fn add_step(&mut self, mut step: WorkflowStep) {
        step.assign_to_workflow(self.id);
        self.steps.push(step);
    }

    pub fn set_steps(&mut self, steps: Vec<WorkflowStep>) {
        self.steps = Vec::with_capacity(steps.len());
        for step in steps {
            self.add_step(step);
        }
    }

    /// Steps sorted by ascending order; ties keep their insertion order.
    pub fn ordered_steps(&self) -> Vec<WorkflowStep> {
        let mut steps = self.steps.clone();
        steps.sort_by_key(|s| s.order);
        steps
    }
}

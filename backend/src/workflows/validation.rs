// Workflow Validation - Field-level checks before a workflow is saved or activated

use automation_shared::{ActionType, TriggerType, Workflow, WorkflowStep};
use reqwest::Url;
use serde_json::Value;
use std::collections::HashMap;

use super::handlers::DelayHandler;
use super::schedule::parse_schedule;
use crate::error::{EngineResult, ValidationBuilder};

pub const MAX_NAME_LENGTH: usize = 255;
pub const MAX_DESCRIPTION_LENGTH: usize = 5000;
pub const MAX_RETRY_COUNT: i32 = 10;
const PRIORITY_RANGE: std::ops::RangeInclusive<i32> = -100..=100;
const WEBHOOK_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Collects every problem with a workflow definition into one
/// [`EngineError::Validation`](crate::EngineError::Validation).
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowValidator;

impl WorkflowValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, workflow: &Workflow) -> EngineResult<()> {
        let mut errors = ValidationBuilder::new();

        let name = workflow.name.trim();
        if name.is_empty() {
            errors.error("name", "Name is required");
        } else if name.chars().count() > MAX_NAME_LENGTH {
            errors.error("name", format!("Name must be {} characters or less", MAX_NAME_LENGTH));
        }

        if let Some(description) = &workflow.description {
            if description.chars().count() > MAX_DESCRIPTION_LENGTH {
                errors.error(
                    "description",
                    format!("Description must be {} characters or less", MAX_DESCRIPTION_LENGTH),
                );
            }
        }

        if !PRIORITY_RANGE.contains(&workflow.priority) {
            errors.error("priority", "Priority must be between -100 and 100");
        }

        if workflow.max_executions_per_day.is_some_and(|max| max < 1) {
            errors.error("max_executions_per_day", "Daily limit must be at least 1");
        }

        if workflow.delay_seconds < 0 {
            errors.error("delay_seconds", "Delay cannot be negative");
        }

        match workflow.trigger_type {
            TriggerType::FieldChanged if workflow.effective_watched_fields().is_empty() => {
                errors.error("watched_fields", "A field_changed trigger needs at least one watched field");
            }
            TriggerType::TimeBased => match workflow.schedule_cron.as_deref() {
                None => {
                    errors.error("schedule_cron", "A time_based trigger needs a cron schedule");
                }
                Some(cron) => {
                    if let Err(e) = parse_schedule(cron) {
                        errors.error("schedule_cron", e);
                    }
                }
            },
            _ => {}
        }

        for (index, step) in workflow.steps.iter().enumerate() {
            self.validate_step(step, &format!("steps[{}]", index), &mut errors);
        }

        self.validate_step_orders(&workflow.steps, &mut errors);

        errors.finish()
    }

    fn validate_step(&self, step: &WorkflowStep, prefix: &str, errors: &mut ValidationBuilder) {
        if !(0..=MAX_RETRY_COUNT).contains(&step.retry_count) {
            errors.error(
                format!("{}.retry_count", prefix),
                format!("Retry count must be between 0 and {}", MAX_RETRY_COUNT),
            );
        }

        if step.retry_delay_seconds < 0 {
            errors.error(format!("{}.retry_delay_seconds", prefix), "Retry delay cannot be negative");
        }

        let field = format!("{}.action_config", prefix);
        let config = &step.action_config;

        match step.action_type {
            ActionType::SendEmail => {
                if !has_text(config, "subject") && !has_text(config, "template_id") {
                    errors.error(&field, "Email needs a subject or a template");
                }
                if !has_text(config, "to") && !has_text(config, "recipient") && !has_list(config, "recipients") {
                    errors.error(&field, "Email needs a recipient");
                }
            }
            ActionType::Webhook => {
                match config.get("url").and_then(Value::as_str).map(Url::parse) {
                    Some(Ok(url)) if matches!(url.scheme(), "http" | "https") => {}
                    _ => {
                        errors.error(&field, "Webhook needs a valid http(s) URL");
                    }
                }
                if let Some(method) = config.get("method") {
                    let valid = method
                        .as_str()
                        .is_some_and(|m| WEBHOOK_METHODS.contains(&m.to_uppercase().as_str()));
                    if !valid {
                        errors.error(&field, "Webhook method must be one of GET, POST, PUT, PATCH, DELETE");
                    }
                }
            }
            ActionType::UpdateField => {
                if !has_text(config, "field") {
                    errors.error(&field, "update_field needs a field");
                }
            }
            ActionType::Delay => {
                if let Err(e) = DelayHandler::parse_duration(config) {
                    errors.error(&field, e.to_string());
                }
            }
            ActionType::Condition => {
                if !has_list(config, "branches") {
                    errors.error(&field, "Condition needs at least one branch");
                }
            }
            _ => {}
        }
    }

    /// Steps may share an order only when each of them runs in parallel or in a branch.
    fn validate_step_orders(&self, steps: &[WorkflowStep], errors: &mut ValidationBuilder) {
        let mut by_order: HashMap<i32, Vec<&WorkflowStep>> = HashMap::new();
        for step in steps {
            by_order.entry(step.order).or_default().push(step);
        }

        let mut clashing: Vec<i32> = by_order
            .into_iter()
            .filter(|(_, group)| group.len() > 1 && group.iter().any(|s| !s.is_parallel && s.is_main_line()))
            .map(|(order, _)| order)
            .collect();
        clashing.sort_unstable();

        for order in clashing {
            errors.error(
                "steps",
                format!("Order {} is shared by steps that are not parallel", order),
            );
        }
    }
}

fn has_text(config: &Value, key: &str) -> bool {
    config
        .get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty())
}

fn has_list(config: &Value, key: &str) -> bool {
    config
        .get(key)
        .and_then(Value::as_array)
        .is_some_and(|items| !items.is_empty())
}

// Built-in Action Handlers - Webhook, delay and field update

use async_trait::async_trait;
use automation_shared::ContextData;
use regex::Regex;
use reqwest::Method;
use serde_json::{Map, Value, json};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use super::actions::{ActionError, ActionHandler};
use super::conditions::lookup;

fn template_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").ok())
        .as_ref()
}

/// Replace `{{path}}` placeholders in every string of `config` with context values.
///
/// A string that is exactly one placeholder takes the raw JSON value, so numbers
/// and objects keep their type. Unknown paths are left untouched.
pub fn render_templates(config: &Value, context: &ContextData) -> Value {
    match config {
        Value::String(s) => render_string(s, context),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_templates(v, context)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_templates(v, context)).collect()),
        other => other.clone(),
    }
}

fn render_string(template: &str, context: &ContextData) -> Value {
    let Some(re) = template_pattern() else {
        return Value::String(template.to_string());
    };

    if let Some(caps) = re.captures(template) {
        if caps.get(0).is_some_and(|m| m.as_str() == template) {
            if let Some(value) = lookup(context, &caps[1]) {
                return value.clone();
            }
        }
    }

    let rendered = re.replace_all(template, |caps: &regex::Captures| match lookup(context, &caps[1]) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
        None => caps[0].to_string(),
    });
    Value::String(rendered.into_owned())
}

/// Calls an external HTTP endpoint.
///
/// Config: `{url, method?, headers?, body?}`. Method defaults to POST. Output is
/// `{status_code, response_body}`; the body is parsed as JSON when possible.
#[derive(Debug, Clone, Default)]
pub struct WebhookHandler {
    client: reqwest::Client,
}

impl WebhookHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionHandler for WebhookHandler {
    async fn execute(&self, config: &Value, context: &ContextData) -> Result<Value, ActionError> {
        let config = render_templates(config, context);

        let url = config
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ActionError::invalid_config("webhook requires a url"))?;

        let method_name = config.get("method").and_then(Value::as_str).unwrap_or("POST");
        let method = Method::from_bytes(method_name.to_uppercase().as_bytes())
            .map_err(|_| ActionError::invalid_config(format!("unsupported HTTP method: {}", method_name)))?;

        let mut request = self.client.request(method.clone(), url);

        if let Some(headers) = config.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                match value.as_str() {
                    Some(v) => request = request.header(key.as_str(), v),
                    None => request = request.header(key.as_str(), value.to_string()),
                }
            }
        }

        if let Some(body) = config.get("body").filter(|b| !b.is_null()) {
            request = request.json(body);
        }

        info!("Calling webhook {} {}", method, url);
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            warn!("Webhook {} returned {}", url, status);
            return Err(ActionError::UnexpectedStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        let response_body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        Ok(json!({
            "status_code": status.as_u16(),
            "response_body": response_body
        }))
    }
}

/// Longest pause a delay step may request
pub const MAX_DELAY: Duration = Duration::from_secs(30 * 86400);

/// Pauses the execution in place. Config: `{duration, unit}` with unit one of
/// seconds (default), minutes, hours, days. At most [`MAX_DELAY`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayHandler;

impl DelayHandler {
    pub fn parse_duration(config: &Value) -> Result<Duration, ActionError> {
        let amount = config
            .get("duration")
            .and_then(Value::as_f64)
            .filter(|d| *d > 0.0)
            .ok_or_else(|| ActionError::invalid_config("delay requires a positive duration"))?;

        let multiplier = match config.get("unit").and_then(Value::as_str).unwrap_or("seconds") {
            "seconds" | "second" | "s" => 1.0,
            "minutes" | "minute" | "m" => 60.0,
            "hours" | "hour" | "h" => 3600.0,
            "days" | "day" | "d" => 86400.0,
            other => return Err(ActionError::invalid_config(format!("unknown delay unit: {}", other))),
        };

        Duration::try_from_secs_f64(amount * multiplier)
            .ok()
            .filter(|d| *d <= MAX_DELAY)
            .ok_or_else(|| {
                ActionError::invalid_config(format!(
                    "delay must not exceed {} days",
                    MAX_DELAY.as_secs() / 86400
                ))
            })
    }
}

#[async_trait]
impl ActionHandler for DelayHandler {
    async fn execute(&self, config: &Value, context: &ContextData) -> Result<Value, ActionError> {
        let duration = Self::parse_duration(&render_templates(config, context))?;
        tokio::time::sleep(duration).await;
        Ok(json!({ "delayed_seconds": duration.as_secs() }))
    }
}

/// Writes one field into the execution context: `{field, value}` outputs `{field: value}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateFieldHandler;

#[async_trait]
impl ActionHandler for UpdateFieldHandler {
    async fn execute(&self, config: &Value, context: &ContextData) -> Result<Value, ActionError> {
        let config = render_templates(config, context);
        let field = config
            .get("field")
            .and_then(Value::as_str)
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| ActionError::invalid_config("update_field requires a field"))?;

        let value = config.get("value").cloned().unwrap_or(Value::Null);
        let mut output = Map::new();
        output.insert(field.to_string(), value);
        Ok(Value::Object(output))
    }
}

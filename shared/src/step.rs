// Workflow Steps - One unit of work inside a workflow

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DomainError;

/// Types of actions a step can execute
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    // Notification actions
    SendEmail,
    SendNotification,
    Webhook,

    // Record actions
    CreateRecord,
    UpdateRecord,
    DeleteRecord,
    UpdateField,
    UpdateRelatedRecord,
    AssignUser,
    AddTag,
    RemoveTag,
    MoveStage,
    CreateTask,

    // Timing
    Delay,

    // Control flow
    Condition,
    Merge,
}

impl ActionType {
    pub const ALL: [ActionType; 16] = [
        ActionType::SendEmail,
        ActionType::SendNotification,
        ActionType::Webhook,
        ActionType::CreateRecord,
        ActionType::UpdateRecord,
        ActionType::DeleteRecord,
        ActionType::UpdateField,
        ActionType::UpdateRelatedRecord,
        ActionType::AssignUser,
        ActionType::AddTag,
        ActionType::RemoveTag,
        ActionType::MoveStage,
        ActionType::CreateTask,
        ActionType::Delay,
        ActionType::Condition,
        ActionType::Merge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendEmail => "send_email",
            Self::SendNotification => "send_notification",
            Self::Webhook => "webhook",
            Self::CreateRecord => "create_record",
            Self::UpdateRecord => "update_record",
            Self::DeleteRecord => "delete_record",
            Self::UpdateField => "update_field",
            Self::UpdateRelatedRecord => "update_related_record",
            Self::AssignUser => "assign_user",
            Self::AddTag => "add_tag",
            Self::RemoveTag => "remove_tag",
            Self::MoveStage => "move_stage",
            Self::CreateTask => "create_task",
            Self::Delay => "delay",
            Self::Condition => "condition",
            Self::Merge => "merge",
        }
    }

    /// Branch selection and branch merge are resolved by the runner itself.
    pub fn is_flow_control(&self) -> bool {
        matches!(self, Self::Condition | Self::Merge)
    }

    pub fn affects_records(&self) -> bool {
        matches!(
            self,
            Self::CreateRecord
                | Self::UpdateRecord
                | Self::DeleteRecord
                | Self::UpdateField
                | Self::UpdateRelatedRecord
                | Self::AssignUser
                | Self::AddTag
                | Self::RemoveTag
                | Self::MoveStage
                | Self::CreateTask
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| DomainError::unknown("action type", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    pub id: Uuid,
    /// Unset until the step is attached to a workflow
    pub workflow_id: Option<Uuid>,
    pub order: i32,
    pub name: Option<String>,
    pub action_type: ActionType,
    pub action_config: Value,
    pub conditions: Value,
    /// `None` is the main line
    pub branch_id: Option<String>,
    pub is_parallel: bool,
    pub continue_on_error: bool,
    pub retry_count: i32,
    pub retry_delay_seconds: i32,
}

impl WorkflowStep {
    pub fn create(order: i32, action_type: ActionType, action_config: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: None,
            order,
            name: None,
            action_type,
            action_config,
            conditions: Value::Null,
            branch_id: None,
            is_parallel: false,
            continue_on_error: false,
            retry_count: 0,
            retry_delay_seconds: 60,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_conditions(mut self, conditions: Value) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn in_branch(mut self, branch_id: &str) -> Self {
        self.branch_id = Some(branch_id.to_string());
        self
    }

    pub fn parallel(mut self) -> Self {
        self.is_parallel = true;
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn with_retry(mut self, count: i32, delay_seconds: i32) -> Self {
        self.retry_count = count;
        self.retry_delay_seconds = delay_seconds;
        self
    }

    pub fn assign_to_workflow(&mut self, workflow_id: Uuid) {
        self.workflow_id = Some(workflow_id);
    }

    pub fn reorder(&mut self, order: i32) {
        self.order = order;
    }

    pub fn is_main_line(&self) -> bool {
        self.branch_id.as_deref().is_none_or(str::is_empty)
    }

    /// Label used in logs and error messages.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{} #{}", self.action_type, self.order),
        }
    }
}

//! Error types for the automation engine.

use automation_shared::{ActionType, DomainError};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::repository::RepositoryError;
use crate::workflows::MatchRejection;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// A step needs a handler that was never registered.
    #[error("No handler registered for action type {0}")]
    UnknownAction(ActionType),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Workflow {0} does not allow manual triggering")]
    ManualTriggerNotAllowed(Uuid),

    #[error("Workflow {workflow_id} was not admitted: {reason}")]
    NotAdmitted {
        workflow_id: Uuid,
        reason: MatchRejection,
    },

    #[error("Validation failed")]
    Validation { details: HashMap<String, Vec<String>> },
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn workflow_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Workflow",
            id,
        }
    }

    pub fn execution_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Execution",
            id,
        }
    }

    /// Field-level details when this is a validation failure.
    pub fn validation_details(&self) -> Option<&HashMap<String, Vec<String>>> {
        match self {
            Self::Validation { details } => Some(details),
            _ => None,
        }
    }
}

/// Collects field errors and turns them into a single [`EngineError::Validation`].
#[derive(Debug, Default)]
pub struct ValidationBuilder {
    details: HashMap<String, Vec<String>>,
}

impl ValidationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.details
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.details.is_empty()
    }

    pub fn build(self) -> Option<EngineError> {
        if self.details.is_empty() {
            None
        } else {
            Some(EngineError::Validation {
                details: self.details,
            })
        }
    }

    pub fn finish(self) -> EngineResult<()> {
        match self.build() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

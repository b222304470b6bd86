//! Domain errors raised by the workflow entities.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A status change that the entity's transition table does not allow.
    #[error("Illegal {entity} transition from {from} to {to}")]
    IllegalTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("Unknown {kind} value: {value}")]
    UnknownValue { kind: &'static str, value: String },
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    pub(crate) fn illegal(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        Self::IllegalTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub(crate) fn unknown(kind: &'static str, value: &str) -> Self {
        Self::UnknownValue {
            kind,
            value: value.to_string(),
        }
    }

    pub fn is_illegal_transition(&self) -> bool {
        matches!(self, Self::IllegalTransition { .. })
    }
}

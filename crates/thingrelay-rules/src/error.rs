//! Error types for the rules crate.

pub use thingrelay_core::error::Error as RelayError;

/// Why a rule was rejected at creation or update time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("Rule has no conditions")]
    NoConditions,

    #[error("Condition {0} has an empty field")]
    EmptyField(usize),

    #[error("Unsupported comparator: {0}")]
    Comparator(String),

    #[error("Rules with more than one condition need an AND or OR operator")]
    MissingOperator,

    #[error("Unknown action type: {0}")]
    ActionType(String),

    #[error("Action {0} requires a target id")]
    ActionId(String),

    #[error("Rule name is empty")]
    EmptyName,
}

/// Result type for rule validation.
pub type Result<T> = std::result::Result<T, RuleError>;

impl From<RuleError> for RelayError {
    fn from(e: RuleError) -> Self {
        match e {
            RuleError::ActionType(t) => RelayError::InvalidActionType(t),
            RuleError::ActionId(_) => RelayError::InvalidActionId,
            other => RelayError::Validation(other.to_string()),
        }
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flows::TransitionError;
use crate::registry::RegistryError;

/// Failure taxonomy shared by tool results, stores and turn aborts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SqlSyntaxError,
    ConstraintViolation,
    NoRowsAffected,
    TypeMismatchError,
    ConnectivityError,
    RetrievalUnavailable,
    AuditFieldMissing,
    PolicyBlocked,
    StepBudgetExceeded,
    InvalidToolCall,
}

/// How the orchestration loop reacts to a failure kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Re-issued once by the loop with a mechanically rewritten statement.
    LocalRewrite,
    /// Reported to the planner, which gets one corrective attempt per turn.
    PlannerCorrection,
    /// Retried once after a backoff; a repeat aborts the turn.
    RetryWithBackoff,
    /// Reported back as-is and never retried.
    Never,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SqlSyntaxError => "sql_syntax_error",
            Self::ConstraintViolation => "constraint_violation",
            Self::NoRowsAffected => "no_rows_affected",
            Self::TypeMismatchError => "type_mismatch_error",
            Self::ConnectivityError => "connectivity_error",
            Self::RetrievalUnavailable => "retrieval_unavailable",
            Self::AuditFieldMissing => "audit_field_missing",
            Self::PolicyBlocked => "policy_blocked",
            Self::StepBudgetExceeded => "step_budget_exceeded",
            Self::InvalidToolCall => "invalid_tool_call",
        }
    }

    pub fn recovery(&self) -> RecoveryPolicy {
        match self {
            Self::NoRowsAffected | Self::TypeMismatchError => RecoveryPolicy::LocalRewrite,
            Self::SqlSyntaxError | Self::ConstraintViolation => RecoveryPolicy::PlannerCorrection,
            Self::ConnectivityError | Self::RetrievalUnavailable => {
                RecoveryPolicy::RetryWithBackoff
            }
            Self::AuditFieldMissing
            | Self::PolicyBlocked
            | Self::StepBudgetExceeded
            | Self::InvalidToolCall => RecoveryPolicy::Never,
        }
    }
}

/// Why a turn ended in `Aborted`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    StepBudgetExceeded,
    ToolFailure { error: ErrorKind },
    PlannerUnavailable,
    Cancelled,
}

impl AbortReason {
    /// Caller-facing text. Never carries internal detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::StepBudgetExceeded => {
                "I'm sorry, I couldn't put together a complete answer this time. \
                 Could you narrow the question, for example to a single unit or piece of equipment?"
            }
            Self::ToolFailure { error: ErrorKind::SqlSyntaxError } => {
                "I'm sorry, I couldn't work out how to look that up. \
                 Could you rephrase the question more specifically, for example \"maintenance history for heat exchanger H-501\"?"
            }
            Self::ToolFailure { error: ErrorKind::RetrievalUnavailable } => {
                "I'm sorry, the document library is temporarily unavailable. Please try again in a few minutes."
            }
            Self::ToolFailure { .. } | Self::PlannerUnavailable => {
                "I'm sorry, the data sources I need are temporarily unavailable. Please try again in a few minutes."
            }
            Self::Cancelled => "The request was cancelled before an answer was ready.",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::StepBudgetExceeded => ErrorKind::StepBudgetExceeded.code(),
            Self::ToolFailure { error } => error.code(),
            Self::PlannerUnavailable => "planner_unavailable",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::Registry(_)) => "tool_registry",
            Self::Domain(_) => "domain",
            Self::Persistence(_) => "db_connectivity",
            Self::Integration(_) => "integration",
            Self::Configuration(_) => "config_validation",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{AbortReason, ApplicationError, DomainError, ErrorKind, RecoveryPolicy};
    use crate::registry::RegistryError;

    #[test]
    fn recovery_policy_follows_failure_taxonomy() {
        assert_eq!(ErrorKind::NoRowsAffected.recovery(), RecoveryPolicy::LocalRewrite);
        assert_eq!(ErrorKind::TypeMismatchError.recovery(), RecoveryPolicy::LocalRewrite);
        assert_eq!(ErrorKind::SqlSyntaxError.recovery(), RecoveryPolicy::PlannerCorrection);
        assert_eq!(ErrorKind::ConstraintViolation.recovery(), RecoveryPolicy::PlannerCorrection);
        assert_eq!(ErrorKind::ConstraintViolation.code(), "constraint_violation");
        assert_eq!(ErrorKind::ConnectivityError.recovery(), RecoveryPolicy::RetryWithBackoff);
        assert_eq!(ErrorKind::RetrievalUnavailable.recovery(), RecoveryPolicy::RetryWithBackoff);
        assert_eq!(ErrorKind::PolicyBlocked.recovery(), RecoveryPolicy::Never);
    }

    #[test]
    fn abort_messages_are_plain_language() {
        let reasons = [
            AbortReason::StepBudgetExceeded,
            AbortReason::ToolFailure { error: ErrorKind::SqlSyntaxError },
            AbortReason::ToolFailure { error: ErrorKind::ConnectivityError },
            AbortReason::PlannerUnavailable,
            AbortReason::Cancelled,
        ];
        for reason in reasons {
            let message = reason.user_message();
            assert!(!message.contains("Error"), "{message}");
            assert!(!message.contains("SQL"), "{message}");
            assert!(!message.contains('_'), "{message}");
        }
    }

    #[test]
    fn registry_errors_classify_as_tool_registry() {
        let error = ApplicationError::from(DomainError::from(RegistryError::DuplicateTool(
            "execute_statement".to_string(),
        )));
        assert_eq!(error.error_class(), "tool_registry");
        assert!(error.to_string().contains("execute_statement"));
    }
}

use thiserror::Error;

use crate::time::DateParseError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{field} cannot be empty")]
    EmptyField { field: &'static str },
    #[error("start date must be before end date")]
    InvalidDateRange,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid id {0}")]
    InvalidId(String),
    #[error(transparent)]
    Date(#[from] DateParseError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Precondition,
    Transport,
    Persistence,
    Upstream,
    Timeout,
    Programmer,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Precondition => "precondition",
            Self::Transport => "transport",
            Self::Persistence => "persistence",
            Self::Upstream => "upstream",
            Self::Timeout => "timeout",
            Self::Programmer => "programmer",
        }
    }
}

/// Failure surfaced by an interaction handler. The variant decides how loudly the
/// router logs it; user-facing text has already been sent by the time it is returned.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("programmer error: {0}")]
    Programmer(String),
}

impl HandlerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Programmer(_) => ErrorKind::Programmer,
        }
    }

    /// Recovered locally by the handler with a message to the user.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Transport | ErrorKind::Programmer)
    }

    /// The message without the kind prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::Validation(detail)
            | Self::NotFound(detail)
            | Self::Precondition(detail)
            | Self::Transport(detail)
            | Self::Persistence(detail)
            | Self::Upstream(detail)
            | Self::Timeout(detail)
            | Self::Programmer(detail) => detail,
        }
    }
}

impl From<DomainError> for HandlerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvariantViolation(message) => Self::Programmer(message),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<DateParseError> for HandlerError {
    fn from(value: DateParseError) -> Self {
        Self::Validation(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{DomainError, ErrorKind, HandlerError};
    use crate::time::DateParseError;

    #[test]
    fn domain_errors_map_to_validation() {
        let error = HandlerError::from(DomainError::InvalidDateRange);

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(error.to_string().contains("start date must be before end date"));
        assert!(error.is_user_visible());
    }

    #[test]
    fn invariant_violation_maps_to_programmer() {
        let error = HandlerError::from(DomainError::InvariantViolation("double reply".to_owned()));

        assert_eq!(error.kind(), ErrorKind::Programmer);
        assert!(!error.is_user_visible());
    }

    #[test]
    fn date_errors_keep_the_offending_input() {
        let error =
            HandlerError::from(DateParseError::Unrecognised { input: "someday".to_owned() });

        assert!(matches!(error, HandlerError::Validation(ref message) if message.contains("someday")));
    }

    #[test]
    fn transport_failures_are_not_user_visible() {
        assert!(!HandlerError::Transport("gateway closed".to_owned()).is_user_visible());
        assert_eq!(HandlerError::NotFound("Event not found.".to_owned()).detail(), "Event not found.");
        assert_eq!(HandlerError::Timeout("confirmation".to_owned()).kind().as_str(), "timeout");
    }
}

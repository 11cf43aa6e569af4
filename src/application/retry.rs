//! Failure classification for task execution.
//!
//! Every failure raised while executing a task lands here exactly once and is
//! classified into one of three dispositions. The remote peers signal
//! backpressure and refusals as message text as often as status codes, so the
//! classifier matches both.

use thiserror::Error;

use crate::infrastructure::{ExchangeError, IdentityError};

/// A failure raised by steps 1-5 of task execution.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Remote backpressure: the account (or the whole sequential run) must
    /// back off.
    RateLimited,
    /// The target refuses actions from this source; skip the task only.
    PermissionDenied,
    /// Anything else: record once, continue the loop with a doubled delay.
    Transient,
}

const RATE_LIMIT_MARKERS: [&str; 3] = [
    "posting too frequently",
    "Too Many Requests",
    "429",
];

const PERMISSION_MARKER: &str = "do not allow you to add comments";

pub fn classify(error: &ExecutionError) -> FailureKind {
    if let ExecutionError::Exchange(ExchangeError::RateLimited) = error {
        return FailureKind::RateLimited;
    }

    let message = error.to_string();
    if RATE_LIMIT_MARKERS.iter().any(|m| message.contains(m)) {
        return FailureKind::RateLimited;
    }
    if message.contains(PERMISSION_MARKER) {
        return FailureKind::PermissionDenied;
    }
    FailureKind::Transient
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_rate_limit_classifies() {
        let err = ExecutionError::Exchange(ExchangeError::RateLimited);
        assert_eq!(classify(&err), FailureKind::RateLimited);
    }

    #[test]
    fn frequency_message_classifies_as_rate_limit() {
        let err = ExecutionError::Identity(IdentityError::ActionRejected(
            "You've been posting too frequently, and can't make another post right now".into(),
        ));
        assert_eq!(classify(&err), FailureKind::RateLimited);

        let err = ExecutionError::Exchange(ExchangeError::Rejected(
            "HTTP 429 Too Many Requests".into(),
        ));
        assert_eq!(classify(&err), FailureKind::RateLimited);
    }

    #[test]
    fn privacy_message_classifies_as_permission_denied() {
        let err = ExecutionError::Identity(IdentityError::ActionRejected(
            "The settings on this account do not allow you to add comments here".into(),
        ));
        assert_eq!(classify(&err), FailureKind::PermissionDenied);
    }

    #[test]
    fn everything_else_is_transient() {
        let err = ExecutionError::Exchange(ExchangeError::NoResponse);
        assert_eq!(classify(&err), FailureKind::Transient);

        let err = ExecutionError::Identity(IdentityError::NotAuthenticated);
        assert_eq!(classify(&err), FailureKind::Transient);
    }
}

//! Apply error taxonomy.

use std::fmt;

use thiserror::Error;

use crate::context::Cancelled;
use crate::entity::Entity;
use crate::lifecycle::InfeasibleError;
use crate::remote::RemoteError;
use crate::retry::Retryable;
use crate::validate::ValidationError;

/// Phase of the apply cycle an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validate,
    Fetch,
    Lifecycle,
    Execute,
    Verify,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Validate => "validate",
            Phase::Fetch => "fetch",
            Phase::Lifecycle => "lifecycle",
            Phase::Execute => "execute",
            Phase::Verify => "verify",
        };
        f.write_str(s)
    }
}

/// Errors returned by the reconciler.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Malformed desired input.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Lifecycle directive violation or a required recreation.
    #[error(transparent)]
    Infeasible(#[from] InfeasibleError),

    /// Concurrent modification. Retried internally until the backoff gives up.
    #[error("conflict during {phase} ({operation}): {message}")]
    Conflict {
        phase: Phase,
        operation: String,
        message: String,
    },

    /// Any other remote failure.
    #[error("{operation} failed during {phase}: {source}")]
    Remote {
        phase: Phase,
        operation: String,
        #[source]
        source: RemoteError,
    },

    /// Operations succeeded but the remote state has not converged.
    #[error("diffs remain after apply: {}", .diffs.join("; "))]
    DiffAfterApply { diffs: Vec<String>, state: Box<Entity> },

    /// Cancelled or past the deadline.
    #[error("apply aborted: {0}")]
    Cancelled(#[from] Cancelled),
}

pub type Result<T> = std::result::Result<T, ApplyError>;

impl ApplyError {
    /// Classify a remote error raised by `operation`.
    pub(crate) fn remote(phase: Phase, operation: impl Into<String>, err: RemoteError) -> Self {
        match err {
            RemoteError::Conflict(message) => ApplyError::Conflict {
                phase,
                operation: operation.into(),
                message,
            },
            source => ApplyError::Remote {
                phase,
                operation: operation.into(),
                source,
            },
        }
    }

    /// The phase that produced this error, when it came from one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            ApplyError::Validation(_) => Some(Phase::Validate),
            ApplyError::Infeasible(_) => Some(Phase::Lifecycle),
            ApplyError::Conflict { phase, .. } | ApplyError::Remote { phase, .. } => Some(*phase),
            ApplyError::DiffAfterApply { .. } => Some(Phase::Verify),
            ApplyError::Cancelled(_) => None,
        }
    }

    /// Remote state observed after operations ran, if any.
    pub fn state(&self) -> Option<&Entity> {
        match self {
            ApplyError::DiffAfterApply { state, .. } => Some(state),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ApplyError::Conflict { .. })
    }
}

impl Retryable for ApplyError {
    /// Only conflicts raised by a mutation restart the cycle.
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApplyError::Conflict {
                phase: Phase::Execute,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_classification() {
        let err = ApplyError::remote(Phase::Execute, "update:x", RemoteError::Conflict("etag".into()));
        assert!(err.is_retryable());
        assert_eq!(err.phase(), Some(Phase::Execute));

        let err = ApplyError::remote(Phase::Fetch, "fetch", RemoteError::Other("boom".into()));
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "fetch failed during fetch: remote: boom");
    }

    #[test]
    fn test_only_execute_conflicts_are_retryable() {
        for phase in [Phase::Fetch, Phase::Verify] {
            let err = ApplyError::remote(phase, "fetch", RemoteError::Conflict("busy".into()));
            assert!(err.is_conflict());
            assert!(!err.is_retryable(), "{phase:?} conflict must not be retried");
        }
    }

    #[test]
    fn test_diff_after_apply_carries_state() {
        let state = Entity::new().with("name", "d1");
        let err = ApplyError::DiffAfterApply {
            diffs: vec!["a: 1 -> 2".to_string(), "b: x -> y".to_string()],
            state: Box::new(state.clone()),
        };
        assert_eq!(err.state(), Some(&state));
        assert_eq!(err.to_string(), "diffs remain after apply: a: 1 -> 2; b: x -> y");
        assert!(!err.is_retryable());
    }
}

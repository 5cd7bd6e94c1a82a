//! Lifecycle directives - caller constraints on create/adopt/modify.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diff::OperationDiff;
use crate::entity::Entity;
use crate::remote::Identity;

/// A caller-supplied constraint on which remote operations are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleDirective {
    /// Refuse to create a resource that does not exist.
    BlockCreation,
    /// Refuse to adopt a resource that already exists.
    BlockAcquire,
    /// Refuse to modify an existing resource.
    BlockModification,
}

/// A set of lifecycle directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives(BTreeSet<LifecycleDirective>);

impl Directives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, directive: LifecycleDirective) -> Self {
        self.0.insert(directive);
        self
    }

    pub fn insert(&mut self, directive: LifecycleDirective) {
        self.0.insert(directive);
    }

    pub fn contains(&self, directive: LifecycleDirective) -> bool {
        self.0.contains(&directive)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<LifecycleDirective> for Directives {
    fn from_iter<I: IntoIterator<Item = LifecycleDirective>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Why an apply cannot proceed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InfeasibleError {
    #[error("infeasible: creation of {identity} blocked by lifecycle directive")]
    CreationBlocked { identity: String },

    #[error("infeasible: {identity} already exists, acquisition blocked by lifecycle directive")]
    AcquisitionBlocked { identity: String },

    #[error("infeasible: update {diff} would require recreation")]
    RequiresRecreate { diff: String },

    #[error("infeasible: modification blocked by lifecycle directive, unresolved diff {diff}")]
    ModificationBlocked { diff: String },
}

/// Gate a computed diff set against the caller's directives.
///
/// A diff requiring recreation is always infeasible; recreation is never
/// performed implicitly.
pub fn check_lifecycle(
    identity: &Identity,
    initial: Option<&Entity>,
    diffs: &[OperationDiff],
    directives: &Directives,
) -> Result<(), InfeasibleError> {
    if initial.is_none() {
        if directives.contains(LifecycleDirective::BlockCreation) {
            return Err(InfeasibleError::CreationBlocked {
                identity: identity.to_string(),
            });
        }
        return Ok(());
    }

    if directives.contains(LifecycleDirective::BlockAcquire) {
        return Err(InfeasibleError::AcquisitionBlocked {
            identity: identity.to_string(),
        });
    }

    if let Some(d) = diffs.iter().find(|d| d.requires_recreate) {
        return Err(InfeasibleError::RequiresRecreate {
            diff: d.to_string(),
        });
    }

    if let Some(d) = diffs.first()
        && directives.contains(LifecycleDirective::BlockModification)
    {
        return Err(InfeasibleError::ModificationBlocked {
            diff: d.to_string(),
        });
    }

    Ok(())
}

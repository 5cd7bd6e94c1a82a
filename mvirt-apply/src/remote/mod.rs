//! Remote service contract.
//!
//! The engine never talks to a transport directly. Everything it needs from
//! the service (fetch, create, update, delete, list) goes through [`Remote`].

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::diff::OperationDiff;
use crate::entity::Entity;

pub use memory::InMemoryRemote;

/// Address of a remote resource, rendered from the schema's identity template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors reported by the remote service, classified for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Concurrent modification (version mismatch, 409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Anything else.
    #[error("remote: {0}")]
    Other(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict(_))
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub items: Vec<Entity>,
    /// Continuation token for the next page, if there is one.
    pub next_token: Option<String>,
    pub prefix: String,
    pub page_size: usize,
}

impl ListPage {
    pub fn has_next(&self) -> bool {
        self.next_token.is_some()
    }
}

/// The remote service a resource lives in.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Fetch current state. Must return [`RemoteError::NotFound`] if the
    /// resource does not exist.
    async fn fetch(&self, identity: &Identity) -> Result<Entity, RemoteError>;

    /// Create the resource. May return a response carrying fields a later
    /// fetch does not (server-chosen identifiers).
    async fn create(&self, identity: &Identity, desired: &Entity) -> Result<Option<Entity>, RemoteError>;

    /// Apply the given operation diffs to an existing resource.
    async fn update(
        &self,
        identity: &Identity,
        desired: &Entity,
        ops: &[OperationDiff],
    ) -> Result<Option<Entity>, RemoteError>;

    /// Delete the resource.
    async fn delete(&self, identity: &Identity) -> Result<(), RemoteError>;

    /// List resources whose identity starts with `prefix`.
    async fn list(
        &self,
        prefix: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<ListPage, RemoteError>;
}

#[async_trait]
impl<R: Remote + ?Sized> Remote for Arc<R> {
    async fn fetch(&self, identity: &Identity) -> Result<Entity, RemoteError> {
        (**self).fetch(identity).await
    }

    async fn create(&self, identity: &Identity, desired: &Entity) -> Result<Option<Entity>, RemoteError> {
        (**self).create(identity, desired).await
    }

    async fn update(
        &self,
        identity: &Identity,
        desired: &Entity,
        ops: &[OperationDiff],
    ) -> Result<Option<Entity>, RemoteError> {
        (**self).update(identity, desired, ops).await
    }

    async fn delete(&self, identity: &Identity) -> Result<(), RemoteError> {
        (**self).delete(identity).await
    }

    async fn list(
        &self,
        prefix: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<ListPage, RemoteError> {
        (**self).list(prefix, page_size, page_token).await
    }
}

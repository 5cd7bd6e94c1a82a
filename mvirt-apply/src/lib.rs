//! mvirt-apply: declarative apply engine.
//!
//! Given a resource schema and a desired entity, the [`Reconciler`] brings
//! the remote resource into the desired state and verifies it converged.

pub mod canonical;
pub mod config;
pub mod context;
pub mod diff;
pub mod entity;
pub mod error;
pub mod execute;
pub mod extract;
pub mod lifecycle;
pub mod plan;
pub mod reconciler;
pub mod remote;
pub mod retry;
pub mod schema;
pub mod validate;
pub mod verify;

pub use config::{ApplyConfig, BackoffStrategy, RetryConfig};
pub use context::{CallContext, CancelHandle, Cancelled};
pub use diff::{FieldDiff, OperationDiff};
pub use entity::{Entity, Presence, Value};
pub use error::{ApplyError, Phase};
pub use lifecycle::{Directives, InfeasibleError, LifecycleDirective};
pub use plan::Operation;
pub use reconciler::{ApplyOptions, PlanReport, Reconciler};
pub use remote::{Identity, InMemoryRemote, ListPage, Remote, RemoteError};
pub use retry::{Backoff, ConstantBackoff, ExponentialBackoff, NoRetry, Retryable};
pub use schema::{FieldKind, FieldSchema, Normalization, Schema, SchemaError};
pub use validate::ValidationError;

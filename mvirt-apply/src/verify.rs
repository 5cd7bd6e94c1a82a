//! Convergence verification.

use tracing::{debug, warn};

use crate::canonical::{canonicalize_desired, canonicalize_new_state, merge_response};
use crate::context::CallContext;
use crate::diff::diff;
use crate::entity::Entity;
use crate::error::{ApplyError, Phase, Result};
use crate::extract::post_read_extract;
use crate::plan::Operation;
use crate::remote::{Identity, Remote};
use crate::schema::Schema;

/// Re-fetch after execution and confirm the remote now matches `raw_desired`.
///
/// `response` is the last operation's response; it is only merged after a
/// create, whose response may carry fields a fetch does not return.
pub async fn verify<R: Remote + ?Sized>(
    ctx: &CallContext,
    schema: &Schema,
    remote: &R,
    identity: &Identity,
    raw_desired: &Entity,
    ops: &[Operation],
    response: Option<&Entity>,
) -> Result<Entity> {
    ctx.check()?;
    let fetched = ctx
        .run(remote.fetch(identity))
        .await?
        .map_err(|e| ApplyError::remote(Phase::Verify, "fetch", e))?;

    let raw_new = match (ops.last(), response) {
        (Some(Operation::Create), Some(response)) => merge_response(&fetched, response),
        _ => fetched,
    };

    let new_state = canonicalize_new_state(schema, &raw_new, raw_desired);
    let desired = canonicalize_desired(schema, raw_desired, Some(&new_state));

    let (new_state, warnings) = post_read_extract(schema, &new_state);
    for w in &warnings {
        warn!("{}: {}", identity, w);
    }
    let (desired, warnings) = post_read_extract(schema, &desired);
    for w in &warnings {
        warn!("{}: {}", identity, w);
    }

    let diffs = diff(schema, Some(&new_state), &desired);
    if diffs.is_empty() {
        debug!("{} converged: {}", identity, new_state);
        return Ok(new_state);
    }

    let diffs: Vec<String> = diffs.iter().map(|d| d.to_string()).collect();
    warn!("{} did not converge: {}", identity, diffs.join("; "));
    Err(ApplyError::DiffAfterApply {
        diffs,
        state: Box::new(new_state),
    })
}

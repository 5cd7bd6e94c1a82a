//! Operation executor.

use tracing::{error, info};

use crate::context::CallContext;
use crate::entity::Entity;
use crate::error::{ApplyError, Phase, Result};
use crate::plan::Operation;
use crate::remote::{Identity, Remote};
use crate::schema::Schema;

/// Run the plan in order against the remote. Stops at the first failure;
/// operations already applied are not rolled back.
///
/// Returns the response of the last operation, if it produced one.
pub async fn execute<R: Remote + ?Sized>(
    ctx: &CallContext,
    schema: &Schema,
    remote: &R,
    identity: &Identity,
    desired: &Entity,
    ops: &[Operation],
) -> Result<Option<Entity>> {
    let mut desired = desired.clone();
    let mut response = None;

    for op in ops {
        ctx.check()?;
        info!("Executing {} on {}", op, identity);

        let result = match op {
            Operation::Create => ctx.run(remote.create(identity, &desired)).await?,
            Operation::Update(d) => {
                ctx.run(remote.update(identity, &desired, std::slice::from_ref(d)))
                    .await?
            }
        };

        response = match result {
            Ok(response) => response,
            Err(e) => {
                error!("{} on {} failed: {}", op.name(), identity, e);
                return Err(ApplyError::remote(Phase::Execute, op.name(), e));
            }
        };

        // Later operations must carry the server fields (etag) the last one produced.
        if let Some(resp) = &response {
            refresh_output_only(schema, &mut desired, resp);
        }
    }

    Ok(response)
}

fn refresh_output_only(schema: &Schema, desired: &mut Entity, response: &Entity) {
    for field in schema.fields.iter().filter(|f| f.output_only) {
        let slot = response.get(&field.name);
        if !slot.is_absent() {
            desired.set(&field.name, slot.cloned());
        }
    }
}

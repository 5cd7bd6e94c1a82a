//! Reconciler - drives one desired entity to convergence with its remote.
//!
//! Each attempt runs the full cycle:
//! 1. fetch the current state (NotFound means the resource does not exist)
//! 2. canonicalize initial and desired against each other
//! 3. diff, group into operations and gate against lifecycle directives
//! 4. execute the plan
//! 5. re-fetch and verify convergence
//!
//! Conflicts restart the cycle from the fetch under the configured backoff.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::canonical::{canonicalize_desired, canonicalize_initial};
use crate::config::ApplyConfig;
use crate::context::CallContext;
use crate::diff::{OperationDiff, diff, to_operation_diffs};
use crate::entity::Entity;
use crate::error::{ApplyError, Phase, Result};
use crate::execute::execute;
use crate::extract::{extract_fields, identity, post_read_extract};
use crate::lifecycle::{Directives, check_lifecycle};
use crate::plan::{Operation, plan};
use crate::remote::{Identity, ListPage, Remote};
use crate::retry::retry;
use crate::schema::Schema;
use crate::validate::validate;
use crate::verify::verify;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub directives: Directives,
    /// Previously observed state used to address the initial fetch instead
    /// of the desired entity.
    pub state_hint: Option<Entity>,
}

impl ApplyOptions {
    pub fn with_directives(mut self, directives: Directives) -> Self {
        self.directives = directives;
        self
    }

    pub fn with_state_hint(mut self, hint: Entity) -> Self {
        self.state_hint = Some(hint);
        self
    }
}

/// Result of a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub identity: String,
    pub initial: Option<Entity>,
    /// Human-readable field diffs.
    pub diffs: Vec<String>,
    /// Operation names in execution order.
    pub operations: Vec<String>,
}

impl PlanReport {
    pub fn is_converged(&self) -> bool {
        self.operations.is_empty()
    }
}

/// What one attempt decided to do.
struct Planned {
    initial: Option<Entity>,
    desired: Entity,
    diffs: Vec<OperationDiff>,
    ops: Vec<Operation>,
}

pub struct Reconciler<R: Remote> {
    schema: Arc<Schema>,
    remote: R,
    config: ApplyConfig,
}

impl<R: Remote> Reconciler<R> {
    pub fn new(schema: Arc<Schema>, remote: R) -> Self {
        Self::with_config(schema, remote, ApplyConfig::default())
    }

    pub fn with_config(schema: Arc<Schema>, remote: R, config: ApplyConfig) -> Self {
        Self {
            schema,
            remote,
            config,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn config(&self) -> &ApplyConfig {
        &self.config
    }

    // =========================================================================
    // Apply
    // =========================================================================

    /// Make the remote resource match `desired`.
    ///
    /// Returns the canonical remote state after convergence.
    pub async fn reconcile(
        &self,
        ctx: &CallContext,
        desired: &Entity,
        options: &ApplyOptions,
    ) -> Result<Entity> {
        let (desired, id) = self.prepare(desired)?;
        let ctx = self.scoped(ctx);
        let mut backoff = self.config.retry.backoff();

        info!("Reconciling {} {}", self.schema.kind, id);
        let state = retry(&ctx, backoff.as_mut(), |attempt| {
            self.apply_once(&ctx, &id, &desired, options, attempt)
        })
        .await?;
        info!("{} {} is up to date", self.schema.kind, id);
        Ok(state)
    }

    /// Dry run: compute the operations `reconcile` would run, without
    /// mutating anything.
    pub async fn plan(
        &self,
        ctx: &CallContext,
        desired: &Entity,
        options: &ApplyOptions,
    ) -> Result<PlanReport> {
        let (desired, id) = self.prepare(desired)?;
        let ctx = self.scoped(ctx);
        let planned = self.plan_once(&ctx, &id, &desired, options).await?;

        Ok(PlanReport {
            identity: id.to_string(),
            initial: planned.initial,
            diffs: planned
                .diffs
                .iter()
                .flat_map(|d| d.fields.iter().map(|f| f.to_string()))
                .collect(),
            operations: planned.ops.iter().map(Operation::name).collect(),
        })
    }

    async fn apply_once(
        &self,
        ctx: &CallContext,
        id: &Identity,
        raw_desired: &Entity,
        options: &ApplyOptions,
        attempt: u32,
    ) -> Result<Entity> {
        debug!("Apply attempt {} for {}", attempt, id);
        let planned = self.plan_once(ctx, id, raw_desired, options).await?;

        if planned.ops.is_empty() {
            info!("{} already matches desired state", id);
            return Ok(planned.initial.unwrap_or(planned.desired));
        }

        let response = execute(
            ctx,
            &self.schema,
            &self.remote,
            id,
            &planned.desired,
            &planned.ops,
        )
        .await?;

        info!("Verifying {}", id);
        verify(
            ctx,
            &self.schema,
            &self.remote,
            id,
            raw_desired,
            &planned.ops,
            response.as_ref(),
        )
        .await
    }

    /// Fetch, canonicalize, diff, gate and plan.
    async fn plan_once(
        &self,
        ctx: &CallContext,
        id: &Identity,
        raw_desired: &Entity,
        options: &ApplyOptions,
    ) -> Result<Planned> {
        let fetch_id = match &options.state_hint {
            Some(hint) => identity(&self.schema, hint)?,
            None => id.clone(),
        };

        let initial = self.fetch(ctx, &fetch_id).await?.map(|raw| {
            let initial = canonicalize_initial(&self.schema, &raw, raw_desired);
            let (initial, warnings) = post_read_extract(&self.schema, &initial);
            for w in &warnings {
                warn!("{}: {}", fetch_id, w);
            }
            initial
        });

        // Derived values must follow the remote form canonicalization picked.
        let desired = canonicalize_desired(&self.schema, raw_desired, initial.as_ref());
        let (desired, warnings) = post_read_extract(&self.schema, &desired);
        for w in &warnings {
            warn!("{}: {}", id, w);
        }
        debug!("Canonical desired state for {}: {}", id, desired);

        let field_diffs = diff(&self.schema, initial.as_ref(), &desired);
        let diffs = to_operation_diffs(&self.schema, &field_diffs);
        for d in &diffs {
            debug!("{}: {}", id, d);
        }

        check_lifecycle(id, initial.as_ref(), &diffs, &options.directives)?;

        let ops = plan(initial.as_ref(), diffs.clone());
        if !ops.is_empty() {
            let names: Vec<String> = ops.iter().map(Operation::name).collect();
            info!("Plan for {}: [{}]", id, names.join(", "));
        }

        Ok(Planned {
            initial,
            desired,
            diffs,
            ops,
        })
    }

    // =========================================================================
    // Delete / list
    // =========================================================================

    /// Delete the resource `desired` addresses. A missing resource counts as
    /// already deleted.
    pub async fn delete(&self, ctx: &CallContext, desired: &Entity) -> Result<()> {
        let id = identity(&self.schema, desired)?;
        let ctx = self.scoped(ctx);
        self.delete_identity(&ctx, &id).await
    }

    async fn delete_identity(&self, ctx: &CallContext, id: &Identity) -> Result<()> {
        match ctx.run(self.remote.delete(id)).await? {
            Ok(()) => {
                info!("Deleted {} {}", self.schema.kind, id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("{} already deleted", id);
                Ok(())
            }
            Err(e) => Err(ApplyError::remote(Phase::Execute, "delete", e)),
        }
    }

    /// First page of resources whose identity starts with `prefix`.
    pub async fn list(&self, ctx: &CallContext, prefix: &str, page_size: usize) -> Result<ListPage> {
        self.list_page(ctx, prefix, page_size, None).await
    }

    /// Page following `page`. Returns an empty page when there is none.
    pub async fn list_next(&self, ctx: &CallContext, page: &ListPage) -> Result<ListPage> {
        match &page.next_token {
            Some(token) => {
                self.list_page(ctx, &page.prefix, page.page_size, Some(token))
                    .await
            }
            None => Ok(ListPage {
                prefix: page.prefix.clone(),
                page_size: page.page_size,
                ..Default::default()
            }),
        }
    }

    async fn list_page(
        &self,
        ctx: &CallContext,
        prefix: &str,
        page_size: usize,
        token: Option<&str>,
    ) -> Result<ListPage> {
        ctx.check()?;
        ctx.run(self.remote.list(prefix, page_size, token))
            .await?
            .map_err(|e| ApplyError::remote(Phase::Fetch, "list", e))
    }

    /// Delete every listed resource under `prefix` that `filter` accepts.
    ///
    /// Returns the number of resources deleted.
    pub async fn delete_all<F>(&self, ctx: &CallContext, prefix: &str, mut filter: F) -> Result<usize>
    where
        F: FnMut(&Entity) -> bool,
    {
        let ctx = self.scoped(ctx);
        let mut page = self.list(&ctx, prefix, 0).await?;
        let mut deleted = 0;
        loop {
            for item in page.items.iter().filter(|item| filter(item)) {
                let id = match identity(&self.schema, item) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!("Skipping listed resource without identity: {}", e);
                        continue;
                    }
                };
                self.delete_identity(&ctx, &id).await?;
                deleted += 1;
            }
            if !page.has_next() {
                break;
            }
            page = self.list_next(&ctx, &page).await?;
        }
        info!("Deleted {} resource(s) under {:?}", deleted, prefix);
        Ok(deleted)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Validate, compute derived fields and render the identity.
    fn prepare(&self, desired: &Entity) -> Result<(Entity, Identity)> {
        validate(&self.schema, desired)?;
        let desired = extract_fields(&self.schema, desired)?;
        let id = identity(&self.schema, &desired)?;
        Ok((desired, id))
    }

    fn scoped(&self, ctx: &CallContext) -> CallContext {
        match self.config.timeout() {
            Some(timeout) => ctx.clone().with_timeout(timeout),
            None => ctx.clone(),
        }
    }

    async fn fetch(&self, ctx: &CallContext, id: &Identity) -> Result<Option<Entity>> {
        ctx.check()?;
        match ctx.run(self.remote.fetch(id)).await? {
            Ok(entity) => Ok(Some(entity)),
            Err(e) if e.is_not_found() => {
                debug!("{} does not exist", id);
                Ok(None)
            }
            Err(e) => Err(ApplyError::remote(Phase::Fetch, "fetch", e)),
        }
    }
}

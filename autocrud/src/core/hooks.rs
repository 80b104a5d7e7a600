//! # Hook/Authorization Dispatcher
//!
//! [`ResourceHooks`] is the per-resource extension surface. Every method has a no-op
//! default, so a resource overrides only the slots it needs:
//!
//! ```rust,ignore
//! struct EmployeeHooks;
//!
//! #[async_trait]
//! impl ResourceHooks<employee::Entity> for EmployeeHooks {
//!     // hide soft-deleted rows from every read
//!     async fn get_filter(
//!         &self,
//!         _ctx: &OperationContext,
//!         _session: &ResourceSession,
//!         plan: QueryPlan<employee::Entity>,
//!     ) -> Result<Scoped<employee::Entity>, ApiError> {
//!         Ok(Scoped::new(plan.filter(employee::Column::Deleted.is_null())))
//!     }
//!
//!     async fn mark_deleted(
//!         &self,
//!         _ctx: &OperationContext,
//!         model: &mut employee::ActiveModel,
//!     ) -> Result<Deletion, ApiError> {
//!         model.deleted = Set(Some(true));
//!         Ok(Deletion::Marked)
//!     }
//! }
//! ```
//!
//! ## Ordering
//!
//! `identify` runs before `authorize`, both before any storage access. On reads,
//! `before_get` is the first hook inside the session and runs before `get_filter`. Preconditions
//! run after lookup and before mutation, `before_*` after the instance is built or
//! loaded and before it is persisted, and `after_*` only once the transaction has
//! committed. A failing `after_*` hook is logged and does not change the response.

use async_trait::async_trait;
use axum::http::Method;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::{CrudEntity, descriptor::ResourceDescriptor, session::ResourceSession};
use crate::{ApiError, OperationContext, filtering::QueryPlan};

/// A plan narrowed by `get_filter`, with the query parameters the hook handled itself.
pub struct Scoped<E: CrudEntity> {
    pub plan: QueryPlan<E>,
    pub consumed: BTreeSet<String>,
}

impl<E: CrudEntity> Scoped<E> {
    #[must_use]
    pub fn new(plan: QueryPlan<E>) -> Self {
        Self {
            plan,
            consumed: BTreeSet::new(),
        }
    }

    /// Mark a query parameter as handled so the translator skips it.
    #[must_use]
    pub fn consume(mut self, param: impl Into<String>) -> Self {
        self.consumed.insert(param.into());
        self
    }
}

/// What `mark_deleted` did with the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Deletion {
    /// Physically remove the row
    #[default]
    Remove,
    /// The hook set a deletion marker; persist the instance instead of removing it
    Marked,
}

#[async_trait]
pub trait ResourceHooks<E: CrudEntity>: Send + Sync {
    /// Runs in the session before a GET queries storage. May rewrite the path scope or
    /// the query parameters the read will use.
    async fn before_get(
        &self,
        _ctx: &mut OperationContext,
        _session: &ResourceSession,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    /// Narrow visibility for every read and lookup.
    async fn get_filter(
        &self,
        _ctx: &OperationContext,
        _session: &ResourceSession,
        plan: QueryPlan<E>,
    ) -> Result<Scoped<E>, ApiError> {
        Ok(Scoped::new(plan))
    }

    async fn after_get(&self, _ctx: &OperationContext, _models: &[E::Model]) -> Result<(), ApiError> {
        Ok(())
    }

    /// Metadata attached to each row of a collection GET under `meta`.
    fn resource_meta(&self, _ctx: &OperationContext, _model: &E::Model) -> Option<Map<String, Value>> {
        None
    }

    /// Metadata attached to a single-item GET under `meta`.
    fn meta(&self, _ctx: &OperationContext, _model: &E::Model) -> Option<Map<String, Value>> {
        None
    }

    /// Attribute values applied when the body omits them, per verb.
    fn defaults(&self, _method: &Method, _ctx: &OperationContext) -> Map<String, Value> {
        Map::new()
    }

    /// Override the visible fields for this request.
    fn response_fields(&self, _ctx: &OperationContext) -> Option<Vec<String>> {
        None
    }

    async fn before_post(
        &self,
        _ctx: &OperationContext,
        _session: &ResourceSession,
        _model: &mut E::ActiveModel,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    /// Runs once per created instance, also for an array POST.
    async fn after_post(&self, _ctx: &OperationContext, _model: &E::Model) -> Result<(), ApiError> {
        Ok(())
    }

    /// Runs once per bulk PATCH with every created instance, in input order.
    async fn after_bulk_patch(
        &self,
        _ctx: &OperationContext,
        _models: &[E::Model],
    ) -> Result<(), ApiError> {
        Ok(())
    }

    async fn before_put(
        &self,
        _ctx: &OperationContext,
        _session: &ResourceSession,
        _model: &mut E::ActiveModel,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    async fn after_put(&self, _ctx: &OperationContext, _model: &E::Model) -> Result<(), ApiError> {
        Ok(())
    }

    /// Restrict which rows a PATCH may touch. A loaded row outside the returned plan
    /// is rejected with `Conflict`.
    async fn patch_precondition(
        &self,
        _ctx: &OperationContext,
        plan: QueryPlan<E>,
    ) -> Result<QueryPlan<E>, ApiError> {
        Ok(plan)
    }

    /// Derived adjustments after the body has been applied.
    async fn modify_patch(
        &self,
        _ctx: &OperationContext,
        _model: &mut E::ActiveModel,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    async fn before_patch(
        &self,
        _ctx: &OperationContext,
        _session: &ResourceSession,
        _model: &mut E::ActiveModel,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    async fn after_patch(&self, _ctx: &OperationContext, _model: &E::Model) -> Result<(), ApiError> {
        Ok(())
    }

    /// Restrict which rows a DELETE may remove. A loaded row outside the returned plan
    /// is rejected with `PreconditionFailed`.
    async fn delete_precondition(
        &self,
        _ctx: &OperationContext,
        plan: QueryPlan<E>,
    ) -> Result<QueryPlan<E>, ApiError> {
        Ok(plan)
    }

    async fn before_delete(
        &self,
        _ctx: &OperationContext,
        _session: &ResourceSession,
        _model: &E::Model,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    /// Soft delete: set a marker on the instance and return [`Deletion::Marked`].
    async fn mark_deleted(
        &self,
        _ctx: &OperationContext,
        _model: &mut E::ActiveModel,
    ) -> Result<Deletion, ApiError> {
        Ok(Deletion::Remove)
    }

    async fn after_delete(&self, _ctx: &OperationContext, _model: &E::Model) -> Result<(), ApiError> {
        Ok(())
    }
}

/// Hooks for a resource that needs none.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<E: CrudEntity> ResourceHooks<E> for NoHooks {}

/// Method check, then identification, then authorization.
///
/// Runs before the session opens; the identity is stored on `ctx` for later hooks.
///
/// # Errors
/// `MethodNotAllowed`, or whatever the identifier or an authorizer reports.
pub(crate) async fn admit<E: CrudEntity>(
    descriptor: &ResourceDescriptor<E>,
    allowed: &[Method],
    ctx: &mut OperationContext,
) -> Result<(), ApiError> {
    if !allowed.contains(&ctx.method) {
        return Err(ApiError::method_not_allowed(ctx.method.clone(), allowed));
    }
    if let Some(identifier) = descriptor.identifier(&ctx.method) {
        ctx.identity = Some(identifier.identify(ctx).await?);
    }
    for authorizer in descriptor.authorizers(&ctx.method) {
        authorizer.authorize(ctx).await?;
    }
    Ok(())
}

/// Log and swallow a failure from a hook that ran after commit.
pub(crate) fn settle(resource: &str, hook: &'static str, outcome: Result<(), ApiError>) {
    if let Err(err) = outcome {
        tracing::warn!(
            resource,
            hook,
            error = %err,
            "Hook failed after commit; response unaffected"
        );
    }
}

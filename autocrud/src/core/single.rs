//! Single-Item Operation Pipeline: fetch (GET), replace (PUT), partial update (PATCH)
//! and removal (DELETE) of the row identified by the path.

use axum::http::{Method, StatusCode};
use sea_orm::{ActiveModelBehavior, ActiveModelTrait, IntoActiveModel, QuerySelect};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::{
    CrudEntity, Reply, Resource,
    body::{self, Write},
    hooks::{self, Deletion},
    session::ResourceSession,
};
use crate::{
    ApiError, OperationContext,
    errors::{Persistence, classify_db_error},
    filtering::{QueryPlan, translate},
    projection,
};

const CONDITIONS_VIOLATED: &str = "Resource found but conditions violated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guarded {
    Patch,
    Delete,
}

impl<E: CrudEntity> Resource<E> {
    /// Find the one row the path names within the `get_filter` scope.
    async fn locate(
        &self,
        ctx: &OperationContext,
        session: &ResourceSession,
    ) -> Result<E::Model, ApiError> {
        let descriptor = &*self.descriptor;
        let plan = body::path_scope(descriptor, &ctx.path, QueryPlan::new())?;
        let scoped = self.hooks.get_filter(ctx, session, plan).await?;

        let mut rows = scoped
            .plan
            .filtered()
            .limit(2)
            .all(session.connection())
            .await?;
        if rows.len() > 1 {
            return Err(ApiError::programming(format!(
                "lookup on '{}' matched more than one row for {:?}",
                descriptor.name(),
                ctx.path
            )));
        }
        rows.pop()
            .ok_or_else(|| ApiError::not_found(descriptor.name(), body::describe_id(&ctx.path)))
    }

    /// Check a loaded row against the request's query parameters and the precondition hook.
    async fn check_preconditions(
        &self,
        ctx: &OperationContext,
        session: &ResourceSession,
        model: &E::Model,
        guarded: Guarded,
    ) -> Result<(), ApiError> {
        let descriptor = &*self.descriptor;
        let key = body::key_plan(descriptor, model);

        let requested = translate(descriptor, &ctx.params, &BTreeSet::new())?;
        if !requested.is_empty() {
            let plan = key.clone().filter(requested);
            if plan.filtered().one(session.connection()).await?.is_none() {
                return Err(ApiError::conflict(CONDITIONS_VIOLATED));
            }
        }

        let plan = match guarded {
            Guarded::Patch => self.hooks.patch_precondition(ctx, key).await?,
            Guarded::Delete => self.hooks.delete_precondition(ctx, key).await?,
        };
        if plan.filtered().one(session.connection()).await?.is_none() {
            tracing::debug!(resource = descriptor.name(), ?guarded, "Precondition rejected row");
            return Err(match guarded {
                Guarded::Patch => ApiError::conflict(CONDITIONS_VIOLATED),
                Guarded::Delete => {
                    ApiError::precondition_failed("Resource is not eligible for deletion")
                }
            });
        }
        Ok(())
    }

    /// Write a loaded instance back, skipping storage when nothing changed.
    async fn persist(
        &self,
        session: &ResourceSession,
        model: E::ActiveModel,
        loaded: E::Model,
    ) -> Result<E::Model, ApiError> {
        if !model.is_changed() {
            return Ok(loaded);
        }
        model
            .update(session.connection())
            .await
            .map_err(|e| classify_db_error(e, Persistence::Write))
    }

    /// GET on one item.
    ///
    /// # Errors
    /// Admission failures, `NotFound` when the row is absent or filtered out.
    pub async fn fetch(&self, mut ctx: OperationContext) -> Result<Reply, ApiError> {
        let descriptor = &*self.descriptor;
        hooks::admit(descriptor, descriptor.item_methods(), &mut ctx).await?;
        let fields = self.visible_fields(&ctx)?;

        let session = ResourceSession::begin(&self.db, descriptor.name()).await?;
        let outcome = self.fetch_in(&mut ctx, &session).await;
        let model = session.release(outcome).await?;

        let body = projection::with_meta(
            projection::project(descriptor.attributes(), &model, &fields),
            self.hooks.meta(&ctx, &model),
        );
        hooks::settle(
            descriptor.name(),
            "after_get",
            self.hooks.after_get(&ctx, std::slice::from_ref(&model)).await,
        );
        Ok(Reply::json(StatusCode::OK, body))
    }

    async fn fetch_in(
        &self,
        ctx: &mut OperationContext,
        session: &ResourceSession,
    ) -> Result<E::Model, ApiError> {
        self.hooks.before_get(ctx, session).await?;
        self.locate(ctx, session).await
    }

    /// PUT on one item. Creates the row (201) when it is missing and the resource
    /// allows PUT insert.
    ///
    /// # Errors
    /// Admission failures, `NotFound`, `ValidationFailed`, storage conflicts.
    pub async fn replace(&self, mut ctx: OperationContext) -> Result<Reply, ApiError> {
        let descriptor = &*self.descriptor;
        hooks::admit(descriptor, descriptor.item_methods(), &mut ctx).await?;
        let fields = self.visible_fields(&ctx)?;
        let values = ctx.body_object()?.clone();

        let session = ResourceSession::begin(&self.db, descriptor.name()).await?;
        let outcome = self.replace_in(&ctx, &session, &values).await;
        let (model, inserted) = session.release(outcome).await?;

        let body = projection::project(descriptor.attributes(), &model, &fields);
        hooks::settle(
            descriptor.name(),
            "after_put",
            self.hooks.after_put(&ctx, &model).await,
        );
        let status = if inserted {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        Ok(Reply::json(status, body))
    }

    async fn replace_in(
        &self,
        ctx: &OperationContext,
        session: &ResourceSession,
        values: &Map<String, Value>,
    ) -> Result<(E::Model, bool), ApiError> {
        let descriptor = &*self.descriptor;
        let defaults = self.hooks.defaults(&Method::PUT, ctx);

        match self.locate(ctx, session).await {
            Ok(existing) => {
                let mut model = existing.clone().into_active_model();
                let errors = body::apply(descriptor, &mut model, values, &defaults, Write::Replace);
                body::validate(descriptor, &model, Write::Replace, errors)?;
                self.hooks.before_put(ctx, session, &mut model).await?;
                let saved = self.persist(session, model, existing).await?;
                Ok((saved, false))
            }
            Err(ApiError::NotFound { .. }) if descriptor.allow_put_insert() => {
                let mut model = <E::ActiveModel as ActiveModelBehavior>::new();
                let errors = body::apply(descriptor, &mut model, values, &defaults, Write::Replace);
                body::inject_path(descriptor, &mut model, &ctx.path)?;
                body::validate(descriptor, &model, Write::Replace, errors)?;
                self.hooks.before_put(ctx, session, &mut model).await?;
                tracing::debug!(resource = descriptor.name(), "PUT inserting missing row");
                let saved = model
                    .insert(session.connection())
                    .await
                    .map_err(|e| classify_db_error(e, Persistence::Write))?;
                Ok((saved, true))
            }
            Err(err) => Err(err),
        }
    }

    /// PATCH on one item: only the attributes in the body change.
    ///
    /// # Errors
    /// Admission failures, `NotFound`, `Conflict` when a precondition excludes the
    /// row, `ValidationFailed`, storage conflicts.
    pub async fn update(&self, mut ctx: OperationContext) -> Result<Reply, ApiError> {
        let descriptor = &*self.descriptor;
        hooks::admit(descriptor, descriptor.item_methods(), &mut ctx).await?;
        let fields = self.visible_fields(&ctx)?;
        let values = ctx.body_object()?.clone();

        let session = ResourceSession::begin(&self.db, descriptor.name()).await?;
        let outcome = self.update_in(&ctx, &session, &values).await;
        let model = session.release(outcome).await?;

        let body = projection::project(descriptor.attributes(), &model, &fields);
        hooks::settle(
            descriptor.name(),
            "after_patch",
            self.hooks.after_patch(&ctx, &model).await,
        );
        Ok(Reply::json(StatusCode::OK, body))
    }

    async fn update_in(
        &self,
        ctx: &OperationContext,
        session: &ResourceSession,
        values: &Map<String, Value>,
    ) -> Result<E::Model, ApiError> {
        let descriptor = &*self.descriptor;
        let existing = self.locate(ctx, session).await?;
        self.check_preconditions(ctx, session, &existing, Guarded::Patch)
            .await?;

        let mut model = existing.clone().into_active_model();
        let defaults = self.hooks.defaults(&Method::PATCH, ctx);
        let errors = body::apply(descriptor, &mut model, values, &defaults, Write::Merge);
        body::validate(descriptor, &model, Write::Merge, errors)?;

        self.hooks.modify_patch(ctx, &mut model).await?;
        self.hooks.before_patch(ctx, session, &mut model).await?;
        self.persist(session, model, existing).await
    }

    /// DELETE on one item; soft-deletes when `mark_deleted` marks the instance.
    ///
    /// # Errors
    /// Admission failures, `NotFound`, `Conflict`/`PreconditionFailed` from
    /// preconditions, `Conflict` when other rows still reference this one.
    pub async fn remove(&self, mut ctx: OperationContext) -> Result<Reply, ApiError> {
        let descriptor = &*self.descriptor;
        hooks::admit(descriptor, descriptor.item_methods(), &mut ctx).await?;

        let session = ResourceSession::begin(&self.db, descriptor.name()).await?;
        let outcome = self.remove_in(&ctx, &session).await;
        let model = session.release(outcome).await?;

        hooks::settle(
            descriptor.name(),
            "after_delete",
            self.hooks.after_delete(&ctx, &model).await,
        );
        Ok(Reply::no_content())
    }

    async fn remove_in(
        &self,
        ctx: &OperationContext,
        session: &ResourceSession,
    ) -> Result<E::Model, ApiError> {
        let existing = self.locate(ctx, session).await?;
        self.check_preconditions(ctx, session, &existing, Guarded::Delete)
            .await?;
        self.hooks.before_delete(ctx, session, &existing).await?;

        let mut model = existing.clone().into_active_model();
        match self.hooks.mark_deleted(ctx, &mut model).await? {
            Deletion::Marked => {
                tracing::debug!(resource = self.descriptor.name(), "Soft delete");
                self.persist(session, model, existing).await
            }
            Deletion::Remove => {
                existing
                    .clone()
                    .into_active_model()
                    .delete(session.connection())
                    .await
                    .map_err(|e| classify_db_error(e, Persistence::Delete))?;
                Ok(existing)
            }
        }
    }
}

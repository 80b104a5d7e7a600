//! Collection Operation Pipeline: search (GET), create (POST, one object or an array),
//! bulk add (PATCH).

use axum::http::{Method, StatusCode};
use sea_orm::{ActiveModelBehavior, ActiveModelTrait, PaginatorTrait};
use serde_json::{Map, Value};

use super::{
    CrudEntity, Reply, Resource,
    body::{self, Write},
    descriptor::{PostType, ResourceDescriptor},
    hooks,
    session::ResourceSession,
};
use crate::{
    ApiError, OperationContext,
    errors::{Persistence, classify_db_error},
    filtering::{self, QueryPlan, pagination},
    models::PatchDocument,
    projection,
};

/// A result page, with the total match count when the client asked for a window.
struct Page<M> {
    models: Vec<M>,
    offset: u64,
    total: Option<u64>,
}

/// How the entries of a batch are named in error messages.
const PATCH_ENTRY: &str = "Patch";
const POST_ENTRY: &str = "Item";

/// A decoded POST body.
enum PostBody {
    One(Map<String, Value>),
    Many(Vec<Map<String, Value>>),
}

/// Attribute a failure to one entry of a bulk request.
fn at_entry(label: &str, index: usize, err: ApiError) -> ApiError {
    match err {
        ApiError::ValidationFailed { errors } => ApiError::validation_failed(
            errors
                .into_iter()
                .map(|e| format!("{label} {index}: {e}"))
                .collect(),
        ),
        ApiError::Conflict { message } => {
            ApiError::conflict(format!("{label} {index}: {message}"))
        }
        other => other,
    }
}

/// Check a POST body against the shapes the resource accepts.
fn parse_post<E: CrudEntity>(
    descriptor: &ResourceDescriptor<E>,
    body: Option<&Value>,
) -> Result<PostBody, ApiError> {
    match body {
        Some(Value::Object(values)) if descriptor.accepts_post(PostType::Object) => {
            Ok(PostBody::One(values.clone()))
        }
        Some(Value::Object(_)) => Err(ApiError::invalid_body(
            "Posting objects is not supported on this resource",
        )),
        Some(Value::Array(items)) if descriptor.accepts_post(PostType::Array) => {
            if items.is_empty() {
                return Err(ApiError::invalid_body("At least one item is required"));
            }
            if items.len() > descriptor.max_batch_size() {
                return Err(ApiError::invalid_body(format!(
                    "At most {} items are accepted per request",
                    descriptor.max_batch_size()
                )));
            }
            items
                .iter()
                .enumerate()
                .map(|(index, item)| match item {
                    Value::Object(values) => Ok(values.clone()),
                    _ => Err(ApiError::invalid_body(format!(
                        "{POST_ENTRY} {index}: must be an object"
                    ))),
                })
                .collect::<Result<_, _>>()
                .map(PostBody::Many)
        }
        Some(Value::Array(_)) => Err(ApiError::invalid_body(
            "Posting arrays is not supported on this resource",
        )),
        Some(_) => Err(ApiError::invalid_body("Request body must be a JSON object")),
        None => Err(ApiError::invalid_body("A JSON request body is required")),
    }
}

/// Decode and check the shape of a bulk PATCH body before any storage access.
fn parse_patches(body: Option<&Value>, max_batch_size: usize) -> Result<Vec<Map<String, Value>>, ApiError> {
    let body = body.ok_or_else(|| ApiError::invalid_body("A JSON request body is required"))?;
    let document: PatchDocument = serde_json::from_value(body.clone()).map_err(|_| {
        ApiError::invalid_body(r#"Expected {"patches": [{"op": "add", "path": "/", "value": {...}}]}"#)
    })?;
    if document.patches.len() > max_batch_size {
        return Err(ApiError::invalid_body(format!(
            "At most {max_batch_size} patches are accepted per request"
        )));
    }
    document
        .patches
        .into_iter()
        .enumerate()
        .map(|(index, patch)| match (patch.op.as_str(), patch.path.as_str(), patch.value) {
            ("add", "/", Value::Object(value)) => Ok(value),
            ("add", "/", _) => Err(ApiError::invalid_body(format!(
                "Patch {index}: value must be an object"
            ))),
            _ => Err(ApiError::invalid_body(format!(
                "Patch {index} is not valid: only add to / is supported"
            ))),
        })
        .collect()
}

impl<E: CrudEntity> Resource<E> {
    /// GET on the collection.
    ///
    /// # Errors
    /// Admission failures, `UnrecognizedParameter`/`InvalidParameter` from planning,
    /// storage failures.
    pub async fn search(&self, mut ctx: OperationContext) -> Result<Reply, ApiError> {
        let descriptor = &*self.descriptor;
        hooks::admit(descriptor, descriptor.collection_methods(), &mut ctx).await?;
        let fields = self.visible_fields(&ctx)?;

        let session = ResourceSession::begin(&self.db, descriptor.name()).await?;
        let outcome = self.search_in(&mut ctx, &session).await;
        let page = session.release(outcome).await?;

        let body = Value::Array(
            page.models
                .iter()
                .map(|model| {
                    projection::with_meta(
                        projection::project(descriptor.attributes(), model, &fields),
                        self.hooks.resource_meta(&ctx, model),
                    )
                })
                .collect(),
        );
        hooks::settle(
            descriptor.name(),
            "after_get",
            self.hooks.after_get(&ctx, &page.models).await,
        );

        let mut reply = Reply::json(StatusCode::OK, body);
        if let Some(total) = page.total {
            let returned = u64::try_from(page.models.len()).unwrap_or(u64::MAX);
            reply = reply.with_headers(pagination::calculate_content_range(
                page.offset,
                returned,
                total,
                descriptor.name(),
            ));
        }
        Ok(reply)
    }

    async fn search_in(
        &self,
        ctx: &mut OperationContext,
        session: &ResourceSession,
    ) -> Result<Page<E::Model>, ApiError> {
        let descriptor = &*self.descriptor;
        self.hooks.before_get(ctx, session).await?;
        let ctx = &*ctx;
        let plan = body::path_scope(descriptor, &ctx.path, QueryPlan::new())?;
        let (plan, mut consumed) = filtering::apply_attr_map(descriptor, &ctx.params, plan)?;
        let scoped = self.hooks.get_filter(ctx, session, plan).await?;
        consumed.extend(scoped.consumed);
        let plan = filtering::complete_plan(descriptor, &ctx.params, &consumed, scoped.plan)?;
        tracing::debug!(resource = descriptor.name(), plan = ?plan, "Executing collection query");

        let models = plan.select().all(session.connection()).await?;
        let total = if pagination::is_requested(&ctx.params) {
            Some(plan.filtered().count(session.connection()).await?)
        } else {
            None
        };
        Ok(Page {
            models,
            offset: plan.offset,
            total,
        })
    }

    /// POST on the collection. An array body (where the resource accepts one) creates
    /// every item in one transaction and is answered with an array in input order.
    ///
    /// # Errors
    /// Admission failures, `ValidationFailed` for the body (prefixed with the item index
    /// for arrays), storage conflicts.
    pub async fn create(&self, mut ctx: OperationContext) -> Result<Reply, ApiError> {
        let descriptor = &*self.descriptor;
        hooks::admit(descriptor, descriptor.collection_methods(), &mut ctx).await?;
        let fields = self.visible_fields(&ctx)?;
        let posted = parse_post(descriptor, ctx.body.as_ref())?;

        let session = ResourceSession::begin(&self.db, descriptor.name()).await?;
        let outcome = match &posted {
            PostBody::One(values) => self.create_in(&ctx, &session, values).await.map(|m| vec![m]),
            PostBody::Many(entries) => self.create_each(&ctx, &session, entries, POST_ENTRY).await,
        };
        let models = session.release(outcome).await?;

        for model in &models {
            hooks::settle(
                descriptor.name(),
                "after_post",
                self.hooks.after_post(&ctx, model).await,
            );
        }
        let body = match posted {
            PostBody::One(_) => models
                .first()
                .map(|model| projection::project(descriptor.attributes(), model, &fields))
                .ok_or_else(|| ApiError::programming("insert returned no instance"))?,
            PostBody::Many(_) => projection::project_all(descriptor.attributes(), &models, &fields),
        };
        Ok(Reply::json(StatusCode::CREATED, body))
    }

    /// Build a new instance from a body, POST defaults and the path scope.
    fn new_instance(
        &self,
        ctx: &OperationContext,
        values: &Map<String, Value>,
    ) -> Result<E::ActiveModel, ApiError> {
        let descriptor = &*self.descriptor;
        let mut model = <E::ActiveModel as ActiveModelBehavior>::new();
        let defaults = self.hooks.defaults(&Method::POST, ctx);
        let errors = body::apply(descriptor, &mut model, values, &defaults, Write::Create);
        body::inject_path(descriptor, &mut model, &ctx.path)?;
        body::validate(descriptor, &model, Write::Create, errors)?;
        Ok(model)
    }

    async fn create_in(
        &self,
        ctx: &OperationContext,
        session: &ResourceSession,
        values: &Map<String, Value>,
    ) -> Result<E::Model, ApiError> {
        let mut model = self.new_instance(ctx, values)?;
        self.hooks.before_post(ctx, session, &mut model).await?;
        tracing::debug!(resource = self.descriptor.name(), "Inserting instance");
        model
            .insert(session.connection())
            .await
            .map_err(|e| classify_db_error(e, Persistence::Write))
    }

    /// PATCH on the collection: every `add` entry creates one instance, all or nothing.
    ///
    /// # Errors
    /// Admission failures, or the first failing entry, prefixed with its index.
    pub async fn bulk_patch(&self, mut ctx: OperationContext) -> Result<Reply, ApiError> {
        let descriptor = &*self.descriptor;
        hooks::admit(descriptor, descriptor.collection_methods(), &mut ctx).await?;
        let fields = self.visible_fields(&ctx)?;
        let entries = parse_patches(ctx.body.as_ref(), descriptor.max_batch_size())?;

        let session = ResourceSession::begin(&self.db, descriptor.name()).await?;
        let outcome = self.create_each(&ctx, &session, &entries, PATCH_ENTRY).await;
        let models = session.release(outcome).await?;

        let body = projection::project_all(descriptor.attributes(), &models, &fields);
        hooks::settle(
            descriptor.name(),
            "after_bulk_patch",
            self.hooks.after_bulk_patch(&ctx, &models).await,
        );
        Ok(Reply::json(StatusCode::OK, body))
    }

    /// Create one instance per entry in the open session; the first failure aborts.
    async fn create_each(
        &self,
        ctx: &OperationContext,
        session: &ResourceSession,
        entries: &[Map<String, Value>],
        label: &str,
    ) -> Result<Vec<E::Model>, ApiError> {
        let mut created = Vec::with_capacity(entries.len());
        for (index, values) in entries.iter().enumerate() {
            let model = self
                .create_in(ctx, session, values)
                .await
                .map_err(|err| at_entry(label, index, err))?;
            created.push(model);
        }
        tracing::debug!(
            resource = self.descriptor.name(),
            count = created.len(),
            "Batch created"
        );
        Ok(created)
    }
}

//! # Resource Pipelines
//!
//! A [`Resource`] binds a [`ResourceDescriptor`], its [`ResourceHooks`] and a database
//! handle. Each call runs one operation end to end: admission (method check,
//! identification, authorization), a [`ResourceSession`], the hook sequence for the
//! verb and projection of the result.
//!
//! ```rust,ignore
//! let descriptor = ResourceDescriptor::<employee::Entity>::builder("employee")
//!     .default_sort(["name"])
//!     .build()?;
//! let employees = Resource::new(descriptor, EmployeeHooks, db);
//!
//! let reply = employees
//!     .collection(OperationContext::new(Method::GET).with_param("name__contains", "John"))
//!     .await?;
//! ```

pub mod body;
pub mod collection;
pub mod descriptor;
pub mod hooks;
pub mod session;
pub mod single;

use axum::http::{HeaderMap, StatusCode};
use sea_orm::{ActiveModelBehavior, ActiveModelTrait, DatabaseConnection, EntityTrait, IntoActiveModel};
use std::sync::Arc;

pub use descriptor::{Attribute, ParamFilter, PostType, ResourceDescriptor, ResourceDescriptorBuilder};
pub use hooks::{Deletion, NoHooks, ResourceHooks, Scoped};
pub use session::ResourceSession;

use crate::{ApiError, OperationContext};

/// An entity the pipelines can serve.
///
/// Implemented for every sea-orm entity whose models can be written back through
/// their active model and shared across the hook calls of one request.
pub trait CrudEntity:
    EntityTrait<
        Model: IntoActiveModel<<Self as EntityTrait>::ActiveModel> + Send + Sync,
        ActiveModel: ActiveModelTrait<Entity = Self> + ActiveModelBehavior + Send + Sync,
    >
{
}

impl<E> CrudEntity for E where
    E: EntityTrait<
            Model: IntoActiveModel<<E as EntityTrait>::ActiveModel> + Send + Sync,
            ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync,
        >
{
}

/// The outcome of a successful operation, ready for the serving layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

impl Reply {
    #[must_use]
    pub fn json(status: StatusCode, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Some(body),
        }
    }

    #[must_use]
    pub fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }
}

pub struct Resource<E: CrudEntity> {
    descriptor: Arc<ResourceDescriptor<E>>,
    hooks: Arc<dyn ResourceHooks<E>>,
    db: DatabaseConnection,
}

impl<E: CrudEntity> Clone for Resource<E> {
    fn clone(&self) -> Self {
        Self {
            descriptor: Arc::clone(&self.descriptor),
            hooks: Arc::clone(&self.hooks),
            db: self.db.clone(),
        }
    }
}

impl<E: CrudEntity> Resource<E> {
    pub fn new<H>(descriptor: ResourceDescriptor<E>, hooks: H, db: DatabaseConnection) -> Self
    where
        H: ResourceHooks<E> + 'static,
    {
        Self {
            descriptor: Arc::new(descriptor),
            hooks: Arc::new(hooks),
            db,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &ResourceDescriptor<E> {
        &self.descriptor
    }

    /// Dispatch a collection request on its method.
    ///
    /// # Errors
    /// Any [`ApiError`] the pipeline produces, `MethodNotAllowed` included.
    pub async fn collection(&self, ctx: OperationContext) -> Result<Reply, ApiError> {
        match ctx.method.as_str() {
            "GET" => self.search(ctx).await,
            "POST" => self.create(ctx).await,
            "PATCH" => self.bulk_patch(ctx).await,
            _ => Err(ApiError::method_not_allowed(
                ctx.method,
                self.descriptor.collection_methods(),
            )),
        }
    }

    /// Dispatch a single-item request on its method.
    ///
    /// # Errors
    /// Any [`ApiError`] the pipeline produces, `MethodNotAllowed` included.
    pub async fn item(&self, ctx: OperationContext) -> Result<Reply, ApiError> {
        match ctx.method.as_str() {
            "GET" => self.fetch(ctx).await,
            "PUT" => self.replace(ctx).await,
            "PATCH" => self.update(ctx).await,
            "DELETE" => self.remove(ctx).await,
            _ => Err(ApiError::method_not_allowed(
                ctx.method,
                self.descriptor.item_methods(),
            )),
        }
    }

    /// Visible fields for this request, in declared order.
    fn visible_fields(&self, ctx: &OperationContext) -> Result<Vec<String>, ApiError> {
        match self.hooks.response_fields(ctx) {
            Some(requested) => self.descriptor.resolve_fields(&requested),
            None => Ok(self.descriptor.fields().to_vec()),
        }
    }
}

//! Employee directory served by autocrud
//!
//! ```bash
//! cargo run --example employees
//! ```
//!
//! Then try:
//! - <http://localhost:3000/employees?__sort=-salary&__limit=5>
//! - <http://localhost:3000/companies/1/staff>
//! - <http://localhost:3000/openapi.json>

use async_trait::async_trait;
use autocrud::{
    ApiError, Authorizer, Deletion, ErrorBody, Identifier, Identity, ListParams,
    OperationContext, PatchDocument, PatchOperation, QueryPlan, Resource, ResourceDescriptor,
    ResourceHooks, ResourceSession, Scoped,
};
use axum::{Json, Router, http::Method, routing::get};
use sea_orm::{
    ActiveModelTrait, Condition, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    Schema, Set, entity::prelude::*,
};
use std::{env, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "employees")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub salary: Option<i32>,
    pub company_id: Option<i32>,
    pub owner: Option<String>,
    pub deleted: Option<bool>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}
impl ActiveModelBehavior for ActiveModel {}

/// Soft delete, and the caller owns what they hire.
struct EmployeeHooks;

#[async_trait]
impl ResourceHooks<Entity> for EmployeeHooks {
    async fn get_filter(
        &self,
        _ctx: &OperationContext,
        _session: &ResourceSession,
        plan: QueryPlan<Entity>,
    ) -> Result<Scoped<Entity>, ApiError> {
        Ok(Scoped::new(plan.filter(Column::Deleted.is_null())))
    }

    async fn before_post(
        &self,
        ctx: &OperationContext,
        _session: &ResourceSession,
        model: &mut ActiveModel,
    ) -> Result<(), ApiError> {
        if let Some(identity) = &ctx.identity {
            model.owner = Set(Some(identity.subject.clone()));
        }
        Ok(())
    }

    async fn patch_precondition(
        &self,
        ctx: &OperationContext,
        plan: QueryPlan<Entity>,
    ) -> Result<QueryPlan<Entity>, ApiError> {
        let subject = ctx.identity.as_ref().map(|i| i.subject.clone());
        Ok(plan.filter(
            Condition::any()
                .add(Column::Owner.is_null())
                .add(Column::Owner.eq(subject)),
        ))
    }

    async fn mark_deleted(
        &self,
        _ctx: &OperationContext,
        model: &mut ActiveModel,
    ) -> Result<Deletion, ApiError> {
        model.deleted = Set(Some(true));
        Ok(Deletion::Marked)
    }

    async fn after_delete(&self, ctx: &OperationContext, model: &Model) -> Result<(), ApiError> {
        tracing::info!(employee = model.id, by = ?ctx.identity, "Employee retired");
        Ok(())
    }
}

/// Trusts the `x-user` header. Anonymous callers may only read.
struct HeaderIdentifier;

#[async_trait]
impl Identifier for HeaderIdentifier {
    async fn identify(&self, ctx: &OperationContext) -> Result<Identity, ApiError> {
        ctx.headers
            .get("x-user")
            .and_then(|v| v.to_str().ok())
            .map(Identity::new)
            .ok_or_else(|| ApiError::unauthorized("Send an x-user header to make changes"))
    }
}

struct NotAnonymous;

#[async_trait]
impl Authorizer for NotAnonymous {
    async fn authorize(&self, ctx: &OperationContext) -> Result<(), ApiError> {
        match &ctx.identity {
            Some(identity) if identity.subject != "anonymous" => Ok(()),
            _ => Err(ApiError::forbidden("Anonymous users cannot change employees")),
        }
    }
}

#[derive(OpenApi)]
#[openapi(components(schemas(ListParams, PatchDocument, PatchOperation, ErrorBody)))]
struct ApiDoc;

async fn setup(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let stmt = Schema::new(backend)
        .create_table_from_entity(Entity)
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&stmt)).await?;

    for (name, salary, company) in [("Ann", 300, 1), ("Bob", 100, 1), ("John", 200, 2)] {
        ActiveModel {
            name: Set(name.to_string()),
            salary: Set(Some(salary)),
            company_id: Set(Some(company)),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,autocrud=debug")),
        )
        .init();

    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
    let mut options = ConnectOptions::new(database_url);
    options.sqlx_logging(false);
    if options.get_url().starts_with("sqlite::memory:") {
        options.max_connections(1).min_connections(1);
    }
    let db = Database::connect(options).await?;
    setup(&db).await?;

    let writes = [Method::POST, Method::PUT, Method::PATCH, Method::DELETE];
    let employees = ResourceDescriptor::<Entity>::builder("employees")
        .default_sort(["name"])
        .identifier_for(&writes, Arc::new(HeaderIdentifier))
        .authorizer_for(&writes, Arc::new(NotAnonymous))
        .allow_put_insert(true)
        .build()?;
    let staff = ResourceDescriptor::<Entity>::builder("staff")
        .collection_methods(&[Method::GET, Method::POST])
        .path_param("company_id", "company_id")
        .path_param("id", "id")
        .fields(["id", "name"])
        .build()?;

    let app = Router::new()
        .nest(
            "/employees",
            autocrud::router(Resource::new(employees, EmployeeHooks, db.clone())),
        )
        .nest(
            "/companies/{company_id}/staff",
            autocrud::router(Resource::new(staff, EmployeeHooks, db)),
        )
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!("Serving employees on http://0.0.0.0:3000/employees");
    axum::serve(listener, app).await?;
    Ok(())
}

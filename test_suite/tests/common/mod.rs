//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use autocrud::{OperationContext, Reply};
use axum::http::Method;
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr,
    Schema, Set,
};
use serde_json::Value;

pub mod employee {
    use sea_orm::entity::prelude::*;

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
}

// Helper function to get database URL from environment or default to SQLite
fn test_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string())
}

pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(test_database_url());
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;

    let backend = db.get_database_backend();
    db.execute_unprepared("DROP TABLE IF EXISTS employees").await?;
    let stmt = Schema::new(backend).create_table_from_entity(employee::Entity);
    db.execute(backend.build(&stmt)).await?;
    Ok(db)
}

/// Insert one employee directly, bypassing the pipelines.
pub async fn insert_employee(
    db: &DatabaseConnection,
    name: &str,
    salary: Option<i32>,
    company_id: Option<i32>,
) -> employee::Model {
    employee::ActiveModel {
        name: Set(name.to_string()),
        salary: Set(salary),
        company_id: Set(company_id),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to insert employee")
}

/// Twelve employees with distinct salaries; every third one has no company.
pub async fn seed_staff(db: &DatabaseConnection) -> Vec<employee::Model> {
    let names = ["Ann", "Bob", "John", "Johnny", "Mary", "Bob"];
    let mut staff = Vec::new();
    for i in 0..12 {
        let name = names[i % names.len()];
        let company = if i % 3 == 0 { None } else { Some(1 + (i as i32 % 2)) };
        staff.push(insert_employee(db, name, Some(1000 + 100 * i as i32), company).await);
    }
    staff
}

pub fn get(params: &[(&str, &str)]) -> OperationContext {
    params
        .iter()
        .fold(OperationContext::new(Method::GET), |ctx, (k, v)| ctx.with_param(*k, *v))
}

pub fn item(method: Method, id: i32) -> OperationContext {
    OperationContext::new(method).with_path("id", id.to_string())
}

pub fn rows(reply: &Reply) -> Vec<Value> {
    reply
        .body
        .as_ref()
        .and_then(Value::as_array)
        .cloned()
        .expect("reply body is an array")
}

pub fn column<'a>(rows: &'a [Value], name: &str) -> Vec<&'a Value> {
    rows.iter().map(|row| &row[name]).collect()
}

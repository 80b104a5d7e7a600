//! Hook dispatch: ordering, scoping, soft delete, preconditions and admission.

mod common;

use async_trait::async_trait;
use autocrud::{
    ApiError, Authorizer, Deletion, ErrorKind, Identifier, Identity, NoHooks, OperationContext,
    PostType, QueryPlan, Resource, ResourceDescriptor, ResourceHooks, ResourceSession, Scoped,
};
use axum::http::{Method, StatusCode};
use common::{column, employee, get, insert_employee, item, rows, setup_test_db};
use sea_orm::{ActiveValue, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, Set};
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex};

fn descriptor() -> ResourceDescriptor<employee::Entity> {
    ResourceDescriptor::builder("employees")
        .default_sort(["id"])
        .build()
        .expect("valid descriptor")
}

// ============================================================================
// SOFT DELETE
// ============================================================================

struct SoftDelete;

#[async_trait]
impl ResourceHooks<employee::Entity> for SoftDelete {
    async fn get_filter(
        &self,
        _ctx: &OperationContext,
        _session: &ResourceSession,
        plan: QueryPlan<employee::Entity>,
    ) -> Result<Scoped<employee::Entity>, ApiError> {
        Ok(Scoped::new(plan.filter(employee::Column::Deleted.is_null())))
    }

    async fn mark_deleted(
        &self,
        _ctx: &OperationContext,
        model: &mut employee::ActiveModel,
    ) -> Result<Deletion, ApiError> {
        model.deleted = Set(Some(true));
        Ok(Deletion::Marked)
    }
}

#[tokio::test]
async fn test_soft_delete_hides_but_keeps_the_row() {
    let db = setup_test_db().await.unwrap();
    let jim = insert_employee(&db, "Jim", None, None).await;
    insert_employee(&db, "Bob", None, None).await;
    let filtered = Resource::new(descriptor(), SoftDelete, db.clone());
    let unfiltered = Resource::new(descriptor(), NoHooks, db.clone());

    let reply = filtered.item(item(Method::DELETE, jim.id)).await.unwrap();
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let stored = employee::Entity::find_by_id(jim.id).one(&db).await.unwrap();
    assert_eq!(stored.unwrap().deleted, Some(true));

    let listed = rows(&filtered.collection(get(&[])).await.unwrap());
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["name"], "Bob");

    let err = filtered.item(item(Method::GET, jim.id)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let reply = unfiltered.item(item(Method::GET, jim.id)).await.unwrap();
    assert_eq!(reply.body.unwrap()["deleted"], true);
}

// ============================================================================
// PRECONDITIONS
// ============================================================================

struct Unowned;

#[async_trait]
impl ResourceHooks<employee::Entity> for Unowned {
    async fn patch_precondition(
        &self,
        _ctx: &OperationContext,
        plan: QueryPlan<employee::Entity>,
    ) -> Result<QueryPlan<employee::Entity>, ApiError> {
        Ok(plan.filter(employee::Column::Owner.is_null()))
    }

    async fn delete_precondition(
        &self,
        _ctx: &OperationContext,
        plan: QueryPlan<employee::Entity>,
    ) -> Result<QueryPlan<employee::Entity>, ApiError> {
        Ok(plan.filter(employee::Column::Owner.is_null()))
    }
}

#[tokio::test]
async fn test_patch_precondition_protects_owned_rows() {
    let db = setup_test_db().await.unwrap();
    let resource = Resource::new(descriptor(), Unowned, db.clone());
    let jim = insert_employee(&db, "Jim", None, None).await;

    resource
        .item(item(Method::PATCH, jim.id).with_body(json!({"owner": "ann"})))
        .await
        .unwrap();

    let err = resource
        .item(item(Method::PATCH, jim.id).with_body(json!({"owner": "bob"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let stored = employee::Entity::find_by_id(jim.id).one(&db).await.unwrap().unwrap();
    assert_eq!(stored.owner.as_deref(), Some("ann"));

    let err = resource.item(item(Method::DELETE, jim.id)).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(employee::Entity::find().count(&db).await.unwrap(), 1);
}

// ============================================================================
// ORDERING AND ATOMICITY
// ============================================================================

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<&'static str>>,
    fail_before_post: bool,
    fail_after_patch: bool,
}

impl Recorder {
    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn take(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

#[async_trait]
impl ResourceHooks<employee::Entity> for Arc<Recorder> {
    async fn get_filter(
        &self,
        _ctx: &OperationContext,
        _session: &ResourceSession,
        plan: QueryPlan<employee::Entity>,
    ) -> Result<Scoped<employee::Entity>, ApiError> {
        self.record("get_filter");
        Ok(Scoped::new(plan))
    }

    async fn after_get(
        &self,
        _ctx: &OperationContext,
        _models: &[employee::Model],
    ) -> Result<(), ApiError> {
        self.record("after_get");
        Ok(())
    }

    fn defaults(&self, method: &Method, _ctx: &OperationContext) -> Map<String, Value> {
        let mut defaults = Map::new();
        if *method == Method::POST {
            defaults.insert("salary".to_string(), json!(10));
        }
        defaults
    }

    async fn before_post(
        &self,
        ctx: &OperationContext,
        _session: &ResourceSession,
        model: &mut employee::ActiveModel,
    ) -> Result<(), ApiError> {
        self.record("before_post");
        if self.fail_before_post {
            return Err(ApiError::forbidden("Hiring is frozen"));
        }
        if let Some(identity) = &ctx.identity {
            model.owner = Set(Some(identity.subject.clone()));
        }
        Ok(())
    }

    async fn after_post(&self, _ctx: &OperationContext, _model: &employee::Model) -> Result<(), ApiError> {
        self.record("after_post");
        Ok(())
    }

    async fn patch_precondition(
        &self,
        _ctx: &OperationContext,
        plan: QueryPlan<employee::Entity>,
    ) -> Result<QueryPlan<employee::Entity>, ApiError> {
        self.record("patch_precondition");
        Ok(plan)
    }

    async fn modify_patch(
        &self,
        _ctx: &OperationContext,
        model: &mut employee::ActiveModel,
    ) -> Result<(), ApiError> {
        self.record("modify_patch");
        if let ActiveValue::Set(Some(salary)) = model.salary {
            model.salary = Set(Some(salary * 2));
        }
        Ok(())
    }

    async fn before_patch(
        &self,
        _ctx: &OperationContext,
        _session: &ResourceSession,
        _model: &mut employee::ActiveModel,
    ) -> Result<(), ApiError> {
        self.record("before_patch");
        Ok(())
    }

    async fn after_patch(&self, _ctx: &OperationContext, _model: &employee::Model) -> Result<(), ApiError> {
        self.record("after_patch");
        if self.fail_after_patch {
            return Err(ApiError::internal("notification failed", None));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_patch_hook_order() {
    let db = setup_test_db().await.unwrap();
    let recorder = Arc::new(Recorder::default());
    let resource = Resource::new(descriptor(), Arc::clone(&recorder), db.clone());
    let jim = insert_employee(&db, "Jim", Some(100), None).await;

    let reply = resource
        .item(item(Method::PATCH, jim.id).with_body(json!({"salary": 60})))
        .await
        .unwrap();
    assert_eq!(reply.body.unwrap()["salary"], 120);
    assert_eq!(
        recorder.take(),
        [
            "get_filter",
            "patch_precondition",
            "modify_patch",
            "before_patch",
            "after_patch"
        ]
    );
}

#[tokio::test]
async fn test_post_applies_defaults_and_identity() {
    let db = setup_test_db().await.unwrap();
    let recorder = Arc::new(Recorder::default());
    let descriptor = ResourceDescriptor::<employee::Entity>::builder("employees")
        .identifier(Arc::new(HeaderIdentifier))
        .build()
        .unwrap();
    let resource = Resource::new(descriptor, Arc::clone(&recorder), db.clone());

    let reply = resource
        .collection(user("ann", Method::POST).with_body(json!({"name": "Jim"})))
        .await
        .unwrap();
    let body = reply.body.unwrap();
    assert_eq!(body["salary"], 10);
    assert_eq!(body["owner"], "ann");
    assert_eq!(recorder.take(), ["before_post", "after_post"]);

    let reply = resource
        .collection(user("ann", Method::POST).with_body(json!({"name": "Bob", "salary": 7})))
        .await
        .unwrap();
    assert_eq!(reply.body.unwrap()["salary"], 7);
}

#[tokio::test]
async fn test_failing_before_hook_rolls_back() {
    let db = setup_test_db().await.unwrap();
    let recorder = Arc::new(Recorder {
        fail_before_post: true,
        ..Recorder::default()
    });
    let resource = Resource::new(descriptor(), Arc::clone(&recorder), db.clone());

    let err = resource
        .collection(OperationContext::new(Method::PATCH).with_body(json!({"patches": [
            {"op": "add", "path": "/", "value": {"name": "A"}},
        ]})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(recorder.take(), ["before_post"]);
    assert_eq!(employee::Entity::find().count(&db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_failing_after_hook_keeps_the_commit() {
    let db = setup_test_db().await.unwrap();
    let recorder = Arc::new(Recorder {
        fail_after_patch: true,
        ..Recorder::default()
    });
    let resource = Resource::new(descriptor(), Arc::clone(&recorder), db.clone());
    let jim = insert_employee(&db, "Jim", Some(100), None).await;

    let reply = resource
        .item(item(Method::PATCH, jim.id).with_body(json!({"name": "James"})))
        .await
        .unwrap();
    assert_eq!(reply.status, StatusCode::OK);
    let stored = employee::Entity::find_by_id(jim.id).one(&db).await.unwrap().unwrap();
    assert_eq!(stored.name, "James");
}

#[tokio::test]
async fn test_search_hooks_run_once() {
    let db = setup_test_db().await.unwrap();
    let recorder = Arc::new(Recorder::default());
    let resource = Resource::new(descriptor(), Arc::clone(&recorder), db.clone());
    insert_employee(&db, "Jim", None, None).await;

    resource.collection(get(&[])).await.unwrap();
    assert_eq!(recorder.take(), ["get_filter", "after_get"]);
}

// ============================================================================
// PARAMETER CONSUMPTION
// ============================================================================

struct TeamScope;

#[async_trait]
impl ResourceHooks<employee::Entity> for TeamScope {
    async fn get_filter(
        &self,
        ctx: &OperationContext,
        _session: &ResourceSession,
        plan: QueryPlan<employee::Entity>,
    ) -> Result<Scoped<employee::Entity>, ApiError> {
        let Some(team) = ctx.param("team") else {
            return Ok(Scoped::new(plan));
        };
        let company: i32 = team
            .parse()
            .map_err(|_| ApiError::invalid_parameter("team", "expected a team number"))?;
        Ok(Scoped::new(plan.filter(employee::Column::CompanyId.eq(company))).consume("team"))
    }

    fn response_fields(&self, _ctx: &OperationContext) -> Option<Vec<String>> {
        Some(vec!["name".to_string(), "id".to_string()])
    }
}

#[tokio::test]
async fn test_consumed_and_mapped_parameters() {
    let db = setup_test_db().await.unwrap();
    insert_employee(&db, "Jim", Some(100), Some(1)).await;
    insert_employee(&db, "Ann", Some(300), Some(1)).await;
    insert_employee(&db, "Bob", Some(200), Some(2)).await;

    let descriptor = ResourceDescriptor::<employee::Entity>::builder("employees")
        .default_sort(["name"])
        .attr_filter("min_pay", |raw| {
            let floor: i32 = raw
                .parse()
                .map_err(|_| ApiError::invalid_parameter("min_pay", "expected an integer"))?;
            Ok(Condition::all().add(employee::Column::Salary.gte(floor)))
        })
        .build()
        .unwrap();
    let resource = Resource::new(descriptor, TeamScope, db.clone());

    let reply = resource.collection(get(&[("team", "1")])).await.unwrap();
    assert_eq!(rows(&reply), [json!({"id": 2, "name": "Ann"}), json!({"id": 1, "name": "Jim"})]);

    let reply = resource
        .collection(get(&[("team", "1"), ("min_pay", "200")]))
        .await
        .unwrap();
    assert_eq!(rows(&reply), [json!({"id": 2, "name": "Ann"})]);

    let err = resource.collection(get(&[("crew", "1")])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnrecognizedParameter);
}

#[tokio::test]
async fn test_nested_collection_is_scoped_by_path() {
    let db = setup_test_db().await.unwrap();
    insert_employee(&db, "Jim", None, Some(1)).await;
    insert_employee(&db, "Bob", None, Some(2)).await;

    let descriptor = ResourceDescriptor::<employee::Entity>::builder("staff")
        .path_param("company_id", "company_id")
        .build()
        .unwrap();
    let staff = Resource::new(descriptor, NoHooks, db.clone());

    let listed = rows(
        &staff
            .collection(get(&[]).with_path("company_id", "2"))
            .await
            .unwrap(),
    );
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["name"], "Bob");

    let reply = staff
        .collection(
            OperationContext::new(Method::POST)
                .with_path("company_id", "2")
                .with_body(json!({"name": "Eve", "company_id": 1})),
        )
        .await
        .unwrap();
    assert_eq!(reply.body.unwrap()["company_id"], 2);
}

// ============================================================================
// READ HOOKS AND METADATA
// ============================================================================

/// Resolves `/employees/top` to the best paid row, caps listings at two rows and
/// annotates what it returns.
struct Directory;

#[async_trait]
impl ResourceHooks<employee::Entity> for Directory {
    async fn before_get(
        &self,
        ctx: &mut OperationContext,
        session: &ResourceSession,
    ) -> Result<(), ApiError> {
        if ctx.path.get("id").is_some_and(|id| id == "top") {
            let top = employee::Entity::find()
                .filter(employee::Column::Salary.is_not_null())
                .all(session.connection())
                .await?
                .into_iter()
                .max_by_key(|e| e.salary)
                .ok_or_else(|| ApiError::not_found("employees", Some("top".to_string())))?;
            ctx.path.insert("id".to_string(), top.id.to_string());
        }
        if ctx.path.is_empty() && ctx.param("__limit").is_none() {
            ctx.params.insert("__limit".to_string(), "2".to_string());
        }
        Ok(())
    }

    fn resource_meta(&self, _ctx: &OperationContext, model: &employee::Model) -> Option<Map<String, Value>> {
        model
            .salary
            .map(|salary| Map::from_iter([("band".to_string(), json!(salary / 100))]))
    }

    fn meta(&self, ctx: &OperationContext, model: &employee::Model) -> Option<Map<String, Value>> {
        Some(Map::from_iter([
            ("requested".to_string(), json!(ctx.path.get("id"))),
            ("initial".to_string(), json!(model.name.chars().next())),
        ]))
    }
}

#[tokio::test]
async fn test_before_get_rewrites_the_read() {
    let db = setup_test_db().await.unwrap();
    insert_employee(&db, "Jim", Some(100), None).await;
    let ann = insert_employee(&db, "Ann", Some(300), None).await;
    insert_employee(&db, "Bob", Some(200), None).await;
    let resource = Resource::new(descriptor(), Directory, db.clone());

    let reply = resource
        .item(OperationContext::new(Method::GET).with_path("id", "top"))
        .await
        .unwrap();
    let body = reply.body.unwrap();
    assert_eq!(body["id"], ann.id);
    assert_eq!(body["name"], "Ann");

    let reply = resource.collection(get(&[])).await.unwrap();
    assert_eq!(rows(&reply).len(), 2);
    assert_eq!(reply.headers[axum::http::header::CONTENT_RANGE], "employees 0-1/3");

    let reply = resource.collection(get(&[("__limit", "5")])).await.unwrap();
    assert_eq!(rows(&reply).len(), 3);
}

#[tokio::test]
async fn test_meta_is_attached_to_reads() {
    let db = setup_test_db().await.unwrap();
    let jim = insert_employee(&db, "Jim", Some(150), None).await;
    insert_employee(&db, "Ann", None, None).await;
    let resource = Resource::new(descriptor(), Directory, db.clone());

    let listed = rows(&resource.collection(get(&[])).await.unwrap());
    assert_eq!(listed[0]["meta"], json!({"band": 1}));
    assert!(listed[1].get("meta").is_none());

    let reply = resource.item(item(Method::GET, jim.id)).await.unwrap();
    let body = reply.body.unwrap();
    assert_eq!(body["name"], "Jim");
    assert_eq!(body["meta"], json!({"requested": jim.id.to_string(), "initial": "J"}));

    let reply = resource
        .item(item(Method::PATCH, jim.id).with_body(json!({"salary": 10})))
        .await
        .unwrap();
    assert!(reply.body.unwrap().get("meta").is_none());
}

#[tokio::test]
async fn test_array_post_runs_hooks_per_item() {
    let db = setup_test_db().await.unwrap();
    let recorder = Arc::new(Recorder::default());
    let descriptor = ResourceDescriptor::<employee::Entity>::builder("employees")
        .post_types(&[PostType::Object, PostType::Array])
        .build()
        .unwrap();
    let resource = Resource::new(descriptor, Arc::clone(&recorder), db.clone());

    let reply = resource
        .collection(
            OperationContext::new(Method::POST)
                .with_body(json!([{"name": "Jim"}, {"name": "Ann", "salary": 5}])),
        )
        .await
        .unwrap();
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(column(&rows(&reply), "salary"), [&json!(10), &json!(5)]);
    assert_eq!(
        recorder.take(),
        ["before_post", "before_post", "after_post", "after_post"]
    );

    let failing = Arc::new(Recorder {
        fail_before_post: true,
        ..Recorder::default()
    });
    let resource = Resource::new(
        ResourceDescriptor::<employee::Entity>::builder("employees")
            .post_types(&[PostType::Array])
            .build()
            .unwrap(),
        Arc::clone(&failing),
        db.clone(),
    );
    let err = resource
        .collection(OperationContext::new(Method::POST).with_body(json!([{"name": "Eve"}])))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(failing.take(), ["before_post"]);
    assert_eq!(employee::Entity::find().count(&db).await.unwrap(), 2);
}

// ============================================================================
// IDENTIFY AND AUTHORIZE
// ============================================================================

struct HeaderIdentifier;

#[async_trait]
impl Identifier for HeaderIdentifier {
    async fn identify(&self, ctx: &OperationContext) -> Result<Identity, ApiError> {
        ctx.headers
            .get("x-user")
            .and_then(|v| v.to_str().ok())
            .map(Identity::new)
            .ok_or_else(|| ApiError::unauthorized("Missing x-user header"))
    }
}

struct AdminsOnly;

#[async_trait]
impl Authorizer for AdminsOnly {
    async fn authorize(&self, ctx: &OperationContext) -> Result<(), ApiError> {
        match &ctx.identity {
            Some(identity) if identity.subject == "admin" => Ok(()),
            _ => Err(ApiError::forbidden("Only admins may change staff")),
        }
    }
}

fn user(name: &str, method: Method) -> OperationContext {
    let mut headers = axum::http::HeaderMap::new();
    headers.insert("x-user", name.parse().unwrap());
    OperationContext::new(method).with_headers(headers)
}

#[tokio::test]
async fn test_identify_then_authorize_before_storage() {
    let db = setup_test_db().await.unwrap();
    let descriptor = ResourceDescriptor::<employee::Entity>::builder("employees")
        .identifier(Arc::new(HeaderIdentifier))
        .authorizer_for(&[Method::POST, Method::PATCH], Arc::new(AdminsOnly))
        .build()
        .unwrap();
    let resource = Resource::new(descriptor, NoHooks, db.clone());
    let body = json!({"name": "Jim"});

    let err = resource
        .collection(OperationContext::new(Method::POST).with_body(body.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

    let err = resource
        .collection(user("ann", Method::POST).with_body(body.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(employee::Entity::find().count(&db).await.unwrap(), 0);

    resource
        .collection(user("admin", Method::POST).with_body(body))
        .await
        .unwrap();
    let listed = rows(&resource.collection(user("ann", Method::GET)).await.unwrap());
    assert_eq!(listed.len(), 1);
}

//! Axum adapter: mounts a [`Resource`] as `/` (collection) and `/{id}` (item).
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .nest("/employees", autocrud::router(employees))
//!     .nest("/companies/{company_id}/staff", autocrud::router(staff));
//! ```
//!
//! Path parameters of an enclosing route are passed on too, so nested collections are
//! scoped by their parent through the descriptor's path map.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
    routing::any,
};
use std::collections::{BTreeMap, HashMap};

use crate::{
    ApiError, OperationContext,
    core::{CrudEntity, Reply, Resource},
};

type PathParams = Result<Path<HashMap<String, String>>, PathRejection>;
type QueryParams = Result<Query<Vec<(String, String)>>, QueryRejection>;

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        };
        response.headers_mut().extend(self.headers);
        response
    }
}

/// Build the operation context from the pieces axum extracted.
fn context(
    method: Method,
    headers: HeaderMap,
    path: PathParams,
    query: QueryParams,
    body: &Bytes,
) -> Result<OperationContext, ApiError> {
    let path: BTreeMap<String, String> = match path {
        Ok(Path(params)) => params.into_iter().collect(),
        Err(PathRejection::MissingPathParams(_)) => BTreeMap::new(),
        Err(err) => return Err(ApiError::invalid_parameter("path", err.body_text())),
    };
    let Query(pairs) = query.map_err(|err| ApiError::invalid_parameter("query", err.body_text()))?;

    let mut params = BTreeMap::new();
    for (name, value) in pairs {
        if params.contains_key(&name) {
            return Err(ApiError::invalid_parameter(
                name,
                "the parameter may only be given once",
            ));
        }
        params.insert(name, value);
    }

    let mut ctx = OperationContext::new(method).with_headers(headers);
    ctx.path = path;
    ctx.params = params;
    if !body.iter().all(u8::is_ascii_whitespace) {
        let json = serde_json::from_slice(body)
            .map_err(|e| ApiError::invalid_body(format!("Malformed JSON body: {e}")))?;
        ctx.body = Some(json);
    }
    Ok(ctx)
}

async fn collection_handler<E: CrudEntity>(
    State(resource): State<Resource<E>>,
    method: Method,
    headers: HeaderMap,
    path: PathParams,
    query: QueryParams,
    body: Bytes,
) -> Response {
    let ctx = match context(method, headers, path, query, &body) {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };
    resource.collection(ctx).await.into_response()
}

async fn item_handler<E: CrudEntity>(
    State(resource): State<Resource<E>>,
    method: Method,
    headers: HeaderMap,
    path: PathParams,
    query: QueryParams,
    body: Bytes,
) -> Response {
    let ctx = match context(method, headers, path, query, &body) {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };
    resource.item(ctx).await.into_response()
}

/// Router serving one resource. Every method is routed to the pipelines, which answer
/// disallowed verbs with 405 and an `Allow` header.
pub fn router<E: CrudEntity>(resource: Resource<E>) -> Router {
    Router::new()
        .route("/", any(collection_handler::<E>))
        .route("/{id}", any(item_handler::<E>))
        .with_state(resource)
}

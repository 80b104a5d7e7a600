//! # Error Classifier
//!
//! Every failure a pipeline can produce is an [`ApiError`]. Each variant carries a
//! machine-readable [`ErrorKind`], maps to one HTTP status and renders a sanitized,
//! human-readable detail. Storage and unexpected hook failures are logged server-side
//! and surface as a generic internal error; their details never reach the client.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use autocrud::ApiError;
//!
//! async fn authorize(&self, ctx: &OperationContext) -> Result<(), ApiError> {
//!     if ctx.identity.is_none() {
//!         return Err(ApiError::forbidden("Only staff may edit employees"));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! Internal errors are logged with the `tracing` crate when they are turned into a
//! response. Install a subscriber in the application to see them:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt().with_target(false).compact().init();
//! ```

use axum::{
    Json,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use sea_orm::{DbErr, SqlErr};
use serde::Serialize;
use std::fmt;
use utoipa::ToSchema;

/// Machine-readable classification reported alongside every error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnrecognizedParameter,
    InvalidParameter,
    ValidationFailure,
    NotFound,
    Conflict,
    PreconditionFailed,
    Unauthorized,
    Forbidden,
    MethodNotAllowed,
    InternalError,
    Custom,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnrecognizedParameter => "unrecognized_parameter",
            Self::InvalidParameter => "invalid_parameter",
            Self::ValidationFailure => "validation_failure",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::PreconditionFailed => "precondition_failed",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::InternalError => "internal_error",
            Self::Custom => "error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API error type with automatic logging and sanitized responses
#[derive(Debug)]
pub enum ApiError {
    /// 400 - A query parameter names neither an attribute nor a known operator
    UnrecognizedParameter {
        /// The offending parameter name, as sent by the client
        name: String,
    },

    /// 400 - A sort, paging or filter value could not be interpreted
    InvalidParameter {
        name: String,
        message: String,
    },

    /// 422 - The request body does not map onto the model's attributes or types
    ValidationFailed {
        /// User-facing validation errors
        errors: Vec<String>,
    },

    /// 404 - No row matches the identifier within the visible scope
    NotFound {
        /// Resource type (e.g., "employee")
        resource: String,
        /// Optional identifier that wasn't found
        id: Option<String>,
    },

    /// 409 - Storage constraint or precondition rejected the operation
    Conflict {
        message: String,
    },

    /// 412 - A precondition declared by the resource was not met
    PreconditionFailed {
        message: String,
    },

    /// 401 - Identification failed
    Unauthorized {
        message: String,
    },

    /// 403 - Authorization failed
    Forbidden {
        message: String,
    },

    /// 405 - The verb is not in the resource's allowed set
    MethodNotAllowed {
        method: Method,
        allowed: Vec<Method>,
    },

    /// 500 - Database error (details logged, not exposed)
    Database {
        /// User-facing generic message
        message: String,
        /// Internal error (logged, not sent to user)
        internal: DbErr,
    },

    /// 500 - Generic internal error, including unexpected hook failures
    Internal {
        /// User-facing generic message
        message: String,
        /// Internal error details (logged, not sent to user)
        internal: Option<String>,
    },

    /// Custom error with specific status code
    Custom {
        status: StatusCode,
        message: String,
        internal: Option<String>,
    },
}

impl ApiError {
    // ============================================================================
    // Constructors
    // ============================================================================

    pub fn unrecognized_parameter(name: impl Into<String>) -> Self {
        Self::UnrecognizedParameter { name: name.into() }
    }

    pub fn invalid_parameter(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a 422 Validation Failed error
    ///
    /// # Example
    /// ```rust,ignore
    /// return Err(ApiError::validation_failed(vec![
    ///     "name: attribute is required".to_string(),
    /// ]));
    /// ```
    pub fn validation_failed(errors: Vec<String>) -> Self {
        Self::ValidationFailed { errors }
    }

    /// Shorthand for a validation failure with a single message
    pub fn invalid_body(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            errors: vec![message.into()],
        }
    }

    /// Create a 404 Not Found error
    ///
    /// # Example
    /// ```rust,ignore
    /// return Err(ApiError::not_found("employee", Some(id.to_string())));
    /// ```
    pub fn not_found(resource: impl Into<String>, id: Option<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn method_not_allowed(method: Method, allowed: &[Method]) -> Self {
        Self::MethodNotAllowed {
            method,
            allowed: allowed.to_vec(),
        }
    }

    /// Create a 500 Internal Server Error from a database error
    ///
    /// The database error details are logged but NOT sent to the user.
    pub fn database(err: DbErr) -> Self {
        Self::Database {
            message: "A database error occurred".to_string(),
            internal: err,
        }
    }

    /// Create a 500 Internal Server Error with optional details
    ///
    /// # Example
    /// ```rust,ignore
    /// return Err(ApiError::internal("Failed to notify payroll", Some(err.to_string())));
    /// ```
    pub fn internal(message: impl Into<String>, internal: Option<String>) -> Self {
        Self::Internal {
            message: message.into(),
            internal,
        }
    }

    /// Create a custom error with specific status code
    pub fn custom(status: StatusCode, message: impl Into<String>, internal: Option<String>) -> Self {
        Self::Custom {
            status,
            message: message.into(),
            internal,
        }
    }

    /// A declaration problem detected while serving a request.
    pub(crate) fn programming(details: impl Into<String>) -> Self {
        Self::Internal {
            message: "An internal server error occurred".to_string(),
            internal: Some(details.into()),
        }
    }

    // ============================================================================
    // Classification
    // ============================================================================

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnrecognizedParameter { .. } => ErrorKind::UnrecognizedParameter,
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::ValidationFailed { .. } => ErrorKind::ValidationFailure,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::MethodNotAllowed { .. } => ErrorKind::MethodNotAllowed,
            Self::Database { .. } | Self::Internal { .. } => ErrorKind::InternalError,
            Self::Custom { .. } => ErrorKind::Custom,
        }
    }

    /// Get the HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnrecognizedParameter { .. } | Self::InvalidParameter { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Database { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Custom { status, .. } => *status,
        }
    }

    /// Get the user-facing error message (sanitized)
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::UnrecognizedParameter { name } => {
                format!("Unrecognized query parameter '{name}'")
            }
            Self::InvalidParameter { name, message } => {
                format!("Invalid value for parameter '{name}': {message}")
            }
            Self::ValidationFailed { errors } => {
                if errors.len() == 1 {
                    errors[0].clone()
                } else {
                    format!("Validation failed: {}", errors.join(", "))
                }
            }
            Self::NotFound { resource, id } => match id {
                Some(id) => format!("{resource} with ID '{id}' not found"),
                None => format!("{resource} not found"),
            },
            Self::MethodNotAllowed { method, .. } => {
                format!("Method {method} is not allowed on this resource")
            }
            Self::Conflict { message }
            | Self::PreconditionFailed { message }
            | Self::Unauthorized { message }
            | Self::Forbidden { message }
            | Self::Database { message, .. }
            | Self::Internal { message, .. }
            | Self::Custom { message, .. } => message.clone(),
        }
    }

    /// Whether this failure is reported to the client as a generic 5xx.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.kind() == ErrorKind::InternalError
    }

    /// Log internal error details (not sent to user)
    fn log_internal(&self) {
        match self {
            Self::Database { internal, .. } => {
                tracing::error!(error = ?internal, "Database error occurred");
            }
            Self::Internal {
                internal: Some(details),
                ..
            } => {
                tracing::error!(details = %details, "Internal error occurred");
            }
            Self::Custom {
                internal: Some(details),
                status,
                ..
            } => {
                tracing::error!(status = %status, details = %details, "Custom error occurred");
            }
            _ => {
                tracing::debug!(
                    kind = %self.kind(),
                    error = %self.user_message(),
                    status = %self.status_code(),
                    "API error"
                );
            }
        }
    }
}

/// What the failing storage call was doing, so constraint violations read correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Write,
    Delete,
}

/// Classify a storage failure into a protocol-visible outcome.
///
/// **Conversion Rules:**
/// - unique constraint violation → 409 "Unique constraint violated"
/// - foreign key violation on delete → 409 "Other content links to this"
/// - foreign key violation on write → 409 "Referenced content does not exist"
/// - `RecordNotUpdated` → 409, the row changed underneath the operation
/// - `RecordNotFound` → 404
/// - everything else → 500, logged
#[must_use]
pub fn classify_db_error(err: DbErr, during: Persistence) -> ApiError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            return ApiError::conflict("Unique constraint violated");
        }
        Some(SqlErr::ForeignKeyConstraintViolation(_)) => {
            return match during {
                Persistence::Delete => ApiError::conflict("Other content links to this"),
                Persistence::Write => ApiError::conflict("Referenced content does not exist"),
            };
        }
        _ => {}
    }
    match err {
        DbErr::RecordNotUpdated => ApiError::conflict("Resource found but conditions violated"),
        DbErr::RecordNotFound(msg) => {
            let resource = msg.split_whitespace().next().unwrap_or("Resource");
            ApiError::not_found(resource, None)
        }
        other => ApiError::database(other),
    }
}

impl From<DbErr> for ApiError {
    fn from(err: DbErr) -> Self {
        classify_db_error(err, Persistence::Write)
    }
}

/// Error response sent to users (sanitized)
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error kind, e.g. `unrecognized_parameter`
    pub kind: String,
    /// Human-readable detail
    pub error: String,
    /// Individual validation errors, when there are several
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl From<&ApiError> for ErrorBody {
    fn from(err: &ApiError) -> Self {
        match err {
            ApiError::ValidationFailed { errors } => Self {
                kind: err.kind().as_str().to_string(),
                error: "Validation failed".to_string(),
                details: Some(errors.clone()),
            },
            _ => Self {
                kind: err.kind().as_str().to_string(),
                error: err.user_message(),
                details: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log_internal();

        let status = self.status_code();
        let body = ErrorBody::from(&self);
        let mut response = (status, Json(body)).into_response();

        if let Self::MethodNotAllowed { allowed, .. } = &self {
            let allow = allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }

        response
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for ApiError {}

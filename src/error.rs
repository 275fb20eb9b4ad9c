/// Error Handling Module
///
/// Every failure in the auth core maps onto one `AppError`. The variants wrap
/// domain-specific enums so a store error, a token error and a validation
/// failure stay distinguishable all the way up to the HTTP boundary, where
/// they are rendered as structured JSON responses.
///
/// Client-correctable errors (validation, credentials, tokens, authorization)
/// are returned with a descriptive message. Storage, hashing and internal
/// failures are logged with full detail and surfaced only as a generic
/// server error.

use actix_web::{
    error::ResponseError,
    http::{header, StatusCode},
    HttpResponse,
};
use std::collections::BTreeMap;
use std::fmt;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Field-level validation failures, keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a single-field error
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Record an error for `field` unless one is already present.
    /// The first failure for a field wins.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Convert the collector into a result
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(field, message)| format!("{} {}", field, message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Authentication and authorization errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Wrong password or unknown identifier. The two cases are never told apart.
    #[error("invalid authentication credentials")]
    InvalidCredentials,
    #[error("invalid or missing authentication token")]
    InvalidToken,
    #[error("you must be authenticated to access this resource")]
    AuthenticationRequired,
    #[error("your user account must be activated to access this resource")]
    InactiveAccount,
    #[error("your user account doesn't have the necessary permissions to access this resource")]
    NotPermitted,
}

/// Credential store errors
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("a user with this email address already exists")]
    DuplicateEmail,
    #[error("a user with this username already exists")]
    DuplicateUsername,
    #[error("this user already has an active ban")]
    DuplicateBan,
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,
    #[error("the requested resource could not be found")]
    RecordNotFound,
    #[error("storage operation exceeded its deadline")]
    Timeout,
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::RecordNotFound,
            sqlx::Error::Database(db_err) => match db_err.constraint() {
                Some("users_email_key") => DatabaseError::DuplicateEmail,
                Some("users_username_key") => DatabaseError::DuplicateUsername,
                Some("bans_user_id_key") => DatabaseError::DuplicateBan,
                // The user row vanished between lookup and write
                Some("verifications_user_id_fkey") | Some("bans_user_id_fkey") => {
                    DatabaseError::RecordNotFound
                }
                _ => DatabaseError::Storage(db_err.to_string()),
            },
            other => DatabaseError::Storage(other.to_string()),
        }
    }
}

/// Mailer errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmailError {
    #[error("failed to send email: {0}")]
    SendFailed(String),
    #[error("unknown email template: {0}")]
    UnknownTemplate(String),
    #[error("email service returned an error: {0}")]
    ServiceUnavailable(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config: {0}")]
    MissingRequired(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
    #[error("config parse error: {0}")]
    Parse(#[from] config::ConfigError),
}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(#[from] ValidationErrors),
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Database(#[from] DatabaseError),
    #[error("{0}")]
    Email(#[from] EmailError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for failures that are the server's fault rather than the client's
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(DatabaseError::from(err))
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::Hashing(err.to_string())
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response body
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Unique error ID, also written to the server log
    pub error_id: String,
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    pub status: u16,
    pub timestamp: String,
    /// Field-level detail for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
            fields: None,
        }
    }

    pub fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.fields = Some(fields);
        self
    }
}

/// Converting errors to HTTP responses with logging
pub trait ErrorHandler {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, request_id: &str);
}

impl ErrorHandler for AppError {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse) {
        let status = ResponseError::status_code(self);
        let (code, message, fields) = match self {
            AppError::Validation(e) => (
                "VALIDATION_ERROR",
                "the request failed validation".to_string(),
                Some(e.fields().clone()),
            ),

            AppError::Auth(e) => {
                let code = match e {
                    AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
                    AuthError::InvalidToken => "INVALID_TOKEN",
                    AuthError::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
                    AuthError::InactiveAccount => "INACTIVE_ACCOUNT",
                    AuthError::NotPermitted => "NOT_PERMITTED",
                };
                (code, e.to_string(), None)
            }

            AppError::Database(e) => match e {
                DatabaseError::DuplicateEmail => (
                    "DUPLICATE_ENTRY",
                    e.to_string(),
                    Some(ValidationErrors::single("email", e.to_string()).fields().clone()),
                ),
                DatabaseError::DuplicateUsername => (
                    "DUPLICATE_ENTRY",
                    e.to_string(),
                    Some(ValidationErrors::single("username", e.to_string()).fields().clone()),
                ),
                DatabaseError::DuplicateBan => ("DUPLICATE_ENTRY", e.to_string(), None),
                DatabaseError::EditConflict => ("EDIT_CONFLICT", e.to_string(), None),
                DatabaseError::RecordNotFound => ("NOT_FOUND", e.to_string(), None),
                DatabaseError::Timeout | DatabaseError::Storage(_) => (
                    "SERVER_ERROR",
                    "the server encountered a problem and could not process your request"
                        .to_string(),
                    None,
                ),
            },

            AppError::Email(_)
            | AppError::Config(_)
            | AppError::Hashing(_)
            | AppError::Internal(_) => (
                "SERVER_ERROR",
                "the server encountered a problem and could not process your request".to_string(),
                None,
            ),
        };

        let mut body = ErrorResponse::new(
            request_id.to_string(),
            message,
            code.to_string(),
            status.as_u16(),
        );
        if let Some(fields) = fields {
            body = body.with_fields(fields);
        }

        (status, body)
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AppError::Validation(e) => {
                tracing::info!(request_id = request_id, error = %e, "Validation failed");
            }
            AppError::Auth(AuthError::InvalidCredentials) => {
                tracing::warn!(request_id = request_id, "Invalid credentials attempt");
            }
            AppError::Auth(e) => {
                tracing::info!(request_id = request_id, error = %e, "Request rejected");
            }
            AppError::Database(
                e @ (DatabaseError::Timeout | DatabaseError::Storage(_)),
            ) => {
                tracing::error!(request_id = request_id, error = %e, "Storage failure");
            }
            AppError::Database(e) => {
                tracing::info!(request_id = request_id, error = %e, "Database conflict");
            }
            AppError::Email(e) => {
                tracing::error!(request_id = request_id, error = %e, "Email service error");
            }
            AppError::Config(e) => {
                tracing::error!(request_id = request_id, error = %e, "Configuration error");
            }
            AppError::Hashing(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Hashing failure");
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Internal error");
            }
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&request_id);

        let (status, body) = <Self as ErrorHandler>::error_response(self, &request_id);

        let mut response = HttpResponse::build(status);
        if matches!(self, AppError::Auth(AuthError::InvalidToken)) {
            response.insert_header((header::WWW_AUTHENTICATE, "Bearer"));
        }
        response.json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Auth(e) => match e {
                AuthError::InvalidCredentials
                | AuthError::InvalidToken
                | AuthError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
                AuthError::InactiveAccount | AuthError::NotPermitted => StatusCode::FORBIDDEN,
            },
            AppError::Database(e) => match e {
                DatabaseError::DuplicateEmail
                | DatabaseError::DuplicateUsername
                | DatabaseError::DuplicateBan
                | DatabaseError::EditConflict => StatusCode::CONFLICT,
                DatabaseError::RecordNotFound => StatusCode::NOT_FOUND,
                DatabaseError::Timeout | DatabaseError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AppError::Email(_)
            | AppError::Config(_)
            | AppError::Hashing(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ============================================================================
// 4. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Per-operation context for structured logging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub user_id: Option<i64>,
    pub operation: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            operation: operation.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn log_error(&self, error: &AppError) {
        if error.is_server_error() {
            tracing::error!(
                request_id = %self.request_id,
                operation = %self.operation,
                user_id = ?self.user_id,
                error = %error,
                "Operation failed"
            );
        } else {
            tracing::info!(
                request_id = %self.request_id,
                operation = %self.operation,
                user_id = ?self.user_id,
                error = %error,
                "Operation rejected"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_keep_first_message_per_field() {
        let mut errors = ValidationErrors::new();
        errors.add("email", "must be provided");
        errors.add("email", "must be a valid email address");
        errors.add("password", "must be at least 8 bytes long");

        assert_eq!(errors.get("email"), Some("must be provided"));
        assert_eq!(errors.fields().len(), 2);
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn test_empty_validation_errors_are_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_status_codes() {
        let cases = vec![
            (AppError::from(ValidationErrors::single("email", "bad")), 422),
            (AppError::from(AuthError::InvalidCredentials), 401),
            (AppError::from(AuthError::InvalidToken), 401),
            (AppError::from(AuthError::AuthenticationRequired), 401),
            (AppError::from(AuthError::InactiveAccount), 403),
            (AppError::from(AuthError::NotPermitted), 403),
            (AppError::from(DatabaseError::DuplicateEmail), 409),
            (AppError::from(DatabaseError::EditConflict), 409),
            (AppError::from(DatabaseError::RecordNotFound), 404),
            (AppError::from(DatabaseError::Timeout), 500),
            (AppError::Hashing("boom".to_string()), 500),
        ];

        for (error, expected) in cases {
            assert_eq!(ResponseError::status_code(&error).as_u16(), expected, "{:?}", error);
        }
    }

    #[test]
    fn test_storage_failure_does_not_leak_detail() {
        let error = AppError::from(DatabaseError::Storage(
            "relation \"users\" does not exist".to_string(),
        ));
        let (_, body) = ErrorHandler::error_response(&error, "req-1");

        assert_eq!(body.code, "SERVER_ERROR");
        assert!(!body.message.contains("relation"));
        assert_eq!(body.error_id, "req-1");
    }

    #[test]
    fn test_duplicate_username_names_the_field() {
        let error = AppError::from(DatabaseError::DuplicateUsername);
        let (status, body) = ErrorHandler::error_response(&error, "req-2");

        assert_eq!(status, StatusCode::CONFLICT);
        let fields = body.fields.expect("duplicate errors carry field detail");
        assert!(fields.contains_key("username"));
    }

    #[test]
    fn test_invalid_token_sets_www_authenticate() {
        let response = ResponseError::error_response(&AppError::from(AuthError::InvalidToken));
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[test]
    fn test_error_context_creation() {
        let ctx = ErrorContext::new("user_login");
        assert_eq!(ctx.operation, "user_login");
        assert!(ctx.user_id.is_none());

        let ctx = ctx.with_user_id(42);
        assert_eq!(ctx.user_id, Some(42));
    }
}

use axum::http::StatusCode;
use thiserror::Error;

use crate::model::WorkflowError;
use crate::store::DbError;

pub const DEFAULT_ERROR_MESSAGE: &str =
    "An error occurred while processing your request. Please notify us.";

/// Closed set of HTTP-facing error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoPermissions,
    NotFound,
    BadRequest,
    MethodNotAllowed,
    TooManyRequests,
    InternalServerError,
    Unauthorized,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::NoPermissions,
        ErrorKind::NotFound,
        ErrorKind::BadRequest,
        ErrorKind::MethodNotAllowed,
        ErrorKind::TooManyRequests,
        ErrorKind::InternalServerError,
        ErrorKind::Unauthorized,
    ];

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::NoPermissions => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::NoPermissions => "You do not have permissions to access this resource.",
            ErrorKind::NotFound => "The requested resource does not exist.",
            ErrorKind::BadRequest => "Your request could not be processed.",
            ErrorKind::MethodNotAllowed => "This method is not allowed for the requested URL.",
            ErrorKind::TooManyRequests => "Too many requests. Please try again later.",
            ErrorKind::InternalServerError => DEFAULT_ERROR_MESSAGE,
            ErrorKind::Unauthorized => "You need to log in to access this page.",
        }
    }
}

/// Every error a dispatched handler can surface
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    NoPermissions(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    MethodNotAllowed(String),
    #[error("{0}")]
    TooManyRequests(String),
    #[error("{0}")]
    InternalServerError(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Unexpected(anyhow::Error),
}

impl ServerError {
    pub fn new(kind: ErrorKind) -> Self {
        Self::with_message(kind, kind.default_message())
    }

    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::NoPermissions => ServerError::NoPermissions(message),
            ErrorKind::NotFound => ServerError::NotFound(message),
            ErrorKind::BadRequest => ServerError::BadRequest(message),
            ErrorKind::MethodNotAllowed => ServerError::MethodNotAllowed(message),
            ErrorKind::TooManyRequests => ServerError::TooManyRequests(message),
            ErrorKind::InternalServerError => ServerError::InternalServerError(message),
            ErrorKind::Unauthorized => ServerError::Unauthorized(message),
        }
    }

    pub fn no_permissions() -> Self {
        Self::new(ErrorKind::NoPermissions)
    }

    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound)
    }

    pub fn bad_request() -> Self {
        Self::new(ErrorKind::BadRequest)
    }

    pub fn internal() -> Self {
        Self::new(ErrorKind::InternalServerError)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::NoPermissions(_) => ErrorKind::NoPermissions,
            ServerError::NotFound(_) => ErrorKind::NotFound,
            ServerError::BadRequest(_) => ErrorKind::BadRequest,
            ServerError::MethodNotAllowed(_) => ErrorKind::MethodNotAllowed,
            ServerError::TooManyRequests(_) => ErrorKind::TooManyRequests,
            ServerError::InternalServerError(_) => ErrorKind::InternalServerError,
            ServerError::Unauthorized(_) => ErrorKind::Unauthorized,
            ServerError::Db(e) => match e {
                DbError::ElementDoesNotExist(_) | DbError::LinkDoesNotExist(_) => {
                    ErrorKind::NotFound
                }
                DbError::LinkAlreadyExists(_) => ErrorKind::BadRequest,
                DbError::Generic(_) => ErrorKind::InternalServerError,
            },
            ServerError::Unexpected(_) => ErrorKind::InternalServerError,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.kind().status()
    }

    /// False for errors that did not originate from the taxonomy
    pub fn is_recognised(&self) -> bool {
        !matches!(self, ServerError::Unexpected(_))
    }

    /// Message safe to show to the caller
    pub fn user_message(&self) -> String {
        match self {
            ServerError::Unexpected(_) => DEFAULT_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    /// Label used in the error log block
    pub fn log_label(&self) -> &'static str {
        match self {
            ServerError::InternalServerError(_) => "InternalServerErrorException",
            ServerError::Db(_) => "OpeNGSyncDBException",
            ServerError::Unexpected(_) => "Exception",
            _ => "OpeNGSyncServerException",
        }
    }
}

impl From<WorkflowError> for ServerError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::NotFound { .. } => ServerError::NotFound(e.to_string()),
            WorkflowError::Conflict { .. } => ServerError::BadRequest(
                "This form was changed in another window. Please reload and try again.".to_string(),
            ),
            WorkflowError::Completed(_)
            | WorkflowError::MissingTable(_)
            | WorkflowError::MissingReference(_)
            | WorkflowError::NoSteps(_)
            | WorkflowError::Table(_) => ServerError::InternalServerError(e.to_string()),
        }
    }
}

impl From<CoercionError> for ServerError {
    fn from(_: CoercionError) -> Self {
        ServerError::BadRequest("Invalid query parameters".to_string())
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        let e = match e.downcast::<ServerError>() {
            Ok(server) => return server,
            Err(e) => e,
        };
        let e = match e.downcast::<DbError>() {
            Ok(db) => return ServerError::Db(db),
            Err(e) => e,
        };
        match e.downcast::<WorkflowError>() {
            Ok(workflow) => workflow.into(),
            Err(e) => ServerError::Unexpected(e),
        }
    }
}

/// Handler registration failures; the router refuses to build
#[derive(Debug, Error, PartialEq)]
pub enum RouteError {
    #[error("route '{route}': unsupported type for path parameter '{param}': {ty}")]
    UnsupportedType {
        route: String,
        param: String,
        ty: String,
    },
    #[error("route '{route}': literal parameter '{param}' must be all integers or all strings")]
    UnsupportedLiteral { route: String, param: String },
    #[error("route '{route}': path parameter '{param}' must be the last path segment")]
    PathNotLast { route: String, param: String },
    #[error("route '{route}': parameter '{param}' is declared twice")]
    DuplicateParameter { route: String, param: String },
    #[error("route '{route}': '{param}' is listed as a request field but not declared")]
    UnknownParameter { route: String, param: String },
    #[error("route '{0}' requires current_user but login_required is false")]
    CurrentUserWithoutLogin(String),
    #[error("route '{0}': a database must be used if login_required is true")]
    LoginWithoutDatabase(String),
    #[error("route '{0}': API tokens are only supported on api routes that use the database")]
    TokenOutsideApi(String),
    #[error("route '{route}': method {method} is not supported by {flavor} routes")]
    UnsupportedMethod {
        route: String,
        method: String,
        flavor: &'static str,
    },
    #[error("route '{route}': cache type '{cache_type}' is not supported by {flavor} routes")]
    UnsupportedCacheType {
        route: String,
        cache_type: &'static str,
        flavor: &'static str,
    },
    #[error("route '{route}': invalid rate limit '{expr}'")]
    InvalidLimit { route: String, expr: String },
}

/// A request value that could not be turned into the declared type
#[derive(Debug, Error, PartialEq)]
pub enum CoercionError {
    #[error("missing required argument: {0}")]
    Missing(String),
    #[error("argument '{name}': '{value}' is not an integer")]
    InvalidInt { name: String, value: String },
    #[error("argument '{name}': '{value}' is not one of the allowed values")]
    NotAllowed { name: String, value: String },
    #[error("argument '{name}': expected {expected}")]
    UnexpectedType { name: String, expected: &'static str },
    #[error("argument '{name}': invalid JSON object: {reason}")]
    InvalidDict { name: String, reason: String },
}

//! Error type shared by all routes, and its mapping onto HTTP responses.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use rocket::http::{ContentType, Status};
use rocket::response::{self, Responder, Response};
use rocket::serde::json::{json, Value};
use rocket::Request;
use std::io::Cursor;
use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or inconsistent input (400)
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid credentials (401)
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but not allowed (403)
    #[error("{0}")]
    Forbidden(String),

    /// Unknown row, or a row of another workspace (404)
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Request clashes with the current state of a row (409)
    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(DieselError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::Validation(_) => Status::BadRequest,
            ApiError::Unauthorized(_) => Status::Unauthorized,
            ApiError::Forbidden(_) => Status::Forbidden,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Conflict(_) => Status::Conflict,
            ApiError::Database(_) | ApiError::Internal(_) => Status::InternalServerError,
        }
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        ApiError::Conflict(msg.into())
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        ApiError::Forbidden(msg.into())
    }

    /// Turns a missing referenced row into a 400 and leaves every other error alone.
    pub fn unknown_reference<S: Into<String>>(self, msg: S) -> Self {
        match self {
            ApiError::NotFound(_) => ApiError::Validation(msg.into()),
            e => e,
        }
    }
}

impl From<DieselError> for ApiError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::NotFound => ApiError::NotFound("record"),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                ApiError::Conflict(format!("duplicate entry: {}", info.message()))
            }
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                ApiError::Validation(format!("invalid reference: {}", info.message()))
            }
            e => ApiError::Database(e),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Validation(format!("invalid JSON: {}", e))
    }
}

/// The JSON body every error response carries, also used by the catchers.
pub fn error_body(status: Status, message: &str) -> Value {
    json!({
        "error": message,
        "status": status.code,
    })
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if status == Status::InternalServerError {
            error!("{} {}: {}", req.method(), req.uri(), self);
        } else {
            debug!("{} {}: {} ({})", req.method(), req.uri(), self, status.code);
        }

        // don't leak SQL details to clients
        let message = match &self {
            ApiError::Database(_) => String::from("internal database error"),
            e => e.to_string(),
        };
        let body = error_body(status, &message).to_string();
        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

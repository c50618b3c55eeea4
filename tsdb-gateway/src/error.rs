//! Gateway error taxonomy and its HTTP mapping.
//!
//! Every failure a request can end in is one [`GatewayError`]. The status
//! code and the `{"errors": [...]}` body are decided here and nowhere else.

use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
};
use model::ParseError;
use serde_json::json;
use thiserror::Error;

use crate::gate::RequestClass;

pub const JSON_UTF8: &str = "application/json; charset=UTF-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ForbiddenByPolicy,
    MalformedInput,
    SyntaxError,
    ValidationError,
    QueryError,
    ResourceExhausted,
    InternalError,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::ForbiddenByPolicy => StatusCode::FORBIDDEN,
            ErrorKind::MalformedInput
            | ErrorKind::SyntaxError
            | ErrorKind::ValidationError
            | ErrorKind::QueryError => StatusCode::BAD_REQUEST,
            ErrorKind::ResourceExhausted | ErrorKind::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Forbidden: {0} API methods are disabled on this instance.")]
    Forbidden(RequestClass),
    /// Undecodable transport: bad compression, unreadable body.
    #[error("{0}")]
    MalformedInput(String),
    #[error("{0}")]
    Syntax(String),
    #[error("{}", .0.join(", "))]
    Validation(Vec<String>),
    #[error("{0}")]
    Query(String),
    #[error("{0}")]
    ResourceExhausted(String),
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Forbidden(_) => ErrorKind::ForbiddenByPolicy,
            GatewayError::MalformedInput(_) => ErrorKind::MalformedInput,
            GatewayError::Syntax(_) => ErrorKind::SyntaxError,
            GatewayError::Validation(_) => ErrorKind::ValidationError,
            GatewayError::Query(_) => ErrorKind::QueryError,
            GatewayError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            GatewayError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Messages for the response body. Validation failures list every
    /// violation; everything else is a single message.
    pub fn messages(&self) -> Vec<String> {
        match self {
            GatewayError::Validation(messages) => messages.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl From<ParseError> for GatewayError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Syntax(msg) => GatewayError::Syntax(msg),
            ParseError::Query(msg) => GatewayError::Query(msg),
            ParseError::Validation(violations) => GatewayError::Validation(violations),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = json!({ "errors": self.messages() }).to_string();
        (self.kind().status(), [(CONTENT_TYPE, JSON_UTF8)], body).into_response()
    }
}

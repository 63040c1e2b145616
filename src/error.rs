//! Error taxonomy — spec §7.
//!
//! The engine itself never raises out of a public operation for an
//! input-shape problem; it returns `None`/`false` (see `Engine::*`). This
//! module is for the *edge*: translating "the caller asked for something
//! that doesn't exist" into an HTTP status, and the one place a fatal
//! startup error (listener bind failure) should log and exit.

use salvo::http::{StatusCode, StatusError};
use salvo::oapi::{self, EndpointOutRegister, ToSchema};
use salvo::prelude::*;
use thiserror::Error;

/// HTTP-edge error surface. Kept small and taxonomy-shaped rather than one
/// variant per failure site, matching spec §7's "by kind, not by type".
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("session not found")]
    SessionNotFound,
    #[error("no signalling server available")]
    NoServerAvailable,
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::NoServerAvailable => StatusCode::OK, // spec: success:false, not a transport error
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Scribe for ApiError {
    fn render(self, res: &mut Response) {
        if let Self::Json(err) = &self {
            tracing::error!(error = ?err, "JSON encode/decode error");
        }
        res.status_code(self.status());
        res.render(Json(crate::edge::ApiEnvelope::<()>::error(self.to_string())));
    }
}

impl EndpointOutRegister for ApiError {
    fn register(components: &mut oapi::Components, operation: &mut oapi::Operation) {
        let responses = [
            (StatusCode::BAD_REQUEST, "Bad request"),
            (StatusCode::NOT_FOUND, "Resource not found"),
            (StatusCode::SERVICE_UNAVAILABLE, "No signalling server available"),
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        ];
        for (status, description) in responses {
            operation.responses.insert(
                status.as_str(),
                oapi::Response::new(description)
                    .add_content("application/json", StatusError::to_schema(components)),
            );
        }
    }
}

/// *Fatal* errors per spec §7: inability to bind a listening port, or an
/// unhandled error in the shutdown path. Logged with full context, then the
/// process exits with code 1.
pub fn exit_fatal(context: &str, err: impl std::fmt::Display) -> ! {
    tracing::error!(error = %err, "{context}");
    std::process::exit(1);
}

//! JSON envelope of every control response

use axum::http::header;
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{"success": bool, "message": value}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub message: Value,
}

impl Response {
    pub fn new(success: bool, message: impl Into<Value>) -> Self {
        Self {
            success,
            message: message.into(),
        }
    }

    pub fn ok(message: impl Into<Value>) -> Self {
        Self::new(true, message)
    }

    pub fn fail(message: impl Into<Value>) -> Self {
        Self::new(false, message)
    }

    /// Message as text, when it is a string
    pub fn text(&self) -> Option<&str> {
        self.message.as_str()
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> HttpResponse {
        // Worker-level failures travel in the body, never as an HTTP error
        ([(header::CACHE_CONTROL, "no-store")], Json(self)).into_response()
    }
}

//! Dispatch failures and their RFC7807 Problem Details rendering.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every way a single render-then-deliver call can fail.
///
/// Failures are local to one dispatch; none of them is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// A required input was missing or empty.
    #[error("argument '{name}' is missing or empty")]
    InvalidArgument { name: &'static str },

    /// The hub connection was not established through an HTTP upgrade.
    #[error("connection is not associated with an HTTP request")]
    NoAssociatedRequest,

    /// The view engine could not locate the named view.
    #[error("view '{name}' was not found (searched: {})", .searched.join(", "))]
    ViewNotFound { name: String, searched: Vec<String> },

    /// The view was found but failed while producing output.
    #[error("failed to render view '{name}': {message}")]
    RenderError { name: String, message: String },

    /// The realtime transport refused the fragment.
    #[error("failed to deliver fragment: {message}")]
    TransportError { message: String },
}

impl DispatchError {
    pub fn transport(message: impl Into<String>) -> Self {
        DispatchError::TransportError {
            message: message.into(),
        }
    }

    /// HTTP status used when the failure surfaces on the request path.
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::InvalidArgument { .. } => 400,
            DispatchError::TransportError { .. } => 502,
            DispatchError::NoAssociatedRequest
            | DispatchError::ViewNotFound { .. }
            | DispatchError::RenderError { .. } => 500,
        }
    }
}

/// RFC7807 Problem Details (application/problem+json)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type")]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProblemDetails {
    fn new(slug: &str, title: &str, status: u16, detail: impl Into<String>) -> Self {
        Self {
            type_url: format!("https://turbopush.dev/problems/{}", slug),
            title: title.to_string(),
            status,
            detail: Some(detail.into()),
        }
    }
}

impl From<&DispatchError> for ProblemDetails {
    fn from(err: &DispatchError) -> Self {
        let status = err.status_code();
        match err {
            DispatchError::InvalidArgument { .. } => {
                Self::new("invalid-argument", "Bad Request", status, err.to_string())
            }
            DispatchError::NoAssociatedRequest => {
                Self::new("no-associated-request", "Internal Server Error", status, err.to_string())
            }
            DispatchError::ViewNotFound { .. } => {
                Self::new("view-not-found", "Internal Server Error", status, err.to_string())
            }
            DispatchError::RenderError { .. } => {
                Self::new("render-error", "Internal Server Error", status, err.to_string())
            }
            DispatchError::TransportError { .. } => {
                Self::new("transport-error", "Bad Gateway", status, err.to_string())
            }
        }
    }
}

//! Hub wire protocol shared by the server and the client bridge.
//!
//! Every websocket text frame carries exactly one JSON-encoded [`HubMessage`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::RenderedFragment;

/// Client method invoked with each rendered fragment.
pub const RECEIVE_STREAM_ELEMENT: &str = "ReceiveStreamElement";

/// Content type asserted on every fragment returned over the request path.
pub const TURBO_STREAM_CONTENT_TYPE: &str = "text/html; turbo-stream; charset=utf-8";

/// Default path the hub endpoint is mounted on.
pub const DEFAULT_HUB_PATH: &str = "/hubs/turbo-stream";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HubMessage {
    /// Call a named method on the other side.
    #[serde(rename_all = "camelCase")]
    Invocation {
        /// Present when the caller expects a completion.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invocation_id: Option<String>,
        target: String,
        #[serde(default)]
        arguments: Vec<Value>,
    },
    /// Result of an invocation that carried an id.
    #[serde(rename_all = "camelCase")]
    Completion {
        invocation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Ping,
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl HubMessage {
    /// A fire-and-forget invocation.
    pub fn invocation(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        HubMessage::Invocation {
            invocation_id: None,
            target: target.into(),
            arguments,
        }
    }

    /// The message pushed to clients for one rendered fragment.
    pub fn stream_element(fragment: &RenderedFragment) -> Self {
        Self::invocation(
            RECEIVE_STREAM_ELEMENT,
            vec![Value::String(fragment.as_str().to_string())],
        )
    }

    pub fn completion(invocation_id: impl Into<String>, result: Result<(), String>) -> Self {
        HubMessage::Completion {
            invocation_id: invocation_id.into(),
            error: result.err(),
        }
    }
}

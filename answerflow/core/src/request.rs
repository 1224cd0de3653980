//! Negotiation Requests
//!
//! What a caller hands to [`StreamCoordinator::start_stream`]: the request
//! payload (also the JSON body sent to live transports) plus the hooks that
//! never leave the process.
//!
//! [`StreamCoordinator::start_stream`]: crate::StreamCoordinator::start_stream

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::snapshot::StreamSnapshot;

/// Mode used when the caller does not pick one
pub const DEFAULT_MODE: &str = "default";

/// A retrieved knowledge snippet passed as context
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    /// Snippet identifier
    pub id: String,
    /// Document title
    #[serde(default)]
    pub title: String,
    /// Snippet text
    pub content: String,
    /// Where the snippet came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Retrieval score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Reference to an attachment on the question
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Attachment identifier
    pub id: String,
    /// Display name
    pub name: String,
}

/// One "ask the assistant" request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    /// The question
    pub prompt: String,
    /// Answer mode understood by the answer backend
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Conversation the message belongs to
    pub conversation_id: String,
    /// The assistant message being produced
    pub message_id: String,
    /// Retrieved context
    #[serde(default)]
    pub context: Vec<Snippet>,
    /// Attachment descriptors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
}

fn default_mode() -> String {
    DEFAULT_MODE.to_string()
}

impl StreamRequest {
    /// Create a request in the default mode
    pub fn new(
        prompt: impl Into<String>,
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            mode: default_mode(),
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
            context: Vec::new(),
            attachments: Vec::new(),
        }
    }

    /// Set the answer mode
    #[must_use]
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    /// Set the retrieved context
    #[must_use]
    pub fn with_context(mut self, context: Vec<Snippet>) -> Self {
        self.context = context;
        self
    }

    /// Add an attachment reference
    #[must_use]
    pub fn with_attachment(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.attachments.push(AttachmentRef {
            id: id.into(),
            name: name.into(),
        });
        self
    }
}

/// Generate a fresh message id
#[must_use]
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Produces a complete answer when no live transport is available
pub type FallbackResolver =
    Arc<dyn Fn() -> BoxFuture<'static, Result<StreamSnapshot, StreamError>> + Send + Sync>;

/// Receives the terminal error of a negotiation
pub type ErrorCallback = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// In-process hooks accompanying a request
#[derive(Clone)]
pub struct RequestHooks {
    /// Last-resort producer; always required
    pub fallback_resolver: FallbackResolver,
    /// Called when negotiation exhausts or a live stream errors
    pub on_error: Option<ErrorCallback>,
}

impl RequestHooks {
    /// Hooks with a fallback resolver and no error callback
    #[must_use]
    pub fn new(fallback_resolver: FallbackResolver) -> Self {
        Self {
            fallback_resolver,
            on_error: None,
        }
    }

    /// Set the error callback
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for RequestHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHooks")
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_payload_is_camel_case() {
        let request = StreamRequest::new("Why?", "conv-1", "msg-1")
            .with_attachment("a1", "notes.pdf")
            .with_context(vec![Snippet {
                id: "s1".into(),
                title: "Doc".into(),
                content: "Because.".into(),
                source: None,
                score: Some(0.9),
            }]);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["conversationId"], "conv-1");
        assert_eq!(json["messageId"], "msg-1");
        assert_eq!(json["mode"], DEFAULT_MODE);
        assert_eq!(json["attachments"][0]["name"], "notes.pdf");
        assert_eq!(json["context"][0]["score"], 0.9);
    }

    #[test]
    fn test_mode_defaults_when_missing() {
        let request: StreamRequest =
            serde_json::from_str(r#"{"prompt":"p","conversationId":"c","messageId":"m"}"#).unwrap();
        assert_eq!(request.mode, DEFAULT_MODE);
        assert!(request.context.is_empty());
    }

    #[test]
    fn test_message_ids_are_unique() {
        assert_ne!(new_message_id(), new_message_id());
    }
}

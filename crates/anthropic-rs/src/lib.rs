//! Resilient streaming client for the Anthropic Messages API.
//!
//! `anthropic-rs` sends a conversation to the Messages API and returns either
//! one complete [`MessageResponse`] or a lazy stream of typed
//! [`StreamEvent`](api::streaming::StreamEvent)s as the model generates
//! output. Every call runs under the caller's cancellation token, a
//! per-attempt timeout, and exponential-backoff retry of the network send.
//!
//! # Getting started
//!
//! ```ignore
//! use anthropic_rs::prelude::*;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> anthropic_rs::Result<()> {
//!     let client = AnthropicClient::from_env()?;
//!
//!     let request = MessageRequest::new("claude-sonnet-4-5", 1024)
//!         .with_system("You are terse.")
//!         .with_message(Message::user("Name three Rust web frameworks."));
//!
//!     // One-shot.
//!     let reply = client.send(&request, RequestOptions::default()).await?;
//!     println!("{}", reply.text());
//!
//!     // Streaming, cancellable from elsewhere through the token.
//!     let cancel = CancellationToken::new();
//!     let mut events = client
//!         .stream(&request, RequestOptions::new().with_cancel(cancel.clone()))
//!         .await?;
//!     while let Some(event) = events.next().await {
//!         if let StreamEvent::ContentBlockDelta {
//!             delta: ContentDelta::TextDelta { text },
//!             ..
//!         } = event?
//!         {
//!             print!("{text}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Failure model
//!
//! | Failure | Variant | Retried |
//! |---------|---------|---------|
//! | Caller cancelled | [`Error::Cancelled`] | never |
//! | Attempt deadline elapsed | [`Error::Timeout`] | yes, until the budget is spent |
//! | Network failure | [`Error::Transport`] | yes |
//! | Non-200 status / `error` event | [`Error::Api`] | never |
//! | Malformed or truncated stream | [`Error::Decode`] | never |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | Deadlines, retry with backoff, SSE decoding |
//! | [`client`] | [`AnthropicClient`]: send, stream, status classification |
//! | [`config`] | [`ClientConfig`] defaults and [`RequestOptions`] overrides |
//! | [`error`] | [`Error`], [`ApiError`], [`DecodeError`] |
//! | [`types`] | Request and response shapes |

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod prelude;
pub mod types;

use schemars::JsonSchema;

pub use client::{ANTHROPIC_VERSION, AnthropicClient, MessageOutcome};
pub use config::{ClientConfig, RequestOptions};
pub use error::{ApiError, ApiErrorKind, DecodeError, Error, Result};
pub use types::{
    ContentBlock, Message, MessageRequest, MessageResponse, Role, StopReason, ToolChoice, ToolDef,
    Usage,
};

// Re-export schemars and the token type for downstream crates.
pub use schemars;
pub use tokio_util::sync::CancellationToken;

/// Default model for the CLI and examples.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`, for use as a tool's `input_schema`.
///
/// # Example
///
/// ```
/// use anthropic_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct WeatherArgs {
///     city: String,
///     #[serde(default)]
///     unit: Option<String>,
/// }
///
/// let schema = json_schema_for::<WeatherArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"city".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

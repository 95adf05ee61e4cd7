//! Convenience re-exports for common `anthropic-rs` types.
//!
//! Meant to be glob-imported by applications:
//!
//! ```ignore
//! use anthropic_rs::prelude::*;
//! ```
//!
//! Decoder internals ([`EventDecoder`](crate::api::streaming::EventDecoder),
//! [`Deadline`](crate::api::Deadline)) are left out; import those from their
//! modules when needed.

// ── Client ──────────────────────────────────────────────────────────
pub use crate::{
    AnthropicClient, CancellationToken, ClientConfig, MessageOutcome, RequestOptions,
    json_schema_for,
};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{ApiError, ApiErrorKind, DecodeError, Error};

// ── Messages ────────────────────────────────────────────────────────
pub use crate::types::{
    ContentBlock, Message, MessageRequest, MessageResponse, Role, StopReason, ToolChoice, ToolDef,
    Usage,
};

// ── Streaming ───────────────────────────────────────────────────────
pub use crate::api::streaming::{
    ContentDelta, EventStream, MessageBuilder, StreamEvent, collect_message, collect_text,
};

//! Request execution and stream decoding.
//!
//! These modules sit between [`AnthropicClient`](crate::AnthropicClient) and
//! the HTTP transport:
//!
//! - [`cancel`]: per-attempt [`Deadline`] that merges the caller's
//!   cancellation token with a timeout and reports which one fired.
//! - [`retry`]: exponential backoff with jitter ([`RetryConfig`]) and the
//!   [`RetryExecutor`] that retries the network send under a deadline.
//! - [`streaming`]: SSE framing and the typed [`StreamEvent`] decoder, plus
//!   [`MessageBuilder`](streaming::MessageBuilder) for reassembling a stream.

pub mod cancel;
pub mod retry;
pub mod streaming;

// Re-export commonly used items at the module level.
pub use cancel::{Deadline, Interrupt};
pub use retry::{RetryConfig, RetryExecutor};
pub use streaming::{EventStream, StreamEvent, collect_message, collect_text, decode};

//! The Messages API client.
//!
//! [`AnthropicClient`] sends a [`MessageRequest`] through a [`RetryExecutor`]
//! and dispatches on the HTTP status. A 200 response is parsed into a
//! [`MessageResponse`] or handed to the SSE decoder; any other status is read
//! once, classified, and returned as [`Error::Api`]. Only the network send is
//! retried; body reads never are.

use std::time::Instant;

use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::api::retry::{RetryConfig, RetryExecutor};
use crate::api::streaming::{self, EventStream};
use crate::config::{ClientConfig, RequestOptions};
use crate::error::{ApiError, ApiErrorKind, Error, Result};
use crate::types::{ErrorBody, ErrorDetail, MessageRequest, MessageResponse};

/// Value of the `anthropic-version` header.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// What [`AnthropicClient::create`] returns, depending on `request.stream`.
pub enum MessageOutcome {
    Complete(MessageResponse),
    Stream(EventStream),
}

/// Async client for the Messages API.
///
/// Cloning is cheap and clones share one connection pool, so a single client
/// can serve many concurrent calls.
#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl AnthropicClient {
    /// Create a client with the given API key and default settings.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_config(ClientConfig::new(api_key))
    }

    /// Create a client configured from `ANTHROPIC_API_KEY` / `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        Self::with_config(ClientConfig::from_env()?)
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Self::with_http_client(http, config)
    }

    /// Use an existing transport, e.g. one shared with other services.
    pub fn with_http_client(http: reqwest::Client, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a request and wait for the complete response.
    ///
    /// `request.stream` is ignored; the body is always requested unstreamed.
    pub async fn send(
        &self,
        request: &MessageRequest,
        options: RequestOptions,
    ) -> Result<MessageResponse> {
        let (resp, executor) = self.dispatch(request, false, &options).await?;

        let body = executor
            .execute_once(&options.cancel, async {
                resp.bytes().await.map_err(Error::from)
            })
            .await?;

        let message: MessageResponse = serde_json::from_slice(&body)?;
        debug!(
            "Message {}: {} block(s), stop_reason={:?}, tokens in={} out={}",
            message.id,
            message.content.len(),
            message.stop_reason,
            message.usage.input_tokens,
            message.usage.output_tokens,
        );
        Ok(message)
    }

    /// Send a request and return its events as a lazy stream.
    ///
    /// The send is retried as usual. Once the stream is returned, reads are
    /// bounded only by `options.cancel`: a long generation is never cut off
    /// by the per-attempt timeout.
    pub async fn stream(
        &self,
        request: &MessageRequest,
        options: RequestOptions,
    ) -> Result<EventStream> {
        let (resp, _) = self.dispatch(request, true, &options).await?;
        let body = Box::pin(resp.bytes_stream().map_err(Error::from));
        Ok(streaming::decode(body, options.cancel))
    }

    /// Send a request, streaming or not according to `request.stream`.
    pub async fn create(
        &self,
        request: &MessageRequest,
        options: RequestOptions,
    ) -> Result<MessageOutcome> {
        if request.stream {
            self.stream(request, options)
                .await
                .map(MessageOutcome::Stream)
        } else {
            self.send(request, options)
                .await
                .map(MessageOutcome::Complete)
        }
    }

    /// Send with retry and return the successful response together with the
    /// executor, so body reads share its timeout.
    async fn dispatch(
        &self,
        request: &MessageRequest,
        stream: bool,
        options: &RequestOptions,
    ) -> Result<(reqwest::Response, RetryExecutor)> {
        let body = encode(request, stream)?;
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let max_retries = options.max_retries.unwrap_or(self.config.max_retries);
        let mut executor = RetryExecutor::new(RetryConfig::with_retries(max_retries), timeout);

        debug!(
            "Messages request: model={}, messages={}, tools={}, max_tokens={}, stream={}",
            request.model,
            request.messages.len(),
            request.tools.as_ref().map_or(0, |t| t.len()),
            request.max_tokens,
            stream,
        );
        trace!("Request payload size: {} bytes", body.len());

        let url = self.config.messages_url();
        let accept = if stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        let start = Instant::now();

        let resp = executor
            .execute(&options.cancel, true, |_| {
                let pending = self
                    .http
                    .post(&url)
                    .header("x-api-key", &self.config.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header(CONTENT_TYPE, "application/json")
                    .header(ACCEPT, accept)
                    .body(body.clone())
                    .send();
                async move { pending.await.map_err(Error::from) }
            })
            .await?;

        let status = resp.status();
        debug!(
            "Messages response: HTTP {} in {:.1}s",
            status,
            start.elapsed().as_secs_f64()
        );

        if status != StatusCode::OK {
            return Err(self
                .upstream_error(resp, request, &executor, &options.cancel)
                .await);
        }
        Ok((resp, executor))
    }

    /// Read a non-success body once and classify it.
    async fn upstream_error(
        &self,
        resp: reqwest::Response,
        request: &MessageRequest,
        executor: &RetryExecutor,
        cancel: &CancellationToken,
    ) -> Error {
        let status = resp.status();
        let body = match executor
            .execute_once(cancel, async { resp.bytes().await.map_err(Error::from) })
            .await
        {
            Ok(bytes) => bytes,
            Err(Error::Cancelled) => return Error::Cancelled,
            Err(e) => {
                warn!("Failed to read error body for HTTP {status}: {e}");
                Bytes::new()
            }
        };

        let detail = serde_json::from_slice::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or_else(|_| ErrorDetail {
                error_type: String::new(),
                message: String::from_utf8_lossy(&body).trim().to_string(),
            });
        let message = if detail.message.is_empty() {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        } else {
            detail.message
        };

        let kind = ApiErrorKind::from_status(status.as_u16());
        let request = match kind {
            ApiErrorKind::InvalidRequest => serde_json::to_string_pretty(request).ok(),
            _ => None,
        };

        warn!("Messages API HTTP {status} ({kind}): {message}");
        Error::Api(ApiError {
            kind,
            status: status.as_u16(),
            error_type: detail.error_type,
            message,
            request,
        })
    }
}

/// Serialize the request with the `stream` flag forced to `stream`.
fn encode(request: &MessageRequest, stream: bool) -> Result<Bytes> {
    let mut value = serde_json::to_value(request)?;
    if let Some(fields) = value.as_object_mut() {
        if stream {
            fields.insert("stream".into(), serde_json::Value::Bool(true));
        } else {
            fields.remove("stream");
        }
    }
    Ok(Bytes::from(serde_json::to_vec(&value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[test]
    fn encode_forces_stream_flag() {
        let req = MessageRequest::new("m", 16).with_message(Message::user("hi"));

        let streamed: serde_json::Value =
            serde_json::from_slice(&encode(&req, true).unwrap()).unwrap();
        assert_eq!(streamed["stream"], true);

        let flagged = MessageRequest {
            stream: true,
            ..req.clone()
        };
        let plain: serde_json::Value =
            serde_json::from_slice(&encode(&flagged, false).unwrap()).unwrap();
        assert!(plain.get("stream").is_none());
        assert_eq!(plain["messages"][0]["content"][0]["text"], "hi");
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(matches!(AnthropicClient::new(""), Err(Error::Config(_))));
        assert!(AnthropicClient::new("sk-test").is_ok());
    }
}

//! Chat API transport.
//!
//! A [`ChatTransport`] opens one streaming turn and yields the raw SSE `data`
//! fields. Decoding happens downstream, in the turn controller.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio_stream::StreamExt;
use tracing::debug;

use perplexity_oss_core::config::Config;
use perplexity_oss_core::conversation::Credentials;
use perplexity_oss_core::protocol::{API_KEY_HEADER, CHAT_PATH, ChatRequest, USER_ID_HEADER};

use crate::StreamError;
use crate::sse::parse_sse_response;

/// Raw SSE `data` fields of one turn, in delivery order.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, StreamError>> + Send>>;

/// Opens a streaming chat turn.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send `request` and return the response frames.
    ///
    /// Dropping the returned stream closes the connection.
    async fn open(
        &self,
        request: &ChatRequest,
        credentials: &Credentials,
    ) -> Result<FrameStream, StreamError>;
}

/// HTTP transport: `POST {base_url}/chat` with a JSON body, SSE response.
pub struct HttpChatTransport {
    pub base_url: String,
    client: reqwest::Client,
}

impl HttpChatTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from config: base URL plus a connect timeout. No read timeout is
    /// set, so long-lived streams kept open by keep-alive frames survive.
    pub fn from_config(config: &Config) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs()))
            .build()
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url(),
            client,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}{CHAT_PATH}", self.base_url)
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open(
        &self,
        request: &ChatRequest,
        credentials: &Credentials,
    ) -> Result<FrameStream, StreamError> {
        debug!(endpoint = %self.endpoint(), pro_search = request.pro_search, "Opening chat stream");

        let mut req_builder = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json")
            .header("accept", "text/event-stream");

        if let Some(api_key) = credentials.api_key.as_deref().filter(|k| !k.is_empty()) {
            req_builder = req_builder.header(API_KEY_HEADER, api_key);
        }
        if let Some(user_id) = credentials.user_id.as_deref().filter(|u| !u.is_empty()) {
            req_builder = req_builder.header(USER_ID_HEADER, user_id);
        }

        let response = req_builder
            .json(request)
            .send()
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Http { status, body });
        }

        let frames = parse_sse_response(response).map(|event| {
            event
                .map(|e| e.data)
                .map_err(|e| StreamError::Transport(e.to_string()))
        });
        Ok(Box::pin(frames))
    }
}

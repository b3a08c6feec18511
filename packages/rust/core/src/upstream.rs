//! Streaming chat requests against the upstream bot service.
//!
//! A request is a single authenticated POST whose response body is an event
//! stream. Responses that are clearly not an event stream (error statuses,
//! HTML pages, plain JSON replies) are turned into errors here, before any
//! byte reaches the stream accumulator.

use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::{Client, Response, StatusCode, header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use itinera_shared::{
    Credentials, ItineraError, RequestId, Result, UpstreamConfig, validate_credentials,
};

/// User-Agent string for upstream requests.
const USER_AGENT: &str = concat!("itinera/", env!("CARGO_PKG_VERSION"));

/// Characters of an unexpected response body quoted in errors.
const BODY_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    bot_id: &'a str,
    user_id: String,
    stream: bool,
    auto_save_history: bool,
    additional_messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
    content_type: &'static str,
}

/// `{code, msg}` error envelope used by the upstream for non-stream replies.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default, alias = "message")]
    msg: Option<String>,
}

/// Client for the upstream chat endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    credentials: Credentials,
}

impl UpstreamClient {
    /// Build a client for `credentials`. `timeout_secs` bounds the whole
    /// request, reading the stream included.
    pub fn new(credentials: Credentials, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ItineraError::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            credentials,
        })
    }

    /// Resolve credentials from `config` and build a client.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        let credentials = validate_credentials(config)?;
        Self::new(credentials, config.timeout_secs)
    }

    /// Send `prompt` and return the response body as a byte stream.
    #[instrument(skip_all, fields(endpoint = %self.credentials.endpoint))]
    pub async fn open_stream(
        &self,
        prompt: &str,
    ) -> Result<impl Stream<Item = reqwest::Result<Vec<u8>>>> {
        let request_id = RequestId::new();
        let body = ChatRequest {
            bot_id: &self.credentials.bot_id,
            user_id: request_id.to_string(),
            stream: true,
            auto_save_history: true,
            additional_messages: [ChatMessage {
                role: "user",
                content: prompt,
                content_type: "text",
            }],
        };

        info!(%request_id, prompt_chars = prompt.chars().count(), "opening upstream stream");

        let response = self
            .client
            .post(self.credentials.endpoint.clone())
            .bearer_auth(&self.credentials.token)
            .header(header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ItineraError::transport(format!("{}: {e}", self.credentials.endpoint))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_status(status, response).await);
        }

        match content_type(&response).as_deref() {
            Some(ct) if ct.starts_with("text/html") => {
                return Err(ItineraError::transport(
                    "upstream returned an HTML page instead of an event stream",
                ));
            }
            Some(ct) if ct.starts_with("application/json") => {
                let text = read_text(response).await?;
                return Err(error_from_json_reply(&text));
            }
            other => debug!(content_type = ?other, %status, "upstream stream accepted"),
        }

        let mut bytes = Box::pin(response.bytes_stream());
        let first = bytes.next().await;
        if let Some(Ok(chunk)) = &first {
            if looks_like_html(&String::from_utf8_lossy(chunk)) {
                return Err(ItineraError::transport(
                    "upstream returned an HTML page instead of an event stream",
                ));
            }
        }

        Ok(futures::stream::iter(first)
            .chain(bytes)
            .map(|chunk| chunk.map(|b| b.to_vec())))
    }
}

fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_ascii_lowercase)
}

async fn read_text(response: Response) -> Result<String> {
    response
        .text()
        .await
        .map_err(|e| ItineraError::transport(format!("failed to read response body: {e}")))
}

/// Classify a non-2xx response.
async fn error_from_status(status: StatusCode, response: Response) -> ItineraError {
    let text = match read_text(response).await {
        Ok(text) => text,
        Err(e) => return e,
    };
    warn!(%status, body_len = text.len(), "upstream request rejected");

    if let Some(envelope) = parse_envelope(&text) {
        if envelope.code.is_some() || envelope.msg.is_some() {
            return ItineraError::protocol(
                envelope.code.as_ref().map(code_string),
                envelope
                    .msg
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            );
        }
    }
    if looks_like_html(&text) {
        return ItineraError::transport(format!("HTTP {status}: HTML error page"));
    }
    ItineraError::transport(format!("HTTP {status}: {}", excerpt(&text)))
}

/// Classify a 2xx JSON reply that should have been an event stream.
fn error_from_json_reply(text: &str) -> ItineraError {
    if let Some(envelope) = parse_envelope(text) {
        if let Some(code) = envelope.code.as_ref().map(code_string) {
            if code != "0" {
                return ItineraError::protocol(
                    Some(code),
                    envelope.msg.unwrap_or_else(|| "request rejected".into()),
                );
            }
        }
    }
    ItineraError::transport(format!(
        "expected event stream, got JSON: {}",
        excerpt(text)
    ))
}

fn parse_envelope(text: &str) -> Option<ErrorEnvelope> {
    serde_json::from_str::<ErrorEnvelope>(text).ok()
}

fn code_string(code: &Value) -> String {
    match code {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn looks_like_html(text: &str) -> bool {
    let head: String = text.trim_start().chars().take(16).collect();
    let head = head.to_ascii_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > BODY_EXCERPT_CHARS {
        let head: String = trimmed.chars().take(BODY_EXCERPT_CHARS).collect();
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}

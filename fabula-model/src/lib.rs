//! Minimal client for the Fabula narrative model endpoint.
//!
//! This crate provides a focused client for the text-generation service
//! that narrates sessions:
//! - Non-streaming and streaming completions
//! - Proper SSE parsing for streaming responses, tolerant of events
//!   split across network chunks
//!
//! The endpoint speaks a small JSON protocol: a `POST {base}/generate`
//! with a prompt bundle, answered either by a single JSON body or, when
//! `stream` is set, by an SSE stream of token deltas.

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

const ENDPOINT_ENV: &str = "FABULA_MODEL_URL";
const API_KEY_ENV: &str = "FABULA_MODEL_KEY";
const DEFAULT_MODEL: &str = "fabula-narrator-1";

/// Errors that can occur when talking to the model endpoint.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Model endpoint not configured - set {ENDPOINT_ENV}")]
    NoEndpoint,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// A boxed stream of model events, pulled by the consumer.
///
/// Dropping the stream cancels the underlying request.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>;

/// Narrative model client.
#[derive(Clone)]
pub struct ModelClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ModelClient {
    /// Create a new client for the given endpoint base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.into(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create a client from the `FABULA_MODEL_URL` / `FABULA_MODEL_KEY`
    /// environment variables.
    pub fn from_env() -> Result<Self, Error> {
        let base_url = std::env::var(ENDPOINT_ENV).map_err(|_| Error::NoEndpoint)?;
        let mut client = Self::new(base_url);
        client.api_key = std::env::var(API_KEY_ENV).ok();
        Ok(client)
    }

    /// Set the API key sent with each request.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Send a generation request and return the full response.
    pub async fn complete(&self, request: Request) -> Result<Completion, Error> {
        let api_request = self.build_api_request(&request, false);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiCompletion = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(Completion {
            text: api_response.text,
            model: api_response.model,
        })
    }

    /// Send a generation request and stream token deltas.
    pub async fn stream(&self, request: Request) -> Result<EventStream, Error> {
        let api_request = self.build_api_request(&request, true);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        // Use scan to maintain a buffer for incomplete SSE events across chunks
        let stream = response
            .bytes_stream()
            .scan(String::new(), |buffer, result| {
                let events = match result {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        parse_sse_events_buffered(buffer)
                    }
                    Err(e) => vec![Err(Error::Network(e.to_string()))],
                };
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(ref key) = self.api_key {
            headers.insert(
                "x-api-key",
                HeaderValue::from_str(key)
                    .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
            );
        }
        Ok(headers)
    }

    fn build_api_request(&self, request: &Request, stream: bool) -> ApiRequest {
        ApiRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            system: request.system.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| ApiMessage {
                    role: match m.role {
                        Role::Player => "player".to_string(),
                        Role::Narrator => "narrator".to_string(),
                    },
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        }
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A generation request.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
}

impl Request {
    /// Create a new request with the given conversation.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            system: None,
            messages,
            max_tokens: 4096,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A turn in the conversation fed to the model.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// A player-authored turn.
    pub fn player(text: impl Into<String>) -> Self {
        Self {
            role: Role::Player,
            content: text.into(),
        }
    }

    /// A narrator (model) turn.
    pub fn narrator(text: impl Into<String>) -> Self {
        Self {
            role: Role::Narrator,
            content: text.into(),
        }
    }
}

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Player,
    Narrator,
}

/// A complete (non-streaming) generation result.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
}

/// Events from a streaming response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A token (or run of tokens) appended to the response text.
    Delta { text: String },
    /// The model finished the response.
    Done,
    /// The endpoint reported an error mid-stream.
    Error { message: String },
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiCompletion {
    text: String,
    model: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiStreamEvent {
    Error { error: ApiError },
    Delta { delta: String },
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Parse SSE events from a buffer, consuming complete lines and leaving
/// incomplete data for the next network chunk.
///
/// SSE data lines are newline-terminated. Complete lines are parsed and
/// drained from the buffer; a trailing partial line stays put until more
/// bytes arrive.
fn parse_sse_events_buffered(buffer: &mut String) -> Vec<Result<StreamEvent, Error>> {
    let mut events = Vec::new();

    loop {
        let Some(newline_pos) = buffer.find('\n') else {
            // No complete line yet, wait for more data
            break;
        };

        let line = &buffer[..newline_pos];

        if let Some(json_str) = line.strip_prefix("data: ") {
            if json_str == "[DONE]" {
                events.push(Ok(StreamEvent::Done));
            } else if !json_str.is_empty() {
                match serde_json::from_str::<ApiStreamEvent>(json_str) {
                    Ok(ApiStreamEvent::Delta { delta }) => {
                        events.push(Ok(StreamEvent::Delta { text: delta }));
                    }
                    Ok(ApiStreamEvent::Error { error }) => {
                        events.push(Ok(StreamEvent::Error {
                            message: error.message,
                        }));
                    }
                    Err(e) => {
                        events.push(Err(Error::Parse(format!("SSE parse error: {e}"))));
                    }
                }
            }
        }
        // Skip event: lines, empty lines, and other SSE metadata

        buffer.drain(..=newline_pos);
    }

    events
}

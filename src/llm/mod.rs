//! Uniform streaming gateway over the three supported LLM providers.
//!
//! Three incompatible upstream streaming protocols (Anthropic's typed delta
//! events, OpenAI's choice/delta chunks, Gemini's candidate parts) are each
//! normalized into the single three-variant [`StreamEvent`] contract. The
//! gateway writes events into an mpsc channel as soon as they arrive; the
//! HTTP layer drains it. Dropping the receiver cancels the gateway task and
//! with it the upstream connection.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod sse;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use sse::SseFramer;

/// Providers the gateway can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Claude,
    Openai,
    Gemini,
}

impl LlmProvider {
    /// Strict parse; the HTTP layer rejects anything unrecognized.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "claude" => Some(Self::Claude),
            "openai" => Some(Self::Openai),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }

    /// Model used when the caller does not override one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Claude => "claude-sonnet-4-20250514",
            Self::Openai => "gpt-4o",
            Self::Gemini => "gemini-2.0-flash-exp",
        }
    }
}

/// One normalized unit of gateway output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A text delta, forwarded as soon as the provider produced it.
    Content(String),
    /// Clean end of stream. Terminal; never follows `Error`.
    Done,
    /// Normalized failure message. Terminal.
    Error(String),
}

/// Parameters for one streaming call. Nothing is persisted; each call is
/// parameterized purely by its arguments.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub provider: LlmProvider,
    pub api_key: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub model: Option<String>,
}

impl LlmRequest {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }
}

/// What a provider decoder made of one SSE frame.
pub(crate) enum Frame {
    /// Text deltas to forward.
    Text(Vec<String>),
    /// The provider signalled end of stream inside the frame data.
    Done,
    /// Nothing of interest (metadata, keep-alive, unparsable).
    Skip,
}

/// Streaming gateway; stateless apart from its HTTP client.
pub struct LlmGateway {
    client: reqwest::Client,
    anthropic_url: String,
    openai_url: String,
    gemini_base_url: String,
}

impl LlmGateway {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            anthropic_url: "https://api.anthropic.com/v1/messages".to_string(),
            openai_url: "https://api.openai.com/v1/chat/completions".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    /// Override the Anthropic endpoint (useful for mock servers in tests).
    pub fn with_anthropic_url(mut self, url: impl Into<String>) -> Self {
        self.anthropic_url = url.into();
        self
    }

    /// Override the OpenAI endpoint (useful for mock servers in tests).
    pub fn with_openai_url(mut self, url: impl Into<String>) -> Self {
        self.openai_url = url.into();
        self
    }

    /// Override the Gemini base URL (useful for mock servers in tests).
    pub fn with_gemini_url(mut self, url: impl Into<String>) -> Self {
        self.gemini_base_url = url.into();
        self
    }

    /// Open the provider stream and return the channel it is forwarded into.
    ///
    /// Exactly one terminal event is emitted: `Done` on clean completion,
    /// `Error` on any failure. Dropping the receiver cancels the call.
    pub fn stream(&self, request: LlmRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(32);
        let client = self.client.clone();
        let anthropic_url = self.anthropic_url.clone();
        let openai_url = self.openai_url.clone();
        let gemini_base_url = self.gemini_base_url.clone();

        tokio::spawn(async move {
            let result = match request.provider {
                LlmProvider::Claude => {
                    anthropic::run(&client, &anthropic_url, &request, &tx).await
                }
                LlmProvider::Openai => openai::run(&client, &openai_url, &request, &tx).await,
                LlmProvider::Gemini => gemini::run(&client, &gemini_base_url, &request, &tx).await,
            };
            match result {
                Ok(()) => {
                    let _ = tx.send(StreamEvent::Done).await;
                }
                Err(message) => {
                    debug!(error = %message, "LLM stream failed");
                    let _ = tx.send(StreamEvent::Error(classify_error(&message))).await;
                }
            }
        });

        rx
    }
}

impl Default for LlmGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject a non-success response, folding the status and body into the error
/// message so [`classify_error`] can bucket it.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(format!("HTTP {status}: {body}"))
}

/// Drain the response body as SSE, decode each frame with `decode`, and
/// forward text deltas. Returns when the provider signals completion, the
/// body ends, or the receiver goes away.
pub(crate) async fn relay_sse<F>(
    response: reqwest::Response,
    tx: &mpsc::Sender<StreamEvent>,
    mut decode: F,
) -> Result<(), String>
where
    F: FnMut(&str) -> Frame,
{
    let mut framer = SseFramer::new();
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        let text = std::str::from_utf8(&chunk).map_err(|e| format!("invalid UTF-8: {e}"))?;
        for frame in framer.push(text) {
            match decode(&frame) {
                Frame::Text(deltas) => {
                    for delta in deltas {
                        if tx.send(StreamEvent::Content(delta)).await.is_err() {
                            // Receiver dropped: the caller went away, stop
                            // pulling from upstream.
                            return Ok(());
                        }
                    }
                }
                Frame::Done => return Ok(()),
                Frame::Skip => {}
            }
        }
    }

    if let Some(frame) = framer.finish() {
        if let Frame::Text(deltas) = decode(&frame) {
            for delta in deltas {
                if tx.send(StreamEvent::Content(delta)).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

/// Map a raw provider failure onto the user-facing buckets: invalid key,
/// rate limited, or the underlying message as-is.
pub fn classify_error(message: &str) -> String {
    let lower = message.to_lowercase();
    if lower.contains("401") || lower.contains("unauthorized") || lower.contains("invalid_api_key")
    {
        return "API 키가 유효하지 않습니다".to_string();
    }
    if lower.contains("429") || lower.contains("rate") {
        return "요청이 너무 많습니다. 잠시 후 다시 시도해주세요".to_string();
    }
    message.to_string()
}

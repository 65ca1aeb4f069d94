use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RunConfig;

/// Style rules shared by every phase; sent as the system message.
const SYSTEM_PROMPT: &str = "Resume en prosa clara, directa y fiel. SIN listas ni viñetas. \
No inventes datos. No uses primera persona. No simules ser el autor ni el narrador; \
escribe en tercera persona neutra. Evita muletillas como «El autor explica…» o «El texto dice…». \
No incluyas secciones de pensamiento ni etiquetas como <think>…</think> en la respuesta.";

/// The three prompt kinds the pipeline issues, each with its own output
/// budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Map,
    Fuse,
    Meta,
}

impl Phase {
    pub fn num_predict(self, config: &RunConfig) -> u32 {
        match self {
            Phase::Map => config.num_predict_map,
            Phase::Fuse => config.num_predict_fuse,
            Phase::Meta => config.num_predict_meta,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Phase::Map => "map",
            Phase::Fuse => "fuse",
            Phase::Meta => "meta",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Could not establish a connection.
    Connect,
    /// Connect or read timeout elapsed.
    Timeout,
    /// Any other transport-level error (reset, decode, ...).
    Transport,
    /// Non-success HTTP status from the service.
    Http { status: u16 },
    /// The exchange succeeded but produced no usable text.
    EmptyOutput,
}

#[derive(Debug)]
struct Failure {
    kind: FailureKind,
    message: String,
}

impl Failure {
    fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_connect() {
            FailureKind::Connect
        } else {
            FailureKind::Transport
        };
        Self {
            kind,
            message: format!("{err}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Pure retry policy: a function of the attempt count (attempts already made,
/// starting at 1) and the last failure kind. Transport-level failures and
/// 5xx responses back off exponentially; 4xx responses are not retried.
pub fn retry_decision(attempt: u32, retries: u32, failure: FailureKind) -> RetryDecision {
    if attempt > retries {
        return RetryDecision::GiveUp;
    }
    let transient = match failure {
        FailureKind::Connect
        | FailureKind::Timeout
        | FailureKind::Transport
        | FailureKind::EmptyOutput => true,
        FailureKind::Http { status } => status >= 500,
    };
    if !transient {
        return RetryDecision::GiveUp;
    }

    let exponent = attempt.saturating_sub(1).min(4);
    RetryDecision::RetryAfter(Duration::from_millis(500 * 2u64.pow(exponent)))
}

/// Returned once the retry budget is exhausted; callers do not retry further.
#[derive(Debug, Error)]
#[error("inference failed after {attempts} attempt(s): {message}")]
pub struct InferenceError {
    pub attempts: u32,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    options: ChatOptions,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    num_ctx: usize,
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    message: ResponseMessage,
    #[serde(default)]
    done: bool,
}

/// Client for the inference service's `/api/chat` exchange.
pub struct Client {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    num_ctx: usize,
    temperature: f32,
    stream: bool,
    retries: u32,
}

impl Client {
    pub fn new(config: &RunConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(read_timeout) = config.read_timeout {
            builder = builder.read_timeout(read_timeout);
        }
        let http = builder
            .build()
            .map_err(|err| anyhow::anyhow!("build http client: {err}"))?;

        Ok(Self {
            http,
            endpoint: format!("{}/api/chat", config.base_url),
            model: config.model.clone(),
            num_ctx: config.num_ctx,
            temperature: config.temperature,
            stream: config.stream,
            retries: config.retries,
        })
    }

    /// One logical inference call with retry. Returns final text with hidden
    /// reasoning segments removed; never returns empty text.
    pub async fn generate(
        &self,
        config: &RunConfig,
        phase: Phase,
        prompt: &str,
        tag: &str,
    ) -> Result<String, InferenceError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let failure = match self.exchange(phase.num_predict(config), prompt, tag).await {
                Ok(raw) => {
                    let text = strip_think(&raw);
                    if text.is_empty() {
                        Failure {
                            kind: FailureKind::EmptyOutput,
                            message: "model returned no usable text".to_owned(),
                        }
                    } else {
                        return Ok(text);
                    }
                }
                Err(failure) => failure,
            };

            match retry_decision(attempt, self.retries, failure.kind) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        phase = phase.as_str(),
                        tag,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure.message,
                        "inference attempt failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return Err(InferenceError {
                        attempts: attempt,
                        kind: failure.kind,
                        message: failure.message,
                    });
                }
            }
        }
    }

    async fn exchange(
        &self,
        num_predict: u32,
        prompt: &str,
        tag: &str,
    ) -> Result<String, Failure> {
        if !self.stream {
            return self.exchange_buffered(num_predict, prompt).await;
        }

        match self.exchange_streaming(num_predict, prompt, tag).await {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(_) => {
                // Nothing accumulated before the stream closed; one buffered
                // request is cheaper than failing the whole block.
                tracing::warn!(tag, "stream produced no text; retrying without streaming");
                self.exchange_buffered(num_predict, prompt).await
            }
            Err(failure) => Err(failure),
        }
    }

    fn request<'a>(&'a self, num_predict: u32, prompt: &'a str, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            options: ChatOptions {
                num_ctx: self.num_ctx,
                temperature: self.temperature,
                num_predict,
            },
            stream,
        }
    }

    async fn exchange_buffered(&self, num_predict: u32, prompt: &str) -> Result<String, Failure> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&self.request(num_predict, prompt, false))
            .send()
            .await
            .map_err(Failure::from_reqwest)?;

        let response = check_status(response).await?;
        let parsed: ChatResponse = response.json().await.map_err(Failure::from_reqwest)?;
        Ok(parsed.message.content)
    }

    /// Consumes the NDJSON delta stream, accumulating message content until
    /// the terminal `done` marker. A transport error mid-stream keeps the
    /// accumulated text when there is any (the original exchange cannot be
    /// restarted).
    async fn exchange_streaming(
        &self,
        num_predict: u32,
        prompt: &str,
        tag: &str,
    ) -> Result<String, Failure> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&self.request(num_predict, prompt, true))
            .send()
            .await
            .map_err(Failure::from_reqwest)?;

        let mut response = check_status(response).await?;
        let mut buffer: Vec<u8> = Vec::new();
        let mut full = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        match parse_stream_line(&line) {
                            Some(chunk) => {
                                full.push_str(&chunk.message.content);
                                if chunk.done {
                                    return Ok(full);
                                }
                            }
                            None => continue,
                        }
                    }
                }
                Ok(None) => {
                    // Stream closed without the terminal marker.
                    return Ok(full);
                }
                Err(err) => {
                    if full.trim().is_empty() {
                        return Err(Failure::from_reqwest(err));
                    }
                    tracing::warn!(
                        tag,
                        error = %err,
                        "stream interrupted; keeping accumulated text"
                    );
                    return Ok(full);
                }
            }
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, Failure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Failure {
        kind: FailureKind::Http {
            status: status.as_u16(),
        },
        message: format!("inference service returned {status}: {}", body.trim()),
    })
}

fn parse_stream_line(line: &[u8]) -> Option<StreamChunk> {
    let line = std::str::from_utf8(line).ok()?.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Removes `<think>…</think>` segments some models emit before the answer.
/// An unterminated opening tag drops the remainder of the text.
pub fn strip_think(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;

    while let Some(rel) = lower[cursor..].find("<think>") {
        let start = cursor + rel;
        out.push_str(&text[cursor..start]);
        match lower[start..].find("</think>") {
            Some(rel_end) => cursor = start + rel_end + "</think>".len(),
            None => {
                cursor = text.len();
                break;
            }
        }
    }

    out.push_str(&text[cursor..]);
    out.trim().to_owned()
}

//! Language model boundary.
//!
//! A reply is a stream of [`TokenDelta`]s. The HTTP-backed model lives in
//! `providers::openai`; [`ScriptedModel`] replays canned replies for tests.

use crate::call::conversation::ChatMessage;
use crate::error::{Result, VoxlineError};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One increment of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenDelta {
    pub content: String,
    /// The model reported that the reply is complete.
    pub finished: bool,
}

impl TokenDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finished: false,
        }
    }

    pub fn finished() -> Self {
        Self {
            content: String::new(),
            finished: true,
        }
    }
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<TokenDelta>> + Send>>;

/// Trait for streaming chat models.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start a reply to `history`. Errors here mean the request never started.
    async fn stream_reply(&self, history: &[ChatMessage]) -> Result<TokenStream>;

    /// Name of the model for logs
    fn model_name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental decoder for a chat-completions server-sent event stream.
///
/// Bytes go in as they arrive off the socket; complete `data:` lines come out
/// as deltas. Partial lines (including split UTF-8 sequences) stay buffered.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
    finished_seen: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes, returning every delta completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<TokenDelta>> {
        self.buffer.extend_from_slice(bytes);
        let mut deltas = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if self.done {
                continue;
            }
            let line = std::str::from_utf8(&line).map_err(|e| VoxlineError::ModelStream {
                message: format!("invalid UTF-8 in event stream: {}", e),
            })?;
            if let Some(delta) = self.decode_line(line.trim())? {
                deltas.push(delta);
            }
        }

        Ok(deltas)
    }

    /// Called when the body ends. A body without `[DONE]` was cut short.
    pub fn finish(&mut self) -> Result<Option<TokenDelta>> {
        if !self.done {
            return Err(VoxlineError::ModelStream {
                message: "event stream ended before [DONE]".to_string(),
            });
        }
        Ok(None)
    }

    fn decode_line(&mut self, line: &str) -> Result<Option<TokenDelta>> {
        // Blank separators, comments and non-data fields
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            if self.finished_seen {
                return Ok(None);
            }
            self.finished_seen = true;
            return Ok(Some(TokenDelta::finished()));
        }

        let chunk: CompletionChunk =
            serde_json::from_str(data).map_err(|e| VoxlineError::ModelStream {
                message: format!("malformed chunk: {}", e),
            })?;
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(None);
        };

        let finished = choice.finish_reason.as_deref() == Some("stop");
        let content = choice.delta.content.unwrap_or_default();
        if content.is_empty() && !finished {
            return Ok(None);
        }
        if finished {
            self.finished_seen = true;
        }
        Ok(Some(TokenDelta { content, finished }))
    }
}

#[derive(Debug, Clone)]
enum ScriptEnd {
    Finish,
    Fail,
    Stall,
}

#[derive(Debug, Clone)]
struct Script {
    tokens: Vec<String>,
    end: ScriptEnd,
    token_delay: Option<Duration>,
}

/// Model that replays scripted replies in order, one per request.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, tokens: &[&str], end: ScriptEnd, token_delay: Option<Duration>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(Script {
                tokens: tokens.iter().map(|t| t.to_string()).collect(),
                end,
                token_delay,
            });
        }
        self
    }

    /// Queue a reply that streams `tokens` and then finishes.
    pub fn with_reply(self, tokens: &[&str]) -> Self {
        self.push(tokens, ScriptEnd::Finish, None)
    }

    /// Queue a reply that waits `delay` before each token.
    pub fn with_slow_reply(self, tokens: &[&str], delay: Duration) -> Self {
        self.push(tokens, ScriptEnd::Finish, Some(delay))
    }

    /// Queue a reply that streams `tokens` and then errors.
    pub fn with_failure_after(self, tokens: &[&str]) -> Self {
        self.push(tokens, ScriptEnd::Fail, None)
    }

    /// Queue a reply that streams `tokens` and then never ends.
    pub fn with_stall_after(self, tokens: &[&str]) -> Self {
        self.push(tokens, ScriptEnd::Stall, None)
    }

    /// Histories received so far, in request order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedModel {
    async fn stream_reply(&self, history: &[ChatMessage]) -> Result<TokenStream> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(history.to_vec());
        }
        let script = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .ok_or_else(|| VoxlineError::ModelRequest {
                message: "no scripted reply left".to_string(),
            })?;

        let delay = script.token_delay;
        let tokens = futures_util::stream::iter(script.tokens).then(move |token| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, VoxlineError>(TokenDelta::text(token))
        });

        let stream: TokenStream = match script.end {
            ScriptEnd::Finish => Box::pin(
                tokens.chain(futures_util::stream::once(async { Ok(TokenDelta::finished()) })),
            ),
            ScriptEnd::Fail => Box::pin(tokens.chain(futures_util::stream::once(async {
                Err(VoxlineError::ModelStream {
                    message: "scripted failure".to_string(),
                })
            }))),
            ScriptEnd::Stall => Box::pin(tokens.chain(futures_util::stream::pending())),
        };
        Ok(stream)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

//! Chat-completions client streaming over server-sent events.

use crate::call::conversation::ChatMessage;
use crate::config::LlmConfig;
use crate::defaults;
use crate::error::{Result, VoxlineError};
use crate::providers::llm::{LanguageModel, SseDecoder, TokenStream};
use futures_util::StreamExt;
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// Streaming chat model behind an OpenAI-compatible API.
pub struct OpenAiModel {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiModel {
    pub fn new(api_key: String, model: String, api_base: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    /// Build from config, taking the key from `OPENAI_API_KEY`.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = super::credential(defaults::LLM_API_KEY_ENV)?;
        Ok(Self::new(
            api_key,
            config.model.clone(),
            config.api_base.clone(),
        ))
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiModel {
    async fn stream_reply(&self, history: &[ChatMessage]) -> Result<TokenStream> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = CompletionRequest {
            model: &self.model,
            messages: history,
            stream: true,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoxlineError::ModelRequest {
                message: format!("request to {} failed: {}", url, e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoxlineError::ModelRequest {
                message: format!("{}: {}", status, detail),
            });
        }

        let bytes = Box::pin(response.bytes_stream());
        let state = (bytes, SseDecoder::new(), VecDeque::new(), false);

        let stream = futures_util::stream::unfold(
            state,
            |(mut bytes, mut decoder, mut queue, mut ended)| async move {
                loop {
                    if let Some(item) = queue.pop_front() {
                        return Some((item, (bytes, decoder, queue, ended)));
                    }
                    if ended {
                        return None;
                    }

                    match bytes.next().await {
                        Some(Ok(chunk)) => match decoder.feed(&chunk) {
                            Ok(deltas) => queue.extend(deltas.into_iter().map(Ok)),
                            Err(e) => {
                                queue.push_back(Err(e));
                                ended = true;
                            }
                        },
                        Some(Err(e)) => {
                            queue.push_back(Err(VoxlineError::ModelStream {
                                message: e.to_string(),
                            }));
                            ended = true;
                        }
                        None => {
                            if let Err(e) = decoder.finish() {
                                queue.push_back(Err(e));
                            }
                            ended = true;
                        }
                    }

                    // Nothing after [DONE] matters
                    if decoder.is_done() {
                        ended = true;
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

//! External services: chat model, speech synthesis, live transcription.
//!
//! Each service sits behind a trait so the call pipeline can run against the
//! HTTP-backed implementations or the in-process test doubles.

pub mod llm;
pub mod stt;
pub mod tts;

#[cfg(feature = "providers")]
pub mod deepgram;
#[cfg(feature = "providers")]
pub mod openai;

use crate::error::{Result, VoxlineError};
use std::sync::Arc;

pub use llm::{LanguageModel, ScriptedModel, SseDecoder, TokenDelta, TokenStream};
pub use stt::{
    MockRecognizer, RecognizerStream, SpeechRecognizer, TranscriptAssembler, TranscriptEvent,
};
pub use tts::{MockSynthesizer, Synthesizer};

/// The three services a call needs, shared across calls.
#[derive(Clone)]
pub struct Providers {
    pub model: Arc<dyn LanguageModel>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
}

impl Providers {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn Synthesizer>,
        recognizer: Arc<dyn SpeechRecognizer>,
    ) -> Self {
        Self {
            model,
            synthesizer,
            recognizer,
        }
    }

    /// HTTP-backed providers. Fails if an API key is missing from the environment.
    #[cfg(feature = "providers")]
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        let model = openai::OpenAiModel::from_config(&config.llm)?;
        let synthesizer = deepgram::DeepgramSpeech::from_config(&config.tts)?;
        let recognizer =
            deepgram::DeepgramListen::from_config(&config.stt, config.playback.recognizer_buffer)?;
        Ok(Self::new(
            Arc::new(model),
            Arc::new(synthesizer),
            Arc::new(recognizer),
        ))
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("model", &self.model.model_name())
            .field("voice", &self.synthesizer.voice())
            .finish_non_exhaustive()
    }
}

/// Read an API key from the environment.
pub fn credential(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(VoxlineError::MissingCredential {
            name: name.to_string(),
        }),
    }
}

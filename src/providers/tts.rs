//! Speech synthesis boundary.

use crate::error::{Result, VoxlineError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for text-to-speech providers.
///
/// Implementations return telephony-ready audio (8kHz mu-law, no container).
#[async_trait::async_trait]
pub trait Synthesizer: Send + Sync {
    /// Render `text` to audio.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Voice used for rendering
    fn voice(&self) -> &str;
}

/// Mock synthesizer for testing
///
/// The returned audio is the UTF-8 bytes of the text, so tests can tell
/// fragments apart by their audio.
#[derive(Debug, Clone, Default)]
pub struct MockSynthesizer {
    delays: HashMap<String, Duration>,
    failures: HashSet<String>,
    hangs: HashSet<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay rendering of `text` by `delay`.
    pub fn with_delay(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    /// Fail rendering of `text`.
    pub fn with_failure_for(mut self, text: &str) -> Self {
        self.failures.insert(text.to_string());
        self
    }

    /// Never finish rendering `text`.
    pub fn with_hang_for(mut self, text: &str) -> Self {
        self.hangs.insert(text.to_string());
        self
    }

    /// Texts requested so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(text.to_string());
        }

        if let Some(delay) = self.delays.get(text) {
            tokio::time::sleep(*delay).await;
        }
        if self.hangs.contains(text) {
            std::future::pending::<()>().await;
        }
        if self.failures.contains(text) {
            return Err(VoxlineError::Synthesis {
                status: "500 Internal Server Error".to_string(),
                message: "mock synthesis failure".to_string(),
            });
        }
        Ok(text.as_bytes().to_vec())
    }

    fn voice(&self) -> &str {
        "mock-voice"
    }
}

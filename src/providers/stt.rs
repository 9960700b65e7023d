//! Live transcription boundary.
//!
//! A recognizer connection is a pair of channels: caller audio goes in,
//! transcript events come out. `providers::deepgram` bridges a real
//! websocket; [`TranscriptAssembler`] turns its raw results into events.

use crate::error::{Result, VoxlineError};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Transcript produced by the recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Provisional text, may still change. Used for interruption.
    Partial(String),
    /// Finalized utterance, ready for the model.
    Final(String),
}

/// Open recognizer connection.
pub struct RecognizerStream {
    pub audio: mpsc::Sender<Vec<u8>>,
    pub events: mpsc::Receiver<TranscriptEvent>,
}

/// Trait for live speech recognizers.
#[async_trait::async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Open a connection for one call.
    async fn connect(&self) -> Result<RecognizerStream>;
}

/// Raw message from a Deepgram-style live transcription socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ListenMessage {
    Results {
        channel: ListenChannel,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        speech_final: bool,
    },
    UtteranceEnd {},
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenChannel {
    #[serde(default)]
    pub alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenAlternative {
    #[serde(default)]
    pub transcript: String,
}

/// Accumulates final segments into whole utterances.
///
/// Final segments are joined until the recognizer reports `speech_final`.
/// An utterance-end without a preceding `speech_final` flushes whatever was
/// collected. Interim segments are surfaced as partials.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    accumulated: String,
    speech_final: bool,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one socket text frame and feed it through [`Self::handle`].
    pub fn handle_json(&mut self, text: &str) -> Result<Option<TranscriptEvent>> {
        let message: ListenMessage =
            serde_json::from_str(text).map_err(|e| VoxlineError::Recognizer {
                message: format!("unreadable recognizer message: {}", e),
            })?;
        Ok(self.handle(message))
    }

    pub fn handle(&mut self, message: ListenMessage) -> Option<TranscriptEvent> {
        match message {
            ListenMessage::UtteranceEnd {} => {
                if self.speech_final {
                    return None;
                }
                self.take_final()
            }
            ListenMessage::Results {
                channel,
                is_final,
                speech_final,
            } => {
                let text = channel
                    .alternatives
                    .into_iter()
                    .next()
                    .map(|a| a.transcript)
                    .unwrap_or_default();
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }

                if !is_final {
                    return Some(TranscriptEvent::Partial(text.to_string()));
                }

                if !self.accumulated.is_empty() {
                    self.accumulated.push(' ');
                }
                self.accumulated.push_str(text);

                if speech_final {
                    self.speech_final = true;
                    self.take_final()
                } else {
                    self.speech_final = false;
                    None
                }
            }
            ListenMessage::Other => None,
        }
    }

    fn take_final(&mut self) -> Option<TranscriptEvent> {
        let text = std::mem::take(&mut self.accumulated);
        if text.is_empty() {
            None
        } else {
            Some(TranscriptEvent::Final(text))
        }
    }
}

/// Recognizer that replays fixed events and counts the audio it receives.
#[derive(Debug, Clone, Default)]
pub struct MockRecognizer {
    events: Vec<TranscriptEvent>,
    frames: Arc<Mutex<usize>>,
    should_fail: bool,
}

impl MockRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, event: TranscriptEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Configure the mock to fail on connect
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Audio frames received across all connections.
    pub fn frames_received(&self) -> usize {
        self.frames.lock().map(|f| *f).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for MockRecognizer {
    async fn connect(&self) -> Result<RecognizerStream> {
        if self.should_fail {
            return Err(VoxlineError::Recognizer {
                message: "mock recognizer failure".to_string(),
            });
        }

        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);
        let (event_tx, event_rx) = mpsc::channel(self.events.len().max(1));
        for event in &self.events {
            if event_tx.send(event.clone()).await.is_err() {
                break;
            }
        }

        let frames = self.frames.clone();
        tokio::spawn(async move {
            // Hold the event sender so the stream stays open until audio stops
            let _events = event_tx;
            while audio_rx.recv().await.is_some() {
                if let Ok(mut count) = frames.lock() {
                    *count += 1;
                }
            }
        });

        Ok(RecognizerStream {
            audio: audio_tx,
            events: event_rx,
        })
    }
}

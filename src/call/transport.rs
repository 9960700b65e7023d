//! Audio path back to the caller.

use crate::error::{Result, VoxlineError};
use crate::telephony::protocol::{MarkPayload, MediaPayload, OutboundMessage};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Where released fragments go.
#[async_trait::async_trait]
pub trait MediaTransport: Send {
    /// Queue `audio` for playback, followed by a mark carrying `label`.
    async fn send_audio(&mut self, audio: &[u8], label: &str) -> Result<()>;

    /// Drop everything queued for playback.
    async fn clear(&mut self) -> Result<()>;
}

/// Transport over a telephony media-stream socket.
///
/// Messages go to a channel drained by the socket's writer task.
pub struct TwilioTransport {
    stream_sid: String,
    outbound: mpsc::Sender<OutboundMessage>,
}

impl TwilioTransport {
    pub fn new(stream_sid: impl Into<String>, outbound: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            stream_sid: stream_sid.into(),
            outbound,
        }
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| VoxlineError::Transport {
                message: "media stream closed".to_string(),
            })
    }
}

#[async_trait::async_trait]
impl MediaTransport for TwilioTransport {
    async fn send_audio(&mut self, audio: &[u8], label: &str) -> Result<()> {
        self.send(OutboundMessage::Media {
            stream_sid: self.stream_sid.clone(),
            media: MediaPayload {
                payload: STANDARD.encode(audio),
                track: None,
            },
        })
        .await?;
        self.send(OutboundMessage::Mark {
            stream_sid: self.stream_sid.clone(),
            mark: MarkPayload {
                name: label.to_string(),
            },
        })
        .await
    }

    async fn clear(&mut self) -> Result<()> {
        self.send(OutboundMessage::Clear {
            stream_sid: self.stream_sid.clone(),
        })
        .await
    }
}

/// Something a [`RecordingTransport`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Audio { audio: Vec<u8>, label: String },
    Clear,
}

/// Transport that records every call; clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    events: Arc<Mutex<Vec<TransportEvent>>>,
    should_fail: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure every send to fail
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Audio payloads in send order.
    pub fn played(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::Audio { audio, .. } => Some(audio),
                TransportEvent::Clear => None,
            })
            .collect()
    }

    /// Mark labels in send order.
    pub fn labels(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::Audio { label, .. } => Some(label),
                TransportEvent::Clear => None,
            })
            .collect()
    }

    pub fn clear_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, TransportEvent::Clear))
            .count()
    }

    fn record(&self, event: TransportEvent) -> Result<()> {
        if self.should_fail {
            return Err(VoxlineError::Transport {
                message: "recording transport configured to fail".to_string(),
            });
        }
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MediaTransport for RecordingTransport {
    async fn send_audio(&mut self, audio: &[u8], label: &str) -> Result<()> {
        self.record(TransportEvent::Audio {
            audio: audio.to_vec(),
            label: label.to_string(),
        })
    }

    async fn clear(&mut self) -> Result<()> {
        self.record(TransportEvent::Clear)
    }
}

//! JSON messages exchanged with the telephony media stream.
//!
//! Every message carries an `event` discriminator. Inbound messages come from
//! the telephony provider; outbound messages are what the call session sends
//! back on the same socket.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Messages received from the telephony media stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Socket established, no call metadata yet
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    /// Call metadata; the session starts here
    Start { start: StartMetadata },
    /// One frame of caller audio
    Media { media: MediaPayload },
    /// Playback of a labelled chunk finished
    Mark { mark: MarkPayload },
    /// Caller pressed a key
    Dtmf { dtmf: DtmfPayload },
    /// Call ended
    Stop {
        #[serde(default)]
        stop: Option<StopMetadata>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Base64 audio payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMetadata {
    #[serde(default)]
    pub call_sid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DtmfPayload {
    pub digit: String,
}

impl InboundMessage {
    /// Deserialize an inbound message from a JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Parse a socket frame, reporting bad input as a protocol error.
    pub fn parse(s: &str) -> crate::error::Result<Self> {
        Self::from_json(s).map_err(|e| crate::error::VoxlineError::Protocol {
            message: e.to_string(),
        })
    }

    /// Serialize to JSON (used by tests and local tooling that fake a caller).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages sent back to the telephony media stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Queue audio for playback
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    /// Ask to be told when everything queued so far has played
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    /// Drop all queued audio
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

impl OutboundMessage {
    /// Serialize outbound message to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize outbound message from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

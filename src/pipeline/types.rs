//! Data types for the fragment playback pipeline.

/// A piece of reply text between two pause markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Call-scoped position; dense and strictly increasing across turns.
    pub index: u64,
    /// Interaction the fragment belongs to.
    pub turn: u64,
    /// Text to render, never empty after trimming.
    pub text: String,
}

impl Fragment {
    /// Creates a new fragment.
    pub fn new(index: u64, turn: u64, text: impl Into<String>) -> Self {
        Self {
            index,
            turn,
            text: text.into(),
        }
    }
}

/// A fragment's synthesized audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFragment {
    pub index: u64,
    pub turn: u64,
    /// Telephony audio (8kHz mu-law, raw).
    pub audio: Vec<u8>,
}

/// What a render task reports back. Exactly one per submitted fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered(RenderedFragment),
    Failed { index: u64, turn: u64, error: String },
}

impl RenderOutcome {
    pub fn index(&self) -> u64 {
        match self {
            RenderOutcome::Rendered(r) => r.index,
            RenderOutcome::Failed { index, .. } => *index,
        }
    }
}

/// Why the playback cursor moved past an index without playing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    RenderFailed,
    TimedOut,
}

/// An in-order decision from the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    Play { index: u64, turn: u64, audio: Vec<u8> },
    Skip { index: u64, reason: SkipReason },
}

impl Release {
    pub fn index(&self) -> u64 {
        match self {
            Release::Play { index, .. } | Release::Skip { index, .. } => *index,
        }
    }
}

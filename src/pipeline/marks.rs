//! Playback completion tracking.
//!
//! Every fragment sent to the caller is followed by a labelled mark. The
//! telephony side echoes the label back once the audio before it has played,
//! so a non-empty set means the caller is currently hearing the assistant.

/// Labels of marks sent but not yet acknowledged, in send order.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    labels: Vec<String>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `label`. Returns false if it is already tracked.
    pub fn register(&mut self, label: impl Into<String>) -> bool {
        let label = label.into();
        if self.labels.contains(&label) {
            return false;
        }
        self.labels.push(label);
        true
    }

    /// Remove exactly the matching label, wherever it sits.
    pub fn acknowledge(&mut self, label: &str) -> bool {
        match self.labels.iter().position(|l| l == label) {
            Some(pos) => {
                self.labels.remove(pos);
                true
            }
            None => {
                tracing::debug!(label, "acknowledgement for unknown mark");
                false
            }
        }
    }

    /// Forget every label. Returns how many were outstanding.
    pub fn clear(&mut self) -> usize {
        let count = self.labels.len();
        self.labels.clear();
        count
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

//! Barge-in detection.

use crate::defaults;
use crate::pipeline::marks::CompletionTracker;

/// Decides when a provisional transcript means the caller is talking over
/// the assistant.
#[derive(Debug, Clone, Copy)]
pub struct InterruptionController {
    /// Provisional text must be longer than this many characters.
    pub min_chars: usize,
}

impl Default for InterruptionController {
    fn default() -> Self {
        Self {
            min_chars: defaults::INTERRUPT_MIN_CHARS,
        }
    }
}

impl InterruptionController {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    /// True when audio is still playing and the caller said something
    /// substantial.
    pub fn should_interrupt(&self, partial: &str, marks: &CompletionTracker) -> bool {
        !marks.is_empty() && partial.trim().chars().count() > self.min_chars
    }
}

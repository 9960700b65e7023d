//! Splits a streamed reply into speakable fragments at pause markers.
//!
//! The fragment counter is call-scoped: it is never reset between turns, so
//! indices from consecutive replies follow each other densely.

use crate::pipeline::types::Fragment;
use crate::providers::llm::TokenDelta;

/// Turns model deltas into [`Fragment`]s.
#[derive(Debug)]
pub struct Fragmenter {
    marker: char,
    next_index: u64,
    turn: u64,
    buffer: String,
    reply: String,
}

impl Fragmenter {
    pub fn new(marker: char) -> Self {
        Self {
            marker,
            next_index: 0,
            turn: 0,
            buffer: String::new(),
            reply: String::new(),
        }
    }

    /// Start collecting a new reply.
    pub fn begin_turn(&mut self, turn: u64) {
        self.turn = turn;
        self.buffer.clear();
        self.reply.clear();
    }

    /// Append a delta. Returns a fragment when the buffer reaches a pause
    /// marker or the model says the reply is complete.
    pub fn push(&mut self, delta: &TokenDelta) -> Option<Fragment> {
        self.buffer.push_str(&delta.content);
        self.reply.push_str(&delta.content);

        if delta.finished || self.buffer.trim_end().ends_with(self.marker) {
            self.flush()
        } else {
            None
        }
    }

    /// Flush a trailing fragment when the stream ended without a marker.
    pub fn finish(&mut self) -> Option<Fragment> {
        self.flush()
    }

    /// The whole reply as the model produced it, markers included.
    pub fn take_reply(&mut self) -> String {
        self.buffer.clear();
        std::mem::take(&mut self.reply)
    }

    /// Drop the current turn's buffered text and reply.
    pub fn abandon(&mut self) {
        self.buffer.clear();
        self.reply.clear();
    }

    /// Fragment a complete text with the same rules as a streamed reply.
    pub fn split_text(&mut self, turn: u64, text: &str) -> Vec<Fragment> {
        self.begin_turn(turn);
        let mut fragments: Vec<Fragment> = text
            .split_inclusive(self.marker)
            .filter_map(|piece| self.push(&TokenDelta::text(piece)))
            .collect();
        fragments.extend(self.push(&TokenDelta::finished()));
        self.abandon();
        fragments
    }

    /// Index the next emitted fragment will carry.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    fn flush(&mut self) -> Option<Fragment> {
        let text: String = self.buffer.chars().filter(|&c| c != self.marker).collect();
        self.buffer.clear();

        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let fragment = Fragment::new(self.next_index, self.turn, text);
        self.next_index += 1;
        Some(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(fragments: &[Fragment]) -> Vec<&str> {
        fragments.iter().map(|f| f.text.as_str()).collect()
    }

    #[test]
    fn test_flushes_at_marker() {
        let mut fragmenter = Fragmenter::new('•');
        fragmenter.begin_turn(1);

        assert_eq!(fragmenter.push(&TokenDelta::text("Sure, I")), None);
        let fragment = fragmenter.push(&TokenDelta::text(" can help •")).unwrap();
        assert_eq!(fragment, Fragment::new(0, 1, "Sure, I can help"));
    }

    #[test]
    fn test_marker_followed_by_whitespace_still_flushes() {
        let mut fragmenter = Fragmenter::new('•');
        let fragment = fragmenter.push(&TokenDelta::text("One moment • ")).unwrap();
        assert_eq!(fragment.text, "One moment");
    }

    #[test]
    fn test_marker_mid_token_does_not_flush() {
        let mut fragmenter = Fragmenter::new('•');
        assert_eq!(fragmenter.push(&TokenDelta::text("a • b")), None);
        let fragment = fragmenter.push(&TokenDelta::finished()).unwrap();
        assert_eq!(fragment.text, "a  b");
    }

    #[test]
    fn test_finished_delta_flushes_remainder() {
        let mut fragmenter = Fragmenter::new('•');
        fragmenter.push(&TokenDelta::text("Anything else"));
        let fragment = fragmenter
            .push(&TokenDelta {
                content: "?".to_string(),
                finished: true,
            })
            .unwrap();
        assert_eq!(fragment.text, "Anything else?");
    }

    #[test]
    fn test_finish_flushes_unterminated_text() {
        let mut fragmenter = Fragmenter::new('•');
        fragmenter.push(&TokenDelta::text("cut short"));
        assert_eq!(fragmenter.finish().unwrap().text, "cut short");
        assert_eq!(fragmenter.finish(), None);
    }

    #[test]
    fn test_empty_fragments_are_never_emitted() {
        let mut fragmenter = Fragmenter::new('•');
        assert_eq!(fragmenter.push(&TokenDelta::text("•")), None);
        assert_eq!(fragmenter.push(&TokenDelta::text("  • ")), None);
        assert_eq!(fragmenter.push(&TokenDelta::finished()), None);
        assert_eq!(fragmenter.next_index(), 0);
    }

    #[test]
    fn test_indices_continue_across_turns() {
        let mut fragmenter = Fragmenter::new('•');
        fragmenter.begin_turn(0);
        let a = fragmenter.push(&TokenDelta::text("first •")).unwrap();
        let b = fragmenter.push(&TokenDelta::text("second •")).unwrap();
        fragmenter.take_reply();

        fragmenter.begin_turn(1);
        let c = fragmenter.push(&TokenDelta::text("third •")).unwrap();

        assert_eq!((a.index, b.index, c.index), (0, 1, 2));
        assert_eq!((a.turn, c.turn), (0, 1));
        assert_eq!(fragmenter.next_index(), 3);
    }

    #[test]
    fn test_take_reply_keeps_markers() {
        let mut fragmenter = Fragmenter::new('•');
        fragmenter.begin_turn(1);
        fragmenter.push(&TokenDelta::text("Hi there •"));
        fragmenter.push(&TokenDelta::text(" how are you?"));
        fragmenter.finish();
        assert_eq!(fragmenter.take_reply(), "Hi there • how are you?");
        assert_eq!(fragmenter.take_reply(), "");
    }

    #[test]
    fn test_abandon_discards_buffer_and_reply() {
        let mut fragmenter = Fragmenter::new('•');
        fragmenter.push(&TokenDelta::text("half a sen"));
        fragmenter.abandon();
        assert_eq!(fragmenter.finish(), None);
        assert_eq!(fragmenter.take_reply(), "");
    }

    #[test]
    fn test_split_text() {
        let mut fragmenter = Fragmenter::new('•');
        let fragments =
            fragmenter.split_text(0, "Hello, thanks for calling. • How can I help you today?");
        assert_eq!(
            texts(&fragments),
            vec!["Hello, thanks for calling.", "How can I help you today?"]
        );
        assert_eq!(fragments[1].index, 1);
        assert_eq!(fragmenter.take_reply(), "");
    }

    #[test]
    fn test_split_text_trailing_marker() {
        let mut fragmenter = Fragmenter::new('|');
        let fragments = fragmenter.split_text(2, "one | two |");
        assert_eq!(texts(&fragments), vec!["one", "two"]);
        assert!(fragments.iter().all(|f| f.turn == 2));
    }

    #[test]
    fn test_custom_marker() {
        let mut fragmenter = Fragmenter::new('|');
        assert_eq!(fragmenter.push(&TokenDelta::text("a • b")), None);
        assert_eq!(fragmenter.push(&TokenDelta::text(" |")).unwrap().text, "a • b");
    }
}

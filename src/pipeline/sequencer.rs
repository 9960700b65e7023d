//! In-order release of rendered fragments.
//!
//! Renders complete in any order; the caller must hear them in index order.
//! [`PlaybackSequencer`] holds early arrivals until every lower index has been
//! released or skipped. It never reads the clock itself: every operation
//! takes `now`, so the whole thing is a plain state machine.

use crate::pipeline::types::{Release, RenderedFragment, SkipReason};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
enum Slot {
    Ready { turn: u64, audio: Vec<u8> },
    Failed,
}

/// Reorders render completions into index order.
#[derive(Debug)]
pub struct PlaybackSequencer {
    /// Next index to release.
    cursor: u64,
    /// Arrived but not yet releasable; every key is above the cursor.
    pending: BTreeMap<u64, Slot>,
    /// Assignment time of every index at or above the cursor still awaited.
    assigned: BTreeMap<u64, Instant>,
    /// When the current cursor position was reached.
    head_since: Option<Instant>,
    stall_timeout: Duration,
}

impl PlaybackSequencer {
    pub fn new(stall_timeout: Duration) -> Self {
        Self {
            cursor: 0,
            pending: BTreeMap::new(),
            assigned: BTreeMap::new(),
            head_since: None,
            stall_timeout,
        }
    }

    /// Record that `index` was handed to the renderer.
    pub fn expect(&mut self, index: u64, now: Instant) {
        if index >= self.cursor {
            self.assigned.entry(index).or_insert(now);
        }
    }

    /// A render finished. Returns everything that became playable.
    pub fn accept(&mut self, rendered: RenderedFragment, now: Instant) -> Vec<Release> {
        let RenderedFragment { index, turn, audio } = rendered;
        self.arrive(index, Slot::Ready { turn, audio }, now)
    }

    /// A render failed for good. The index is skipped as soon as it is reached.
    pub fn reject(&mut self, index: u64, now: Instant) -> Vec<Release> {
        self.arrive(index, Slot::Failed, now)
    }

    /// When the cursor gives up waiting for its index, if it is waiting at all.
    pub fn deadline(&self) -> Option<Instant> {
        let assigned_at = *self.assigned.get(&self.cursor)?;
        let since = match self.head_since {
            Some(head) if head > assigned_at => head,
            _ => assigned_at,
        };
        Some(since + self.stall_timeout)
    }

    /// Skip the cursor's index if its deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<Release> {
        match self.deadline() {
            Some(deadline) if now >= deadline => {}
            _ => return Vec::new(),
        }

        let index = self.cursor;
        tracing::debug!(index, "fragment did not arrive in time");
        let mut releases = vec![Release::Skip {
            index,
            reason: SkipReason::TimedOut,
        }];
        self.advance(now);
        self.drain(now, &mut releases);
        releases
    }

    /// Forget everything below `next_index` (interruption).
    ///
    /// Pending audio is dropped and the cursor jumps forward, so renders still
    /// in flight for the abandoned indices are discarded on arrival.
    /// Returns how many pending fragments were dropped.
    pub fn abandon_before(&mut self, next_index: u64) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        if next_index > self.cursor {
            self.cursor = next_index;
            self.head_since = None;
        }
        let cursor = self.cursor;
        self.assigned.retain(|&index, _| index >= cursor);
        dropped
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Nothing assigned is outstanding.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.assigned.is_empty()
    }

    fn arrive(&mut self, index: u64, slot: Slot, now: Instant) -> Vec<Release> {
        if index < self.cursor {
            tracing::debug!(index, cursor = self.cursor, "discarding stale render");
            return Vec::new();
        }
        if self.pending.contains_key(&index) {
            tracing::debug!(index, "discarding duplicate render");
            return Vec::new();
        }

        self.pending.insert(index, slot);
        let mut releases = Vec::new();
        self.drain(now, &mut releases);
        releases
    }

    fn drain(&mut self, now: Instant, releases: &mut Vec<Release>) {
        while let Some(slot) = self.pending.remove(&self.cursor) {
            let index = self.cursor;
            releases.push(match slot {
                Slot::Ready { turn, audio } => Release::Play { index, turn, audio },
                Slot::Failed => Release::Skip {
                    index,
                    reason: SkipReason::RenderFailed,
                },
            });
            self.advance(now);
        }
    }

    fn advance(&mut self, now: Instant) {
        self.assigned.remove(&self.cursor);
        self.cursor += 1;
        self.head_since = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(4);

    fn rendered(index: u64) -> RenderedFragment {
        RenderedFragment {
            index,
            turn: 0,
            audio: vec![index as u8],
        }
    }

    fn indices(releases: &[Release]) -> Vec<u64> {
        releases.iter().map(Release::index).collect()
    }

    fn played(releases: &[Release]) -> Vec<u64> {
        releases
            .iter()
            .filter_map(|r| match r {
                Release::Play { index, .. } => Some(*index),
                Release::Skip { .. } => None,
            })
            .collect()
    }

    fn sequencer_expecting(count: u64, now: Instant) -> PlaybackSequencer {
        let mut sequencer = PlaybackSequencer::new(TIMEOUT);
        for index in 0..count {
            sequencer.expect(index, now);
        }
        sequencer
    }

    #[test]
    fn test_in_order_arrival_releases_immediately() {
        let now = Instant::now();
        let mut sequencer = sequencer_expecting(2, now);
        assert_eq!(indices(&sequencer.accept(rendered(0), now)), vec![0]);
        assert_eq!(indices(&sequencer.accept(rendered(1), now)), vec![1]);
        assert_eq!(sequencer.cursor(), 2);
        assert!(sequencer.is_idle());
    }

    #[test]
    fn test_out_of_order_arrival_is_released_in_order() {
        let now = Instant::now();
        let mut sequencer = sequencer_expecting(3, now);

        assert!(sequencer.accept(rendered(2), now).is_empty());
        assert!(sequencer.accept(rendered(0), now).len() == 1);
        let releases = sequencer.accept(rendered(1), now);
        assert_eq!(indices(&releases), vec![1, 2]);
        assert_eq!(sequencer.pending_len(), 0);
    }

    #[test]
    fn test_every_completion_order_plays_in_index_order() {
        let orders: [[u64; 4]; 6] = [
            [0, 1, 2, 3],
            [3, 2, 1, 0],
            [1, 0, 3, 2],
            [2, 0, 3, 1],
            [3, 0, 1, 2],
            [1, 3, 0, 2],
        ];
        for order in orders {
            let now = Instant::now();
            let mut sequencer = sequencer_expecting(4, now);
            let mut all = Vec::new();
            for index in order {
                all.extend(sequencer.accept(rendered(index), now));
            }
            assert_eq!(played(&all), vec![0, 1, 2, 3], "order {:?}", order);
        }
    }

    #[test]
    fn test_duplicate_arrival_is_ignored() {
        let now = Instant::now();
        let mut sequencer = sequencer_expecting(3, now);

        assert!(sequencer.accept(rendered(2), now).is_empty());
        assert!(sequencer.accept(rendered(2), now).is_empty());
        assert_eq!(sequencer.pending_len(), 1);

        assert_eq!(indices(&sequencer.accept(rendered(0), now)), vec![0]);
        assert!(sequencer.accept(rendered(0), now).is_empty());
    }

    #[test]
    fn test_drain_releases_everything_contiguous() {
        let now = Instant::now();
        let mut sequencer = sequencer_expecting(6, now);
        for index in [1, 2, 3, 5] {
            assert!(sequencer.accept(rendered(index), now).is_empty());
        }
        let releases = sequencer.accept(rendered(0), now);
        assert_eq!(indices(&releases), vec![0, 1, 2, 3]);
        assert_eq!(sequencer.cursor(), 4);
        assert_eq!(sequencer.pending_len(), 1);
    }

    #[test]
    fn test_rejected_index_is_skipped_without_waiting() {
        let now = Instant::now();
        let mut sequencer = sequencer_expecting(3, now);

        assert!(sequencer.accept(rendered(2), now).is_empty());
        assert_eq!(indices(&sequencer.accept(rendered(0), now)), vec![0]);

        let releases = sequencer.reject(1, now);
        assert_eq!(
            releases,
            vec![
                Release::Skip {
                    index: 1,
                    reason: SkipReason::RenderFailed
                },
                Release::Play {
                    index: 2,
                    turn: 0,
                    audio: vec![2]
                },
            ]
        );
    }

    #[test]
    fn test_missing_index_times_out() {
        let start = Instant::now();
        let mut sequencer = sequencer_expecting(3, start);

        assert!(sequencer.accept(rendered(2), start).is_empty());
        assert_eq!(indices(&sequencer.accept(rendered(0), start)), vec![0]);

        let deadline = sequencer.deadline().unwrap();
        assert_eq!(deadline, start + TIMEOUT);
        assert!(sequencer.expire(start + TIMEOUT / 2).is_empty());

        let releases = sequencer.expire(deadline);
        assert_eq!(
            releases,
            vec![
                Release::Skip {
                    index: 1,
                    reason: SkipReason::TimedOut
                },
                Release::Play {
                    index: 2,
                    turn: 0,
                    audio: vec![2]
                },
            ]
        );

        // Late arrival of the skipped index is stale
        assert!(sequencer.accept(rendered(1), deadline).is_empty());
        assert!(sequencer.is_idle());
    }

    #[test]
    fn test_wait_counts_from_reaching_the_head() {
        let start = Instant::now();
        let mut sequencer = sequencer_expecting(2, start);

        let later = start + Duration::from_secs(3);
        sequencer.accept(rendered(0), later);

        // Index 1 has been assigned since `start` but only became the head at `later`
        assert_eq!(sequencer.deadline(), Some(later + TIMEOUT));
    }

    #[test]
    fn test_wait_counts_from_assignment_when_later() {
        let start = Instant::now();
        let mut sequencer = PlaybackSequencer::new(TIMEOUT);
        sequencer.expect(0, start);
        sequencer.accept(rendered(0), start);

        let assigned = start + Duration::from_secs(10);
        sequencer.expect(1, assigned);
        assert_eq!(sequencer.deadline(), Some(assigned + TIMEOUT));
    }

    #[test]
    fn test_no_deadline_when_nothing_is_awaited() {
        let now = Instant::now();
        let mut sequencer = PlaybackSequencer::new(TIMEOUT);
        assert_eq!(sequencer.deadline(), None);
        assert!(sequencer.expire(now + TIMEOUT * 10).is_empty());

        // Pending above an unassigned head does not arm the timer either
        sequencer.accept(rendered(1), now);
        assert_eq!(sequencer.deadline(), None);
    }

    #[test]
    fn test_abandon_before_discards_pending_and_late_renders() {
        let now = Instant::now();
        let mut sequencer = sequencer_expecting(4, now);

        sequencer.accept(rendered(0), now);
        sequencer.accept(rendered(2), now);
        sequencer.accept(rendered(3), now);

        assert_eq!(sequencer.abandon_before(4), 2);
        assert_eq!(sequencer.cursor(), 4);
        assert_eq!(sequencer.pending_len(), 0);
        assert!(sequencer.is_idle());
        assert_eq!(sequencer.deadline(), None);

        // The render for index 1 was still in flight
        assert!(sequencer.accept(rendered(1), now).is_empty());

        // The next turn picks up where the counter left off
        sequencer.expect(4, now);
        assert_eq!(indices(&sequencer.accept(rendered(4), now)), vec![4]);
    }

    #[test]
    fn test_abandon_before_never_moves_cursor_backwards() {
        let now = Instant::now();
        let mut sequencer = sequencer_expecting(3, now);
        for index in 0..3 {
            sequencer.accept(rendered(index), now);
        }
        sequencer.abandon_before(1);
        assert_eq!(sequencer.cursor(), 3);
    }

    #[test]
    fn test_each_index_released_at_most_once() {
        let now = Instant::now();
        let mut sequencer = sequencer_expecting(5, now);
        let mut all = Vec::new();
        for index in [4, 1, 4, 0, 1, 3, 2, 2, 0] {
            all.extend(sequencer.accept(rendered(index), now));
        }
        assert_eq!(indices(&all), vec![0, 1, 2, 3, 4]);
    }
}

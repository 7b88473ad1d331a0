//! Receive-side reordering of message events by position.
//!
//! The bus does not promise per-conversation ordering, so each conversation
//! gets a lane that releases positions strictly in sequence. An event that
//! arrives ahead of a missing position waits at most `window`; when the window
//! expires the lane flushes what it holds in position order and moves past
//! the gap. Positions at or below the last released one are dropped as
//! duplicates or stragglers. A gap caused by a failed write (positions may
//! skip) therefore costs one window of latency, never a stall.
//!
//! Edits and deletes are not sequenced themselves, but one that targets a
//! position still pending in its lane is held and released right after it.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

/// What a push or an expiry released.
#[derive(Debug)]
pub struct Release<T> {
    /// Items ready for delivery, in position order per lane.
    pub ready: Vec<T>,
    /// Items discarded as duplicate or stale.
    pub dropped: u64,
    /// Gaps skipped because the window expired.
    pub skipped: u64,
}

impl<T> Default for Release<T> {
    fn default() -> Self {
        Self {
            ready: Vec::new(),
            dropped: 0,
            skipped: 0,
        }
    }
}

impl<T> Release<T> {
    fn absorb(&mut self, other: Release<T>) {
        self.ready.extend(other.ready);
        self.dropped += other.dropped;
        self.skipped += other.skipped;
    }
}

struct Lane<T> {
    last_released: Option<i64>,
    pending: BTreeMap<i64, T>,
    followups: HashMap<i64, Vec<T>>,
    deadline: Option<Instant>,
    touched: Instant,
}

impl<T> Lane<T> {
    fn new(now: Instant) -> Self {
        Self {
            last_released: None,
            pending: BTreeMap::new(),
            followups: HashMap::new(),
            deadline: None,
            touched: now,
        }
    }

    fn next_expected(&self) -> i64 {
        self.last_released.map_or(1, |last| last + 1)
    }

    fn release(&mut self, position: i64, item: T, ready: &mut Vec<T>) {
        self.last_released = Some(position);
        ready.push(item);
        if let Some(followups) = self.followups.remove(&position) {
            ready.extend(followups);
        }
    }

    fn drain_consecutive(&mut self, ready: &mut Vec<T>) {
        loop {
            let expected = self.next_expected();
            let Some(entry) = self.pending.first_entry() else {
                break;
            };
            if *entry.key() != expected {
                break;
            }
            let (position, item) = entry.remove_entry();
            self.release(position, item, ready);
        }
    }

    fn flush(&mut self, release: &mut Release<T>) {
        for (position, item) in std::mem::take(&mut self.pending) {
            if self.last_released.is_some() && position != self.next_expected() {
                release.skipped += 1;
            }
            self.release(position, item, &mut release.ready);
        }
        self.deadline = None;
    }
}

pub struct ReorderBuffer<T> {
    window: Duration,
    idle_ttl: Duration,
    lanes: HashMap<String, Lane<T>>,
}

impl<T> ReorderBuffer<T> {
    /// `idle_ttl` is how long an empty lane remembers its last position.
    pub fn new(window: Duration, idle_ttl: Duration) -> Self {
        Self {
            window,
            idle_ttl,
            lanes: HashMap::new(),
        }
    }

    pub fn push(&mut self, lane_key: &str, position: i64, item: T, now: Instant) -> Release<T> {
        let mut release = Release::default();
        let window = self.window;
        let lane = self
            .lanes
            .entry(lane_key.to_string())
            .or_insert_with(|| Lane::new(now));
        lane.touched = now;

        if lane.last_released.is_some_and(|last| position <= last)
            || lane.pending.contains_key(&position)
        {
            release.dropped += 1;
            return release;
        }

        if position == lane.next_expected() {
            lane.release(position, item, &mut release.ready);
            lane.drain_consecutive(&mut release.ready);
            if lane.pending.is_empty() {
                lane.deadline = None;
            }
        } else {
            lane.pending.insert(position, item);
            if lane.deadline.is_none() {
                lane.deadline = Some(now + window);
            }
        }

        if window.is_zero() && !lane.pending.is_empty() {
            lane.flush(&mut release);
        }
        release
    }

    /// Hold `item` behind the pending entry at `position`, or release it at
    /// once when nothing is pending there.
    pub fn push_after(&mut self, lane_key: &str, position: i64, item: T) -> Release<T> {
        let mut release = Release::default();
        match self.lanes.get_mut(lane_key) {
            Some(lane) if lane.pending.contains_key(&position) => {
                lane.followups.entry(position).or_default().push(item);
            }
            _ => release.ready.push(item),
        }
        release
    }

    /// Flush lanes whose window has passed and prune long-idle lanes.
    pub fn expire(&mut self, now: Instant) -> Release<T> {
        let mut release = Release::default();
        for lane in self.lanes.values_mut() {
            if lane.deadline.is_some_and(|deadline| deadline <= now) {
                let mut flushed = Release::default();
                lane.flush(&mut flushed);
                release.absorb(flushed);
            }
        }

        let idle_ttl = self.idle_ttl;
        self.lanes.retain(|_, lane| {
            !lane.pending.is_empty() || now.saturating_duration_since(lane.touched) < idle_ttl
        });
        release
    }

    /// Release everything still buffered, e.g. on shutdown.
    pub fn drain(&mut self) -> Release<T> {
        let mut release = Release::default();
        for lane in self.lanes.values_mut() {
            lane.flush(&mut release);
        }
        release
    }

    pub fn pending(&self) -> usize {
        self.lanes
            .values()
            .map(|lane| lane.pending.len() + lane.followups.values().map(Vec::len).sum::<usize>())
            .sum()
    }

    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);
    const IDLE: Duration = Duration::from_secs(60);

    fn buffer() -> ReorderBuffer<i64> {
        ReorderBuffer::new(WINDOW, IDLE)
    }

    #[test]
    fn test_in_order_events_pass_straight_through() {
        let mut buffer = buffer();
        let now = Instant::now();

        for position in 1..=3 {
            let release = buffer.push("c1", position, position, now);
            assert_eq!(release.ready, vec![position]);
        }
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_small_burst_is_reordered() {
        let mut buffer = buffer();
        let now = Instant::now();
        buffer.push("c1", 1, 1, now);

        assert!(buffer.push("c1", 3, 3, now).ready.is_empty());
        assert!(buffer.push("c1", 4, 4, now).ready.is_empty());
        let release = buffer.push("c1", 2, 2, now);

        assert_eq!(release.ready, vec![2, 3, 4]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_first_event_of_new_lane_waits_for_earlier_positions() {
        let mut buffer = buffer();
        let now = Instant::now();

        assert!(buffer.push("c1", 6, 6, now).ready.is_empty());
        assert!(buffer.push("c1", 5, 5, now).ready.is_empty());

        let release = buffer.expire(now + WINDOW);
        assert_eq!(release.ready, vec![5, 6]);
        assert_eq!(release.skipped, 0);
    }

    #[test]
    fn test_gap_is_skipped_after_window() {
        let mut buffer = buffer();
        let now = Instant::now();
        buffer.push("c1", 1, 1, now);
        buffer.push("c1", 3, 3, now);

        assert!(buffer.expire(now + WINDOW / 2).ready.is_empty());

        let release = buffer.expire(now + WINDOW);
        assert_eq!(release.ready, vec![3]);
        assert_eq!(release.skipped, 1);

        // a straggler for the skipped position is dropped
        let late = buffer.push("c1", 2, 2, now + WINDOW);
        assert!(late.ready.is_empty());
        assert_eq!(late.dropped, 1);

        assert_eq!(buffer.push("c1", 4, 4, now + WINDOW).ready, vec![4]);
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let mut buffer = buffer();
        let now = Instant::now();
        buffer.push("c1", 1, 1, now);
        buffer.push("c1", 3, 3, now);

        assert_eq!(buffer.push("c1", 1, 1, now).dropped, 1);
        assert_eq!(buffer.push("c1", 3, 3, now).dropped, 1);
        assert_eq!(buffer.pending(), 1);
    }

    #[test]
    fn test_lanes_are_independent() {
        let mut buffer = buffer();
        let now = Instant::now();
        buffer.push("c1", 1, 1, now);
        buffer.push("c1", 3, 3, now);

        assert_eq!(buffer.push("c2", 1, 10, now).ready, vec![10]);
        assert_eq!(buffer.pending(), 1);
    }

    #[test]
    fn test_zero_window_never_holds_events() {
        let mut buffer = ReorderBuffer::new(Duration::ZERO, IDLE);
        let now = Instant::now();
        buffer.push("c1", 1, 1, now);

        let release = buffer.push("c1", 3, 3, now);
        assert_eq!(release.ready, vec![3]);
        assert_eq!(release.skipped, 1);
    }

    #[test]
    fn test_amendment_waits_for_its_pending_create() {
        let mut buffer = buffer();
        let now = Instant::now();
        buffer.push("c1", 1, 1, now);
        buffer.push("c1", 3, 3, now);

        // an edit of position 3 (encoded as 30) must not overtake the create
        assert!(buffer.push_after("c1", 3, 30).ready.is_empty());
        assert_eq!(buffer.pending(), 2);

        let release = buffer.push("c1", 2, 2, now);
        assert_eq!(release.ready, vec![2, 3, 30]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_amendment_is_released_with_an_expired_gap() {
        let mut buffer = buffer();
        let now = Instant::now();
        buffer.push("c1", 1, 1, now);
        buffer.push("c1", 3, 3, now);
        buffer.push_after("c1", 3, 30);
        buffer.push_after("c1", 3, 31);

        let release = buffer.expire(now + WINDOW);
        assert_eq!(release.ready, vec![3, 30, 31]);
        assert_eq!(release.skipped, 1);
    }

    #[test]
    fn test_amendment_without_pending_create_passes_through() {
        let mut buffer = buffer();
        let now = Instant::now();
        buffer.push("c1", 1, 1, now);
        buffer.push("c1", 3, 3, now);

        assert_eq!(buffer.push_after("c1", 1, 10).ready, vec![10]);
        assert_eq!(buffer.push_after("c2", 5, 50).ready, vec![50]);
        assert_eq!(buffer.lanes(), 1);
    }

    #[test]
    fn test_idle_lanes_are_pruned() {
        let mut buffer = buffer();
        let now = Instant::now();
        buffer.push("c1", 1, 1, now);
        assert_eq!(buffer.lanes(), 1);

        buffer.expire(now + IDLE);
        assert_eq!(buffer.lanes(), 0);
    }

    #[test]
    fn test_drain_flushes_everything() {
        let mut buffer = buffer();
        let now = Instant::now();
        buffer.push("c1", 4, 4, now);
        buffer.push("c2", 9, 9, now);

        let mut ready = buffer.drain().ready;
        ready.sort();
        assert_eq!(ready, vec![4, 9]);
        assert_eq!(buffer.pending(), 0);
    }
}

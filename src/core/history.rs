//! Bounded history of recent activity for status displays.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of records kept in the agent's activity history.
pub const HISTORY_CAPACITY: usize = 50;

/// A fixed-capacity FIFO buffer. Pushing onto a full buffer evicts the oldest item.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    /// The `n` most recent items, oldest first.
    pub fn latest(&self, n: usize) -> impl Iterator<Item = &T> {
        self.items.iter().skip(self.items.len().saturating_sub(n))
    }
}

impl<T: Clone> RingBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// Kind of recorded activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Keypress,
    MouseClick,
    MouseMove,
    Scroll,
    WindowSwitch,
    Suspicious,
}

/// One entry of the activity history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    pub detail: String,
    pub app: Option<String>,
}

/// Coarse label for what the user is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentActivity {
    TypingHeavily,
    Typing,
    Clicking,
    Navigating,
    Active,
    Idle,
}

/// Look-back used by [`classify_activity`].
const RECENT_WINDOW_SECS: i64 = 5;

/// Classify the last few seconds of history.
///
/// Moves are only recorded every tenth event, so two recorded moves already
/// stand for sustained pointer travel.
pub fn classify_activity(
    history: &RingBuffer<ActivityRecord>,
    last_activity_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> CurrentActivity {
    let cutoff = now - Duration::seconds(RECENT_WINDOW_SECS);
    let (mut keys, mut clicks, mut moves) = (0, 0, 0);

    for record in history.latest(20).filter(|r| r.timestamp > cutoff) {
        match record.kind {
            ActivityKind::Keypress => keys += 1,
            ActivityKind::MouseClick => clicks += 1,
            ActivityKind::MouseMove => moves += 1,
            _ => {}
        }
    }

    if keys > 5 {
        CurrentActivity::TypingHeavily
    } else if keys > 0 {
        CurrentActivity::Typing
    } else if clicks > 3 {
        CurrentActivity::Clicking
    } else if moves > 1 {
        CurrentActivity::Navigating
    } else if now - last_activity_at < Duration::seconds(RECENT_WINDOW_SECS) {
        CurrentActivity::Active
    } else {
        CurrentActivity::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(at: DateTime<Utc>, kind: ActivityKind) -> ActivityRecord {
        ActivityRecord {
            timestamp: at,
            kind,
            detail: String::new(),
            app: None,
        }
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut buffer = RingBuffer::new(3);
        for i in 0..5 {
            buffer.push(i);
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.to_vec(), vec![2, 3, 4]);
        assert_eq!(buffer.latest(2).copied().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn test_classify_typing() {
        let now = Utc::now();
        let mut history = RingBuffer::new(HISTORY_CAPACITY);
        for i in 0..7 {
            history.push(record(now - Duration::milliseconds(100 * i), ActivityKind::Keypress));
        }
        assert_eq!(
            classify_activity(&history, now, now),
            CurrentActivity::TypingHeavily
        );

        let mut history = RingBuffer::new(HISTORY_CAPACITY);
        history.push(record(now, ActivityKind::Keypress));
        assert_eq!(classify_activity(&history, now, now), CurrentActivity::Typing);
    }

    #[test]
    fn test_classify_ignores_stale_records() {
        let now = Utc::now();
        let mut history = RingBuffer::new(HISTORY_CAPACITY);
        for _ in 0..10 {
            history.push(record(now - Duration::seconds(30), ActivityKind::Keypress));
        }
        let last = now - Duration::seconds(30);
        assert_eq!(classify_activity(&history, last, now), CurrentActivity::Idle);
        assert_eq!(
            classify_activity(&history, now - Duration::seconds(1), now),
            CurrentActivity::Active
        );
    }
}

use std::{collections::BTreeMap, time::Instant};

/// Handle to one pending deadline. Ordered by due time, then by the order
/// deadlines were scheduled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey {
    due: Instant,
    seq: u64,
}

impl TimerKey {
    pub fn due(&self) -> Instant {
        self.due
    }
}

/// One-shot deadlines that can be cancelled before they fire.
#[derive(Debug)]
pub(crate) struct TimerQueue<T> {
    next_seq: u64,
    pending: BTreeMap<TimerKey, T>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            next_seq: 0,
            pending: BTreeMap::new(),
        }
    }
}

impl<T> TimerQueue<T> {
    pub(crate) fn schedule(&mut self, due: Instant, target: T) -> TimerKey {
        let key = TimerKey {
            due,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.pending.insert(key, target);
        key
    }

    pub(crate) fn cancel(&mut self, key: TimerKey) -> Option<T> {
        self.pending.remove(&key)
    }

    pub(crate) fn next_due(&self) -> Option<Instant> {
        self.pending.keys().next().map(TimerKey::due)
    }

    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<(TimerKey, T)> {
        match self.pending.first_key_value() {
            Some((key, _)) if key.due <= now => self.pending.pop_first(),
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

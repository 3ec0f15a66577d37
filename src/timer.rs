//! Cancellable deferred tasks on a caller-driven clock.
//!
//! The clock runs on the host's audio time. Production code feeds it from
//! the host's timer callbacks and from every incoming command; tests advance
//! it by hand. Tasks fire in due-time order, ties in scheduling order.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

/// Handle to a scheduled task; pass to `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Entry<T> {
    due: f64,
    id: TimerId,
    task: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.total_cmp(&other.due).then(self.id.cmp(&other.id))
    }
}

/// Min-queue of deferred tasks.
#[derive(Debug)]
pub struct TimerQueue<T> {
    now: f64,
    next_id: u64,
    heap: BinaryHeap<Reverse<Entry<T>>>,
    live: HashSet<TimerId>,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        TimerQueue {
            now: 0.0,
            next_id: 0,
            heap: BinaryHeap::new(),
            live: HashSet::new(),
        }
    }

    /// Timer clock: the latest time passed to `sync` or `pop_due`, or the due
    /// time of the task currently firing.
    pub fn now(&self) -> f64 {
        self.now
    }

    /// Move the clock forward to `now` without firing anything. The clock
    /// never runs backwards.
    pub fn sync(&mut self, now: f64) {
        if now.is_finite() {
            self.now = self.now.max(now);
        }
    }

    /// Schedule `task` to fire `delay` seconds from the timer clock.
    pub fn schedule_in(&mut self, delay: f64, task: T) -> TimerId {
        let due = self.now + delay.max(0.0);
        self.schedule_at(due, task)
    }

    pub fn schedule_at(&mut self, due: f64, task: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.live.insert(id);
        self.heap.push(Reverse(Entry { due, id, task }));
        id
    }

    /// Cancel a pending task. Returns false if it already fired or was
    /// cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.live.remove(&id)
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.live.contains(&id)
    }

    /// Number of tasks still waiting to fire.
    pub fn pending(&self) -> usize {
        self.live.len()
    }

    /// Pop the next task due at or before `now`, moving the clock to its due
    /// time. When nothing is due the clock moves to `now` and `None` is
    /// returned.
    pub fn pop_due(&mut self, now: f64) -> Option<(TimerId, T)> {
        while let Some(Reverse(top)) = self.heap.peek() {
            if !self.live.contains(&top.id) {
                self.heap.pop();
                continue;
            }
            if top.due > now {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            self.live.remove(&entry.id);
            self.now = self.now.max(entry.due);
            return Some((entry.id, entry.task));
        }
        self.now = self.now.max(now);
        None
    }

    /// Due time of the earliest live task.
    pub fn next_due(&self) -> Option<f64> {
        self.heap
            .iter()
            .filter(|Reverse(e)| self.live.contains(&e.id))
            .map(|Reverse(e)| e.due)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Cancel everything.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Clocks and cancellable deferred tasks. Nothing here sleeps: the owner
// advances time by calling `drain_due` from its tick.

use std::cell::Cell;
use std::rc::Rc;

use crate::model::Millis;

pub trait Clock {
    fn now(&self) -> Millis;
}

/// Manually advanced clock for tests and replays. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct VirtualClock {
    now: Rc<Cell<Millis>>,
}

impl VirtualClock {
    pub fn new(start: Millis) -> Self {
        Self { now: Rc::new(Cell::new(start)) }
    }

    pub fn set(&self, t: Millis) {
        self.now.set(t);
    }

    pub fn advance(&self, dt: Millis) {
        self.now.set(self.now.get() + dt);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Millis {
        self.now.get()
    }
}

/// Milliseconds since the clock was created, from the monotonic OS clock.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone, Debug)]
pub struct SystemClock {
    origin: std::time::Instant,
}

#[cfg(not(target_arch = "wasm32"))]
impl SystemClock {
    pub fn new() -> Self {
        Self { origin: std::time::Instant::now() }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Clock for SystemClock {
    fn now(&self) -> Millis {
        self.origin.elapsed().as_millis() as Millis
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Scheduled<T> {
    id: TimerId,
    due: Millis,
    payload: T,
}

/// Deferred payloads keyed by due time. Cancelling is O(n) which is fine for
/// the handful of timers an input session keeps.
#[derive(Debug)]
pub struct TimerQueue<T> {
    next_id: u64,
    entries: Vec<Scheduled<T>>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self { next_id: 0, entries: Vec::new() }
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: Millis, payload: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Scheduled { id, due, payload });
        id
    }

    /// Returns false if the timer already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Removes and returns every payload due at or before `now`, earliest first.
    pub fn drain_due(&mut self, now: Millis) -> Vec<T> {
        let mut due: Vec<Scheduled<T>> = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].due <= now {
                due.push(self.entries.remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|e| (e.due, e.id.0));
        due.into_iter().map(|e| e.payload).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_is_shared_between_clones() {
        let clock = VirtualClock::new(10);
        let other = clock.clone();
        clock.advance(5);
        assert_eq!(other.now(), 15);
    }

    #[test]
    fn drains_only_due_entries_in_order() {
        let mut q = TimerQueue::new();
        q.schedule(300, "late");
        q.schedule(100, "early");
        q.schedule(200, "middle");
        assert_eq!(q.drain_due(250), vec!["early", "middle"]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.drain_due(300), vec!["late"]);
        assert!(q.is_empty());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut q = TimerQueue::new();
        let id = q.schedule(100, 1);
        assert!(q.is_pending(id));
        assert!(q.cancel(id));
        assert!(!q.cancel(id));
        assert!(q.drain_due(1_000).is_empty());
    }
}

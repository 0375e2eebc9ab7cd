//! Gesture classification on top of [`TouchTracker`].
//!
//! Continuous gestures (swipe, pinch, zoom, rotate) are emitted on every move
//! that crosses a threshold. Discrete gestures (tap, double-tap, long-press)
//! are decided when a contact ends:
//!
//! * shorter than `tap_max_duration_ms` → tap candidate. The single tap is
//!   deferred by `double_tap_interval_ms`; a second qualifying tap inside that
//!   window cancels it and emits `DoubleTap` instead.
//! * longer than `long_press_min_duration_ms` → `LongPress`.
//! * anything in between, or anything that travelled further than
//!   `tap_max_movement`, emits nothing.
//!
//! Contacts that shared the screen with another finger belong to a two-finger
//! gesture and never produce a discrete gesture.
//!
//! Deferred taps live in a [`TimerQueue`] owned by the classifier. Every input
//! handler first fires timers due at the event's timestamp, and the host calls
//! [`GestureClassifier::tick`] between events.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use log::{debug, error};

use crate::config::GestureConfig;
use crate::model::{GestureEvent, GestureKind, Millis, TouchId, Vec2};
use crate::state::timer::{TimerId, TimerQueue};
use crate::state::touch::TouchTracker;
use crate::util::{angle_deg, normalize_angle};

pub type GestureCallback = Box<dyn FnMut(&GestureEvent)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Per-kind callback lists, dispatched in registration order.
#[derive(Default)]
pub struct GestureSubscribers {
    next_id: u64,
    handlers: BTreeMap<GestureKind, Vec<(SubscriptionId, GestureCallback)>>,
}

impl GestureSubscribers {
    pub fn on(&mut self, kind: GestureKind, callback: impl FnMut(&GestureEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.entry(kind).or_default().push((id, Box::new(callback)));
        id
    }

    pub fn off(&mut self, kind: GestureKind, id: SubscriptionId) -> bool {
        let Some(list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        list.len() != before
    }

    pub fn count(&self, kind: GestureKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// A panicking callback is logged and skipped; the rest still run.
    /// Returns how many callbacks failed.
    pub fn dispatch(&mut self, event: &GestureEvent) -> usize {
        let Some(list) = self.handlers.get_mut(&event.kind()) else {
            return 0;
        };
        let mut failed = 0;
        for (id, callback) in list.iter_mut() {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                failed += 1;
                error!("gesture subscriber {:?} panicked on {}", id, event.kind().as_str());
            }
        }
        failed
    }
}

#[derive(Clone, Copy, Debug)]
struct Baseline {
    ids: (TouchId, TouchId),
    distance: f64,
    angle: f64,
}

#[derive(Clone, Copy, Debug)]
struct LastTap {
    time: Millis,
    position: Vec2,
}

pub struct GestureClassifier {
    config: GestureConfig,
    tracker: TouchTracker,
    baseline: Option<Baseline>,
    last_tap: Option<LastTap>,
    pending_tap: Option<TimerId>,
    timers: TimerQueue<GestureEvent>,
    subscribers: GestureSubscribers,
    disposed: bool,
}

impl GestureClassifier {
    pub fn new(config: GestureConfig) -> Self {
        let tracker = TouchTracker::new(config.path_capacity);
        Self {
            config,
            tracker,
            baseline: None,
            last_tap: None,
            pending_tap: None,
            timers: TimerQueue::new(),
            subscribers: GestureSubscribers::default(),
            disposed: false,
        }
    }

    pub fn tracker(&self) -> &TouchTracker {
        &self.tracker
    }

    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    pub fn on(&mut self, kind: GestureKind, callback: impl FnMut(&GestureEvent) + 'static) -> SubscriptionId {
        self.subscribers.on(kind, callback)
    }

    pub fn off(&mut self, kind: GestureKind, id: SubscriptionId) -> bool {
        self.subscribers.off(kind, id)
    }

    pub fn has_pending_tap(&self) -> bool {
        self.pending_tap.is_some()
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn touch_begin(&mut self, id: TouchId, position: Vec2, time: Millis) -> Vec<GestureEvent> {
        if self.disposed {
            return Vec::new();
        }
        let out = self.fire_due(time);
        self.tracker.begin(id, position, time);
        let stale = match self.baseline {
            Some(b) => b.ids.0 == id || b.ids.1 == id || !self.baseline_live(b),
            None => true,
        };
        if stale {
            self.rebaseline();
        }
        out
    }

    pub fn touch_move(&mut self, id: TouchId, position: Vec2, time: Millis) -> Vec<GestureEvent> {
        if self.disposed {
            return Vec::new();
        }
        let mut out = self.fire_due(time);
        if !self.tracker.update(id, position, time) {
            return out;
        }
        if self.tracker.count() == 1 {
            let swipe = self
                .tracker
                .get(id)
                .filter(|t| t.velocity.length() > self.config.swipe_min_velocity)
                .map(|t| GestureEvent::Swipe { position: t.position, delta: t.delta, velocity: t.velocity });
            if let Some(event) = swipe {
                self.emit(event, &mut out);
            }
            return out;
        }
        let Some(b) = self.baseline else {
            return out;
        };
        if id != b.ids.0 && id != b.ids.1 {
            return out;
        }
        let (Some(a), Some(c)) = (self.tracker.get(b.ids.0), self.tracker.get(b.ids.1)) else {
            return out;
        };
        let (pa, pc) = (a.position, c.position);
        let center = pa.midpoint(pc);
        let distance = pa.distance(pc);
        if (distance - b.distance).abs() > self.config.pinch_threshold && b.distance > 0.0 {
            let scale = distance / b.distance;
            let event = if scale > 1.0 {
                GestureEvent::Zoom { center, scale }
            } else {
                GestureEvent::Pinch { center, scale }
            };
            self.emit(event, &mut out);
        }
        let angle_delta = normalize_angle(angle_deg(pa, pc) - b.angle);
        if angle_delta.abs() > self.config.rotate_threshold_deg {
            self.emit(GestureEvent::Rotate { center, angle_delta }, &mut out);
        }
        out
    }

    pub fn touch_end(&mut self, id: TouchId, time: Millis) -> Vec<GestureEvent> {
        if self.disposed {
            return Vec::new();
        }
        let mut out = self.fire_due(time);
        let Some(point) = self.tracker.end(id, time) else {
            return out;
        };
        self.release_baseline(id);
        if point.multi || point.displacement() > self.config.tap_max_movement {
            return out;
        }
        if point.duration < self.config.tap_max_duration_ms {
            self.resolve_tap(point.position, time, &mut out);
        } else if point.duration > self.config.long_press_min_duration_ms {
            let event = GestureEvent::LongPress { position: point.position, duration: point.duration };
            self.emit(event, &mut out);
        }
        out
    }

    /// Drops the contact without any discrete gesture.
    pub fn touch_cancel(&mut self, id: TouchId) {
        if self.disposed {
            return;
        }
        if self.tracker.cancel(id).is_some() {
            debug!("touch {} cancelled", id);
            self.release_baseline(id);
        }
    }

    /// Fires deferred taps that are due at `now`.
    pub fn tick(&mut self, now: Millis) -> Vec<GestureEvent> {
        if self.disposed {
            return Vec::new();
        }
        self.fire_due(now)
    }

    /// Cancels pending taps and forgets all contacts. Later calls emit nothing.
    pub fn dispose(&mut self) {
        self.timers.clear();
        self.pending_tap = None;
        self.last_tap = None;
        self.baseline = None;
        self.tracker.clear();
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn resolve_tap(&mut self, position: Vec2, time: Millis, out: &mut Vec<GestureEvent>) {
        let second = self.last_tap.filter(|last| {
            time.saturating_sub(last.time) < self.config.double_tap_interval_ms
                && last.position.distance(position) <= self.config.double_tap_max_distance
        });
        if second.is_some() {
            if let Some(pending) = self.pending_tap.take() {
                self.timers.cancel(pending);
            }
            self.last_tap = None;
            self.emit(GestureEvent::DoubleTap { position, time }, out);
            return;
        }
        let due = time + self.config.double_tap_interval_ms;
        self.pending_tap = Some(self.timers.schedule(due, GestureEvent::Tap { position, time }));
        self.last_tap = Some(LastTap { time, position });
    }

    fn fire_due(&mut self, now: Millis) -> Vec<GestureEvent> {
        let mut out = Vec::new();
        let due = self.timers.drain_due(now);
        if due.is_empty() {
            return out;
        }
        if let Some(id) = self.pending_tap {
            if !self.timers.is_pending(id) {
                self.pending_tap = None;
            }
        }
        for event in due {
            self.emit(event, &mut out);
        }
        out
    }

    fn emit(&mut self, event: GestureEvent, out: &mut Vec<GestureEvent>) {
        debug!("gesture {} at ({:.1}, {:.1})", event.kind().as_str(), event.position().x, event.position().y);
        self.subscribers.dispatch(&event);
        out.push(event);
    }

    fn baseline_live(&self, b: Baseline) -> bool {
        self.tracker.get(b.ids.0).is_some() && self.tracker.get(b.ids.1).is_some()
    }

    fn rebaseline(&mut self) {
        self.baseline = self.tracker.pair().map(|(a, b)| Baseline {
            ids: (a.id, b.id),
            distance: a.position.distance(b.position),
            angle: angle_deg(a.position, b.position),
        });
    }

    /// A departing member of the tracked pair invalidates the baseline; if two
    /// fingers remain the next pair starts from scratch.
    fn release_baseline(&mut self, id: TouchId) {
        if self.tracker.count() < 2 {
            self.baseline = None;
            return;
        }
        if let Some(b) = self.baseline {
            if b.ids.0 == id || b.ids.1 == id {
                self.rebaseline();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn classifier() -> GestureClassifier {
        GestureClassifier::new(GestureConfig::default())
    }

    fn kinds(events: &[GestureEvent]) -> Vec<GestureKind> {
        events.iter().map(GestureEvent::kind).collect()
    }

    fn tap(c: &mut GestureClassifier, id: TouchId, at: Vec2, start: Millis, end: Millis) -> Vec<GestureEvent> {
        let mut out = c.touch_begin(id, at, start);
        out.extend(c.touch_end(id, end));
        out
    }

    fn recorder(c: &mut GestureClassifier) -> Rc<RefCell<Vec<GestureEvent>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        for kind in GestureKind::ALL {
            let seen = seen.clone();
            c.on(kind, move |e| seen.borrow_mut().push(e.clone()));
        }
        seen
    }

    #[test]
    fn single_tap_is_deferred_until_interval_elapses() {
        let mut c = classifier();
        let seen = recorder(&mut c);
        let p = Vec2::new(50.0, 50.0);
        assert!(tap(&mut c, 1, p, 0, 100).is_empty());
        assert!(c.has_pending_tap());
        assert!(c.tick(399).is_empty());
        let fired = c.tick(400);
        assert_eq!(fired, vec![GestureEvent::Tap { position: p, time: 100 }]);
        assert!(!c.has_pending_tap());
        assert!(c.tick(10_000).is_empty());
        assert_eq!(kinds(&seen.borrow()), vec![GestureKind::Tap]);
    }

    #[test]
    fn late_flushed_tap_keeps_its_lift_time() {
        let mut c = classifier();
        let p = Vec2::new(20.0, 20.0);
        tap(&mut c, 1, p, 360, 400);
        // No tick until the next contact, long after the tap was due.
        let out = c.touch_begin(2, Vec2::new(300.0, 300.0), 1_000);
        assert_eq!(out, vec![GestureEvent::Tap { position: p, time: 400 }]);
    }

    #[test]
    fn two_quick_taps_make_one_double_tap_and_no_tap() {
        let mut c = classifier();
        let seen = recorder(&mut c);
        let p = Vec2::new(50.0, 50.0);
        assert!(tap(&mut c, 1, p, 0, 80).is_empty());
        let out = tap(&mut c, 2, Vec2::new(55.0, 52.0), 150, 220);
        assert_eq!(kinds(&out), vec![GestureKind::DoubleTap]);
        assert!(!c.has_pending_tap());
        c.tick(5_000);
        assert_eq!(kinds(&seen.borrow()), vec![GestureKind::DoubleTap]);
    }

    #[test]
    fn distant_second_tap_is_its_own_tap() {
        let mut c = classifier();
        let seen = recorder(&mut c);
        tap(&mut c, 1, Vec2::new(0.0, 0.0), 0, 50);
        tap(&mut c, 2, Vec2::new(300.0, 0.0), 100, 150);
        c.tick(1_000);
        assert_eq!(kinds(&seen.borrow()), vec![GestureKind::Tap, GestureKind::Tap]);
    }

    #[test]
    fn late_second_tap_fires_first_tap_before_classifying() {
        let mut c = classifier();
        let p = Vec2::new(10.0, 10.0);
        tap(&mut c, 1, p, 0, 50);
        // No tick in between: the begin at 400 flushes the tap due at 350.
        let out = tap(&mut c, 2, p, 400, 450);
        assert_eq!(kinds(&out), vec![GestureKind::Tap]);
        assert!(c.has_pending_tap());
    }

    #[test]
    fn long_press_and_tap_are_exclusive() {
        let mut c = classifier();
        let seen = recorder(&mut c);
        let p = Vec2::new(5.0, 5.0);
        let out = tap(&mut c, 1, p, 0, 800);
        assert_eq!(out, vec![GestureEvent::LongPress { position: p, duration: 800 }]);
        assert!(!c.has_pending_tap());
        // Between the two thresholds: nothing at all.
        assert!(tap(&mut c, 2, p, 1_000, 1_400).is_empty());
        c.tick(10_000);
        assert_eq!(kinds(&seen.borrow()), vec![GestureKind::LongPress]);
    }

    #[test]
    fn moved_contact_is_not_a_tap() {
        let mut c = classifier();
        c.touch_begin(1, Vec2::ZERO, 0);
        c.touch_move(1, Vec2::new(30.0, 0.0), 100);
        assert!(c.touch_end(1, 120).is_empty());
        assert!(!c.has_pending_tap());
    }

    #[test]
    fn fast_single_finger_drag_swipes_repeatedly() {
        let mut c = classifier();
        c.touch_begin(1, Vec2::ZERO, 0);
        let a = c.touch_move(1, Vec2::new(20.0, 0.0), 10);
        let b = c.touch_move(1, Vec2::new(40.0, 0.0), 20);
        let slow = c.touch_move(1, Vec2::new(41.0, 0.0), 120);
        assert_eq!(
            a,
            vec![GestureEvent::Swipe {
                position: Vec2::new(20.0, 0.0),
                delta: Vec2::new(20.0, 0.0),
                velocity: Vec2::new(2.0, 0.0),
            }]
        );
        assert_eq!(kinds(&b), vec![GestureKind::Swipe]);
        assert!(slow.is_empty());
    }

    #[test]
    fn fingers_apart_zoom_fingers_together_pinch() {
        let mut c = classifier();
        c.touch_begin(1, Vec2::new(0.0, 0.0), 0);
        c.touch_begin(2, Vec2::new(100.0, 0.0), 0);
        assert!(c.has_baseline());

        let out = c.touch_move(2, Vec2::new(150.0, 0.0), 50);
        assert_eq!(out, vec![GestureEvent::Zoom { center: Vec2::new(75.0, 0.0), scale: 1.5 }]);

        let out = c.touch_move(2, Vec2::new(60.0, 0.0), 100);
        match out.as_slice() {
            [GestureEvent::Pinch { scale, .. }] => assert!((scale - 0.6).abs() < 1e-9),
            other => panic!("expected pinch, got {:?}", other),
        }

        // Inside the threshold: nothing.
        assert!(c.touch_move(2, Vec2::new(105.0, 0.0), 150).is_empty());
    }

    #[test]
    fn rotation_across_the_seam_is_small() {
        let mut c = classifier();
        let r = 100.0;
        let at = |deg: f64| Vec2::new(r * deg.to_radians().cos(), r * deg.to_radians().sin());
        c.touch_begin(1, Vec2::ZERO, 0);
        c.touch_begin(2, at(170.0), 0);
        let out = c.touch_move(2, at(-170.0), 40);
        match out.as_slice() {
            [GestureEvent::Rotate { angle_delta, .. }] => {
                assert!((angle_delta - 20.0).abs() < 1e-6, "delta was {}", angle_delta);
            }
            other => panic!("expected a lone rotate, got {:?}", other),
        }
    }

    #[test]
    fn pinch_and_rotate_can_fire_together() {
        let mut c = classifier();
        c.touch_begin(1, Vec2::ZERO, 0);
        c.touch_begin(2, Vec2::new(100.0, 0.0), 0);
        let out = c.touch_move(2, Vec2::new(0.0, 200.0), 30);
        assert_eq!(kinds(&out), vec![GestureKind::Zoom, GestureKind::Rotate]);
    }

    #[test]
    fn lifting_a_finger_clears_the_baseline() {
        let mut c = classifier();
        c.touch_begin(1, Vec2::ZERO, 0);
        c.touch_begin(2, Vec2::new(100.0, 0.0), 0);
        assert!(c.touch_end(2, 100).is_empty());
        assert!(!c.has_baseline());
        // New second finger re-baselines from its own start.
        c.touch_begin(3, Vec2::new(0.0, 300.0), 200);
        assert!(c.has_baseline());
        assert!(c.touch_move(3, Vec2::new(0.0, 305.0), 250).is_empty());
    }

    #[test]
    fn cancel_emits_nothing_and_drops_baseline() {
        let mut c = classifier();
        let seen = recorder(&mut c);
        c.touch_begin(1, Vec2::ZERO, 0);
        c.touch_begin(2, Vec2::new(100.0, 0.0), 0);
        c.touch_cancel(2);
        assert!(!c.has_baseline());
        c.touch_cancel(1);
        assert!(c.touch_end(1, 50).is_empty());
        c.tick(5_000);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn two_finger_contacts_never_tap() {
        let mut c = classifier();
        c.touch_begin(1, Vec2::ZERO, 0);
        c.touch_begin(2, Vec2::new(100.0, 0.0), 10);
        c.touch_end(2, 60);
        c.touch_end(1, 80);
        assert!(!c.has_pending_tap());
    }

    #[test]
    fn dispose_cancels_pending_tap() {
        let mut c = classifier();
        let seen = recorder(&mut c);
        tap(&mut c, 1, Vec2::ZERO, 0, 50);
        c.dispose();
        assert!(c.tick(5_000).is_empty());
        assert!(c.touch_begin(2, Vec2::ZERO, 6_000).is_empty());
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn off_removes_only_that_subscription() {
        let mut c = classifier();
        let hits = Rc::new(RefCell::new(Vec::new()));
        let h1 = hits.clone();
        let first = c.on(GestureKind::LongPress, move |_| h1.borrow_mut().push(1));
        let h2 = hits.clone();
        c.on(GestureKind::LongPress, move |_| h2.borrow_mut().push(2));
        assert!(c.off(GestureKind::LongPress, first));
        assert!(!c.off(GestureKind::LongPress, first));
        tap(&mut c, 1, Vec2::ZERO, 0, 900);
        assert_eq!(*hits.borrow(), vec![2]);
    }

    #[test]
    fn panicking_subscriber_does_not_block_the_rest() {
        let mut subs = GestureSubscribers::default();
        let hits = Rc::new(RefCell::new(Vec::new()));
        let h1 = hits.clone();
        subs.on(GestureKind::Tap, move |_| h1.borrow_mut().push("first"));
        subs.on(GestureKind::Tap, |_| panic!("subscriber failure"));
        let h3 = hits.clone();
        subs.on(GestureKind::Tap, move |_| h3.borrow_mut().push("third"));
        let failed = subs.dispatch(&GestureEvent::Tap { position: Vec2::ZERO, time: 0 });
        assert_eq!(failed, 1);
        assert_eq!(*hits.borrow(), vec!["first", "third"]);
    }
}

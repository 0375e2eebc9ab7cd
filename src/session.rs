//! One client's cooperative touch session: raw contacts go through the
//! [`GestureClassifier`], the local touching flag and taps on other players
//! feed the [`TouchSyncCoordinator`], and the player's entity state is
//! diffed out over the bus.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, warn};

use crate::config::EngineConfig;
use crate::host::{Capabilities, HitTarget};
use crate::model::{GestureEvent, GestureKind, Millis, PlayerId, RelayTiming, TouchId, Vec2, Vec3};
use crate::net::{EntityState, StateDiffer};
use crate::state::gesture::{GestureClassifier, SubscriptionId};
use crate::sync::TouchSyncCoordinator;

/// Platform-neutral touch input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RawTouch {
    Begin { id: TouchId, position: Vec2, time: Millis },
    Move { id: TouchId, position: Vec2, time: Millis },
    End { id: TouchId, time: Millis },
    Cancel { id: TouchId, time: Millis },
}

impl RawTouch {
    pub fn time(&self) -> Millis {
        match *self {
            RawTouch::Begin { time, .. }
            | RawTouch::Move { time, .. }
            | RawTouch::End { time, .. }
            | RawTouch::Cancel { time, .. } => time,
        }
    }
}

pub struct TouchSession {
    local: PlayerId,
    caps: Capabilities,
    gestures: GestureClassifier,
    sync: Rc<RefCell<TouchSyncCoordinator>>,
    differ: StateDiffer,
    position: Option<Vec3>,
    disposed: bool,
}

impl TouchSession {
    pub fn new(local: PlayerId, config: EngineConfig, caps: Capabilities) -> Self {
        if caps.bus.local_id() != local {
            warn!("session {} runs on a bus for {}", local, caps.bus.local_id());
        }
        let sync = Rc::new(RefCell::new(TouchSyncCoordinator::new(
            config.sync,
            caps.clock.clone(),
            caps.bus.clone(),
            caps.haptics.clone(),
        )));
        TouchSyncCoordinator::connect(&sync);
        Self {
            local,
            gestures: GestureClassifier::new(config.gesture),
            differ: StateDiffer::new(config.network),
            caps,
            sync,
            position: None,
            disposed: false,
        }
    }

    pub fn local_id(&self) -> &PlayerId {
        &self.local
    }

    pub fn coordinator(&self) -> Rc<RefCell<TouchSyncCoordinator>> {
        self.sync.clone()
    }

    pub fn gestures(&self) -> &GestureClassifier {
        &self.gestures
    }

    pub fn on(&mut self, kind: GestureKind, callback: impl FnMut(&GestureEvent) + 'static) -> SubscriptionId {
        self.gestures.on(kind, callback)
    }

    pub fn off(&mut self, kind: GestureKind, id: SubscriptionId) -> bool {
        self.gestures.off(kind, id)
    }

    /// Feeds one contact change through the pipeline and returns the
    /// gestures it produced, deferred taps that came due included.
    pub fn handle(&mut self, touch: RawTouch) -> Vec<GestureEvent> {
        if self.disposed {
            return Vec::new();
        }
        let before = self.gestures.tracker().count();
        let events = match touch {
            RawTouch::Begin { id, position, time } => self.gestures.touch_begin(id, position, time),
            RawTouch::Move { id, position, time } => self.gestures.touch_move(id, position, time),
            RawTouch::End { id, time } => self.gestures.touch_end(id, time),
            RawTouch::Cancel { id, time } => {
                let due = self.gestures.tick(time);
                self.gestures.touch_cancel(id);
                due
            }
        };
        let after = self.gestures.tracker().count();
        let time = touch.time();
        if before == 0 && after > 0 {
            self.sync.borrow_mut().on_player_touch_at(&self.local, time);
        } else if before > 0 && after == 0 {
            self.sync.borrow_mut().on_player_touch_release_at(&self.local, time);
        }
        self.route(&events);
        events
    }

    /// Fires deferred taps due at `now`.
    pub fn tick(&mut self, now: Millis) -> Vec<GestureEvent> {
        if self.disposed {
            return Vec::new();
        }
        let events = self.gestures.tick(now);
        self.route(&events);
        events
    }

    pub fn set_local_position(&mut self, position: Vec3) {
        self.position = Some(position);
        self.sync.borrow_mut().update_player_position(&self.local, position);
    }

    /// Periodic network tick: re-evaluates challenge proximity and broadcasts
    /// the local entity state if it changed. Returns whether a state went out.
    pub fn sync_tick(&mut self, rotation_deg: f64) -> bool {
        if self.disposed {
            return false;
        }
        self.sync.borrow_mut().update_player_proximity();
        let Some(position) = self.position else {
            return false;
        };
        let state = EntityState { position, rotation_deg, touching: self.gestures.tracker().count() > 0 };
        self.differ.tick(self.caps.bus.as_ref(), &self.local, state)
    }

    pub fn target_at(&self, position: Vec2) -> Option<HitTarget> {
        self.caps.hit_test.as_ref().and_then(|h| h.hit_test(position))
    }

    /// Passes energy to whoever the tap landed on.
    fn route(&mut self, events: &[GestureEvent]) {
        for event in events {
            let GestureEvent::Tap { position, time } = *event else {
                continue;
            };
            match self.target_at(position) {
                Some(HitTarget::Player(target)) if target != self.local => {
                    self.relay_to(&target, time);
                }
                Some(target) => debug!("tap on {:?}", target),
                None => {}
            }
        }
    }

    fn relay_to(&mut self, target: &PlayerId, at: Millis) -> Option<RelayTiming> {
        self.sync.borrow_mut().initiate_energy_relay_at(&self.local, target, at)
    }

    /// Cancels pending taps and drops every contact. The coordinator keeps
    /// its state; call [`leave`](Self::leave) to announce departure.
    pub fn dispose(&mut self) {
        self.gestures.dispose();
        self.disposed = true;
    }

    pub fn leave(&mut self) {
        self.sync.borrow_mut().leave();
        self.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

//! Capabilities the engine borrows from its host: haptics, hit testing and
//! the rest of the injected [`Capabilities`] bundle. All of them are plain
//! traits so tests swap in fakes.

use std::rc::Rc;

use crate::model::{PlayerId, Vec2};
use crate::net::NetworkBus;
use crate::state::timer::Clock;

pub mod patterns {
    pub const CHALLENGE_READY: &str = "challenge_ready";
    pub const SYNC_SUCCESS: &str = "sync_success";
    pub const RELAY_PERFECT: &str = "relay_perfect";
    pub const RELAY_GOOD: &str = "relay_good";
    pub const RELAY_MISS: &str = "relay_miss";
}

/// Fire-and-forget haptics. Failures stay inside the implementation.
pub trait HapticTrigger {
    fn play(&self, pattern: &str);
    fn broadcast(&self, pattern: &str, players: &[PlayerId]);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullHaptics;

impl HapticTrigger for NullHaptics {
    fn play(&self, _pattern: &str) {}
    fn broadcast(&self, _pattern: &str, _players: &[PlayerId]) {}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HitTarget {
    /// Another player's avatar.
    Player(PlayerId),
    /// A puzzle piece, portal or other world object.
    Object(String),
}

/// Nearest target within its radius of a screen position.
pub trait HitTestProvider {
    fn hit_test(&self, position: Vec2) -> Option<HitTarget>;
}

/// Everything a session needs from the outside world, chosen once at startup.
#[derive(Clone)]
pub struct Capabilities {
    pub clock: Rc<dyn Clock>,
    pub bus: Rc<dyn NetworkBus>,
    pub haptics: Rc<dyn HapticTrigger>,
    pub hit_test: Option<Rc<dyn HitTestProvider>>,
}

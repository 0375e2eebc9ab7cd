//! Core data models for cooperative touch play.
//! Screen-space types (touches, gestures) and world-space types (players,
//! challenges, relay hand-offs) live side by side so the input layer and the
//! sync layer agree on shapes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Sub};

use crate::error::{Error, Result};

/// Milliseconds on the session clock. Every timing decision uses these
/// origination stamps, never the order in which events were received.
pub type Millis = u64;

/// Per-contact identifier as reported by the input source.
pub type TouchId = i32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(self, other: Vec2) -> f64 {
        (self - other).length()
    }

    pub fn scale(self, s: f64) -> Vec2 {
        Vec2::new(self.x * s, self.y * s)
    }

    pub fn midpoint(self, other: Vec2) -> Vec2 {
        Vec2::new((self.x + other.x) * 0.5, (self.y + other.y) * 0.5)
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// World-space position of a player or challenge anchor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// A live contact. Owned by the tracker; mutated only by moves for its id.
#[derive(Clone, Debug, PartialEq)]
pub struct TouchPoint {
    pub id: TouchId,
    pub position: Vec2,
    pub start_position: Vec2,
    /// Movement since the previous update.
    pub delta: Vec2,
    /// Pixels per millisecond.
    pub velocity: Vec2,
    pub start_time: Millis,
    pub last_time: Millis,
    pub duration: Millis,
    /// Set once this contact has shared the screen with another finger.
    pub multi: bool,
}

impl TouchPoint {
    pub fn new(id: TouchId, position: Vec2, time: Millis) -> Self {
        Self {
            id,
            position,
            start_position: position,
            delta: Vec2::ZERO,
            velocity: Vec2::ZERO,
            start_time: time,
            last_time: time,
            duration: 0,
            multi: false,
        }
    }

    /// Straight-line distance between where the contact started and where it is now.
    pub fn displacement(&self) -> f64 {
        self.position.distance(self.start_position)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GestureKind {
    Tap,
    DoubleTap,
    LongPress,
    Swipe,
    Pinch,
    Zoom,
    Rotate,
}

impl GestureKind {
    pub const ALL: [GestureKind; 7] = [
        GestureKind::Tap,
        GestureKind::DoubleTap,
        GestureKind::LongPress,
        GestureKind::Swipe,
        GestureKind::Pinch,
        GestureKind::Zoom,
        GestureKind::Rotate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GestureKind::Tap => "tap",
            GestureKind::DoubleTap => "double-tap",
            GestureKind::LongPress => "long-press",
            GestureKind::Swipe => "swipe",
            GestureKind::Pinch => "pinch",
            GestureKind::Zoom => "zoom",
            GestureKind::Rotate => "rotate",
        }
    }

    /// Discrete gestures fire once per contact; the rest stream while fingers move.
    pub fn is_discrete(&self) -> bool {
        matches!(self, GestureKind::Tap | GestureKind::DoubleTap | GestureKind::LongPress)
    }
}

/// One classification decision. Never reused.
#[derive(Clone, Debug, PartialEq)]
pub enum GestureEvent {
    /// `time` is when the contact lifted, not when the deferred tap fired.
    Tap { position: Vec2, time: Millis },
    DoubleTap { position: Vec2, time: Millis },
    LongPress { position: Vec2, duration: Millis },
    Swipe { position: Vec2, delta: Vec2, velocity: Vec2 },
    /// Fingers moved together; `scale` < 1.
    Pinch { center: Vec2, scale: f64 },
    /// Fingers moved apart; `scale` > 1.
    Zoom { center: Vec2, scale: f64 },
    /// `angle_delta` in degrees, within (-180, 180].
    Rotate { center: Vec2, angle_delta: f64 },
}

impl GestureEvent {
    pub fn kind(&self) -> GestureKind {
        match self {
            GestureEvent::Tap { .. } => GestureKind::Tap,
            GestureEvent::DoubleTap { .. } => GestureKind::DoubleTap,
            GestureEvent::LongPress { .. } => GestureKind::LongPress,
            GestureEvent::Swipe { .. } => GestureKind::Swipe,
            GestureEvent::Pinch { .. } => GestureKind::Pinch,
            GestureEvent::Zoom { .. } => GestureKind::Zoom,
            GestureEvent::Rotate { .. } => GestureKind::Rotate,
        }
    }

    /// Anchor position of the gesture on screen.
    pub fn position(&self) -> Vec2 {
        match *self {
            GestureEvent::Tap { position, .. }
            | GestureEvent::DoubleTap { position, .. }
            | GestureEvent::LongPress { position, .. }
            | GestureEvent::Swipe { position, .. } => position,
            GestureEvent::Pinch { center, .. }
            | GestureEvent::Zoom { center, .. }
            | GestureEvent::Rotate { center, .. } => center,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What the sync layer knows about one player, local or remote.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerTouchState {
    pub player: PlayerId,
    pub touching: bool,
    /// Origination time of the current touch; `None` while not touching.
    pub touch_time: Option<Millis>,
    pub position: Option<Vec3>,
    /// Newest touch/release stamp applied so far, used to reject late arrivals.
    pub last_touch_update: Option<Millis>,
    pub last_position_update: Option<Millis>,
}

impl PlayerTouchState {
    pub fn new(player: PlayerId) -> Self {
        Self {
            player,
            touching: false,
            touch_time: None,
            position: None,
            last_touch_update: None,
            last_position_update: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChallengeId(pub String);

impl ChallengeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChallengeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChallengeKind {
    /// Enough touching participants, with their touch stamps inside the window.
    SynchronizedTouch { max_sync_delay_ms: Millis },
    /// Participants pass energy along; completes after enough hand-offs without a miss.
    EnergyRelay { required_handoffs: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeState {
    Proposed,
    Active,
    /// Terminal.
    Completed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollabChallenge {
    pub id: ChallengeId,
    pub kind: ChallengeKind,
    pub required_players: usize,
    /// Players currently inside `proximity_radius` of `anchor`.
    pub participants: BTreeSet<PlayerId>,
    pub state: ChallengeState,
    pub anchor: Vec3,
    pub proximity_radius: f64,
    pub started_at: Option<Millis>,
    pub completed_at: Option<Millis>,
}

impl CollabChallenge {
    pub fn new(
        id: impl Into<ChallengeId>,
        kind: ChallengeKind,
        required_players: usize,
        anchor: Vec3,
        proximity_radius: f64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            required_players,
            participants: BTreeSet::new(),
            state: ChallengeState::Proposed,
            anchor,
            proximity_radius,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let reason = if self.required_players == 0 {
            Some("required player count must be at least 1")
        } else if !(self.proximity_radius > 0.0) {
            Some("proximity radius must be positive")
        } else if matches!(self.kind, ChallengeKind::EnergyRelay { required_handoffs: 0 }) {
            Some("energy relay needs at least one hand-off")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(Error::InvalidChallenge { id: self.id.clone(), reason }),
            None => Ok(()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ChallengeState::Active
    }

    pub fn is_completed(&self) -> bool {
        self.state == ChallengeState::Completed
    }
}

impl From<String> for ChallengeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayTiming {
    Perfect,
    Good,
    Miss,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayHandoff {
    pub from: PlayerId,
    pub to: PlayerId,
    pub timestamp: Millis,
    pub timing: RelayTiming,
}

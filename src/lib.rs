//! Multi-touch gesture classification and cooperative touch synchronization
//! for shared spatial play.
//!
//! Input flows bottom-up: raw contacts land in the [`TouchTracker`], the
//! [`GestureClassifier`] turns them into seven gesture kinds, and a
//! [`TouchSession`] forwards the local player's touching state and relay taps
//! to the [`TouchSyncCoordinator`], which runs collaborative challenges across
//! clients over a [`NetworkBus`].

pub mod config;
pub mod error;
pub mod host;
pub mod model;
pub mod net;
pub mod session;
pub mod state;
pub mod sync;
pub mod util;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use config::{EngineConfig, GestureConfig, NetworkConfig, SyncConfig};
pub use error::{Error, Result};
pub use host::{Capabilities, HapticTrigger, HitTarget, HitTestProvider, NullHaptics};
pub use model::{
    ChallengeId, ChallengeKind, ChallengeState, CollabChallenge, GestureEvent, GestureKind, Millis, PlayerId,
    PlayerTouchState, RelayHandoff, RelayTiming, TouchId, TouchPoint, Vec2, Vec3,
};
pub use net::{EventKind, EventPayload, LoopbackBus, LoopbackHub, NetworkBus, NetworkEvent};
pub use session::{RawTouch, TouchSession};
pub use state::{Clock, GestureClassifier, TouchTracker, VirtualClock};
pub use sync::{RelayChain, TouchSyncCoordinator};

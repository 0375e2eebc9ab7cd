//! Cooperative touch synchronization.
//!
//! The coordinator keeps one [`PlayerTouchState`] per known player and drives
//! every [`CollabChallenge`] through `Proposed → Active → Completed`:
//!
//! * **Activation**: [`TouchSyncCoordinator::update_player_proximity`]
//!   rebuilds each open challenge's participant set from scratch and activates
//!   it once `required_players` are inside the radius.
//! * **Synchronized touch**: on every touch change, the touch stamps of the
//!   touching participants must number at least `required_players` and span
//!   no more than `max_sync_delay_ms`.
//! * **Energy relay**: hand-offs are scored by [`RelayChain`]. Each active
//!   relay challenge counts the non-miss hand-offs between its own
//!   participants since it activated, and completes once that count reaches
//!   `required_handoffs`.
//!
//! Every client runs the same state machine, but only the challenge's
//! authority (its lowest participant id) announces transitions: the
//! `ChallengeActivated`/`ChallengeCompleted` envelopes and the participant
//! haptics. The other clients transition silently, so one completion yields
//! one reward however many clients observed it.
//!
//! Local calls and remote envelopes converge on the same `apply_*` methods, so
//! the state machine behaves the same whichever side an update came from. All
//! timing uses the stamps carried by the updates themselves.

pub mod relay;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use log::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::host::{HapticTrigger, patterns};
use crate::model::{
    ChallengeId, ChallengeKind, ChallengeState, CollabChallenge, Millis, PlayerId, PlayerTouchState,
    RelayTiming, Vec3,
};
use crate::net::{EventKind, EventPayload, NetworkBus, NetworkEvent, SeenEnvelopes};
use crate::state::timer::Clock;

pub use relay::RelayChain;

pub struct TouchSyncCoordinator {
    local: PlayerId,
    config: SyncConfig,
    clock: Rc<dyn Clock>,
    bus: Rc<dyn NetworkBus>,
    haptics: Rc<dyn HapticTrigger>,
    players: BTreeMap<PlayerId, PlayerTouchState>,
    challenges: BTreeMap<ChallengeId, CollabChallenge>,
    relay: RelayChain,
    /// Non-miss participant hand-offs per active relay challenge.
    relay_progress: BTreeMap<ChallengeId, u32>,
    seen: SeenEnvelopes,
}

impl TouchSyncCoordinator {
    /// The local player is registered immediately.
    pub fn new(
        config: SyncConfig,
        clock: Rc<dyn Clock>,
        bus: Rc<dyn NetworkBus>,
        haptics: Rc<dyn HapticTrigger>,
    ) -> Self {
        let local = bus.local_id();
        let seen = SeenEnvelopes::new(config.dedupe_capacity);
        let mut players = BTreeMap::new();
        players.insert(local.clone(), PlayerTouchState::new(local.clone()));
        Self {
            local,
            config,
            clock,
            bus,
            haptics,
            players,
            challenges: BTreeMap::new(),
            relay: RelayChain::new(),
            relay_progress: BTreeMap::new(),
            seen,
        }
    }

    /// Routes every remote event kind from the bus into `this`.
    pub fn connect(this: &Rc<RefCell<Self>>) {
        let bus = this.borrow().bus.clone();
        for kind in EventKind::ALL {
            let weak: Weak<RefCell<Self>> = Rc::downgrade(this);
            bus.on_event(
                kind,
                Box::new(move |event| {
                    let Some(coordinator) = weak.upgrade() else {
                        return;
                    };
                    match coordinator.try_borrow_mut() {
                        Ok(mut c) => {
                            c.apply_remote(event);
                        }
                        Err(_) => warn!("coordinator busy, dropping {:?} from {}", event.kind(), event.sender),
                    };
                }),
            );
        }
    }

    pub fn local_id(&self) -> &PlayerId {
        &self.local
    }

    // ---------------- Players -----------------

    /// Returns false if the player is already known.
    pub fn register_player(&mut self, player: PlayerId) -> bool {
        if self.players.contains_key(&player) {
            return false;
        }
        debug!("registered player {}", player);
        self.players.insert(player.clone(), PlayerTouchState::new(player));
        true
    }

    /// Clears the player's touch state and drops them from every participant
    /// set. Challenge states are left as they are.
    pub fn remove_player(&mut self, player: &PlayerId) -> bool {
        if self.players.remove(player).is_none() {
            return false;
        }
        for challenge in self.challenges.values_mut() {
            challenge.participants.remove(player);
        }
        info!("player {} left", player);
        true
    }

    /// Announces the local player's departure to peers.
    pub fn leave(&mut self) {
        self.bus.broadcast(EventPayload::PlayerLeft);
        let local = self.local.clone();
        self.remove_player(&local);
    }

    pub fn player(&self, player: &PlayerId) -> Option<&PlayerTouchState> {
        self.players.get(player)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerTouchState> {
        self.players.values()
    }

    pub fn update_player_position(&mut self, player: &PlayerId, position: Vec3) -> bool {
        let now = self.clock.now();
        self.apply_position(player, position, now)
    }

    /// Position updates older than the newest one applied are ignored.
    pub fn apply_position(&mut self, player: &PlayerId, position: Vec3, at: Millis) -> bool {
        let Some(state) = self.players.get_mut(player) else {
            return false;
        };
        if state.last_position_update.is_some_and(|last| at < last) {
            debug!("stale position for {} at {}", player, at);
            return false;
        }
        state.position = Some(position);
        state.last_position_update = Some(at);
        true
    }

    // ---------------- Touch -----------------

    pub fn on_player_touch(&mut self, player: &PlayerId) -> bool {
        let now = self.clock.now();
        self.on_player_touch_at(player, now)
    }

    pub fn on_player_touch_release(&mut self, player: &PlayerId) -> bool {
        let now = self.clock.now();
        self.on_player_touch_release_at(player, now)
    }

    /// Local touch with an explicit origination stamp, e.g. the touch-begin time.
    pub fn on_player_touch_at(&mut self, player: &PlayerId, at: Millis) -> bool {
        self.local_touch(player, true, at)
    }

    pub fn on_player_touch_release_at(&mut self, player: &PlayerId, at: Millis) -> bool {
        self.local_touch(player, false, at)
    }

    fn local_touch(&mut self, player: &PlayerId, touching: bool, at: Millis) -> bool {
        let applied = self.apply_touch(player, touching, at);
        if applied && *player == self.local {
            self.bus.broadcast(EventPayload::TouchState { touching, at });
        }
        applied
    }

    /// Records a touch or release stamped `at`. An update older than the
    /// newest one already applied for that player lost a race on the wire and
    /// is ignored.
    pub fn apply_touch(&mut self, player: &PlayerId, touching: bool, at: Millis) -> bool {
        let Some(state) = self.players.get_mut(player) else {
            debug!("touch from unregistered player {}", player);
            return false;
        };
        if state.last_touch_update.is_some_and(|last| at < last) {
            debug!("stale touch update for {} at {}", player, at);
            return false;
        }
        state.touching = touching;
        state.touch_time = touching.then_some(at);
        state.last_touch_update = Some(at);
        self.check_synchronized_touch();
        true
    }

    // ---------------- Challenges -----------------

    pub fn add_challenge(&mut self, challenge: CollabChallenge) -> Result<()> {
        if let Err(err) = challenge.validate() {
            warn!("{}", err);
            return Err(err);
        }
        if self.challenges.contains_key(&challenge.id) {
            warn!("duplicate challenge {}", challenge.id);
            return Err(Error::DuplicateChallenge(challenge.id));
        }
        debug!("challenge {} proposed at {:?}", challenge.id, challenge.anchor);
        self.challenges.insert(challenge.id.clone(), challenge);
        Ok(())
    }

    pub fn challenge(&self, id: &ChallengeId) -> Option<&CollabChallenge> {
        self.challenges.get(id)
    }

    pub fn challenges(&self) -> impl Iterator<Item = &CollabChallenge> {
        self.challenges.values()
    }

    pub fn active_challenges(&self) -> Vec<&CollabChallenge> {
        self.challenges.values().filter(|c| c.is_active()).collect()
    }

    /// True when this client announces `id`'s transitions.
    pub fn is_authority(&self, id: &ChallengeId) -> bool {
        self.challenges
            .get(id)
            .is_some_and(|c| c.participants.first() == Some(&self.local))
    }

    pub fn participants(&self, id: &ChallengeId) -> Vec<PlayerId> {
        self.challenges
            .get(id)
            .map(|c| c.participants.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Periodic tick: rebuilds every open challenge's participant set from
    /// current positions and activates those that reached their quorum.
    pub fn update_player_proximity(&mut self) {
        let mut ready = Vec::new();
        for challenge in self.challenges.values_mut() {
            if challenge.is_completed() {
                continue;
            }
            let (anchor, radius) = (challenge.anchor, challenge.proximity_radius);
            challenge.participants = self
                .players
                .values()
                .filter(|p| p.position.is_some_and(|pos| pos.distance(anchor) <= radius))
                .map(|p| p.player.clone())
                .collect();
            if challenge.state == ChallengeState::Proposed
                && challenge.participants.len() >= challenge.required_players
            {
                ready.push(challenge.id.clone());
            }
        }
        for id in ready {
            self.activate(&id);
        }
        self.check_synchronized_touch();
    }

    fn activate(&mut self, id: &ChallengeId) {
        let now = self.clock.now();
        let Some(challenge) = self.challenges.get_mut(id) else {
            return;
        };
        challenge.state = ChallengeState::Active;
        challenge.started_at = Some(now);
        let participants: Vec<PlayerId> = challenge.participants.iter().cloned().collect();
        self.relay_progress.insert(id.clone(), 0);
        info!("challenge {} active with {} players", id, participants.len());
        if !self.is_authority(id) {
            return;
        }
        self.haptics.broadcast(patterns::CHALLENGE_READY, &participants);
        self.bus.send_to(
            &participants,
            EventPayload::ChallengeActivated { challenge: id.clone(), participants: participants.clone() },
        );
    }

    fn check_synchronized_touch(&mut self) {
        let mut done = Vec::new();
        for challenge in self.challenges.values() {
            let ChallengeKind::SynchronizedTouch { max_sync_delay_ms } = challenge.kind else {
                continue;
            };
            if !challenge.is_active() {
                continue;
            }
            let stamps: Vec<Millis> = challenge
                .participants
                .iter()
                .filter_map(|p| self.players.get(p).and_then(|s| s.touch_time))
                .collect();
            if stamps.len() < challenge.required_players {
                continue;
            }
            let (Some(min), Some(max)) = (stamps.iter().min(), stamps.iter().max()) else {
                continue;
            };
            let skew = max - min;
            if skew <= max_sync_delay_ms {
                debug!("challenge {} synchronized with skew {}ms", challenge.id, skew);
                done.push(challenge.id.clone());
            } else {
                debug!("challenge {} skew {}ms over {}ms", challenge.id, skew, max_sync_delay_ms);
            }
        }
        let points = self.config.completion_points;
        for id in done {
            self.complete(&id, points);
        }
    }

    fn complete(&mut self, id: &ChallengeId, points: u32) {
        let now = self.clock.now();
        let Some(challenge) = self.challenges.get_mut(id) else {
            return;
        };
        if challenge.is_completed() {
            return;
        }
        challenge.state = ChallengeState::Completed;
        challenge.completed_at = Some(now);
        let participants: Vec<PlayerId> = challenge.participants.iter().cloned().collect();
        self.relay_progress.remove(id);
        info!("challenge {} completed for {} points", id, points);
        if participants.first() != Some(&self.local) {
            return;
        }
        self.haptics.broadcast(patterns::SYNC_SUCCESS, &participants);
        self.bus.broadcast(EventPayload::ChallengeCompleted { challenge: id.clone(), points });
    }

    // ---------------- Relay -----------------

    pub fn initiate_energy_relay(&mut self, from: &PlayerId, to: &PlayerId) -> Option<RelayTiming> {
        let now = self.clock.now();
        self.initiate_energy_relay_at(from, to, now)
    }

    /// Local hand-off stamped with when it happened, e.g. the tap's lift time.
    pub fn initiate_energy_relay_at(&mut self, from: &PlayerId, to: &PlayerId, at: Millis) -> Option<RelayTiming> {
        let timing = self.apply_handoff(from, to, at)?;
        self.bus.broadcast(EventPayload::RelayHandoff { from: from.clone(), to: to.clone(), at });
        Some(timing)
    }

    /// Scores a hand-off between two registered players.
    pub fn apply_handoff(&mut self, from: &PlayerId, to: &PlayerId, at: Millis) -> Option<RelayTiming> {
        if !self.players.contains_key(from) || !self.players.contains_key(to) {
            debug!("relay {} -> {} involves an unregistered player", from, to);
            return None;
        }
        let timing = self.relay.record(from.clone(), to.clone(), at, &self.config)?;
        if *from == self.local || *to == self.local {
            self.haptics.play(match timing {
                RelayTiming::Perfect => patterns::RELAY_PERFECT,
                RelayTiming::Good => patterns::RELAY_GOOD,
                RelayTiming::Miss => patterns::RELAY_MISS,
            });
        }
        self.check_relay(from, to, timing);
        Some(timing)
    }

    /// Hand-offs involving anyone outside a challenge leave its count alone.
    fn check_relay(&mut self, from: &PlayerId, to: &PlayerId, timing: RelayTiming) {
        let points = (self.config.completion_points as f64 * self.relay.multiplier()).round() as u32;
        let mut done = Vec::new();
        for challenge in self.challenges.values() {
            let ChallengeKind::EnergyRelay { required_handoffs } = challenge.kind else {
                continue;
            };
            if !challenge.is_active() || !challenge.participants.contains(from) || !challenge.participants.contains(to) {
                continue;
            }
            let count = self.relay_progress.entry(challenge.id.clone()).or_insert(0);
            *count = match timing {
                RelayTiming::Miss => 0,
                RelayTiming::Perfect | RelayTiming::Good => *count + 1,
            };
            debug!("challenge {} relay {}/{}", challenge.id, count, required_handoffs);
            if *count >= required_handoffs {
                done.push(challenge.id.clone());
            }
        }
        for id in done {
            self.complete(&id, points);
        }
    }

    pub fn relay(&self) -> &RelayChain {
        &self.relay
    }

    pub fn relay_progress(&self, id: &ChallengeId) -> Option<u32> {
        self.relay_progress.get(id).copied()
    }

    pub fn relay_multiplier(&self) -> f64 {
        self.relay.multiplier()
    }

    pub fn reset_relay(&mut self) {
        self.relay.reset();
    }

    // ---------------- Remote -----------------

    /// Applies one received envelope. Duplicates and self-echoes are dropped.
    /// Returns whether the envelope was new.
    pub fn apply_remote(&mut self, event: &NetworkEvent) -> bool {
        if event.sender == self.local {
            return false;
        }
        if !self.seen.insert(event) {
            debug!("duplicate {:?} from {} at {}", event.kind(), event.sender, event.timestamp);
            return false;
        }
        match &event.payload {
            EventPayload::TouchState { touching, at } => {
                self.apply_touch(&event.sender, *touching, *at);
            }
            EventPayload::EntityState { entity, state } => {
                if *entity != event.sender {
                    warn!("{} sent state for {}, ignoring", event.sender, entity);
                } else {
                    self.apply_position(entity, state.position, event.timestamp);
                }
            }
            EventPayload::RelayHandoff { from, to, at } => {
                self.apply_handoff(from, to, *at);
            }
            EventPayload::Haptic { pattern } => self.haptics.play(pattern),
            EventPayload::ChallengeActivated { challenge, .. } => {
                if let Some(c) = self.challenges.get_mut(challenge) {
                    if c.state == ChallengeState::Proposed {
                        c.state = ChallengeState::Active;
                        c.started_at = Some(event.timestamp);
                        self.relay_progress.insert(challenge.clone(), 0);
                    }
                }
            }
            EventPayload::ChallengeCompleted { challenge, points } => {
                if let Some(c) = self.challenges.get_mut(challenge) {
                    if !c.is_completed() {
                        info!("challenge {} completed by {} for {} points", challenge, event.sender, points);
                        c.state = ChallengeState::Completed;
                        c.completed_at = Some(event.timestamp);
                        self.relay_progress.remove(challenge);
                    }
                }
            }
            EventPayload::PlayerLeft => {
                self.remove_player(&event.sender);
            }
        }
        true
    }
}

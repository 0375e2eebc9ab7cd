use std::cell::RefCell;
use std::rc::Rc;

use coop_touch::{
    Capabilities, ChallengeKind, ChallengeState, CollabChallenge, EngineConfig, EventKind, EventPayload,
    HapticTrigger, HitTarget, HitTestProvider, LoopbackHub, NetworkBus, NullHaptics, PlayerId, RawTouch,
    RelayTiming, TouchSession, TouchSyncCoordinator, Vec2, Vec3, VirtualClock,
};
use pretty_assertions::assert_eq;

/// Every screen position shows the other player's avatar.
struct AlwaysHits(PlayerId);

impl HitTestProvider for AlwaysHits {
    fn hit_test(&self, _position: Vec2) -> Option<HitTarget> {
        Some(HitTarget::Player(self.0.clone()))
    }
}

#[derive(Default)]
struct CountingHaptics {
    broadcasts: RefCell<Vec<String>>,
}

impl HapticTrigger for CountingHaptics {
    fn play(&self, _pattern: &str) {}

    fn broadcast(&self, pattern: &str, _players: &[PlayerId]) {
        self.broadcasts.borrow_mut().push(pattern.to_string());
    }
}

fn join(hub: &LoopbackHub, clock: &VirtualClock, me: &str, other: &str) -> TouchSession {
    join_with(hub, clock, me, other, Rc::new(NullHaptics))
}

fn join_with(
    hub: &LoopbackHub,
    clock: &VirtualClock,
    me: &str,
    other: &str,
    haptics: Rc<dyn HapticTrigger>,
) -> TouchSession {
    let caps = Capabilities {
        clock: Rc::new(clock.clone()),
        bus: Rc::new(hub.join(me.into(), Rc::new(clock.clone()))),
        haptics,
        hit_test: Some(Rc::new(AlwaysHits(other.into()))),
    };
    let session = TouchSession::new(me.into(), EngineConfig::default(), caps);
    session.coordinator().borrow_mut().register_player(other.into());
    session
}

fn sync_of(session: &TouchSession) -> Rc<RefCell<TouchSyncCoordinator>> {
    session.coordinator()
}

fn state_of(session: &TouchSession, id: &str) -> ChallengeState {
    sync_of(session).borrow().challenge(&id.into()).map(|c| c.state).unwrap()
}

fn add_to_both(a: &TouchSession, b: &TouchSession, challenge: CollabChallenge) {
    sync_of(a).borrow_mut().add_challenge(challenge.clone()).unwrap();
    sync_of(b).borrow_mut().add_challenge(challenge).unwrap();
}

/// Exchanges positions near the origin and re-runs proximity on both sides.
fn gather(hub: &LoopbackHub, a: &mut TouchSession, b: &mut TouchSession) {
    a.set_local_position(Vec3::new(1.0, 0.0, 0.0));
    b.set_local_position(Vec3::new(-1.0, 0.0, 0.0));
    a.sync_tick(0.0);
    b.sync_tick(0.0);
    hub.flush(4);
    a.sync_tick(0.0);
    b.sync_tick(0.0);
    hub.flush(4);
}

#[test]
fn synchronized_touch_completes_on_both_clients() {
    let hub = LoopbackHub::new();
    let clock = VirtualClock::new(0);
    let mut alice = join(&hub, &clock, "alice", "bob");
    let mut bob = join(&hub, &clock, "bob", "alice");
    let gate = CollabChallenge::new(
        "gate",
        ChallengeKind::SynchronizedTouch { max_sync_delay_ms: 500 },
        2,
        Vec3::default(),
        5.0,
    );
    add_to_both(&alice, &bob, gate);

    gather(&hub, &mut alice, &mut bob);
    assert_eq!(state_of(&alice, "gate"), ChallengeState::Active);
    assert_eq!(state_of(&bob, "gate"), ChallengeState::Active);

    clock.set(1_000);
    alice.handle(RawTouch::Begin { id: 7, position: Vec2::new(10.0, 10.0), time: 1_000 });
    clock.set(1_300);
    bob.handle(RawTouch::Begin { id: 3, position: Vec2::new(20.0, 20.0), time: 1_300 });
    // Bob completes locally as soon as he sees both stamps.
    hub.flush(4);

    assert_eq!(state_of(&alice, "gate"), ChallengeState::Completed);
    assert_eq!(state_of(&bob, "gate"), ChallengeState::Completed);
}

#[test]
fn one_completion_is_announced_once() {
    let hub = LoopbackHub::new();
    let clock = VirtualClock::new(0);
    let alice_haptics = Rc::new(CountingHaptics::default());
    let bob_haptics = Rc::new(CountingHaptics::default());
    let mut alice = join_with(&hub, &clock, "alice", "bob", alice_haptics.clone());
    let mut bob = join_with(&hub, &clock, "bob", "alice", bob_haptics.clone());
    let watcher = hub.join("watcher".into(), Rc::new(clock.clone()));
    let rewards = Rc::new(RefCell::new(Vec::new()));
    let r = rewards.clone();
    watcher.on_event(
        EventKind::ChallengeCompleted,
        Box::new(move |e| {
            if let EventPayload::ChallengeCompleted { points, .. } = e.payload {
                r.borrow_mut().push(points);
            }
        }),
    );
    let gate = CollabChallenge::new(
        "gate",
        ChallengeKind::SynchronizedTouch { max_sync_delay_ms: 500 },
        2,
        Vec3::default(),
        5.0,
    );
    add_to_both(&alice, &bob, gate);
    gather(&hub, &mut alice, &mut bob);

    alice.handle(RawTouch::Begin { id: 1, position: Vec2::new(500.0, 500.0), time: 1_000 });
    bob.handle(RawTouch::Begin { id: 1, position: Vec2::new(500.0, 500.0), time: 1_200 });
    hub.flush(4);

    assert_eq!(state_of(&alice, "gate"), ChallengeState::Completed);
    assert_eq!(state_of(&bob, "gate"), ChallengeState::Completed);
    assert_eq!(*rewards.borrow(), vec![100]);
    assert_eq!(*alice_haptics.broadcasts.borrow(), vec!["challenge_ready", "sync_success"]);
    assert!(bob_haptics.broadcasts.borrow().is_empty());
}

#[test]
fn far_apart_touches_keep_the_challenge_open() {
    let hub = LoopbackHub::new();
    let clock = VirtualClock::new(0);
    let mut alice = join(&hub, &clock, "alice", "bob");
    let mut bob = join(&hub, &clock, "bob", "alice");
    let gate = CollabChallenge::new(
        "gate",
        ChallengeKind::SynchronizedTouch { max_sync_delay_ms: 500 },
        2,
        Vec3::default(),
        5.0,
    );
    add_to_both(&alice, &bob, gate);
    gather(&hub, &mut alice, &mut bob);

    alice.handle(RawTouch::Begin { id: 1, position: Vec2::ZERO, time: 1_000 });
    bob.handle(RawTouch::Begin { id: 1, position: Vec2::ZERO, time: 1_600 });
    hub.flush(4);
    assert_eq!(state_of(&alice, "gate"), ChallengeState::Active);
    assert_eq!(state_of(&bob, "gate"), ChallengeState::Active);
}

#[test]
fn duplicated_and_reordered_touch_updates_settle_on_the_newest() {
    let hub = LoopbackHub::new();
    let clock = VirtualClock::new(0);
    let alice = join(&hub, &clock, "alice", "bob");
    let mut bob = join(&hub, &clock, "bob", "alice");
    hub.set_duplicate_delivery(true);

    clock.set(100);
    bob.handle(RawTouch::Begin { id: 1, position: Vec2::new(500.0, 500.0), time: 100 });
    clock.set(150);
    bob.handle(RawTouch::End { id: 1, time: 150 });
    assert_eq!(hub.pending(), 4);
    hub.pump_reversed();

    let sync = sync_of(&alice);
    let sync = sync.borrow();
    let seen = sync.player(&"bob".into()).unwrap();
    assert!(!seen.touching);
    assert_eq!(seen.touch_time, None);
    assert_eq!(seen.last_touch_update, Some(150));
}

#[test]
fn relay_hand_offs_score_the_same_on_both_sides() {
    let hub = LoopbackHub::new();
    let clock = VirtualClock::new(0);
    let mut alice = join(&hub, &clock, "alice", "bob");
    let mut bob = join(&hub, &clock, "bob", "alice");

    alice.handle(RawTouch::Begin { id: 1, position: Vec2::new(5.0, 5.0), time: 0 });
    alice.handle(RawTouch::End { id: 1, time: 50 });
    clock.set(350);
    alice.tick(350);
    hub.flush(4);

    bob.handle(RawTouch::Begin { id: 1, position: Vec2::new(5.0, 5.0), time: 100 });
    bob.handle(RawTouch::End { id: 1, time: 120 });
    clock.set(420);
    bob.tick(420);
    hub.flush(4);

    for session in [&alice, &bob] {
        let sync = sync_of(session);
        let sync = sync.borrow();
        let timings: Vec<RelayTiming> = sync.relay().handoffs().iter().map(|h| h.timing).collect();
        assert_eq!(timings, vec![RelayTiming::Good, RelayTiming::Perfect]);
        assert_eq!(sync.relay_multiplier(), 1.5);
    }
}

#[test]
fn departing_player_leaves_every_challenge() {
    let hub = LoopbackHub::new();
    let clock = VirtualClock::new(0);
    let mut alice = join(&hub, &clock, "alice", "bob");
    let mut bob = join(&hub, &clock, "bob", "alice");
    let relay = CollabChallenge::new(
        "relay",
        ChallengeKind::EnergyRelay { required_handoffs: 4 },
        2,
        Vec3::default(),
        5.0,
    );
    add_to_both(&alice, &bob, relay);
    gather(&hub, &mut alice, &mut bob);

    bob.leave();
    hub.flush(4);
    let sync = sync_of(&alice);
    let sync = sync.borrow();
    assert!(sync.player(&"bob".into()).is_none());
    assert_eq!(sync.participants(&"relay".into()), vec![PlayerId::from("alice")]);
    assert_eq!(sync.challenge(&"relay".into()).unwrap().state, ChallengeState::Active);
}

//! Cross-client event plumbing.
//!
//! Every message travels as a [`NetworkEvent`]: a closed [`EventPayload`]
//! wrapped with the sender id and the sender's clock at origination. Delivery
//! is best effort. Messages may be duplicated or arrive out of order, so
//! consumers key their decisions on the embedded timestamp and drop repeats
//! through [`SeenEnvelopes`].

pub mod diff;
pub mod loopback;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

use log::trace;

use crate::error::Result;
use crate::model::{ChallengeId, Millis, PlayerId, Vec3};

pub use diff::{EntityState, StateDiffer};
pub use loopback::{LoopbackBus, LoopbackHub};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    TouchState,
    EntityState,
    RelayHandoff,
    Haptic,
    ChallengeActivated,
    ChallengeCompleted,
    PlayerLeft,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    /// The sender started or stopped touching at `at` on its own clock.
    TouchState { touching: bool, at: Millis },
    EntityState { entity: PlayerId, state: EntityState },
    RelayHandoff { from: PlayerId, to: PlayerId, at: Millis },
    Haptic { pattern: String },
    ChallengeActivated { challenge: ChallengeId, participants: Vec<PlayerId> },
    ChallengeCompleted { challenge: ChallengeId, points: u32 },
    PlayerLeft,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::TouchState,
        EventKind::EntityState,
        EventKind::RelayHandoff,
        EventKind::Haptic,
        EventKind::ChallengeActivated,
        EventKind::ChallengeCompleted,
        EventKind::PlayerLeft,
    ];
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::TouchState { .. } => EventKind::TouchState,
            EventPayload::EntityState { .. } => EventKind::EntityState,
            EventPayload::RelayHandoff { .. } => EventKind::RelayHandoff,
            EventPayload::Haptic { .. } => EventKind::Haptic,
            EventPayload::ChallengeActivated { .. } => EventKind::ChallengeActivated,
            EventPayload::ChallengeCompleted { .. } => EventKind::ChallengeCompleted,
            EventPayload::PlayerLeft => EventKind::PlayerLeft,
        }
    }

    pub fn position(&self) -> Option<Vec3> {
        match self {
            EventPayload::EntityState { state, .. } => Some(state.position),
            _ => None,
        }
    }
}

/// Envelope around every cross-client message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub sender: PlayerId,
    /// Sender's clock when the event originated.
    pub timestamp: Millis,
    /// Per-sender counter; separates two events stamped in the same millisecond.
    pub seq: u64,
    pub payload: EventPayload,
}

impl NetworkEvent {
    pub fn new(sender: PlayerId, timestamp: Millis, seq: u64, payload: EventPayload) -> Self {
        Self { sender, timestamp, seq, payload }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn key(&self) -> EnvelopeKey {
        EnvelopeKey { sender: self.sender.clone(), timestamp: self.timestamp, seq: self.seq }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EnvelopeKey {
    pub sender: PlayerId,
    pub timestamp: Millis,
    pub seq: u64,
}

/// Bounded memory of envelopes already applied. The oldest key is forgotten
/// once `capacity` is reached.
#[derive(Clone, Debug)]
pub struct SeenEnvelopes {
    capacity: usize,
    order: VecDeque<EnvelopeKey>,
    seen: HashSet<EnvelopeKey>,
}

impl SeenEnvelopes {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), order: VecDeque::new(), seen: HashSet::new() }
    }

    /// True the first time an envelope is offered.
    pub fn insert(&mut self, event: &NetworkEvent) -> bool {
        let key = event.key();
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        self.order.push_back(key.clone());
        self.seen.insert(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

pub type EventHandler = Box<dyn FnMut(&NetworkEvent)>;

/// Bidirectional event transport between participants.
///
/// Sends are fire-and-forget. Handlers run on a later turn than the send and
/// never see envelopes whose sender is [`NetworkBus::local_id`].
pub trait NetworkBus {
    fn local_id(&self) -> PlayerId;
    fn broadcast(&self, payload: EventPayload);
    fn send_to(&self, recipients: &[PlayerId], payload: EventPayload);
    fn on_event(&self, kind: EventKind, handler: EventHandler);
}

/// Handler table shared by bus implementations; owns the self-echo filter.
#[derive(Default)]
pub struct EventHandlers {
    handlers: BTreeMap<EventKind, Vec<EventHandler>>,
}

impl EventHandlers {
    pub fn register(&mut self, kind: EventKind, handler: EventHandler) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    /// Returns how many handlers ran.
    pub fn deliver(&mut self, local: &PlayerId, event: &NetworkEvent) -> usize {
        if event.sender == *local {
            trace!("dropping self-echo {:?} from {}", event.kind(), event.sender);
            return 0;
        }
        let Some(list) = self.handlers.get_mut(&event.kind()) else {
            return 0;
        };
        for handler in list.iter_mut() {
            handler(event);
        }
        list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn event(sender: &str, timestamp: Millis, seq: u64) -> NetworkEvent {
        NetworkEvent::new(sender.into(), timestamp, seq, EventPayload::TouchState { touching: true, at: timestamp })
    }

    #[test]
    fn wire_format_is_tagged() {
        let e = NetworkEvent::new(
            "p1".into(),
            42,
            0,
            EventPayload::RelayHandoff { from: "p1".into(), to: "p2".into(), at: 40 },
        );
        let raw = e.encode().unwrap();
        assert!(raw.contains(r#""type":"RelayHandoff""#), "{}", raw);
        assert_eq!(NetworkEvent::decode(&raw).unwrap(), e);
    }

    #[test]
    fn decode_rejects_unknown_payload() {
        let raw = r#"{"sender":"p1","timestamp":1,"seq":0,"payload":{"type":"Teleport"}}"#;
        assert!(NetworkEvent::decode(raw).is_err());
    }

    #[test]
    fn seen_envelopes_suppress_repeats() {
        let mut seen = SeenEnvelopes::new(8);
        assert!(seen.insert(&event("p1", 10, 0)));
        assert!(!seen.insert(&event("p1", 10, 0)));
        assert!(seen.insert(&event("p1", 10, 1)));
        assert!(seen.insert(&event("p2", 10, 0)));
    }

    #[test]
    fn seen_envelopes_are_bounded() {
        let mut seen = SeenEnvelopes::new(2);
        seen.insert(&event("p1", 1, 0));
        seen.insert(&event("p1", 2, 1));
        seen.insert(&event("p1", 3, 2));
        assert_eq!(seen.len(), 2);
        // The oldest key was evicted and reads as new again.
        assert!(seen.insert(&event("p1", 1, 0)));
    }

    #[test]
    fn handlers_never_see_self_echo() {
        let mut handlers = EventHandlers::default();
        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        handlers.register(EventKind::TouchState, Box::new(move |_| *h.borrow_mut() += 1));
        let me = PlayerId::from("me");
        assert_eq!(handlers.deliver(&me, &event("me", 1, 0)), 0);
        assert_eq!(handlers.deliver(&me, &event("you", 1, 0)), 1);
        assert_eq!(*hits.borrow(), 1);
    }
}

// In-process reference transport. Every send is encoded to JSON and queued;
// nothing is delivered until the hub is pumped, which stands in for "a later
// turn" of the host event loop.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use log::{debug, warn};

use super::{EventHandler, EventHandlers, EventKind, EventPayload, NetworkBus, NetworkEvent};
use crate::model::PlayerId;
use crate::state::timer::Clock;

#[derive(Default)]
struct HubInner {
    endpoints: BTreeMap<PlayerId, Rc<RefCell<EventHandlers>>>,
    queue: VecDeque<(PlayerId, String)>,
    duplicate: bool,
}

/// Shared medium for any number of [`LoopbackBus`] endpoints.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Rc<RefCell<HubInner>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, id: PlayerId, clock: Rc<dyn Clock>) -> LoopbackBus {
        let handlers = Rc::new(RefCell::new(EventHandlers::default()));
        self.inner.borrow_mut().endpoints.insert(id.clone(), handlers.clone());
        LoopbackBus { id, hub: self.clone(), clock, seq: Cell::new(0), handlers }
    }

    /// Messages still queued for a departed endpoint are dropped on delivery.
    pub fn leave(&self, id: &PlayerId) {
        self.inner.borrow_mut().endpoints.remove(id);
    }

    /// When on, every message is queued twice.
    pub fn set_duplicate_delivery(&self, on: bool) {
        self.inner.borrow_mut().duplicate = on;
    }

    pub fn pending(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Queues a raw wire string for `recipient`, bypassing the sender side.
    pub fn inject(&self, recipient: &PlayerId, raw: impl Into<String>) {
        self.inner.borrow_mut().queue.push_back((recipient.clone(), raw.into()));
    }

    /// Delivers everything queued so far in send order. Messages sent by
    /// handlers during delivery wait for the next pump.
    pub fn pump(&self) -> usize {
        let batch: Vec<_> = self.inner.borrow_mut().queue.drain(..).collect();
        self.deliver(batch)
    }

    /// Like [`pump`](Self::pump) but newest first, to exercise reordering.
    pub fn pump_reversed(&self) -> usize {
        let mut batch: Vec<_> = self.inner.borrow_mut().queue.drain(..).collect();
        batch.reverse();
        self.deliver(batch)
    }

    /// Pumps until the queue drains or `max_rounds` is hit.
    pub fn flush(&self, max_rounds: usize) -> usize {
        let mut delivered = 0;
        for _ in 0..max_rounds {
            if self.pending() == 0 {
                break;
            }
            delivered += self.pump();
        }
        delivered
    }

    fn enqueue(&self, sender: &PlayerId, recipients: Option<&[PlayerId]>, raw: String) {
        let mut inner = self.inner.borrow_mut();
        let copies = if inner.duplicate { 2 } else { 1 };
        let targets: Vec<PlayerId> = inner
            .endpoints
            .keys()
            .filter(|id| *id != sender)
            .filter(|id| recipients.is_none_or(|r| r.contains(id)))
            .cloned()
            .collect();
        for target in targets {
            for _ in 0..copies {
                inner.queue.push_back((target.clone(), raw.clone()));
            }
        }
    }

    fn deliver(&self, batch: Vec<(PlayerId, String)>) -> usize {
        let mut delivered = 0;
        for (recipient, raw) in batch {
            let handlers = self.inner.borrow().endpoints.get(&recipient).cloned();
            let Some(handlers) = handlers else {
                debug!("dropping message for departed endpoint {}", recipient);
                continue;
            };
            let event = match NetworkEvent::decode(&raw) {
                Ok(event) => event,
                Err(err) => {
                    warn!("undecodable message for {}: {}", recipient, err);
                    continue;
                }
            };
            handlers.borrow_mut().deliver(&recipient, &event);
            delivered += 1;
        }
        delivered
    }
}

/// One participant's view of a [`LoopbackHub`].
pub struct LoopbackBus {
    id: PlayerId,
    hub: LoopbackHub,
    clock: Rc<dyn Clock>,
    seq: Cell<u64>,
    handlers: Rc<RefCell<EventHandlers>>,
}

impl LoopbackBus {
    fn stamp(&self, payload: EventPayload) -> Option<String> {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        let event = NetworkEvent::new(self.id.clone(), self.clock.now(), seq, payload);
        match event.encode() {
            Ok(raw) => Some(raw),
            Err(err) => {
                warn!("failed to encode {:?} from {}: {}", event.kind(), self.id, err);
                None
            }
        }
    }
}

impl NetworkBus for LoopbackBus {
    fn local_id(&self) -> PlayerId {
        self.id.clone()
    }

    fn broadcast(&self, payload: EventPayload) {
        if let Some(raw) = self.stamp(payload) {
            self.hub.enqueue(&self.id, None, raw);
        }
    }

    fn send_to(&self, recipients: &[PlayerId], payload: EventPayload) {
        if let Some(raw) = self.stamp(payload) {
            self.hub.enqueue(&self.id, Some(recipients), raw);
        }
    }

    fn on_event(&self, kind: EventKind, handler: EventHandler) {
        self.handlers.borrow_mut().register(kind, handler);
    }
}

// Periodic state-diff broadcaster: a fresh entity state only goes out when it
// differs meaningfully from the last one sent for that entity.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use log::trace;

use super::{EventPayload, NetworkBus};
use crate::config::NetworkConfig;
use crate::model::{PlayerId, Vec3};
use crate::util::normalize_angle;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub position: Vec3,
    /// Heading in degrees.
    pub rotation_deg: f64,
    pub touching: bool,
}

pub struct StateDiffer {
    config: NetworkConfig,
    last_sent: HashMap<PlayerId, EntityState>,
}

impl StateDiffer {
    pub fn new(config: NetworkConfig) -> Self {
        Self { config, last_sent: HashMap::new() }
    }

    /// True when nothing was sent yet, the entity moved or turned past a
    /// threshold, or its touching flag flipped.
    pub fn has_changed(&self, entity: &PlayerId, state: &EntityState) -> bool {
        let Some(last) = self.last_sent.get(entity) else {
            return true;
        };
        last.touching != state.touching
            || last.position.distance(state.position) > self.config.position_threshold
            || normalize_angle(state.rotation_deg - last.rotation_deg).abs() > self.config.rotation_threshold_deg
    }

    /// Broadcasts `state` if it changed. Returns whether anything was sent.
    pub fn tick(&mut self, bus: &dyn NetworkBus, entity: &PlayerId, state: EntityState) -> bool {
        if !self.has_changed(entity, &state) {
            trace!("state of {} unchanged, skipping broadcast", entity);
            return false;
        }
        bus.broadcast(EventPayload::EntityState { entity: entity.clone(), state });
        self.last_sent.insert(entity.clone(), state);
        true
    }

    pub fn last_sent(&self, entity: &PlayerId) -> Option<&EntityState> {
        self.last_sent.get(entity)
    }

    pub fn forget(&mut self, entity: &PlayerId) {
        self.last_sent.remove(entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{EventKind, LoopbackHub, NetworkEvent};
    use crate::state::timer::{Clock, VirtualClock};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn state(x: f64, rot: f64, touching: bool) -> EntityState {
        EntityState { position: Vec3::new(x, 0.0, 0.0), rotation_deg: rot, touching }
    }

    #[test]
    fn only_meaningful_changes_are_broadcast() {
        let hub = LoopbackHub::new();
        let clock: Rc<dyn Clock> = Rc::new(VirtualClock::new(0));
        let a = hub.join("a".into(), clock.clone());
        let b = hub.join("b".into(), clock);
        let seen: Rc<RefCell<Vec<NetworkEvent>>> = Rc::default();
        let s = seen.clone();
        b.on_event(EventKind::EntityState, Box::new(move |e| s.borrow_mut().push(e.clone())));

        let me = PlayerId::from("a");
        let mut differ = StateDiffer::new(NetworkConfig::default());
        assert!(differ.tick(&a, &me, state(0.0, 0.0, false)));
        assert!(!differ.tick(&a, &me, state(0.01, 1.0, false)));
        assert!(differ.tick(&a, &me, state(0.2, 0.0, false)));
        assert!(differ.tick(&a, &me, state(0.2, 10.0, false)));
        assert!(differ.tick(&a, &me, state(0.2, 10.0, true)));
        hub.pump();
        assert_eq!(seen.borrow().len(), 4);
    }

    #[test]
    fn rotation_compares_across_the_seam() {
        let differ = {
            let mut d = StateDiffer::new(NetworkConfig::default());
            d.last_sent.insert("a".into(), state(0.0, 179.0, false));
            d
        };
        assert!(!differ.has_changed(&"a".into(), &state(0.0, -179.0, false)));
        assert!(differ.has_changed(&"a".into(), &state(0.0, 150.0, false)));
    }
}

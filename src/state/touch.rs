// Live contact map extracted from the raw begin/move/end/cancel stream

use std::collections::VecDeque;

use crate::model::{Millis, TouchId, TouchPoint, Vec2};

/// Lower bound on the time step used for velocity, so two events stamped in
/// the same millisecond don't divide by zero.
const MIN_DT_MS: f64 = 1.0;

/// Fixed-capacity ring of recent positions; oldest entries fall off.
#[derive(Clone, Debug)]
pub struct PathBuffer {
    capacity: usize,
    points: VecDeque<(Millis, Vec2)>,
}

impl PathBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, points: VecDeque::with_capacity(capacity) }
    }

    pub fn push(&mut self, time: Millis, position: Vec2) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back((time, position));
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Millis, Vec2)> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Total distance travelled along the buffered path.
    pub fn path_length(&self) -> f64 {
        self.points
            .iter()
            .zip(self.points.iter().skip(1))
            .map(|((_, a), (_, b))| a.distance(*b))
            .sum()
    }
}

/// Active contacts in begin order. Only the local input session mutates this.
#[derive(Clone, Debug)]
pub struct TouchTracker {
    touches: Vec<TouchPoint>,
    path: PathBuffer,
}

impl TouchTracker {
    pub fn new(path_capacity: usize) -> Self {
        Self { touches: Vec::new(), path: PathBuffer::new(path_capacity) }
    }

    /// A repeated begin for a live id replaces the old contact.
    pub fn begin(&mut self, id: TouchId, position: Vec2, time: Millis) {
        self.touches.retain(|t| t.id != id);
        if self.touches.is_empty() {
            self.path.clear();
        }
        let mut point = TouchPoint::new(id, position, time);
        if !self.touches.is_empty() {
            point.multi = true;
            for t in &mut self.touches {
                t.multi = true;
            }
        }
        self.touches.push(point);
        self.path.push(time, position);
    }

    /// Returns false for an unknown id.
    pub fn update(&mut self, id: TouchId, position: Vec2, time: Millis) -> bool {
        let Some(t) = self.touches.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        let dt = (time.saturating_sub(t.last_time) as f64).max(MIN_DT_MS);
        t.delta = position - t.position;
        t.velocity = Vec2::new(t.delta.x / dt, t.delta.y / dt);
        t.position = position;
        t.last_time = time.max(t.last_time);
        t.duration = t.last_time.saturating_sub(t.start_time);
        self.path.push(time, position);
        true
    }

    /// Finalizes the duration and removes the contact.
    pub fn end(&mut self, id: TouchId, time: Millis) -> Option<TouchPoint> {
        let idx = self.touches.iter().position(|t| t.id == id)?;
        let mut t = self.touches.remove(idx);
        t.last_time = time.max(t.last_time);
        t.duration = t.last_time.saturating_sub(t.start_time);
        Some(t)
    }

    pub fn cancel(&mut self, id: TouchId) -> Option<TouchPoint> {
        let idx = self.touches.iter().position(|t| t.id == id)?;
        Some(self.touches.remove(idx))
    }

    pub fn get(&self, id: TouchId) -> Option<&TouchPoint> {
        self.touches.iter().find(|t| t.id == id)
    }

    pub fn count(&self) -> usize {
        self.touches.len()
    }

    pub fn touches(&self) -> &[TouchPoint] {
        &self.touches
    }

    pub fn snapshot(&self) -> Vec<TouchPoint> {
        self.touches.clone()
    }

    /// First two live contacts, in begin order.
    pub fn pair(&self) -> Option<(&TouchPoint, &TouchPoint)> {
        match self.touches.as_slice() {
            [a, b, ..] => Some((a, b)),
            _ => None,
        }
    }

    pub fn path(&self) -> &PathBuffer {
        &self.path
    }

    pub fn clear(&mut self) {
        self.touches.clear();
        self.path.clear();
    }
}

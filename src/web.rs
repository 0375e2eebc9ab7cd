//! Browser host adapter (wasm32 only): touch listeners on an element, a
//! wall clock, vibration haptics, an interval ticker and config persistence
//! in `localStorage`. Listeners and intervals are released on drop.

use std::cell::RefCell;
use std::rc::Rc;

use log::warn;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{HtmlElement, TouchEvent};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::host::{HapticTrigger, patterns};
use crate::model::{Millis, PlayerId, TouchId, Vec2};
use crate::net::{EventPayload, NetworkBus};
use crate::session::{RawTouch, TouchSession};
use crate::state::timer::Clock;

fn host_err(context: &str, err: JsValue) -> Error {
    Error::Host(format!("{}: {:?}", context, err))
}

fn window() -> Result<web_sys::Window> {
    web_sys::window().ok_or_else(|| Error::Host("no window".into()))
}

fn now() -> Millis {
    js_sys::Date::now() as Millis
}

/// Epoch milliseconds from `Date.now()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebClock;

impl Clock for WebClock {
    fn now(&self) -> Millis {
        now()
    }
}

#[derive(Clone, Copy, Debug)]
enum Phase {
    Begin,
    Move,
    End,
    Cancel,
}

impl Phase {
    fn raw(self, id: TouchId, position: Vec2, time: Millis) -> RawTouch {
        match self {
            Phase::Begin => RawTouch::Begin { id, position, time },
            Phase::Move => RawTouch::Move { id, position, time },
            Phase::End => RawTouch::End { id, time },
            Phase::Cancel => RawTouch::Cancel { id, time },
        }
    }
}

type TouchCallback = Closure<dyn FnMut(TouchEvent)>;

/// Live touch listeners; removed from the element when dropped.
pub struct TouchListeners {
    element: HtmlElement,
    callbacks: Vec<(&'static str, TouchCallback)>,
}

impl Drop for TouchListeners {
    fn drop(&mut self) {
        for (name, cb) in &self.callbacks {
            let _ = self.element.remove_event_listener_with_callback(name, cb.as_ref().unchecked_ref());
        }
    }
}

/// Feeds every changed touch on `element` into `session`, in element-local
/// pixel coordinates.
pub fn attach_touch_listeners(element: &HtmlElement, session: Rc<RefCell<TouchSession>>) -> Result<TouchListeners> {
    let mut listeners = TouchListeners { element: element.clone(), callbacks: Vec::new() };
    let phases = [
        ("touchstart", Phase::Begin),
        ("touchmove", Phase::Move),
        ("touchend", Phase::End),
        ("touchcancel", Phase::Cancel),
    ];
    for (name, phase) in phases {
        let target = element.clone();
        let session = session.clone();
        let cb = Closure::wrap(Box::new(move |e: TouchEvent| {
            e.prevent_default();
            let Ok(mut s) = session.try_borrow_mut() else {
                warn!("session busy, dropping {}", name);
                return;
            };
            let rect = target.get_bounding_client_rect();
            let time = now();
            let changed = e.changed_touches();
            for i in 0..changed.length() {
                let Some(t) = changed.item(i) else {
                    continue;
                };
                let position = Vec2::new(t.client_x() as f64 - rect.left(), t.client_y() as f64 - rect.top());
                s.handle(phase.raw(t.identifier(), position, time));
            }
        }) as Box<dyn FnMut(_)>);
        element
            .add_event_listener_with_callback(name, cb.as_ref().unchecked_ref())
            .map_err(|e| host_err(name, e))?;
        listeners.callbacks.push((name, cb));
    }
    Ok(listeners)
}

/// Repeating `setInterval` callback, cleared on drop.
pub struct Ticker {
    window: web_sys::Window,
    id: i32,
    _callback: Closure<dyn FnMut()>,
}

impl Ticker {
    pub fn start(interval_ms: i32, f: impl FnMut() + 'static) -> Result<Self> {
        let window = window()?;
        let callback = Closure::wrap(Box::new(f) as Box<dyn FnMut()>);
        let id = window
            .set_interval_with_callback_and_timeout_and_arguments_0(callback.as_ref().unchecked_ref(), interval_ms)
            .map_err(|e| host_err("setInterval", e))?;
        Ok(Self { window, id, _callback: callback })
    }

    /// Fires deferred taps on `session` every `interval_ms`.
    pub fn gestures(session: Rc<RefCell<TouchSession>>, interval_ms: i32) -> Result<Self> {
        Self::start(interval_ms, move || {
            if let Ok(mut s) = session.try_borrow_mut() {
                s.tick(now());
            }
        })
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.window.clear_interval_with_handle(self.id);
    }
}

fn vibration_ms(pattern: &str) -> u32 {
    match pattern {
        patterns::CHALLENGE_READY => 120,
        patterns::SYNC_SUCCESS => 200,
        patterns::RELAY_PERFECT => 60,
        patterns::RELAY_GOOD => 40,
        patterns::RELAY_MISS => 15,
        _ => 30,
    }
}

/// Vibrates this device; other players are reached with `Haptic` envelopes.
pub struct VibrationHaptics {
    local: PlayerId,
    bus: Rc<dyn NetworkBus>,
}

impl VibrationHaptics {
    pub fn new(bus: Rc<dyn NetworkBus>) -> Self {
        Self { local: bus.local_id(), bus }
    }
}

impl HapticTrigger for VibrationHaptics {
    fn play(&self, pattern: &str) {
        if let Ok(win) = window() {
            win.navigator().vibrate_with_duration(vibration_ms(pattern));
        }
    }

    fn broadcast(&self, pattern: &str, players: &[PlayerId]) {
        if players.contains(&self.local) {
            self.play(pattern);
        }
        let others: Vec<PlayerId> = players.iter().filter(|p| **p != self.local).cloned().collect();
        if !others.is_empty() {
            self.bus.send_to(&others, EventPayload::Haptic { pattern: pattern.to_string() });
        }
    }
}

fn storage() -> Result<web_sys::Storage> {
    window()?
        .local_storage()
        .map_err(|e| host_err("localStorage", e))?
        .ok_or_else(|| Error::Host("localStorage unavailable".into()))
}

/// Missing keys yield the default config.
pub fn load_config(key: &str) -> Result<EngineConfig> {
    match storage()?.get_item(key).map_err(|e| host_err(key, e))? {
        Some(raw) => EngineConfig::from_json(&raw),
        None => Ok(EngineConfig::default()),
    }
}

pub fn save_config(key: &str, config: &EngineConfig) -> Result<()> {
    storage()?.set_item(key, &config.to_json()?).map_err(|e| host_err(key, e))
}

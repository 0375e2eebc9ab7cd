// Geometry and logging helpers shared by the input and sync layers

use crate::model::Vec2;

/// Angle of the segment `a -> b` in degrees, in (-180, 180].
pub fn angle_deg(a: Vec2, b: Vec2) -> f64 {
    (b.y - a.y).atan2(b.x - a.x).to_degrees()
}

/// Folds a difference of two `angle_deg` results back into (-180, 180].
/// One correction is enough because both inputs are already in range.
pub fn normalize_angle(deg: f64) -> f64 {
    if deg > 180.0 {
        deg - 360.0
    } else if deg <= -180.0 {
        deg + 360.0
    } else {
        deg
    }
}

#[cfg(target_arch = "wasm32")]
pub fn clog(msg: &str) {
    web_sys::console::log_1(&wasm_bindgen::JsValue::from_str(msg));
}

#[cfg(target_arch = "wasm32")]
struct ConsoleLogger;

#[cfg(target_arch = "wasm32")]
impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            clog(&format!("[{}] {}: {}", record.level(), record.target(), record.args()));
        }
    }

    fn flush(&self) {}
}

#[cfg(target_arch = "wasm32")]
static CONSOLE_LOGGER: ConsoleLogger = ConsoleLogger;

/// Routes `log` records to the browser console. Returns false if a logger
/// was already installed. Native hosts bring their own logger.
#[cfg(target_arch = "wasm32")]
pub fn init_logging(level: log::LevelFilter) -> bool {
    let installed = log::set_logger(&CONSOLE_LOGGER).is_ok();
    if installed {
        log::set_max_level(level);
    }
    installed
}

/// Installs nothing: native hosts register their own `log` implementation.
/// Only caps the level of records this crate emits, and always returns false.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging(level: log::LevelFilter) -> bool {
    log::set_max_level(level);
    false
}

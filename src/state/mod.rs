pub mod gesture;
pub mod timer;
pub mod touch;

pub use gesture::{GestureClassifier, GestureSubscribers, SubscriptionId};
pub use timer::{Clock, TimerId, TimerQueue, VirtualClock};
#[cfg(not(target_arch = "wasm32"))]
pub use timer::SystemClock;
pub use touch::{PathBuffer, TouchTracker};

pub mod engine;
pub mod state;

pub use engine::{Watchdog, WatchdogError, WatchdogHandle};
pub use state::{next_wait, Expiry, Phase, WatchdogState, WatchdogStatus, MAX_WAIT};

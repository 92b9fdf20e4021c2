#![forbid(unsafe_code)]

pub mod config;
pub mod metrics;
pub mod notify;
pub mod watchdog;

pub use config::{
    parse_duration, validate_route_name, ConfigError, Endpoint, EndpointDef, FormValue, PostBody,
    Target,
};
pub use metrics::{Counter, Metrics, WatchdogCounters};
pub use notify::{Delivery, DeliveryError, Dispatch, HttpDispatcher};
pub use watchdog::{
    Expiry, Phase, Watchdog, WatchdogError, WatchdogHandle, WatchdogState, WatchdogStatus,
};

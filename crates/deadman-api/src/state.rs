use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use deadman_core::{validate_route_name, Metrics, WatchdogHandle};

pub const DEFAULT_METRICS_PATH: &str = "/metrics";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Duplicate heartbeat route: {0}")]
    DuplicateRoute(String),
    #[error("Endpoint '{0}' collides with the metrics path")]
    MetricsPathCollision(String),
    #[error("Invalid metrics path '{path}': {reason}")]
    InvalidMetricsPath { path: String, reason: String },
}

#[derive(Clone)]
pub struct AppState {
    /// Heartbeat route (`/<endpoint>`) to its watchdog.
    pub watchdogs: Arc<HashMap<String, WatchdogHandle>>,
    pub metrics: Arc<Metrics>,
    pub metrics_path: String,
}

impl AppState {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            watchdogs: Arc::new(HashMap::new()),
            metrics,
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
        }
    }

    /// Serve metrics at `path`, `/`-prefixed if missing. The path must be a
    /// plain route: no `{`, `}` or `:`/`*` segments.
    pub fn with_metrics_path(mut self, path: &str) -> Result<Self, StateError> {
        let route = path.strip_prefix('/').unwrap_or(path);
        validate_route_name(route).map_err(|reason| StateError::InvalidMetricsPath {
            path: path.to_string(),
            reason,
        })?;
        self.metrics_path = format!("/{}", route);
        Ok(self)
    }

    /// Register heartbeat routes. Fails if two watchdogs share a route or a
    /// route shadows the metrics path.
    pub fn with_watchdogs(
        mut self,
        handles: impl IntoIterator<Item = WatchdogHandle>,
    ) -> Result<Self, StateError> {
        let mut routes = HashMap::new();
        for handle in handles {
            let route = format!("/{}", handle.name());
            if route == self.metrics_path {
                return Err(StateError::MetricsPathCollision(handle.name().to_string()));
            }
            if routes.contains_key(&route) {
                return Err(StateError::DuplicateRoute(route));
            }
            routes.insert(route, handle);
        }
        self.watchdogs = Arc::new(routes);
        Ok(self)
    }
}

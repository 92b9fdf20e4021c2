pub mod heartbeat;

use axum::routing::any;
use axum::Router;

use crate::state::AppState;

/// One route per watchdog, answering any method. Each route owns a clone of
/// its handle.
pub fn router(state: &AppState) -> Router<AppState> {
    state
        .watchdogs
        .iter()
        .fold(Router::new(), |router, (route, handle)| {
            let handle = handle.clone();
            router.route(route, any(move || heartbeat::heartbeat(handle.clone())))
        })
}

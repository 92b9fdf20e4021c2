use axum::http::StatusCode;
use tracing::debug;

use deadman_core::WatchdogHandle;

use crate::error::ApiError;

/// Reset the watchdog bound to this route. Returns once the watchdog has
/// accepted the heartbeat, which may mean waiting out a notification cycle
/// in progress.
pub async fn heartbeat(handle: WatchdogHandle) -> Result<StatusCode, ApiError> {
    handle.reset().await?;
    debug!(endpoint = handle.name(), "Heartbeat accepted");
    Ok(StatusCode::OK)
}

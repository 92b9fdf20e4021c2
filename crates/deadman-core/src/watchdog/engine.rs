use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Sleep};
use tracing::{debug, info};

use crate::config::Endpoint;
use crate::metrics::{Metrics, WatchdogCounters};
use crate::notify::Dispatch;
use crate::watchdog::state::{Expiry, WatchdogState, WatchdogStatus};

/// A heartbeat, acknowledged once the loop has re-armed its deadline.
type ResetRequest = oneshot::Sender<()>;

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("Watchdog for endpoint '{0}' has stopped")]
    Stopped(String),
}

/// The timer loop for one endpoint.
///
/// Resets and deadline expiries are consumed by a single `select!`, so the
/// state is never touched concurrently. A notification cycle runs inline:
/// heartbeats arriving meanwhile wait until it finishes.
pub struct Watchdog {
    endpoint: Arc<Endpoint>,
    state: WatchdogState,
    deadline: Instant,
    counters: WatchdogCounters,
    dispatcher: Arc<dyn Dispatch>,
    resets: mpsc::Receiver<ResetRequest>,
    status: watch::Sender<WatchdogStatus>,
}

/// Cloneable sender side of a [`Watchdog`]. The loop stops once every
/// handle is dropped.
#[derive(Debug, Clone)]
pub struct WatchdogHandle {
    name: Arc<str>,
    resets: mpsc::Sender<ResetRequest>,
    status: watch::Receiver<WatchdogStatus>,
}

impl Watchdog {
    /// Create a watchdog armed at now + `endpoint.timeout`.
    pub fn new(
        endpoint: Endpoint,
        counters: WatchdogCounters,
        dispatcher: Arc<dyn Dispatch>,
    ) -> (Self, WatchdogHandle) {
        let state = WatchdogState::from_endpoint(&endpoint);
        let deadline = Instant::now() + state.current_timeout();
        let (reset_tx, reset_rx) = mpsc::channel(1);
        let (status_tx, status_rx) = watch::channel(state.status());

        let handle = WatchdogHandle {
            name: Arc::from(endpoint.name.as_str()),
            resets: reset_tx,
            status: status_rx,
        };
        let watchdog = Self {
            endpoint: Arc::new(endpoint),
            state,
            deadline,
            counters,
            dispatcher,
            resets: reset_rx,
            status: status_tx,
        };
        (watchdog, handle)
    }

    /// Register the endpoint's counters and run its loop on a new task.
    pub fn spawn(
        endpoint: Endpoint,
        metrics: &Metrics,
        dispatcher: Arc<dyn Dispatch>,
    ) -> WatchdogHandle {
        let counters = metrics.watchdog_counters(&endpoint);
        let (watchdog, handle) = Self::new(endpoint, counters, dispatcher);
        tokio::spawn(watchdog.run());
        handle
    }

    pub async fn run(mut self) {
        info!(
            endpoint = %self.endpoint.name,
            timeout = ?self.endpoint.timeout,
            repeat_after = ?self.endpoint.repeat_after,
            backoff_factor = self.endpoint.backoff_factor,
            targets = self.endpoint.targets.len(),
            "Watchdog armed"
        );

        let sleep = tokio::time::sleep_until(self.deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;

                request = self.resets.recv() => {
                    let Some(ack) = request else {
                        debug!(endpoint = %self.endpoint.name, "All handles dropped, stopping watchdog");
                        return;
                    };
                    let wait = self.state.reset();
                    self.rearm(sleep.as_mut(), wait);
                    debug!(endpoint = %self.endpoint.name, "Heartbeat received");
                    let _ = ack.send(());
                }
                () = &mut sleep => {
                    self.expire(sleep.as_mut()).await;
                }
            }
        }
    }

    async fn expire(&mut self, sleep: Pin<&mut Sleep>) {
        let (expiry, wait) = self.state.expire();
        match expiry {
            Expiry::Timeout => self.counters.timeouts.inc(),
            Expiry::Repeat => self.counters.repeats.inc(),
        }
        // Armed before dispatching: time spent notifying counts toward the
        // next wait.
        self.rearm(sleep, wait);

        info!(
            endpoint = %self.endpoint.name,
            event = %expiry,
            next_in = ?wait,
            "{} for endpoint \"{}\"",
            expiry,
            self.endpoint.name
        );

        let deliveries = self
            .dispatcher
            .dispatch(&self.endpoint.name, &self.endpoint.targets)
            .await;
        for (delivery, errors) in deliveries.iter().zip(&self.counters.target_errors) {
            if delivery.is_failure() {
                errors.inc();
            }
        }
    }

    fn rearm(&mut self, sleep: Pin<&mut Sleep>, wait: std::time::Duration) {
        self.deadline = Instant::now() + wait;
        sleep.reset(self.deadline);
        self.status.send_replace(self.state.status());
    }
}

impl WatchdogHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver a heartbeat and wait until the loop has taken it.
    pub async fn reset(&self) -> Result<(), WatchdogError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.resets
            .send(ack_tx)
            .await
            .map_err(|_| self.stopped())?;
        ack_rx.await.map_err(|_| self.stopped())
    }

    pub fn status(&self) -> WatchdogStatus {
        *self.status.borrow()
    }

    fn stopped(&self) -> WatchdogError {
        WatchdogError::Stopped(self.name.to_string())
    }
}

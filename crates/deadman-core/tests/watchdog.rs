//! Timer-loop behaviour under a paused tokio clock.
//!
//! A recording dispatcher stands in for HTTP so the schedule can be checked
//! to the millisecond.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deadman_core::{
    Delivery, DeliveryError, Dispatch, Endpoint, Metrics, Phase, Target, Watchdog,
    WatchdogCounters, WatchdogHandle,
};
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Records when each cycle happened; targets whose index is listed in
/// `failing` report a failed delivery.
struct Recorder {
    start: Instant,
    failing: Vec<usize>,
    cycles: Mutex<Vec<(Duration, usize)>>,
}

impl Recorder {
    fn new(start: Instant, failing: Vec<usize>) -> Arc<Self> {
        Arc::new(Self {
            start,
            failing,
            cycles: Mutex::new(Vec::new()),
        })
    }

    fn cycle_times(&self) -> Vec<Duration> {
        self.cycles.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    fn attempts(&self) -> usize {
        self.cycles.lock().unwrap().iter().map(|(_, n)| n).sum()
    }
}

#[async_trait]
impl Dispatch for Recorder {
    async fn dispatch(&self, _endpoint: &str, targets: &[Target]) -> Vec<Delivery> {
        self.cycles
            .lock()
            .unwrap()
            .push((self.start.elapsed(), targets.len()));
        (0..targets.len())
            .map(|i| {
                if self.failing.contains(&i) {
                    Delivery::Failed(DeliveryError::Status {
                        url: targets[i].label().to_string(),
                        status: 503,
                        body: String::new(),
                    })
                } else {
                    Delivery::Delivered
                }
            })
            .collect()
    }
}

fn assert_near(actual: Duration, expected: Duration) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= Duration::from_millis(5),
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

fn start(
    endpoint: Endpoint,
    dispatcher: Arc<dyn Dispatch>,
) -> (WatchdogHandle, WatchdogCounters, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let counters = metrics.watchdog_counters(&endpoint);
    let handle = Watchdog::spawn(endpoint, &metrics, dispatcher);
    (handle, counters, metrics)
}

#[tokio::test(start_paused = true)]
async fn db_backup_escalates_geometrically_until_heartbeat() {
    let t0 = Instant::now();
    let recorder = Recorder::new(t0, vec![]);
    let endpoint = Endpoint::new("db-backup", secs(10))
        .with_backoff_factor(2.0)
        .with_target(Target::get("http://alerts.invalid/ping"));
    let (handle, counters, _metrics) = start(endpoint, recorder.clone());

    sleep_until(t0 + secs(9)).await;
    assert_eq!(counters.timeouts.get(), 0);
    assert!(recorder.cycle_times().is_empty());

    sleep_until(t0 + secs(11)).await;
    assert_eq!(counters.timeouts.get(), 1);
    assert_eq!(counters.repeats.get(), 0);
    assert_eq!(handle.status().phase, Phase::Escalating);
    assert_eq!(handle.status().current_timeout, secs(20));

    sleep_until(t0 + secs(31)).await;
    assert_eq!(counters.repeats.get(), 1);

    sleep_until(t0 + secs(69)).await;
    assert_eq!(counters.repeats.get(), 1);

    sleep_until(t0 + secs(71)).await;
    assert_eq!(counters.repeats.get(), 2);
    assert_eq!(counters.timeouts.get(), 1);

    let times = recorder.cycle_times();
    assert_eq!(times.len(), 3);
    assert_near(times[0], secs(10));
    assert_near(times[1], secs(30));
    assert_near(times[2], secs(70));

    handle.reset().await.unwrap();
    assert_eq!(handle.status().phase, Phase::Waiting);
    assert_eq!(handle.status().current_timeout, secs(10));

    sleep_until(t0 + secs(80)).await;
    assert_eq!(recorder.cycle_times().len(), 3);

    sleep_until(t0 + secs(82)).await;
    let times = recorder.cycle_times();
    assert_eq!(times.len(), 4);
    assert_near(times[3], secs(81));
    // Escalation was cleared, so this is a fresh timeout.
    assert_eq!(counters.timeouts.get(), 2);
    assert_eq!(counters.repeats.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn regular_heartbeats_never_fire() {
    let t0 = Instant::now();
    let recorder = Recorder::new(t0, vec![]);
    let endpoint = Endpoint::new("cron", secs(10)).with_target(Target::get("http://a.invalid"));
    let (handle, counters, _metrics) = start(endpoint, recorder.clone());

    for i in 1..=6 {
        sleep_until(t0 + secs(5 * i)).await;
        handle.reset().await.unwrap();
    }
    assert_eq!(counters.timeouts.get(), 0);
    assert!(recorder.cycle_times().is_empty());

    // Last heartbeat at t=30s.
    sleep_until(t0 + secs(41)).await;
    assert_eq!(counters.timeouts.get(), 1);
    assert_near(recorder.cycle_times()[0], secs(40));
}

#[tokio::test(start_paused = true)]
async fn every_target_gets_one_attempt_per_cycle() {
    let t0 = Instant::now();
    let recorder = Recorder::new(t0, vec![]);
    let endpoint = Endpoint::new("fanout", secs(3))
        .with_backoff_factor(100.0)
        .with_target(Target::get("http://a.invalid"))
        .with_target(Target::get("http://b.invalid"))
        .with_target(Target::get("http://c.invalid"));
    let (_handle, counters, _metrics) = start(endpoint, recorder.clone());

    sleep_until(t0 + secs(4)).await;
    assert_eq!(counters.timeouts.get(), 1);
    assert_eq!(recorder.cycle_times().len(), 1);
    assert_eq!(recorder.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn failures_are_counted_per_target() {
    let t0 = Instant::now();
    let recorder = Recorder::new(t0, vec![0]);
    let endpoint = Endpoint::new("job", secs(5))
        .with_backoff_factor(1.0)
        .with_target(Target::get("http://unreachable.invalid"))
        .with_target(Target::get("http://ok.invalid"));
    let (_handle, counters, metrics) = start(endpoint, recorder.clone());

    sleep_until(t0 + secs(6)).await;
    assert_eq!(counters.timeouts.get(), 1);
    assert_eq!(counters.target_errors[0].get(), 1);
    assert_eq!(counters.target_errors[1].get(), 0);

    sleep_until(t0 + secs(11)).await;
    assert_eq!(counters.repeats.get(), 1);
    assert_eq!(counters.target_errors[0].get(), 2);
    assert_eq!(counters.target_errors[1].get(), 0);

    let text = metrics.render();
    assert!(text.contains(
        "deadmanswitch_target_errors{endpoint=\"job\",target=\"http://unreachable.invalid\"} 2"
    ));
    assert!(text.contains(
        "deadmanswitch_target_errors{endpoint=\"job\",target=\"http://ok.invalid\"} 0"
    ));
}

/// Blocks inside the notification cycle until released.
struct Gate {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl Dispatch for Gate {
    async fn dispatch(&self, _endpoint: &str, targets: &[Target]) -> Vec<Delivery> {
        self.entered.notify_one();
        self.release.notified().await;
        targets.iter().map(|_| Delivery::Delivered).collect()
    }
}

#[tokio::test(start_paused = true)]
async fn heartbeat_waits_for_running_cycle() {
    let gate = Arc::new(Gate {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let endpoint = Endpoint::new("slow", secs(1))
        .with_backoff_factor(60.0)
        .with_target(Target::get("http://slow.invalid"));
    let (handle, counters, _metrics) = start(endpoint, gate.clone());

    gate.entered.notified().await;
    assert_eq!(counters.timeouts.get(), 1);

    let heartbeat = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.reset().await })
    };
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert!(!heartbeat.is_finished());
    assert_eq!(handle.status().phase, Phase::Escalating);

    gate.release.notify_one();
    heartbeat.await.unwrap().unwrap();
    assert_eq!(handle.status().phase, Phase::Waiting);
    assert_eq!(handle.status().current_timeout, secs(1));
}

#[tokio::test(start_paused = true)]
async fn loop_stops_when_handles_are_dropped() {
    let t0 = Instant::now();
    let recorder = Recorder::new(t0, vec![]);
    let metrics = Metrics::new();
    let endpoint = Endpoint::new("orphan", secs(10));
    let counters = metrics.watchdog_counters(&endpoint);
    let (watchdog, handle) = Watchdog::new(endpoint, counters, recorder.clone());
    let task = tokio::spawn(watchdog.run());

    let extra = handle.clone();
    drop(handle);
    extra.reset().await.unwrap();
    drop(extra);

    task.await.unwrap();
    assert!(recorder.cycle_times().is_empty());
}

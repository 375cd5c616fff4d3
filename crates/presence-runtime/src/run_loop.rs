//! Run loop: sample intake, sweep timer, snapshot timer and outbound sink.
//!
//! The [`EventManager`] sits behind one `tokio::sync::Mutex`; every task
//! takes the lock for one bounded operation and releases it. Shutdown is
//! ordered: the sweep timer stops first, then the snapshot timer, then
//! sample intake. Work already holding the lock runs to completion.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use presence_core::{PresenceConfig, Sample};
use presence_events::{AuditSnapshot, CategoryLookup, EventManager};
use presence_source_ibeacon::{AdvertisementSource, SourceError, decode};
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::sink;

/// Decoded samples waiting for the intake task.
const SAMPLE_QUEUE_CAPACITY: usize = 1024;

const RETRY_BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Timers never fire faster than this.
const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

const SWEEP_TASK: &str = "sweep";
const TICK_TASK: &str = "tick";
const INTAKE_TASK: &str = "intake";

type SharedManager = Arc<Mutex<EventManager>>;

/// Totals reported when the loop stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub audit: AuditSnapshot,
    pub messages_written: u64,
    /// Background tasks in the order they finished during shutdown.
    pub stopped: Vec<&'static str>,
}

/// Run until `shutdown` resolves or the source is exhausted.
pub async fn run<S, W>(
    config: PresenceConfig,
    source: S,
    category: Option<Arc<dyn CategoryLookup>>,
    out: W,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<RunSummary>
where
    S: AdvertisementSource + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    config.validate()?;
    if config.startup_delay_ms > 0 {
        tracing::info!(delay_ms = config.startup_delay_ms, "delaying startup");
        tokio::time::sleep(Duration::from_millis(config.startup_delay_ms)).await;
    }

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let sink_handle = tokio::spawn(sink::write_ndjson(out_rx, out));

    let manager: SharedManager = Arc::new(Mutex::new(EventManager::new(
        config.clone(),
        out_tx,
        category,
    )));

    let sweep_cancel = CancellationToken::new();
    let tick_cancel = CancellationToken::new();
    let intake_cancel = CancellationToken::new();
    let input_done = CancellationToken::new();

    let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_QUEUE_CAPACITY);
    let producer_config = config.clone();
    let producer_cancel = intake_cancel.clone();
    // Not awaited on shutdown: a blocking read cannot be interrupted. It
    // exits on its next send once the intake side is gone.
    let _producer = tokio::task::spawn_blocking(move || {
        produce_samples(source, &producer_config, &sample_tx, &producer_cancel);
    });

    let intake_handle = tokio::spawn(run_intake(
        Arc::clone(&manager),
        sample_rx,
        intake_cancel.clone(),
        input_done.clone(),
    ));

    let sweep_handle = tokio::spawn(run_sweep_timer(
        Arc::clone(&manager),
        config.cleanup_interval(),
        sweep_cancel.clone(),
    ));

    let tick_handle: Option<JoinHandle<&'static str>> = if config.send_update_messages {
        Some(tokio::spawn(run_snapshot_timer(
            Arc::clone(&manager),
            config.update_period(),
            tick_cancel.clone(),
        )))
    } else {
        tracing::info!("snapshot messages disabled");
        None
    };

    tracing::info!(
        collection_point_id = %config.collection_point_id,
        "presence engine running"
    );

    tokio::select! {
        () = shutdown => {}
        () = input_done.cancelled() => tracing::info!("input exhausted, shutting down"),
    }

    let mut stopped = Vec::with_capacity(3);
    sweep_cancel.cancel();
    stopped.push(sweep_handle.await?);
    tick_cancel.cancel();
    if let Some(handle) = tick_handle {
        stopped.push(handle.await?);
    }
    intake_cancel.cancel();
    stopped.push(intake_handle.await?);

    let audit = manager.lock().await.audit();
    // Last owner of the outbound sender: dropping it lets the sink drain
    // and finish.
    drop(manager);
    let messages_written = sink_handle.await??;

    tracing::debug!(?stopped, "background tasks stopped");
    Ok(RunSummary {
        audit,
        messages_written,
        stopped,
    })
}

// ─── Producer ────────────────────────────────────────────────────────

/// Blocking loop: read, decode, forward. Malformed input is dropped,
/// an unavailable source is retried with exponential backoff.
fn produce_samples<S: AdvertisementSource>(
    mut source: S,
    config: &PresenceConfig,
    tx: &mpsc::Sender<Sample>,
    cancel: &CancellationToken,
) {
    let mut backoff = RETRY_BACKOFF_INITIAL;
    while !cancel.is_cancelled() {
        let adv = match source.next_advertisement() {
            Ok(Some(adv)) => {
                backoff = RETRY_BACKOFF_INITIAL;
                adv
            }
            Ok(None) => {
                tracing::debug!("advertisement source exhausted");
                return;
            }
            Err(SourceError::Malformed(reason)) => {
                tracing::warn!("dropping malformed advertisement: {reason}");
                continue;
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(retry_in_ms = backoff.as_millis() as u64, "{e}");
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
                continue;
            }
            Err(e) => {
                tracing::error!("advertisement source failed: {e}");
                return;
            }
        };

        let sample = match decode(&adv, config, Utc::now()) {
            Ok(Some(sample)) => sample,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(sender = %adv.sender, "dropping advertisement: {e}");
                continue;
            }
        };

        if tx.blocking_send(sample).is_err() {
            tracing::debug!("sample intake closed, producer stopping");
            return;
        }
    }
}

// ─── Tasks ───────────────────────────────────────────────────────────

async fn run_intake(
    manager: SharedManager,
    mut rx: mpsc::Receiver<Sample>,
    cancel: CancellationToken,
    input_done: CancellationToken,
) -> &'static str {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sample = rx.recv() => match sample {
                Some(sample) => {
                    manager.lock().await.on_sample(sample);
                }
                None => {
                    input_done.cancel();
                    // Keep running until the ordered shutdown reaches intake.
                    cancel.cancelled().await;
                    break;
                }
            },
        }
    }
    tracing::debug!("sample intake stopped");
    INTAKE_TASK
}

async fn run_sweep_timer(
    manager: SharedManager,
    period: Duration,
    cancel: CancellationToken,
) -> &'static str {
    let mut ticker = periodic(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                manager.lock().await.sweep(Utc::now());
            }
        }
    }
    tracing::debug!("sweep timer stopped");
    SWEEP_TASK
}

async fn run_snapshot_timer(
    manager: SharedManager,
    period: Duration,
    cancel: CancellationToken,
) -> &'static str {
    let mut ticker = periodic(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                manager.lock().await.on_periodic_tick(Utc::now());
            }
        }
    }
    tracing::debug!("snapshot timer stopped");
    TICK_TASK
}

/// Interval whose first tick is one period away. The period is clamped to
/// [`MIN_TIMER_PERIOD`] and a start past the clock's range fires at once.
fn periodic(period: Duration) -> Interval {
    let period = period.max(MIN_TIMER_PERIOD);
    let start = Instant::now()
        .checked_add(period)
        .unwrap_or_else(Instant::now);
    interval_at(start, period)
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {e}");
                ctrl_c.await.ok();
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use presence_core::{OutboundMessage, Topic};
    use presence_source_ibeacon::{NdjsonSource, RawAdvertisement};
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;

    const FRAME: &str = "0201061AFF4C000215E2C56DB5DFFB48D2B060D0F5A71096E000640007C5";

    fn line(sender: &str, rssi: i32) -> String {
        let adv = RawAdvertisement {
            sender: sender.to_owned(),
            rssi,
            data: FRAME.to_owned(),
            timestamp: None,
        };
        let mut line = serde_json::to_string(&adv).expect("serialize");
        line.push('\n');
        line
    }

    fn quiet_config() -> PresenceConfig {
        PresenceConfig {
            send_update_messages: false,
            client_in_range_trigger_count: 2,
            ..PresenceConfig::default()
        }
    }

    async fn run_to_completion(
        input: String,
        config: PresenceConfig,
    ) -> (RunSummary, Vec<serde_json::Value>) {
        let (writer, mut reader) = tokio::io::duplex(64 * 1024);
        let source = NdjsonSource::new(Cursor::new(input));
        let summary = run(config, source, None, writer, std::future::pending())
            .await
            .expect("run succeeds");

        let mut text = String::new();
        reader.read_to_string(&mut text).await.expect("read output");
        let messages = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        (summary, messages)
    }

    // ── 1. End of input ──

    #[tokio::test]
    async fn arrival_emitted_then_stops_at_end_of_input() {
        let input = (0..3).map(|_| line("FFEEDDCCBBAA", -60)).collect::<String>();
        let (summary, messages) = run_to_completion(input, quiet_config()).await;

        assert_eq!(summary.audit.new_events, 1);
        assert_eq!(summary.messages_written, 1);
        assert_eq!(summary.stopped, vec!["sweep", "intake"]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["topic"], "client_in");
        assert_eq!(messages[0]["extendedData"]["beaconMac"], "AABBCCDDEEFF");
    }

    // ── 2. Malformed input ──

    #[tokio::test]
    async fn malformed_lines_are_dropped() {
        let mut input = String::from("garbage\n");
        input.push_str(r#"{"sender":"AABBCCDDEEFF","rssi":-60,"data":"0201"}"#);
        input.push('\n');
        input.push_str(&line("112233445566", -90));
        let (summary, messages) = run_to_completion(input, quiet_config()).await;

        assert_eq!(summary.audit.new_events, 1);
        assert!(messages.is_empty());
    }

    // ── 3. Shutdown signal ──

    struct Pending;

    impl AdvertisementSource for Pending {
        fn next_advertisement(&mut self) -> Result<Option<RawAdvertisement>, SourceError> {
            Err(SourceError::Unavailable("no adapter".to_owned()))
        }
    }

    #[tokio::test]
    async fn shutdown_signal_stops_loop_with_unavailable_source() {
        let (writer, _reader) = tokio::io::duplex(1024);
        let config = PresenceConfig {
            update_fps: 100,
            ..PresenceConfig::default()
        };
        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        let summary = run(config, Pending, None, writer, shutdown)
            .await
            .expect("run succeeds");
        assert_eq!(summary.messages_written, 0);
        assert_eq!(summary.audit.new_events, 0);
    }

    // ── 4. Shutdown order ──

    fn strong_sample() -> Sample {
        Sample {
            device_id: "AABBCCDDEEFF".to_owned(),
            beacon_id: "E2C56DB5DFFB48D2B060D0F5A71096E0".to_owned(),
            major: 100,
            minor: 7,
            signal_strength: -60,
            tx_power: -59,
            timestamp: Utc::now(),
        }
    }

    fn shared_manager() -> (SharedManager, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let manager = EventManager::new(quiet_config(), out_tx, None);
        (Arc::new(Mutex::new(manager)), out_rx)
    }

    #[tokio::test]
    async fn timers_stop_before_intake() {
        let (writer, _reader) = tokio::io::duplex(1024);
        let config = PresenceConfig {
            update_fps: 10,
            ..PresenceConfig::default()
        };
        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        let summary = run(config, Pending, None, writer, shutdown)
            .await
            .expect("run succeeds");
        assert_eq!(summary.stopped, vec!["sweep", "tick", "intake"]);
    }

    #[tokio::test]
    async fn queued_samples_are_processed_whole() {
        let (manager, mut out_rx) = shared_manager();
        let (tx, rx) = mpsc::channel(8);
        for _ in 0..3 {
            tx.send(strong_sample()).await.expect("queue sample");
        }
        drop(tx);

        let cancel = CancellationToken::new();
        let input_done = CancellationToken::new();
        let handle = tokio::spawn(run_intake(
            Arc::clone(&manager),
            rx,
            cancel.clone(),
            input_done.clone(),
        ));
        input_done.cancelled().await;
        cancel.cancel();
        assert_eq!(handle.await.expect("intake joins"), "intake");

        let manager = manager.lock().await;
        let record = manager.registry().lookup("AABBCCDDEEFF").expect("registered");
        assert!(record.last_arrival_sent_at().is_some());
        assert_eq!(manager.audit().new_events, 1);
        assert_eq!(out_rx.try_recv().expect("arrival").topic, Topic::ClientIn);
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_intake_leaves_queue_untouched() {
        let (manager, mut out_rx) = shared_manager();
        let (tx, rx) = mpsc::channel(8);
        for _ in 0..3 {
            tx.send(strong_sample()).await.expect("queue sample");
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let handle = tokio::spawn(run_intake(
            Arc::clone(&manager),
            rx,
            cancel,
            CancellationToken::new(),
        ));
        assert_eq!(handle.await.expect("intake joins"), "intake");

        let manager = manager.lock().await;
        assert!(manager.registry().is_empty());
        assert_eq!(manager.audit().new_events, 0);
        assert!(out_rx.try_recv().is_err());
        drop(tx);
    }

    // ── 5. Timer periods ──

    #[tokio::test]
    async fn run_rejects_config_with_unbounded_rate() {
        let (writer, _reader) = tokio::io::duplex(1024);
        let config = PresenceConfig {
            update_fps: u32::MAX,
            ..PresenceConfig::default()
        };
        let result = run(config, Pending, None, writer, std::future::pending()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn periodic_clamps_zero_period() {
        assert_eq!(periodic(Duration::ZERO).period(), MIN_TIMER_PERIOD);
        let every_second = periodic(Duration::from_secs(1));
        assert_eq!(every_second.period(), Duration::from_secs(1));
    }

    #[test]
    fn producer_forwards_decoded_samples() {
        let input = format!("{}{}", line("FFEEDDCCBBAA", -60), line("FFEEDDCCBBAA", -61));
        let (tx, mut rx) = mpsc::channel(8);
        produce_samples(
            NdjsonSource::new(Cursor::new(input)),
            &PresenceConfig::default(),
            &tx,
            &CancellationToken::new(),
        );
        drop(tx);
        let first = rx.try_recv().expect("first sample");
        assert_eq!(first.device_id, "AABBCCDDEEFF");
        assert_eq!(first.signal_strength, -60);
        assert_eq!(rx.try_recv().expect("second sample").signal_strength, -61);
        assert!(rx.try_recv().is_err());
    }
}

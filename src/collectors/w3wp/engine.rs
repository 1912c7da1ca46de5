use super::state::{AppPoolMetric, AppPoolMetrics, ProcessIdentityMap};
use crate::management::{PerformanceQueryClient, RawCounterSample};
use crate::utils::errors::MonitoringError;
use crate::utils::psutils::resolve_group_name;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A handoff that waits longer than this means aggregation is falling behind.
const SLOW_HANDOFF: Duration = Duration::from_millis(100);

pub type CounterBatch = Vec<RawCounterSample>;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Period of both the identity refresh and the counter poll.
    pub interval: Duration,
    pub executable: String,
    pub group_flag: String,
}

/// Correlates per-process performance counters with IIS application pools.
///
/// Three loops run once commenced:
/// * identity refresh: maps worker process ids to pool names from their command line
/// * counter poll: fetches counters for all processes, keeps the mapped ones and
///   hands them over through a single-slot channel
/// * aggregation: folds every handed-over batch into the per-pool metrics
///
/// `snapshot` reads the per-pool metrics without touching the loops.
///
/// # Type Parameters
/// * `C` - the performance-counter backend
pub struct W3wpEngine<C: PerformanceQueryClient> {
    client: Arc<C>,
    identities: Arc<ProcessIdentityMap>,
    metrics: Arc<AppPoolMetrics>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: PerformanceQueryClient> W3wpEngine<C> {
    pub fn new(client: C) -> Self {
        Self {
            client: Arc::new(client),
            identities: Arc::new(ProcessIdentityMap::default()),
            metrics: Arc::new(AppPoolMetrics::default()),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty() && !self.cancel.is_cancelled()
    }

    /// Spawn the three loops on the current tokio runtime.
    pub fn commence(&mut self, settings: EngineSettings) -> Result<(), MonitoringError> {
        if self.is_running() {
            warn!("w3wp engine is already running. Ignoring commence request.");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|err| {
            MonitoringError::Runtime(format!("w3wp engine needs a tokio runtime: {err}"))
        })?;

        // Tasks of an earlier run were cancelled and finish on their own.
        self.cancel = CancellationToken::new();
        self.tasks.clear();

        let (tx, rx) = mpsc::channel(1);
        self.tasks.push(runtime.spawn(refresh_identities(
            Arc::clone(&self.client),
            Arc::clone(&self.identities),
            settings.clone(),
            self.cancel.clone(),
        )));
        self.tasks.push(runtime.spawn(poll_counters(
            Arc::clone(&self.client),
            Arc::clone(&self.identities),
            settings.interval,
            tx,
            self.cancel.clone(),
        )));
        self.tasks.push(runtime.spawn(aggregate(
            Arc::clone(&self.identities),
            Arc::clone(&self.metrics),
            rx,
            self.cancel.clone(),
        )));

        info!(
            "w3wp engine started: polling {} every {}",
            settings.executable,
            humantime::format_duration(settings.interval)
        );
        Ok(())
    }

    /// Signal every loop to stop at its next await point.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the loops to exit after `shutdown`.
    pub async fn join(&mut self) {
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                error!("w3wp engine task failed: {err}");
            }
        }
    }

    pub fn snapshot(&self) -> Vec<(String, AppPoolMetric)> {
        self.metrics.snapshot()
    }

    pub fn identities(&self) -> &ProcessIdentityMap {
        &self.identities
    }
}

impl<C: PerformanceQueryClient> Drop for W3wpEngine<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub(crate) async fn refresh_identities<C: PerformanceQueryClient>(
    client: Arc<C>,
    identities: Arc<ProcessIdentityMap>,
    settings: EngineSettings,
    cancel: CancellationToken,
) {
    let mut ticker = ticker(settings.interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.list_processes(&settings.executable) => result,
        };
        match result {
            Ok(processes) => {
                let mut mapped = 0;
                for process in processes {
                    let app_pool = resolve_group_name(&process.command_line, &settings.group_flag);
                    if let Some(app_pool) = app_pool {
                        identities.upsert(process.process_id, app_pool);
                        mapped += 1;
                    }
                }
                debug!(
                    "Mapped {} {} processes, {} known in total",
                    mapped,
                    settings.executable,
                    identities.len()
                );
            }
            Err(err) => error!("Error querying {} processes: {}", settings.executable, err),
        }
    }
    info!("Identity refresh loop stopped");
}

pub(crate) async fn poll_counters<C: PerformanceQueryClient>(
    client: Arc<C>,
    identities: Arc<ProcessIdentityMap>,
    interval: Duration,
    tx: mpsc::Sender<CounterBatch>,
    cancel: CancellationToken,
) {
    let mut ticker = ticker(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.query_counters() => result,
        };
        let samples = match result {
            Ok(samples) => samples,
            Err(err) => {
                error!("Error querying process counters: {}", err);
                continue;
            }
        };
        let batch = identities.retain_known(samples);

        // Single-slot channel: waits here until the previous batch is taken.
        let send_start = Instant::now();
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(batch) => {
                if sent.is_err() {
                    warn!("Aggregation loop is gone, stopping counter poll");
                    break;
                }
                let waited = send_start.elapsed();
                if waited > SLOW_HANDOFF {
                    warn!("Counter handoff blocked for {:?} - aggregation may be slow!", waited);
                }
            }
        }
    }
    info!("Counter poll loop stopped");
}

pub(crate) async fn aggregate(
    identities: Arc<ProcessIdentityMap>,
    metrics: Arc<AppPoolMetrics>,
    mut rx: mpsc::Receiver<CounterBatch>,
    cancel: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            batch = rx.recv() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };
        let applied = fold_batch(&identities, &metrics, batch);
        debug!("Folded {} samples into {} application pools", applied, metrics.len());
    }
    info!("Aggregation loop stopped");
}

/// Overwrite each sample's pool with its counters, in batch order. Samples of
/// unmapped processes are dropped. Returns how many samples were applied.
pub(crate) fn fold_batch(
    identities: &ProcessIdentityMap,
    metrics: &AppPoolMetrics,
    batch: CounterBatch,
) -> usize {
    let mut applied = 0;
    for sample in &batch {
        let Some(app_pool) = identities.resolve(sample.process_id) else {
            continue;
        };
        metrics.apply(app_pool, AppPoolMetric::from(sample));
        applied += 1;
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::ProcessInfo;
    use crate::management::fake::FakePerfClient;
    use crate::utils::errors::InterfaceError;

    const INTERVAL: Duration = Duration::from_secs(10);

    fn settings() -> EngineSettings {
        EngineSettings {
            interval: INTERVAL,
            executable: "w3wp.exe".to_string(),
            group_flag: "-ap".to_string(),
        }
    }

    fn worker(process_id: u32, command_line: &str) -> ProcessInfo {
        ProcessInfo {
            process_id,
            name: "w3wp.exe".to_string(),
            command_line: command_line.to_string(),
        }
    }

    fn sample(process_id: u32, working_set: u64) -> RawCounterSample {
        RawCounterSample {
            process_id,
            name: "w3wp".to_string(),
            percent_processor_time: 50,
            private_bytes: 1000,
            working_set,
            handle_count: 10,
            thread_count: 20,
            io_read_bytes_per_sec: 3000,
            io_write_bytes_per_sec: 4000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_correlates_counters_with_pools() {
        let client = FakePerfClient::new(
            vec![
                worker(1, r#"c:\windows\system32\inetsrv\w3wp.exe -ap "Pool1" -v "v4.0""#),
                worker(3, r#"c:\windows\system32\inetsrv\w3wp.exe -v "v4.0""#),
            ],
            vec![sample(1, 2000), sample(2, 9999), sample(3, 7777)],
        );
        let mut engine = W3wpEngine::new(client.clone());
        engine.commence(settings()).unwrap();
        assert!(engine.is_running());

        tokio::time::sleep(INTERVAL * 2 + Duration::from_secs(5)).await;

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.len(), 1);
        let (app_pool, metric) = &snapshot[0];
        assert_eq!(app_pool, "Pool1");
        assert_eq!(metric.percent_processor_time, 50.0);
        assert_eq!(metric.working_set, 2000);
        assert!(!engine.identities().contains(3));

        engine.shutdown();
        engine.join().await;
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_survive_query_failures() {
        let client = FakePerfClient::new(
            vec![worker(1, r#"w3wp.exe -ap "Pool1""#)],
            vec![sample(1, 2000)],
        );
        client.fail_processes(Some(InterfaceError::Failed("RPC server unavailable".to_string())));
        client.fail_counters(Some(InterfaceError::Failed("RPC server unavailable".to_string())));

        let mut engine = W3wpEngine::new(client.clone());
        engine.commence(settings()).unwrap();
        tokio::time::sleep(INTERVAL * 3 + Duration::from_secs(5)).await;

        assert!(engine.snapshot().is_empty());
        assert_eq!(client.process_queries(), 4);
        assert_eq!(client.counter_queries(), 4);

        client.fail_processes(None);
        client.fail_counters(None);
        tokio::time::sleep(INTERVAL * 2).await;

        assert_eq!(engine.snapshot().len(), 1);
        engine.shutdown();
        engine.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_polling() {
        let client = FakePerfClient::default();
        let mut engine = W3wpEngine::new(client.clone());
        engine.commence(settings()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        engine.shutdown();
        engine.join().await;
        let queries = client.counter_queries();
        tokio::time::sleep(INTERVAL * 5).await;
        assert_eq!(client.counter_queries(), queries);
    }

    #[test]
    fn test_commence_outside_runtime_fails() {
        let mut engine = W3wpEngine::new(FakePerfClient::default());
        assert!(matches!(
            engine.commence(settings()),
            Err(MonitoringError::Runtime(_))
        ));
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handoff_blocks_when_aggregation_lags() {
        let client = Arc::new(FakePerfClient::new(vec![], vec![sample(1, 2000)]));
        let identities = Arc::new(ProcessIdentityMap::default());
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_counters(
            Arc::clone(&client),
            identities,
            INTERVAL,
            tx,
            cancel.clone(),
        ));

        // First batch sits in the slot, the second poll waits on the send.
        tokio::time::sleep(INTERVAL * 3 + Duration::from_secs(5)).await;
        assert_eq!(client.counter_queries(), 2);

        assert!(rx.recv().await.is_some());
        tokio::time::sleep(INTERVAL * 3 + Duration::from_secs(5)).await;
        assert_eq!(client.counter_queries(), 3);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_aggregation_stops_when_channel_closes() {
        let identities = Arc::new(ProcessIdentityMap::default());
        identities.upsert(1, "Pool1".to_string());
        let metrics = Arc::new(AppPoolMetrics::default());
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(aggregate(
            Arc::clone(&identities),
            Arc::clone(&metrics),
            rx,
            CancellationToken::new(),
        ));

        tx.send(vec![sample(1, 2000)]).await.unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(metrics.snapshot()[0].1.working_set, 2000);
    }

    #[test]
    fn test_fold_batch_last_write_wins_and_drops_unknown() {
        let identities = ProcessIdentityMap::default();
        identities.upsert(1, "Shared".to_string());
        identities.upsert(2, "Shared".to_string());
        let metrics = AppPoolMetrics::default();

        let batch = vec![sample(1, 100), sample(2, 200), sample(9, 900)];
        let applied = fold_batch(&identities, &metrics, batch);

        assert_eq!(applied, 2);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, "Shared");
        assert_eq!(snapshot[0].1.working_set, 200);
    }
}

//! Performance session engine
//!
//! Orchestrates the per-metric collectors into discrete sampling
//! sessions. Each session runs one repeating task, keeps a bounded ring
//! of samples, and publishes `(session_id, sample)` pairs on a lossy
//! broadcast stream.

pub mod collectors;
pub mod types;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use droidd_proto::{error, AgentError};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info};

use crate::shell::ShellExecutor;

use collectors::{BatteryCollector, CpuCollector, FpsCollector, MemoryCollector, NetworkCollector};
use types::{MetricKind, PerfSample, PerfSummary};

/// Samples retained per session; older samples are discarded FIFO
const RING_CAPACITY: usize = 1000;
/// Sample broadcast buffer; slow consumers miss samples, never block
const STREAM_CAPACITY: usize = 64;
/// Default sampling interval
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// One collector of each kind, with private delta state.
/// Every session owns a fresh set so first-read-zero holds per session.
struct CollectorSet {
    cpu: CpuCollector,
    memory: MemoryCollector,
    fps: FpsCollector,
    network: NetworkCollector,
    battery: BatteryCollector,
}

impl CollectorSet {
    fn new(shell: Arc<ShellExecutor>) -> Self {
        CollectorSet {
            cpu: CpuCollector::new(shell.clone()),
            memory: MemoryCollector::new(shell.clone()),
            fps: FpsCollector::new(shell.clone()),
            network: NetworkCollector::new(),
            battery: BatteryCollector::new(shell),
        }
    }

    /// Collect the requested metric families in parallel into one sample
    async fn collect(&self, package: Option<&str>, metrics: &[MetricKind]) -> PerfSample {
        let want = |kind: MetricKind| metrics.contains(&kind);

        let (cpu, memory, fps, network, battery) = tokio::join!(
            async {
                if want(MetricKind::Cpu) {
                    self.cpu.collect(package).await
                } else {
                    None
                }
            },
            async {
                if want(MetricKind::Memory) {
                    self.memory.collect(package).await
                } else {
                    None
                }
            },
            async {
                if want(MetricKind::Fps) {
                    self.fps.collect(package).await
                } else {
                    None
                }
            },
            async {
                if want(MetricKind::Network) {
                    self.network.collect().await
                } else {
                    None
                }
            },
            async {
                if want(MetricKind::Battery) {
                    self.battery.collect().await
                } else {
                    None
                }
            },
        );

        PerfSample {
            timestamp: droidd_proto::now_ms(),
            cpu,
            memory,
            fps,
            network,
            battery,
        }
    }
}

struct SessionHandle {
    id: String,
    package: Option<String>,
    metrics: Vec<MetricKind>,
    interval_ms: u64,
    started_at: i64,
    samples: Mutex<VecDeque<PerfSample>>,
    stop_tx: broadcast::Sender<()>,
}

/// Report returned by `stop`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: String,
    pub duration_ms: i64,
    pub sample_count: usize,
    pub summary: PerfSummary,
    pub data_points: Vec<PerfSample>,
}

/// The performance session engine
pub struct PerfEngine {
    shell: Arc<ShellExecutor>,
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    sample_tx: broadcast::Sender<(String, PerfSample)>,
}

impl PerfEngine {
    pub fn new(shell: Arc<ShellExecutor>) -> Arc<Self> {
        let (sample_tx, _) = broadcast::channel(STREAM_CAPACITY);
        Arc::new(PerfEngine {
            shell,
            sessions: RwLock::new(HashMap::new()),
            sample_tx,
        })
    }

    /// Subscribe to the live `(session_id, sample)` stream
    pub fn subscribe(&self) -> broadcast::Receiver<(String, PerfSample)> {
        self.sample_tx.subscribe()
    }

    pub async fn session_exists(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Start a sampling session. One active session per target package
    /// (or per the untargeted whole-device scope).
    pub async fn start(
        self: &Arc<Self>,
        package: Option<String>,
        metrics: Vec<MetricKind>,
        interval_ms: u64,
    ) -> Result<String, AgentError> {
        if metrics.is_empty() {
            return Err(AgentError::invalid_params("metrics must be non-empty"));
        }
        let interval_ms = if interval_ms == 0 {
            DEFAULT_INTERVAL_MS
        } else {
            interval_ms
        };

        let mut sessions = self.sessions.write().await;
        let duplicate = sessions.values().any(|s| s.package == package);
        if duplicate {
            return Err(AgentError::new(
                error::PERF_SESSION_RUNNING,
                format!(
                    "Perf session already running for {}",
                    package.as_deref().unwrap_or("device")
                ),
            ));
        }

        let (stop_tx, _) = broadcast::channel(1);
        let handle = Arc::new(SessionHandle {
            id: uuid::Uuid::new_v4().simple().to_string(),
            package,
            metrics,
            interval_ms,
            started_at: droidd_proto::now_ms(),
            samples: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            stop_tx,
        });
        sessions.insert(handle.id.clone(), handle.clone());
        drop(sessions);

        info!(
            session_id = %handle.id,
            package = handle.package.as_deref().unwrap_or("-"),
            interval_ms = handle.interval_ms,
            "Perf session started"
        );

        let engine = self.clone();
        let session = handle.clone();
        tokio::spawn(async move {
            engine.run_session(session).await;
        });

        Ok(handle.id.clone())
    }

    async fn run_session(self: Arc<Self>, session: Arc<SessionHandle>) {
        let collectors = CollectorSet::new(self.shell.clone());
        let mut ticker = tokio::time::interval(Duration::from_millis(session.interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stop_rx = session.stop_tx.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sample = collectors
                        .collect(session.package.as_deref(), &session.metrics)
                        .await;

                    {
                        let mut samples = session.samples.lock().await;
                        if samples.len() >= RING_CAPACITY {
                            samples.pop_front();
                        }
                        samples.push_back(sample.clone());
                    }

                    // Non-blocking publish; laggards miss samples
                    let _ = self.sample_tx.send((session.id.clone(), sample));
                }
                _ = stop_rx.recv() => {
                    debug!(session_id = %session.id, "Perf session task stopping");
                    break;
                }
            }
        }
    }

    /// Stop a session and return its summary plus the retained samples
    pub async fn stop(&self, session_id: &str) -> Result<SessionReport, AgentError> {
        let handle = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| {
                AgentError::new(
                    error::PERF_SESSION_NOT_FOUND,
                    format!("Perf session not found: {}", session_id),
                )
            })?;

        let _ = handle.stop_tx.send(());

        let samples: Vec<PerfSample> = handle.samples.lock().await.iter().cloned().collect();
        let summary = PerfSummary::from_samples(samples.iter());
        let report = SessionReport {
            session_id: handle.id.clone(),
            duration_ms: droidd_proto::now_ms() - handle.started_at,
            sample_count: samples.len(),
            summary,
            data_points: samples,
        };
        info!(
            session_id = %handle.id,
            samples = report.sample_count,
            "Perf session stopped"
        );
        Ok(report)
    }

    /// One-off sample with the same collection logic as a session tick.
    /// With a session id, reuses that session's target and metric set.
    pub async fn snapshot(
        &self,
        session_id: Option<&str>,
        package: Option<String>,
        metrics: Vec<MetricKind>,
    ) -> Result<PerfSample, AgentError> {
        let (package, metrics) = match session_id {
            Some(id) => {
                let sessions = self.sessions.read().await;
                let handle = sessions.get(id).ok_or_else(|| {
                    AgentError::new(
                        error::PERF_SESSION_NOT_FOUND,
                        format!("Perf session not found: {}", id),
                    )
                })?;
                (handle.package.clone(), handle.metrics.clone())
            }
            None => {
                if metrics.is_empty() {
                    return Err(AgentError::invalid_params("metrics must be non-empty"));
                }
                (package, metrics)
            }
        };

        let collectors = CollectorSet::new(self.shell.clone());
        Ok(collectors.collect(package.as_deref(), &metrics).await)
    }

    /// Stop every session (engine teardown)
    pub async fn stop_all(&self) {
        let handles: Vec<Arc<SessionHandle>> =
            self.sessions.write().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            let _ = handle.stop_tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Arc<PerfEngine> {
        PerfEngine::new(Arc::new(ShellExecutor::new(false)))
    }

    #[tokio::test]
    async fn test_start_requires_metrics() {
        let engine = engine();
        let err = engine.start(None, vec![], 1000).await.unwrap_err();
        assert_eq!(err.code, error::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn test_duplicate_target_rejected() {
        let engine = engine();
        let id = engine
            .start(Some("com.x".into()), vec![MetricKind::Network], 60_000)
            .await
            .unwrap();
        let err = engine
            .start(Some("com.x".into()), vec![MetricKind::Cpu], 60_000)
            .await
            .unwrap_err();
        assert_eq!(err.code, error::PERF_SESSION_RUNNING);
        // A different target is fine
        let other = engine
            .start(Some("com.y".into()), vec![MetricKind::Cpu], 60_000)
            .await
            .unwrap();
        assert_ne!(id, other);
        engine.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_unknown_session() {
        let engine = engine();
        let err = engine.stop("nope").await.unwrap_err();
        assert_eq!(err.code, error::PERF_SESSION_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_collects_and_streams() {
        let engine = engine();
        let mut stream = engine.subscribe();
        let id = engine
            .start(None, vec![MetricKind::Network], 20)
            .await
            .unwrap();

        // The interval fires immediately, then every 20ms
        let (stream_id, sample) =
            tokio::time::timeout(Duration::from_secs(2), stream.recv())
                .await
                .expect("stream timed out")
                .unwrap();
        assert_eq!(stream_id, id);
        assert!(sample.network.is_some());
        assert!(sample.cpu.is_none());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let report = engine.stop(&id).await.unwrap();
        assert_eq!(report.session_id, id);
        assert!(report.sample_count >= 2);
        assert_eq!(report.data_points.len(), report.sample_count);
        assert!(report.duration_ms >= 0);
    }

    #[tokio::test]
    async fn test_snapshot_exact_subset() {
        let engine = engine();
        let sample = engine
            .snapshot(None, None, vec![MetricKind::Cpu, MetricKind::Memory])
            .await
            .unwrap();
        // cpu/memory read from /proc on any linux host
        assert!(sample.cpu.is_some());
        assert!(sample.memory.is_some());
        assert!(sample.fps.is_none());
        assert!(sample.network.is_none());
        assert!(sample.battery.is_none());
        assert!(sample.timestamp > 0);
    }

    #[tokio::test]
    async fn test_snapshot_by_session_id() {
        let engine = engine();
        let id = engine
            .start(None, vec![MetricKind::Network], 60_000)
            .await
            .unwrap();
        let sample = engine.snapshot(Some(&id), None, vec![]).await.unwrap();
        assert!(sample.network.is_some());
        assert!(sample.cpu.is_none());

        let err = engine.snapshot(Some("gone"), None, vec![]).await.unwrap_err();
        assert_eq!(err.code, error::PERF_SESSION_NOT_FOUND);
        engine.stop_all().await;
    }

    #[tokio::test]
    async fn test_first_cpu_read_is_zero() {
        let engine = engine();
        let sample = engine
            .snapshot(None, None, vec![MetricKind::Cpu])
            .await
            .unwrap();
        let cpu = sample.cpu.unwrap();
        assert_eq!(cpu.app, 0.0);
        assert_eq!(cpu.system, 0.0);
    }
}

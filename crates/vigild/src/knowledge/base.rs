//! The knowledge base handle shared by the server, the timer and the CLI.
//!
//! Publication goes through a `watch` channel holding `Option<Arc<Snapshot>>`.
//! Readers clone the `Arc` and drop the borrow at once, so a query never
//! waits on a build; a build only touches the channel for the final swap.
//!
//! At most one build runs at a time. A trigger while a build is in flight
//! joins it and receives the same outcome.

use super::builder::build_snapshot;
use super::{BuildOutcome, CollectionError};
use crate::config::{CollectionConfig, Config};
use crate::source::DataSource;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use vigil_common::{
    execute, HealthConfig, KnowledgeStatus, QueryError, QueryResponse, Snapshot, StructuredQuery,
};

#[derive(Default)]
struct History {
    last_error: Option<String>,
    last_duration_ms: Option<u64>,
}

type InFlight = watch::Receiver<Option<BuildOutcome>>;

struct Inner {
    source: Arc<dyn DataSource>,
    collection: CollectionConfig,
    health: HealthConfig,
    current: watch::Sender<Option<Arc<Snapshot>>>,
    /// Occupied exactly while a build runs
    in_flight: Mutex<Option<InFlight>>,
    history: Mutex<History>,
}

/// Cheap to clone; all clones share one snapshot and one in-flight slot
#[derive(Clone)]
pub struct KnowledgeBase {
    inner: Arc<Inner>,
}

/// Completion handle for a triggered build
pub struct RefreshHandle {
    rx: InFlight,
    joined: bool,
}

impl RefreshHandle {
    /// True when this trigger joined a build that was already running
    pub fn joined(&self) -> bool {
        self.joined
    }

    /// Wait for the build to finish
    pub async fn wait(mut self) -> BuildOutcome {
        let outcome = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map(|slot| slot.clone());
        match outcome {
            Ok(Some(outcome)) => outcome,
            _ => Err(CollectionError::Aborted {
                message: "build task dropped before reporting".to_string(),
            }),
        }
    }
}

impl KnowledgeBase {
    pub fn new(source: Arc<dyn DataSource>, collection: CollectionConfig, health: HealthConfig) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                source,
                collection,
                health,
                current,
                in_flight: Mutex::new(None),
                history: Mutex::new(History::default()),
            }),
        }
    }

    pub fn from_config(config: &Config, source: Arc<dyn DataSource>) -> Self {
        Self::new(source, config.collection.clone(), config.health.clone())
    }

    /// Latest published snapshot; None before the first successful build
    pub fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.current.borrow().clone()
    }

    /// Observe every publication
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.inner.current.subscribe()
    }

    /// Start a build, or join the one already running
    pub fn trigger_refresh(&self) -> RefreshHandle {
        let mut slot = lock(&self.inner.in_flight);
        if let Some(rx) = slot.as_ref() {
            debug!("  [KB] Refresh joined in-flight build");
            return RefreshHandle {
                rx: rx.clone(),
                joined: true,
            };
        }

        let (tx, rx) = watch::channel(None);
        *slot = Some(rx.clone());
        drop(slot);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let worker = Arc::clone(&inner);
            let outcome = match tokio::spawn(async move { worker.run_build().await }).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("[KB] Build task failed: {}", e);
                    let err = CollectionError::Aborted {
                        message: e.to_string(),
                    };
                    inner.record_failure(&err);
                    Err(err)
                }
            };

            *lock(&inner.in_flight) = None;
            tx.send_replace(Some(outcome));
        });

        RefreshHandle { rx, joined: false }
    }

    /// Build now and wait for the outcome
    pub async fn refresh(&self) -> BuildOutcome {
        self.trigger_refresh().wait().await
    }

    pub fn status(&self) -> KnowledgeStatus {
        let snapshot = self.current_snapshot();
        let building = lock(&self.inner.in_flight).is_some();
        let history = lock(&self.inner.history);
        KnowledgeStatus {
            building,
            ready: snapshot.is_some(),
            generation: snapshot.as_ref().map(|s| s.generation()).unwrap_or(0),
            last_build_time: snapshot.as_ref().map(|s| s.built_at()),
            last_build_duration_ms: history.last_duration_ms,
            service_count: snapshot.as_ref().map(|s| s.service_count()).unwrap_or(0),
            last_error: history.last_error.clone(),
            source: self.inner.source.name().to_string(),
        }
    }

    /// Execute against the snapshot current at call time
    pub fn query(&self, query: &StructuredQuery) -> Result<QueryResponse, QueryError> {
        let snapshot = self.current_snapshot().ok_or(QueryError::NotReady)?;
        let result = execute(query, &snapshot)?;
        Ok(QueryResponse {
            generation: snapshot.generation(),
            built_at: snapshot.built_at(),
            result,
        })
    }

    /// Rebuild on a fixed interval for the life of the process.
    ///
    /// The first tick fires at once, so this also performs the startup build.
    pub fn spawn_refresh_loop(&self) -> JoinHandle<()> {
        let kb = self.clone();
        // interval() panics on a zero period
        let period = self.inner.collection.refresh_interval().max(Duration::from_secs(1));

        info!("Refresh loop started (interval: {}s)", period.as_secs());
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match kb.refresh().await {
                    Ok(report) => debug!("Timed refresh published generation {}", report.generation),
                    Err(e) => warn!("Timed refresh failed, keeping previous snapshot: {}", e),
                }
            }
        })
    }
}

impl Inner {
    async fn run_build(&self) -> BuildOutcome {
        let previous = self.current.borrow().clone();
        info!("[KB] Building snapshot from {}", self.source.name());

        match build_snapshot(&self.source, &self.collection, &self.health, previous.as_deref()).await {
            Ok((snapshot, report)) => {
                self.current.send_replace(Some(Arc::new(snapshot)));
                {
                    let mut history = lock(&self.history);
                    history.last_error = None;
                    history.last_duration_ms = Some(report.elapsed_ms);
                }
                info!(
                    "[KB] Published generation {}: {} services, {} problems, {} degraded ({}ms)",
                    report.generation,
                    report.service_count,
                    report.problem_count,
                    report.partial_failures.len(),
                    report.elapsed_ms
                );
                Ok(report)
            }
            Err(e) => {
                error!("[KB] Build aborted, previous snapshot kept: {}", e);
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    fn record_failure(&self, e: &CollectionError) {
        lock(&self.history).last_error = Some(e.to_string());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

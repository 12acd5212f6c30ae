//! Scripted in-memory source for deterministic testing.
//!
//! Every behaviour can be changed between builds through `&self`, so a test
//! can hold an `Arc<FakeSource>` next to the knowledge base that owns it.
//!
//! ```rust,ignore
//! let fake = Arc::new(
//!     FakeSource::new()
//!         .with_service("SERVICE-A", "orders", (450.0, 120.0, 8.3, 900.0))
//!         .with_service("SERVICE-B", "ledger", (2.0, 80.0, 0.1, 300.0)),
//! );
//! fake.fail_metrics("SERVICE-B");
//! ```

use super::{DataSource, SourceError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use vigil_common::{MetricSet, ProblemRecord, ServiceIdentity};

/// Raw values for one service: errors, response time ms, failure rate %, rpm
pub type FakeMetrics = (f64, f64, f64, f64);

#[derive(Default)]
struct Script {
    services: Vec<ServiceIdentity>,
    metrics: HashMap<String, FakeMetrics>,
    problems: Vec<ProblemRecord>,
    failing_metrics: HashSet<String>,
    stalled_metrics: HashSet<String>,
    fail_services: bool,
    fail_problems: bool,
    latency: Duration,
}

/// Fake source with call counters for assertions
pub struct FakeSource {
    script: Mutex<Script>,
    /// `false` while listing is held
    gate: watch::Sender<bool>,
    list_services_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    list_problems_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            gate: watch::Sender::new(true),
            list_services_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            list_problems_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Add a service with metrics
    pub fn with_service(self, id: &str, name: &str, metrics: FakeMetrics) -> Self {
        self.add_service(id, name, metrics);
        self
    }

    pub fn with_problem(self, problem: ProblemRecord) -> Self {
        self.script().problems.push(problem);
        self
    }

    // ========================================================================
    // Script changes between builds
    // ========================================================================

    pub fn add_service(&self, id: &str, name: &str, metrics: FakeMetrics) {
        let mut script = self.script();
        script.services.retain(|s| s.id != id);
        script.services.push(ServiceIdentity::new(id, name));
        script.metrics.insert(id.to_string(), metrics);
    }

    pub fn remove_service(&self, id: &str) {
        let mut script = self.script();
        script.services.retain(|s| s.id != id);
        script.metrics.remove(id);
    }

    pub fn set_metrics(&self, id: &str, metrics: FakeMetrics) {
        self.script().metrics.insert(id.to_string(), metrics);
    }

    pub fn set_problems(&self, problems: Vec<ProblemRecord>) {
        self.script().problems = problems;
    }

    /// Metric fetches for `id` fail until [`FakeSource::recover_metrics`]
    pub fn fail_metrics(&self, id: &str) {
        self.script().failing_metrics.insert(id.to_string());
    }

    pub fn recover_metrics(&self, id: &str) {
        let mut script = self.script();
        script.failing_metrics.remove(id);
        script.stalled_metrics.remove(id);
    }

    /// Metric fetches for `id` never complete
    pub fn stall_metrics(&self, id: &str) {
        self.script().stalled_metrics.insert(id.to_string());
    }

    pub fn fail_services(&self, fail: bool) {
        self.script().fail_services = fail;
    }

    pub fn fail_problems(&self, fail: bool) {
        self.script().fail_problems = fail;
    }

    /// Delay added to every call
    pub fn set_latency(&self, latency: Duration) {
        self.script().latency = latency;
    }

    /// Hold every `list_services` call until [`FakeSource::release`]
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Let held and future `list_services` calls through
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    // ========================================================================
    // Counters
    // ========================================================================

    pub fn list_services_calls(&self) -> usize {
        self.list_services_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn list_problems_calls(&self) -> usize {
        self.list_problems_calls.load(Ordering::SeqCst)
    }

    /// Highest number of metric fetches observed running at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        // A panicking test thread must not poison every later call
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn latency(&self) -> Duration {
        self.script().latency
    }

    async fn pause(&self) {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for FakeSource {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataSource for FakeSource {
    async fn list_services(&self) -> Result<Vec<ServiceIdentity>, SourceError> {
        self.list_services_calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = gate.wait_for(|open| *open).await;
        self.pause().await;

        let script = self.script();
        if script.fail_services {
            return Err(SourceError::Status {
                status: 503,
                body: "service list unavailable".to_string(),
            });
        }
        Ok(script.services.clone())
    }

    async fn fetch_metrics(
        &self,
        service_id: &str,
        window: &str,
    ) -> Result<MetricSet, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        self.pause().await;

        let stalled = self.script().stalled_metrics.contains(service_id);
        if stalled {
            std::future::pending::<()>().await;
        }

        let script = self.script();
        if script.failing_metrics.contains(service_id) {
            return Err(SourceError::Http(format!("connection reset fetching {}", service_id)));
        }
        let (errors, response_ms, failure_rate, rpm) = script
            .metrics
            .get(service_id)
            .copied()
            .ok_or_else(|| SourceError::Unavailable(format!("no metrics for {}", service_id)))?;
        Ok(MetricSet::from_values(window, errors, response_ms, failure_rate, rpm))
    }

    async fn list_problems(&self) -> Result<Vec<ProblemRecord>, SourceError> {
        self.list_problems_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let script = self.script();
        if script.fail_problems {
            return Err(SourceError::Timeout(Duration::from_secs(30)));
        }
        Ok(script.problems.clone())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

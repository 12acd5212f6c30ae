//! Health scoring and status classification.
//!
//! Score starts at 100 and loses a penalty per abnormal signal:
//! - failure rate above threshold: `weight * (rate - threshold)` points
//! - response time above baseline: `weight * (time / baseline - 1)` points
//! - error count above threshold: `weight * log10(count / threshold)` points
//! - each open problem: severity penalty scaled by its relevance to the service
//!
//! Each metric penalty is capped; the final score is clamped to [0, 100] and
//! rounded to one decimal. Status is a pure function of the score with the
//! configured cutoffs. Every weight, cap and cutoff below is configuration,
//! the defaults are starting points rather than calibrated values.

use crate::model::{MetricSet, ProblemRef, Relevance};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Three-bucket classification plus the "data unavailable" sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    /// No metrics were ever collected for this service
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "healthy" | "ok" => Ok(HealthStatus::Healthy),
            "warning" => Ok(HealthStatus::Warning),
            "critical" => Ok(HealthStatus::Critical),
            "unknown" | "unavailable" => Ok(HealthStatus::Unknown),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// Health score weights and status cutoffs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Scores below this are critical
    #[serde(default = "default_critical_below")]
    pub critical_below: f64,

    /// Scores below this (and not critical) are warning
    #[serde(default = "default_warning_below")]
    pub warning_below: f64,

    /// Failure rate (percent) above which the service is penalized
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,

    /// Points per percentage point above the threshold
    #[serde(default = "default_failure_rate_weight")]
    pub failure_rate_weight: f64,

    #[serde(default = "default_failure_rate_max_penalty")]
    pub failure_rate_max_penalty: f64,

    /// Response time (ms) considered normal
    #[serde(default = "default_response_time_baseline_ms")]
    pub response_time_baseline_ms: f64,

    /// Points per baseline multiple above the baseline
    #[serde(default = "default_response_time_weight")]
    pub response_time_weight: f64,

    #[serde(default = "default_response_time_max_penalty")]
    pub response_time_max_penalty: f64,

    /// Error count above which the service is penalized
    #[serde(default = "default_error_count_threshold")]
    pub error_count_threshold: f64,

    /// Points per decade above the threshold
    #[serde(default = "default_error_count_weight")]
    pub error_count_weight: f64,

    #[serde(default = "default_error_count_max_penalty")]
    pub error_count_max_penalty: f64,

    /// Penalty per open problem with a critical severity (ERROR, CUSTOM_ALERT)
    #[serde(default = "default_critical_problem_penalty")]
    pub critical_problem_penalty: f64,

    /// Penalty per open problem of any other severity
    #[serde(default = "default_problem_penalty")]
    pub problem_penalty: f64,

    #[serde(default = "default_root_cause_factor")]
    pub root_cause_factor: f64,

    #[serde(default = "default_impacted_factor")]
    pub impacted_factor: f64,

    #[serde(default = "default_related_factor")]
    pub related_factor: f64,
}

fn default_critical_below() -> f64 {
    50.0
}

fn default_warning_below() -> f64 {
    80.0
}

fn default_failure_rate_threshold() -> f64 {
    1.0
}

fn default_failure_rate_weight() -> f64 {
    5.0
}

fn default_failure_rate_max_penalty() -> f64 {
    40.0
}

fn default_response_time_baseline_ms() -> f64 {
    500.0
}

fn default_response_time_weight() -> f64 {
    20.0
}

fn default_response_time_max_penalty() -> f64 {
    30.0
}

fn default_error_count_threshold() -> f64 {
    10.0
}

fn default_error_count_weight() -> f64 {
    10.0
}

fn default_error_count_max_penalty() -> f64 {
    40.0
}

fn default_critical_problem_penalty() -> f64 {
    15.0
}

fn default_problem_penalty() -> f64 {
    8.0
}

fn default_root_cause_factor() -> f64 {
    1.5
}

fn default_impacted_factor() -> f64 {
    1.0
}

fn default_related_factor() -> f64 {
    0.5
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            critical_below: default_critical_below(),
            warning_below: default_warning_below(),
            failure_rate_threshold: default_failure_rate_threshold(),
            failure_rate_weight: default_failure_rate_weight(),
            failure_rate_max_penalty: default_failure_rate_max_penalty(),
            response_time_baseline_ms: default_response_time_baseline_ms(),
            response_time_weight: default_response_time_weight(),
            response_time_max_penalty: default_response_time_max_penalty(),
            error_count_threshold: default_error_count_threshold(),
            error_count_weight: default_error_count_weight(),
            error_count_max_penalty: default_error_count_max_penalty(),
            critical_problem_penalty: default_critical_problem_penalty(),
            problem_penalty: default_problem_penalty(),
            root_cause_factor: default_root_cause_factor(),
            impacted_factor: default_impacted_factor(),
            related_factor: default_related_factor(),
        }
    }
}

impl HealthConfig {
    /// Check cutoffs and weights are usable
    pub fn validate(&self) -> Result<(), String> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(self.critical_below) || !in_range(self.warning_below) {
            return Err("health cutoffs must be within 0-100".to_string());
        }
        if self.critical_below >= self.warning_below {
            return Err(format!(
                "critical_below ({}) must be lower than warning_below ({})",
                self.critical_below, self.warning_below
            ));
        }
        if self.response_time_baseline_ms <= 0.0 || self.error_count_threshold <= 0.0 {
            return Err("response time baseline and error threshold must be positive".to_string());
        }
        let weights = [
            self.failure_rate_weight,
            self.failure_rate_max_penalty,
            self.response_time_weight,
            self.response_time_max_penalty,
            self.error_count_weight,
            self.error_count_max_penalty,
            self.critical_problem_penalty,
            self.problem_penalty,
            self.root_cause_factor,
            self.impacted_factor,
            self.related_factor,
        ];
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err("health weights must be finite and non-negative".to_string());
        }
        Ok(())
    }

    /// Map a score to its status bucket
    pub fn classify(&self, score: f64) -> HealthStatus {
        if score < self.critical_below {
            HealthStatus::Critical
        } else if score < self.warning_below {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }

    /// Score a service; None when no metrics are available
    pub fn score(&self, metrics: Option<&MetricSet>, problems: &[ProblemRef]) -> Option<f64> {
        let metrics = metrics?;

        let mut score = 100.0;
        score -= self.failure_rate_penalty(metrics.failure_rate.value);
        score -= self.response_time_penalty(metrics.response_time.value);
        score -= self.error_count_penalty(metrics.error_count.value);
        score -= problems
            .iter()
            .filter(|p| p.is_open())
            .map(|p| self.problem_penalty(p))
            .sum::<f64>();

        let clamped = score.clamp(0.0, 100.0);
        Some((clamped * 10.0).round() / 10.0)
    }

    /// Score and classify in one step
    pub fn assess(
        &self,
        metrics: Option<&MetricSet>,
        problems: &[ProblemRef],
    ) -> (Option<f64>, HealthStatus) {
        match self.score(metrics, problems) {
            Some(score) => (Some(score), self.classify(score)),
            None => (None, HealthStatus::Unknown),
        }
    }

    fn failure_rate_penalty(&self, rate: f64) -> f64 {
        if rate.is_nan() || rate <= self.failure_rate_threshold {
            return 0.0;
        }
        (self.failure_rate_weight * (rate - self.failure_rate_threshold))
            .min(self.failure_rate_max_penalty)
    }

    fn response_time_penalty(&self, millis: f64) -> f64 {
        if millis.is_nan() || millis <= self.response_time_baseline_ms {
            return 0.0;
        }
        let ratio = millis / self.response_time_baseline_ms;
        (self.response_time_weight * (ratio - 1.0)).min(self.response_time_max_penalty)
    }

    fn error_count_penalty(&self, count: f64) -> f64 {
        if count.is_nan() || count <= self.error_count_threshold {
            return 0.0;
        }
        (self.error_count_weight * (count / self.error_count_threshold).log10())
            .min(self.error_count_max_penalty)
    }

    fn problem_penalty(&self, problem: &ProblemRef) -> f64 {
        let base = if problem.severity.is_critical() {
            self.critical_problem_penalty
        } else {
            self.problem_penalty
        };
        let factor = match problem.relevance {
            Relevance::RootCause => self.root_cause_factor,
            Relevance::DirectlyImpacted => self.impacted_factor,
            Relevance::Related => self.related_factor,
        };
        base * factor
    }
}

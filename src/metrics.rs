//! Prometheus-style counters for `/metrics`.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::pipeline::{StageTimings, STAGES};

/// Every outcome label the service can report.
pub const OUTCOMES: [&str; 9] = [
    "ok",
    "ValidationError",
    "InvalidJSON",
    "PayloadTooLarge",
    "GeminiError",
    "SchemaError",
    "TooManyRequests",
    "NotFound",
    "InternalServerError",
];

/// Latency bucket upper bounds in milliseconds. The remote call dominates,
/// so buckets reach past the default 30 s timeout.
const LATENCY_BUCKETS_MS: [u64; 11] = [
    10, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000,
];

pub struct ServiceMetrics {
    analyses_total: AtomicU64,
    outcomes: Vec<AtomicU64>,
    latency_counts: Vec<AtomicU64>,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
    stage_sum_ms: Vec<AtomicU64>,
    started: Instant,
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    pub fn new() -> Self {
        let zeros = |n: usize| (0..n).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();
        Self {
            analyses_total: AtomicU64::new(0),
            outcomes: zeros(OUTCOMES.len()),
            latency_counts: zeros(LATENCY_BUCKETS_MS.len()),
            latency_sum_ms: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            stage_sum_ms: zeros(STAGES.len()),
            started: Instant::now(),
        }
    }

    /// Count a finished `/analisar` request.
    pub fn observe_analysis(&self, outcome: &str, latency_ms: u64, timings: &StageTimings) {
        self.analyses_total.fetch_add(1, Ordering::Relaxed);
        self.observe_outcome(outcome);
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        if let Some(idx) = LATENCY_BUCKETS_MS.iter().position(|ub| latency_ms <= *ub) {
            self.latency_counts[idx].fetch_add(1, Ordering::Relaxed);
        }
        for (stage, ms) in timings {
            if let Some(idx) = STAGES.iter().position(|s| s == stage) {
                self.stage_sum_ms[idx].fetch_add(*ms, Ordering::Relaxed);
            }
        }
    }

    /// Count a response produced outside the pipeline (throttling, unknown routes).
    pub fn observe_outcome(&self, outcome: &str) {
        if let Some(idx) = OUTCOMES.iter().position(|o| *o == outcome) {
            self.outcomes[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn outcome_count(&self, outcome: &str) -> u64 {
        OUTCOMES
            .iter()
            .position(|o| *o == outcome)
            .map(|idx| self.outcomes[idx].load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn render(&self, engine_version: &str, log_lines: u64, log_errors: u64) -> String {
        let mut buf = String::new();
        writeln!(buf, "# HELP motor_analyses_total Total /analisar requests processed").ok();
        writeln!(buf, "# TYPE motor_analyses_total counter").ok();
        writeln!(
            buf,
            "motor_analyses_total {}",
            self.analyses_total.load(Ordering::Relaxed)
        )
        .ok();

        writeln!(buf, "# HELP motor_responses_total Responses by outcome code").ok();
        writeln!(buf, "# TYPE motor_responses_total counter").ok();
        for (idx, outcome) in OUTCOMES.iter().enumerate() {
            writeln!(
                buf,
                "motor_responses_total{{outcome=\"{}\"}} {}",
                outcome,
                self.outcomes[idx].load(Ordering::Relaxed)
            )
            .ok();
        }

        writeln!(buf, "# HELP motor_request_latency_ms Analysis latency histogram milliseconds").ok();
        writeln!(buf, "# TYPE motor_request_latency_ms histogram").ok();
        let mut cumulative = 0u64;
        for (idx, ub) in LATENCY_BUCKETS_MS.iter().enumerate() {
            cumulative += self.latency_counts[idx].load(Ordering::Relaxed);
            writeln!(buf, "motor_request_latency_ms_bucket{{le=\"{}\"}} {}", ub, cumulative).ok();
        }
        let count = self.latency_count.load(Ordering::Relaxed);
        writeln!(buf, "motor_request_latency_ms_bucket{{le=\"+Inf\"}} {}", count).ok();
        writeln!(
            buf,
            "motor_request_latency_ms_sum {}",
            self.latency_sum_ms.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(buf, "motor_request_latency_ms_count {}", count).ok();

        writeln!(buf, "# HELP motor_stage_ms_sum Cumulative time spent per pipeline stage (ms)").ok();
        writeln!(buf, "# TYPE motor_stage_ms_sum counter").ok();
        for (idx, stage) in STAGES.iter().enumerate() {
            writeln!(
                buf,
                "motor_stage_ms_sum{{stage=\"{}\"}} {}",
                stage,
                self.stage_sum_ms[idx].load(Ordering::Relaxed)
            )
            .ok();
        }

        writeln!(buf, "# HELP motor_request_log_lines_total Request log lines written").ok();
        writeln!(buf, "# TYPE motor_request_log_lines_total counter").ok();
        writeln!(buf, "motor_request_log_lines_total {}", log_lines).ok();
        writeln!(buf, "# HELP motor_request_log_write_errors_total Request log write failures").ok();
        writeln!(buf, "# TYPE motor_request_log_write_errors_total counter").ok();
        writeln!(buf, "motor_request_log_write_errors_total {}", log_errors).ok();

        writeln!(buf, "# HELP motor_build_info Build information\n# TYPE motor_build_info gauge").ok();
        writeln!(
            buf,
            "motor_build_info{{version=\"{}\",engine_version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION"),
            engine_version
        )
        .ok();
        writeln!(buf, "# HELP motor_process_uptime_seconds Process uptime seconds\n# TYPE motor_process_uptime_seconds gauge").ok();
        writeln!(
            buf,
            "motor_process_uptime_seconds {}",
            self.started.elapsed().as_secs_f64()
        )
        .ok();
        buf
    }
}

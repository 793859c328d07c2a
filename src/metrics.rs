//! Prometheus metrics for simulation throughput
//!
//! Counters and histograms are process-global and updated by the harness as trials
//! finish. They are only exported once [`register_metrics`] has attached them to
//! [`METRICS_REGISTRY`]; updating them before that is harmless.
//!
//! NOTE: seeds and sample sizes are deliberately not labels. A grid sweep would create
//! one series per value.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

use crate::constants::TRIAL_DURATION_BUCKETS;

lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    /// Finished trials by harness mode (`repeated`, `grid`, `compliance`) and
    /// result (`ok`, `failed`)
    pub static ref TRIALS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("absim_trials_total", "Total Monte Carlo trials run"),
        &["mode", "result"]
    ).expect("valid trials_total metric");

    /// Wall time of one simulate-and-analyze trial
    pub static ref TRIAL_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "absim_trial_duration_seconds",
            "Duration of one simulated trial"
        )
        .buckets(TRIAL_DURATION_BUCKETS.to_vec()),
        &["mode"]
    ).expect("valid trial_duration metric");

    /// Synthetic users generated across all trials
    pub static ref USERS_SIMULATED: IntCounter = IntCounter::new(
        "absim_users_simulated_total",
        "Total synthetic users simulated"
    ).expect("valid users_simulated metric");
}

/// Register all metrics with the global registry
///
/// Fails with `AlreadyReg` on a second call.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    METRICS_REGISTRY.register(Box::new(TRIALS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(TRIAL_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(USERS_SIMULATED.clone()))?;
    Ok(())
}

/// Registry contents in the Prometheus text exposition format
pub fn gather_text() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&METRICS_REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Record one finished trial
pub fn record_trial(mode: &str, ok: bool, n_users: usize) {
    let result = if ok { "ok" } else { "failed" };
    TRIALS_TOTAL.with_label_values(&[mode, result]).inc();
    USERS_SIMULATED.inc_by(n_users as u64);
}

/// Records elapsed time into a histogram when dropped
///
/// Usage: `let _timer = Timer::new(TRIAL_DURATION.with_label_values(&["grid"]));`
pub struct Timer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl Timer {
    pub fn new(histogram: Histogram) -> Self {
        Self {
            histogram,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

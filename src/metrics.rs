//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub rounds_total: IntCounter,
    pub rounds_skipped: IntCounter,
    pub tickets_purchased: IntCounter,
    pub purchase_failures: IntCounter,
    pub backoff_retries: IntCounter,

    // Gauges
    pub owned_in_mempool: IntGauge,
    pub session_spent_atoms: IntGauge,

    // Histograms
    pub round_latency: Histogram,
    pub rpc_latency: Histogram,
    pub purchase_latency: Histogram,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let rounds_total = IntCounter::with_opts(Opts::new(
            "ticketbuyer_rounds_total",
            "Purchase rounds finished, skipped or not",
        ))?;

        let rounds_skipped = IntCounter::with_opts(Opts::new(
            "ticketbuyer_rounds_skipped_total",
            "Rounds that ended without buying",
        ))?;

        let tickets_purchased = IntCounter::with_opts(Opts::new(
            "ticketbuyer_tickets_purchased_total",
            "Tickets bought",
        ))?;

        let purchase_failures = IntCounter::with_opts(Opts::new(
            "ticketbuyer_purchase_failures_total",
            "Failed purchase_ticket calls",
        ))?;

        let backoff_retries = IntCounter::with_opts(Opts::new(
            "ticketbuyer_backoff_retries_total",
            "Round attempts scheduled after a transient failure",
        ))?;

        let owned_in_mempool = IntGauge::with_opts(Opts::new(
            "ticketbuyer_owned_in_mempool",
            "Our unconfirmed tickets at the last resolution",
        ))?;

        let session_spent_atoms = IntGauge::with_opts(Opts::new(
            "ticketbuyer_session_spent_atoms",
            "Amount spent on tickets this session, in atoms",
        ))?;

        let round_latency = Histogram::with_opts(
            HistogramOpts::new("ticketbuyer_round_latency_seconds", "Round attempt latency")
                .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )?;

        let rpc_latency = Histogram::with_opts(
            HistogramOpts::new("ticketbuyer_rpc_latency_seconds", "RPC call latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;

        let purchase_latency = Histogram::with_opts(
            HistogramOpts::new(
                "ticketbuyer_purchase_latency_seconds",
                "Latency of a single ticket purchase",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        )?;

        registry.register(Box::new(rounds_total.clone()))?;
        registry.register(Box::new(rounds_skipped.clone()))?;
        registry.register(Box::new(tickets_purchased.clone()))?;
        registry.register(Box::new(purchase_failures.clone()))?;
        registry.register(Box::new(backoff_retries.clone()))?;
        registry.register(Box::new(owned_in_mempool.clone()))?;
        registry.register(Box::new(session_spent_atoms.clone()))?;
        registry.register(Box::new(round_latency.clone()))?;
        registry.register(Box::new(rpc_latency.clone()))?;
        registry.register(Box::new(purchase_latency.clone()))?;

        Ok(Self {
            registry,
            rounds_total,
            rounds_skipped,
            tickets_purchased,
            purchase_failures,
            backoff_retries,
            owned_in_mempool,
            session_spent_atoms,
            round_latency,
            rpc_latency,
            purchase_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of everything registered
    pub fn encode_text(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
    histogram_name: Option<&'static str>,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            histogram_name: None,
        }
    }

    /// Create a timer with a histogram name for automatic recording
    pub fn with_name(histogram_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            histogram_name: Some(histogram_name),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Finish the timer and record to the associated histogram
    pub fn finish(self) {
        let Some(name) = self.histogram_name else {
            return;
        };
        let duration = self.elapsed_secs();
        match name {
            "round_latency_seconds" => metrics().round_latency.observe(duration),
            "rpc_latency_seconds" => metrics().rpc_latency.observe(duration),
            "purchase_latency_seconds" => metrics().purchase_latency.observe(duration),
            _ => tracing::debug!("Unknown histogram name: {}", name),
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_exposition_lists_registered_metrics() {
        let m = Metrics::new().unwrap();
        m.tickets_purchased.inc_by(3);
        m.owned_in_mempool.set(2);

        let text = m.encode_text().unwrap();
        assert!(text.contains("ticketbuyer_tickets_purchased_total 3"));
        assert!(text.contains("ticketbuyer_owned_in_mempool 2"));
        assert!(text.contains("ticketbuyer_round_latency_seconds_bucket"));
    }

    #[test]
    fn test_timer_records_to_named_histogram() {
        let before = metrics().purchase_latency.get_sample_count();
        Timer::with_name("purchase_latency_seconds").finish();
        assert!(metrics().purchase_latency.get_sample_count() > before);
    }
}

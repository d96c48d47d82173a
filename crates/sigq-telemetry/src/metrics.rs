//! Prometheus metrics for the scheduler and the offset planner.
//!
//! All collectors are registered into a [`Registry`] owned by [`Metrics`].
//! The service builds one `Metrics` at startup and hands it to every
//! component by `Arc`; nothing is registered in the process-global registry.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{TelemetryError, TelemetryResult};

/// Metric handles plus the registry they live in.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Queue manager
    queue_depth: IntGauge,
    enqueue_total: IntCounterVec,
    cancelled_total: IntCounter,
    promotions_total: IntCounterVec,
    slot_denied_total: IntCounter,

    // Promotion loop
    loop_iterations_total: IntCounter,
    loop_errors_total: IntCounterVec,
    price_fetch_failures_total: IntCounter,

    // Offset planner
    offset_plans_total: IntCounter,
    offset_entries_total: IntCounter,
    offset_skipped_total: IntCounterVec,
    connectors_opened_total: IntCounter,
    connectors_closed_total: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("queue_depth", &self.queue_depth.get())
            .finish_non_exhaustive()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> TelemetryResult<IntCounter> {
    let c = IntCounter::new(name, help)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> TelemetryResult<IntCounterVec> {
    let c = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl Metrics {
    /// Create metrics in a fresh registry.
    pub fn new() -> TelemetryResult<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered into `registry`.
    pub fn with_registry(registry: Registry) -> TelemetryResult<Self> {
        let queue_depth = IntGauge::new("sigq_queue_depth", "Signals currently queued")?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            queue_depth,
            enqueue_total: counter_vec(
                &registry,
                "sigq_enqueue_total",
                "Signal arrivals by outcome",
                &["outcome"],
            )?,
            cancelled_total: counter(
                &registry,
                "sigq_cancelled_total",
                "Queued signals cancelled by exit signals",
            )?,
            promotions_total: counter_vec(
                &registry,
                "sigq_promotions_total",
                "Queued signals promoted, by admission path",
                &["path"],
            )?,
            slot_denied_total: counter(
                &registry,
                "sigq_slot_denied_total",
                "Promotion attempts denied by the execution pool",
            )?,
            loop_iterations_total: counter(
                &registry,
                "sigq_loop_iterations_total",
                "Promotion loop iterations",
            )?,
            loop_errors_total: counter_vec(
                &registry,
                "sigq_loop_errors_total",
                "Promotion loop iterations that failed",
                &["kind"],
            )?,
            price_fetch_failures_total: counter(
                &registry,
                "sigq_price_fetch_failures_total",
                "Price fetches that failed while scoring",
            )?,
            offset_plans_total: counter(
                &registry,
                "sigq_offset_plans_total",
                "Risk offset plans built",
            )?,
            offset_entries_total: counter(
                &registry,
                "sigq_offset_entries_total",
                "Partial-close entries accepted into offset plans",
            )?,
            offset_skipped_total: counter_vec(
                &registry,
                "sigq_offset_skipped_total",
                "Winners skipped while building offset plans, by reason",
                &["reason"],
            )?,
            connectors_opened_total: counter(
                &registry,
                "sigq_connectors_opened_total",
                "Exchange connectors opened by the offset planner",
            )?,
            connectors_closed_total: counter(
                &registry,
                "sigq_connectors_closed_total",
                "Exchange connectors released by the offset planner",
            )?,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn gather_text(&self) -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Encoding(e.to_string()))
    }

    // === Queue manager ===

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.get()
    }

    /// Record a signal arrival (created/replaced/duplicate/missing_user).
    pub fn enqueue(&self, outcome: &str) {
        self.enqueue_total.with_label_values(&[outcome]).inc();
    }

    pub fn enqueue_count(&self, outcome: &str) -> u64 {
        self.enqueue_total.with_label_values(&[outcome]).get()
    }

    pub fn cancelled(&self, count: usize) {
        self.cancelled_total
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Record a promotion (pool/pyramid_bypass/forced).
    pub fn promoted(&self, path: &str) {
        self.promotions_total.with_label_values(&[path]).inc();
    }

    pub fn promotion_count(&self, path: &str) -> u64 {
        self.promotions_total.with_label_values(&[path]).get()
    }

    pub fn slot_denied(&self) {
        self.slot_denied_total.inc();
    }

    pub fn slot_denied_count(&self) -> u64 {
        self.slot_denied_total.get()
    }

    // === Promotion loop ===

    pub fn loop_iteration(&self) {
        self.loop_iterations_total.inc();
    }

    pub fn loop_iteration_count(&self) -> u64 {
        self.loop_iterations_total.get()
    }

    /// Record a failed iteration (error/panic).
    pub fn loop_error(&self, kind: &str) {
        self.loop_errors_total.with_label_values(&[kind]).inc();
    }

    pub fn loop_error_count(&self, kind: &str) -> u64 {
        self.loop_errors_total.with_label_values(&[kind]).get()
    }

    pub fn price_fetch_failed(&self) {
        self.price_fetch_failures_total.inc();
    }

    // === Offset planner ===

    pub fn offset_plan_built(&self, entries: usize) {
        self.offset_plans_total.inc();
        self.offset_entries_total
            .inc_by(u64::try_from(entries).unwrap_or(u64::MAX));
    }

    pub fn offset_skipped(&self, reason: &str) {
        self.offset_skipped_total.with_label_values(&[reason]).inc();
    }

    pub fn offset_skipped_count(&self, reason: &str) -> u64 {
        self.offset_skipped_total.with_label_values(&[reason]).get()
    }

    pub fn connector_opened(&self) {
        self.connectors_opened_total.inc();
    }

    pub fn connector_closed(&self) {
        self.connectors_closed_total.inc();
    }

    pub fn connectors_open_balance(&self) -> i64 {
        self.connectors_opened_total.get() as i64 - self.connectors_closed_total.get() as i64
    }
}

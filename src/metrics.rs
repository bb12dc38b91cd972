use tracing::trace;

// Trace-level counters. The Prometheus recorder installed in main renders
// whatever the exporter collects at /metrics.

pub fn inc_requests(route: &'static str) {
    trace!(target = "lister.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "lister.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn generation_attempt(model: &str, outcome: &'static str) {
    trace!(
        target = "lister.metrics",
        model = model,
        outcome = outcome,
        "generation_attempts_total_inc"
    );
}

pub fn item_finished(outcome: &'static str) {
    trace!(target = "lister.metrics", outcome = outcome, "items_total_inc");
}

// ABOUTME: Metric recording helpers for gateway observability.
// ABOUTME: Thin wrappers over the metrics facade; an exporter is wired by the embedding application.

/// Record an inbound message accepted for processing.
pub fn record_message_inbound() {
    metrics::counter!("switchyard_messages_inbound_total").increment(1);
}

/// Record a message queued behind an active run.
pub fn record_message_queued() {
    metrics::counter!("switchyard_messages_queued_total").increment(1);
}

/// Record a duplicate message dropped by the dedup window.
pub fn record_duplicate_dropped() {
    metrics::counter!("switchyard_duplicates_dropped_total").increment(1);
}

/// Record an eviction from a full conversation queue.
pub fn record_queue_drop() {
    metrics::counter!("switchyard_queue_drops_total").increment(1);
}

/// Record one tool invocation by name.
pub fn record_tool_call(tool: &str) {
    metrics::counter!("switchyard_tool_calls_total", "tool" => tool.to_string()).increment(1);
}

/// Record a run that ended in abortion.
pub fn record_run_aborted() {
    metrics::counter!("switchyard_runs_aborted_total").increment(1);
}

/// Record total run duration in seconds.
pub fn record_run_duration(seconds: f64) {
    metrics::histogram!("switchyard_run_duration_seconds").record(seconds);
}

/// Record an unexpected plugin worker exit.
pub fn record_plugin_crash(plugin: &str) {
    metrics::counter!("switchyard_plugin_crashes_total", "plugin" => plugin.to_string())
        .increment(1);
}

/// Record an error by category (provider, tool, plugin, handler).
pub fn record_error(category: &str) {
    metrics::counter!("switchyard_errors_total", "category" => category.to_string()).increment(1);
}

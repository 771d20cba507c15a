use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, register_int_counter_vec,
    CounterVec, Encoder, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("http_requests_total registers once");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("http_request_duration_seconds registers once");

    // Database Metrics (MongoDB)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .expect("db_operations_total registers once");

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("db_operation_duration_seconds registers once");

    // Unread counter cache (Redis)
    pub static ref CACHE_HIT_RATIO: CounterVec = register_counter_vec!(
        "unread_cache_hit_ratio",
        "Unread notification counter cache hit/miss ratio",
        &["result"]
    )
    .expect("unread_cache_hit_ratio registers once");

    // Business Metrics
    pub static ref ANNOUNCEMENTS_CREATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "announcements_created_total",
        "Total number of announcements created",
        &["audience", "status"]
    )
    .expect("announcements_created_total registers once");

    pub static ref NOTIFICATIONS_FANNED_OUT_TOTAL: IntCounterVec = register_int_counter_vec!(
        "notifications_fanned_out_total",
        "Notifications written by fan-out, by outcome",
        &["notification_type", "outcome"]
    )
    .expect("notifications_fanned_out_total registers once");

    pub static ref FAN_OUT_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "fan_out_failures_total",
        "Fan-out events that failed and were swallowed"
    )
    .expect("fan_out_failures_total registers once");

    pub static ref ANNOUNCEMENT_ENGAGEMENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        "announcement_engagement_total",
        "Read, like and comment events on announcements",
        &["event"]
    )
    .expect("announcement_engagement_total registers once");

    pub static ref SWEEPER_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "notification_sweeper_ticks_total",
        "Total number of retention sweeper ticks",
        &["status"]
    )
    .expect("notification_sweeper_ticks_total registers once");

    pub static ref NOTIFICATIONS_SWEPT_TOTAL: IntCounter = register_int_counter!(
        "notifications_swept_total",
        "Read notifications removed by the retention sweep"
    )
    .expect("notifications_swept_total registers once");
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track database operation with metrics
pub async fn track_db_operation<F, T>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

/// Record cache hit
pub fn record_cache_hit() {
    CACHE_HIT_RATIO.with_label_values(&["hit"]).inc();
}

/// Record cache miss
pub fn record_cache_miss() {
    CACHE_HIT_RATIO.with_label_values(&["miss"]).inc();
}

// Prometheus metrics definitions for the match backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Players currently waiting in the matchmaking queue.
    pub static ref QUEUE_DEPTH: IntGauge =
        IntGauge::new("codeduel_queue_depth", "Players waiting in the queue").unwrap();

    /// Matches currently in the active set.
    pub static ref ACTIVE_MATCHES: IntGauge =
        IntGauge::new("codeduel_active_matches", "Currently ongoing matches").unwrap();

    /// Live WebSocket connections.
    pub static ref CONNECTED_WEBSOCKETS: IntGauge =
        IntGauge::new("codeduel_connected_websockets", "Live WebSocket connections").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Matches created, by pairing kind (human_human, human_bot, bot_bot).
    pub static ref MATCHES_CREATED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("codeduel_matches_created_total", "Matches created"),
        &["pairing"],
    )
    .unwrap();

    /// Matches resolved, by outcome (winner, draw, timeout, abandoned).
    pub static ref MATCHES_RESOLVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("codeduel_matches_resolved_total", "Matches resolved"),
        &["outcome"],
    )
    .unwrap();

    /// Code submissions, by kind (competitive, test) and result
    /// (passed, failed, complexity_failed, error, cached).
    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("codeduel_submissions_total", "Code submissions"),
        &["kind", "result"],
    )
    .unwrap();

    /// Sandbox jobs, by terminal status id.
    pub static ref SANDBOX_JOBS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("codeduel_sandbox_jobs_total", "Sandbox jobs by terminal status"),
        &["status"],
    )
    .unwrap();

    /// Circuit breaker trips, by downstream name.
    pub static ref BREAKER_OPENS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("codeduel_breaker_opens_total", "Circuit breaker open transitions"),
        &["breaker"],
    )
    .unwrap();

    /// Calls rejected while a breaker was open.
    pub static ref BREAKER_REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("codeduel_breaker_rejections_total", "Calls short-circuited by an open breaker"),
        &["breaker"],
    )
    .unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("codeduel_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    /// Total WebSocket frames sent to clients.
    pub static ref WEBSOCKET_MESSAGES_SENT_TOTAL: IntCounter = IntCounter::new(
        "codeduel_websocket_messages_sent_total",
        "Total WebSocket frames sent",
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Match duration in seconds, by outcome.
    pub static ref MATCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("codeduel_match_duration_seconds", "Match duration in seconds")
            .buckets(vec![30.0, 60.0, 180.0, 300.0, 600.0, 1200.0, 1800.0, 2700.0]),
        &["outcome"],
    )
    .unwrap();

    /// Wall time a submission spends in the sandbox (submit to terminal poll).
    pub static ref SANDBOX_EXECUTION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "codeduel_sandbox_execution_seconds",
            "Sandbox wall time per batch",
        )
        .buckets(vec![0.5, 1.0, 2.0, 4.0, 8.0, 15.0, 30.0, 60.0]),
        &["language"],
    )
    .unwrap();

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "codeduel_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(ACTIVE_MATCHES.clone()),
        Box::new(CONNECTED_WEBSOCKETS.clone()),
        Box::new(MATCHES_CREATED_TOTAL.clone()),
        Box::new(MATCHES_RESOLVED_TOTAL.clone()),
        Box::new(SUBMISSIONS_TOTAL.clone()),
        Box::new(SANDBOX_JOBS_TOTAL.clone()),
        Box::new(BREAKER_OPENS_TOTAL.clone()),
        Box::new(BREAKER_REJECTIONS_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(WEBSOCKET_MESSAGES_SENT_TOTAL.clone()),
        Box::new(MATCH_DURATION_SECONDS.clone()),
        Box::new(SANDBOX_EXECUTION_SECONDS.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        REGISTRY.register(c).expect("failed to register metric");
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Normalize a URL path for metric labels: replace numeric and ObjectId-hex
/// path segments with `:id` to prevent cardinality explosion.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            let is_numeric = !segment.is_empty() && segment.parse::<i64>().is_ok();
            let is_object_id =
                segment.len() == 24 && segment.chars().all(|c| c.is_ascii_hexdigit());
            if is_numeric || is_object_id {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

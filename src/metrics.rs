//! Prometheus metrics for the knowledge pipeline.
//!
//! Exposes:
//! - `slack_knowledge_command_duration_seconds` (histogram)
//! - `slack_knowledge_command_total` (counter with status)
//! - `slack_knowledge_command_inflight` (gauge)
//! - `slack_knowledge_crawled_messages_total` (counter per channel)
//! - `slack_knowledge_slack_requests_total` (counter per API method and status)
//! - `slack_knowledge_llm_calls_total` (counter per model and status)
//! - `slack_knowledge_documents_written_total` (counter)
//! - process metrics via `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
    TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static COMMAND_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // 50ms up to ~7 minutes; generation runs are long.
    let buckets =
        prometheus::exponential_buckets(0.05, 2.0, 14).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "slack_knowledge_command_duration_seconds",
        "CLI command duration in seconds",
        &["command"],
        buckets
    )
    .expect("failed to register command duration histogram")
});

static COMMAND_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "slack_knowledge_command_total",
        "Total command executions by status",
        &["command", "status"]
    )
    .expect("failed to register command counter")
});

static COMMAND_INFLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "slack_knowledge_command_inflight",
        "Number of in-flight commands",
        &["command"]
    )
    .expect("failed to register inflight gauge")
});

static CRAWLED_MESSAGES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "slack_knowledge_crawled_messages_total",
        "Messages stored by the crawler",
        &["channel"]
    )
    .expect("failed to register crawled messages counter")
});

static SLACK_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "slack_knowledge_slack_requests_total",
        "Slack Web API requests by method and outcome",
        &["method", "status"]
    )
    .expect("failed to register slack request counter")
});

static LLM_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "slack_knowledge_llm_calls_total",
        "Language model calls by model and outcome",
        &["model", "status"]
    )
    .expect("failed to register llm call counter")
});

static DOCUMENTS_WRITTEN: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "slack_knowledge_documents_written_total",
        "Topic documents written to disk"
    )
    .expect("failed to register documents counter")
});

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&COMMAND_DURATION);
    Lazy::force(&COMMAND_TOTAL);
    Lazy::force(&COMMAND_INFLIGHT);
    Lazy::force(&CRAWLED_MESSAGES);
    Lazy::force(&SLACK_REQUESTS);
    Lazy::force(&LLM_CALLS);
    Lazy::force(&DOCUMENTS_WRITTEN);
}

fn status_label(success: bool) -> &'static str {
    if success {
        "ok"
    } else {
        "error"
    }
}

/// Increment inflight gauge for a command.
pub fn record_command_start(command: &'static str) {
    init_collectors();
    COMMAND_INFLIGHT.with_label_values(&[command]).inc();
}

/// Record command completion with duration and status.
pub fn record_command_result(command: &'static str, duration: Duration, success: bool) {
    init_collectors();
    COMMAND_INFLIGHT.with_label_values(&[command]).dec();
    COMMAND_DURATION
        .with_label_values(&[command])
        .observe(duration.as_secs_f64());
    COMMAND_TOTAL
        .with_label_values(&[command, status_label(success)])
        .inc();
}

pub fn record_crawled_messages(channel: &str, count: usize) {
    CRAWLED_MESSAGES
        .with_label_values(&[channel])
        .inc_by(count as u64);
}

pub fn record_slack_request(method: &str, success: bool) {
    SLACK_REQUESTS
        .with_label_values(&[method, status_label(success)])
        .inc();
}

pub fn record_llm_call(model: &str, success: bool) {
    LLM_CALLS
        .with_label_values(&[model, status_label(success)])
        .inc();
}

pub fn record_document_written() {
    DOCUMENTS_WRITTEN.inc();
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        let mut response = Response::new(Full::from("encode error"));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return Ok(response);
    }

    let mut response = Response::new(Full::from(buffer));
    if let Ok(content_type) = encoder.format_type().parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::NOT_FOUND;
            Ok(response)
        }
    }
}

async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Prometheus metrics endpoint started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service_fn(handle_request);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "Metrics connection error: {}", err);
            }
        });
    }
}

/// Spawn the metrics HTTP endpoint on the given address.
pub fn spawn_metrics_server(addr: SocketAddr) {
    init_collectors();
    tokio::spawn(async move {
        if let Err(err) = serve(addr).await {
            error!(%addr, "Metrics server failed: {}", err);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn scrape() -> String {
        let response = metrics_response().await.expect("metrics response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect metrics body")
            .to_bytes();
        String::from_utf8(body.to_vec()).expect("utf-8 metrics body")
    }

    #[test]
    fn records_successful_command_metrics() {
        let cmd = "test_command_metrics_success";

        record_command_start(cmd);
        assert_eq!(COMMAND_INFLIGHT.with_label_values(&[cmd]).get(), 1);

        record_command_result(cmd, Duration::from_millis(120), true);

        assert_eq!(COMMAND_INFLIGHT.with_label_values(&[cmd]).get(), 0);
        assert_eq!(COMMAND_TOTAL.with_label_values(&[cmd, "ok"]).get(), 1);
        assert_eq!(
            COMMAND_DURATION
                .with_label_values(&[cmd])
                .get_sample_count(),
            1
        );
    }

    #[test]
    fn records_failed_command_metrics() {
        let cmd = "test_command_metrics_error";

        record_command_start(cmd);
        record_command_result(cmd, Duration::from_secs(2), false);

        assert_eq!(COMMAND_TOTAL.with_label_values(&[cmd, "error"]).get(), 1);
    }

    #[test]
    fn pipeline_counters_accumulate() {
        init_collectors();
        record_crawled_messages("C_TEST_METRICS", 3);
        record_crawled_messages("C_TEST_METRICS", 2);
        assert_eq!(
            CRAWLED_MESSAGES.with_label_values(&["C_TEST_METRICS"]).get(),
            5
        );

        record_llm_call("test-model-metrics", false);
        assert_eq!(
            LLM_CALLS
                .with_label_values(&["test-model-metrics", "error"])
                .get(),
            1
        );

        record_slack_request("test.method", true);
        assert_eq!(
            SLACK_REQUESTS.with_label_values(&["test.method", "ok"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn metrics_response_contains_registered_metrics() {
        let cmd = "test_metrics_response";
        record_command_start(cmd);
        record_command_result(cmd, Duration::from_millis(10), true);
        record_document_written();

        let text = scrape().await;
        assert!(text.contains("slack_knowledge_command_total"));
        assert!(text.contains("slack_knowledge_command_duration_seconds"));
        assert!(text.contains("slack_knowledge_documents_written_total"));
        assert!(text.contains(cmd));
    }

    #[tokio::test]
    async fn metrics_response_has_text_content_type() {
        let response = metrics_response().await.expect("metrics response");
        let content_type = response
            .headers()
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(content_type.starts_with("text/plain"));
    }
}

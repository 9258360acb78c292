use axum::{body::Body, extract::Request, middleware::Next, response::Response};
use metrics::{counter, histogram};
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

/// One outbound call to the ERP, successful or not.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub method: String,
    pub url: String,
    /// HTTP status, absent when the call failed before a response arrived.
    pub status: Option<u16>,
    pub duration: Duration,
    pub token_used: bool,
    pub error: Option<String>,
}

/// Sink for outbound request telemetry.
pub trait RequestRecorder: Send + Sync {
    fn record(&self, record: &RequestRecord);
}

/// Hand `record` to `recorder`, swallowing any panic it raises.
pub fn report(recorder: &dyn RequestRecorder, record: &RequestRecord) {
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| recorder.record(record)));
    if outcome.is_err() {
        tracing::warn!(url = %record.url, "Request recorder panicked; record dropped");
    }
}

/// Emits Prometheus metrics and a trace event per upstream request.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsRecorder;

impl RequestRecorder for MetricsRecorder {
    fn record(&self, record: &RequestRecord) {
        let status = record
            .status
            .map_or_else(|| "error".to_string(), |s| s.to_string());
        let labels = [
            ("method", record.method.clone()),
            ("endpoint", endpoint_label(&record.url)),
            ("status", status),
            ("token", record.token_used.to_string()),
        ];

        counter!("sankhya_upstream_requests_total", &labels).increment(1);
        histogram!("sankhya_upstream_request_duration_seconds", &labels[..2])
            .record(record.duration.as_secs_f64());

        match &record.error {
            Some(error) => tracing::warn!(
                method = %record.method,
                url = %record.url,
                status = ?record.status,
                duration_ms = record.duration.as_millis(),
                token_used = record.token_used,
                error = %error,
                "Upstream request failed"
            ),
            None => tracing::debug!(
                method = %record.method,
                url = %record.url,
                status = ?record.status,
                duration_ms = record.duration.as_millis(),
                token_used = record.token_used,
                "Upstream request"
            ),
        }
    }
}

/// Low-cardinality label for an upstream URL: the service name when present, else the path.
fn endpoint_label(url: &str) -> String {
    if let Some((_, query)) = url.split_once('?') {
        if let Some(service) = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("serviceName="))
        {
            return service.to_string();
        }
    }
    let without_query = url.split('?').next().unwrap_or(url);
    let path = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    path.find('/').map_or("/", |i| &path[i..]).to_string()
}

pub fn init_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle, String> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| e.to_string())
}

pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let path_label = normalize_path(&path);

    if path_label == "/metrics" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path_label),
        ("status", status),
    ];

    counter!("sankhya_http_requests_total", &labels).increment(1);
    histogram!("sankhya_http_request_duration_seconds", &labels[..2]).record(duration);

    response
}

/// Collapse per-product stock paths so the label set stays bounded.
fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() == 6 && parts[1] == "api" && parts[3] == "products" && parts[5] == "stock" {
        return format!("/api/{}/products/:code/stock", parts[2]);
    }
    path.to_string()
}

pub async fn metrics_handler(
    axum::extract::State(handle): axum::extract::State<
        metrics_exporter_prometheus::PrometheusHandle,
    >,
) -> String {
    handle.render()
}

//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Total work items processed
    pub static ref PROCESS_TOTAL: CounterVec = register_counter_vec!(
        "pvc_snapshot_operator_processed_total",
        "Total number of work items processed",
        &["kind"]
    ).unwrap();

    /// Total work item processing errors
    pub static ref PROCESS_ERRORS: CounterVec = register_counter_vec!(
        "pvc_snapshot_operator_process_errors_total",
        "Total number of work item processing errors",
        &["kind"]
    ).unwrap();

    /// Work item processing duration histogram
    pub static ref PROCESS_DURATION: HistogramVec = register_histogram_vec!(
        "pvc_snapshot_operator_process_duration_seconds",
        "Duration of work item processing in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Volume snapshots created, per namespace
    pub static ref SNAPSHOTS_CREATED: CounterVec = register_counter_vec!(
        "pvc_snapshot_operator_snapshots_created_total",
        "Total number of volume snapshots created",
        &["namespace"]
    ).unwrap();

    /// Volume snapshot creation failures, per namespace
    pub static ref SNAPSHOT_CREATE_FAILURES: CounterVec = register_counter_vec!(
        "pvc_snapshot_operator_snapshot_create_failures_total",
        "Total number of volume snapshot creation failures",
        &["namespace"]
    ).unwrap();

    /// Keys currently pending or awaiting retry in the work queue
    pub static ref QUEUE_DEPTH: Gauge = register_gauge!(
        "pvc_snapshot_operator_queue_depth",
        "Number of keys pending or awaiting retry in the work queue"
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: Gauge = register_gauge!(
        "pvc_snapshot_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/readyz" => text_response(StatusCode::OK, "ok"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        );
    }

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", encoder.format_type())
        .body(Full::new(Bytes::from(buffer)))
        .unwrap()
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

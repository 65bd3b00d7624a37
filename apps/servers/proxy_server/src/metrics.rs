use axum::http::StatusCode;
use lazy_static::lazy_static;
use prometheus::{register_histogram, register_int_counter, register_int_gauge, Encoder, Histogram, IntCounter, IntGauge, TextEncoder};

lazy_static! {
	pub static ref QUEUED_TASKS: IntGauge =
		register_int_gauge!("proxy_queued_tasks", "Requests pushed but not yet admitted").expect("Failed to register QUEUED_TASKS");
	pub static ref ADMITTED_WEIGHT: IntGauge =
		register_int_gauge!("proxy_admitted_weight", "Total weight held by in-flight admitted requests").expect("Failed to register ADMITTED_WEIGHT");
	pub static ref REQUESTS_FORWARDED: IntCounter =
		register_int_counter!("proxy_requests_forwarded_total", "Requests successfully relayed to the upstream").expect("Failed to register REQUESTS_FORWARDED");
	pub static ref UPSTREAM_FAILURES: IntCounter =
		register_int_counter!("proxy_upstream_failures_total", "Forwarding attempts that failed at the upstream").expect("Failed to register UPSTREAM_FAILURES");
	pub static ref ADMISSION_WAIT: Histogram =
		register_histogram!("proxy_admission_wait_seconds", "Time from push to admission in seconds").expect("Failed to register ADMISSION_WAIT");
}

/// Prometheus metrics handler
pub async fn metrics_handler() -> Result<String, StatusCode> {
	let encoder = TextEncoder::new();
	let metric_families = prometheus::gather();
	let mut buffer = Vec::new();

	if encoder.encode(&metric_families, &mut buffer).is_err() {
		return Err(StatusCode::INTERNAL_SERVER_ERROR);
	}

	String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

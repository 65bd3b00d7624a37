use crate::classify;
use crate::config::Config;
use crate::error::ProxyError;
use crate::metrics::{ADMISSION_WAIT, ADMITTED_WEIGHT, QUEUED_TASKS, REQUESTS_FORWARDED, UPSTREAM_FAILURES};
use admission::{Scheduler, Task, TaskHandle};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tokio_util::sync::DropGuard;
use tracing::instrument;

#[derive(Clone)]
pub struct AppState {
	pub scheduler: Arc<Scheduler>,
	pub client: reqwest::Client,
	pub config: Arc<Config>,
}

#[axum::debug_handler]
#[instrument(name = "health")]
pub async fn health() -> StatusCode {
	StatusCode::OK
}

/// Relay any request to the upstream once the scheduler lets it through.
pub async fn forward(State(state): State<AppState>, req: Request) -> Result<Response, ProxyError> {
	let (parts, body) = req.into_parts();
	let uri = classify::request_uri(&parts.uri);
	let priority = classify::priority_for(&state.config, &parts.headers, &uri);
	let weight = classify::weight_for(&state.config, &parts.headers, &uri);

	tracing::info!("received task {} priority={} weight={}", uri, priority, weight);

	let (task, mut handle) = Task::new(priority, weight);

	QUEUED_TASKS.inc();
	let queued = QueuedGauge;
	let waiting = Instant::now();
	// A task cannot be pulled back out of the queue, so giving up here just
	// abandons it: once admitted, its pre-fired done signal returns the
	// weight immediately.
	let admitted = match state.scheduler.push(task).await {
		Ok(()) => match timeout(Duration::from_secs(state.config.admission_timeout), handle.admitted()).await {
			Ok(result) => result.map_err(ProxyError::from),
			Err(_) => Err(ProxyError::AdmissionTimeout),
		},
		Err(err) => Err(ProxyError::from(err)),
	};
	drop(queued);
	admitted?;

	ADMISSION_WAIT.observe(waiting.elapsed().as_secs_f64());
	ADMITTED_WEIGHT.add(weight);
	tracing::info!("task ready to run {}", uri);

	// The slot travels with the response body: weight is released when the
	// last byte has been relayed, the client goes away, or forwarding fails.
	let TaskHandle { done, .. } = handle;
	let slot = AdmissionSlot { weight, _done: done };

	let result = relay(&state, parts, body, &uri, slot).await;
	match &result {
		Ok(_) => REQUESTS_FORWARDED.inc(),
		Err(_) => UPSTREAM_FAILURES.inc(),
	}
	result
}

async fn relay(state: &AppState, parts: Parts, body: Body, uri: &str, slot: AdmissionSlot) -> Result<Response, ProxyError> {
	let url = classify::forward_url(&state.config, uri);

	let has_body = parts.headers.contains_key(CONTENT_LENGTH) || parts.headers.contains_key(TRANSFER_ENCODING);
	let mut request = state.client.request(parts.method, url).headers(relay_headers(&parts.headers));
	if has_body {
		request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
	}

	let upstream = request.send().await?;

	let status = upstream.status();
	let headers = relay_headers(upstream.headers());
	let relayed = RelayBody {
		inner: Box::pin(upstream.bytes_stream()),
		_slot: slot,
	};

	let mut response = Response::new(Body::from_stream(relayed));
	*response.status_mut() = status;
	*response.headers_mut() = headers;
	Ok(response)
}

/// Decremented on drop, so a client that disconnects mid-wait still comes
/// off the queued gauge.
struct QueuedGauge;

impl Drop for QueuedGauge {
	fn drop(&mut self) {
		QUEUED_TASKS.dec();
	}
}

struct AdmissionSlot {
	weight: i64,
	_done: DropGuard,
}

impl Drop for AdmissionSlot {
	fn drop(&mut self) {
		ADMITTED_WEIGHT.sub(self.weight);
	}
}

/// Upstream body stream carrying the admission slot for its request.
struct RelayBody {
	inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
	_slot: AdmissionSlot,
}

impl Stream for RelayBody {
	type Item = reqwest::Result<Bytes>;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		self.inner.as_mut().poll_next(cx)
	}
}

/// Connection-scoped headers a proxy must not relay, plus framing headers
/// that get re-derived for the rebuilt message.
fn is_hop_by_hop(name: &HeaderName) -> bool {
	matches!(
		name.as_str(),
		"connection" | "proxy-connection" | "keep-alive" | "te" | "trailer" | "transfer-encoding" | "upgrade" | "host" | "content-length"
	)
}

fn relay_headers(headers: &HeaderMap) -> HeaderMap {
	let mut relayed = HeaderMap::with_capacity(headers.len());
	for (name, value) in headers {
		if is_hop_by_hop(name) {
			continue;
		}
		relayed.append(name.clone(), value.clone());
	}
	relayed
}

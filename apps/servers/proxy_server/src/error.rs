use admission::ScheduleError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
	#[error("upstream request failed: {0}")]
	Upstream(#[from] reqwest::Error),

	#[error("request was not admitted: {0}")]
	Scheduler(#[from] ScheduleError),

	#[error("timed out waiting for admission")]
	AdmissionTimeout,
}

impl ProxyError {
	const fn status_code(&self) -> StatusCode {
		match self {
			Self::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
			Self::Scheduler(_) => StatusCode::SERVICE_UNAVAILABLE,
			Self::AdmissionTimeout => StatusCode::SERVICE_UNAVAILABLE,
		}
	}
}

impl IntoResponse for ProxyError {
	fn into_response(self) -> Response {
		match &self {
			Self::Upstream(err) => tracing::error!("upstream request failed: {}", err),
			Self::Scheduler(err) => tracing::warn!("request not admitted: {}", err),
			Self::AdmissionTimeout => tracing::warn!("request gave up waiting for admission"),
		}

		(self.status_code(), self.to_string()).into_response()
	}
}

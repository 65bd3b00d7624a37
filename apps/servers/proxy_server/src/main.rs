mod classify;
mod config;
mod error;
mod metrics;
mod proxy;

use crate::config::Config;
use crate::proxy::AppState;
use admission::Scheduler;
use anyhow::Result;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{filter::EnvFilter, fmt::format::JsonFields, util::SubscriberInitExt, Layer};

#[tokio::main]
async fn main() -> Result<()> {
	dotenv::dotenv().ok();
	let config = Config::parse();
	let _ = init_tracing(&config);

	let config = Arc::new(config);
	let scheduler = Arc::new(Scheduler::new(config.max_tasks, config.max_weight));
	scheduler.start().await?;

	let state = AppState {
		scheduler: scheduler.clone(),
		client: reqwest::Client::new(),
		config: config.clone(),
	};

	let app = Router::new()
		.route("/health", get(proxy::health))
		.route("/metrics", get(metrics::metrics_handler))
		.fallback(proxy::forward)
		.layer(TraceLayer::new_for_http())
		.with_state(state);

	let addr = format!("{}:{}", config.host, config.port);
	let listener = TcpListener::bind(&addr).await?;
	tracing::info!("listening on {}", listener.local_addr()?);

	// Coordinated shutdown: ctrl-c cancels the token, the listener stops
	// accepting, and in-flight connections get the configured window to end.
	let shutdown_token = CancellationToken::new();
	let signal_token = shutdown_token.clone();
	let signal_task = tokio::spawn(async move {
		let _ = tokio::signal::ctrl_c().await;
		tracing::info!("received shutdown signal");
		signal_token.cancel();
	});

	let server_token = shutdown_token.clone();
	let server = axum::serve(listener, app)
		.with_graceful_shutdown(async move { server_token.cancelled().await })
		.into_future();

	tokio::select! {
		result = server => {
			result?;
			tracing::info!("server stopped");
		}
		() = async {
			shutdown_token.cancelled().await;
			tokio::time::sleep(Duration::from_secs(config.shutdown_timeout)).await;
		} => {
			tracing::warn!("server forced to shut down with connections still open");
		}
	}

	tracing::info!("draining scheduler...");
	match tokio::time::timeout(Duration::from_secs(config.shutdown_timeout), scheduler.stop()).await {
		Ok(result) => result?,
		Err(_) => tracing::warn!("scheduler forced to shut down after {}s with work in flight", config.shutdown_timeout),
	}

	signal_task.abort();
	tracing::info!("server exiting");
	Ok(())
}

#[must_use]
pub fn init_tracing(config: &Config) -> Option<()> {
	use std::str::FromStr;
	use tracing_subscriber::layer::SubscriberExt;

	let filter = EnvFilter::from_str(config.rust_log.as_deref()?).ok()?;

	tracing_subscriber::registry()
		.with(if config.log_json {
			Box::new(
				tracing_subscriber::fmt::layer()
					.fmt_fields(JsonFields::default())
					.event_format(tracing_subscriber::fmt::format().json().flatten_event(true).with_span_list(false))
					.with_filter(filter),
			) as Box<dyn Layer<_> + Send + Sync>
		} else {
			Box::new(
				tracing_subscriber::fmt::layer()
					.event_format(tracing_subscriber::fmt::format().pretty())
					.with_filter(filter),
			)
		})
		.init();
	None
}

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
pub struct Config {
	/// Use JSON formatting for tracing
	#[arg(long, env = "LOG_JSON", default_value = "false")]
	pub log_json: bool,

	/// Log level
	#[arg(long, env = "RUST_LOG")]
	pub rust_log: Option<String>,

	/// Server host
	#[arg(long, env = "HOST", default_value = "0.0.0.0")]
	pub host: String,

	/// Server port
	#[arg(long, env = "PORT", default_value = "8080")]
	pub port: u16,

	/// Upstream base URL every request URI is appended to
	#[arg(long, env = "FORWARD_URL_PREFIX", default_value = "http://localhost:8000")]
	pub forward_url_prefix: String,

	/// Total admission weight shared by all in-flight requests
	#[arg(long, env = "MAX_WEIGHT", default_value = "24")]
	pub max_weight: i64,

	/// Arrival queue capacity; pushes beyond it block their handlers
	#[arg(long, env = "MAX_TASKS", default_value = "1024")]
	pub max_tasks: usize,

	/// Seconds a request may wait for admission before giving up
	#[arg(long, env = "ADMISSION_TIMEOUT", default_value = "60")]
	pub admission_timeout: u64,

	/// Seconds to wait for in-flight requests during shutdown
	#[arg(long, env = "SHUTDOWN_TIMEOUT", default_value = "180")]
	pub shutdown_timeout: u64,

	/// Per-URI admission weights as a JSON object, e.g. '{"/reports": 24}'
	#[arg(long, env = "ROUTE_WEIGHTS", default_value = "{}", value_parser = parse_route_map)]
	pub route_weights: RouteMap,

	/// Per-URI priorities as a JSON object, e.g. '{"/live": 20}'
	#[arg(long, env = "ROUTE_PRIORITIES", default_value = "{}", value_parser = parse_route_map)]
	pub route_priorities: RouteMap,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RouteMap(HashMap<String, i64>);

impl RouteMap {
	#[must_use]
	pub fn get(&self, uri: &str) -> Option<i64> {
		self.0.get(uri).copied()
	}
}

fn parse_route_map(raw: &str) -> Result<RouteMap, String> {
	serde_json::from_str::<HashMap<String, i64>>(raw)
		.map(RouteMap)
		.map_err(|err| format!("expected a JSON object mapping URIs to integers: {err}"))
}

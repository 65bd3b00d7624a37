use crate::config::Config;
use axum::http::{HeaderMap, Uri};

pub const PRIORITY_HEADER: &str = "x-priority";
pub const WEIGHT_HEADER: &str = "x-weight";

fn header_override(headers: &HeaderMap, name: &str) -> Option<i64> {
	headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Routing key: the full request URI, path plus query.
pub fn request_uri(uri: &Uri) -> String {
	uri.path_and_query().map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string())
}

/// Priority for a request: the `X-Priority` header when present and
/// parseable, otherwise the per-URI table, otherwise 0.
pub fn priority_for(config: &Config, headers: &HeaderMap, uri: &str) -> i64 {
	header_override(headers, PRIORITY_HEADER).or_else(|| config.route_priorities.get(uri)).unwrap_or(0)
}

/// Weight for a request, resolved like the priority. Unknown routes default
/// to zero, but every admitted request has to cost at least one unit, and no
/// single request may claim more than the whole budget.
pub fn weight_for(config: &Config, headers: &HeaderMap, uri: &str) -> i64 {
	let weight = header_override(headers, WEIGHT_HEADER).or_else(|| config.route_weights.get(uri)).unwrap_or(0);
	weight.max(1).min(config.max_weight.max(1))
}

pub fn forward_url(config: &Config, uri: &str) -> String {
	format!("{}{}", config.forward_url_prefix.trim_end_matches('/'), uri)
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::http::HeaderValue;
	use clap::Parser;

	fn test_config() -> Config {
		Config::parse_from([
			"proxy_server",
			"--max-weight",
			"10",
			"--route-weights",
			r#"{"/heavy": 8, "/zero": 0}"#,
			"--route-priorities",
			r#"{"/live": 20}"#,
		])
	}

	fn headers_with(name: &'static str, value: &str) -> HeaderMap {
		let mut headers = HeaderMap::new();
		headers.insert(name, HeaderValue::from_str(value).unwrap());
		headers
	}

	#[test]
	fn test_header_override_wins_over_route_table() {
		let config = test_config();
		let headers = headers_with("x-priority", "42");
		assert_eq!(priority_for(&config, &headers, "/live"), 42);

		let headers = headers_with("x-weight", "3");
		assert_eq!(weight_for(&config, &headers, "/heavy"), 3);
	}

	#[test]
	fn test_unparseable_header_falls_back_to_route_table() {
		let config = test_config();
		let headers = headers_with("x-priority", "not-a-number");
		assert_eq!(priority_for(&config, &headers, "/live"), 20);

		let headers = headers_with("x-weight", "12.5");
		assert_eq!(weight_for(&config, &headers, "/heavy"), 8);
	}

	#[test]
	fn test_unknown_routes_default_to_minimum_cost() {
		let config = test_config();
		let headers = HeaderMap::new();
		assert_eq!(priority_for(&config, &headers, "/unknown"), 0);
		assert_eq!(weight_for(&config, &headers, "/unknown"), 1);
		assert_eq!(weight_for(&config, &headers, "/zero"), 1);
	}

	#[test]
	fn test_weight_is_capped_at_the_budget() {
		let config = test_config();
		let headers = headers_with("x-weight", "500");
		assert_eq!(weight_for(&config, &headers, "/anything"), 10);
	}

	#[test]
	fn test_request_uri_keeps_the_query() {
		let uri: Uri = "http://example.com/path?a=1&b=2".parse().unwrap();
		assert_eq!(request_uri(&uri), "/path?a=1&b=2");
	}

	#[test]
	fn test_forward_url_appends_uri_to_prefix() {
		let config = test_config();
		assert_eq!(forward_url(&config, "/path?a=1"), "http://localhost:8000/path?a=1");
	}
}

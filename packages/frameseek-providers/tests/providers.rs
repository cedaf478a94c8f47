use reqwest::header::{AUTHORIZATION, HeaderName};
use serde_json::Map;

#[test]
fn builds_bearer_auth_header_with_defaults() {
	let mut defaults = Map::new();

	defaults.insert("x-collection".to_string(), serde_json::json!("hcmc-2024"));

	let headers =
		frameseek_providers::auth_headers("secret", &defaults).expect("Failed to build headers.");
	let value = headers.get(AUTHORIZATION).expect("Missing authorization header.");

	assert_eq!(value, "Bearer secret");
	assert_eq!(
		headers.get(HeaderName::from_static("x-collection")).expect("Missing default header."),
		"hcmc-2024"
	);
}

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use frameseek_config::ObjectFilterProviderConfig;

use crate::{Error, Result};

/// Returns the subset of `ids` whose frames contain every object in `objects`.
pub async fn filter(
	cfg: &ObjectFilterProviderConfig,
	ids: &[String],
	objects: &[String],
) -> Result<Vec<String>> {
	if ids.is_empty() || objects.is_empty() {
		return Ok(ids.to_vec());
	}

	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({ "ids": ids, "objects": objects });
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_object_filter_response(&json)
}

pub fn parse_object_filter_response(json: &Value) -> Result<Vec<String>> {
	let kept = json
		.get("ids")
		.or_else(|| json.get("results"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Object filter response is missing ids array.".to_string(),
		})?;

	kept.iter()
		.map(|item| match item {
			Value::String(raw) => Ok(raw.clone()),
			Value::Number(raw) => Ok(raw.to_string()),
			_ => match item.get("id") {
				Some(Value::String(raw)) => Ok(raw.clone()),
				Some(Value::Number(raw)) => Ok(raw.to_string()),
				_ => Err(Error::InvalidResponse {
					message: "Object filter id must be a string or number.".to_string(),
				}),
			},
		})
		.collect()
}

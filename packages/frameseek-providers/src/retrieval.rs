use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use frameseek_config::RetrievalProviderConfig;
use frameseek_domain::{Candidate, MethodKind, keyframe::parse_keyframe_path};

use crate::{Error, Result};

/// Queries one retrieval backend and returns its raw hits in backend order.
pub async fn retrieve(
	cfg: &RetrievalProviderConfig,
	method: MethodKind,
	query: &str,
	limit: u32,
) -> Result<Vec<Candidate>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({ "method": method.as_str(), "query": query, "limit": limit });
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_retrieval_response(&json, method)
}

pub fn parse_retrieval_response(json: &Value, method: MethodKind) -> Result<Vec<Candidate>> {
	let results = json
		.get("results")
		.or_else(|| json.get("data"))
		.or_else(|| json.get("hits"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Retrieval response is missing results array.".to_string(),
		})?;
	let mut candidates = Vec::with_capacity(results.len());

	for item in results {
		let score = item
			.get("score")
			.and_then(|v| v.as_f64())
			.ok_or_else(|| Error::InvalidResponse {
				message: "Retrieval hit is missing score.".to_string(),
			})? as f32;
		let keyframe_path = item.get("keyframe_path").and_then(|v| v.as_str());
		let Some((video_id, frame_index)) = hit_location(item, keyframe_path) else {
			tracing::warn!(%method, hit = %item, "Skipping retrieval hit without a frame location.");

			continue;
		};
		let id = match item.get("id") {
			Some(Value::String(raw)) => raw.clone(),
			Some(Value::Number(raw)) => raw.to_string(),
			_ => match keyframe_path {
				Some(path) => path.to_string(),
				None => format!("{video_id}/{frame_index}"),
			},
		};

		candidates.push(Candidate { id, video_id, frame_index, raw_score: score, method });
	}

	Ok(candidates)
}

fn hit_location(item: &Value, keyframe_path: Option<&str>) -> Option<(String, u32)> {
	let video_id = item.get("video_id").and_then(|v| v.as_str());
	let frame_index = item
		.get("frame_index")
		.and_then(|v| v.as_u64())
		.and_then(|raw| u32::try_from(raw).ok());

	match (video_id, frame_index) {
		(Some(video_id), Some(frame_index)) => Some((video_id.to_string(), frame_index)),
		_ => keyframe_path.and_then(parse_keyframe_path),
	}
}

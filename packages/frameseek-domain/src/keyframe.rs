/// Splits a keyframe path into `(video_id, frame_index)`.
///
/// Accepts `<video>/<frame>.<ext>` and `<level>/<video>/<frame>.<ext>`, with an optional
/// leading slash, an optional `keyframe/` prefix, and Windows separators.
pub fn parse_keyframe_path(path: &str) -> Option<(String, u32)> {
	let normalized = path.trim().replace('\\', "/");
	let trimmed = normalized.trim_start_matches('/');
	let trimmed = trimmed.strip_prefix("keyframe/").unwrap_or(trimmed);
	let parts: Vec<&str> = trimmed.split('/').filter(|part| !part.is_empty()).collect();

	if parts.len() < 2 {
		return None;
	}

	let video_id = parts[parts.len() - 2];
	let filename = parts[parts.len() - 1];
	let stem = filename.split('.').next()?;
	let frame_index = stem.parse::<u32>().ok()?;

	Some((video_id.to_string(), frame_index))
}

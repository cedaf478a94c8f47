use crate::{
	candidate::{Candidate, NormalizedCandidate},
	method::NormalizationKind,
};

struct ScoreStats {
	mean: f64,
	stddev: f64,
	min: f64,
	max: f64,
}

pub fn normalize(candidates: &[Candidate], kind: NormalizationKind) -> Vec<NormalizedCandidate> {
	let scores: Vec<f32> = candidates.iter().map(|candidate| candidate.raw_score).collect();
	let normalized = normalize_scores(&scores, kind);

	candidates
		.iter()
		.zip(normalized)
		.map(|(candidate, normalized_score)| NormalizedCandidate {
			candidate: candidate.clone(),
			normalized_score,
		})
		.collect()
}

/// Non-finite inputs are excluded from the statistics and mapped to the kind's midpoint.
pub fn normalize_scores(scores: &[f32], kind: NormalizationKind) -> Vec<f32> {
	if scores.is_empty() {
		return Vec::new();
	}

	let midpoint = kind.midpoint();
	let Some(stats) = score_stats(scores) else { return vec![midpoint; scores.len()] };

	scores
		.iter()
		.map(|&score| {
			if !score.is_finite() {
				return midpoint;
			}

			let value = f64::from(score);

			match kind {
				NormalizationKind::ZScore => z_score(value, &stats).map_or(midpoint, |z| z as f32),
				NormalizationKind::MinMax => min_max(value, &stats).map_or(midpoint, |v| v as f32),
				NormalizationKind::ZScoreSigmoid =>
					z_score(value, &stats).map_or(midpoint, |z| sigmoid(z) as f32),
			}
		})
		.collect()
}

/// Rescales an already fused score list into [0, 1]; a flat list maps to the midpoint.
pub fn rescale_unit(scores: &[f32]) -> Vec<f32> {
	normalize_scores(scores, NormalizationKind::MinMax)
}

pub fn sigmoid(value: f64) -> f64 {
	1.0 / (1.0 + (-value).exp())
}

fn score_stats(scores: &[f32]) -> Option<ScoreStats> {
	let finite: Vec<f64> =
		scores.iter().copied().filter(|score| score.is_finite()).map(f64::from).collect();

	if finite.is_empty() {
		return None;
	}

	let count = finite.len() as f64;
	let mean = finite.iter().sum::<f64>() / count;
	let variance = finite.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / count;
	let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
	let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);

	Some(ScoreStats { mean, stddev: variance.sqrt(), min, max })
}

fn z_score(value: f64, stats: &ScoreStats) -> Option<f64> {
	if stats.stddev <= 1e-12 * stats.mean.abs().max(1.0) {
		return None;
	}

	Some((value - stats.mean) / stats.stddev)
}

fn min_max(value: f64, stats: &ScoreStats) -> Option<f64> {
	let range = stats.max - stats.min;

	if range <= 0.0 {
		return None;
	}

	Some(((value - stats.min) / range).clamp(0.0, 1.0))
}

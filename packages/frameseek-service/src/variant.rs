use std::collections::HashMap;

use frameseek_domain::{ScoredCandidate, sort_ranked};

/// Divisor used when averaging a candidate's score across query variants.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VariantAveraging {
	/// Mean over the variants that returned the candidate.
	Appearances,
	/// Mean over every variant that ran, counting absences as zero.
	Configured,
}
impl VariantAveraging {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim() {
			"appearances" => Some(Self::Appearances),
			"configured" => Some(Self::Configured),
			_ => None,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Appearances => "appearances",
			Self::Configured => "configured",
		}
	}
}

struct VariantScore {
	candidate: ScoredCandidate,
	sum: f32,
	appearances: u32,
}

/// Averages the method-ensembled lists of one stage's variants and keeps the best `top_k`.
pub fn ensemble_variants(
	per_variant: &[Vec<ScoredCandidate>],
	averaging: VariantAveraging,
	top_k: usize,
) -> Vec<ScoredCandidate> {
	let mut merged: Vec<VariantScore> = Vec::new();
	let mut index: HashMap<&str, usize> = HashMap::new();

	for ranked in per_variant {
		let mut best_in_variant: HashMap<&str, f32> = HashMap::new();

		for item in ranked {
			best_in_variant
				.entry(item.id.as_str())
				.and_modify(|best| *best = best.max(item.score))
				.or_insert(item.score);

			if !index.contains_key(item.id.as_str()) {
				index.insert(item.id.as_str(), merged.len());
				merged.push(VariantScore { candidate: item.clone(), sum: 0.0, appearances: 0 });
			}
		}

		for (id, score) in best_in_variant {
			if let Some(&at) = index.get(id) {
				merged[at].sum += score;
				merged[at].appearances += 1;
			}
		}
	}

	let configured = per_variant.len().max(1) as f32;
	let mut out: Vec<ScoredCandidate> = merged
		.into_iter()
		.map(|entry| {
			let divisor = match averaging {
				VariantAveraging::Appearances => entry.appearances.max(1) as f32,
				VariantAveraging::Configured => configured,
			};

			ScoredCandidate { score: entry.sum / divisor, ..entry.candidate }
		})
		.collect();

	sort_ranked(&mut out);
	out.truncate(top_k);

	out
}

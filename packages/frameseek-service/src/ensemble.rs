use std::collections::{BTreeMap, HashMap};

use frameseek_domain::{
	Family, MethodKind, NormalizedCandidate, ScoredCandidate, normalize::rescale_unit, sort_ranked,
};

/// Immutable fusion weights, built once from configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct EnsembleWeights {
	pub clip: f32,
	pub beit3: f32,
	pub bigg: f32,
	/// Explicit family weights. Equal share across enabled families when absent.
	pub families: Option<FamilyShares>,
}
impl EnsembleWeights {
	pub fn from_config(cfg: &frameseek_config::Ensemble) -> Self {
		Self {
			clip: cfg.multimodal.clip,
			beit3: cfg.multimodal.beit3,
			bigg: cfg.multimodal.bigg,
			families: cfg.families.as_ref().map(|families| FamilyShares {
				multimodal: families.multimodal,
				caption: families.caption,
				asr: families.asr,
				ocr: families.ocr,
			}),
		}
	}

	pub fn multimodal_weight(&self, method: MethodKind) -> f32 {
		match method {
			MethodKind::Clip => self.clip,
			MethodKind::Beit3 => self.beit3,
			MethodKind::Bigg => self.bigg,
			MethodKind::Caption | MethodKind::Asr | MethodKind::Ocr => 0.0,
		}
	}

	/// Per-family combination weights over the enabled families, summing to one.
	pub fn family_shares(&self, enabled: &[Family]) -> Vec<(Family, f32)> {
		if enabled.is_empty() {
			return Vec::new();
		}

		let equal = 1.0 / enabled.len() as f32;
		let Some(explicit) = self.families.as_ref() else {
			return enabled.iter().map(|family| (*family, equal)).collect();
		};
		let total: f32 = enabled.iter().map(|family| explicit.get(*family)).sum();

		if !total.is_finite() || total <= 0.0 {
			return enabled.iter().map(|family| (*family, equal)).collect();
		}

		enabled.iter().map(|family| (*family, explicit.get(*family) / total)).collect()
	}
}
impl Default for EnsembleWeights {
	fn default() -> Self {
		Self { clip: 0.25, beit3: 0.50, bigg: 0.25, families: None }
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct FamilyShares {
	pub multimodal: f32,
	pub caption: f32,
	pub asr: f32,
	pub ocr: f32,
}
impl FamilyShares {
	pub fn get(&self, family: Family) -> f32 {
		match family {
			Family::Multimodal => self.multimodal,
			Family::Caption => self.caption,
			Family::Asr => self.asr,
			Family::Ocr => self.ocr,
		}
	}
}

struct Accumulated {
	video_id: String,
	frame_index: u32,
	score: f32,
}

/// Fuses the normalized lists of one query variant into a single ranked list of at most `top_k`.
///
/// Families not listed in `enabled` are ignored even when `per_method` carries hits for them.
/// A candidate missing from a family contributes nothing for that family.
pub fn ensemble_methods(
	per_method: &BTreeMap<MethodKind, Vec<NormalizedCandidate>>,
	enabled: &[Family],
	weights: &EnsembleWeights,
	top_k: usize,
) -> Vec<ScoredCandidate> {
	let lists = family_lists(per_method, weights, top_k);
	let mut merged: HashMap<String, Accumulated> = HashMap::new();
	let mut order = Vec::new();

	for (family, share) in weights.family_shares(enabled) {
		let Some(list) = lists.get(&family) else { continue };

		for item in list {
			let entry = merged.entry(item.id.clone()).or_insert_with(|| {
				order.push(item.id.clone());

				Accumulated {
					video_id: item.video_id.clone(),
					frame_index: item.frame_index,
					score: 0.0,
				}
			});

			entry.score += share * item.score;
		}
	}

	let mut out: Vec<ScoredCandidate> = order
		.into_iter()
		.filter_map(|id| {
			let acc = merged.remove(&id)?;

			Some(ScoredCandidate {
				id,
				video_id: acc.video_id,
				frame_index: acc.frame_index,
				score: acc.score,
			})
		})
		.collect();

	sort_ranked(&mut out);
	out.truncate(top_k);

	out
}

/// Collapses per-method lists into one list per family, each cut to `top_k`.
///
/// The multimodal sub-methods are summed with their fixed weights, the fused ranking is cut to
/// `top_k`, and only the kept entries are rescaled into [0, 1]. Every other family passes its
/// single normalized list through.
pub fn family_lists(
	per_method: &BTreeMap<MethodKind, Vec<NormalizedCandidate>>,
	weights: &EnsembleWeights,
	top_k: usize,
) -> BTreeMap<Family, Vec<ScoredCandidate>> {
	let mut out = BTreeMap::new();
	let multimodal: Vec<(f32, &[NormalizedCandidate])> = Family::Multimodal
		.methods()
		.iter()
		.filter_map(|method| {
			per_method.get(method).map(|list| (weights.multimodal_weight(*method), list.as_slice()))
		})
		.collect();

	if !multimodal.is_empty() {
		out.insert(Family::Multimodal, fuse_multimodal(&multimodal, top_k));
	}

	for family in [Family::Caption, Family::Asr, Family::Ocr] {
		let mut best: Vec<ScoredCandidate> = Vec::new();
		let mut index: HashMap<&str, usize> = HashMap::new();
		let mut present = false;

		for method in family.methods() {
			let Some(list) = per_method.get(method) else { continue };

			present = true;

			for item in list {
				match index.get(item.id()) {
					Some(&at) =>
						if item.normalized_score > best[at].score {
							best[at].score = item.normalized_score;
						},
					None => {
						index.insert(item.id(), best.len());
						best.push(item.to_scored());
					},
				}
			}
		}

		if present {
			sort_ranked(&mut best);
			best.truncate(top_k);
			out.insert(family, best);
		}
	}

	out
}

fn fuse_multimodal(lists: &[(f32, &[NormalizedCandidate])], top_k: usize) -> Vec<ScoredCandidate> {
	let mut merged: Vec<ScoredCandidate> = Vec::new();
	let mut index: HashMap<&str, usize> = HashMap::new();

	for (weight, list) in lists {
		let mut seen: HashMap<&str, f32> = HashMap::new();

		for item in *list {
			let score = item.normalized_score;

			seen.entry(item.id())
				.and_modify(|best| *best = best.max(score))
				.or_insert(score);

			if !index.contains_key(item.id()) {
				index.insert(item.id(), merged.len());
				merged.push(ScoredCandidate { score: 0.0, ..item.to_scored() });
			}
		}

		for (id, score) in seen {
			if let Some(&at) = index.get(id) {
				merged[at].score += weight * score;
			}
		}
	}

	sort_ranked(&mut merged);
	merged.truncate(top_k);

	let rescaled = rescale_unit(&merged.iter().map(|item| item.score).collect::<Vec<_>>());

	for (item, score) in merged.iter_mut().zip(rescaled) {
		item.score = score;
	}

	merged
}

#[cfg(test)]
mod tests {
	use frameseek_domain::Candidate;

	use super::*;

	fn normalized(method: MethodKind, id: &str, score: f32) -> NormalizedCandidate {
		NormalizedCandidate {
			candidate: Candidate {
				id: id.to_string(),
				video_id: "V1".to_string(),
				frame_index: 0,
				raw_score: score,
				method,
			},
			normalized_score: score,
		}
	}

	fn ids(items: &[ScoredCandidate]) -> Vec<&str> {
		items.iter().map(|item| item.id.as_str()).collect()
	}

	#[test]
	fn multimodal_sub_methods_use_fixed_weights_before_rescaling() {
		let mut per_method = BTreeMap::new();

		per_method.insert(MethodKind::Clip, vec![normalized(MethodKind::Clip, "a", 1.0)]);
		per_method.insert(
			MethodKind::Beit3,
			vec![normalized(MethodKind::Beit3, "b", 1.0), normalized(MethodKind::Beit3, "a", -1.0)],
		);
		per_method.insert(MethodKind::Bigg, vec![normalized(MethodKind::Bigg, "c", 1.0)]);

		let lists = family_lists(&per_method, &EnsembleWeights::default(), 10);
		let fused = &lists[&Family::Multimodal];

		// a = 0.25 - 0.50, b = 0.50, c = 0.25; rescaled over [-0.25, 0.50].
		assert_eq!(ids(fused), vec!["b", "c", "a"]);
		assert!((fused[0].score - 1.0).abs() < 1e-6);
		assert!((fused[1].score - 2.0 / 3.0).abs() < 1e-6);
		assert!(fused[2].score.abs() < 1e-6);
	}

	#[test]
	fn enabled_families_share_equally_and_union_ids() {
		let mut per_method = BTreeMap::new();

		per_method.insert(MethodKind::Caption, vec![normalized(MethodKind::Caption, "a", 1.0)]);
		per_method.insert(MethodKind::Asr, vec![normalized(MethodKind::Asr, "b", 0.6)]);

		let out = ensemble_methods(
			&per_method,
			&[Family::Caption, Family::Asr],
			&EnsembleWeights::default(),
			10,
		);

		assert_eq!(ids(&out), vec!["a", "b"]);
		assert!((out[0].score - 0.5).abs() < 1e-6);
		assert!((out[1].score - 0.3).abs() < 1e-6);
	}

	#[test]
	fn disabled_families_are_ignored() {
		let mut per_method = BTreeMap::new();

		per_method.insert(MethodKind::Caption, vec![normalized(MethodKind::Caption, "a", 0.9)]);
		per_method.insert(MethodKind::Ocr, vec![normalized(MethodKind::Ocr, "z", 1.0)]);

		let out =
			ensemble_methods(&per_method, &[Family::Caption], &EnsembleWeights::default(), 10);

		assert_eq!(ids(&out), vec!["a"]);
		assert!((out[0].score - 0.9).abs() < 1e-6);
	}

	#[test]
	fn explicit_family_weights_are_renormalized_over_enabled_families() {
		let weights = EnsembleWeights {
			families: Some(FamilyShares { multimodal: 3.0, caption: 1.0, asr: 0.0, ocr: 6.0 }),
			..EnsembleWeights::default()
		};
		let shares = weights.family_shares(&[Family::Multimodal, Family::Caption]);

		assert_eq!(shares, vec![(Family::Multimodal, 0.75), (Family::Caption, 0.25)]);

		let zero = weights.family_shares(&[Family::Asr]);

		assert_eq!(zero, vec![(Family::Asr, 1.0)]);
	}

	#[test]
	fn ties_break_by_ascending_id() {
		let mut per_method = BTreeMap::new();

		per_method.insert(
			MethodKind::Caption,
			vec![
				normalized(MethodKind::Caption, "m", 0.4),
				normalized(MethodKind::Caption, "k", 0.4),
			],
		);

		let out =
			ensemble_methods(&per_method, &[Family::Caption], &EnsembleWeights::default(), 10);

		assert_eq!(ids(&out), vec!["k", "m"]);
	}

	#[test]
	fn duplicate_ids_within_a_method_keep_the_best_score() {
		let mut per_method = BTreeMap::new();

		per_method.insert(
			MethodKind::Asr,
			vec![normalized(MethodKind::Asr, "a", 0.2), normalized(MethodKind::Asr, "a", 0.7)],
		);

		let out = ensemble_methods(&per_method, &[Family::Asr], &EnsembleWeights::default(), 10);

		assert_eq!(out.len(), 1);
		assert!((out[0].score - 0.7).abs() < 1e-6);
	}

	#[test]
	fn multimodal_ranking_is_cut_to_top_k_before_rescaling() {
		let mut per_method = BTreeMap::new();

		per_method.insert(
			MethodKind::Beit3,
			vec![
				normalized(MethodKind::Beit3, "a", 0.9),
				normalized(MethodKind::Beit3, "c", 0.5),
				normalized(MethodKind::Beit3, "b", 0.1),
			],
		);
		per_method.insert(
			MethodKind::Caption,
			vec![
				normalized(MethodKind::Caption, "d", 0.4),
				normalized(MethodKind::Caption, "e", 0.0),
			],
		);

		let lists = family_lists(&per_method, &EnsembleWeights::default(), 2);
		let fused = &lists[&Family::Multimodal];

		// Only a and c survive the cut, so c lands on the bottom of the rescaled range.
		assert_eq!(ids(fused), vec!["a", "c"]);
		assert!((fused[0].score - 1.0).abs() < 1e-6);
		assert!(fused[1].score.abs() < 1e-6);

		let out = ensemble_methods(
			&per_method,
			&[Family::Multimodal, Family::Caption],
			&EnsembleWeights::default(),
			2,
		);

		// a = 0.5, d = 0.2, c = 0.0.
		assert_eq!(ids(&out), vec!["a", "d"]);
		assert!((out[0].score - 0.5).abs() < 1e-6);
		assert!((out[1].score - 0.2).abs() < 1e-6);
	}
}

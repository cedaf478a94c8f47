use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};

use crate::method::MethodKind;

/// A raw hit returned by one retrieval backend.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Candidate {
	pub id: String,
	pub video_id: String,
	pub frame_index: u32,
	pub raw_score: f32,
	pub method: MethodKind,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedCandidate {
	pub candidate: Candidate,
	pub normalized_score: f32,
}
impl NormalizedCandidate {
	pub fn id(&self) -> &str {
		&self.candidate.id
	}

	pub fn to_scored(&self) -> ScoredCandidate {
		ScoredCandidate {
			id: self.candidate.id.clone(),
			video_id: self.candidate.video_id.clone(),
			frame_index: self.candidate.frame_index,
			score: self.normalized_score,
		}
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ScoredCandidate {
	pub id: String,
	pub video_id: String,
	pub frame_index: u32,
	pub score: f32,
}

/// Query variant index. `Q0` is the stage's original query; later variants are paraphrases.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct VariantId(pub u8);
impl VariantId {
	pub const ORIGINAL: Self = Self(0);

	pub fn is_original(self) -> bool {
		self.0 == 0
	}
}
impl fmt::Display for VariantId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Q{}", self.0)
	}
}

/// Descending order with NaN sorted last.
pub fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}

/// Sorts by score descending, then by id ascending.
pub fn sort_ranked(items: &mut [ScoredCandidate]) {
	items.sort_by(|left, right| {
		cmp_f32_desc(left.score, right.score).then_with(|| left.id.cmp(&right.id))
	});
}

pub mod candidate;
pub mod keyframe;
pub mod method;
pub mod normalize;

pub use candidate::{
	Candidate, NormalizedCandidate, ScoredCandidate, VariantId, cmp_f32_desc, sort_ranked,
};
pub use method::{Family, MethodKind, NormalizationKind};

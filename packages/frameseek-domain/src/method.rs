use std::fmt;

use serde::{Deserialize, Serialize};

/// A single retrieval backend.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
	Clip,
	Beit3,
	Bigg,
	Caption,
	Asr,
	Ocr,
}
impl MethodKind {
	pub const ALL: [Self; 6] =
		[Self::Clip, Self::Beit3, Self::Bigg, Self::Caption, Self::Asr, Self::Ocr];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Clip => "clip",
			Self::Beit3 => "beit3",
			Self::Bigg => "bigg",
			Self::Caption => "caption",
			Self::Asr => "asr",
			Self::Ocr => "ocr",
		}
	}

	pub fn family(self) -> Family {
		match self {
			Self::Clip | Self::Beit3 | Self::Bigg => Family::Multimodal,
			Self::Caption => Family::Caption,
			Self::Asr => Family::Asr,
			Self::Ocr => Family::Ocr,
		}
	}

	pub fn normalization(self) -> NormalizationKind {
		match self {
			Self::Clip | Self::Beit3 | Self::Bigg => NormalizationKind::ZScore,
			Self::Caption => NormalizationKind::MinMax,
			Self::Asr | Self::Ocr => NormalizationKind::ZScoreSigmoid,
		}
	}

	/// Text methods score against the OCR query text when a stage provides one.
	pub fn uses_ocr_text(self) -> bool {
		matches!(self, Self::Ocr)
	}
}
impl fmt::Display for MethodKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A group of methods that is toggled on or off as a unit for a stage.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
	#[serde(alias = "multiModal")]
	Multimodal,
	#[serde(alias = "ic")]
	Caption,
	Asr,
	Ocr,
}
impl Family {
	pub const ALL: [Self; 4] = [Self::Multimodal, Self::Caption, Self::Asr, Self::Ocr];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Multimodal => "multimodal",
			Self::Caption => "caption",
			Self::Asr => "asr",
			Self::Ocr => "ocr",
		}
	}

	pub fn methods(self) -> &'static [MethodKind] {
		match self {
			Self::Multimodal => &[MethodKind::Clip, MethodKind::Beit3, MethodKind::Bigg],
			Self::Caption => &[MethodKind::Caption],
			Self::Asr => &[MethodKind::Asr],
			Self::Ocr => &[MethodKind::Ocr],
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim() {
			"multimodal" | "multiModal" => Some(Self::Multimodal),
			"caption" | "ic" => Some(Self::Caption),
			"asr" => Some(Self::Asr),
			"ocr" => Some(Self::Ocr),
			_ => None,
		}
	}
}
impl fmt::Display for Family {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NormalizationKind {
	ZScore,
	MinMax,
	ZScoreSigmoid,
}
impl NormalizationKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::ZScore => "z_score",
			Self::MinMax => "min_max",
			Self::ZScoreSigmoid => "z_score_sigmoid",
		}
	}

	/// Value assigned when the score set is degenerate or a raw score is not finite.
	pub fn midpoint(self) -> f32 {
		match self {
			Self::ZScore => 0.0,
			Self::MinMax | Self::ZScoreSigmoid => 0.5,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_method_belongs_to_the_family_listing_it() {
		for method in MethodKind::ALL {
			assert!(method.family().methods().contains(&method), "{method} is not listed.");
		}
	}

	#[test]
	fn family_parse_accepts_toggle_aliases() {
		assert_eq!(Family::parse("multiModal"), Some(Family::Multimodal));
		assert_eq!(Family::parse("ic"), Some(Family::Caption));
		assert_eq!(Family::parse(" ocr "), Some(Family::Ocr));
		assert_eq!(Family::parse("object"), None);
	}

	#[test]
	fn text_methods_use_sigmoid_normalization() {
		assert_eq!(MethodKind::Asr.normalization(), NormalizationKind::ZScoreSigmoid);
		assert_eq!(MethodKind::Ocr.normalization(), NormalizationKind::ZScoreSigmoid);
		assert_eq!(MethodKind::Caption.normalization(), NormalizationKind::MinMax);
		assert_eq!(MethodKind::Beit3.normalization(), NormalizationKind::ZScore);
	}
}

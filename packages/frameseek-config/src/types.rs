use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	#[serde(default)]
	pub search: Search,
	#[serde(default)]
	pub ensemble: Ensemble,
	#[serde(default)]
	pub stage: Stage,
	#[serde(default)]
	pub temporal: Temporal,
	pub providers: Providers,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Search {
	pub default_top_k: u32,
	pub max_top_k: u32,
	/// Multimodal sub-methods fetch `top_k * candidate_multiplier` hits before fusion.
	pub candidate_multiplier: u32,
	pub max_variants: u32,
}
impl Default for Search {
	fn default() -> Self {
		Self { default_top_k: 10, max_top_k: 100, candidate_multiplier: 2, max_variants: 3 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Ensemble {
	/// One of "appearances" or "configured".
	pub variant_averaging: String,
	pub multimodal: MultimodalWeights,
	/// Optional. Equal share across enabled families when absent.
	pub families: Option<FamilyWeights>,
}
impl Default for Ensemble {
	fn default() -> Self {
		Self {
			variant_averaging: "appearances".to_string(),
			multimodal: MultimodalWeights::default(),
			families: None,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MultimodalWeights {
	pub clip: f32,
	pub beit3: f32,
	pub bigg: f32,
}
impl Default for MultimodalWeights {
	fn default() -> Self {
		Self { clip: 0.25, beit3: 0.50, bigg: 0.25 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FamilyWeights {
	pub multimodal: f32,
	pub caption: f32,
	pub asr: f32,
	pub ocr: f32,
}
impl Default for FamilyWeights {
	fn default() -> Self {
		Self { multimodal: 1.0, caption: 1.0, asr: 1.0, ocr: 1.0 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Stage {
	pub worker_pool_size: u32,
	pub backend_timeout_ms: u64,
	pub request_timeout_ms: u64,
}
impl Default for Stage {
	fn default() -> Self {
		Self { worker_pool_size: 20, backend_timeout_ms: 10_000, request_timeout_ms: 30_000 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Temporal {
	pub tuple_cap: u32,
}
impl Default for Temporal {
	fn default() -> Self {
		Self { tuple_cap: 200 }
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub retrieval: RetrievalProviderConfig,
	/// Optional. Stages that select objects keep their unfiltered results when absent.
	pub object_filter: Option<ObjectFilterProviderConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RetrievalProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ObjectFilterProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

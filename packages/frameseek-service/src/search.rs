use std::{collections::HashSet, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use frameseek_config::Config;
use frameseek_domain::Family;

use crate::{
	Error, FrameseekService, Result,
	ensemble::EnsembleWeights,
	stage::{StageOutput, StagePlan, StageSettings},
	temporal::{self, IdAggregateRecord, SequenceTuple, StageRanking},
	variant::VariantAveraging,
};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultMode {
	/// Final per-stage list only.
	#[default]
	Ensemble,
	/// Also each variant's method-ensembled list.
	All,
	/// Also the original query's per-family lists.
	PerMethod,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalMode {
	Id,
	Tuple,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SearchRequest {
	pub stages: Vec<StageRequest>,
	pub top_k: Option<u32>,
	#[serde(default)]
	pub result_mode: ResultMode,
	pub temporal_mode: Option<TemporalMode>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StageRequest {
	pub stage_id: u32,
	pub stage_name: Option<String>,
	pub variants: Vec<String>,
	pub ocr_text: Option<String>,
	#[serde(default)]
	pub enabled_methods: Vec<String>,
	/// Object labels every returned frame must contain.
	pub selected_objects: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchResponse {
	pub request_id: Uuid,
	pub policy_id: String,
	pub top_k: u32,
	pub stages: Vec<StageOutput>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temporal: Option<TemporalAggregation>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TemporalAggregation {
	Id {
		results: Vec<IdAggregateRecord>,
		#[serde(skip_serializing_if = "Option::is_none")]
		empty_state: Option<String>,
	},
	Tuple {
		tuples: Vec<SequenceTuple>,
		#[serde(skip_serializing_if = "Option::is_none")]
		empty_state: Option<String>,
	},
}
impl TemporalAggregation {
	pub fn is_empty(&self) -> bool {
		match self {
			Self::Id { results, .. } => results.is_empty(),
			Self::Tuple { tuples, .. } => tuples.is_empty(),
		}
	}
}

impl FrameseekService {
	pub async fn search(&self, req: SearchRequest) -> Result<SearchResponse> {
		self.search_with_cancel(req, &CancellationToken::new()).await
	}

	/// Cancelling `cancel` aborts every in-flight backend call and returns `Error::Cancelled`.
	pub async fn search_with_cancel(
		&self,
		req: SearchRequest,
		cancel: &CancellationToken,
	) -> Result<SearchResponse> {
		let plans = validate_request(&self.cfg, &req)?;
		let top_k = resolve_top_k(&self.cfg, req.top_k)?;
		let averaging =
			VariantAveraging::parse(&self.cfg.ensemble.variant_averaging).ok_or_else(|| {
				Error::InvalidRequest {
					message: "ensemble.variant_averaging is not a known mode.".to_string(),
				}
			})?;
		let settings = StageSettings {
			top_k,
			candidate_multiplier: self.cfg.search.candidate_multiplier,
			backend_timeout: Duration::from_millis(self.cfg.stage.backend_timeout_ms),
			request_timeout: Duration::from_millis(self.cfg.stage.request_timeout_ms),
			weights: EnsembleWeights::from_config(&self.cfg.ensemble),
			averaging,
			result_mode: req.result_mode,
		};
		let request_id = Uuid::new_v4();
		let policy_id = hash_policy_snapshot(&build_policy_snapshot(&self.cfg, &settings))?;

		tracing::info!(
			%request_id,
			stages = plans.len(),
			top_k,
			temporal_mode = ?req.temporal_mode,
			"Starting multi-stage search."
		);

		let stages = self.run_stages(&plans, &settings, cancel).await?;

		if cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}

		let temporal = match req.temporal_mode {
			Some(mode) => Some(aggregate(mode, &stages, self.cfg.temporal.tuple_cap as usize)?),
			None => None,
		};

		Ok(SearchResponse { request_id, policy_id, top_k, stages, temporal })
	}
}

pub fn validate_request(cfg: &Config, req: &SearchRequest) -> Result<Vec<StagePlan>> {
	if req.stages.is_empty() {
		return Err(Error::InvalidRequest {
			message: "At least one stage is required.".to_string(),
		});
	}
	if req.temporal_mode.is_some() && req.stages.len() < 2 {
		return Err(Error::InvalidRequest {
			message: "Temporal aggregation requires at least two stages.".to_string(),
		});
	}

	let mut seen = HashSet::new();
	let mut plans = Vec::with_capacity(req.stages.len());

	for stage in &req.stages {
		if !seen.insert(stage.stage_id) {
			return Err(Error::InvalidRequest {
				message: format!("Duplicate stage_id {}.", stage.stage_id),
			});
		}

		let variants: Vec<String> = stage
			.variants
			.iter()
			.map(|text| text.trim())
			.filter(|text| !text.is_empty())
			.map(str::to_string)
			.collect();

		if variants.is_empty() {
			return Err(Error::InvalidRequest {
				message: format!(
					"Stage {} must include at least one query variant.",
					stage.stage_id
				),
			});
		}

		let max_variants = cfg.search.max_variants.min(frameseek_config::MAX_VARIANTS_LIMIT);

		if variants.len() > max_variants as usize {
			return Err(Error::InvalidRequest {
				message: format!(
					"Stage {} has {} variants; at most {max_variants} are allowed.",
					stage.stage_id,
					variants.len(),
				),
			});
		}

		let mut families = Vec::new();

		for raw in &stage.enabled_methods {
			let Some(family) = Family::parse(raw) else {
				return Err(Error::InvalidRequest {
					message: format!("Stage {} names unknown method {raw:?}.", stage.stage_id),
				});
			};

			if !families.contains(&family) {
				families.push(family);
			}
		}

		let stage_name = stage
			.stage_name
			.as_deref()
			.map(str::trim)
			.filter(|name| !name.is_empty())
			.map(str::to_string)
			.unwrap_or_else(|| format!("Stage {}", stage.stage_id));
		let mut selected_objects: Vec<String> = Vec::new();

		for object in stage.selected_objects.iter().flatten().map(|object| object.trim()) {
			if !object.is_empty() && !selected_objects.iter().any(|seen| seen == object) {
				selected_objects.push(object.to_string());
			}
		}

		plans.push(StagePlan {
			stage_id: stage.stage_id,
			stage_name,
			variants,
			ocr_text: stage.ocr_text.clone(),
			families,
			selected_objects,
		});
	}

	Ok(plans)
}

/// Applies the configured default and clamps to `search.max_top_k`.
pub fn resolve_top_k(cfg: &Config, requested: Option<u32>) -> Result<u32> {
	match requested {
		Some(0) => Err(Error::InvalidRequest {
			message: "top_k must be greater than zero.".to_string(),
		}),
		Some(top_k) => Ok(top_k.min(cfg.search.max_top_k)),
		None => Ok(cfg.search.default_top_k.min(cfg.search.max_top_k)),
	}
}

pub fn build_policy_snapshot(cfg: &Config, settings: &StageSettings) -> Value {
	let weights = &settings.weights;

	serde_json::json!({
		"multimodal": {
			"clip": weights.clip,
			"beit3": weights.beit3,
			"bigg": weights.bigg,
		},
		"families": weights.families.as_ref().map(|families| {
			serde_json::json!({
				"multimodal": families.multimodal,
				"caption": families.caption,
				"asr": families.asr,
				"ocr": families.ocr,
			})
		}),
		"variant_averaging": settings.averaging.as_str(),
		"candidate_multiplier": settings.candidate_multiplier,
		"tuple_cap": cfg.temporal.tuple_cap,
	})
}

pub fn hash_policy_snapshot(payload: &Value) -> Result<String> {
	let raw = serde_json::to_vec(payload).map_err(|err| Error::InvalidRequest {
		message: format!("Failed to encode policy snapshot: {err}"),
	})?;

	Ok(blake3::hash(&raw).to_hex().to_string())
}

fn aggregate(
	mode: TemporalMode,
	stages: &[StageOutput],
	cap: usize,
) -> Result<TemporalAggregation> {
	let rankings: Vec<StageRanking> = stages
		.iter()
		.map(|stage| StageRanking { stage_id: stage.stage_id, ranked: stage.results.clone() })
		.collect();

	if let Some(failed) = stages.iter().find(|stage| stage.failed()) {
		tracing::warn!(
			stage_id = failed.stage_id,
			"Aggregating with a failed stage; it contributes no candidates."
		);
	}

	let aggregation = match mode {
		TemporalMode::Id => {
			let results = temporal::aggregate_by_id(&rankings)?;
			let empty_state = results.is_empty().then(|| temporal::EMPTY_AGGREGATION.to_string());

			TemporalAggregation::Id { results, empty_state }
		},
		TemporalMode::Tuple => {
			let tuples = temporal::aggregate_tuples(&rankings, cap)?;
			let empty_state = tuples.is_empty().then(|| temporal::EMPTY_SEQUENCES.to_string());

			TemporalAggregation::Tuple { tuples, empty_state }
		},
	};

	tracing::info!(mode = ?mode, empty = aggregation.is_empty(), "Temporal aggregation completed.");

	Ok(aggregation)
}

mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, Ensemble, FamilyWeights, MultimodalWeights, ObjectFilterProviderConfig, Providers,
	RetrievalProviderConfig, Search, Service, Stage, Temporal,
};

use std::{fs, path::Path};

pub const VARIANT_AVERAGING_MODES: [&str; 2] = ["appearances", "configured"];
pub const MAX_VARIANTS_LIMIT: u32 = 255;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}
	if cfg.search.max_top_k == 0 {
		return Err(Error::Validation {
			message: "search.max_top_k must be greater than zero.".to_string(),
		});
	}
	if cfg.search.default_top_k == 0 || cfg.search.default_top_k > cfg.search.max_top_k {
		return Err(Error::Validation {
			message: "search.default_top_k must be in the range 1-search.max_top_k.".to_string(),
		});
	}
	if cfg.search.candidate_multiplier == 0 {
		return Err(Error::Validation {
			message: "search.candidate_multiplier must be greater than zero.".to_string(),
		});
	}
	if cfg.search.max_variants == 0 || cfg.search.max_variants > MAX_VARIANTS_LIMIT {
		return Err(Error::Validation {
			message: format!("search.max_variants must be in the range 1-{MAX_VARIANTS_LIMIT}."),
		});
	}
	if !VARIANT_AVERAGING_MODES.contains(&cfg.ensemble.variant_averaging.as_str()) {
		return Err(Error::Validation {
			message: "ensemble.variant_averaging must be one of appearances or configured."
				.to_string(),
		});
	}

	let multimodal = &cfg.ensemble.multimodal;

	for (label, weight) in [
		("ensemble.multimodal.clip", multimodal.clip),
		("ensemble.multimodal.beit3", multimodal.beit3),
		("ensemble.multimodal.bigg", multimodal.bigg),
	] {
		validate_weight(label, weight)?;
	}

	if multimodal.clip + multimodal.beit3 + multimodal.bigg <= 0.0 {
		return Err(Error::Validation {
			message: "ensemble.multimodal weights must sum to a value greater than zero."
				.to_string(),
		});
	}

	if let Some(families) = cfg.ensemble.families.as_ref() {
		for (label, weight) in [
			("ensemble.families.multimodal", families.multimodal),
			("ensemble.families.caption", families.caption),
			("ensemble.families.asr", families.asr),
			("ensemble.families.ocr", families.ocr),
		] {
			validate_weight(label, weight)?;
		}
	}

	if cfg.stage.worker_pool_size == 0 {
		return Err(Error::Validation {
			message: "stage.worker_pool_size must be greater than zero.".to_string(),
		});
	}
	if cfg.stage.backend_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "stage.backend_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.stage.request_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "stage.request_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.temporal.tuple_cap == 0 {
		return Err(Error::Validation {
			message: "temporal.tuple_cap must be greater than zero.".to_string(),
		});
	}

	let retrieval = &cfg.providers.retrieval;

	for (label, value) in [
		("providers.retrieval.provider_id", &retrieval.provider_id),
		("providers.retrieval.api_base", &retrieval.api_base),
		("providers.retrieval.path", &retrieval.path),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if retrieval.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "providers.retrieval.timeout_ms must be greater than zero.".to_string(),
		});
	}

	if let Some(object_filter) = cfg.providers.object_filter.as_ref() {
		for (label, value) in [
			("providers.object_filter.provider_id", &object_filter.provider_id),
			("providers.object_filter.api_base", &object_filter.api_base),
			("providers.object_filter.path", &object_filter.path),
		] {
			if value.trim().is_empty() {
				return Err(Error::Validation { message: format!("{label} must be non-empty.") });
			}
		}

		if object_filter.timeout_ms == 0 {
			return Err(Error::Validation {
				message: "providers.object_filter.timeout_ms must be greater than zero."
					.to_string(),
			});
		}
	}

	Ok(())
}

fn validate_weight(label: &str, weight: f32) -> Result<()> {
	if !weight.is_finite() {
		return Err(Error::Validation { message: format!("{label} must be a finite number.") });
	}
	if weight < 0.0 {
		return Err(Error::Validation { message: format!("{label} must be zero or greater.") });
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	let mode = cfg.ensemble.variant_averaging.trim().to_ascii_lowercase();

	cfg.ensemble.variant_averaging = mode;

	if cfg.service.log_level.trim().is_empty() {
		cfg.service.log_level = "info".to_string();
	}

	let api_base = cfg.providers.retrieval.api_base.trim().trim_end_matches('/').to_string();

	cfg.providers.retrieval.api_base = api_base;

	if let Some(object_filter) = cfg.providers.object_filter.as_mut() {
		object_filter.api_base = object_filter.api_base.trim().trim_end_matches('/').to_string();
	}
}

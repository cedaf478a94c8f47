use std::{
	collections::{BTreeMap, HashMap, HashSet},
	sync::Arc,
	time::{Duration, Instant},
};

use serde::Serialize;
use tokio::{
	sync::Semaphore,
	task::{Id, JoinSet},
	time,
};
use tokio_util::sync::CancellationToken;

use frameseek_config::Config;
use frameseek_domain::{
	Family, MethodKind, NormalizedCandidate, ScoredCandidate, VariantId, normalize::normalize,
};

use crate::{
	Error, FrameseekService, Result, RetrievalProvider,
	ensemble::{self, EnsembleWeights},
	search::ResultMode,
	variant::{self, VariantAveraging},
};

/// One validated stage of a request.
#[derive(Clone, Debug)]
pub struct StagePlan {
	pub stage_id: u32,
	pub stage_name: String,
	/// Query texts; index 0 is the original query.
	pub variants: Vec<String>,
	pub ocr_text: Option<String>,
	pub families: Vec<Family>,
	/// Objects every kept frame must contain. Empty disables the object filter.
	pub selected_objects: Vec<String>,
}
impl StagePlan {
	pub fn methods(&self) -> Vec<MethodKind> {
		self.families.iter().flat_map(|family| family.methods().iter().copied()).collect()
	}
}

/// Per-request knobs shared by every stage.
#[derive(Clone, Debug)]
pub struct StageSettings {
	pub top_k: u32,
	pub candidate_multiplier: u32,
	pub backend_timeout: Duration,
	pub request_timeout: Duration,
	pub weights: EnsembleWeights,
	pub averaging: VariantAveraging,
	pub result_mode: ResultMode,
}

/// Method-ensembled ranking of one (stage, variant) pair.
#[derive(Clone, Debug, Serialize)]
pub struct StageResult {
	pub stage_id: u32,
	pub variant_id: VariantId,
	pub enabled_methods: Vec<Family>,
	pub ranked: Vec<ScoredCandidate>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageWarning {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub variant_id: Option<VariantId>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub method: Option<MethodKind>,
	pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct StageOutput {
	pub stage_id: u32,
	pub stage_name: String,
	pub results: Vec<ScoredCandidate>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub variants: Option<Vec<StageResult>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub methods: Option<BTreeMap<Family, Vec<ScoredCandidate>>>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub warnings: Vec<StageWarning>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}
impl StageOutput {
	pub fn failed(&self) -> bool {
		self.error.is_some()
	}
}

struct VariantTask {
	stage_index: usize,
	variant_id: VariantId,
	query: String,
	ocr_text: Option<String>,
	methods: Vec<MethodKind>,
}

struct VariantOutcome {
	stage_index: usize,
	variant_id: VariantId,
	per_method: BTreeMap<MethodKind, Vec<NormalizedCandidate>>,
	warnings: Vec<StageWarning>,
	attempted: usize,
	failed: usize,
}
impl VariantOutcome {
	fn new(stage_index: usize, variant_id: VariantId) -> Self {
		Self {
			stage_index,
			variant_id,
			per_method: BTreeMap::new(),
			warnings: Vec::new(),
			attempted: 0,
			failed: 0,
		}
	}

	fn aborted(
		stage_index: usize,
		variant_id: VariantId,
		attempted: usize,
		message: String,
	) -> Self {
		Self {
			warnings: vec![StageWarning { variant_id: Some(variant_id), method: None, message }],
			attempted,
			failed: attempted,
			..Self::new(stage_index, variant_id)
		}
	}

	fn all_failed(&self) -> bool {
		self.attempted > 0 && self.failed == self.attempted
	}
}

impl FrameseekService {
	/// Runs every stage concurrently, one task per (stage, variant).
	///
	/// Returns `Cancelled` or `Timeout` without any stage output when the request is cancelled or
	/// its deadline passes; in-flight tasks are aborted in both cases.
	pub async fn run_stages(
		&self,
		plans: &[StagePlan],
		settings: &StageSettings,
		cancel: &CancellationToken,
	) -> Result<Vec<StageOutput>> {
		let mut workers = JoinSet::new();
		let mut owners: HashMap<Id, (usize, VariantId, usize)> = HashMap::new();

		for (stage_index, plan) in plans.iter().enumerate() {
			let methods = plan.methods();

			if methods.is_empty() {
				continue;
			}

			for (index, query) in plan.variants.iter().enumerate() {
				let Ok(raw_id) = u8::try_from(index) else {
					tracing::warn!(
						stage_id = plan.stage_id,
						variants = plan.variants.len(),
						"Ignoring query variants beyond Q255."
					);

					break;
				};
				let variant_id = VariantId(raw_id);
				let task = VariantTask {
					stage_index,
					variant_id,
					query: query.clone(),
					ocr_text: plan.ocr_text.clone(),
					methods: methods.clone(),
				};
				let handle = workers.spawn(run_variant(
					Arc::clone(&self.provider),
					Arc::clone(&self.cfg),
					Arc::clone(&self.permits),
					task,
					settings.clone(),
				));

				owners.insert(handle.id(), (stage_index, variant_id, methods.len()));
			}
		}

		let mut outcomes = Vec::with_capacity(owners.len());
		let deadline = time::sleep(settings.request_timeout);

		tokio::pin!(deadline);

		loop {
			tokio::select! {
				biased;

				() = cancel.cancelled() => {
					abort_workers(&mut workers).await;

					return Err(Error::Cancelled);
				},
				() = &mut deadline => {
					abort_workers(&mut workers).await;

					return Err(Error::Timeout {
						message: format!(
							"Request exceeded {} ms.",
							settings.request_timeout.as_millis()
						),
					});
				},
				joined = workers.join_next_with_id() => match joined {
					None => break,
					Some(Ok((_, outcome))) => outcomes.push(outcome),
					Some(Err(err)) => {
						let Some(&(stage_index, variant_id, attempted)) = owners.get(&err.id())
						else {
							continue;
						};

						tracing::warn!(error = %err, variant = %variant_id, "Variant task failed.");

						outcomes.push(VariantOutcome::aborted(
							stage_index,
							variant_id,
							attempted,
							format!("Variant task failed: {err}"),
						));
					},
				},
			}
		}

		let mut grouped: Vec<Vec<VariantOutcome>> = plans.iter().map(|_| Vec::new()).collect();

		for outcome in outcomes {
			grouped[outcome.stage_index].push(outcome);
		}

		let mut outputs = Vec::with_capacity(plans.len());

		for (plan, outcomes) in plans.iter().zip(grouped) {
			let mut output = assemble_stage(plan, outcomes, settings);

			self.apply_object_filter(plan, &mut output, settings, cancel).await?;

			outputs.push(output);
		}

		Ok(outputs)
	}

	/// Restricts every list of a completed stage to the ids the object filter keeps.
	///
	/// A filter error or timeout leaves the stage unfiltered and records a warning.
	async fn apply_object_filter(
		&self,
		plan: &StagePlan,
		output: &mut StageOutput,
		settings: &StageSettings,
		cancel: &CancellationToken,
	) -> Result<()> {
		if plan.selected_objects.is_empty() || output.failed() || output.results.is_empty() {
			return Ok(());
		}

		let Some(cfg) = self.cfg.providers.object_filter.as_ref() else {
			tracing::warn!(stage_id = plan.stage_id, "Object filter is not configured.");

			output.warnings.push(StageWarning {
				variant_id: None,
				method: None,
				message: "Object filter is not configured; results are unfiltered.".to_string(),
			});

			return Ok(());
		};
		let ids: Vec<String> = output.results.iter().map(|item| item.id.clone()).collect();
		let call = self.object_filter.filter(cfg, &ids, &plan.selected_objects);
		let filtered = tokio::select! {
			biased;

			() = cancel.cancelled() => return Err(Error::Cancelled),
			filtered = time::timeout(settings.backend_timeout, call) => filtered,
		};
		let message = match filtered {
			Ok(Ok(kept)) => {
				let kept: HashSet<String> = kept.into_iter().collect();

				retain_kept(output, &kept);

				tracing::debug!(
					stage_id = plan.stage_id,
					before = ids.len(),
					after = output.results.len(),
					"Object filter applied."
				);

				return Ok(());
			},
			Ok(Err(err)) => format!("Object filter failed: {err}"),
			Err(_) => format!(
				"Object filter timed out after {} ms.",
				settings.backend_timeout.as_millis()
			),
		};

		tracing::warn!(stage_id = plan.stage_id, error = %message, "Object filter skipped.");

		output.warnings.push(StageWarning { variant_id: None, method: None, message });

		Ok(())
	}
}

fn retain_kept(output: &mut StageOutput, kept: &HashSet<String>) {
	output.results.retain(|item| kept.contains(&item.id));

	for result in output.variants.iter_mut().flatten() {
		result.ranked.retain(|item| kept.contains(&item.id));
	}
	for list in output.methods.iter_mut().flat_map(|methods| methods.values_mut()) {
		list.retain(|item| kept.contains(&item.id));
	}
}

async fn abort_workers(workers: &mut JoinSet<VariantOutcome>) {
	workers.abort_all();

	while workers.join_next().await.is_some() {}
}

async fn run_variant(
	provider: Arc<dyn RetrievalProvider>,
	cfg: Arc<Config>,
	permits: Arc<Semaphore>,
	task: VariantTask,
	settings: StageSettings,
) -> VariantOutcome {
	let VariantTask { stage_index, variant_id, query, ocr_text, methods } = task;
	let Ok(_permit) = permits.acquire_owned().await else {
		return VariantOutcome::aborted(
			stage_index,
			variant_id,
			methods.len(),
			"Worker pool is closed.".to_string(),
		);
	};
	let mut outcome = VariantOutcome::new(stage_index, variant_id);

	for method in methods {
		let text = match ocr_text.as_deref() {
			Some(ocr) if method.uses_ocr_text() && !ocr.trim().is_empty() => ocr,
			_ => query.as_str(),
		};
		let limit = match method.family() {
			Family::Multimodal => settings.top_k.saturating_mul(settings.candidate_multiplier),
			Family::Caption | Family::Asr | Family::Ocr => settings.top_k,
		};
		let started = Instant::now();

		outcome.attempted += 1;

		let call = provider.retrieve(&cfg.providers.retrieval, method, text, limit);
		let message = match time::timeout(settings.backend_timeout, call).await {
			Ok(Ok(candidates)) => {
				tracing::debug!(
					variant = %variant_id,
					%method,
					hits = candidates.len(),
					elapsed_ms = started.elapsed().as_millis() as u64,
					"Retrieval call completed."
				);

				outcome.per_method.insert(method, normalize(&candidates, method.normalization()));

				continue;
			},
			Ok(Err(err)) => format!("Retrieval failed: {err}"),
			Err(_) => format!(
				"Retrieval timed out after {} ms.",
				settings.backend_timeout.as_millis()
			),
		};

		tracing::warn!(variant = %variant_id, %method, error = %message, "Retrieval call failed.");

		outcome.failed += 1;
		outcome.warnings.push(StageWarning {
			variant_id: Some(variant_id),
			method: Some(method),
			message,
		});
	}

	outcome
}

fn assemble_stage(
	plan: &StagePlan,
	mut outcomes: Vec<VariantOutcome>,
	settings: &StageSettings,
) -> StageOutput {
	let top_k = settings.top_k as usize;
	let mut output = StageOutput {
		stage_id: plan.stage_id,
		stage_name: plan.stage_name.clone(),
		results: Vec::new(),
		variants: None,
		methods: None,
		warnings: Vec::new(),
		error: None,
	};

	if plan.families.is_empty() {
		tracing::warn!(stage_id = plan.stage_id, "Stage has no enabled methods.");

		output.warnings.push(StageWarning {
			variant_id: None,
			method: None,
			message: "Stage has no enabled methods.".to_string(),
		});

		return output;
	}

	outcomes.sort_by_key(|outcome| outcome.variant_id);

	let attempted: usize = outcomes.iter().map(|outcome| outcome.attempted).sum();
	let failed: usize = outcomes.iter().map(|outcome| outcome.failed).sum();

	for outcome in &mut outcomes {
		output.warnings.append(&mut outcome.warnings);
	}

	if attempted > 0 && failed == attempted {
		let err = Error::StageFailed {
			stage_id: plan.stage_id,
			message: "Every retrieval call failed.".to_string(),
		};

		tracing::warn!(stage_id = plan.stage_id, error = %err, "Stage failed.");

		output.error = Some(err.to_string());

		return output;
	}

	let variant_results: Vec<StageResult> = outcomes
		.iter()
		.filter(|outcome| !outcome.all_failed())
		.map(|outcome| StageResult {
			stage_id: plan.stage_id,
			variant_id: outcome.variant_id,
			enabled_methods: plan.families.clone(),
			ranked: ensemble::ensemble_methods(
				&outcome.per_method,
				&plan.families,
				&settings.weights,
				top_k,
			),
		})
		.collect();
	let per_variant: Vec<Vec<ScoredCandidate>> =
		variant_results.iter().map(|result| result.ranked.clone()).collect();

	output.results = variant::ensemble_variants(&per_variant, settings.averaging, top_k);

	match settings.result_mode {
		ResultMode::Ensemble => {},
		ResultMode::All => output.variants = Some(variant_results),
		ResultMode::PerMethod => {
			let lists = outcomes
				.iter()
				.find(|outcome| !outcome.all_failed())
				.map(|outcome| {
					ensemble::family_lists(&outcome.per_method, &settings.weights, top_k)
				})
				.unwrap_or_default()
				.into_iter()
				.filter(|(family, _)| plan.families.contains(family))
				.collect();

			output.methods = Some(lists);
		},
	}

	tracing::info!(
		stage_id = plan.stage_id,
		variants = per_variant.len(),
		results = output.results.len(),
		warnings = output.warnings.len(),
		"Stage completed."
	);

	output
}

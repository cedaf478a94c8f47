use std::{
	collections::HashSet,
	fs,
	path::{Path, PathBuf},
	sync::Arc,
	time::Instant,
};

use clap::Parser;
use color_eyre::eyre;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use frameseek_config::Config;
use frameseek_service::{FrameseekService, SearchRequest, SearchResponse, TemporalAggregation};
use frameseek_testkit::{RecordedBackend, Recording};

#[derive(Debug, Parser)]
#[command(
	version = frameseek_cli::VERSION,
	rename_all = "kebab",
	styles = frameseek_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[arg(long, short = 'd', value_name = "FILE")]
	pub dataset: PathBuf,
	/// Overrides every query's `top_k`.
	#[arg(long, value_name = "N")]
	pub top_k: Option<u32>,
}

/// Recorded backend responses plus the requests to replay against them.
#[derive(Debug, Deserialize)]
struct EvalDataset {
	name: Option<String>,
	recordings: Vec<Recording>,
	queries: Vec<EvalQuery>,
}

#[derive(Debug, Deserialize)]
struct EvalQuery {
	id: Option<String>,
	request: SearchRequest,
	expected_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EvalOutput {
	dataset: EvalDatasetInfo,
	settings: EvalSettings,
	summary: EvalSummary,
	queries: Vec<QueryReport>,
}

#[derive(Clone, Debug, Serialize)]
struct EvalDatasetInfo {
	name: String,
	query_count: usize,
}

#[derive(Debug, Serialize)]
struct EvalSettings {
	config_path: String,
	policy_id: String,
	variant_averaging: String,
	tuple_cap: u32,
}

#[derive(Debug, Serialize)]
struct EvalSummary {
	avg_recall_at_k: f64,
	avg_precision_at_k: f64,
	mean_rr: f64,
	mean_ndcg: f64,
	latency_ms_p50: f64,
	latency_ms_p95: f64,
	failed_stage_count: usize,
	empty_temporal_count: usize,
}

#[derive(Debug, Serialize)]
struct QueryReport {
	id: String,
	request_id: Uuid,
	stage_count: usize,
	expected_count: usize,
	retrieved_count: usize,
	relevant_count: usize,
	recall_at_k: f64,
	precision_at_k: f64,
	rr: f64,
	ndcg: f64,
	latency_ms: f64,
	failed_stages: Vec<u32>,
	empty_temporal: bool,
	expected_ids: Vec<String>,
	retrieved_ids: Vec<String>,
}

struct Metrics {
	recall_at_k: f64,
	precision_at_k: f64,
	rr: f64,
	ndcg: f64,
	relevant_count: usize,
}

struct EvalRun {
	settings: EvalSettings,
	summary: EvalSummary,
	queries: Vec<QueryReport>,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let cfg = frameseek_config::load(&args.config)?;
	let filter = EnvFilter::new(cfg.service.log_level.clone());

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

	let dataset = load_dataset(&args.dataset)?;
	let backend = Arc::new(RecordedBackend::from_recordings(dataset.recordings.clone()));
	let info = EvalDatasetInfo {
		name: dataset.name.clone().unwrap_or_else(|| "dataset".to_string()),
		query_count: dataset.queries.len(),
	};
	let run = eval_config(&args.config, cfg, &dataset, backend, args.top_k).await?;
	let output = EvalOutput {
		dataset: info,
		settings: run.settings,
		summary: run.summary,
		queries: run.queries,
	};
	let json = serde_json::to_string_pretty(&output)?;

	println!("{json}");

	Ok(())
}

fn load_dataset(path: &Path) -> color_eyre::Result<EvalDataset> {
	let raw = fs::read_to_string(path)?;
	let dataset: EvalDataset = serde_json::from_str(&raw)?;

	if dataset.queries.is_empty() {
		return Err(eyre::eyre!("Dataset must include at least one query."));
	}

	Ok(dataset)
}

async fn eval_config(
	config_path: &Path,
	cfg: Config,
	dataset: &EvalDataset,
	backend: Arc<RecordedBackend>,
	top_k: Option<u32>,
) -> color_eyre::Result<EvalRun> {
	let mut settings = EvalSettings {
		config_path: config_path.display().to_string(),
		policy_id: String::new(),
		variant_averaging: cfg.ensemble.variant_averaging.clone(),
		tuple_cap: cfg.temporal.tuple_cap,
	};
	let service = FrameseekService::with_providers(cfg, backend.clone(), backend);
	let mut reports = Vec::with_capacity(dataset.queries.len());
	let mut latencies_ms = Vec::with_capacity(dataset.queries.len());

	for (index, query) in dataset.queries.iter().enumerate() {
		let mut request = query.request.clone();

		if top_k.is_some() {
			request.top_k = top_k;
		}

		let started = Instant::now();
		let response = service.search(request).await?;
		let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

		settings.policy_id.clone_from(&response.policy_id);

		let retrieved = ranked_ids(&response);
		let expected: HashSet<&str> = query.expected_ids.iter().map(String::as_str).collect();
		let metrics = compute_metrics(&retrieved, &expected);
		let failed_stages = response
			.stages
			.iter()
			.filter(|stage| stage.failed())
			.map(|stage| stage.stage_id)
			.collect();

		tracing::debug!(query = index, latency_ms, "Replayed query.");

		latencies_ms.push(latency_ms);
		reports.push(QueryReport {
			id: query.id.clone().unwrap_or_else(|| index.to_string()),
			request_id: response.request_id,
			stage_count: response.stages.len(),
			expected_count: expected.len(),
			retrieved_count: retrieved.len(),
			relevant_count: metrics.relevant_count,
			recall_at_k: metrics.recall_at_k,
			precision_at_k: metrics.precision_at_k,
			rr: metrics.rr,
			ndcg: metrics.ndcg,
			latency_ms,
			failed_stages,
			empty_temporal: response.temporal.as_ref().is_some_and(TemporalAggregation::is_empty),
			expected_ids: query.expected_ids.clone(),
			retrieved_ids: retrieved,
		});
	}

	let summary = summarize(&reports, &latencies_ms);

	Ok(EvalRun { settings, summary, queries: reports })
}

/// Ranked candidate ids a query is scored on.
///
/// Temporal requests are scored on their aggregation: ID records directly, tuples by the id of
/// each tuple's final-stage member. Plain requests are scored on the last stage's list.
fn ranked_ids(response: &SearchResponse) -> Vec<String> {
	let ids: Vec<String> = match &response.temporal {
		Some(TemporalAggregation::Id { results, .. }) =>
			results.iter().map(|record| record.id.clone()).collect(),
		Some(TemporalAggregation::Tuple { tuples, .. }) => tuples
			.iter()
			.filter_map(|tuple| tuple.results.last().map(|member| member.id.clone()))
			.collect(),
		None => response
			.stages
			.last()
			.map(|stage| stage.results.iter().map(|item| item.id.clone()).collect())
			.unwrap_or_default(),
	};

	unique_ids(ids.into_iter())
}

fn unique_ids<I>(iter: I) -> Vec<String>
where
	I: Iterator<Item = String>,
{
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for id in iter {
		if seen.insert(id.clone()) {
			out.push(id);
		}
	}

	out
}

fn compute_metrics(retrieved: &[String], expected: &HashSet<&str>) -> Metrics {
	let expected_count = expected.len();
	let mut relevant_count = 0usize;
	let mut dcg = 0.0_f64;
	let mut first_hit: Option<usize> = None;

	for (idx, id) in retrieved.iter().enumerate() {
		if !expected.contains(id.as_str()) {
			continue;
		}

		let rank = idx + 1;

		relevant_count += 1;
		dcg += 1.0 / (rank as f64 + 1.0).log2();

		if first_hit.is_none() {
			first_hit = Some(rank);
		}
	}

	let rr = first_hit.map_or(0.0, |rank| 1.0 / rank as f64);
	let ideal_hits = expected_count.min(retrieved.len());
	let idcg: f64 = (1..=ideal_hits).map(|rank| 1.0 / (rank as f64 + 1.0).log2()).sum();
	let ndcg = if idcg > 0.0 { dcg / idcg } else { 0.0 };
	let precision_at_k =
		if retrieved.is_empty() { 0.0 } else { relevant_count as f64 / retrieved.len() as f64 };
	let recall_at_k =
		if expected_count == 0 { 0.0 } else { relevant_count as f64 / expected_count as f64 };

	Metrics { recall_at_k, precision_at_k, rr, ndcg, relevant_count }
}

fn summarize(reports: &[QueryReport], latencies_ms: &[f64]) -> EvalSummary {
	let count = reports.len().max(1) as f64;
	let mut sorted = latencies_ms.to_vec();

	sorted.sort_by(|a, b| a.total_cmp(b));

	EvalSummary {
		avg_recall_at_k: reports.iter().map(|r| r.recall_at_k).sum::<f64>() / count,
		avg_precision_at_k: reports.iter().map(|r| r.precision_at_k).sum::<f64>() / count,
		mean_rr: reports.iter().map(|r| r.rr).sum::<f64>() / count,
		mean_ndcg: reports.iter().map(|r| r.ndcg).sum::<f64>() / count,
		latency_ms_p50: percentile(&sorted, 0.50),
		latency_ms_p95: percentile(&sorted, 0.95),
		failed_stage_count: reports.iter().map(|r| r.failed_stages.len()).sum(),
		empty_temporal_count: reports.iter().filter(|r| r.empty_temporal).count(),
	}
}

fn percentile(values: &[f64], percentile: f64) -> f64 {
	if values.is_empty() {
		return 0.0;
	}

	let clamped = percentile.clamp(0.0, 1.0);
	let pos = clamped * (values.len() as f64 - 1.0);
	let lower = pos.floor() as usize;
	let upper = pos.ceil() as usize;

	if lower == upper {
		values[lower]
	} else {
		let weight = pos - lower as f64;

		values[lower] * (1.0 - weight) + values[upper] * weight
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn owned(ids: &[&str]) -> Vec<String> {
		ids.iter().map(|id| id.to_string()).collect()
	}

	#[test]
	fn metrics_score_first_hit_and_coverage() {
		let retrieved = owned(&["x", "a", "y", "b"]);
		let expected: HashSet<&str> = ["a", "b", "c"].into_iter().collect();
		let metrics = compute_metrics(&retrieved, &expected);

		assert_eq!(metrics.relevant_count, 2);
		assert!((metrics.rr - 0.5).abs() < 1e-12);
		assert!((metrics.recall_at_k - 2.0 / 3.0).abs() < 1e-12);
		assert!((metrics.precision_at_k - 0.5).abs() < 1e-12);
		assert!(metrics.ndcg > 0.0 && metrics.ndcg < 1.0);
	}

	#[test]
	fn metrics_handle_empty_inputs() {
		let metrics = compute_metrics(&[], &HashSet::new());

		assert_eq!(metrics.relevant_count, 0);
		assert_eq!(metrics.rr, 0.0);
		assert_eq!(metrics.ndcg, 0.0);
	}

	#[test]
	fn percentile_interpolates_between_ranks() {
		let values = [10.0, 20.0, 30.0, 40.0];

		assert_eq!(percentile(&values, 0.5), 25.0);
		assert_eq!(percentile(&values, 1.0), 40.0);
		assert_eq!(percentile(&[], 0.95), 0.0);
	}

	#[test]
	fn unique_ids_keep_first_occurrence_order() {
		let ids = unique_ids(owned(&["b", "a", "b", "c", "a"]).into_iter());

		assert_eq!(ids, owned(&["b", "a", "c"]));
	}

	#[test]
	fn dataset_parses_requests_and_recordings() {
		let raw = serde_json::json!({
			"name": "smoke",
			"recordings": [
				{ "method": "caption", "query": "a red car", "hits": [
					{ "id": "L01_V001/12", "video_id": "L01_V001", "frame_index": 12, "score": 0.8 }
				] }
			],
			"queries": [
				{
					"id": "q1",
					"request": {
						"stages": [
							{ "stage_id": 1, "variants": ["a red car"], "enabled_methods": ["ic"] }
						]
					},
					"expected_ids": ["L01_V001/12"]
				}
			]
		});
		let dataset: EvalDataset = serde_json::from_value(raw).expect("Failed to parse dataset.");

		assert_eq!(dataset.recordings.len(), 1);
		assert_eq!(dataset.queries[0].request.stages[0].stage_id, 1);
		assert!(dataset.queries[0].request.temporal_mode.is_none());
	}

	#[tokio::test]
	async fn replay_scores_plain_and_temporal_queries() {
		let raw = serde_json::json!({
			"recordings": [
				{ "method": "caption", "query": "a red car", "hits": [
					{ "id": "L01_V001/12", "video_id": "L01_V001", "frame_index": 12, "score": 0.8 },
					{ "id": "L01_V002/3", "video_id": "L01_V002", "frame_index": 3, "score": 0.4 }
				] },
				{ "method": "caption", "query": "driver exits", "hits": [
					{ "id": "L01_V001/40", "video_id": "L01_V001", "frame_index": 40, "score": 0.9 }
				] },
				{ "method": "caption", "query": "earlier scene", "hits": [
					{ "id": "L01_V002/1", "video_id": "L01_V002", "frame_index": 1, "score": 0.5 }
				] }
			],
			"queries": [
				{
					"request": { "stages": [
						{ "stage_id": 1, "variants": ["a red car"], "enabled_methods": ["ic"] }
					] },
					"expected_ids": ["L01_V001/12"]
				},
				{
					"request": {
						"stages": [
							{ "stage_id": 1, "variants": ["a red car"], "enabled_methods": ["ic"] },
							{ "stage_id": 2, "variants": ["driver exits"], "enabled_methods": ["ic"] }
						],
						"temporal_mode": "tuple"
					},
					"expected_ids": ["L01_V001/40"]
				},
				{
					"request": {
						"stages": [
							{ "stage_id": 1, "variants": ["driver exits"], "enabled_methods": ["ic"] },
							{ "stage_id": 2, "variants": ["earlier scene"], "enabled_methods": ["ic"] }
						],
						"temporal_mode": "tuple"
					},
					"expected_ids": ["L01_V001/40"]
				}
			]
		});
		let dataset: EvalDataset = serde_json::from_value(raw).expect("Failed to parse dataset.");
		let backend = Arc::new(RecordedBackend::from_recordings(dataset.recordings.clone()));
		let run = eval_config(
			Path::new("inline.toml"),
			frameseek_testkit::test_config(),
			&dataset,
			backend,
			None,
		)
		.await
		.expect("Replay failed.");

		assert_eq!(run.queries[0].id, "0");
		assert_eq!(run.queries[0].retrieved_ids, owned(&["L01_V001/12", "L01_V002/3"]));
		assert_eq!(run.queries[1].retrieved_ids, owned(&["L01_V001/40"]));
		assert!(run.queries[2].empty_temporal);
		assert!(run.queries[2].retrieved_ids.is_empty());
		assert!((run.summary.mean_rr - 2.0 / 3.0).abs() < 1e-12);
		assert_eq!(run.summary.empty_temporal_count, 1);
		assert_eq!(run.summary.failed_stage_count, 0);
		assert!(!run.settings.policy_id.is_empty());
	}
}

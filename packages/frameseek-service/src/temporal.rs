//! Cross-stage aggregation of per-stage ranked lists.
//!
//! ID mode sums a candidate's score over every stage it appears in. Tuple mode finds, per video,
//! chains with exactly one candidate per stage and strictly increasing frame indices, keeping the
//! best-scoring chain that ends at each final-stage candidate.

use std::{
	cmp::Ordering,
	collections::{BTreeMap, BTreeSet, HashMap},
};

use serde::Serialize;

use frameseek_domain::{ScoredCandidate, cmp_f32_desc};

use crate::{Error, Result};

pub const DEFAULT_TUPLE_CAP: usize = 200;
pub const EMPTY_SEQUENCES: &str = "no temporal sequences found";
pub const EMPTY_AGGREGATION: &str = "no aggregated results found";

/// Final ranked list of one stage.
#[derive(Clone, Debug)]
pub struct StageRanking {
	pub stage_id: u32,
	pub ranked: Vec<ScoredCandidate>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IdAggregateRecord {
	pub id: String,
	pub video_id: String,
	pub frame_index: u32,
	#[serde(rename = "score")]
	pub total_score: f32,
	pub contributing_stages: BTreeSet<u32>,
	pub stage_scores: BTreeMap<u32, f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SequenceTuple {
	pub video_id: String,
	pub frame_indices: Vec<u32>,
	/// One entry per stage, in ascending stage order.
	pub results: Vec<TupleMember>,
	pub total_score: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TupleMember {
	pub stage_id: u32,
	pub id: String,
	pub frame_index: u32,
	pub score: f32,
}

struct ChainNode<'a> {
	candidate: &'a ScoredCandidate,
	running: f64,
	parent: Option<usize>,
}

pub fn aggregate_by_id(stages: &[StageRanking]) -> Result<Vec<IdAggregateRecord>> {
	require_temporal_stages(stages)?;

	let mut records: HashMap<&str, IdAggregateRecord> = HashMap::new();

	for stage in stages {
		for item in &stage.ranked {
			let record = records.entry(item.id.as_str()).or_insert_with(|| IdAggregateRecord {
				id: item.id.clone(),
				video_id: item.video_id.clone(),
				frame_index: item.frame_index,
				total_score: 0.0,
				contributing_stages: BTreeSet::new(),
				stage_scores: BTreeMap::new(),
			});

			record
				.stage_scores
				.entry(stage.stage_id)
				.and_modify(|best| *best = best.max(item.score))
				.or_insert(item.score);
			record.contributing_stages.insert(stage.stage_id);
		}
	}

	let mut out: Vec<IdAggregateRecord> = records
		.into_values()
		.map(|mut record| {
			record.total_score = record.stage_scores.values().sum();

			record
		})
		.collect();

	out.sort_by(|left, right| {
		cmp_f32_desc(left.total_score, right.total_score).then_with(|| left.id.cmp(&right.id))
	});

	Ok(out)
}

pub fn aggregate_tuples(stages: &[StageRanking], cap: usize) -> Result<Vec<SequenceTuple>> {
	require_temporal_stages(stages)?;

	let mut ordered: Vec<&StageRanking> = stages.iter().collect();

	ordered.sort_by_key(|stage| stage.stage_id);

	let partitions: Vec<HashMap<&str, Vec<&ScoredCandidate>>> =
		ordered.iter().map(|stage| partition_by_video(&stage.ranked)).collect();
	let Some((first, rest)) = partitions.split_first() else { return Ok(Vec::new()) };
	let mut videos: Vec<&str> = first
		.keys()
		.copied()
		.filter(|video_id| rest.iter().all(|partition| partition.contains_key(video_id)))
		.collect();

	videos.sort_unstable();

	let stage_ids: Vec<u32> = ordered.iter().map(|stage| stage.stage_id).collect();
	let mut tuples = Vec::new();

	for video_id in videos {
		let per_stage: Vec<&[&ScoredCandidate]> = partitions
			.iter()
			.map(|partition| partition.get(video_id).map(Vec::as_slice).unwrap_or_default())
			.collect();

		chain_video(video_id, &per_stage, &stage_ids, &mut tuples);
	}

	tuples.sort_by(cmp_tuples);
	tuples.truncate(cap);

	Ok(tuples)
}

fn require_temporal_stages(stages: &[StageRanking]) -> Result<()> {
	if stages.len() < 2 {
		return Err(Error::InvalidRequest {
			message: "Temporal aggregation requires at least two stages.".to_string(),
		});
	}

	Ok(())
}

/// Groups one stage by video, keeping the best entry per id, sorted by frame ascending.
fn partition_by_video(ranked: &[ScoredCandidate]) -> HashMap<&str, Vec<&ScoredCandidate>> {
	let mut best: HashMap<&str, &ScoredCandidate> = HashMap::new();

	for item in ranked {
		if !item.score.is_finite() {
			continue;
		}

		best.entry(item.id.as_str())
			.and_modify(|current| {
				if item.score > current.score {
					*current = item;
				}
			})
			.or_insert(item);
	}

	let mut out: HashMap<&str, Vec<&ScoredCandidate>> = HashMap::new();

	for item in best.into_values() {
		out.entry(item.video_id.as_str()).or_default().push(item);
	}
	for entries in out.values_mut() {
		entries.sort_by(|left, right| {
			left.frame_index.cmp(&right.frame_index).then_with(|| left.id.cmp(&right.id))
		});
	}

	out
}

/// Weighted chain search over one video's per-stage entries.
///
/// Each layer is sorted by frame, so a single sweep with a running prefix maximum finds the best
/// predecessor with a strictly smaller frame for every entry of the next stage.
fn chain_video(
	video_id: &str,
	per_stage: &[&[&ScoredCandidate]],
	stage_ids: &[u32],
	out: &mut Vec<SequenceTuple>,
) {
	let mut layers: Vec<Vec<ChainNode<'_>>> = Vec::with_capacity(per_stage.len());

	for (depth, entries) in per_stage.iter().enumerate() {
		let mut layer = Vec::with_capacity(entries.len());

		if depth == 0 {
			for &candidate in entries.iter() {
				let running = f64::from(candidate.score);

				layer.push(ChainNode { candidate, running, parent: None });
			}
		} else {
			let previous = &layers[depth - 1];
			let mut cursor = 0;
			let mut best: Option<(f64, usize)> = None;

			for &candidate in entries.iter() {
				while cursor < previous.len()
					&& previous[cursor].candidate.frame_index < candidate.frame_index
				{
					let running = previous[cursor].running;

					if best.is_none_or(|(score, _)| running > score) {
						best = Some((running, cursor));
					}

					cursor += 1;
				}

				let Some((prefix, parent)) = best else { continue };

				layer.push(ChainNode {
					candidate,
					running: prefix + f64::from(candidate.score),
					parent: Some(parent),
				});
			}
		}

		if layer.is_empty() {
			return;
		}

		layers.push(layer);
	}

	let Some(last) = layers.last() else { return };

	for end in 0..last.len() {
		let mut members = Vec::with_capacity(layers.len());
		let mut at = Some(end);

		for (depth, layer) in layers.iter().enumerate().rev() {
			let Some(index) = at else { break };
			let node = &layer[index];

			members.push(TupleMember {
				stage_id: stage_ids[depth],
				id: node.candidate.id.clone(),
				frame_index: node.candidate.frame_index,
				score: node.candidate.score,
			});

			at = node.parent;
		}

		if members.len() != layers.len() {
			continue;
		}

		members.reverse();

		out.push(SequenceTuple {
			video_id: video_id.to_string(),
			frame_indices: members.iter().map(|member| member.frame_index).collect(),
			total_score: members.iter().map(|member| member.score).sum(),
			results: members,
		});
	}
}

fn cmp_tuples(left: &SequenceTuple, right: &SequenceTuple) -> Ordering {
	cmp_f32_desc(left.total_score, right.total_score)
		.then_with(|| left.video_id.cmp(&right.video_id))
		.then_with(|| left.frame_indices.cmp(&right.frame_indices))
}

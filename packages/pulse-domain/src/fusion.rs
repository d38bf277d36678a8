//! Score fusion for hybrid duplicate search.
//!
//! Keyword search alone misses paraphrases ("dark mode" vs "night theme");
//! vector search alone misses exact-term matches and disappears when the
//! embedding provider is down. Fusion treats the keyword score as a boost on
//! top of the vector score, not a floor, so either branch can carry a result
//! on its own.

use std::{cmp::Ordering, collections::HashMap};

use uuid::Uuid;

/// Postgres `ts_rank` typically lands in [0, 0.5]; doubling maps it onto the
/// same [0, 1] scale as cosine similarity.
pub const KEYWORD_RANK_SCALE: f32 = 2.0;
/// Weight of the keyword score when a post was found by both branches.
pub const KEYWORD_FUSION_WEIGHT: f32 = 0.3;
/// Cosine similarity floor for vector candidates.
pub const VECTOR_MIN_SIMILARITY: f32 = 0.35;
/// The vector branch over-fetches by this factor so fusion has room to reorder.
pub const VECTOR_CANDIDATE_MULTIPLIER: u32 = 2;

const STRONG_MATCH_MIN: f32 = 0.5;
const GOOD_MATCH_MIN: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrength {
	Strong,
	Good,
	Weak,
}
impl MatchStrength {
	pub fn classify(score: f32) -> Self {
		if score >= STRONG_MATCH_MIN {
			Self::Strong
		} else if score >= GOOD_MATCH_MIN {
			Self::Good
		} else {
			Self::Weak
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Strong => "strong",
			Self::Good => "good",
			Self::Weak => "weak",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedCandidate {
	pub post_id: Uuid,
	pub score: f32,
	pub strength: MatchStrength,
}

pub fn normalize_keyword_rank(raw_rank: f32) -> f32 {
	(raw_rank * KEYWORD_RANK_SCALE).min(1.0)
}

pub fn fused_score(vector: Option<f32>, keyword: Option<f32>) -> f32 {
	match (vector, keyword) {
		(Some(vector), Some(keyword)) => (vector + keyword * KEYWORD_FUSION_WEIGHT).min(1.0),
		(Some(vector), None) => vector,
		(None, Some(keyword)) => keyword,
		(None, None) => 0.0,
	}
}

/// Fuses the two ranked branches by post id, sorts by descending fused score
/// (post id as the deterministic tie-break) and truncates to `limit`.
///
/// Keyword scores must already be normalized via [`normalize_keyword_rank`].
pub fn fuse_candidates(
	vector: &[(Uuid, f32)],
	keyword: &[(Uuid, f32)],
	limit: usize,
) -> Vec<FusedCandidate> {
	let mut by_post: HashMap<Uuid, (Option<f32>, Option<f32>)> = HashMap::new();

	for (post_id, similarity) in vector {
		let entry = by_post.entry(*post_id).or_default();

		entry.0 = Some(entry.0.map_or(*similarity, |prev: f32| prev.max(*similarity)));
	}
	for (post_id, rank) in keyword {
		let entry = by_post.entry(*post_id).or_default();

		entry.1 = Some(entry.1.map_or(*rank, |prev: f32| prev.max(*rank)));
	}

	let mut out: Vec<FusedCandidate> = by_post
		.into_iter()
		.map(|(post_id, (vector, keyword))| {
			let score = fused_score(vector, keyword);

			FusedCandidate { post_id, score, strength: MatchStrength::classify(score) }
		})
		.collect();

	out.sort_by(|left, right| {
		cmp_f32_desc(left.score, right.score).then_with(|| left.post_id.cmp(&right.post_id))
	});
	out.truncate(limit);

	out
}

pub fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}

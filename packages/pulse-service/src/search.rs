//! Hybrid similarity search over existing posts.
//!
//! The keyword and vector branches run concurrently with independent
//! timeouts; a slow or failed vector path never blocks or fails the keyword
//! path. Merged duplicates and soft-deleted posts are excluded from the
//! candidate pool since neither is a valid merge target.

use std::{sync::Arc, time::Duration};

use sqlx::PgPool;
use tokio::time::timeout;
use uuid::Uuid;

use pulse_config::Config;
use pulse_domain::fusion::{
	self, MatchStrength, VECTOR_CANDIDATE_MULTIPLIER, VECTOR_MIN_SIMILARITY,
};

use crate::{BoxFuture, EmbeddingProvider, FeedbackService, ServiceError, ServiceResult};

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SimilarPost {
	pub post_id: Uuid,
	pub score: f32,
	pub match_strength: MatchStrength,
}

/// The vector half of hybrid search, injected so the disabled-AI rendition is
/// a no-op implementation rather than a runtime flag check at every call
/// site.
pub trait VectorSearcher
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		query: &'a str,
		limit: i64,
	) -> BoxFuture<'a, color_eyre::Result<Vec<(Uuid, f32)>>>;
}

pub struct PgVectorSearcher {
	pool: PgPool,
	cfg: pulse_config::EmbeddingProviderConfig,
	embedding: Arc<dyn EmbeddingProvider>,
	embedding_version: String,
}
impl PgVectorSearcher {
	pub fn new(cfg: &Config, pool: PgPool, embedding: Arc<dyn EmbeddingProvider>) -> Self {
		Self {
			pool,
			cfg: cfg.ai.embedding.clone(),
			embedding,
			embedding_version: crate::embedding_version(cfg),
		}
	}
}
impl VectorSearcher for PgVectorSearcher {
	fn search<'a>(
		&'a self,
		query: &'a str,
		limit: i64,
	) -> BoxFuture<'a, color_eyre::Result<Vec<(Uuid, f32)>>> {
		Box::pin(async move {
			let embeddings = self.embedding.embed(&self.cfg, &[query.to_string()]).await?;
			let Some(vec) = embeddings.into_iter().next() else {
				return Err(color_eyre::eyre::eyre!("Embedding provider returned no vectors."));
			};
			let vec_text = crate::vector_to_pg(&vec);
			let rows: Vec<(Uuid, f32)> = sqlx::query_as(
				"\
SELECT
	p.post_id,
	(1 - (e.vec <=> $1::text::vector))::real AS similarity
FROM post_embeddings e
JOIN posts p ON p.post_id = e.post_id
WHERE p.deleted_at IS NULL
	AND p.canonical_post_id IS NULL
	AND e.embedding_version = $2
	AND (1 - (e.vec <=> $1::text::vector)) >= $3
ORDER BY e.vec <=> $1::text::vector
LIMIT $4",
			)
			.bind(vec_text.as_str())
			.bind(self.embedding_version.as_str())
			.bind(VECTOR_MIN_SIMILARITY)
			.bind(limit)
			.fetch_all(&self.pool)
			.await?;

			Ok(rows)
		})
	}
}

/// Stands in when `ai.enabled` is false: posts are only reachable through
/// the keyword branch.
pub struct NoopVectorSearcher;
impl VectorSearcher for NoopVectorSearcher {
	fn search<'a>(
		&'a self,
		_query: &'a str,
		_limit: i64,
	) -> BoxFuture<'a, color_eyre::Result<Vec<(Uuid, f32)>>> {
		Box::pin(async { Ok(Vec::new()) })
	}
}

impl FeedbackService {
	pub async fn find_similar(&self, query_text: &str, limit: u32) -> ServiceResult<Vec<SimilarPost>> {
		let query = query_text.trim();

		if query.is_empty() || limit == 0 {
			return Ok(Vec::new());
		}

		let vector_limit = i64::from(limit) * i64::from(VECTOR_CANDIDATE_MULTIPLIER);
		let keyword_timeout = Duration::from_millis(self.cfg.search.keyword_timeout_ms);
		let vector_timeout = Duration::from_millis(self.cfg.search.vector_timeout_ms);
		let (keyword, vector) = tokio::join!(
			timeout(keyword_timeout, keyword_search(&self.db.pool, query, i64::from(limit))),
			timeout(vector_timeout, self.vector.search(query, vector_limit)),
		);
		let keyword = match keyword {
			Ok(Ok(rows)) => Some(rows),
			Ok(Err(err)) => {
				tracing::warn!(error = %err, "Keyword search failed; degrading to vector-only.");

				None
			},
			Err(_) => {
				tracing::warn!("Keyword search timed out; degrading to vector-only.");

				None
			},
		};
		let vector = match vector {
			Ok(Ok(rows)) => Some(rows),
			Ok(Err(err)) => {
				tracing::warn!(error = %err, "Vector search failed; degrading to keyword-only.");

				None
			},
			Err(_) => {
				tracing::warn!("Vector search timed out; degrading to keyword-only.");

				None
			},
		};

		if keyword.is_none() && vector.is_none() {
			return Err(ServiceError::Storage {
				message: "Both similarity search branches are unavailable.".to_string(),
			});
		}

		let keyword: Vec<(Uuid, f32)> = keyword
			.unwrap_or_default()
			.into_iter()
			.map(|(post_id, rank)| (post_id, fusion::normalize_keyword_rank(rank)))
			.collect();
		let vector = vector.unwrap_or_default();
		let fused = fusion::fuse_candidates(&vector, &keyword, limit as usize);

		Ok(fused
			.into_iter()
			.map(|candidate| SimilarPost {
				post_id: candidate.post_id,
				score: candidate.score,
				match_strength: candidate.strength,
			})
			.collect())
	}
}

async fn keyword_search(
	pool: &PgPool,
	query: &str,
	limit: i64,
) -> Result<Vec<(Uuid, f32)>, sqlx::Error> {
	sqlx::query_as(
		"\
SELECT
	post_id,
	ts_rank(search_tsv, q)::real AS rank
FROM posts, websearch_to_tsquery('english', $1) AS q
WHERE search_tsv @@ q
	AND deleted_at IS NULL
	AND canonical_post_id IS NULL
ORDER BY rank DESC, post_id
LIMIT $2",
	)
	.bind(query)
	.bind(limit)
	.fetch_all(pool)
	.await
}

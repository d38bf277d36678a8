//! Merge/unmerge state machine and vote reconciliation.
//!
//! A post is either independent or a duplicate of exactly one canonical
//! root. Canonicals are always roots: merging into a duplicate, or merging a
//! post that currently has duplicates of its own, is rejected, so the linkage
//! graph never grows chains or cycles. Merging moves no content. Votes and
//! comments stay attached to the duplicate; only the linkage fields and the
//! canonical's reconciled vote count change.

use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use pulse_storage::queries;

use crate::{FeedbackService, ServiceError, ServiceResult};

#[derive(Debug, serde::Serialize)]
pub struct MergeOutcome {
	pub duplicate_id: Uuid,
	pub canonical_id: Uuid,
	pub canonical_vote_count: i64,
	pub merged_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow, serde::Serialize)]
pub struct MergedPost {
	pub post_id: Uuid,
	pub title: String,
	pub vote_count: i64,
	pub author_name: String,
	pub merged_at: Option<OffsetDateTime>,
}

#[derive(Debug, serde::Serialize)]
pub struct MergeInfo {
	pub canonical_post_id: Uuid,
	pub canonical_title: String,
	pub canonical_board_slug: String,
	pub merged_at: Option<OffsetDateTime>,
}

impl FeedbackService {
	/// Merges `duplicate_id` into `canonical_id`. All-or-nothing: linkage
	/// write and vote recount share one transaction.
	pub async fn merge_post(
		&self,
		duplicate_id: Uuid,
		canonical_id: Uuid,
		actor_id: &str,
	) -> ServiceResult<MergeOutcome> {
		let mut tx = self.db.pool.begin().await?;
		let outcome =
			merge_in_tx(&mut tx, duplicate_id, canonical_id, actor_id, OffsetDateTime::now_utc())
				.await?;

		tx.commit().await?;

		tracing::info!(
			duplicate_id = %duplicate_id,
			canonical_id = %canonical_id,
			vote_count = outcome.canonical_vote_count,
			"Merged post.",
		);

		Ok(outcome)
	}

	/// Reverses a merge, restoring the post to independence and recounting
	/// the former canonical.
	pub async fn unmerge_post(&self, post_id: Uuid, actor_id: &str) -> ServiceResult<Uuid> {
		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;
		let post = queries::lock_post(&mut tx, post_id)
			.await?
			.ok_or_else(|| ServiceError::NotFound { message: format!("Post {post_id}.") })?;
		let Some(canonical_id) = post.canonical_post_id else {
			return Err(ServiceError::Validation {
				message: format!("Post {post_id} is not currently merged."),
			});
		};

		sqlx::query(
			"\
UPDATE posts
SET canonical_post_id = NULL, merged_at = NULL, merged_by_actor_id = NULL, updated_at = $2
WHERE post_id = $1",
		)
		.bind(post_id)
		.bind(now)
		.execute(&mut *tx)
		.await?;
		queries::recount_votes(&mut *tx, canonical_id, now).await?;
		tx.commit().await?;

		tracing::info!(
			post_id = %post_id,
			canonical_id = %canonical_id,
			actor_id,
			"Unmerged post.",
		);

		Ok(canonical_id)
	}

	/// Idempotent retry path: re-reconciles a post's vote count from the
	/// source-of-truth vote rows without touching merge linkage.
	pub async fn recount_votes(&self, post_id: Uuid) -> ServiceResult<i64> {
		let now = OffsetDateTime::now_utc();
		let exists = queries::fetch_post(&self.db.pool, post_id).await?;

		if exists.is_none() {
			return Err(ServiceError::NotFound { message: format!("Post {post_id}.") });
		}

		Ok(queries::recount_votes(&self.db.pool, post_id, now).await?)
	}

	/// Live posts currently merged into `canonical_id`, oldest merge first.
	pub async fn merged_posts(&self, canonical_id: Uuid) -> ServiceResult<Vec<MergedPost>> {
		let rows: Vec<MergedPost> = sqlx::query_as(
			"\
SELECT post_id, title, vote_count, author_name, merged_at
FROM posts
WHERE canonical_post_id = $1 AND deleted_at IS NULL
ORDER BY merged_at ASC, post_id",
		)
		.bind(canonical_id)
		.fetch_all(&self.db.pool)
		.await?;

		Ok(rows)
	}

	/// Where a duplicate ended up. `None` for posts that are not merged.
	pub async fn merge_info(&self, post_id: Uuid) -> ServiceResult<Option<MergeInfo>> {
		let post = queries::fetch_post(&self.db.pool, post_id)
			.await?
			.ok_or_else(|| ServiceError::NotFound { message: format!("Post {post_id}.") })?;
		let Some(canonical_id) = post.canonical_post_id else {
			return Ok(None);
		};
		let canonical = queries::fetch_post(&self.db.pool, canonical_id).await?.ok_or_else(|| {
			ServiceError::Storage {
				message: format!("Canonical post {canonical_id} is missing for {post_id}."),
			}
		})?;

		Ok(Some(MergeInfo {
			canonical_post_id: canonical_id,
			canonical_title: canonical.title,
			canonical_board_slug: canonical.board_slug,
			merged_at: post.merged_at,
		}))
	}
}

/// Transactional merge body, shared with the suggestion resolver so that an
/// accept commits its status flip and the merge atomically.
pub(crate) async fn merge_in_tx(
	tx: &mut Transaction<'_, Postgres>,
	duplicate_id: Uuid,
	canonical_id: Uuid,
	actor_id: &str,
	now: OffsetDateTime,
) -> ServiceResult<MergeOutcome> {
	if duplicate_id == canonical_id {
		return Err(ServiceError::Validation {
			message: "A post cannot be merged into itself.".to_string(),
		});
	}

	// Lock both rows in id order so concurrent merges serialize instead of
	// deadlocking. The race loser re-reads fresh linkage below and fails
	// with Conflict.
	let (first, second) = if duplicate_id < canonical_id {
		(duplicate_id, canonical_id)
	} else {
		(canonical_id, duplicate_id)
	};
	let first_post = queries::lock_post(tx, first).await?;
	let second_post = queries::lock_post(tx, second).await?;
	let (duplicate, canonical) = if first == duplicate_id {
		(first_post, second_post)
	} else {
		(second_post, first_post)
	};
	let duplicate = duplicate
		.filter(|post| post.deleted_at.is_none())
		.ok_or_else(|| ServiceError::NotFound { message: format!("Post {duplicate_id}.") })?;
	let canonical = canonical
		.filter(|post| post.deleted_at.is_none())
		.ok_or_else(|| ServiceError::NotFound { message: format!("Post {canonical_id}.") })?;

	if duplicate.canonical_post_id.is_some() {
		return Err(ServiceError::Conflict {
			message: format!("Post {duplicate_id} is already merged; unmerge it first."),
		});
	}
	if canonical.canonical_post_id.is_some() {
		return Err(ServiceError::Validation {
			message: format!(
				"Post {canonical_id} is itself a duplicate and cannot be a merge target."
			),
		});
	}
	if queries::merged_child_count(&mut **tx, duplicate_id).await? > 0 {
		return Err(ServiceError::Validation {
			message: format!(
				"Post {duplicate_id} has posts merged into it; unmerge those first."
			),
		});
	}

	sqlx::query(
		"\
UPDATE posts
SET canonical_post_id = $2, merged_at = $3, merged_by_actor_id = $4, updated_at = $3
WHERE post_id = $1",
	)
	.bind(duplicate_id)
	.bind(canonical_id)
	.bind(now)
	.bind(actor_id)
	.execute(&mut **tx)
	.await?;

	let canonical_vote_count = queries::recount_votes(&mut **tx, canonical_id, now).await?;

	Ok(MergeOutcome { duplicate_id, canonical_id, canonical_vote_count, merged_at: now })
}

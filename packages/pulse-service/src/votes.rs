//! Vote toggling.
//!
//! One row per (post, voter). Toggling a vote on a merged duplicate keeps the
//! vote attached to the duplicate and re-reconciles the canonical, so the
//! canonical's count always reflects distinct voters across the whole merge
//! group.

use time::OffsetDateTime;
use uuid::Uuid;

use pulse_storage::queries;

use crate::{FeedbackService, ServiceError, ServiceResult};

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct VoteToggle {
	pub post_id: Uuid,
	pub voted: bool,
	pub vote_count: i64,
}

impl FeedbackService {
	/// Adds the voter's vote if absent, removes it if present. Returns the
	/// post's reconciled count after the flip.
	pub async fn toggle_vote(&self, post_id: Uuid, voter_id: &str) -> ServiceResult<VoteToggle> {
		let voter_id = voter_id.trim();

		if voter_id.is_empty() {
			return Err(ServiceError::Validation {
				message: "Voter id must not be empty.".to_string(),
			});
		}

		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;
		let post = queries::lock_post(&mut tx, post_id)
			.await?
			.filter(|post| post.deleted_at.is_none())
			.ok_or_else(|| ServiceError::NotFound { message: format!("Post {post_id}.") })?;
		let inserted = sqlx::query(
			"\
INSERT INTO votes (post_id, voter_id, created_at)
VALUES ($1, $2, $3)
ON CONFLICT (post_id, voter_id) DO NOTHING",
		)
		.bind(post_id)
		.bind(voter_id)
		.bind(now)
		.execute(&mut *tx)
		.await?
		.rows_affected();
		let voted = if inserted == 1 {
			true
		} else {
			sqlx::query("DELETE FROM votes WHERE post_id = $1 AND voter_id = $2")
				.bind(post_id)
				.bind(voter_id)
				.execute(&mut *tx)
				.await?;

			false
		};
		let vote_count = queries::recount_votes(&mut *tx, post_id, now).await?;

		// A vote on a duplicate changes the canonical's distinct-voter set.
		if let Some(canonical_id) = post.canonical_post_id {
			queries::recount_votes(&mut *tx, canonical_id, now).await?;
		}

		tx.commit().await?;

		Ok(VoteToggle { post_id, voted, vote_count })
	}
}

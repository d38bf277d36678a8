//! Feedback suggestion pipeline and resolution.
//!
//! Extracted signals become `pending` suggestion rows; human review resolves
//! them through a single compare-and-set on the status column, so concurrent
//! resolvers cannot both win. The side effect of an accept (a merge or a new
//! post) commits in the same transaction as the status flip.

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use pulse_domain::suggestion::{
	self, SUGGESTION_EXPIRY_DAYS, SuggestionStatus, SuggestionType,
};
use pulse_storage::models::FeedbackSuggestion;

use crate::{
	FeedbackService, ServiceError, ServiceResult,
	posts::{CreatePostRequest, build_post},
};

/// One actionable piece of feedback pulled out of a raw item by the
/// extractor.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ExtractedSignal {
	pub title: String,
	pub body: String,
	pub board_slug: String,
}

#[derive(Debug, serde::Serialize)]
pub struct SuggestionView {
	pub suggestion_id: Uuid,
	pub item_id: Uuid,
	pub suggestion_type: SuggestionType,
	pub status: SuggestionStatus,
	pub target_post_id: Option<Uuid>,
	pub similarity_score: Option<f32>,
	pub proposed_title: Option<String>,
	pub proposed_body: Option<String>,
	pub proposed_board_slug: Option<String>,
	pub result_post_id: Option<Uuid>,
	pub created_at: OffsetDateTime,
	pub resolved_at: Option<OffsetDateTime>,
	pub resolved_by_actor_id: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct ResolvedSuggestion {
	pub suggestion_id: Uuid,
	pub status: SuggestionStatus,
	/// The canonical post for an accepted merge, the new post for an accepted
	/// create. `None` for dismissals.
	pub result_post_id: Option<Uuid>,
}

/// Reviewer edits applied when accepting a `create_post` suggestion.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct AcceptOverrides {
	pub title: Option<String>,
	pub body: Option<String>,
	pub board_slug: Option<String>,
}

impl FeedbackService {
	/// Turns one extracted signal into a pending suggestion: a merge proposal
	/// when the best similar post clears the similarity bar, a new-post
	/// proposal otherwise. The proposed content is stored either way so a
	/// reviewer who disagrees with a merge can still see what would have been
	/// posted.
	pub async fn suggest_for_signal(
		&self,
		item_id: Uuid,
		signal: &ExtractedSignal,
	) -> ServiceResult<SuggestionView> {
		let title = signal.title.trim();
		let body = signal.body.trim();
		let board_slug = signal.board_slug.trim();

		if title.is_empty() || body.is_empty() || board_slug.is_empty() {
			return Err(ServiceError::Validation {
				message: "Signal title, body and board must not be empty.".to_string(),
			});
		}

		let query = format!("{title}\n\n{body}");
		let matches =
			self.find_similar(&query, self.cfg.search.candidate_limit).await.unwrap_or_else(|err| {
				tracing::warn!(error = %err, "Similarity search failed; proposing a new post.");

				Vec::new()
			});
		let top = matches.first();
		let suggestion_type = suggestion::suggested_action(top.map(|m| m.score));
		let (target_post_id, similarity_score) = match (suggestion_type, top) {
			(SuggestionType::MergePost, Some(top)) => (Some(top.post_id), Some(top.score)),
			(_, top) => (None, top.map(|m| m.score)),
		};
		let suggestion_id = Uuid::new_v4();
		let now = OffsetDateTime::now_utc();

		sqlx::query(
			"\
INSERT INTO feedback_suggestions (
	suggestion_id,
	item_id,
	suggestion_type,
	status,
	source_post_id,
	target_post_id,
	similarity_score,
	proposed_title,
	proposed_body,
	proposed_board_slug,
	created_at
)
VALUES ($1, $2, $3, $4, NULL, $5, $6, $7, $8, $9, $10)",
		)
		.bind(suggestion_id)
		.bind(item_id)
		.bind(suggestion_type.as_str())
		.bind(SuggestionStatus::Pending.as_str())
		.bind(target_post_id)
		.bind(similarity_score)
		.bind(title)
		.bind(body)
		.bind(board_slug)
		.bind(now)
		.execute(&self.db.pool)
		.await?;

		tracing::info!(
			suggestion_id = %suggestion_id,
			item_id = %item_id,
			suggestion_type = suggestion_type.as_str(),
			"Recorded suggestion.",
		);

		Ok(SuggestionView {
			suggestion_id,
			item_id,
			suggestion_type,
			status: SuggestionStatus::Pending,
			target_post_id,
			similarity_score,
			proposed_title: Some(title.to_string()),
			proposed_body: Some(body.to_string()),
			proposed_board_slug: Some(board_slug.to_string()),
			result_post_id: None,
			created_at: now,
			resolved_at: None,
			resolved_by_actor_id: None,
		})
	}

	/// Accepts a pending suggestion and performs its side effect atomically.
	///
	/// For a merge proposal the proposed content is first materialized as a
	/// post, then merged into the target, so the feedback is preserved under
	/// the canonical rather than discarded. For a create proposal the post is
	/// created from the proposed content with any reviewer overrides applied.
	pub async fn accept_suggestion(
		&self,
		suggestion_id: Uuid,
		actor_id: &str,
		overrides: AcceptOverrides,
	) -> ServiceResult<ResolvedSuggestion> {
		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;
		let row = claim_pending(&mut tx, suggestion_id, SuggestionStatus::Accepted, actor_id, now)
			.await?;
		let suggestion_type =
			SuggestionType::parse(&row.suggestion_type).ok_or_else(|| ServiceError::Storage {
				message: format!("Unknown suggestion type {:?}.", row.suggestion_type),
			})?;
		let request = CreatePostRequest {
			board_slug: overrides
				.board_slug
				.or(row.proposed_board_slug)
				.unwrap_or_default(),
			title: overrides.title.or(row.proposed_title).unwrap_or_default(),
			body: overrides.body.or(row.proposed_body).unwrap_or_default(),
			author_name: actor_id.to_string(),
		};
		let result_post_id = match suggestion_type {
			SuggestionType::MergePost => {
				let target_post_id = row.target_post_id.ok_or_else(|| ServiceError::Storage {
					message: format!("Merge suggestion {suggestion_id} has no target post."),
				})?;
				// A suggestion raised against an existing post merges that
				// post; one raised from raw feedback first materializes the
				// proposed content so the merge has a duplicate to point at.
				let source_post_id = match row.source_post_id {
					Some(source_post_id) => source_post_id,
					None => {
						let source = build_post(request, now)?;

						pulse_storage::queries::insert_post(&mut *tx, &source).await?;

						source.post_id
					},
				};
				let outcome =
					crate::merge::merge_in_tx(&mut tx, source_post_id, target_post_id, actor_id, now)
						.await?;

				outcome.canonical_id
			},
			SuggestionType::CreatePost => {
				let post = build_post(request, now)?;

				pulse_storage::queries::insert_post(&mut *tx, &post).await?;

				post.post_id
			},
		};

		sqlx::query("UPDATE feedback_suggestions SET result_post_id = $2 WHERE suggestion_id = $1")
			.bind(suggestion_id)
			.bind(result_post_id)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;

		tracing::info!(
			suggestion_id = %suggestion_id,
			result_post_id = %result_post_id,
			actor_id,
			"Accepted suggestion.",
		);

		Ok(ResolvedSuggestion {
			suggestion_id,
			status: SuggestionStatus::Accepted,
			result_post_id: Some(result_post_id),
		})
	}

	pub async fn dismiss_suggestion(
		&self,
		suggestion_id: Uuid,
		actor_id: &str,
	) -> ServiceResult<ResolvedSuggestion> {
		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;

		claim_pending(&mut tx, suggestion_id, SuggestionStatus::Dismissed, actor_id, now).await?;
		tx.commit().await?;

		tracing::info!(suggestion_id = %suggestion_id, actor_id, "Dismissed suggestion.");

		Ok(ResolvedSuggestion {
			suggestion_id,
			status: SuggestionStatus::Dismissed,
			result_post_id: None,
		})
	}

	/// Moves pending suggestions past the expiry window to `expired`. Expired
	/// rows are never deleted.
	pub async fn expire_stale_suggestions(&self) -> ServiceResult<u64> {
		let now = OffsetDateTime::now_utc();
		let cutoff = now - Duration::days(SUGGESTION_EXPIRY_DAYS);
		let expired = sqlx::query(
			"\
UPDATE feedback_suggestions
SET status = $1, resolved_at = $2
WHERE status = $3 AND created_at < $4",
		)
		.bind(SuggestionStatus::Expired.as_str())
		.bind(now)
		.bind(SuggestionStatus::Pending.as_str())
		.bind(cutoff)
		.execute(&self.db.pool)
		.await?
		.rows_affected();

		if expired > 0 {
			tracing::info!(expired, "Expired stale suggestions.");
		}

		Ok(expired)
	}

	pub async fn pending_suggestions(&self, limit: i64) -> ServiceResult<Vec<SuggestionView>> {
		let rows: Vec<FeedbackSuggestion> = sqlx::query_as(
			"\
SELECT *
FROM feedback_suggestions
WHERE status = $1
ORDER BY created_at ASC
LIMIT $2",
		)
		.bind(SuggestionStatus::Pending.as_str())
		.bind(limit)
		.fetch_all(&self.db.pool)
		.await?;

		rows.into_iter().map(view_from_row).collect()
	}

	pub async fn suggestion(&self, suggestion_id: Uuid) -> ServiceResult<SuggestionView> {
		let row: Option<FeedbackSuggestion> =
			sqlx::query_as("SELECT * FROM feedback_suggestions WHERE suggestion_id = $1")
				.bind(suggestion_id)
				.fetch_optional(&self.db.pool)
				.await?;
		let row = row.ok_or_else(|| ServiceError::NotFound {
			message: format!("Suggestion {suggestion_id}."),
		})?;

		view_from_row(row)
	}
}

/// Compare-and-set `pending -> terminal`. Exactly one caller can win the
/// transition; the losers learn whether the row was missing or already
/// resolved.
async fn claim_pending(
	tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
	suggestion_id: Uuid,
	to: SuggestionStatus,
	actor_id: &str,
	now: OffsetDateTime,
) -> ServiceResult<FeedbackSuggestion> {
	let row: Option<FeedbackSuggestion> = sqlx::query_as(
		"\
UPDATE feedback_suggestions
SET status = $2, resolved_at = $3, resolved_by_actor_id = $4
WHERE suggestion_id = $1 AND status = $5
RETURNING *",
	)
	.bind(suggestion_id)
	.bind(to.as_str())
	.bind(now)
	.bind(actor_id)
	.bind(SuggestionStatus::Pending.as_str())
	.fetch_optional(&mut **tx)
	.await?;

	if let Some(row) = row {
		return Ok(row);
	}

	let status: Option<String> =
		sqlx::query_scalar("SELECT status FROM feedback_suggestions WHERE suggestion_id = $1")
			.bind(suggestion_id)
			.fetch_optional(&mut **tx)
			.await?;

	match status {
		None => Err(ServiceError::NotFound { message: format!("Suggestion {suggestion_id}.") }),
		Some(status) => Err(ServiceError::Conflict {
			message: format!("Suggestion {suggestion_id} is already {status}."),
		}),
	}
}

fn view_from_row(row: FeedbackSuggestion) -> ServiceResult<SuggestionView> {
	let suggestion_type =
		SuggestionType::parse(&row.suggestion_type).ok_or_else(|| ServiceError::Storage {
			message: format!("Unknown suggestion type {:?}.", row.suggestion_type),
		})?;
	let status = SuggestionStatus::parse(&row.status).ok_or_else(|| ServiceError::Storage {
		message: format!("Unknown suggestion status {:?}.", row.status),
	})?;

	Ok(SuggestionView {
		suggestion_id: row.suggestion_id,
		item_id: row.item_id,
		suggestion_type,
		status,
		target_post_id: row.target_post_id,
		similarity_score: row.similarity_score,
		proposed_title: row.proposed_title,
		proposed_body: row.proposed_body,
		proposed_board_slug: row.proposed_board_slug,
		result_post_id: row.result_post_id,
		created_at: row.created_at,
		resolved_at: row.resolved_at,
		resolved_by_actor_id: row.resolved_by_actor_id,
	})
}

//! Post and comment lifecycle.
//!
//! Reads over a canonical post aggregate across its merge group: the comment
//! count and listing include comments left on live duplicates, so merged
//! discussion stays visible from the canonical.

use time::OffsetDateTime;
use uuid::Uuid;

use pulse_storage::{models::Post, queries};

use crate::{FeedbackService, ServiceError, ServiceResult};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreatePostRequest {
	pub board_slug: String,
	pub title: String,
	pub body: String,
	pub author_name: String,
}

#[derive(Debug, sqlx::FromRow, serde::Serialize)]
pub struct PostView {
	pub post_id: Uuid,
	pub board_slug: String,
	pub title: String,
	pub body: String,
	pub author_name: String,
	pub vote_count: i64,
	/// Live comments across the post and everything merged into it.
	pub comment_count: i64,
	pub canonical_post_id: Option<Uuid>,
	pub merged_at: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow, serde::Serialize)]
pub struct CommentView {
	pub comment_id: Uuid,
	/// Which post in the merge group the comment was left on.
	pub post_id: Uuid,
	pub author_name: String,
	pub body: String,
	pub created_at: OffsetDateTime,
}

const POST_VIEW_SELECT: &str = "\
SELECT
	p.post_id,
	p.board_slug,
	p.title,
	p.body,
	p.author_name,
	p.vote_count,
	(
		SELECT COUNT(*)
		FROM comments c
		JOIN posts q ON q.post_id = c.post_id
		WHERE c.deleted_at IS NULL
			AND q.deleted_at IS NULL
			AND (q.post_id = p.post_id OR q.canonical_post_id = p.post_id)
	) AS comment_count,
	p.canonical_post_id,
	p.merged_at,
	p.created_at
FROM posts p";

impl FeedbackService {
	pub async fn create_post(&self, request: CreatePostRequest) -> ServiceResult<Post> {
		let now = OffsetDateTime::now_utc();
		let post = build_post(request, now)?;

		queries::insert_post(&self.db.pool, &post).await?;

		tracing::info!(post_id = %post.post_id, board_slug = post.board_slug, "Created post.");

		// Indexing is best-effort. A post that misses its embedding is still
		// reachable through the keyword branch.
		if let Err(err) = self.index_post(&post).await {
			tracing::warn!(post_id = %post.post_id, error = %err, "Failed to index post embedding.");
		}

		Ok(post)
	}

	pub async fn post(&self, post_id: Uuid) -> ServiceResult<PostView> {
		let view: Option<PostView> =
			sqlx::query_as(&format!("{POST_VIEW_SELECT} WHERE p.post_id = $1 AND p.deleted_at IS NULL"))
				.bind(post_id)
				.fetch_optional(&self.db.pool)
				.await?;

		view.ok_or_else(|| ServiceError::NotFound { message: format!("Post {post_id}.") })
	}

	/// Board listing: live canonical posts only, most-voted first.
	pub async fn list_posts(&self, board_slug: &str) -> ServiceResult<Vec<PostView>> {
		let views: Vec<PostView> = sqlx::query_as(&format!(
			"\
{POST_VIEW_SELECT}
WHERE p.board_slug = $1 AND p.deleted_at IS NULL AND p.canonical_post_id IS NULL
ORDER BY p.vote_count DESC, p.created_at DESC"
		))
		.bind(board_slug)
		.fetch_all(&self.db.pool)
		.await?;

		Ok(views)
	}

	/// Soft delete. Merge linkage on the row is retained so the deletion is
	/// auditable, but the post stops counting toward its canonical.
	pub async fn delete_post(&self, post_id: Uuid) -> ServiceResult<()> {
		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;
		let post = queries::lock_post(&mut tx, post_id)
			.await?
			.filter(|post| post.deleted_at.is_none())
			.ok_or_else(|| ServiceError::NotFound { message: format!("Post {post_id}.") })?;

		sqlx::query("UPDATE posts SET deleted_at = $2, updated_at = $2 WHERE post_id = $1")
			.bind(post_id)
			.bind(now)
			.execute(&mut *tx)
			.await?;

		if let Some(canonical_id) = post.canonical_post_id {
			queries::recount_votes(&mut *tx, canonical_id, now).await?;
		}

		tx.commit().await?;

		tracing::info!(post_id = %post_id, "Deleted post.");

		Ok(())
	}

	pub async fn add_comment(
		&self,
		post_id: Uuid,
		author_name: &str,
		body: &str,
	) -> ServiceResult<CommentView> {
		let author_name = author_name.trim();
		let body = body.trim();

		if author_name.is_empty() || body.is_empty() {
			return Err(ServiceError::Validation {
				message: "Comment author and body must not be empty.".to_string(),
			});
		}

		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;

		queries::lock_post(&mut tx, post_id)
			.await?
			.filter(|post| post.deleted_at.is_none())
			.ok_or_else(|| ServiceError::NotFound { message: format!("Post {post_id}.") })?;

		let comment_id = Uuid::new_v4();

		sqlx::query(
			"\
INSERT INTO comments (comment_id, post_id, author_name, body, created_at)
VALUES ($1, $2, $3, $4, $5)",
		)
		.bind(comment_id)
		.bind(post_id)
		.bind(author_name)
		.bind(body)
		.bind(now)
		.execute(&mut *tx)
		.await?;
		sqlx::query(
			"UPDATE posts SET comment_count = comment_count + 1, updated_at = $2 WHERE post_id = $1",
		)
		.bind(post_id)
		.bind(now)
		.execute(&mut *tx)
		.await?;
		tx.commit().await?;

		Ok(CommentView {
			comment_id,
			post_id,
			author_name: author_name.to_string(),
			body: body.to_string(),
			created_at: now,
		})
	}

	/// Live comments across the post and its merged duplicates.
	pub async fn comment_count(&self, post_id: Uuid) -> ServiceResult<i64> {
		let count: i64 = sqlx::query_scalar(
			"\
SELECT COUNT(*)
FROM comments c
JOIN posts q ON q.post_id = c.post_id
WHERE c.deleted_at IS NULL
	AND q.deleted_at IS NULL
	AND (q.post_id = $1 OR q.canonical_post_id = $1)",
		)
		.bind(post_id)
		.fetch_one(&self.db.pool)
		.await?;

		Ok(count)
	}

	/// Comments for a post plus everything merged into it, oldest first.
	pub async fn list_comments(&self, post_id: Uuid) -> ServiceResult<Vec<CommentView>> {
		queries::fetch_post(&self.db.pool, post_id)
			.await?
			.filter(|post| post.deleted_at.is_none())
			.ok_or_else(|| ServiceError::NotFound { message: format!("Post {post_id}.") })?;

		let comments: Vec<CommentView> = sqlx::query_as(
			"\
SELECT c.comment_id, c.post_id, c.author_name, c.body, c.created_at
FROM comments c
JOIN posts q ON q.post_id = c.post_id
WHERE c.deleted_at IS NULL
	AND q.deleted_at IS NULL
	AND (q.post_id = $1 OR q.canonical_post_id = $1)
ORDER BY c.created_at ASC, c.comment_id",
		)
		.bind(post_id)
		.fetch_all(&self.db.pool)
		.await?;

		Ok(comments)
	}

	/// Writes or refreshes the post's embedding row. A no-op when AI is
	/// disabled.
	pub(crate) async fn index_post(&self, post: &Post) -> ServiceResult<()> {
		if !self.cfg.ai.enabled {
			return Ok(());
		}

		let text = format!("{}\n\n{}", post.title, post.body);
		let embeddings =
			self.providers.embedding.embed(&self.cfg.ai.embedding, &[text]).await?;
		let Some(vec) = embeddings.into_iter().next() else {
			return Err(ServiceError::Provider {
				message: "Embedding provider returned no vectors.".to_string(),
			});
		};

		sqlx::query(
			"\
INSERT INTO post_embeddings (post_id, embedding_version, embedding_dim, vec, created_at)
VALUES ($1, $2, $3, $4::text::vector, $5)
ON CONFLICT (post_id) DO UPDATE
SET embedding_version = EXCLUDED.embedding_version,
	embedding_dim = EXCLUDED.embedding_dim,
	vec = EXCLUDED.vec,
	created_at = EXCLUDED.created_at",
		)
		.bind(post.post_id)
		.bind(crate::embedding_version(&self.cfg))
		.bind(vec.len() as i32)
		.bind(crate::vector_to_pg(&vec))
		.bind(OffsetDateTime::now_utc())
		.execute(&self.db.pool)
		.await?;

		Ok(())
	}
}

pub(crate) fn build_post(request: CreatePostRequest, now: OffsetDateTime) -> ServiceResult<Post> {
	let board_slug = request.board_slug.trim().to_string();
	let title = request.title.trim().to_string();
	let body = request.body.trim().to_string();
	let author_name = request.author_name.trim().to_string();

	if board_slug.is_empty() || title.is_empty() || body.is_empty() || author_name.is_empty() {
		return Err(ServiceError::Validation {
			message: "Board, title, body and author must not be empty.".to_string(),
		});
	}

	Ok(Post {
		post_id: Uuid::new_v4(),
		board_slug,
		title,
		body,
		author_name,
		vote_count: 0,
		comment_count: 0,
		canonical_post_id: None,
		merged_at: None,
		merged_by_actor_id: None,
		created_at: now,
		updated_at: now,
		deleted_at: None,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn build_post_trims_and_rejects_blank_fields() {
		let now = OffsetDateTime::now_utc();
		let post = build_post(
			CreatePostRequest {
				board_slug: " features ".to_string(),
				title: "Dark mode".to_string(),
				body: "Please add a dark theme.".to_string(),
				author_name: " Ada ".to_string(),
			},
			now,
		)
		.unwrap();

		assert_eq!(post.board_slug, "features");
		assert_eq!(post.author_name, "Ada");
		assert_eq!(post.vote_count, 0);
		assert!(post.canonical_post_id.is_none());

		let err = build_post(
			CreatePostRequest {
				board_slug: "features".to_string(),
				title: "   ".to_string(),
				body: "x".to_string(),
				author_name: "Ada".to_string(),
			},
			now,
		)
		.unwrap_err();

		assert!(matches!(err, crate::ServiceError::Validation { .. }));
	}
}

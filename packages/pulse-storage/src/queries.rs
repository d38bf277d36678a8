//! Shared post/vote access helpers reused by the merge engine, the vote
//! toggle, and the suggestion resolver. Each helper is a typed row-decoding
//! boundary; raw rows never leave this crate.

use sqlx::{Executor, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Result, models::Post};

/// Explicit column list so the generated `search_tsv` column never has to be
/// decoded.
pub const POST_COLUMNS: &str = "\
post_id,
board_slug,
title,
body,
author_name,
vote_count,
comment_count,
canonical_post_id,
merged_at,
merged_by_actor_id,
created_at,
updated_at,
deleted_at";

pub async fn fetch_post<'e, E>(executor: E, post_id: Uuid) -> Result<Option<Post>>
where
	E: Executor<'e, Database = Postgres>,
{
	let post = sqlx::query_as::<_, Post>(&format!(
		"SELECT {POST_COLUMNS} FROM posts WHERE post_id = $1"
	))
	.bind(post_id)
	.fetch_optional(executor)
	.await?;

	Ok(post)
}

/// Row-locks the post for the remainder of the transaction. Concurrent merge
/// attempts serialize here; the loser re-reads fresh linkage after the winner
/// commits.
pub async fn lock_post(tx: &mut Transaction<'_, Postgres>, post_id: Uuid) -> Result<Option<Post>> {
	let post = sqlx::query_as::<_, Post>(&format!(
		"SELECT {POST_COLUMNS} FROM posts WHERE post_id = $1 FOR UPDATE"
	))
	.bind(post_id)
	.fetch_optional(&mut **tx)
	.await?;

	Ok(post)
}

pub async fn insert_post<'e, E>(executor: E, post: &Post) -> Result<()>
where
	E: Executor<'e, Database = Postgres>,
{
	sqlx::query(
		"\
INSERT INTO posts (
	post_id,
	board_slug,
	title,
	body,
	author_name,
	vote_count,
	comment_count,
	canonical_post_id,
	merged_at,
	merged_by_actor_id,
	created_at,
	updated_at,
	deleted_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
	)
	.bind(post.post_id)
	.bind(post.board_slug.as_str())
	.bind(post.title.as_str())
	.bind(post.body.as_str())
	.bind(post.author_name.as_str())
	.bind(post.vote_count)
	.bind(post.comment_count)
	.bind(post.canonical_post_id)
	.bind(post.merged_at)
	.bind(post.merged_by_actor_id.as_deref())
	.bind(post.created_at)
	.bind(post.updated_at)
	.bind(post.deleted_at)
	.execute(executor)
	.await?;

	Ok(())
}

/// Recomputes the denormalized vote count for `post_id` as the number of
/// distinct voters across the post itself and every live post currently
/// merged into it. One atomic statement, so a concurrent vote toggle cannot
/// slip between the read and the write. Idempotent and safe to re-run.
pub async fn recount_votes<'e, E>(executor: E, post_id: Uuid, now: OffsetDateTime) -> Result<i64>
where
	E: Executor<'e, Database = Postgres>,
{
	let count: i64 = sqlx::query_scalar(
		"\
UPDATE posts
SET vote_count = (
	SELECT COUNT(DISTINCT v.voter_id)
	FROM votes v
	JOIN posts p ON p.post_id = v.post_id
	WHERE p.post_id = $1
		OR (p.canonical_post_id = $1 AND p.deleted_at IS NULL)
), updated_at = $2
WHERE post_id = $1
RETURNING vote_count",
	)
	.bind(post_id)
	.bind(now)
	.fetch_one(executor)
	.await?;

	Ok(count)
}

/// How many live posts are currently merged into `post_id`. Non-zero means
/// the post is a canonical root and must not itself become a duplicate.
pub async fn merged_child_count<'e, E>(executor: E, post_id: Uuid) -> Result<i64>
where
	E: Executor<'e, Database = Postgres>,
{
	let count: i64 = sqlx::query_scalar(
		"SELECT COUNT(*) FROM posts WHERE canonical_post_id = $1 AND deleted_at IS NULL",
	)
	.bind(post_id)
	.fetch_one(executor)
	.await?;

	Ok(count)
}

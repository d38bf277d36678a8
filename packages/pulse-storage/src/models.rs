use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Post {
	pub post_id: Uuid,
	pub board_slug: String,
	pub title: String,
	pub body: String,
	pub author_name: String,
	pub vote_count: i64,
	pub comment_count: i64,
	pub canonical_post_id: Option<Uuid>,
	pub merged_at: Option<OffsetDateTime>,
	pub merged_by_actor_id: Option<String>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
	pub deleted_at: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct Comment {
	pub comment_id: Uuid,
	pub post_id: Uuid,
	pub author_name: String,
	pub body: String,
	pub created_at: OffsetDateTime,
	pub deleted_at: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct RawFeedbackItem {
	pub item_id: Uuid,
	pub source: String,
	pub payload: Value,
	pub processing_state: String,
	pub last_error: Option<String>,
	pub attempts: i32,
	pub available_at: OffsetDateTime,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub struct FeedbackSuggestion {
	pub suggestion_id: Uuid,
	pub item_id: Uuid,
	pub suggestion_type: String,
	pub status: String,
	pub source_post_id: Option<Uuid>,
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

//! End-to-end service tests against a disposable Postgres database.
//!
//! Embedding and extraction are stubbed with deterministic providers, so the
//! similarity and suggestion paths run without network access. Set
//! `PULSE_PG_DSN` to a reachable Postgres superuser DSN to run these.

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use pulse_config::{
	Ai, Config, EmbeddingProviderConfig, LlmProviderConfig, Postgres, Search, Service, Storage,
	Worker,
};
use pulse_domain::{
	fusion::MatchStrength,
	suggestion::{SuggestionStatus, SuggestionType},
};
use pulse_service::{
	AcceptOverrides, BoxFuture, CreatePostRequest, EmbeddingProvider, ExtractedSignal,
	ExtractorProvider, FeedbackService, IngestRequest, Providers, ServiceError,
};
use pulse_storage::db::Db;
use pulse_testkit::TestDatabase;

const SKIP_HINT: &str = "set PULSE_PG_DSN to run this test";
const VECTOR_DIM: u32 = 3;

/// Deterministic stand-ins for the embedding and extraction models. Texts
/// embed onto fixed orthogonal axes, so similarity is either 1.0 or 0.0.
struct StubProviders;

impl EmbeddingProvider for StubProviders {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(texts.iter().map(|text| stub_vector(text)).collect()) })
	}
}

impl ExtractorProvider for StubProviders {
	fn extract<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_messages: &'a [Value],
	) -> BoxFuture<'a, color_eyre::Result<Value>> {
		Box::pin(async { Ok(serde_json::json!({ "signals": [] })) })
	}
}

fn stub_vector(text: &str) -> Vec<f32> {
	let lowered = text.to_lowercase();

	if lowered.contains("dark") {
		vec![1.0, 0.0, 0.0]
	} else if lowered.contains("export") {
		vec![0.0, 1.0, 0.0]
	} else {
		vec![0.0, 0.0, 1.0]
	}
}

fn test_config(dsn: &str, ai_enabled: bool) -> Config {
	Config {
		service: Service { log_level: "warn".to_string() },
		storage: Storage {
			postgres: Postgres { dsn: dsn.to_string(), pool_max_conns: 5 },
		},
		ai: Ai {
			enabled: ai_enabled,
			embedding: EmbeddingProviderConfig {
				provider_id: "stub".to_string(),
				api_base: "http://localhost".to_string(),
				api_key: "test".to_string(),
				path: "/embeddings".to_string(),
				model: "stub-embedding".to_string(),
				dimensions: VECTOR_DIM,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			extractor: LlmProviderConfig {
				provider_id: "stub".to_string(),
				api_base: "http://localhost".to_string(),
				api_key: "test".to_string(),
				path: "/chat/completions".to_string(),
				model: "stub-extractor".to_string(),
				temperature: 0.0,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
		},
		search: Search { candidate_limit: 5, keyword_timeout_ms: 2_000, vector_timeout_ms: 2_000 },
		worker: Worker::default(),
	}
}

async fn setup(ai_enabled: bool) -> Option<(TestDatabase, FeedbackService)> {
	let base_dsn = pulse_testkit::env_dsn()?;
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let cfg = test_config(test_db.dsn(), ai_enabled);
	let db = Db::connect(&cfg.storage.postgres).await.expect("Failed to connect to Postgres.");

	db.ensure_schema(VECTOR_DIM).await.expect("Failed to ensure schema.");

	let provider = Arc::new(StubProviders);
	let service =
		FeedbackService::with_providers(cfg, db, Providers::new(provider.clone(), provider));

	Some((test_db, service))
}

fn post_request(board_slug: &str, title: &str, body: &str) -> CreatePostRequest {
	CreatePostRequest {
		board_slug: board_slug.to_string(),
		title: title.to_string(),
		body: body.to_string(),
		author_name: "ada".to_string(),
	}
}

async fn ingest_item(service: &FeedbackService) -> Uuid {
	service
		.ingest_raw_item(IngestRequest {
			source: "intercom".to_string(),
			payload: serde_json::json!({ "text": "feedback" }),
		})
		.await
		.expect("Failed to ingest raw item.")
}

fn signal(title: &str, body: &str) -> ExtractedSignal {
	ExtractedSignal {
		title: title.to_string(),
		body: body.to_string(),
		board_slug: "features".to_string(),
	}
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set PULSE_PG_DSN to run."]
async fn merge_reconciles_distinct_voters_and_unmerge_restores() {
	let Some((test_db, service)) = setup(false).await else {
		eprintln!("Skipping merge_reconciles_distinct_voters_and_unmerge_restores; {SKIP_HINT}.");

		return;
	};
	let canonical = service
		.create_post(post_request("features", "Dark mode", "Please add a dark theme."))
		.await
		.expect("Failed to create canonical.");
	let duplicate = service
		.create_post(post_request("features", "Night theme", "A darker color scheme at night."))
		.await
		.expect("Failed to create duplicate.");

	for voter in ["v1", "v2", "v3"] {
		service.toggle_vote(canonical.post_id, voter).await.expect("Failed to vote.");
	}
	for voter in ["v2", "v4"] {
		service.toggle_vote(duplicate.post_id, voter).await.expect("Failed to vote.");
	}

	let outcome = service
		.merge_post(duplicate.post_id, canonical.post_id, "admin")
		.await
		.expect("Failed to merge.");

	// v2 voted on both posts and must count once.
	assert_eq!(outcome.canonical_vote_count, 4);

	// A new vote on the duplicate flows into the canonical's count.
	service.toggle_vote(duplicate.post_id, "v5").await.expect("Failed to vote on duplicate.");

	let view = service.post(canonical.post_id).await.expect("Failed to fetch canonical.");

	assert_eq!(view.vote_count, 5);

	let info = service
		.merge_info(duplicate.post_id)
		.await
		.expect("Failed to fetch merge info.")
		.expect("Duplicate should report merge info.");

	assert_eq!(info.canonical_post_id, canonical.post_id);
	assert_eq!(info.canonical_title, "Dark mode");

	let children = service.merged_posts(canonical.post_id).await.expect("Failed to list children.");

	assert_eq!(children.len(), 1);
	assert_eq!(children[0].post_id, duplicate.post_id);

	service.unmerge_post(duplicate.post_id, "admin").await.expect("Failed to unmerge.");

	let canonical_after =
		service.post(canonical.post_id).await.expect("Failed to fetch canonical.");
	let duplicate_after =
		service.post(duplicate.post_id).await.expect("Failed to fetch duplicate.");

	assert_eq!(canonical_after.vote_count, 3);
	assert_eq!(duplicate_after.vote_count, 3, "v2, v4 and v5 voted on the duplicate");
	assert!(duplicate_after.canonical_post_id.is_none());
	assert!(
		service.merge_info(duplicate.post_id).await.expect("Failed to fetch merge info.").is_none()
	);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set PULSE_PG_DSN to run."]
async fn merge_validations_reject_bad_shapes() {
	let Some((test_db, service)) = setup(false).await else {
		eprintln!("Skipping merge_validations_reject_bad_shapes; {SKIP_HINT}.");

		return;
	};
	let a = service
		.create_post(post_request("features", "Dark mode", "Please add a dark theme."))
		.await
		.expect("Failed to create post.");
	let b = service
		.create_post(post_request("features", "Night theme", "Darker colors at night."))
		.await
		.expect("Failed to create post.");
	let c = service
		.create_post(post_request("features", "Black theme", "An OLED black skin."))
		.await
		.expect("Failed to create post.");

	let self_merge = service.merge_post(a.post_id, a.post_id, "admin").await.unwrap_err();

	assert!(matches!(self_merge, ServiceError::Validation { .. }));

	let missing = service.merge_post(Uuid::new_v4(), a.post_id, "admin").await.unwrap_err();

	assert!(matches!(missing, ServiceError::NotFound { .. }));

	service.merge_post(b.post_id, a.post_id, "admin").await.expect("Failed to merge b into a.");

	// b is already merged.
	let double = service.merge_post(b.post_id, c.post_id, "admin").await.unwrap_err();

	assert!(matches!(double, ServiceError::Conflict { .. }));

	// b is a duplicate and cannot be a target.
	let into_duplicate = service.merge_post(c.post_id, b.post_id, "admin").await.unwrap_err();

	assert!(matches!(into_duplicate, ServiceError::Validation { .. }));

	// a has children, so merging it away would build a chain.
	let chain = service.merge_post(a.post_id, c.post_id, "admin").await.unwrap_err();

	assert!(matches!(chain, ServiceError::Validation { .. }));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set PULSE_PG_DSN to run."]
async fn keyword_only_matches_are_capped_and_weak() {
	let Some((test_db, service)) = setup(false).await else {
		eprintln!("Skipping keyword_only_matches_are_capped_and_weak; {SKIP_HINT}.");

		return;
	};
	let post = service
		.create_post(post_request("features", "Dark mode", "Please add a dark theme."))
		.await
		.expect("Failed to create post.");
	// websearch_to_tsquery ANDs the terms, so the query sticks to words the
	// post actually contains.
	let matches =
		service.find_similar("dark theme", 5).await.expect("Similarity search failed.");

	assert_eq!(matches.len(), 1);
	assert_eq!(matches[0].post_id, post.post_id);
	// With AI off only the keyword branch contributes, and its fusion weight
	// caps the score at 0.3.
	assert!(matches[0].score <= 0.3 + f32::EPSILON);
	assert_eq!(matches[0].match_strength, MatchStrength::Weak);

	assert!(service.find_similar("   ", 5).await.expect("Blank query failed.").is_empty());
	assert!(service.find_similar("dark", 0).await.expect("Zero limit failed.").is_empty());

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set PULSE_PG_DSN to run."]
async fn vector_match_is_strong_and_excludes_merged_duplicates() {
	let Some((test_db, service)) = setup(true).await else {
		eprintln!("Skipping vector_match_is_strong_and_excludes_merged_duplicates; {SKIP_HINT}.");

		return;
	};
	let dark = service
		.create_post(post_request("features", "Dark mode", "Please add a dark theme."))
		.await
		.expect("Failed to create post.");
	let export = service
		.create_post(post_request("features", "CSV export", "Let me export my data."))
		.await
		.expect("Failed to create post.");
	let matches =
		service.find_similar("dark appearance", 5).await.expect("Similarity search failed.");

	assert_eq!(matches[0].post_id, dark.post_id);
	assert_eq!(matches[0].match_strength, MatchStrength::Strong);
	assert!(matches.iter().all(|m| m.post_id != export.post_id));

	// Once merged, the duplicate leaves the candidate pool.
	let second_dark = service
		.create_post(post_request("features", "Night darkness", "Dark colors after dusk."))
		.await
		.expect("Failed to create post.");

	service
		.merge_post(second_dark.post_id, dark.post_id, "admin")
		.await
		.expect("Failed to merge.");

	let matches =
		service.find_similar("dark appearance", 5).await.expect("Similarity search failed.");

	assert!(matches.iter().all(|m| m.post_id != second_dark.post_id));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set PULSE_PG_DSN to run."]
async fn suggestion_pipeline_routes_by_similarity_threshold() {
	let Some((test_db, service)) = setup(true).await else {
		eprintln!("Skipping suggestion_pipeline_routes_by_similarity_threshold; {SKIP_HINT}.");

		return;
	};
	let dark = service
		.create_post(post_request("features", "Dark mode", "Please add a dark theme."))
		.await
		.expect("Failed to create post.");
	let item_id = ingest_item(&service).await;
	let merge_suggestion = service
		.suggest_for_signal(item_id, &signal("Darker UI", "I want a dark skin."))
		.await
		.expect("Failed to record suggestion.");

	assert_eq!(merge_suggestion.suggestion_type, SuggestionType::MergePost);
	assert_eq!(merge_suggestion.target_post_id, Some(dark.post_id));
	assert!(merge_suggestion.similarity_score.expect("score missing") >= 0.6);

	let create_suggestion = service
		.suggest_for_signal(item_id, &signal("CSV export", "Let me export my data."))
		.await
		.expect("Failed to record suggestion.");

	assert_eq!(create_suggestion.suggestion_type, SuggestionType::CreatePost);
	assert!(create_suggestion.target_post_id.is_none());

	// Accepting the merge materializes the proposed content under the
	// canonical.
	let resolved = service
		.accept_suggestion(merge_suggestion.suggestion_id, "reviewer", AcceptOverrides::default())
		.await
		.expect("Failed to accept merge suggestion.");

	assert_eq!(resolved.status, SuggestionStatus::Accepted);
	assert_eq!(resolved.result_post_id, Some(dark.post_id));

	let children = service.merged_posts(dark.post_id).await.expect("Failed to list children.");

	assert_eq!(children.len(), 1);
	assert_eq!(children[0].title, "Darker UI");

	// Accepting the create honors reviewer overrides.
	let resolved = service
		.accept_suggestion(
			create_suggestion.suggestion_id,
			"reviewer",
			AcceptOverrides { title: Some("Data export".to_string()), ..Default::default() },
		)
		.await
		.expect("Failed to accept create suggestion.");
	let new_post_id = resolved.result_post_id.expect("create accept must yield a post");
	let view = service.post(new_post_id).await.expect("Failed to fetch new post.");

	assert_eq!(view.title, "Data export");
	assert_eq!(view.body, "Let me export my data.");

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set PULSE_PG_DSN to run."]
async fn concurrent_resolution_has_exactly_one_winner() {
	let Some((test_db, service)) = setup(false).await else {
		eprintln!("Skipping concurrent_resolution_has_exactly_one_winner; {SKIP_HINT}.");

		return;
	};
	let item_id = ingest_item(&service).await;
	let suggestion = service
		.suggest_for_signal(item_id, &signal("CSV export", "Let me export my data."))
		.await
		.expect("Failed to record suggestion.");
	let (accept, dismiss) = tokio::join!(
		service.accept_suggestion(suggestion.suggestion_id, "alice", AcceptOverrides::default()),
		service.dismiss_suggestion(suggestion.suggestion_id, "bob"),
	);
	let winners = [accept.is_ok(), dismiss.is_ok()].iter().filter(|ok| **ok).count();

	assert_eq!(winners, 1, "exactly one resolver may win: {accept:?} {dismiss:?}");

	let loser = if accept.is_ok() { dismiss.unwrap_err() } else { accept.unwrap_err() };

	assert!(matches!(loser, ServiceError::Conflict { .. }));

	let missing = service
		.dismiss_suggestion(Uuid::new_v4(), "bob")
		.await
		.unwrap_err();

	assert!(matches!(missing, ServiceError::NotFound { .. }));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set PULSE_PG_DSN to run."]
async fn stale_pending_suggestions_expire_but_are_retained() {
	let Some((test_db, service)) = setup(false).await else {
		eprintln!("Skipping stale_pending_suggestions_expire_but_are_retained; {SKIP_HINT}.");

		return;
	};
	let item_id = ingest_item(&service).await;
	let suggestion = service
		.suggest_for_signal(item_id, &signal("CSV export", "Let me export my data."))
		.await
		.expect("Failed to record suggestion.");

	sqlx::query(
		"UPDATE feedback_suggestions SET created_at = created_at - INTERVAL '31 days' \
		 WHERE suggestion_id = $1",
	)
	.bind(suggestion.suggestion_id)
	.execute(&service.db.pool)
	.await
	.expect("Failed to backdate suggestion.");

	let expired = service.expire_stale_suggestions().await.expect("Expiry sweep failed.");

	assert_eq!(expired, 1);

	let view =
		service.suggestion(suggestion.suggestion_id).await.expect("Expired row must be retained.");

	assert_eq!(view.status, SuggestionStatus::Expired);

	let late_accept = service
		.accept_suggestion(suggestion.suggestion_id, "reviewer", AcceptOverrides::default())
		.await
		.unwrap_err();

	assert!(matches!(late_accept, ServiceError::Conflict { .. }));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set PULSE_PG_DSN to run."]
async fn raw_items_move_through_claim_fail_retry() {
	let Some((test_db, service)) = setup(false).await else {
		eprintln!("Skipping raw_items_move_through_claim_fail_retry; {SKIP_HINT}.");

		return;
	};
	let item_id = ingest_item(&service).await;

	// Not claimable until marked ready.
	assert!(service.claim_next_item().await.expect("Claim failed.").is_none());

	service.mark_item_ready(item_id).await.expect("Failed to mark ready.");

	let claimed = service
		.claim_next_item()
		.await
		.expect("Claim failed.")
		.expect("Expected a claimable item.");

	assert_eq!(claimed.item_id, item_id);
	assert_eq!(claimed.attempts, 1);

	// The claim leases the item; a second worker sees nothing.
	assert!(service.claim_next_item().await.expect("Claim failed.").is_none());

	service.mark_item_failed(item_id, "extractor exploded").await.expect("Failed to mark failed.");

	let already_failed = service.mark_item_extracted(item_id).await.unwrap_err();

	assert!(matches!(already_failed, ServiceError::Conflict { .. }));

	service.retry_item(item_id).await.expect("Failed to retry.");

	let reclaimed = service
		.claim_next_item()
		.await
		.expect("Claim failed.")
		.expect("Retried item must be claimable.");

	assert_eq!(reclaimed.attempts, 2);

	service.mark_item_extracted(item_id).await.expect("Failed to mark extracted.");

	let done = service.mark_item_extracted(item_id).await.unwrap_err();

	assert!(matches!(done, ServiceError::Conflict { .. }));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set PULSE_PG_DSN to run."]
async fn comments_aggregate_across_the_merge_group() {
	let Some((test_db, service)) = setup(false).await else {
		eprintln!("Skipping comments_aggregate_across_the_merge_group; {SKIP_HINT}.");

		return;
	};
	let canonical = service
		.create_post(post_request("features", "Dark mode", "Please add a dark theme."))
		.await
		.expect("Failed to create canonical.");
	let duplicate = service
		.create_post(post_request("features", "Night theme", "Darker colors at night."))
		.await
		.expect("Failed to create duplicate.");

	service
		.add_comment(canonical.post_id, "ada", "Yes please.")
		.await
		.expect("Failed to comment.");
	service
		.add_comment(duplicate.post_id, "brin", "Same request here.")
		.await
		.expect("Failed to comment.");
	service
		.merge_post(duplicate.post_id, canonical.post_id, "admin")
		.await
		.expect("Failed to merge.");

	let comments =
		service.list_comments(canonical.post_id).await.expect("Failed to list comments.");

	assert_eq!(comments.len(), 2);
	assert!(comments.iter().any(|c| c.post_id == duplicate.post_id));

	let view = service.post(canonical.post_id).await.expect("Failed to fetch canonical.");

	assert_eq!(view.comment_count, 2);

	let listing = service.list_posts("features").await.expect("Failed to list posts.");

	// Board listings show canonicals only.
	assert!(listing.iter().any(|p| p.post_id == canonical.post_id));
	assert!(listing.iter().all(|p| p.post_id != duplicate.post_id));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

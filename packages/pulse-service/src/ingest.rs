//! Raw feedback intake and the extraction work queue.
//!
//! Items move `received -> ready_for_extraction -> extracted | failed`, with
//! `failed` retryable back to `ready_for_extraction`. Claiming uses
//! `FOR UPDATE SKIP LOCKED` plus an `available_at` lease, so competing workers
//! never double-process an item and a crashed worker's claim expires on its
//! own.

use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use pulse_domain::suggestion::ProcessingState;

use crate::{FeedbackService, ServiceError, ServiceResult};

// last_error is operator-facing; anything longer is a stack dump.
const MAX_STORED_ERROR_LEN: usize = 2_000;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct IngestRequest {
	pub source: String,
	pub payload: Value,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ClaimedItem {
	pub item_id: Uuid,
	pub source: String,
	pub payload: Value,
	pub attempts: i32,
}

impl FeedbackService {
	pub async fn ingest_raw_item(&self, request: IngestRequest) -> ServiceResult<Uuid> {
		let source = request.source.trim();

		if source.is_empty() {
			return Err(ServiceError::Validation {
				message: "Item source must not be empty.".to_string(),
			});
		}

		let item_id = Uuid::new_v4();
		let now = OffsetDateTime::now_utc();

		sqlx::query(
			"\
INSERT INTO raw_feedback_items (
	item_id, source, payload, processing_state, attempts, available_at, created_at, updated_at
)
VALUES ($1, $2, $3, $4, 0, $5, $5, $5)",
		)
		.bind(item_id)
		.bind(source)
		.bind(&request.payload)
		.bind(ProcessingState::Received.as_str())
		.bind(now)
		.execute(&self.db.pool)
		.await?;

		tracing::info!(item_id = %item_id, source, "Ingested raw feedback item.");

		Ok(item_id)
	}

	pub async fn mark_item_ready(&self, item_id: Uuid) -> ServiceResult<()> {
		self.transition_item(item_id, ProcessingState::Received, ProcessingState::ReadyForExtraction)
			.await
	}

	/// Claims the oldest due item, if any. The claim leases the item for
	/// `worker.claim_lease_seconds`; an unfinished claim becomes reclaimable
	/// when the lease runs out.
	pub async fn claim_next_item(&self) -> ServiceResult<Option<ClaimedItem>> {
		let now = OffsetDateTime::now_utc();
		let lease = Duration::seconds(self.cfg.worker.claim_lease_seconds);
		let item: Option<ClaimedItem> = sqlx::query_as(
			"\
UPDATE raw_feedback_items
SET attempts = attempts + 1, available_at = $3, updated_at = $2
WHERE item_id = (
	SELECT item_id
	FROM raw_feedback_items
	WHERE processing_state = $1 AND available_at <= $2
	ORDER BY available_at
	LIMIT 1
	FOR UPDATE SKIP LOCKED
)
RETURNING item_id, source, payload, attempts",
		)
		.bind(ProcessingState::ReadyForExtraction.as_str())
		.bind(now)
		.bind(now + lease)
		.fetch_optional(&self.db.pool)
		.await?;

		Ok(item)
	}

	pub async fn mark_item_extracted(&self, item_id: Uuid) -> ServiceResult<()> {
		self.transition_item(item_id, ProcessingState::ReadyForExtraction, ProcessingState::Extracted)
			.await
	}

	/// Transient failure: the item stays claimable but only after `delay`,
	/// with the error recorded for operators.
	pub async fn release_item(
		&self,
		item_id: Uuid,
		error: &str,
		delay: Duration,
	) -> ServiceResult<()> {
		let now = OffsetDateTime::now_utc();
		let updated = sqlx::query(
			"\
UPDATE raw_feedback_items
SET last_error = $2, available_at = $3, updated_at = $4
WHERE item_id = $1 AND processing_state = $5",
		)
		.bind(item_id)
		.bind(truncate_error(error))
		.bind(now + delay)
		.bind(now)
		.bind(ProcessingState::ReadyForExtraction.as_str())
		.execute(&self.db.pool)
		.await?
		.rows_affected();

		if updated == 0 {
			return Err(self.item_transition_error(item_id).await?);
		}

		Ok(())
	}

	/// Permanent failure: the item parks in `failed` until someone retries it.
	pub async fn mark_item_failed(&self, item_id: Uuid, error: &str) -> ServiceResult<()> {
		let now = OffsetDateTime::now_utc();
		let updated = sqlx::query(
			"\
UPDATE raw_feedback_items
SET processing_state = $2, last_error = $3, updated_at = $4
WHERE item_id = $1 AND processing_state = $5",
		)
		.bind(item_id)
		.bind(ProcessingState::Failed.as_str())
		.bind(truncate_error(error))
		.bind(now)
		.bind(ProcessingState::ReadyForExtraction.as_str())
		.execute(&self.db.pool)
		.await?
		.rows_affected();

		if updated == 0 {
			return Err(self.item_transition_error(item_id).await?);
		}

		tracing::warn!(item_id = %item_id, "Marked raw feedback item as failed.");

		Ok(())
	}

	/// `failed -> ready_for_extraction`, immediately claimable. The previous
	/// error sticks around until the retry succeeds or fails again.
	pub async fn retry_item(&self, item_id: Uuid) -> ServiceResult<()> {
		self.transition_item(item_id, ProcessingState::Failed, ProcessingState::ReadyForExtraction)
			.await
	}

	pub async fn retry_failed_items(&self) -> ServiceResult<u64> {
		let now = OffsetDateTime::now_utc();
		let retried = sqlx::query(
			"\
UPDATE raw_feedback_items
SET processing_state = $1, available_at = $2, updated_at = $2
WHERE processing_state = $3",
		)
		.bind(ProcessingState::ReadyForExtraction.as_str())
		.bind(now)
		.bind(ProcessingState::Failed.as_str())
		.execute(&self.db.pool)
		.await?
		.rows_affected();

		if retried > 0 {
			tracing::info!(retried, "Requeued failed raw feedback items.");
		}

		Ok(retried)
	}

	async fn transition_item(
		&self,
		item_id: Uuid,
		from: ProcessingState,
		to: ProcessingState,
	) -> ServiceResult<()> {
		let now = OffsetDateTime::now_utc();
		let updated = sqlx::query(
			"\
UPDATE raw_feedback_items
SET processing_state = $2, available_at = $3, updated_at = $3
WHERE item_id = $1 AND processing_state = $4",
		)
		.bind(item_id)
		.bind(to.as_str())
		.bind(now)
		.bind(from.as_str())
		.execute(&self.db.pool)
		.await?
		.rows_affected();

		if updated == 0 {
			return Err(self.item_transition_error(item_id).await?);
		}

		Ok(())
	}

	async fn item_transition_error(&self, item_id: Uuid) -> ServiceResult<ServiceError> {
		let state: Option<String> =
			sqlx::query_scalar("SELECT processing_state FROM raw_feedback_items WHERE item_id = $1")
				.bind(item_id)
				.fetch_optional(&self.db.pool)
				.await?;

		Ok(match state {
			None => ServiceError::NotFound { message: format!("Raw feedback item {item_id}.") },
			Some(state) =>
				ServiceError::Conflict { message: format!("Item {item_id} is in state {state}.") },
		})
	}
}

fn truncate_error(error: &str) -> String {
	if error.len() <= MAX_STORED_ERROR_LEN {
		return error.to_string();
	}

	let mut cut = MAX_STORED_ERROR_LEN;

	while !error.is_char_boundary(cut) {
		cut -= 1;
	}

	format!("{}…", &error[..cut])
}

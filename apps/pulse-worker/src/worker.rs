//! Extraction worker loop.
//!
//! Claims raw feedback items, runs the extractor model over their payloads
//! and records one suggestion per extracted signal. Transient failures back
//! off exponentially and stay claimable; an item that keeps failing parks in
//! `failed` for a human to retry. Stored errors are scrubbed of credentials
//! before they hit the database.

use std::time::Duration as StdDuration;

use color_eyre::{Result, eyre};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use tokio::time as tokio_time;

use pulse_service::{ClaimedItem, ExtractedSignal, FeedbackService};

const MAX_EXTRACTION_ATTEMPTS: i32 = 5;
const BASE_BACKOFF_MS: i64 = 500;
const MAX_BACKOFF_MS: i64 = 30_000;
const EXPIRY_SWEEP_INTERVAL_SECONDS: i64 = 900;
const MAX_ERROR_CHARS: usize = 1_024;

const EXTRACTION_SYSTEM_PROMPT: &str = "\
You extract actionable product feedback from raw payloads. Respond with JSON only, shaped as \
{\"signals\": [{\"title\": string, \"body\": string, \"board_slug\": string}]}. Emit one signal \
per distinct request or problem in the payload, an empty array when there is none.";

pub async fn run_worker(service: FeedbackService) -> Result<()> {
	let poll = Duration::milliseconds(service.cfg.worker.poll_interval_ms);
	let mut last_expiry_sweep = OffsetDateTime::now_utc();

	if !service.cfg.ai.enabled {
		tracing::warn!("AI capability is disabled. Items stay queued; only expiry sweeps run.");
	}

	loop {
		if service.cfg.ai.enabled {
			match process_next_item(&service).await {
				// Drain the queue before sleeping.
				Ok(true) => continue,
				Ok(false) => {},
				Err(err) => {
					tracing::error!(error = %err, "Extraction pass failed.");
				},
			}
		}

		let now = OffsetDateTime::now_utc();

		if now - last_expiry_sweep >= Duration::seconds(EXPIRY_SWEEP_INTERVAL_SECONDS) {
			match service.expire_stale_suggestions().await {
				Ok(_) => last_expiry_sweep = now,
				Err(err) => {
					tracing::error!(error = %err, "Suggestion expiry sweep failed.");
				},
			}
		}

		tokio_time::sleep(to_std_duration(poll)).await;
	}
}

async fn process_next_item(service: &FeedbackService) -> Result<bool> {
	let Some(item) = service.claim_next_item().await? else {
		return Ok(false);
	};

	match extract_signals(service, &item).await {
		Ok(signals) => {
			let mut recorded = 0_usize;

			for signal in &signals {
				match service.suggest_for_signal(item.item_id, signal).await {
					Ok(_) => recorded += 1,
					Err(err) => {
						tracing::error!(
							item_id = %item.item_id,
							error = %err,
							"Failed to record suggestion for signal.",
						);
					},
				}
			}

			service.mark_item_extracted(item.item_id).await?;

			tracing::info!(
				item_id = %item.item_id,
				signals = signals.len(),
				recorded,
				"Extracted raw feedback item.",
			);
		},
		Err(err) => {
			let sanitized = sanitize_extraction_error(&err.to_string());

			if item.attempts >= MAX_EXTRACTION_ATTEMPTS {
				service.mark_item_failed(item.item_id, &sanitized).await?;
			} else {
				let delay = backoff_for_attempt(item.attempts);

				service.release_item(item.item_id, &sanitized, delay).await?;
			}

			tracing::error!(
				item_id = %item.item_id,
				attempts = item.attempts,
				error = %err,
				"Extraction failed.",
			);
		},
	}

	Ok(true)
}

async fn extract_signals(
	service: &FeedbackService,
	item: &ClaimedItem,
) -> Result<Vec<ExtractedSignal>> {
	let messages = extraction_messages(item);
	let json =
		service.providers.extractor.extract(&service.cfg.ai.extractor, &messages).await?;

	parse_signals(&json)
}

fn extraction_messages(item: &ClaimedItem) -> Vec<Value> {
	let user = serde_json::json!({
		"source": item.source,
		"payload": item.payload,
	});

	vec![
		serde_json::json!({ "role": "system", "content": EXTRACTION_SYSTEM_PROMPT }),
		serde_json::json!({ "role": "user", "content": user.to_string() }),
	]
}

fn parse_signals(json: &Value) -> Result<Vec<ExtractedSignal>> {
	let signals = json
		.get("signals")
		.and_then(Value::as_array)
		.ok_or_else(|| eyre::eyre!("Extractor output is missing a signals array."))?;

	signals
		.iter()
		.map(|signal| {
			serde_json::from_value(signal.clone())
				.map_err(|err| eyre::eyre!("Malformed extracted signal: {err}."))
		})
		.collect()
}

fn sanitize_extraction_error(text: &str) -> String {
	let mut parts = Vec::new();
	let mut redact_next = false;

	for raw in text.split_whitespace() {
		let mut word = raw.to_string();

		if redact_next {
			word = "[REDACTED]".to_string();
			redact_next = false;
		}
		if raw.eq_ignore_ascii_case("bearer") {
			redact_next = true;
		}

		let lowered = raw.to_ascii_lowercase();

		for key in ["api_key", "apikey", "password", "secret", "token"] {
			if lowered.contains(key) && (lowered.contains('=') || lowered.contains(':')) {
				let sep = if raw.contains('=') { '=' } else { ':' };
				let prefix = match raw.split(sep).next() {
					Some(prefix) => prefix,
					None => raw,
				};

				word = format!("{prefix}{sep}[REDACTED]");

				break;
			}
		}

		parts.push(word);
	}

	let mut out = parts.join(" ");

	if out.chars().count() > MAX_ERROR_CHARS {
		out = out.chars().take(MAX_ERROR_CHARS).collect();
		out.push_str("...");
	}

	out
}

fn backoff_for_attempt(attempt: i32) -> Duration {
	let attempts = attempt.max(1) as u32;
	let exp = attempts.saturating_sub(1).min(6);
	let base = BASE_BACKOFF_MS.saturating_mul(1 << exp);
	let capped = base.min(MAX_BACKOFF_MS);

	Duration::milliseconds(capped)
}

fn to_std_duration(duration: Duration) -> StdDuration {
	let millis = duration.whole_milliseconds();

	if millis <= 0 {
		return StdDuration::from_millis(0);
	}

	StdDuration::from_millis(millis as u64)
}

//! State machines for the suggestion lifecycle and raw feedback intake.

/// A merge suggestion is only emitted when the best similarity candidate
/// reaches this fused score; below it the pipeline proposes a new post
/// instead. A score exactly at the threshold counts as a merge.
pub const MERGE_SUGGESTION_MIN_SIMILARITY: f32 = 0.6;

/// Pending suggestions older than this are moved to `expired`. Expired rows
/// are kept forever; they are audit history, not garbage.
pub const SUGGESTION_EXPIRY_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
	MergePost,
	CreatePost,
}
impl SuggestionType {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::MergePost => "merge_post",
			Self::CreatePost => "create_post",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"merge_post" => Some(Self::MergePost),
			"create_post" => Some(Self::CreatePost),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
	Pending,
	Accepted,
	Dismissed,
	Expired,
}
impl SuggestionStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Accepted => "accepted",
			Self::Dismissed => "dismissed",
			Self::Expired => "expired",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"pending" => Some(Self::Pending),
			"accepted" => Some(Self::Accepted),
			"dismissed" => Some(Self::Dismissed),
			"expired" => Some(Self::Expired),
			_ => None,
		}
	}

	pub fn is_terminal(&self) -> bool {
		!matches!(self, Self::Pending)
	}

	/// Only `pending -> terminal` moves are legal; terminal states never
	/// transition again.
	pub fn can_transition_to(&self, next: Self) -> bool {
		matches!(self, Self::Pending) && next.is_terminal()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
	Received,
	ReadyForExtraction,
	Extracted,
	Failed,
}
impl ProcessingState {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Received => "received",
			Self::ReadyForExtraction => "ready_for_extraction",
			Self::Extracted => "extracted",
			Self::Failed => "failed",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"received" => Some(Self::Received),
			"ready_for_extraction" => Some(Self::ReadyForExtraction),
			"extracted" => Some(Self::Extracted),
			"failed" => Some(Self::Failed),
			_ => None,
		}
	}

	pub fn can_transition_to(&self, next: Self) -> bool {
		matches!(
			(self, next),
			(Self::Received, Self::ReadyForExtraction)
				| (Self::ReadyForExtraction, Self::Extracted)
				| (Self::ReadyForExtraction, Self::Failed)
				| (Self::Failed, Self::ReadyForExtraction)
		)
	}
}

/// Pipeline policy: which suggestion a signal's best match score maps to.
pub fn suggested_action(top_score: Option<f32>) -> SuggestionType {
	match top_score {
		Some(score) if score >= MERGE_SUGGESTION_MIN_SIMILARITY => SuggestionType::MergePost,
		_ => SuggestionType::CreatePost,
	}
}

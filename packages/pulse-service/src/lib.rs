pub mod ingest;
pub mod merge;
pub mod posts;
pub mod search;
pub mod suggestions;
pub mod votes;

use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::Value;

pub use ingest::{ClaimedItem, IngestRequest};
pub use merge::{MergeInfo, MergeOutcome, MergedPost};
pub use posts::{CommentView, CreatePostRequest, PostView};
pub use search::{NoopVectorSearcher, PgVectorSearcher, SimilarPost, VectorSearcher};
pub use suggestions::{
	AcceptOverrides, ExtractedSignal, ResolvedSuggestion, SuggestionView,
};
pub use votes::VoteToggle;

use pulse_config::{Config, EmbeddingProviderConfig, LlmProviderConfig};
use pulse_providers::{embedding, extractor};
use pulse_storage::db::Db;

pub type ServiceResult<T> = Result<T, ServiceError>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>>;
}

pub trait ExtractorProvider
where
	Self: Send + Sync,
{
	fn extract<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, color_eyre::Result<Value>>;
}

/// Caller-visible error taxonomy. `NotFound`, `Validation` and `Conflict` are
/// terminal for the core; the calling layer decides whether to retry or
/// surface them.
#[derive(Debug)]
pub enum ServiceError {
	NotFound { message: String },
	Validation { message: String },
	Conflict { message: String },
	Provider { message: String },
	Storage { message: String },
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub extractor: Arc<dyn ExtractorProvider>,
}

pub struct FeedbackService {
	pub cfg: Config,
	pub db: Db,
	pub providers: Providers,
	/// Resolved once at construction from `ai.enabled`; the no-op impl keeps
	/// similarity search keyword-only without call-site branching.
	pub vector: Arc<dyn VectorSearcher>,
}

struct DefaultProviders;

impl std::fmt::Display for ServiceError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::NotFound { message } => write!(f, "Not found: {message}"),
			Self::Validation { message } => write!(f, "Validation: {message}"),
			Self::Conflict { message } => write!(f, "Conflict: {message}"),
			Self::Provider { message } => write!(f, "Provider error: {message}"),
			Self::Storage { message } => write!(f, "Storage error: {message}"),
		}
	}
}

impl std::error::Error for ServiceError {}

impl From<sqlx::Error> for ServiceError {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<color_eyre::Report> for ServiceError {
	fn from(err: color_eyre::Report) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

impl From<pulse_storage::Error> for ServiceError {
	fn from(err: pulse_storage::Error) -> Self {
		match err {
			pulse_storage::Error::NotFound(message) => Self::NotFound { message },
			pulse_storage::Error::Conflict(message) => Self::Conflict { message },
			pulse_storage::Error::InvalidArgument(message) => Self::Validation { message },
			pulse_storage::Error::Sqlx(err) => Self::Storage { message: err.to_string() },
		}
	}
}

impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}

impl ExtractorProvider for DefaultProviders {
	fn extract<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, color_eyre::Result<Value>> {
		Box::pin(extractor::extract(cfg, messages))
	}
}

impl Providers {
	pub fn new(embedding: Arc<dyn EmbeddingProvider>, extractor: Arc<dyn ExtractorProvider>) -> Self {
		Self { embedding, extractor }
	}
}

impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), extractor: provider }
	}
}

impl FeedbackService {
	pub fn new(cfg: Config, db: Db) -> Self {
		Self::with_providers(cfg, db, Providers::default())
	}

	pub fn with_providers(cfg: Config, db: Db, providers: Providers) -> Self {
		let vector: Arc<dyn VectorSearcher> = if cfg.ai.enabled {
			Arc::new(PgVectorSearcher::new(&cfg, db.pool.clone(), providers.embedding.clone()))
		} else {
			Arc::new(NoopVectorSearcher)
		};

		Self { cfg, db, providers, vector }
	}
}

pub(crate) fn embedding_version(cfg: &Config) -> String {
	format!(
		"{}:{}:{}",
		cfg.ai.embedding.provider_id, cfg.ai.embedding.model, cfg.ai.embedding.dimensions
	)
}

pub(crate) fn vector_to_pg(vec: &[f32]) -> String {
	let mut out = String::with_capacity(vec.len() * 8);

	out.push('[');

	for (i, value) in vec.iter().enumerate() {
		if i > 0 {
			out.push(',');
		}

		out.push_str(&value.to_string());
	}

	out.push(']');

	out
}

mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Ai, Config, EmbeddingProviderConfig, LlmProviderConfig, Postgres, Search, Service, Storage,
	Worker,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.ai.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "ai.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.search.candidate_limit == 0 {
		return Err(Error::Validation {
			message: "search.candidate_limit must be greater than zero.".to_string(),
		});
	}
	if cfg.search.keyword_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "search.keyword_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.search.vector_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "search.vector_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.worker.poll_interval_ms <= 0 {
		return Err(Error::Validation {
			message: "worker.poll_interval_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.worker.claim_lease_seconds <= 0 {
		return Err(Error::Validation {
			message: "worker.claim_lease_seconds must be greater than zero.".to_string(),
		});
	}

	// Provider credentials are only required once the AI capability is on.
	if cfg.ai.enabled {
		for (label, key) in
			[("embedding", &cfg.ai.embedding.api_key), ("extractor", &cfg.ai.extractor.api_key)]
		{
			if key.trim().is_empty() {
				return Err(Error::Validation {
					message: format!("Provider ai.{label}.api_key must be non-empty when ai.enabled is true."),
				});
			}
		}
		if cfg.ai.embedding.timeout_ms == 0 {
			return Err(Error::Validation {
				message: "ai.embedding.timeout_ms must be greater than zero.".to_string(),
			});
		}
		if cfg.ai.extractor.timeout_ms == 0 {
			return Err(Error::Validation {
				message: "ai.extractor.timeout_ms must be greater than zero.".to_string(),
			});
		}
		if !cfg.ai.extractor.temperature.is_finite() || cfg.ai.extractor.temperature < 0.0 {
			return Err(Error::Validation {
				message: "ai.extractor.temperature must be a finite, non-negative number."
					.to_string(),
			});
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.ai.embedding.api_base = cfg.ai.embedding.api_base.trim_end_matches('/').to_string();
	cfg.ai.extractor.api_base = cfg.ai.extractor.api_base.trim_end_matches('/').to_string();
}

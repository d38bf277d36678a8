use clap::Parser;
use tracing_subscriber::EnvFilter;

pub mod worker;

#[derive(Debug, Parser)]
#[command(rename_all = "kebab")]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: std::path::PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = pulse_config::load(&args.config)?;
	let filter = EnvFilter::new(config.service.log_level.clone());

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let db = pulse_storage::db::Db::connect(&config.storage.postgres).await?;

	db.ensure_schema(config.ai.embedding.dimensions).await?;

	let service = pulse_service::FeedbackService::new(config, db);

	worker::run_worker(service).await
}

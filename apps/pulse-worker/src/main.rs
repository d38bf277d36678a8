use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = pulse_worker::Args::parse();

	pulse_worker::run(args).await
}

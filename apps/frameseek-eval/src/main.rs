use clap::Parser;

use frameseek_eval::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	frameseek_eval::run(args).await
}

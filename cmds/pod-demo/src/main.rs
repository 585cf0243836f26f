use anyhow::{Context, Result};
use clap::Parser;
use pod_demo::{config::DemoArgs, driver::run_demo, telemetry};

#[derive(Parser)]
#[command(name = "pod-demo")]
#[command(about = "Walk through listing, creating, updating and deleting a pod", long_about = None)]
#[command(version)]
struct Cli {
	#[command(flatten)]
	args: DemoArgs,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let runtime = tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
		.context("building async runtime")?;

	runtime.block_on(async {
		let _telemetry = telemetry::init(cli.args.log_level)?;

		let config = cli.args.into_config();
		tracing::debug!(?config, "resolved configuration");

		let stdin = std::io::stdin();
		let summary = run_demo(config, stdin.lock(), std::io::stdout()).await?;
		tracing::debug!(?summary, "demo finished");
		Ok::<_, anyhow::Error>(())
	})
}

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ekip_bot::{Args, Backend, BotConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs in production (EKIP_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("EKIP_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env()
        .add_directive("ekip_core=info".parse()?)
        .add_directive("ekip_bot=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let args = Args::parse();
    let config = BotConfig::from_args(&args)?;
    tracing::info!(backend = ?args.backend, prefix = %config.prefix, "Starting ekip");

    match args.backend {
        Backend::Memory => {
            let console = ekip_bot::console::Console::start(config.clone()).await?;
            let _reconciler = console.engine().spawn_reconciler(config.reconcile_interval());
            console.run().await
        }
        #[cfg(feature = "discord")]
        Backend::Discord => ekip_bot::discord::run(config).await,
        #[cfg(not(feature = "discord"))]
        Backend::Discord => {
            anyhow::bail!("this build has no Discord support; rebuild with --features discord")
        }
    }
}

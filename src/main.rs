mod config;
mod dns;

use clap::Parser;
use std::path::PathBuf;

fn init_logs() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, registry, EnvFilter};

    let _ = registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("{}=debug", env!("CARGO_PKG_NAME")).into()
        }))
        .with(fmt::layer().with_ansi(cfg!(debug_assertions)))
        .try_init();
}

/// In-process DNS resolver middleware for a Kubernetes cluster domain.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "KUBEDNS_CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    init_logs();

    let args = Args::parse();
    let config = config::Config::load(&args.config);

    dns::Command.run(config).await;
}

//! probedb - run an instrumented workload and print its metrics.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use probedb_cli::{render, run, Args};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so the export on stdout stays parseable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "probedb=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = args.into_config();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        iterations = config.iterations,
        concurrency = config.concurrency,
        format = ?config.format,
        sqlite_path = ?config.sqlite_path,
        "starting workload"
    );

    let reports = match run(&config).await {
        Ok(reports) => reports,
        Err(e) => {
            tracing::error!(error = %e, "workload failed");
            return Err(e.into());
        }
    };

    print!("{}", render(&reports, config.format)?);
    Ok(())
}

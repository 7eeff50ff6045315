use chrono::Duration as ChronoDuration;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payrun::application::orchestrator::BatchOrchestrator;
use payrun::application::runner::{JobRunner, RetryPolicy};
use payrun::infrastructure::gateway::{GatewayConfig, HttpGateway};
use payrun::infrastructure::in_memory::{InMemoryDirectory, InMemoryJobQueue, InMemoryLedger};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the disbursement gateway
    #[arg(long, env = "PAYRUN_GATEWAY_URL")]
    gateway_url: String,

    /// Gateway API client id
    #[arg(long, env = "PAYRUN_CLIENT_ID")]
    client_id: String,

    /// Gateway API client secret
    #[arg(long, env = "PAYRUN_CLIENT_SECRET")]
    client_secret: String,

    /// Seconds subtracted from gateway token lifetimes
    #[arg(long, env = "PAYRUN_TOKEN_MARGIN_SECS", default_value_t = 60)]
    token_margin_secs: i64,

    /// Processing attempts per batch job before dead-lettering
    #[arg(long, env = "PAYRUN_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Base backoff delay in seconds between attempts
    #[arg(long, env = "PAYRUN_BASE_DELAY_SECS", default_value_t = 5)]
    base_delay_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "payrun=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .into_diagnostic()?;

    let gateway = Arc::new(HttpGateway::new(GatewayConfig {
        base_url: cli.gateway_url,
        client_id: cli.client_id,
        client_secret: cli.client_secret,
        token_safety_margin: ChronoDuration::seconds(cli.token_margin_secs),
    }));
    let ledger = Arc::new(InMemoryLedger::new());
    let directory = Arc::new(InMemoryDirectory::new());
    // The external API layer owns the enqueue side of this channel; dropping
    // the handle on shutdown lets the runner loop drain and exit.
    let (queue, jobs) = InMemoryJobQueue::channel();

    let orchestrator = Arc::new(BatchOrchestrator::new(ledger, directory, gateway));

    let runner = JobRunner::new(
        orchestrator,
        RetryPolicy {
            max_attempts: cli.max_attempts,
            base_delay: Duration::from_secs(cli.base_delay_secs),
        },
    );
    let worker = runner.spawn(jobs);

    tracing::info!("Disbursement worker running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.into_diagnostic()?;
    drop(queue);
    worker.await.into_diagnostic()?;

    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tollgate::config::{LoggingConfig, TimeUnit, TollgateConfig};
use tollgate::gate::{EchoSubmitter, GatedClient};
use tollgate::ratelimit::{AdmissionController, Strategy};

/// Submit documents to a rate-limited service through an admission controller.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum admissions per period
    #[arg(long)]
    limit: Option<u32>,

    /// Period as a time unit
    #[arg(long, value_enum)]
    unit: Option<TimeUnit>,

    /// Period in milliseconds, overrides --unit
    #[arg(long)]
    period_ms: Option<u64>,

    /// Admission strategy
    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read commands from stdin: 1 submits a document, 2 quits
    Interactive,
    /// Submit documents concurrently and report when each was admitted
    Burst {
        /// Number of concurrent submissions
        #[arg(short = 'n', long, default_value_t = 10)]
        count: u64,
    },
}

impl Cli {
    /// Command-line flags win over file and environment settings.
    fn apply(&self, config: &mut TollgateConfig) {
        if let Some(limit) = self.limit {
            config.limiter.limit = limit;
        }
        if let Some(unit) = self.unit {
            config.limiter.unit = unit;
            config.limiter.period_ms = None;
        }
        if let Some(period_ms) = self.period_ms {
            config.limiter.period_ms = Some(period_ms);
        }
        if let Some(strategy) = self.strategy {
            config.limiter.strategy = strategy;
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Validate only once flags have been layered over file and environment.
    let mut config = TollgateConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.limiter.validate()?;

    init_tracing(&config.logging);

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &cli.config {
        info!(path = %path.display(), "Loaded configuration file");
    }

    let controller = Arc::new(AdmissionController::from_config(&config.limiter)?);
    info!(
        strategy = %controller.strategy(),
        limit = controller.limit(),
        period_ms = controller.period().as_millis() as u64,
        "Admission controller ready"
    );

    let client = Arc::new(GatedClient::new(controller, EchoSubmitter::new()));

    let result = match cli.command.unwrap_or(Command::Interactive) {
        Command::Interactive => run_interactive(&client).await,
        Command::Burst { count } => run_burst(client.clone(), count).await,
    };

    client.close().await;
    info!(
        submitted = client.submitter().submitted(),
        "Tollgate stopped"
    );
    result
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.with_thread_ids(true).init();
    }
}

fn document(id: u64) -> serde_json::Value {
    json!({
        "id": id,
        "name": "document",
        "description": "very useful document",
    })
}

/// Operator loop over stdin.
async fn run_interactive(client: &GatedClient<EchoSubmitter>) -> anyhow::Result<()> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut submitted = 0u64;

    println!("Enter 1 to submit a document, 2 to quit.");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => break,
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "1" => {
                submitted += 1;
                let payload = document(submitted);
                let document_id = tokio::select! {
                    result = client.submit(&payload) => result?,
                    _ = &mut shutdown => break,
                };
                println!("{}", document_id);
            }
            "2" => break,
            "" => continue,
            _ => println!("Wrong command"),
        }
    }

    Ok(())
}

/// Launch `count` submissions at once; excess ones wait for admission.
async fn run_burst(client: Arc<GatedClient<EchoSubmitter>>, count: u64) -> anyhow::Result<()> {
    let started = Instant::now();

    let handles: Vec<_> = (1..=count)
        .map(|n| {
            let client = client.clone();
            tokio::spawn(async move {
                let result = client.submit(&document(n)).await;
                (n, started.elapsed(), result)
            })
        })
        .collect();

    let all = futures::future::join_all(handles);
    tokio::pin!(all);

    let results = tokio::select! {
        results = &mut all => results,
        _ = shutdown_signal() => {
            // Release everyone still waiting, then collect what they report.
            client.close().await;
            all.await
        }
    };

    for joined in results {
        let (n, elapsed, result) = joined?;
        match result {
            Ok(document_id) => println!("#{:<4} +{:>6}ms  {}", n, elapsed.as_millis(), document_id),
            Err(e) => println!("#{:<4} +{:>6}ms  {}", n, elapsed.as_millis(), e),
        }
    }

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}

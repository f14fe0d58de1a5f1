//! Scanzy CLI front-end
//!
//! Thin consumer of the orchestration core: starts one session, prints the
//! ordered event stream to the terminal, and maps Ctrl-C to cooperative
//! cancellation.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use scanzy::{ScanEvent, ScanManager, ScanParameters, ScannerConfig};

#[derive(Debug, Parser)]
#[command(
    name = "scanzy",
    version,
    about = "Drive the scanzy scan script and stream its progress"
)]
struct Cli {
    /// Hostname or IP address to scan.
    target: String,

    /// Port range or list, e.g. 80-443 (defaults to 1-1024).
    #[arg(default_value = "")]
    ports: String,

    /// Per-port timeout in seconds.
    #[arg(long, default_value_t = 1.0)]
    timeout: f64,

    /// Number of parallel probe jobs.
    #[arg(long, default_value_t = 10)]
    parallel: u32,

    /// Ask the scanner for a JSON result document.
    #[arg(long)]
    json: bool,

    /// Force the scanner's netcat probe implementation.
    #[arg(long = "force-netcat")]
    force_netcat: bool,

    /// Path to the scan script.
    #[arg(long, default_value = "scanzy.sh")]
    script: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut params = ScanParameters::new(cli.target);
    params.port_spec = cli.ports;
    params.timeout_secs = cli.timeout;
    params.parallelism = cli.parallel;
    params.json_output = cli.json;
    params.force_netcat = cli.force_netcat;

    let manager = ScanManager::new(ScannerConfig {
        program: cli.script,
        ..ScannerConfig::default()
    });

    let (id, mut events) = manager.start(params)?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ScanEvent::Line { text }) => println!("{}", text),
                Some(ScanEvent::Progress { percent }) => info!("progress: {}%", percent),
                Some(ScanEvent::Completed { result }) => {
                    if let Some(structured) = &result.structured {
                        println!("{}", serde_json::to_string_pretty(structured)?);
                    }
                    info!("scan completed");
                    break;
                }
                Some(ScanEvent::Cancelled) => {
                    info!("scan cancelled");
                    break;
                }
                Some(ScanEvent::Failed { error }) => {
                    return Err(error.into());
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                manager.cancel(id);
            }
        }
    }

    Ok(())
}

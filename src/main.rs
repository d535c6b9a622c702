use clap::{Parser, Subcommand};
use futures::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use market_poller::config::ConfigLoader;
use market_poller::{EngineMetrics, HttpMarketClient, PollingEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::WatchStream;

#[derive(Parser)]
#[command(name = "market-poller")]
#[command(version = "0.1.0")]
#[command(about = "Adaptive marketplace poller with change detection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the configured markets until Ctrl+C
    Run {
        /// Path to the configuration file (JSON/YAML/TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Show a live status line (stderr)
        #[arg(short, long, default_value_t = true, action = clap::ArgAction::Set)]
        progress: bool,
    },
    /// Validate a configuration file
    Check {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn status_line(metrics: &EngineMetrics) -> String {
    format!(
        "Polls: {} | Health: {} | Changes: {} | Known: {} | Next: {:.1}s{}",
        metrics.poll.total_polls,
        metrics.health_status,
        metrics.poll.changes_detected,
        metrics.known_items_count,
        metrics.current_interval,
        if metrics.circuit_open { " | CIRCUIT OPEN" } else { "" }
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    let cli = Cli::parse();
    let logger = env_logger::Builder::from_default_env().build();
    let multi = Arc::new(MultiProgress::new());

    match cli.command {
        Commands::Run { config, progress } => {
            let level = logger.filter();
            if progress {
                indicatif_log_bridge::LogWrapper::new((*multi).clone(), logger).try_init()?;
            } else {
                log::set_boxed_logger(Box::new(logger))?;
            }
            log::set_max_level(level);

            log::info!("Loading config from {:?}", config);
            let config_data = ConfigLoader::load(&config)?;
            log::info!("Loaded poller: {}", config_data.name);

            let client = Arc::new(HttpMarketClient::new(&config_data.api)?);
            let sink = ConfigLoader::create_sink(
                &config_data,
                progress.then(|| multi.clone()),
            )
            .await?;
            let engine = PollingEngine::new(config_data.polling.clone(), client, sink.clone())?;

            let mut status_task = None;
            let spinner = if progress {
                let pb = multi.add(ProgressBar::new_spinner());
                pb.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} [{elapsed_precise}] {msg}")?,
                );
                pb.enable_steady_tick(Duration::from_millis(200));

                let pb_clone = pb.clone();
                let mut updates = WatchStream::new(engine.watch_metrics());
                status_task = Some(tokio::spawn(async move {
                    while let Some(metrics) = updates.next().await {
                        pb_clone.set_message(status_line(&metrics));
                    }
                }));
                Some(pb)
            } else {
                None
            };

            engine.start().await?;
            tokio::signal::ctrl_c().await?;
            log::info!("Shutting down...");
            engine.stop().await;

            if let Some(task) = status_task {
                task.abort();
            }
            let final_metrics = engine.metrics();
            if let Some(pb) = spinner {
                pb.finish_with_message(format!("{} - Stopped", status_line(&final_metrics)));
            }
            sink.close().await?;

            println!("\n✅ Polling Stopped:");
            println!("   Total Polls: {}", final_metrics.poll.total_polls);
            println!("   Success Rate: {:.1}%", final_metrics.success_rate * 100.0);
            println!("   Items Processed: {}", final_metrics.poll.items_processed);
            println!("   Changes Detected: {}", final_metrics.poll.changes_detected);
            println!("   Known Items: {}", final_metrics.known_items_count);
            println!(
                "   Average Response: {:.0}ms",
                final_metrics.poll.avg_response_time_ms
            );
            println!("   Health: {}", final_metrics.health_status);
            for (kind, count) in &final_metrics.poll.error_counts {
                println!("   Errors [{}]: {}", kind, count);
            }
        }
        Commands::Check { config } => match ConfigLoader::load(&config) {
            Ok(cfg) => {
                println!("✅ Config is valid:");
                println!("   Name: {}", cfg.name);
                println!("   API: {}", cfg.api.base_url);
                println!("   Markets: {:?}", cfg.polling.markets);
                println!(
                    "   Interval: {}s (min {}s, max {}s)",
                    cfg.polling.base_interval, cfg.polling.min_interval, cfg.polling.max_interval
                );
                println!("   Backoff: {:?}", cfg.polling.backoff.strategy);
            }
            Err(e) => {
                eprintln!("❌ Config error: {}", e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod browser;
mod config;
mod error;
mod fast;
mod models;
mod normalize;
mod obfuscation;
mod render;
mod rendered;
mod resolver;
mod scheduler;
mod surfaces;

use crate::browser::ChromiumLauncher;
use crate::config::{Config, ConfigArgs};
use crate::error::AppError;
use crate::fast::FastPath;
use crate::models::{BatchEvent, ScrapeResult};
use crate::render::RenderEngine;
use crate::rendered::RenderedPath;
use crate::resolver::{HybridResolver, Resolve};
use crate::scheduler::Scheduler;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest emails from a list of URLs
    Run {
        /// URLs to scrape
        urls: Vec<String>,

        /// File with one URL per line ('#' starts a comment)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Write results here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Start the API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::build_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            urls,
            input,
            output,
        } => {
            let urls = collect_urls(urls, input.as_deref())?;
            info!("Harvesting {} URL(s) with {} workers", urls.len(), config.concurrency);
            let results = run_batch(&config, urls).await?;
            write_results(&results, output.as_deref())?;
        }
        Commands::Serve { port } => {
            serve(&config, port).await?;
        }
    }

    Ok(())
}

/// Wires the fast path, the shared render engine and the hybrid resolver.
fn build_pipeline(config: &Config) -> error::Result<(Arc<dyn Resolve>, Arc<RenderEngine>)> {
    let fast = Arc::new(FastPath::new(config)?);
    let engine = Arc::new(RenderEngine::new(Arc::new(ChromiumLauncher::new(config))));
    let rendered = Arc::new(RenderedPath::new(engine.clone(), config));
    let resolver: Arc<dyn Resolve> = Arc::new(HybridResolver::new(fast, rendered));
    Ok((resolver, engine))
}

fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

fn collect_urls(mut urls: Vec<String>, input: Option<&Path>) -> error::Result<Vec<String>> {
    if let Some(path) = input {
        let content = std::fs::read_to_string(path)?;
        urls.extend(parse_url_list(&content));
        info!("Loaded URLs from {}", path.display());
    }
    if urls.is_empty() {
        return Err(AppError::Config(
            "no URLs given; pass them as arguments or with --input".to_string(),
        ));
    }
    Ok(urls)
}

/// Forwards `pause` / `resume` / `stop` lines from stdin to the scheduler.
///
/// Runs on a plain thread: a blocking stdin read must not hold up runtime shutdown.
fn spawn_stdin_controls(scheduler: Arc<Scheduler>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let applied = match line.trim() {
                "pause" => scheduler.pause(),
                "resume" => scheduler.resume(),
                "stop" => scheduler.stop(),
                "" => continue,
                other => {
                    tracing::warn!("Unknown command '{}'; expected pause, resume or stop", other);
                    continue;
                }
            };
            if !applied {
                tracing::warn!("'{}' had no effect in the current state", line.trim());
            }
        }
    });
}

async fn run_batch(config: &Config, urls: Vec<String>) -> error::Result<Vec<ScrapeResult>> {
    let (resolver, engine) = build_pipeline(config)?;
    let (sender, mut events) = mpsc::unbounded_channel();
    let scheduler = Arc::new(Scheduler::new(
        resolver,
        Arc::new(sender),
        Some(engine.clone()),
        config.progress_interval,
    ));

    let progress_bar = indicatif::ProgressBar::new(urls.len() as u64);
    progress_bar.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .map_err(|e| AppError::Generic(e.into()))?
            .progress_chars("##-"),
    );

    spawn_stdin_controls(scheduler.clone());
    scheduler.start(urls, config.concurrency);

    while let Some(event) = events.recv().await {
        match event {
            BatchEvent::Progress {
                result, processed, ..
            } => {
                progress_bar.set_position(processed as u64);
                progress_bar.set_message(result.url);
            }
            BatchEvent::BatchComplete {
                processed,
                total,
                stopped,
                ..
            } => {
                progress_bar.set_position(processed as u64);
                let verb = if stopped { "Stopped" } else { "Finished" };
                progress_bar.finish_with_message(format!("{verb}: {processed}/{total} processed"));
                break;
            }
        }
    }

    engine.shutdown().await;

    let mut results: Vec<(usize, ScrapeResult)> = scheduler.snapshot().results.into_iter().collect();
    results.sort_by_key(|(index, _)| *index);
    let results: Vec<ScrapeResult> = results.into_iter().map(|(_, result)| result).collect();

    let emails: usize = results.iter().map(|result| result.emails.len()).sum();
    let failures = results.iter().filter(|result| result.error.is_some()).count();
    info!(
        "Collected {} email(s) from {} page(s), {} failed",
        emails,
        results.len(),
        failures
    );
    Ok(results)
}

fn write_results(results: &[ScrapeResult], output: Option<&Path>) -> error::Result<()> {
    let output_data = serde_json::to_string_pretty(results)?;
    match output {
        Some(path) => {
            std::fs::write(path, output_data)?;
            info!("Wrote {} results to {}", results.len(), path.display());
        }
        None => println!("{}", output_data),
    }
    Ok(())
}

async fn serve(config: &Config, port: u16) -> error::Result<()> {
    let (resolver, engine) = build_pipeline(config)?;
    let (events, _) = broadcast::channel(256);
    let scheduler = Arc::new(Scheduler::new(
        resolver,
        Arc::new(events.clone()),
        Some(engine.clone()),
        config.progress_interval,
    ));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    };
    api::start_api_server(scheduler.clone(), events, config.concurrency, port, shutdown).await?;

    scheduler.stop();
    engine.shutdown().await;
    Ok(())
}

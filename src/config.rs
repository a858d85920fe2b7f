//! Defines the configuration settings for the email-harvest application.

use anyhow::Context;
use clap::Args;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tuning flags shared by every subcommand.
#[derive(Args, Debug, Default, Clone)]
pub(crate) struct ConfigArgs {
    /// Path to configuration file (TOML format)
    #[arg(long, global = true, env = "EMAIL_HARVEST_CONFIG")]
    pub config_file: Option<String>,

    /// Number of concurrent scraping workers
    #[arg(short, long, global = true, env = "EMAIL_HARVEST_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// HTTP request timeout in seconds for the static fetch
    #[arg(long, global = true, env = "EMAIL_HARVEST_REQUEST_TIMEOUT")]
    pub request_timeout: Option<u64>,

    /// Browser navigation timeout in seconds
    #[arg(long, global = true, env = "EMAIL_HARVEST_NAVIGATION_TIMEOUT")]
    pub navigation_timeout: Option<u64>,

    /// Delay after navigation before extraction, in milliseconds
    #[arg(long, global = true, env = "EMAIL_HARVEST_SETTLE_DELAY_MS")]
    pub settle_delay_ms: Option<u64>,

    /// Minimum interval between progress events, in milliseconds
    #[arg(long, global = true, env = "EMAIL_HARVEST_PROGRESS_INTERVAL_MS")]
    pub progress_interval_ms: Option<u64>,

    /// Path to a Chrome/Chromium executable for the rendered path
    #[arg(long, global = true, env = "EMAIL_HARVEST_CHROME")]
    pub chrome_executable: Option<PathBuf>,

    /// Comma-separated list of user agents rotated on the static fetch
    #[arg(long, global = true, env = "EMAIL_HARVEST_USER_AGENTS")]
    pub user_agents: Option<String>,
}

/// TOML Configuration file structure
#[derive(Deserialize, Debug, Default)]
struct ConfigFile {
    network: Option<NetworkConfig>,
    render: Option<RenderConfig>,
    scheduler: Option<SchedulerConfig>,
}

#[derive(Deserialize, Debug, Default)]
struct NetworkConfig {
    request_timeout: Option<u64>,
    user_agents: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
struct RenderConfig {
    navigation_timeout: Option<u64>,
    settle_delay_ms: Option<u64>,
    chrome_executable: Option<PathBuf>,
    user_agent: Option<String>,
    window_width: Option<u32>,
    window_height: Option<u32>,
}

#[derive(Deserialize, Debug, Default)]
struct SchedulerConfig {
    concurrency: Option<usize>,
    progress_interval_ms: Option<u64>,
}

/// Application configuration settings.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// Number of concurrent workers per batch.
    pub concurrency: usize,
    /// Minimum gap between two progress events.
    pub progress_interval: Duration,
    /// Hard timeout for the static fetch.
    pub request_timeout: Duration,
    /// User agents picked at random for each static fetch.
    pub user_agents: Vec<String>,
    /// Hard timeout for browser navigation.
    pub navigation_timeout: Duration,
    /// Pause after navigation to let deferred scripts run.
    pub settle_delay: Duration,
    /// Explicit browser binary; autodetected when `None`.
    pub chrome_executable: Option<PathBuf>,
    /// User agent of the headless browser.
    pub render_user_agent: String,
    /// Browser window size.
    pub window_size: (u32, u32),
}

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 14_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPad; CPU OS 14_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 10; Pixel 3) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Mobile Safari/537.36",
];

impl Default for Config {
    fn default() -> Self {
        Config {
            concurrency: 5,
            progress_interval: Duration::from_millis(500),
            request_timeout: Duration::from_secs(20),
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            navigation_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_secs(2),
            chrome_executable: None,
            render_user_agent: DEFAULT_USER_AGENTS[0].to_string(),
            window_size: (1920, 1080),
        }
    }
}

/// Load configuration from a TOML file
fn load_config_file(file_path: &str) -> anyhow::Result<ConfigFile> {
    let path = Path::new(file_path);
    if !path.exists() {
        tracing::warn!("Configuration file {} not found, using defaults", file_path);
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", file_path))?;

    let config = parse_config_file(&content)
        .with_context(|| format!("Failed to parse TOML configuration from {}", file_path))?;

    tracing::info!("Loaded configuration from {}", file_path);
    Ok(config)
}

fn parse_config_file(content: &str) -> Result<ConfigFile, toml::de::Error> {
    toml::from_str(content)
}

fn apply_file_config(config: &mut Config, file_config: &ConfigFile) {
    if let Some(network) = &file_config.network {
        if let Some(timeout) = network.request_timeout {
            config.request_timeout = Duration::from_secs(timeout);
        }
        if let Some(agents) = &network.user_agents {
            config.user_agents = agents.clone();
        }
    }

    if let Some(render) = &file_config.render {
        if let Some(timeout) = render.navigation_timeout {
            config.navigation_timeout = Duration::from_secs(timeout);
        }
        if let Some(delay) = render.settle_delay_ms {
            config.settle_delay = Duration::from_millis(delay);
        }
        if let Some(path) = &render.chrome_executable {
            config.chrome_executable = Some(path.clone());
        }
        if let Some(agent) = &render.user_agent {
            config.render_user_agent = agent.clone();
        }
        if let Some(width) = render.window_width {
            config.window_size.0 = width;
        }
        if let Some(height) = render.window_height {
            config.window_size.1 = height;
        }
    }

    if let Some(scheduler) = &file_config.scheduler {
        if let Some(concurrency) = scheduler.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(interval) = scheduler.progress_interval_ms {
            config.progress_interval = Duration::from_millis(interval);
        }
    }
}

/// Apply command line arguments to the Config instance
fn apply_cli_args(config: &mut Config, args: &ConfigArgs) {
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }

    if let Some(timeout) = args.request_timeout {
        config.request_timeout = Duration::from_secs(timeout);
    }

    if let Some(timeout) = args.navigation_timeout {
        config.navigation_timeout = Duration::from_secs(timeout);
    }

    if let Some(delay) = args.settle_delay_ms {
        config.settle_delay = Duration::from_millis(delay);
    }

    if let Some(interval) = args.progress_interval_ms {
        config.progress_interval = Duration::from_millis(interval);
    }

    if let Some(ref path) = args.chrome_executable {
        config.chrome_executable = Some(path.clone());
    }

    if let Some(ref agents) = args.user_agents {
        config.user_agents = agents
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

const MIN_TIMEOUT: Duration = Duration::from_secs(1);

fn validate_config(config: &mut Config) {
    if config.concurrency == 0 {
        config.concurrency = 1;
        tracing::warn!("Concurrency was set to 0. Setting to 1.");
    }

    if config.request_timeout < MIN_TIMEOUT {
        config.request_timeout = MIN_TIMEOUT;
        tracing::warn!("Request timeout must be at least 1 second. Setting to 1 second.");
    }

    if config.navigation_timeout < MIN_TIMEOUT {
        config.navigation_timeout = MIN_TIMEOUT;
        tracing::warn!("Navigation timeout must be at least 1 second. Setting to 1 second.");
    }

    config.user_agents.retain(|agent| !agent.trim().is_empty());
    if config.user_agents.is_empty() {
        config.user_agents = DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect();
        tracing::warn!("User agent list was empty. Restoring the default pool.");
    }

    if config.render_user_agent.trim().is_empty() {
        config.render_user_agent = DEFAULT_USER_AGENTS[0].to_string();
        tracing::warn!("Render user agent was empty. Restoring the default.");
    }

    if config.window_size.0 == 0 || config.window_size.1 == 0 {
        config.window_size = (1920, 1080);
        tracing::warn!("Window size must be non-zero. Setting to 1920x1080.");
    }
}

/// Builds the final configuration: defaults, then a TOML file, then CLI/env.
pub(crate) fn build_config(args: &ConfigArgs) -> anyhow::Result<Config> {
    let mut config = Config::default();

    if let Some(ref file_path) = args.config_file {
        let file_config = load_config_file(file_path)?;
        apply_file_config(&mut config, &file_config);
    } else {
        for path in ["./email-harvest.toml", "./config.toml"] {
            if Path::new(path).exists() {
                match load_config_file(path) {
                    Ok(file_config) => {
                        apply_file_config(&mut config, &file_config);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load configuration from {}: {}", path, e);
                    }
                }
            }
        }
    }

    apply_cli_args(&mut config, args);

    validate_config(&mut config);

    tracing::debug!("Final configuration: {:?}", config);

    Ok(config)
}

use crate::github::{GithubConfig, DEFAULT_API_URL};
use clap::{Parser, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Gateway settings. Every flag falls back to its environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "issues-gateway", version, about = "GitHub issues gateway and webhook receiver")]
pub struct Config {
    #[arg(long, env = "GITHUB_TOKEN", default_value = "", hide_env_values = true)]
    pub github_token: String,

    #[arg(long, env = "GITHUB_OWNER", default_value = "")]
    pub github_owner: String,

    #[arg(long, env = "GITHUB_REPO", default_value = "")]
    pub github_repo: String,

    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    pub github_api_url: String,

    /// Upper bound on each upstream call, in seconds.
    #[arg(long, env = "GITHUB_TIMEOUT_SECS", default_value_t = 20)]
    pub github_timeout_secs: u64,

    /// Shared secret for X-Hub-Signature-256.
    #[arg(long, env = "WEBHOOK_SECRET", default_value = "", hide_env_values = true)]
    pub webhook_secret: String,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "EVENTS_FILE", default_value = "events.jsonl")]
    pub events_file: PathBuf,

    #[arg(long, env = "EVENTS_INDEX_FILE", default_value = "events_index.json")]
    pub events_index_file: PathBuf,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Default level; RUST_LOG takes precedence.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn github(&self) -> GithubConfig {
        GithubConfig {
            api_url: self.github_api_url.clone(),
            token: self.github_token.clone(),
            owner: self.github_owner.clone(),
            repo: self.github_repo.clone(),
            timeout: Duration::from_secs(self.github_timeout_secs),
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

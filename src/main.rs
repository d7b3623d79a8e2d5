use clap::Parser;
use issues_gateway::config::Config;
use issues_gateway::github::GithubClient;
use issues_gateway::http_server::{self, AppState};
use issues_gateway::logging;
use issues_gateway::store::EventStore;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    logging::init(config.log_format, &config.log_level);

    if config.github_owner.is_empty() || config.github_repo.is_empty() {
        warn!("GITHUB_OWNER / GITHUB_REPO not set; issue routes will fail");
    }
    if config.github_token.is_empty() {
        warn!("GITHUB_TOKEN not set; issue routes will fail");
    }
    if config.webhook_secret.is_empty() {
        warn!("WEBHOOK_SECRET not set; webhooks are verified with an empty key");
    }

    let events = EventStore::open(&config.events_file, &config.events_index_file)?;
    info!(
        events_file = %config.events_file.display(),
        known_deliveries = events.len(),
        "event store ready"
    );

    let github = GithubClient::new(config.github())?;
    let state = AppState::new(github, events, config.webhook_secret.clone().into_bytes());

    http_server::serve(config.listen_addr(), state).await?;
    Ok(())
}

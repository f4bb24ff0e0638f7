use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use karmagate_server::approve_testing_loop;
use karmagate_server::collaborators::{
    BugTracker, BugzillaClient, InMemoryTagger, NoopBugTracker, TracingNotifier,
};
use karmagate_server::config::Config;
use karmagate_server::state_machine::{InterpreterContext, SqliteRepository};
use karmagate_server::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    info!(
        "Starting karmagate worker ({})",
        karmagate_server::get_version()
    );

    let config = Config::from_env().context("Failed to load configuration from environment")?;

    let db_path = config.state_dir.join("karmagate-state.db");
    info!("Using state database: {}", db_path.display());
    let repository = SqliteRepository::new(&db_path)
        .with_context(|| format!("Failed to open state database {}", db_path.display()))?;

    let bug_tracker: Arc<dyn BugTracker> = match &config.bugzilla_url {
        Some(url) => {
            info!("Using Bugzilla at {}", url);
            Arc::new(BugzillaClient::new(url.clone(), config.bugzilla_api_key.clone()))
        }
        None => {
            warn!("BUGZILLA_URL not set; bug updates will be skipped");
            Arc::new(NoopBugTracker)
        }
    };

    let interpreter = InterpreterContext {
        tagger: Arc::new(InMemoryTagger::new()),
        bug_tracker,
        notifier: Arc::new(TracingNotifier),
        repository: Arc::new(repository),
        retry: config.retry,
    };
    let engine = Engine::new(Arc::new(config.policy.clone()), interpreter);

    info!(
        "Approving testing updates every {} seconds",
        config.approve_testing_interval.as_secs()
    );
    let sweep = tokio::spawn(approve_testing_loop(
        engine,
        config.approve_testing_interval,
    ));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
        }
        result = sweep => {
            result.context("Approve-testing loop stopped")?;
        }
    }

    Ok(())
}

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::backend::client::BackendClient;
use crate::browser::executor::WebDriverExecutor;
use crate::browser::validator::StalenessValidator;
use crate::cli::config::FetcherConfig;
use crate::storage::state::{RedisStateStore, StateStore};
use crate::worker::controller::Orchestrator;
use crate::worker::task::OutcomeStatus;

fn load_config(profile: Option<&str>) -> Result<FetcherConfig> {
    match profile {
        Some(name) => {
            FetcherConfig::load_profile(name).context(format!("Failed to load profile: {name}"))
        }
        None => FetcherConfig::load_default(),
    }
}

/// Run the worker until the queue drains or the operator pauses it
pub async fn run(communities: Option<String>, profile: Option<String>) -> Result<()> {
    let config = load_config(profile.as_deref())?;

    let store: Arc<dyn StateStore> = Arc::new(RedisStateStore::connect(&config.storage).await?);
    let executor = Arc::new(WebDriverExecutor::connect(&config.session).await?);
    let backend = BackendClient::new(&config.backend)?;

    let orchestrator =
        Orchestrator::new(config.clone(), store, executor.clone(), backend).await?;
    let mut updates = orchestrator.subscribe();

    if let Some(ids) = communities {
        let queue = orchestrator
            .load_queue(&ids)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        info!("Loaded fresh queue: {} tasks", queue.total_tasks);
    }

    // Land the session on the first queued community so the token and its
    // validation probe have a real page to work from
    let snapshot = orchestrator.snapshot().await;
    if let Some(task) = snapshot.queue.as_ref().and_then(|q| q.tasks.front()) {
        let community_url = format!(
            "{}/{}",
            config.target.site_url.trim_end_matches('/'),
            task.community_id
        );
        executor.navigate(&community_url).await?;
    }

    orchestrator
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("Cannot start run: {e}"))?;
    info!("Run started; press Ctrl-C to pause after the current task");

    let mut started = false;
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(snapshot) => {
                    if snapshot.is_running {
                        started = true;
                    } else if started {
                        if snapshot.is_paused {
                            info!("Run paused; remaining tasks stay queued for `fetcher run`");
                        }
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            // Fallback poll on live state in case broadcasts were missed;
            // after a successful start, not-running means the run is over
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                if !orchestrator.snapshot().await.is_running {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl-C received; pausing after the in-flight task");
                orchestrator.stop().await;
            }
        }
    }

    let summary = orchestrator.run_summary().await;
    println!("Tasks processed: {}", summary.total);
    println!("Succeeded:       {}", summary.succeeded);
    println!("Failed:          {}", summary.failed);
    println!("Skipped:         {}", summary.skipped);
    println!("Avg per task:    {}ms", summary.avg_duration_ms);

    Ok(())
}

/// Fetch a fresh queue from the backend and persist it for a later run
pub async fn queue(communities: String, profile: Option<String>) -> Result<()> {
    let config = load_config(profile.as_deref())?;

    let store = RedisStateStore::connect(&config.storage).await?;
    let backend = BackendClient::new(&config.backend)?;

    let queue = backend
        .fetch_queue(&communities)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    store.save_queue(&queue).await?;
    store.save_completed_count(0).await?;

    println!(
        "Queue loaded: {} tasks (generated {})",
        queue.total_tasks, queue.generated_at
    );

    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for task in &queue.tasks {
        *by_type.entry(task.task_type.as_str()).or_default() += 1;
    }
    for (task_type, count) in by_type {
        println!("  {count:>4}  {task_type}");
    }

    println!("Next up:");
    for task in queue.tasks.iter().take(5) {
        println!(
            "  p{} {} {} - {}",
            task.priority, task.task_type, task.community_id, task.reason
        );
    }

    Ok(())
}

/// Show the persisted worker state without touching the browser
pub async fn status(profile: Option<String>) -> Result<()> {
    let config = load_config(profile.as_deref())?;
    let store = RedisStateStore::connect(&config.storage).await?;

    match store.load_queue().await? {
        Some(queue) => println!(
            "Queue: {} of {} tasks remaining (generated {})",
            queue.tasks.len(),
            queue.total_tasks,
            queue.generated_at
        ),
        None => println!("Queue: none loaded"),
    }
    println!(
        "Completed this queue: {}",
        store.load_completed_count().await?
    );

    let log = store.fetch_log().await?;
    if !log.is_empty() {
        println!("Recent outcomes:");
        for outcome in log.iter().rev().take(10) {
            let status = match outcome.status {
                OutcomeStatus::Success => "ok",
                OutcomeStatus::Error => "error",
                OutcomeStatus::Skipped => "skipped",
            };
            println!(
                "  {}  {:<7}  {} {} ({}ms)",
                outcome.timestamp.format("%Y-%m-%d %H:%M:%S"),
                status,
                outcome.task.task_type,
                outcome.task.community_id,
                outcome.duration_ms
            );
        }
    }

    Ok(())
}

/// Run only the staleness validation against the live session
pub async fn validate(profile: Option<String>) -> Result<()> {
    let config = load_config(profile.as_deref())?;
    let executor = Arc::new(WebDriverExecutor::connect(&config.session).await?);
    let validator = StalenessValidator::new(executor, config.target.clone());

    match validator.validate().await {
        Ok(validation) => {
            println!("Token: {}", validation.token);
            if let Some(warning) = validation.warning {
                println!("Warning: {warning}");
            }
            Ok(())
        }
        Err(e) => anyhow::bail!("Validation failed: {e}"),
    }
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = FetcherConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Manage a specific configuration profile
pub fn manage_profile(profile_name: String) -> Result<()> {
    match FetcherConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{:#?}", config);
        }
        Err(_) => {
            warn!(
                "Profile '{}' does not exist. Creating a default profile.",
                profile_name
            );
            let config = FetcherConfig::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let config = FetcherConfig::load_default()?;
    println!("Current configuration:");
    println!("{:#?}", config);

    Ok(())
}

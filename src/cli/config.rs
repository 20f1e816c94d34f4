use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FetcherConfig {
    pub target: TargetSettings,
    pub backend: BackendSettings,
    pub worker: WorkerSettings,
    pub storage: StorageSettings,
    pub session: SessionSettings,
}

/// The community platform being crawled
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TargetSettings {
    /// Base URL of the site whose internal data endpoints are fetched
    pub site_url: String,
    /// Base URL of the secondary API host (post comments and votes)
    pub api_url: String,
    /// Hostname fragment the live page must be on
    pub host: String,
}

/// The storage backend that generates queues and ingests results
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendSettings {
    pub base_url: String,
    /// Source label stamped on every synced payload
    pub source: String,
    pub request_timeout_secs: u64,
}

/// Worker loop pacing
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerSettings {
    /// Inter-task delay window in milliseconds (uniform random)
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    /// Fixed backoff after a failed task
    pub error_backoff_ms: u64,
}

/// Durable state store settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageSettings {
    pub redis_url: String,
}

/// Browser session settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionSettings {
    pub webdriver_url: String,
    /// Extra browser arguments, e.g. a --user-data-dir pointing at a
    /// profile that is already signed in to the target
    pub browser_args: Vec<String>,
    pub page_load_timeout_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            target: TargetSettings {
                site_url: "https://www.skool.com".to_string(),
                api_url: "https://api2.skool.com".to_string(),
                host: "skool.com".to_string(),
            },
            backend: BackendSettings {
                base_url: "http://localhost:3000".to_string(),
                source: "skool".to_string(),
                request_timeout_secs: 30,
            },
            worker: WorkerSettings {
                delay_min_ms: 2000,
                delay_max_ms: 5000,
                error_backoff_ms: 1000,
            },
            storage: StorageSettings {
                redis_url: "redis://localhost:6379".to_string(),
            },
            session: SessionSettings {
                webdriver_url: "http://localhost:4444".to_string(),
                browser_args: vec![],
                page_load_timeout_secs: 30,
            },
        }
    }
}

impl FetcherConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) =
            directories::ProjectDirs::from("com", "community-fetcher", "community-fetcher")
        {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        // Create the profiles directory if it doesn't exist
        path.push("profiles");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        // Move back up to the config directory
        path.pop();
        path
    }

    /// Load the default configuration, creating it on first run
    pub fn load_default() -> Result<Self> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a configuration profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        let config_dir = Self::config_dir();
        let profile_path = config_dir.join("profiles").join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        self.save_to_file(&config_path)
    }

    /// Save the configuration as a profile
    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        let config_dir = Self::config_dir();
        let profiles_dir = config_dir.join("profiles");

        if !profiles_dir.exists() {
            fs::create_dir_all(&profiles_dir).context(format!(
                "Failed to create profiles directory: {}",
                profiles_dir.display()
            ))?;
        }

        let profile_path = profiles_dir.join(format!("{}.yaml", profile));
        self.save_to_file(&profile_path)
    }

    /// Save the configuration to a file
    fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let config_dir = Self::config_dir();
        let profiles_dir = config_dir.join("profiles");

        if !profiles_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(profiles_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(stem) = path.file_stem() {
                    if let Some(name) = stem.to_str() {
                        profiles.push(name.to_string());
                    }
                }
            }
        }

        Ok(profiles)
    }

    fn validate(&self) -> Result<()> {
        if self.worker.delay_min_ms > self.worker.delay_max_ms {
            anyhow::bail!(
                "worker.delay_min_ms ({}) must not exceed worker.delay_max_ms ({})",
                self.worker.delay_min_ms,
                self.worker.delay_max_ms
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        let config = FetcherConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_delay_window_is_rejected() {
        let mut config = FetcherConfig::default();
        config.worker.delay_min_ms = 9000;
        config.worker.delay_max_ms = 2000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let config = FetcherConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: FetcherConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.target.site_url, config.target.site_url);
        assert_eq!(parsed.storage.redis_url, config.storage.redis_url);
    }
}

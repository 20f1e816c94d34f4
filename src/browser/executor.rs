use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thirtyfour::prelude::*;
use tracing::debug;

use crate::cli::config::SessionSettings;
use crate::worker::error::TaskError;

/// The host capability of running code inside the live, authenticated page.
///
/// The orchestration core depends only on this seam; the production
/// implementation drives a WebDriver session, tests supply scripted fakes.
#[async_trait]
pub trait PageExecutor: Send + Sync {
    /// Run an async script body in the page and return its result.
    ///
    /// Transport failures (the script could not be run at all) surface as
    /// `TaskError::ScriptInjection`; anything the script itself reports
    /// comes back inside the returned value.
    async fn run_in_page(&self, script: &str, args: Vec<Value>) -> Result<Value, TaskError>;
}

/// Production `PageExecutor` over a WebDriver session.
///
/// The session must already be signed in to the target site; this worker
/// never handles credentials itself. Extra browser arguments (e.g. a
/// `--user-data-dir` pointing at a signed-in profile) come from config.
pub struct WebDriverExecutor {
    driver: WebDriver,
}

impl WebDriverExecutor {
    pub async fn connect(settings: &SessionSettings) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();
        for arg in &settings.browser_args {
            caps.add_chrome_arg(arg)
                .context(format!("Invalid browser argument: {arg}"))?;
        }

        let driver = WebDriver::new(&settings.webdriver_url, caps)
            .await
            .context(format!(
                "Failed to connect to WebDriver at {}",
                settings.webdriver_url
            ))?;

        driver
            .set_page_load_timeout(Duration::from_secs(settings.page_load_timeout_secs))
            .await?;

        debug!("WebDriver session established at {}", settings.webdriver_url);

        Ok(Self { driver })
    }

    /// Navigate the session to a URL, used to land on the target site
    /// before token extraction. The session is never quit by this worker;
    /// it belongs to the operator.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        debug!("Navigating to: {}", url);
        self.driver
            .goto(url)
            .await
            .context(format!("Failed to navigate to URL: {url}"))?;
        Ok(())
    }
}

#[async_trait]
impl PageExecutor for WebDriverExecutor {
    async fn run_in_page(&self, script: &str, args: Vec<Value>) -> Result<Value, TaskError> {
        let ret = self
            .driver
            .execute_async(script, args)
            .await
            .map_err(|e| TaskError::ScriptInjection(e.to_string()))?;

        Ok(ret.json().clone())
    }
}

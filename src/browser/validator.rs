use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::browser::executor::PageExecutor;
use crate::browser::script;
use crate::cli::config::TargetSettings;
use crate::worker::error::ValidationError;
use crate::worker::resolver::resolve_request;
use crate::worker::task::{FetchTask, TaskType};

/// Successful validation. A warning means the token could not be fully
/// confirmed but nothing indicated staleness; the run may proceed.
#[derive(Debug, Clone)]
pub struct Validation {
    pub token: String,
    pub warning: Option<String>,
}

/// Probes the session's addressing token before a run.
///
/// The token changes whenever the target redeploys; running a whole queue
/// built on a stale token wastes the run, so one cheap real request is
/// issued up front instead of discovering the staleness task by task.
pub struct StalenessValidator {
    executor: Arc<dyn PageExecutor>,
    target: TargetSettings,
    slug_re: Regex,
}

impl StalenessValidator {
    pub fn new(executor: Arc<dyn PageExecutor>, target: TargetSettings) -> Self {
        // First path segment of a community page; guaranteed to compile
        let slug_re = Regex::new(r"^/([A-Za-z0-9-]+)").expect("static regex");
        Self {
            executor,
            target,
            slug_re,
        }
    }

    pub async fn validate(&self) -> Result<Validation, ValidationError> {
        let ctx = self
            .executor
            .run_in_page(script::PAGE_CONTEXT, Vec::new())
            .await
            .map_err(|e| ValidationError::Script(e.to_string()))?;

        let token_result = self
            .executor
            .run_in_page(script::EXTRACT_TOKEN, Vec::new())
            .await
            .map_err(|e| ValidationError::Script(e.to_string()))?;
        let token = token_result
            .get("token")
            .and_then(Value::as_str)
            .ok_or(ValidationError::NoToken)?
            .to_string();

        let pathname = ctx
            .get("pathname")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let Some(slug) = self.community_slug(pathname) else {
            // Token exists but there is no community page to test it
            // against; assume ok
            return Ok(Validation {
                token,
                warning: Some("could not probe the token (not on a community page)".to_string()),
            });
        };

        debug!(%token, %slug, "probing addressing token");
        let probe = probe_task(&slug);
        let probe_url = resolve_request(&probe, &token, &self.target, None)
            .map_err(|e| ValidationError::Script(e.to_string()))?
            .url;

        let response = self
            .executor
            .run_in_page(script::FETCH_JSON, vec![Value::String(probe_url.into())])
            .await
            .map_err(|e| ValidationError::Script(e.to_string()))?;

        if let Some(err) = response.get("networkError").and_then(Value::as_str) {
            // Ambiguous; do not block the run on an unrelated failure
            return Ok(Validation {
                token,
                warning: Some(format!("network error while probing the token: {err}")),
            });
        }

        let ok = response.get("ok").and_then(Value::as_bool).unwrap_or(false);
        let status = response.get("status").and_then(Value::as_u64).unwrap_or(0) as u16;
        let body = response
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if ok {
            return Ok(Validation {
                token,
                warning: None,
            });
        }

        if status == 404 && stale_signature(body) {
            return Err(ValidationError::StaleToken { token });
        }

        let warning = if status == 404 {
            format!("community \"{slug}\" not found, but the token looks ok")
        } else {
            format!("probe request returned HTTP {status}")
        };
        Ok(Validation {
            token,
            warning: Some(warning),
        })
    }

    fn community_slug(&self, pathname: &str) -> Option<String> {
        let slug = self.slug_re.captures(pathname)?.get(1)?.as_str();
        // Non-community routes cannot serve as a probe
        if slug == "discover" || slug == "settings" {
            return None;
        }
        Some(slug.to_string())
    }
}

fn probe_task(slug: &str) -> FetchTask {
    FetchTask {
        id: String::new(),
        task_type: TaskType::AboutPage,
        priority: 0,
        community_id: slug.to_string(),
        entity_id: None,
        page: None,
        params: None,
        reason: String::new(),
        last_fetched_at: None,
    }
}

/// A 404 that matches the framework's not-found page rather than a missing
/// community means the token no longer resolves
fn stale_signature(body: &str) -> bool {
    body.contains("404") || body.contains("Error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::gateway::tests::FakePage;
    use serde_json::json;

    fn target() -> TargetSettings {
        TargetSettings {
            site_url: "https://www.skool.com".to_string(),
            api_url: "https://api2.skool.com".to_string(),
            host: "skool.com".to_string(),
        }
    }

    fn validator(page: FakePage) -> StalenessValidator {
        StalenessValidator::new(Arc::new(page), target())
    }

    #[tokio::test]
    async fn missing_token_is_no_token() {
        let result = validator(FakePage::new(None)).validate().await;
        assert!(matches!(result, Err(ValidationError::NoToken)));
    }

    #[tokio::test]
    async fn probe_success_validates_cleanly() {
        let page = FakePage::new(Some("B1"));
        page.queue_fetch(json!({ "ok": true, "status": 200, "body": "{}" }));
        let validation = validator(page).validate().await.unwrap();
        assert_eq!(validation.token, "B1");
        assert!(validation.warning.is_none());
    }

    #[tokio::test]
    async fn stale_signature_404_is_stale_token() {
        let page = FakePage::new(Some("OLD"));
        page.queue_fetch(json!({
            "ok": false,
            "status": 404,
            "body": "<html>404 - This page could not be found</html>"
        }));
        let result = validator(page).validate().await;
        assert!(matches!(result, Err(ValidationError::StaleToken { token }) if token == "OLD"));
    }

    #[tokio::test]
    async fn plain_404_warns_instead_of_failing() {
        let page = FakePage::new(Some("B1"));
        page.queue_fetch(json!({ "ok": false, "status": 404, "body": "{}" }));
        let validation = validator(page).validate().await.unwrap();
        assert!(validation.warning.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn unrelated_http_error_warns_instead_of_failing() {
        let page = FakePage::new(Some("B1"));
        page.queue_fetch(json!({ "ok": false, "status": 503, "body": "" }));
        let validation = validator(page).validate().await.unwrap();
        assert!(validation.warning.unwrap().contains("HTTP 503"));
    }

    #[tokio::test]
    async fn network_failure_during_probe_warns_instead_of_failing() {
        let page = FakePage::new(Some("B1"));
        page.queue_fetch(json!({ "networkError": "offline" }));
        let validation = validator(page).validate().await.unwrap();
        assert!(validation.warning.unwrap().contains("network error"));
    }

    #[tokio::test]
    async fn non_community_page_validates_with_warning() {
        let mut page = FakePage::new(Some("B1"));
        page.pathname = "/discover";
        let validation = validator(page).validate().await.unwrap();
        assert!(validation
            .warning
            .unwrap()
            .contains("not on a community page"));
    }
}

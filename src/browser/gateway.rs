use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::browser::executor::PageExecutor;
use crate::browser::script;
use crate::cli::config::TargetSettings;
use crate::worker::error::TaskError;
use crate::worker::resolver::resolve_request;
use crate::worker::task::{FetchTask, OutcomeStatus, TaskType};

/// One step of a task execution, kept so a failed outcome carries a
/// reconstructible diagnostic path rather than just a terminal message
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub step: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// Result of executing one task inside the live session
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub status: OutcomeStatus,
    pub entity_type: &'static str,
    pub data: Option<Value>,
    pub error: Option<TaskError>,
    /// Resolved request URL, when execution got that far
    pub url: Option<String>,
    pub trace: Vec<TraceEntry>,
}

/// Executes fetch tasks inside the authenticated session.
///
/// Every step is a distinct failure point with its own error kind; a
/// failure here never propagates as `Err` — the caller always gets a
/// report it can record and move past.
pub struct TargetGateway {
    executor: Arc<dyn PageExecutor>,
    target: TargetSettings,
}

impl TargetGateway {
    pub fn new(executor: Arc<dyn PageExecutor>, target: TargetSettings) -> Self {
        Self { executor, target }
    }

    pub async fn execute(&self, task: &FetchTask) -> ExecutionReport {
        let entity_type = task.task_type.as_str();
        let mut trace = Vec::new();
        let mut url = None;

        if task.task_type == TaskType::Unknown {
            trace.push(TraceEntry {
                step: "skip_unknown_type",
                detail: Some(json!({ "taskId": task.id })),
            });
            return ExecutionReport {
                status: OutcomeStatus::Skipped,
                entity_type,
                data: None,
                error: None,
                url: None,
                trace,
            };
        }

        match self.run_steps(task, &mut trace, &mut url).await {
            Ok(data) => ExecutionReport {
                status: OutcomeStatus::Success,
                entity_type,
                data: Some(data),
                error: None,
                url,
                trace,
            },
            Err(error) => {
                trace.push(TraceEntry {
                    step: "failed",
                    detail: Some(json!({ "kind": error.kind(), "error": error.to_string() })),
                });
                ExecutionReport {
                    status: OutcomeStatus::Error,
                    entity_type,
                    data: None,
                    error: Some(error),
                    url,
                    trace,
                }
            }
        }
    }

    async fn run_steps(
        &self,
        task: &FetchTask,
        trace: &mut Vec<TraceEntry>,
        url: &mut Option<String>,
    ) -> Result<Value, TaskError> {
        // Step 1: confirm the session is still on the target site
        let ctx = self
            .executor
            .run_in_page(script::PAGE_CONTEXT, Vec::new())
            .await?;
        let hostname = ctx
            .get("hostname")
            .and_then(Value::as_str)
            .unwrap_or_default();
        trace.push(TraceEntry {
            step: "check_context",
            detail: Some(json!({ "href": ctx.get("href") })),
        });
        if !hostname.contains(&self.target.host) {
            return Err(TaskError::WrongContext {
                expected: self.target.host.clone(),
            });
        }

        // Step 2: re-extract the addressing token; it may have changed
        // since pre-run validation
        let token_result = self
            .executor
            .run_in_page(script::EXTRACT_TOKEN, Vec::new())
            .await?;
        let token = token_result
            .get("token")
            .and_then(Value::as_str)
            .ok_or(TaskError::NoToken)?
            .to_string();
        trace.push(TraceEntry {
            step: "got_token",
            detail: Some(json!({ "token": token })),
        });

        // Step 3: resolve the request URL, looking the group id up in the
        // page when the task params do not carry it
        let fallback_group_id = if task.task_type.requires_group_id() && task.group_id_param().is_none()
        {
            let lookup = self
                .executor
                .run_in_page(script::GROUP_ID_FALLBACK, Vec::new())
                .await?;
            let found = lookup
                .get("groupId")
                .and_then(Value::as_str)
                .map(str::to_string);
            trace.push(TraceEntry {
                step: "group_id_lookup",
                detail: Some(json!({ "found": found.is_some() })),
            });
            found
        } else {
            None
        };
        let resolved = resolve_request(task, &token, &self.target, fallback_group_id.as_deref())?;
        *url = Some(resolved.url.to_string());
        trace.push(TraceEntry {
            step: "url_built",
            detail: Some(json!({ "url": resolved.url.as_str() })),
        });

        // Step 4: fetch inside the page, with the session's credentials
        let response = self
            .executor
            .run_in_page(
                script::FETCH_JSON,
                vec![Value::String(resolved.url.to_string())],
            )
            .await?;
        if let Some(err) = response.get("networkError").and_then(Value::as_str) {
            return Err(TaskError::Network(err.to_string()));
        }
        let status = response.get("status").and_then(Value::as_u64).unwrap_or(0) as u16;
        let ok = response.get("ok").and_then(Value::as_bool).unwrap_or(false);
        let body = response
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default();
        trace.push(TraceEntry {
            step: "fetched",
            detail: Some(json!({ "status": status })),
        });
        if !ok {
            return Err(TaskError::Http {
                status,
                body: condense_error_body(body),
            });
        }

        // Step 5: parse the body
        let data: Value =
            serde_json::from_str(body).map_err(|e| TaskError::Parse(e.to_string()))?;
        debug!(
            task_id = %task.id,
            entity_type = %task.task_type,
            "task fetch parsed ok"
        );
        trace.push(TraceEntry {
            step: "parsed",
            detail: None,
        });

        Ok(data)
    }
}

/// Pull a usable message out of an error body: prefer the JSON
/// `message`/`error` field, otherwise truncate the raw text.
fn condense_error_body(body: &str) -> String {
    const MAX: usize = 200;
    if let Ok(parsed) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = parsed
            .get("message")
            .or_else(|| parsed.get("error"))
            .and_then(Value::as_str)
        {
            return msg.to_string();
        }
        let compact = parsed.to_string();
        return compact.chars().take(MAX).collect();
    }
    body.chars().take(MAX).collect()
}

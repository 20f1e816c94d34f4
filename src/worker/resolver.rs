use url::Url;

use crate::cli::config::TargetSettings;
use crate::worker::error::TaskError;
use crate::worker::task::{FetchTask, TaskType};

/// A fully resolved request for one task
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub url: Url,
    /// Entity type recorded in outcomes and sync payloads
    pub entity_type: &'static str,
}

/// Resolve a task to its request URL.
///
/// One fixed mapping row per task type. Most types hit the site's internal
/// data endpoints, addressed by the current token; `post_details` and
/// `likes` go to the secondary API host and need the community's group id,
/// taken from `task.params` or from `fallback_group_id` (looked up in the
/// live page by the caller).
pub fn resolve_request(
    task: &FetchTask,
    token: &str,
    target: &TargetSettings,
    fallback_group_id: Option<&str>,
) -> Result<ResolvedRequest, TaskError> {
    let site = target.site_url.trim_end_matches('/');
    let api = target.api_url.trim_end_matches('/');
    let cid = &task.community_id;

    let raw = match task.task_type {
        TaskType::AboutPage => {
            format!("{site}/_next/data/{token}/{cid}/about.json?group={cid}")
        }
        TaskType::Members => {
            let p = task.page.unwrap_or(1);
            format!(
                "{site}/_next/data/{token}/{cid}/-/members.json?t=active&p={p}&online=&levels=&price=&courseIds=&sortType=-memberlastoffline&monthly=false&annual=false&trials=false&group={cid}"
            )
        }
        TaskType::CommunityPage => {
            let p = task.page.unwrap_or(1);
            if p > 1 {
                format!("{site}/_next/data/{token}/{cid}.json?c=&s=newest&fl=&p={p}")
            } else {
                format!("{site}/_next/data/{token}/{cid}.json?c=&s=newest&fl=")
            }
        }
        TaskType::Profile => {
            let eid = required_entity_id(task)?;
            format!("{site}/_next/data/{token}/@{eid}.json?group=@{eid}")
        }
        TaskType::PostDetails => {
            let eid = required_entity_id(task)?;
            let gid = required_group_id(task, fallback_group_id)?;
            format!("{api}/posts/{eid}/comments?group-id={gid}&limit=25&pinned=true")
        }
        TaskType::Likes => {
            let eid = required_entity_id(task)?;
            let gid = required_group_id(task, fallback_group_id)?;
            format!("{api}/posts/{eid}/vote-users?group-id={gid}")
        }
        TaskType::Unknown => {
            return Err(TaskError::MissingDependency {
                what: "URL mapping",
                task_type: "unknown",
            });
        }
    };

    let url = Url::parse(&raw).map_err(|e| TaskError::Parse(format!("invalid request URL: {e}")))?;

    Ok(ResolvedRequest {
        url,
        entity_type: task.task_type.as_str(),
    })
}

fn required_entity_id(task: &FetchTask) -> Result<&str, TaskError> {
    task.entity_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(TaskError::MissingDependency {
            what: "entityId",
            task_type: task.task_type.as_str(),
        })
}

fn required_group_id<'a>(
    task: &'a FetchTask,
    fallback: Option<&'a str>,
) -> Result<&'a str, TaskError> {
    task.group_id_param()
        .or(fallback)
        .filter(|s| !s.is_empty())
        .ok_or(TaskError::MissingDependency {
            what: "groupId",
            task_type: task.task_type.as_str(),
        })
}

/// Canonical entity id under which a fetched result is stored.
///
/// Precedence matters: a paginated task is keyed by its page before
/// anything else, and likes are keyed off the post rather than a generic
/// entity, matching the ids the queue generator checks against.
pub fn sync_entity_id(task: &FetchTask) -> String {
    if let Some(page) = task.page {
        return format!("{}_page_{}", task.community_id, page);
    }
    match task.entity_id.as_deref().filter(|s| !s.is_empty()) {
        Some(eid) if task.task_type == TaskType::Likes => {
            format!("{}_post_{}", task.community_id, eid)
        }
        Some(eid) => format!("{}_{}", task.community_id, eid),
        None => task.community_id.clone(),
    }
}

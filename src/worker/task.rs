use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

/// Kind of data a fetch task targets.
///
/// The queue generator assigns these; unrecognized values decode to
/// `Unknown` so a single new task type cannot poison an entire queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    AboutPage,
    Members,
    CommunityPage,
    Profile,
    PostDetails,
    Likes,
    #[serde(other)]
    Unknown,
}

impl TaskType {
    /// Wire name, as used in outcomes and sync payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::AboutPage => "about_page",
            TaskType::Members => "members",
            TaskType::CommunityPage => "community_page",
            TaskType::Profile => "profile",
            TaskType::PostDetails => "post_details",
            TaskType::Likes => "likes",
            TaskType::Unknown => "unknown",
        }
    }

    /// Human-readable label for progress output
    pub fn label(&self) -> &'static str {
        match self {
            TaskType::AboutPage => "About Page",
            TaskType::Members => "Members",
            TaskType::CommunityPage => "Posts",
            TaskType::Profile => "Profile",
            TaskType::PostDetails => "Post Details",
            TaskType::Likes => "Likes",
            TaskType::Unknown => "Unknown",
        }
    }

    /// Types that address a single entity and cannot run without `entity_id`
    pub fn requires_entity_id(&self) -> bool {
        matches!(
            self,
            TaskType::Profile | TaskType::PostDetails | TaskType::Likes
        )
    }

    /// Types served by the secondary API host, which keys requests off the
    /// community's internal group id rather than its slug
    pub fn requires_group_id(&self) -> bool {
        matches!(self, TaskType::PostDetails | TaskType::Likes)
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of crawl work, produced by the external queue generator.
///
/// Which optional fields are required depends on `task_type`; a violated
/// combination surfaces as a per-task error during URL resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchTask {
    /// Externally assigned, opaque to this worker
    pub id: String,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    /// Lower = more urgent; display only, order comes from queue position
    pub priority: i32,

    #[serde(default)]
    pub community_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    /// Opaque bag of cross-task context (e.g. the parent group id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<HashMap<String, Value>>,

    #[serde(default)]
    pub reason: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl FetchTask {
    /// Group id carried in `params`, when the queue generator supplied one
    pub fn group_id_param(&self) -> Option<&str> {
        self.params.as_ref()?.get("groupId")?.as_str()
    }
}

/// The ordered, externally generated list of pending tasks.
///
/// The worker only removes from the head; `total_tasks` is the count at
/// generation time and is never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Queue {
    pub tasks: VecDeque<FetchTask>,
    pub generated_at: DateTime<Utc>,
    pub total_tasks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
    Skipped,
}

/// Recorded result of executing one task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub task: FetchTask,
    pub status: OutcomeStatus,
    /// Present iff `status == Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Resolved request URL, kept for diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
}

/// Entry in the bounded debug buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// The task the worker loop is currently executing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTask {
    pub task: FetchTask,
    /// 1-based position within this run
    pub index: usize,
    pub total: u32,
    pub started_at: DateTime<Utc>,
}

/// Read-only view of the execution state, broadcast to observers.
///
/// Log fields carry only the most recent window; the full buffers are
/// available through the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub is_running: bool,
    pub is_paused: bool,
    pub queue: Option<Queue>,
    pub completed_count: u64,
    pub fetch_log: Vec<TaskOutcome>,
    pub debug_log: Vec<LogEntry>,
    pub current_task: Option<CurrentTask>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_queue_from_backend_json() {
        let json = r#"{
            "tasks": [
                {
                    "id": "t1",
                    "type": "members",
                    "priority": 2,
                    "communityId": "rust-circle",
                    "page": 3,
                    "reason": "member list refresh due"
                },
                {
                    "id": "t2",
                    "type": "likes",
                    "priority": 5,
                    "communityId": "rust-circle",
                    "entityId": "post123",
                    "params": {"groupId": "g-uuid-1"},
                    "reason": "likes never fetched"
                }
            ],
            "generatedAt": "2026-02-01T10:00:00Z",
            "totalTasks": 2
        }"#;

        let queue: Queue = serde_json::from_str(json).unwrap();
        assert_eq!(queue.total_tasks, 2);
        assert_eq!(queue.tasks.len(), 2);

        let head = &queue.tasks[0];
        assert_eq!(head.task_type, TaskType::Members);
        assert_eq!(head.page, Some(3));
        assert!(head.entity_id.is_none());

        let likes = &queue.tasks[1];
        assert_eq!(likes.task_type, TaskType::Likes);
        assert_eq!(likes.group_id_param(), Some("g-uuid-1"));
    }

    #[test]
    fn unrecognized_task_type_decodes_to_unknown() {
        let json = r#"{"id": "t9", "type": "leaderboard", "priority": 1, "communityId": "c", "reason": ""}"#;
        let task: FetchTask = serde_json::from_str(json).unwrap();
        assert_eq!(task.task_type, TaskType::Unknown);
    }

    #[test]
    fn field_requirements_follow_task_type() {
        assert!(TaskType::Profile.requires_entity_id());
        assert!(TaskType::PostDetails.requires_entity_id());
        assert!(TaskType::Likes.requires_group_id());
        assert!(!TaskType::Members.requires_entity_id());
        assert!(!TaskType::AboutPage.requires_group_id());
    }
}

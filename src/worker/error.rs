use thiserror::Error;

/// Error classification for a single task execution.
///
/// All of these are recovered locally: the outcome is recorded, the task is
/// discarded from the queue, and the run continues. Retry is the queue
/// generator's job, not ours.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("page is not on {expected}")]
    WrongContext { expected: String },

    #[error("no addressing token found in page (not fully loaded?)")]
    NoToken,

    #[error("addressing token {token} is stale; the target has redeployed")]
    StaleToken { token: String },

    /// A required identifier is absent from both the task and the page.
    /// Signals that the queue must be re-derived after a prerequisite fetch.
    #[error("{what} not available for {task_type} task (rebuild queue after fetching posts)")]
    MissingDependency {
        what: &'static str,
        task_type: &'static str,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to parse response JSON: {0}")]
    Parse(String),

    #[error("script injection failed: {0}")]
    ScriptInjection(String),
}

impl TaskError {
    /// Stable snake_case label, used in traces and log details
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::WrongContext { .. } => "wrong_context",
            TaskError::NoToken => "no_token",
            TaskError::StaleToken { .. } => "stale_token",
            TaskError::MissingDependency { .. } => "missing_dependency",
            TaskError::Network(_) => "network_error",
            TaskError::Http { .. } => "http_error",
            TaskError::Parse(_) => "parse_error",
            TaskError::ScriptInjection(_) => "script_injection_error",
        }
    }
}

/// Failure of the pre-run staleness validation. Aborts the attempt to
/// start; queue and counters are left untouched.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("no addressing token found; reload the target page and retry")]
    NoToken,

    #[error("addressing token {token} is stale; reload the target page and retry")]
    StaleToken { token: String },

    #[error("validation script failed: {0}")]
    Script(String),
}

/// Refusals returned by `start` and `resume`
#[derive(Debug, Error)]
pub enum StartError {
    #[error("Already running")]
    AlreadyRunning,

    #[error("No queue loaded")]
    NoQueue,

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Error)]
pub enum LoadQueueError {
    #[error("cannot replace the queue while a run is active")]
    Running,

    #[error("failed to load queue from backend: {0}")]
    Backend(String),
}

/// Failure pushing one result to the storage backend. Logged for manual
/// reconciliation; never blocks queue progress.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync request failed: {0}")]
    Request(String),

    #[error("sync rejected with HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

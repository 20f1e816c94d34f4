use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::backend::client::BackendClient;
use crate::browser::executor::PageExecutor;
use crate::browser::gateway::TargetGateway;
use crate::browser::validator::StalenessValidator;
use crate::cli::config::FetcherConfig;
use crate::storage::state::StateStore;
use crate::utils::audit::{
    BoundedLog, DEBUG_BROADCAST_WINDOW, DEBUG_LOG_CAP, FETCH_BROADCAST_WINDOW, FETCH_LOG_CAP,
};
use crate::worker::error::{LoadQueueError, StartError};
use crate::worker::summary::RunSummary;
use crate::worker::task::{
    CurrentTask, LogEntry, LogLevel, OutcomeStatus, Queue, StateSnapshot, TaskOutcome,
};

/// The process-wide execution state. Exactly one instance exists per
/// orchestrator and only the orchestrator mutates it; everything else sees
/// snapshots.
struct OrchestratorState {
    is_running: bool,
    is_paused: bool,
    queue: Option<Queue>,
    completed_count: u64,
    current_task: Option<CurrentTask>,
    fetch_log: BoundedLog<TaskOutcome>,
    debug_log: BoundedLog<LogEntry>,
}

impl OrchestratorState {
    fn new(queue: Option<Queue>, completed_count: u64) -> Self {
        Self {
            is_running: false,
            is_paused: false,
            queue,
            completed_count,
            current_task: None,
            fetch_log: BoundedLog::new(FETCH_LOG_CAP),
            debug_log: BoundedLog::new(DEBUG_LOG_CAP),
        }
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            is_running: self.is_running,
            is_paused: self.is_paused,
            queue: self.queue.clone(),
            completed_count: self.completed_count,
            fetch_log: self.fetch_log.tail(FETCH_BROADCAST_WINDOW),
            debug_log: self.debug_log.tail(DEBUG_BROADCAST_WINDOW),
            current_task: self.current_task.clone(),
        }
    }

    fn remaining(&self) -> usize {
        self.queue.as_ref().map_or(0, |q| q.tasks.len())
    }
}

/// Orchestrates the crawl: owns the queue and counters, drives the worker
/// loop, and exposes the control surface as plain request/response calls.
///
/// The handle is cheap to clone; all clones share the same state. Mutual
/// exclusion of worker loops rests on the `is_running` flag checked under
/// the state lock: `start` and `resume` refuse while it is set. After a
/// `force_reset` a loop stuck inside the host capability cannot be
/// cancelled; it is merely abandoned and exits at its next checkpoint.
#[derive(Clone)]
pub struct Orchestrator {
    config: FetcherConfig,
    state: Arc<Mutex<OrchestratorState>>,
    store: Arc<dyn StateStore>,
    gateway: Arc<TargetGateway>,
    validator: Arc<StalenessValidator>,
    backend: BackendClient,
    updates: broadcast::Sender<StateSnapshot>,
}

impl Orchestrator {
    /// Build the orchestrator, restoring queue and counter from the store.
    ///
    /// `is_running` is deliberately not restored: reaching this point
    /// means the previous worker loop died mid-task and cannot be trusted
    /// to resume silently.
    pub async fn new(
        config: FetcherConfig,
        store: Arc<dyn StateStore>,
        executor: Arc<dyn PageExecutor>,
        backend: BackendClient,
    ) -> Result<Self> {
        let queue = store
            .load_queue()
            .await
            .context("Failed to restore queue from store")?;
        let completed_count = store
            .load_completed_count()
            .await
            .context("Failed to restore completed count from store")?;

        if let Some(q) = &queue {
            info!("Restored queue from store: {} tasks pending", q.tasks.len());
        }

        let (updates, _) = broadcast::channel(32);
        let gateway = Arc::new(TargetGateway::new(executor.clone(), config.target.clone()));
        let validator = Arc::new(StalenessValidator::new(executor, config.target.clone()));

        Ok(Self {
            config,
            state: Arc::new(Mutex::new(OrchestratorState::new(queue, completed_count))),
            store,
            gateway,
            validator,
            backend,
            updates,
        })
    }

    /// Subscribe to state snapshots; one is sent after every mutation
    pub fn subscribe(&self) -> broadcast::Receiver<StateSnapshot> {
        self.updates.subscribe()
    }

    /// Current state. Never mutates anything.
    pub async fn snapshot(&self) -> StateSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Fetch a fresh queue from the backend, replacing the current one and
    /// resetting counters and run logs. Refused while a run is active.
    pub async fn load_queue(&self, community_ids: &str) -> Result<Queue, LoadQueueError> {
        {
            let st = self.state.lock().await;
            if st.is_running {
                return Err(LoadQueueError::Running);
            }
        }

        let queue = self.backend.fetch_queue(community_ids).await?;

        {
            let mut st = self.state.lock().await;
            st.queue = Some(queue.clone());
            st.completed_count = 0;
            st.current_task = None;
            st.is_paused = false;
            st.fetch_log.clear();
            st.debug_log.clear();
        }
        self.persist().await;
        self.log_event(
            LogLevel::Info,
            format!("Loaded queue with {} tasks", queue.total_tasks),
            None,
        )
        .await;

        Ok(queue)
    }

    /// Begin a run. Restores the queue from the store when the in-memory
    /// copy is absent, validates the addressing token, then enters the
    /// worker loop. On any refusal the state stays exactly as it was.
    pub async fn start(&self) -> Result<(), StartError> {
        {
            let mut st = self.state.lock().await;
            if st.is_running {
                return Err(StartError::AlreadyRunning);
            }
            if st.queue.is_none() {
                match self.store.load_queue().await {
                    Ok(queue) => st.queue = queue,
                    Err(e) => warn!("Could not restore queue from store: {e:#}"),
                }
            }
            if st.remaining() == 0 {
                return Err(StartError::NoQueue);
            }
        }

        self.log_event(LogLevel::Info, "Validating addressing token", None)
            .await;
        let validation = match self.validator.validate().await {
            Ok(v) => v,
            Err(e) => {
                self.log_event(LogLevel::Error, format!("Token validation failed: {e}"), None)
                    .await;
                return Err(e.into());
            }
        };
        match &validation.warning {
            Some(w) => {
                self.log_event(LogLevel::Warn, format!("Token validation warning: {w}"), None)
                    .await
            }
            None => {
                self.log_event(
                    LogLevel::Success,
                    format!("Addressing token validated: {}", validation.token),
                    None,
                )
                .await
            }
        }

        let pending = {
            let mut st = self.state.lock().await;
            // Re-check: validation ran without the lock held
            if st.is_running {
                return Err(StartError::AlreadyRunning);
            }
            st.is_running = true;
            st.is_paused = false;
            st.fetch_log.clear();
            st.debug_log.clear();
            st.remaining()
        };
        self.log_event(
            LogLevel::Info,
            format!("Starting to process {pending} tasks"),
            None,
        )
        .await;

        let worker = self.clone();
        tokio::spawn(async move { worker.worker_loop().await });

        Ok(())
    }

    /// Request a pause. Observed only between tasks: the in-flight task
    /// finishes, then the loop exits to `Paused` with queue and counter
    /// intact.
    pub async fn stop(&self) {
        let was_running = {
            let mut st = self.state.lock().await;
            if st.is_running {
                st.is_running = false;
                st.is_paused = true;
                true
            } else {
                false
            }
        };

        if was_running {
            self.log_event(
                LogLevel::Info,
                "Stop requested; pausing after the in-flight task",
                None,
            )
            .await;
        } else {
            self.broadcast().await;
        }
    }

    /// Re-enter the worker loop from `Paused` without reloading the queue
    /// or re-validating; validation is once per run.
    pub async fn resume(&self) -> Result<(), StartError> {
        {
            let mut st = self.state.lock().await;
            if st.is_running {
                return Err(StartError::AlreadyRunning);
            }
            if st.remaining() == 0 {
                st.is_paused = false;
                return Err(StartError::NoQueue);
            }
            st.is_running = true;
            st.is_paused = false;
        }
        self.log_event(LogLevel::Info, "Resuming run from paused state", None)
            .await;

        let worker = self.clone();
        tokio::spawn(async move { worker.worker_loop().await });

        Ok(())
    }

    /// Escape hatch for a loop believed hung: clear every flag, keep the
    /// queue. Callable from any state.
    pub async fn force_reset(&self) {
        {
            let mut st = self.state.lock().await;
            st.is_running = false;
            st.is_paused = false;
            st.current_task = None;
        }
        self.persist().await;
        self.log_event(LogLevel::Warn, "Force reset triggered", None)
            .await;
    }

    /// Full contents of the in-memory debug buffer
    pub async fn debug_log(&self) -> Vec<LogEntry> {
        self.state.lock().await.debug_log.entries()
    }

    pub async fn clear_debug_log(&self) {
        self.state.lock().await.debug_log.clear();
        self.broadcast().await;
    }

    /// The persisted fetch log (most recent 100 outcomes across runs)
    pub async fn persisted_fetch_log(&self) -> Result<Vec<TaskOutcome>> {
        self.store.fetch_log().await
    }

    /// Summary of the current run's recorded outcomes
    pub async fn run_summary(&self) -> RunSummary {
        let outcomes = self.state.lock().await.fetch_log.entries();
        RunSummary::from_outcomes(&outcomes)
    }

    async fn worker_loop(self) {
        let mut position = 0usize;

        loop {
            // Checkpoint: pick the head task or leave. `stop` lands here as
            // Paused; a drained queue lands as Idle.
            let (task, current) = {
                let mut st = self.state.lock().await;
                if !st.is_running {
                    st.current_task = None;
                    break;
                }
                let head = st.queue.as_ref().and_then(|q| q.tasks.front().cloned());
                let Some(task) = head else {
                    st.is_running = false;
                    st.is_paused = false;
                    st.current_task = None;
                    break;
                };
                position += 1;
                let total = st.queue.as_ref().map_or(0, |q| q.total_tasks);
                let current = CurrentTask {
                    task: task.clone(),
                    index: position,
                    total,
                    started_at: Utc::now(),
                };
                st.current_task = Some(current.clone());
                (task, current)
            };

            self.log_event(
                LogLevel::Info,
                format!(
                    "[{}/{}] Starting {} task for {}",
                    current.index,
                    current.total,
                    task.task_type.label(),
                    task.community_id
                ),
                Some(json!({
                    "communityId": task.community_id,
                    "entityId": task.entity_id,
                    "page": task.page,
                })),
            )
            .await;

            let started = Instant::now();
            let report = self.gateway.execute(&task).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let trace = serde_json::to_value(&report.trace).ok();
            match report.status {
                OutcomeStatus::Success => {
                    self.log_event(LogLevel::Info, "Task execution completed", trace)
                        .await
                }
                OutcomeStatus::Skipped => {
                    self.log_event(LogLevel::Warn, "Task skipped: unknown type", trace)
                        .await
                }
                OutcomeStatus::Error => {
                    let message = report
                        .error
                        .as_ref()
                        .map(|e| format!("Task failed: {e}"))
                        .unwrap_or_else(|| "Task failed".to_string());
                    self.log_event(LogLevel::Error, message, trace).await
                }
            }

            // Push the result out before touching the queue; a sync failure
            // is logged and must never stall progress
            if report.status == OutcomeStatus::Success {
                match self.backend.sync(&report, &task).await {
                    Ok(()) => {
                        self.log_event(LogLevel::Success, "Result synced to backend", None)
                            .await
                    }
                    Err(e) => {
                        self.log_event(LogLevel::Error, format!("Sync failed: {e}"), None)
                            .await
                    }
                }
            }

            let outcome = TaskOutcome {
                task: task.clone(),
                status: report.status,
                error: report.error.as_ref().map(|e| e.to_string()),
                url: report.url.clone(),
                timestamp: Utc::now(),
                duration_ms,
            };

            // The only place the queue shrinks: pop the head, count
            // successes, record the outcome
            let remaining = {
                let mut st = self.state.lock().await;
                if let Some(queue) = st.queue.as_mut() {
                    queue.tasks.pop_front();
                }
                if outcome.status == OutcomeStatus::Success {
                    st.completed_count += 1;
                }
                st.fetch_log.push(outcome.clone());
                st.current_task = None;
                st.remaining()
            };

            self.persist().await;
            if let Err(e) = self.store.append_outcome(&outcome).await {
                error!("Failed to persist outcome: {e:#}");
            }

            self.log_event(
                LogLevel::Info,
                format!("Task finished in {duration_ms}ms, {remaining} remaining"),
                None,
            )
            .await;

            if remaining == 0 {
                continue;
            }
            if !self.state.lock().await.is_running {
                continue;
            }

            // Randomized inter-task delay to avoid hammering the target;
            // errors get a short fixed backoff instead
            let delay_ms = match outcome.status {
                OutcomeStatus::Error => self.config.worker.error_backoff_ms,
                _ => rand::thread_rng()
                    .gen_range(self.config.worker.delay_min_ms..=self.config.worker.delay_max_ms),
            };
            debug!("Waiting {delay_ms}ms before next task");
            sleep(Duration::from_millis(delay_ms)).await;
        }

        let (summary, paused) = {
            let st = self.state.lock().await;
            (
                RunSummary::from_outcomes(&st.fetch_log.entries()),
                st.is_paused,
            )
        };
        self.persist().await;

        if paused {
            self.log_event(
                LogLevel::Info,
                format!(
                    "Run paused: {} succeeded, {} failed so far",
                    summary.succeeded, summary.failed
                ),
                None,
            )
            .await;
        } else {
            self.log_event(
                LogLevel::Success,
                format!(
                    "Run complete: {} succeeded, {} failed, {} skipped, avg {}ms per task",
                    summary.succeeded, summary.failed, summary.skipped, summary.avg_duration_ms
                ),
                serde_json::to_value(&summary).ok(),
            )
            .await;
        }
    }

    /// Flush queue and counter to the durable store; failures are logged,
    /// not propagated, so a flaky store cannot kill a run
    async fn persist(&self) {
        let (queue, count) = {
            let st = self.state.lock().await;
            (st.queue.clone(), st.completed_count)
        };

        if let Some(queue) = &queue {
            if let Err(e) = self.store.save_queue(queue).await {
                error!("Failed to persist queue: {e:#}");
            }
        }
        if let Err(e) = self.store.save_completed_count(count).await {
            error!("Failed to persist completed count: {e:#}");
        }
    }

    /// Record a structured event in the debug buffer, mirror it to tracing,
    /// and broadcast the updated state
    async fn log_event(&self, level: LogLevel, message: impl Into<String>, details: Option<Value>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
            LogLevel::Success => info!("{message}"),
        }
        if let Some(details) = &details {
            debug!("details: {details}");
        }

        let snapshot = {
            let mut st = self.state.lock().await;
            st.debug_log.push(LogEntry {
                timestamp: Utc::now(),
                level,
                message,
                details,
            });
            st.snapshot()
        };
        // No observer attached is fine
        let _ = self.updates.send(snapshot);
    }

    async fn broadcast(&self) {
        let snapshot = self.state.lock().await.snapshot();
        let _ = self.updates.send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::gateway::tests::FakePage;
    use crate::storage::state::MemoryStateStore;
    use crate::worker::error::ValidationError;
    use crate::worker::task::{FetchTask, TaskType};
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::Semaphore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(backend_url: &str) -> FetcherConfig {
        let mut config = FetcherConfig::default();
        config.backend.base_url = backend_url.to_string();
        config.worker.delay_min_ms = 0;
        config.worker.delay_max_ms = 0;
        config.worker.error_backoff_ms = 0;
        config
    }

    fn task(id: &str, task_type: TaskType) -> FetchTask {
        FetchTask {
            id: id.to_string(),
            task_type,
            priority: 1,
            community_id: "rusty-nook".to_string(),
            entity_id: None,
            page: None,
            params: None,
            reason: String::new(),
            last_fetched_at: None,
        }
    }

    fn queue_of(tasks: Vec<FetchTask>) -> Queue {
        Queue {
            total_tasks: tasks.len() as u32,
            tasks: VecDeque::from(tasks),
            generated_at: Utc::now(),
        }
    }

    async fn orchestrator(
        page: FakePage,
        store: Arc<MemoryStateStore>,
        backend_url: &str,
    ) -> Orchestrator {
        let config = test_config(backend_url);
        let backend = BackendClient::new(&config.backend).unwrap();
        Orchestrator::new(config, store, Arc::new(page), backend)
            .await
            .unwrap()
    }

    async fn wait_until_stopped(orch: &Orchestrator) -> StateSnapshot {
        for _ in 0..500 {
            let snap = orch.snapshot().await;
            if !snap.is_running {
                return snap;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("worker loop did not stop in time");
    }

    async fn mount_sync_ok(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn start_with_no_queue_is_refused() {
        let server = MockServer::start().await;
        let orch = orchestrator(
            FakePage::new(Some("B1")),
            Arc::new(MemoryStateStore::new()),
            &server.uri(),
        )
        .await;

        let err = orch.start().await.unwrap_err();
        assert!(matches!(err, StartError::NoQueue));
        assert!(!orch.snapshot().await.is_running);
    }

    #[tokio::test]
    async fn start_with_empty_queue_is_refused() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStateStore::new());
        store.save_queue(&queue_of(vec![])).await.unwrap();
        let orch = orchestrator(FakePage::new(Some("B1")), store, &server.uri()).await;

        let err = orch.start().await.unwrap_err();
        assert!(matches!(err, StartError::NoQueue));
        assert!(!orch.snapshot().await.is_running);
    }

    #[tokio::test]
    async fn start_while_running_is_refused_without_touching_current_task() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStateStore::new());
        store
            .save_queue(&queue_of(vec![task("t1", TaskType::AboutPage)]))
            .await
            .unwrap();
        let orch = orchestrator(FakePage::new(Some("B1")), store, &server.uri()).await;

        orch.state.lock().await.is_running = true;

        let err = orch.start().await.unwrap_err();
        assert!(matches!(err, StartError::AlreadyRunning));
        assert!(orch.snapshot().await.current_task.is_none());
    }

    #[tokio::test]
    async fn validation_failure_keeps_the_run_idle() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStateStore::new());
        store
            .save_queue(&queue_of(vec![task("t1", TaskType::AboutPage)]))
            .await
            .unwrap();
        let orch = orchestrator(FakePage::new(None), store, &server.uri()).await;

        let err = orch.start().await.unwrap_err();
        assert!(matches!(
            err,
            StartError::Validation(ValidationError::NoToken)
        ));

        let snap = orch.snapshot().await;
        assert!(!snap.is_running);
        assert_eq!(snap.queue.unwrap().tasks.len(), 1);
    }

    #[tokio::test]
    async fn full_run_drains_the_queue_and_counts_successes() {
        let server = MockServer::start().await;
        mount_sync_ok(&server).await;

        let store = Arc::new(MemoryStateStore::new());
        store
            .save_queue(&queue_of(vec![
                task("t1", TaskType::AboutPage),
                task("t2", TaskType::CommunityPage),
            ]))
            .await
            .unwrap();

        let orch = orchestrator(FakePage::new(Some("B1")), store.clone(), &server.uri()).await;
        orch.start().await.unwrap();

        let snap = wait_until_stopped(&orch).await;
        assert!(!snap.is_running);
        assert!(!snap.is_paused);
        assert_eq!(snap.completed_count, 2);
        assert!(snap.queue.unwrap().tasks.is_empty());
        assert!(snap.current_task.is_none());

        // durable store reflects the finished run
        assert_eq!(store.load_completed_count().await.unwrap(), 2);
        assert!(store.load_queue().await.unwrap().unwrap().tasks.is_empty());
        assert_eq!(store.fetch_log().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn per_task_errors_are_recorded_and_the_run_continues() {
        let server = MockServer::start().await;
        mount_sync_ok(&server).await;

        let page = FakePage::new(Some("B1"));
        // validation probe succeeds, first task 500s, second task succeeds
        page.queue_fetch(json!({ "ok": true, "status": 200, "body": "{}" }));
        page.queue_fetch(json!({ "ok": false, "status": 500, "body": "boom" }));
        page.queue_fetch(json!({ "ok": true, "status": 200, "body": "{}" }));

        let store = Arc::new(MemoryStateStore::new());
        store
            .save_queue(&queue_of(vec![
                task("t1", TaskType::AboutPage),
                task("t2", TaskType::AboutPage),
            ]))
            .await
            .unwrap();

        let orch = orchestrator(page, store, &server.uri()).await;
        orch.start().await.unwrap();

        let snap = wait_until_stopped(&orch).await;
        assert_eq!(snap.completed_count, 1);
        assert!(snap.queue.unwrap().tasks.is_empty());

        let statuses: Vec<_> = snap.fetch_log.iter().map(|o| o.status).collect();
        assert_eq!(statuses, vec![OutcomeStatus::Error, OutcomeStatus::Success]);
        let failed = &snap.fetch_log[0];
        assert!(failed.error.as_ref().unwrap().contains("HTTP 500"));
        assert!(failed.url.is_some());
    }

    #[tokio::test]
    async fn unknown_task_type_is_skipped_not_counted() {
        let server = MockServer::start().await;
        mount_sync_ok(&server).await;

        let store = Arc::new(MemoryStateStore::new());
        store
            .save_queue(&queue_of(vec![
                task("t1", TaskType::Unknown),
                task("t2", TaskType::AboutPage),
            ]))
            .await
            .unwrap();

        let orch = orchestrator(FakePage::new(Some("B1")), store, &server.uri()).await;
        orch.start().await.unwrap();

        let snap = wait_until_stopped(&orch).await;
        assert_eq!(snap.completed_count, 1);
        assert_eq!(snap.fetch_log[0].status, OutcomeStatus::Skipped);
    }

    #[tokio::test]
    async fn stop_pauses_between_tasks_and_resume_finishes_the_run() {
        let server = MockServer::start().await;
        mount_sync_ok(&server).await;

        let gate = Arc::new(Semaphore::new(1)); // one permit for the validation probe
        let mut page = FakePage::new(Some("B1"));
        page.gate = Some(gate.clone());

        let store = Arc::new(MemoryStateStore::new());
        store
            .save_queue(&queue_of(vec![
                task("t1", TaskType::AboutPage),
                task("t2", TaskType::AboutPage),
            ]))
            .await
            .unwrap();

        let orch = orchestrator(page, store, &server.uri()).await;
        orch.start().await.unwrap();

        // wait until the first task is blocked inside its fetch, then
        // request the pause and let the task finish
        for _ in 0..500 {
            if orch.snapshot().await.current_task.is_some() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        orch.stop().await;
        gate.add_permits(1);

        let mut snap = orch.snapshot().await;
        for _ in 0..500 {
            snap = orch.snapshot().await;
            if snap.current_task.is_none() && snap.queue.as_ref().unwrap().tasks.len() == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(snap.is_paused);
        assert!(!snap.is_running);
        assert_eq!(snap.completed_count, 1);

        gate.add_permits(8);
        orch.resume().await.unwrap();

        let snap = wait_until_stopped(&orch).await;
        assert!(!snap.is_paused);
        assert_eq!(snap.completed_count, 2);
        assert!(snap.queue.unwrap().tasks.is_empty());
    }

    #[tokio::test]
    async fn force_reset_abandons_pause_without_clearing_the_queue() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStateStore::new());
        store
            .save_queue(&queue_of(vec![task("t1", TaskType::AboutPage)]))
            .await
            .unwrap();
        let orch = orchestrator(FakePage::new(Some("B1")), store, &server.uri()).await;

        {
            let mut st = orch.state.lock().await;
            st.is_paused = true;
        }
        orch.force_reset().await;

        let snap = orch.snapshot().await;
        assert!(!snap.is_running);
        assert!(!snap.is_paused);
        assert_eq!(snap.queue.unwrap().tasks.len(), 1);
    }

    #[tokio::test]
    async fn restart_restores_queue_and_counter_but_never_running_flags() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStateStore::new());
        store
            .save_queue(&queue_of(vec![
                task("t1", TaskType::AboutPage),
                task("t2", TaskType::Members),
                task("t3", TaskType::CommunityPage),
            ]))
            .await
            .unwrap();
        store.save_completed_count(5).await.unwrap();

        // a restart is just a fresh orchestrator over the same store
        let orch = orchestrator(FakePage::new(Some("B1")), store, &server.uri()).await;

        let snap = orch.snapshot().await;
        assert!(!snap.is_running);
        assert!(!snap.is_paused);
        assert_eq!(snap.completed_count, 5);
        assert_eq!(snap.queue.unwrap().tasks.len(), 3);
    }

    #[tokio::test]
    async fn snapshot_is_idempotent() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStateStore::new());
        store
            .save_queue(&queue_of(vec![task("t1", TaskType::AboutPage)]))
            .await
            .unwrap();
        let orch = orchestrator(FakePage::new(Some("B1")), store, &server.uri()).await;

        let first = orch.snapshot().await;
        let second = orch.snapshot().await;
        assert_eq!(first.is_running, second.is_running);
        assert_eq!(first.completed_count, second.completed_count);
        assert_eq!(
            first.queue.as_ref().unwrap().tasks.len(),
            second.queue.as_ref().unwrap().tasks.len()
        );
        assert_eq!(first.debug_log.len(), second.debug_log.len());
    }

    #[tokio::test]
    async fn load_queue_resets_counters_and_is_refused_mid_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/fetch-queue"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"tasks":[{"id":"n1","type":"members","priority":1,"communityId":"c9","page":1,"reason":"r"}],"generatedAt":"2026-02-01T10:00:00Z","totalTasks":1}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStateStore::new());
        store.save_completed_count(9).await.unwrap();
        let orch = orchestrator(FakePage::new(Some("B1")), store.clone(), &server.uri()).await;

        let queue = orch.load_queue("c9").await.unwrap();
        assert_eq!(queue.total_tasks, 1);

        let snap = orch.snapshot().await;
        assert_eq!(snap.completed_count, 0);
        assert_eq!(snap.queue.unwrap().tasks[0].community_id, "c9");
        assert_eq!(store.load_completed_count().await.unwrap(), 0);

        orch.state.lock().await.is_running = true;
        let err = orch.load_queue("c9").await.unwrap_err();
        assert!(matches!(err, LoadQueueError::Running));
    }

    #[tokio::test]
    async fn clear_debug_log_empties_the_buffer() {
        let server = MockServer::start().await;
        let orch = orchestrator(
            FakePage::new(Some("B1")),
            Arc::new(MemoryStateStore::new()),
            &server.uri(),
        )
        .await;

        orch.log_event(LogLevel::Info, "hello", None).await;
        assert_eq!(orch.debug_log().await.len(), 1);

        orch.clear_debug_log().await;
        assert!(orch.debug_log().await.is_empty());
    }
}

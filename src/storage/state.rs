use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, Client};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cli::config::StorageSettings;
use crate::utils::audit::FETCH_LOG_CAP;
use crate::worker::task::{Queue, TaskOutcome};

const QUEUE_KEY: &str = "fetcher:currentQueue";
const COMPLETED_KEY: &str = "fetcher:completedCount";
const FETCH_LOG_KEY: &str = "fetcher:fetchLog";

/// Durable key/value store backing the worker across process restarts.
///
/// The store is the single source of truth; in-memory state is a cache
/// that gets flushed here after every mutation affecting resumability.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_queue(&self) -> Result<Option<Queue>>;
    async fn save_queue(&self, queue: &Queue) -> Result<()>;
    async fn load_completed_count(&self) -> Result<u64>;
    async fn save_completed_count(&self, count: u64) -> Result<()>;
    /// Append one outcome to the persisted fetch log, keeping only the
    /// most recent `FETCH_LOG_CAP` entries
    async fn append_outcome(&self, outcome: &TaskOutcome) -> Result<()>;
    async fn fetch_log(&self) -> Result<Vec<TaskOutcome>>;
}

/// Redis-backed production store
pub struct RedisStateStore {
    conn: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisStateStore {
    pub async fn connect(settings: &StorageSettings) -> Result<Self> {
        let client = Client::open(settings.redis_url.clone())
            .context(format!("Failed to connect to Redis at {}", settings.redis_url))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to get Redis connection")?;

        debug!("Connected to Redis at {}", settings.redis_url);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn load_queue(&self) -> Result<Option<Queue>> {
        let mut conn = self.conn.lock().await;

        let raw: Option<String> = redis::cmd("GET")
            .arg(QUEUE_KEY)
            .query_async(&mut *conn)
            .await
            .context("Failed to read queue from Redis")?;

        match raw {
            Some(json) => {
                let queue: Queue =
                    serde_json::from_str(&json).context("Failed to deserialize stored queue")?;
                Ok(Some(queue))
            }
            None => Ok(None),
        }
    }

    async fn save_queue(&self, queue: &Queue) -> Result<()> {
        let json = serde_json::to_string(queue).context("Failed to serialize queue")?;

        let mut conn = self.conn.lock().await;
        redis::cmd("SET")
            .arg(QUEUE_KEY)
            .arg(json)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to persist queue to Redis")?;

        Ok(())
    }

    async fn load_completed_count(&self) -> Result<u64> {
        let mut conn = self.conn.lock().await;

        let count: Option<u64> = redis::cmd("GET")
            .arg(COMPLETED_KEY)
            .query_async(&mut *conn)
            .await
            .context("Failed to read completed count from Redis")?;

        Ok(count.unwrap_or(0))
    }

    async fn save_completed_count(&self, count: u64) -> Result<()> {
        let mut conn = self.conn.lock().await;
        redis::cmd("SET")
            .arg(COMPLETED_KEY)
            .arg(count)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to persist completed count to Redis")?;

        Ok(())
    }

    async fn append_outcome(&self, outcome: &TaskOutcome) -> Result<()> {
        let json = serde_json::to_string(outcome).context("Failed to serialize outcome")?;

        let mut conn = self.conn.lock().await;
        redis::cmd("RPUSH")
            .arg(FETCH_LOG_KEY)
            .arg(json)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to append outcome to Redis")?;

        // Trim from the front so only the newest entries survive
        redis::cmd("LTRIM")
            .arg(FETCH_LOG_KEY)
            .arg(-(FETCH_LOG_CAP as i64))
            .arg(-1)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to trim persisted fetch log")?;

        Ok(())
    }

    async fn fetch_log(&self) -> Result<Vec<TaskOutcome>> {
        let mut conn = self.conn.lock().await;

        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(FETCH_LOG_KEY)
            .arg(0)
            .arg(-1)
            .query_async(&mut *conn)
            .await
            .context("Failed to read fetch log from Redis")?;

        let mut outcomes = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<TaskOutcome>(&entry) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("Skipping unreadable fetch log entry: {}", e),
            }
        }

        Ok(outcomes)
    }
}

#[derive(Default)]
struct MemoryState {
    queue: Option<Queue>,
    completed_count: u64,
    fetch_log: Vec<TaskOutcome>,
}

/// In-process store with the same contract as Redis; gone when the
/// process exits. Used by the test suite.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<MemoryState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_queue(&self) -> Result<Option<Queue>> {
        Ok(self.inner.lock().await.queue.clone())
    }

    async fn save_queue(&self, queue: &Queue) -> Result<()> {
        self.inner.lock().await.queue = Some(queue.clone());
        Ok(())
    }

    async fn load_completed_count(&self) -> Result<u64> {
        Ok(self.inner.lock().await.completed_count)
    }

    async fn save_completed_count(&self, count: u64) -> Result<()> {
        self.inner.lock().await.completed_count = count;
        Ok(())
    }

    async fn append_outcome(&self, outcome: &TaskOutcome) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.fetch_log.push(outcome.clone());
        let len = state.fetch_log.len();
        if len > FETCH_LOG_CAP {
            state.fetch_log.drain(..len - FETCH_LOG_CAP);
        }
        Ok(())
    }

    async fn fetch_log(&self) -> Result<Vec<TaskOutcome>> {
        Ok(self.inner.lock().await.fetch_log.clone())
    }
}

//! In-process task broker.
//!
//! Provides named queues with bounded worker concurrency, retry with
//! exponential backoff, soft and hard time limits, cooperative
//! cancellation, result persistence with TTL, and the `group` /
//! `chain` / `chord` composition primitives. Tasks are acknowledged
//! late: a record leaves `running` only when its handler returns.
//!
//! The broker is process-wide; workers scale horizontally by running
//! more processes against the same state store and index.

mod record;

pub use record::{TaskOptions, TaskRecord, TaskState};

use futures_util::future::BoxFuture;
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::error::{Error, Result, TaskError};

/// Well-known queue names.
pub mod queues {
    /// General-purpose queue.
    pub const DEFAULT: &str = "default";
    /// Whole-document ingest tasks.
    pub const DOCUMENT_PROCESSING: &str = "document_processing";
    /// Document splitting tasks.
    pub const DOCUMENT_SPLITTING: &str = "document_splitting";
    /// Per-segment tasks.
    pub const DOCUMENT_SEGMENT: &str = "document_segment";
    /// Join/merge tasks dependent on segment groups.
    pub const DOCUMENT_MERGING: &str = "document_merging";
    /// Index maintenance tasks.
    pub const INDEX: &str = "index";
    /// Latency-sensitive tasks.
    pub const PRIORITY: &str = "priority";
}

/// Base backoff delay for task retries.
const RETRY_BACKOFF_BASE_MS: u64 = 200;

/// Upper bound on a single retry backoff sleep.
const RETRY_BACKOFF_CAP_MS: u64 = 30_000;

/// Cooperative cancellation flag shared between the broker and a
/// running handler.
#[derive(Debug, Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raises [`TaskError::Canceled`] when cancellation was requested.
    pub fn check(&self) -> std::result::Result<(), TaskError> {
        if self.is_canceled() {
            Err(TaskError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Context handed to every task handler attempt.
///
/// Handlers check it before each I/O call and between chunks so
/// cancellation and soft timeouts take effect promptly.
#[derive(Clone)]
pub struct TaskContext {
    /// Task id of this execution.
    pub task_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    cancel: Arc<CancelFlag>,
    soft_deadline: Instant,
    soft_limit_secs: u64,
}

impl TaskContext {
    /// Returns the shared cancellation flag.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<CancelFlag> {
        Arc::clone(&self.cancel)
    }

    /// Raises [`TaskError::Canceled`] when cancellation was requested.
    pub fn check_canceled(&self) -> std::result::Result<(), TaskError> {
        self.cancel.check()
    }

    /// Raises [`TaskError::SoftTimeout`] past the soft deadline.
    pub fn check_soft_timeout(&self) -> std::result::Result<(), TaskError> {
        if Instant::now() >= self.soft_deadline {
            Err(TaskError::SoftTimeout {
                limit_secs: self.soft_limit_secs,
            })
        } else {
            Ok(())
        }
    }

    /// Checks cancellation and the soft deadline in one call.
    pub fn checkpoint(&self) -> std::result::Result<(), TaskError> {
        self.check_canceled()?;
        self.check_soft_timeout()
    }
}

/// Aggregate outcome of a task group.
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    /// Terminal records of every group member, submit order.
    pub records: Vec<TaskRecord>,
}

impl GroupOutcome {
    /// Number of members that succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(TaskState::Succeeded)
    }

    /// Number of members that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(TaskState::Failed)
    }

    /// Number of members that were canceled.
    #[must_use]
    pub fn canceled(&self) -> usize {
        self.count(TaskState::Canceled)
    }

    /// Returns whether every member succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.records
            .iter()
            .all(|r| r.state == TaskState::Succeeded)
    }

    fn count(&self, state: TaskState) -> usize {
        self.records.iter().filter(|r| r.state == state).count()
    }
}

/// Boxed handler used by [`TaskBroker::chain`].
pub type ChainStep = Arc<
    dyn Fn(TaskContext) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync + 'static,
>;

struct TaskEntry {
    record: TaskRecord,
    cancel: Arc<CancelFlag>,
    state_tx: watch::Sender<TaskState>,
}

struct StoredResult {
    value: serde_json::Value,
    stored_at: Instant,
}

struct BrokerInner {
    config: BrokerConfig,
    tasks: RwLock<HashMap<String, TaskEntry>>,
    results: Mutex<HashMap<String, StoredResult>>,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// In-process task broker.
///
/// Cloning is cheap; all clones share the same queues and records.
#[derive(Clone)]
pub struct TaskBroker {
    inner: Arc<BrokerInner>,
}

impl TaskBroker {
    /// Creates a broker with the given configuration.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                config,
                tasks: RwLock::new(HashMap::new()),
                results: Mutex::new(HashMap::new()),
                semaphores: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Default task options derived from the broker configuration.
    #[must_use]
    pub fn default_options(&self) -> TaskOptions {
        TaskOptions {
            max_retries: self.inner.config.max_retries,
            soft_time_limit: self.inner.config.task_soft_time_limit,
            hard_time_limit: self.inner.config.task_time_limit,
        }
    }

    /// Submits a task onto a named queue and returns its id.
    ///
    /// The handler is invoked once per attempt with a fresh
    /// [`TaskContext`]; transient failures are retried with backoff up
    /// to `opts.max_retries`.
    pub fn submit<F, Fut, T>(
        &self,
        name: &str,
        queue: &str,
        opts: TaskOptions,
        handler: F,
    ) -> String
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let task_id = uuid::Uuid::new_v4().to_string();
        let cancel = Arc::new(CancelFlag::default());
        let (state_tx, _) = watch::channel(TaskState::Queued);

        if let Ok(mut tasks) = self.inner.tasks.write() {
            tasks.insert(
                task_id.clone(),
                TaskEntry {
                    record: TaskRecord::new(task_id.clone(), name, queue),
                    cancel: Arc::clone(&cancel),
                    state_tx,
                },
            );
        }

        debug!(task_id = %task_id, name, queue, "task submitted");

        let inner = Arc::clone(&self.inner);
        let queue = queue.to_string();
        let id = task_id.clone();
        tokio::spawn(async move {
            run_task(inner, id, queue, opts, handler, cancel).await;
        });

        task_id
    }

    /// Returns the current record of a task.
    pub fn status(&self, task_id: &str) -> std::result::Result<TaskRecord, TaskError> {
        self.inner
            .tasks
            .read()
            .ok()
            .and_then(|tasks| tasks.get(task_id).map(|e| e.record.clone()))
            .ok_or_else(|| TaskError::NotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Requests cancellation of a task.
    ///
    /// Queued and retrying tasks are canceled immediately; running
    /// tasks move to `canceling` and the worker observes the flag
    /// cooperatively. Terminal tasks are left untouched.
    pub fn cancel(&self, task_id: &str) -> std::result::Result<TaskState, TaskError> {
        let mut tasks = self.inner.tasks.write().map_err(|_| TaskError::Transient {
            reason: "task table lock poisoned".to_string(),
        })?;
        let entry = tasks.get_mut(task_id).ok_or_else(|| TaskError::NotFound {
            task_id: task_id.to_string(),
        })?;

        entry.cancel.cancel();
        let next = match entry.record.state {
            TaskState::Queued | TaskState::Retrying => TaskState::Canceled,
            TaskState::Running => TaskState::Canceling,
            terminal => return Ok(terminal),
        };
        apply_transition(entry, next, Some("cancellation requested".to_string()));
        Ok(entry.record.state)
    }

    /// Waits until a task reaches a terminal state and returns its
    /// record.
    pub async fn wait(&self, task_id: &str) -> std::result::Result<TaskRecord, TaskError> {
        let mut rx = {
            let tasks = self.inner.tasks.read().map_err(|_| TaskError::Transient {
                reason: "task table lock poisoned".to_string(),
            })?;
            let entry = tasks.get(task_id).ok_or_else(|| TaskError::NotFound {
                task_id: task_id.to_string(),
            })?;
            entry.state_tx.subscribe()
        };

        loop {
            let record = self.status(task_id)?;
            if record.state.is_terminal() {
                return Ok(record);
            }
            if rx.changed().await.is_err() {
                // Sender dropped; return the last observed record
                return self.status(task_id);
            }
        }
    }

    /// Waits for a group of tasks and returns the aggregate outcome.
    pub async fn group(&self, task_ids: &[String]) -> std::result::Result<GroupOutcome, TaskError> {
        let mut records = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            records.push(self.wait(task_id).await?);
        }
        Ok(GroupOutcome { records })
    }

    /// Submits a body task that runs after every group member
    /// succeeded, failing without running the body otherwise.
    pub fn chord<F, Fut, T>(
        &self,
        group_ids: Vec<String>,
        name: &str,
        queue: &str,
        opts: TaskOptions,
        body: F,
    ) -> String
    where
        F: Fn(TaskContext, GroupOutcome) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let broker = self.clone();
        let group_ids = Arc::new(group_ids);
        let body = Arc::new(body);

        self.submit(name, queue, opts, move |ctx| {
            let broker = broker.clone();
            let group_ids = Arc::clone(&group_ids);
            let body = Arc::clone(&body);
            async move {
                let outcome = broker.group(&group_ids).await.map_err(Error::from)?;
                if outcome.all_succeeded() {
                    (body.as_ref())(ctx, outcome).await
                } else {
                    Err(TaskError::Failed {
                        message: format!(
                            "group incomplete: {} succeeded, {} failed, {} canceled of {}",
                            outcome.succeeded(),
                            outcome.failed(),
                            outcome.canceled(),
                            outcome.records.len()
                        ),
                    }
                    .into())
                }
            }
        })
    }

    /// Submits a task that runs the steps sequentially, stopping at the
    /// first failure. The stored result is the last step's value.
    pub fn chain(&self, name: &str, queue: &str, opts: TaskOptions, steps: Vec<ChainStep>) -> String {
        self.submit(name, queue, opts, move |ctx| {
            let steps = steps.clone();
            async move {
                let mut last = serde_json::Value::Null;
                for step in &steps {
                    ctx.checkpoint().map_err(Error::from)?;
                    last = (step.as_ref())(ctx.clone()).await?;
                }
                Ok(last)
            }
        })
    }

    /// Fetches and deserializes a stored task result.
    ///
    /// Results expire after the configured TTL.
    pub fn result<T: DeserializeOwned>(
        &self,
        task_id: &str,
    ) -> std::result::Result<T, TaskError> {
        let ttl = Duration::from_secs(self.inner.config.result_ttl_secs);
        let mut results = self.inner.results.lock().map_err(|_| TaskError::Transient {
            reason: "result store lock poisoned".to_string(),
        })?;

        match results.get(task_id) {
            Some(stored) if stored.stored_at.elapsed() <= ttl => {
                serde_json::from_value(stored.value.clone()).map_err(|e| TaskError::Failed {
                    message: format!("result deserialization: {e}"),
                })
            }
            Some(_) => {
                results.remove(task_id);
                Err(TaskError::ResultUnavailable {
                    task_id: task_id.to_string(),
                })
            }
            None => Err(TaskError::ResultUnavailable {
                task_id: task_id.to_string(),
            }),
        }
    }

    /// Waits for every known task to reach a terminal state.
    ///
    /// Used at shutdown to drain the queues.
    pub async fn drain(&self) {
        let ids: Vec<String> = self
            .inner
            .tasks
            .read()
            .map(|tasks| tasks.keys().cloned().collect())
            .unwrap_or_default();
        for id in ids {
            let _ = self.wait(&id).await;
        }
    }
}

impl BrokerInner {
    fn semaphore(&self, queue: &str) -> Arc<Semaphore> {
        let mut semaphores = match self.semaphores.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            semaphores
                .entry(queue.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.config.worker_count.max(1)))),
        )
    }

    /// Applies a legal transition; returns whether it took effect.
    fn transition(&self, task_id: &str, next: TaskState, error: Option<String>) -> bool {
        self.tasks.write().ok().is_some_and(|mut tasks| {
            tasks
                .get_mut(task_id)
                .is_some_and(|entry| apply_transition(entry, next, error))
        })
    }

    /// Marks a task running for a new attempt; returns false when the
    /// task was canceled meanwhile.
    fn mark_running(&self, task_id: &str, attempt: u32) -> bool {
        self.tasks.write().ok().is_some_and(|mut tasks| {
            tasks.get_mut(task_id).is_some_and(|entry| {
                if !apply_transition(entry, TaskState::Running, None) {
                    return false;
                }
                entry.record.attempts = attempt;
                if entry.record.started_at.is_none() {
                    entry.record.started_at = Some(chrono::Utc::now().timestamp());
                }
                true
            })
        })
    }

    /// Applies a terminal transition; a task already moved to
    /// `canceling` by a racing cancel settles as `canceled` instead.
    fn finish(&self, task_id: &str, state: TaskState, error: Option<String>) {
        if !self.transition(task_id, state, error.clone()) {
            self.transition(task_id, TaskState::Canceled, error);
        }
    }

    fn store_result(&self, task_id: &str, value: serde_json::Value) {
        if let Ok(mut results) = self.results.lock() {
            let ttl = Duration::from_secs(self.config.result_ttl_secs);
            results.retain(|_, stored| stored.stored_at.elapsed() <= ttl);
            results.insert(
                task_id.to_string(),
                StoredResult {
                    value,
                    stored_at: Instant::now(),
                },
            );
        }
        if let Ok(mut tasks) = self.tasks.write()
            && let Some(entry) = tasks.get_mut(task_id)
        {
            entry.record.result_ref = Some(task_id.to_string());
        }
    }
}

/// Stamps a transition onto an entry when legal.
fn apply_transition(entry: &mut TaskEntry, next: TaskState, error: Option<String>) -> bool {
    if !entry.record.state.can_transition(next) {
        return false;
    }
    entry.record.state = next;
    if next.is_terminal() {
        entry.record.finished_at = Some(chrono::Utc::now().timestamp());
    }
    if let Some(error) = error {
        entry.record.error = Some(error);
    }
    let _ = entry.state_tx.send(next);
    true
}

#[allow(clippy::too_many_lines)]
async fn run_task<F, Fut, T>(
    inner: Arc<BrokerInner>,
    task_id: String,
    queue: String,
    opts: TaskOptions,
    handler: F,
    cancel: Arc<CancelFlag>,
) where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let semaphore = inner.semaphore(&queue);
    let Ok(_permit) = semaphore.acquire_owned().await else {
        inner.transition(
            &task_id,
            TaskState::Failed,
            Some("queue closed".to_string()),
        );
        return;
    };

    if cancel.is_canceled() {
        // Canceled while queued; the cancel call already moved the record
        return;
    }

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if !inner.mark_running(&task_id, attempt) {
            // Canceled between attempts
            return;
        }

        let ctx = TaskContext {
            task_id: task_id.clone(),
            attempt,
            cancel: Arc::clone(&cancel),
            soft_deadline: Instant::now() + Duration::from_secs(opts.soft_time_limit),
            soft_limit_secs: opts.soft_time_limit,
        };

        let outcome = tokio::time::timeout(
            Duration::from_secs(opts.hard_time_limit),
            handler(ctx),
        )
        .await;

        match outcome {
            Err(_) => {
                let error = TaskError::HardTimeout {
                    limit_secs: opts.hard_time_limit,
                };
                warn!(task_id = %task_id, attempt, %error, "task aborted");
                if cancel.is_canceled() {
                    inner.transition(&task_id, TaskState::Canceled, Some(error.to_string()));
                } else {
                    inner.transition(&task_id, TaskState::Failed, Some(error.to_string()));
                }
                return;
            }
            Ok(Ok(value)) => {
                match serde_json::to_value(value) {
                    Ok(json) => {
                        inner.store_result(&task_id, json);
                        inner.finish(&task_id, TaskState::Succeeded, None);
                    }
                    Err(e) => {
                        inner.finish(
                            &task_id,
                            TaskState::Failed,
                            Some(format!("result serialization: {e}")),
                        );
                    }
                }
                return;
            }
            Ok(Err(err)) => {
                if err.is_canceled() || cancel.is_canceled() {
                    // running → canceling → canceled (cancel() may have
                    // already applied the first hop)
                    inner.transition(&task_id, TaskState::Canceling, None);
                    inner.transition(&task_id, TaskState::Canceled, Some(err.to_string()));
                    return;
                }
                if err.is_transient() && attempt <= opts.max_retries {
                    warn!(task_id = %task_id, attempt, error = %err, "task retrying");
                    if !inner.transition(&task_id, TaskState::Retrying, Some(err.to_string())) {
                        // Cancellation raced the retry decision
                        inner.transition(&task_id, TaskState::Canceled, Some(err.to_string()));
                        return;
                    }
                    tokio::time::sleep(retry_backoff(attempt)).await;
                    if cancel.is_canceled() {
                        inner.transition(
                            &task_id,
                            TaskState::Canceled,
                            Some("canceled during backoff".to_string()),
                        );
                        return;
                    }
                    continue;
                }
                inner.finish(&task_id, TaskState::Failed, Some(err.to_string()));
                return;
            }
        }
    }
}

/// Exponential backoff with full jitter for task retries.
fn retry_backoff(attempt: u32) -> Duration {
    let exp = RETRY_BACKOFF_BASE_MS.saturating_mul(1_u64 << attempt.min(16));
    let cap = exp.min(RETRY_BACKOFF_CAP_MS);
    Duration::from_millis(rand::rng().random_range(0..=cap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn test_broker() -> TaskBroker {
        TaskBroker::new(BrokerConfig {
            worker_count: 4,
            max_retries: 2,
            task_soft_time_limit: 5,
            task_time_limit: 10,
            ..Default::default()
        })
    }

    fn fast_opts() -> TaskOptions {
        TaskOptions::default().with_time_limits(5, 10)
    }

    #[tokio::test]
    async fn test_submit_and_wait_success() {
        let broker = test_broker();
        let task_id = broker.submit("add", queues::DEFAULT, fast_opts(), |_ctx| async move {
            Ok(2 + 2)
        });

        let record = broker.wait(&task_id).await.unwrap();
        assert_eq!(record.state, TaskState::Succeeded);
        assert_eq!(record.attempts, 1);
        assert!(record.started_at.is_some());
        assert!(record.finished_at.is_some());

        let result: i32 = broker.result(&task_id).unwrap();
        assert_eq!(result, 4);
    }

    #[tokio::test]
    async fn test_failed_task_records_error() {
        let broker = test_broker();
        let task_id = broker.submit(
            "boom",
            queues::DEFAULT,
            TaskOptions::no_retry().with_time_limits(5, 10),
            |_ctx| async move {
                Err::<(), _>(Error::Config {
                    message: "broken".to_string(),
                })
            },
        );

        let record = broker.wait(&task_id).await.unwrap();
        assert_eq!(record.state, TaskState::Failed);
        assert!(record.error.as_deref().unwrap_or("").contains("broken"));
        assert!(broker.result::<()>(&task_id).is_err());
    }

    #[tokio::test]
    async fn test_transient_error_retried() {
        let broker = test_broker();
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let task_id = broker.submit(
            "flaky",
            queues::DEFAULT,
            TaskOptions::default().with_max_retries(3).with_time_limits(5, 10),
            move |_ctx| {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::Task(TaskError::Transient {
                            reason: "outage".to_string(),
                        }))
                    } else {
                        Ok("done")
                    }
                }
            },
        );

        let record = broker.wait(&task_id).await.unwrap();
        assert_eq!(record.state, TaskState::Succeeded);
        assert_eq!(record.attempts, 3);
    }

    #[tokio::test]
    async fn test_retries_capped() {
        let broker = test_broker();
        let task_id = broker.submit(
            "always-flaky",
            queues::DEFAULT,
            TaskOptions::default().with_max_retries(1).with_time_limits(5, 10),
            |_ctx| async move {
                Err::<(), _>(Error::Task(TaskError::Transient {
                    reason: "outage".to_string(),
                }))
            },
        );

        let record = broker.wait(&task_id).await.unwrap();
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn test_cancel_running_task() {
        let broker = test_broker();
        let task_id = broker.submit(
            "slow",
            queues::DEFAULT,
            fast_opts(),
            |ctx| async move {
                for _ in 0..200 {
                    ctx.check_canceled().map_err(Error::from)?;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Ok(())
            },
        );

        // Let it start, then cancel
        tokio::time::sleep(Duration::from_millis(30)).await;
        let state = broker.cancel(&task_id).unwrap();
        assert!(matches!(state, TaskState::Canceling | TaskState::Canceled));

        let record = broker.wait(&task_id).await.unwrap();
        assert_eq!(record.state, TaskState::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_queued_task() {
        // One worker; first task blocks the queue
        let broker = TaskBroker::new(BrokerConfig {
            worker_count: 1,
            ..Default::default()
        });
        let _blocker = broker.submit("blocker", queues::DEFAULT, fast_opts(), |_ctx| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let queued = broker.submit("queued", queues::DEFAULT, fast_opts(), |_ctx| async {
            Ok(())
        });

        let state = broker.cancel(&queued).unwrap();
        assert_eq!(state, TaskState::Canceled);

        let record = broker.wait(&queued).await.unwrap();
        assert_eq!(record.state, TaskState::Canceled);
        assert_eq!(record.attempts, 0);
    }

    #[tokio::test]
    async fn test_soft_timeout_checkpoint() {
        let broker = test_broker();
        let task_id = broker.submit(
            "soft",
            queues::DEFAULT,
            TaskOptions::no_retry().with_time_limits(0, 10),
            |ctx| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ctx.check_soft_timeout().map_err(Error::from)?;
                Ok(())
            },
        );

        let record = broker.wait(&task_id).await.unwrap();
        assert_eq!(record.state, TaskState::Failed);
        assert!(record.error.as_deref().unwrap_or("").contains("soft time limit"));
    }

    #[tokio::test]
    async fn test_hard_timeout_aborts() {
        let broker = test_broker();
        let task_id = broker.submit(
            "hard",
            queues::DEFAULT,
            TaskOptions::no_retry().with_time_limits(1, 1),
            |_ctx| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            },
        );

        let record = broker.wait(&task_id).await.unwrap();
        assert_eq!(record.state, TaskState::Failed);
        assert!(record.error.as_deref().unwrap_or("").contains("hard time limit"));
    }

    #[tokio::test]
    async fn test_group_outcome() {
        let broker = test_broker();
        let ok1 = broker.submit("ok1", queues::DEFAULT, fast_opts(), |_| async { Ok(1) });
        let ok2 = broker.submit("ok2", queues::DEFAULT, fast_opts(), |_| async { Ok(2) });
        let bad = broker.submit(
            "bad",
            queues::DEFAULT,
            TaskOptions::no_retry().with_time_limits(5, 10),
            |_| async {
                Err::<i32, _>(Error::Config {
                    message: "nope".to_string(),
                })
            },
        );

        let outcome = broker.group(&[ok1, ok2, bad]).await.unwrap();
        assert_eq!(outcome.succeeded(), 2);
        assert_eq!(outcome.failed(), 1);
        assert!(!outcome.all_succeeded());
    }

    #[tokio::test]
    async fn test_chord_runs_body_after_group() {
        let broker = test_broker();
        let g1 = broker.submit("g1", queues::DEFAULT, fast_opts(), |_| async { Ok(10) });
        let g2 = broker.submit("g2", queues::DEFAULT, fast_opts(), |_| async { Ok(20) });

        let body_id = broker.chord(
            vec![g1, g2],
            "merge",
            queues::DOCUMENT_MERGING,
            fast_opts(),
            |_ctx, outcome| async move { Ok(outcome.succeeded()) },
        );

        let record = broker.wait(&body_id).await.unwrap();
        assert_eq!(record.state, TaskState::Succeeded);
        let merged: usize = broker.result(&body_id).unwrap();
        assert_eq!(merged, 2);
    }

    #[tokio::test]
    async fn test_chord_body_skipped_on_group_failure() {
        let broker = test_broker();
        let bad = broker.submit(
            "bad",
            queues::DEFAULT,
            TaskOptions::no_retry().with_time_limits(5, 10),
            |_| async {
                Err::<i32, _>(Error::Config {
                    message: "nope".to_string(),
                })
            },
        );

        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let body_id = broker.chord(
            vec![bad],
            "merge",
            queues::DOCUMENT_MERGING,
            TaskOptions::no_retry().with_time_limits(5, 10),
            move |_ctx, _outcome| {
                let ran = Arc::clone(&ran_clone);
                async move {
                    ran.store(true, Ordering::SeqCst);
                    Ok(())
                }
            },
        );

        let record = broker.wait(&body_id).await.unwrap();
        assert_eq!(record.state, TaskState::Failed);
        assert!(!ran.load(Ordering::SeqCst));
        assert!(record.error.as_deref().unwrap_or("").contains("group incomplete"));
    }

    #[tokio::test]
    async fn test_chain_sequences_steps() {
        let broker = test_broker();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut steps: Vec<ChainStep> = Vec::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            let step = move |_ctx: TaskContext| -> BoxFuture<'static, Result<serde_json::Value>> {
                let order = Arc::clone(&order);
                Box::pin(async move {
                    if let Ok(mut order) = order.lock() {
                        order.push(i);
                    }
                    Ok(serde_json::json!(i))
                })
            };
            steps.push(Arc::new(step));
        }

        let task_id = broker.chain("steps", queues::DEFAULT, fast_opts(), steps);
        let record = broker.wait(&task_id).await.unwrap();
        assert_eq!(record.state, TaskState::Succeeded);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);

        let last: i32 = broker.result(&task_id).unwrap();
        assert_eq!(last, 2);
    }

    #[tokio::test]
    async fn test_queue_concurrency_bounded() {
        let broker = TaskBroker::new(BrokerConfig {
            worker_count: 2,
            ..Default::default()
        });
        let peak = Arc::new(AtomicU32::new(0));
        let current = Arc::new(AtomicU32::new(0));

        let mut ids = Vec::new();
        for i in 0..6 {
            let peak = Arc::clone(&peak);
            let current = Arc::clone(&current);
            ids.push(broker.submit(
                &format!("t{i}"),
                queues::DOCUMENT_SEGMENT,
                fast_opts(),
                move |_ctx| {
                    let peak = Arc::clone(&peak);
                    let current = Arc::clone(&current);
                    async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            ));
        }

        let outcome = broker.group(&ids).await.unwrap();
        assert!(outcome.all_succeeded());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_status_unknown_task() {
        let broker = test_broker();
        assert!(matches!(
            broker.status("missing"),
            Err(TaskError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_result_ttl_expiry() {
        let broker = TaskBroker::new(BrokerConfig {
            result_ttl_secs: 0,
            ..Default::default()
        });
        let task_id = broker.submit("quick", queues::DEFAULT, fast_opts(), |_| async { Ok(1) });
        broker.wait(&task_id).await.unwrap();
        // TTL of zero expires immediately
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(matches!(
            broker.result::<i32>(&task_id),
            Err(TaskError::ResultUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_drain_waits_for_all() {
        let broker = test_broker();
        for i in 0..4 {
            broker.submit(&format!("d{i}"), queues::DEFAULT, fast_opts(), |_| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            });
        }
        broker.drain().await;
        let tasks = broker.inner.tasks.read().unwrap();
        assert!(tasks.values().all(|e| e.record.state.is_terminal()));
    }
}

//! Priority job queue with bounded concurrency, timeouts and retry.
//!
//! Four priority levels with FIFO ordering inside each level (by enqueue
//! sequence), a bounded pending set (overflow fails with backpressure), a
//! concurrency cap, a per-job timeout raced against execution, and optional
//! re-enqueue on failure. A single dispatcher task pops work and spawns
//! runners; completed jobs are retained in a bounded map so `get_job` works
//! briefly after completion.

pub mod index_queue;

pub use index_queue::IndexJobQueue;
pub use index_queue::JobKind;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::sync::oneshot;

use crate::config::QueueConfig;
use crate::error::CodeIntelErr;
use crate::error::Result;
use crate::types::now_unix;

/// Completed/failed jobs kept around for `get_job`.
const RETAINED_JOBS: usize = 200;

/// Scheduling priority. Lower value runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

/// Observable job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Per-job options.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub kind: Option<String>,
    pub retry_on_failure: bool,
    /// Override of the queue-wide timeout.
    pub timeout_ms: Option<u64>,
}

/// Public snapshot of one job.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub id: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub kind: Option<String>,
    pub created_at: i64,
    pub attempts: usize,
    pub error: Option<String>,
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub enqueued: u64,
}

type JobFut = Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send>>;
type JobFactory = Arc<dyn Fn() -> JobFut + Send + Sync>;

struct PendingJob {
    id: String,
    priority: JobPriority,
    seq: u64,
    attempts: usize,
    factory: JobFactory,
    options: JobOptions,
}

#[derive(Default)]
struct Inner {
    // Keyed by (priority, enqueue seq): first entry is next to run.
    pending: BTreeMap<(u8, u64), PendingJob>,
    pending_keys: HashMap<String, (u8, u64)>,
    jobs: HashMap<String, JobInfo>,
    retained: VecDeque<String>,
    running: usize,
    paused: bool,
    shutdown: bool,
    seq: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    enqueued: u64,
}

/// Priority-ordered async work queue.
pub struct JobQueue {
    config: QueueConfig,
    inner: Mutex<Inner>,
    work_notify: Notify,
    idle_notify: Notify,
}

impl JobQueue {
    /// Create the queue and start its dispatcher. Must be called inside a
    /// tokio runtime.
    pub fn new(config: QueueConfig) -> Arc<Self> {
        let queue = Arc::new(Self {
            config,
            inner: Mutex::new(Inner::default()),
            work_notify: Notify::new(),
            idle_notify: Notify::new(),
        });
        let dispatcher = queue.clone();
        tokio::spawn(async move { dispatcher.dispatch_loop().await });
        queue
    }

    /// Enqueue a retryable job. The closure is re-invoked on retry, so it
    /// must be `Fn`.
    pub fn enqueue<F, Fut>(
        &self,
        f: F,
        priority: JobPriority,
        options: JobOptions,
    ) -> Result<String>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let factory: JobFactory = Arc::new(move || {
            let fut = f();
            Box::pin(async move { fut.await.map_err(|e| e.to_string()) }) as JobFut
        });
        self.enqueue_factory(factory, priority, options)
    }

    /// Enqueue a one-shot job and wait for its result. Retry is not applied;
    /// timeouts and cancellation surface as errors.
    pub async fn enqueue_and_wait<F, Fut, T>(&self, f: F, priority: JobPriority) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<std::result::Result<T, String>>();
        let slot = Arc::new(Mutex::new(Some((f, tx))));

        let factory: JobFactory = Arc::new(move || {
            let taken = slot.lock().expect("job slot lock").take();
            Box::pin(async move {
                let Some((f, tx)) = taken else {
                    return Err("job already consumed".to_string());
                };
                match f().await {
                    Ok(value) => {
                        let _ = tx.send(Ok(value));
                        Ok(())
                    }
                    Err(e) => {
                        let cause = e.to_string();
                        let _ = tx.send(Err(cause.clone()));
                        Err(cause)
                    }
                }
            }) as JobFut
        });

        let id = self.enqueue_factory(factory, priority, JobOptions::default())?;

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(cause)) => Err(CodeIntelErr::JobFailed { job_id: id, cause }),
            // Sender dropped: the job was cancelled or its future was
            // dropped by the timeout race.
            Err(_) => {
                let info = self.get_job(&id);
                match info {
                    Some(info) if info.status == JobStatus::Cancelled => {
                        Err(CodeIntelErr::JobCancelled { job_id: id })
                    }
                    Some(info) => Err(CodeIntelErr::JobFailed {
                        job_id: id,
                        cause: info.error.unwrap_or_else(|| "job aborted".to_string()),
                    }),
                    None => Err(CodeIntelErr::JobCancelled { job_id: id }),
                }
            }
        }
    }

    fn enqueue_factory(
        &self,
        factory: JobFactory,
        priority: JobPriority,
        options: JobOptions,
    ) -> Result<String> {
        let mut inner = self.lock();
        if inner.shutdown {
            return Err(CodeIntelErr::QueueShutdown);
        }
        if inner.pending.len() >= self.config.max_pending {
            return Err(CodeIntelErr::QueueFull {
                capacity: self.config.max_pending,
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let seq = inner.seq;
        inner.seq += 1;
        inner.enqueued += 1;

        inner.jobs.insert(
            id.clone(),
            JobInfo {
                id: id.clone(),
                priority,
                status: JobStatus::Pending,
                kind: options.kind.clone(),
                created_at: now_unix(),
                attempts: 0,
                error: None,
            },
        );
        let key = (priority as u8, seq);
        inner.pending_keys.insert(id.clone(), key);
        inner.pending.insert(
            key,
            PendingJob {
                id: id.clone(),
                priority,
                seq,
                attempts: 0,
                factory,
                options,
            },
        );
        drop(inner);

        self.work_notify.notify_one();
        Ok(id)
    }

    /// Remove a pending job. Running jobs cannot be cancelled; callers rely
    /// on the timeout.
    pub fn cancel(&self, id: &str) -> bool {
        let mut inner = self.lock();
        let Some(key) = inner.pending_keys.remove(id) else {
            return false;
        };
        inner.pending.remove(&key);
        inner.cancelled += 1;
        Self::settle(&mut inner, id, JobStatus::Cancelled, None);
        let idle = inner.pending.is_empty() && inner.running == 0;
        drop(inner);
        if idle {
            self.idle_notify.notify_waiters();
        }
        true
    }

    /// Cancel every pending job.
    pub fn cancel_all(&self) -> usize {
        let mut inner = self.lock();
        let ids: Vec<String> = inner.pending.values().map(|j| j.id.clone()).collect();
        inner.pending.clear();
        inner.pending_keys.clear();
        inner.cancelled += ids.len() as u64;
        for id in &ids {
            Self::settle(&mut inner, id, JobStatus::Cancelled, None);
        }
        let idle = inner.running == 0;
        drop(inner);
        if idle {
            self.idle_notify.notify_waiters();
        }
        ids.len()
    }

    /// Snapshot one job (pending, running, or recently settled).
    pub fn get_job(&self, id: &str) -> Option<JobInfo> {
        self.lock().jobs.get(id).cloned()
    }

    /// Queue counters.
    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        QueueStats {
            pending: inner.pending.len(),
            running: inner.running,
            completed: inner.completed,
            failed: inner.failed,
            cancelled: inner.cancelled,
            enqueued: inner.enqueued,
        }
    }

    /// Stop dispatching new jobs. Running jobs keep going.
    pub fn pause(&self) {
        self.lock().paused = true;
    }

    /// Resume dispatching.
    pub fn resume(&self) {
        self.lock().paused = false;
        self.work_notify.notify_one();
    }

    /// Wait until no job is pending or running.
    pub async fn drain(&self) {
        loop {
            // Register before checking so a completion between the check and
            // the await is not lost.
            let notified = self.idle_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let inner = self.lock();
                if inner.pending.is_empty() && inner.running == 0 {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting work, drop pending jobs, wait for running jobs.
    pub async fn shutdown(&self) {
        {
            let mut inner = self.lock();
            inner.shutdown = true;
        }
        self.cancel_all();
        self.work_notify.notify_one();
        self.drain().await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("job queue mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            let mut to_run = Vec::new();
            {
                let mut inner = self.lock();
                if inner.shutdown && inner.pending.is_empty() && inner.running == 0 {
                    break;
                }
                while !inner.paused && inner.running < self.config.concurrency {
                    let Some((&key, _)) = inner.pending.iter().next() else {
                        break;
                    };
                    let job = inner.pending.remove(&key).expect("key just observed");
                    inner.pending_keys.remove(&job.id);
                    inner.running += 1;
                    if let Some(info) = inner.jobs.get_mut(&job.id) {
                        info.status = JobStatus::Running;
                        info.attempts = job.attempts + 1;
                    }
                    to_run.push(job);
                }
            }

            if to_run.is_empty() {
                self.work_notify.notified().await;
                continue;
            }

            for job in to_run {
                let queue = self.clone();
                tokio::spawn(async move { queue.run_job(job).await });
            }
        }
    }

    async fn run_job(self: Arc<Self>, job: PendingJob) {
        let timeout_ms = job.options.timeout_ms.unwrap_or(self.config.timeout_ms);
        let outcome =
            tokio::time::timeout(Duration::from_millis(timeout_ms), (job.factory)()).await;

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(cause)) => Some(cause),
            Err(_) => Some(format!("timed out after {timeout_ms}ms")),
        };

        let mut inner = self.lock();
        inner.running -= 1;

        match error {
            None => {
                inner.completed += 1;
                Self::settle(&mut inner, &job.id, JobStatus::Completed, None);
            }
            Some(cause) => {
                let attempts = job.attempts + 1;
                let can_retry = job.options.retry_on_failure
                    && attempts <= self.config.max_retries
                    && !inner.shutdown;
                if can_retry {
                    tracing::debug!(job_id = %job.id, attempts, cause = %cause, "retrying job");
                    // Re-enqueue with the original sequence so FIFO order
                    // within the priority is preserved.
                    let key = (job.priority as u8, job.seq);
                    inner.pending_keys.insert(job.id.clone(), key);
                    if let Some(info) = inner.jobs.get_mut(&job.id) {
                        info.status = JobStatus::Pending;
                        info.error = Some(cause);
                    }
                    inner.pending.insert(
                        key,
                        PendingJob {
                            attempts,
                            ..job
                        },
                    );
                } else {
                    inner.failed += 1;
                    Self::settle(&mut inner, &job.id, JobStatus::Failed, Some(cause));
                }
            }
        }

        let idle = inner.pending.is_empty() && inner.running == 0;
        drop(inner);

        self.work_notify.notify_one();
        if idle {
            self.idle_notify.notify_waiters();
        }
    }

    /// Record a terminal status and evict the oldest retained jobs.
    fn settle(inner: &mut Inner, id: &str, status: JobStatus, error: Option<String>) {
        if let Some(info) = inner.jobs.get_mut(id) {
            info.status = status;
            if error.is_some() {
                info.error = error;
            }
        }
        inner.retained.push_back(id.to_string());
        while inner.retained.len() > RETAINED_JOBS {
            if let Some(old) = inner.retained.pop_front() {
                inner.jobs.remove(&old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    fn queue(concurrency: usize) -> Arc<JobQueue> {
        JobQueue::new(QueueConfig {
            concurrency,
            max_pending: 100,
            timeout_ms: 1000,
            max_retries: 2,
        })
    }

    #[tokio::test]
    async fn executes_in_submission_order_with_concurrency_one() {
        let q = queue(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            q.enqueue(
                move || {
                    let order = order.clone();
                    async move {
                        order.lock().unwrap().push(i);
                        Ok(())
                    }
                },
                JobPriority::Normal,
                JobOptions::default(),
            )
            .unwrap();
        }

        q.drain().await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn peak_concurrency_bounded() {
        let q = queue(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let running = running.clone();
            let peak = peak.clone();
            q.enqueue(
                move || {
                    let running = running.clone();
                    let peak = peak.clone();
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                JobPriority::Normal,
                JobOptions::default(),
            )
            .unwrap();
        }

        q.drain().await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn failure_does_not_poison_queue() {
        // Four jobs at concurrency 2; one throws, the rest settle, running
        // count returns to zero.
        let q = queue(2);
        let completed = Arc::new(AtomicUsize::new(0));

        let mut failing = None;
        for i in 0..4 {
            let completed = completed.clone();
            let id = q
                .enqueue(
                    move || {
                        let completed = completed.clone();
                        async move {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            if i == 1 {
                                return Err(CodeIntelErr::EmbeddingFailed {
                                    cause: "boom".to_string(),
                                });
                            }
                            completed.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    },
                    JobPriority::Normal,
                    JobOptions::default(),
                )
                .unwrap();
            if i == 1 {
                failing = Some(id);
            }
        }

        q.drain().await;
        let stats = q.stats();
        assert_eq!(completed.load(Ordering::SeqCst), 3);
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.running, 0);
        let info = q.get_job(&failing.unwrap()).unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert!(info.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn priorities_jump_the_line() {
        let q = queue(1);
        q.pause();

        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, priority) in [
            ("low", JobPriority::Low),
            ("critical", JobPriority::Critical),
            ("normal", JobPriority::Normal),
        ] {
            let order = order.clone();
            q.enqueue(
                move || {
                    let order = order.clone();
                    async move {
                        order.lock().unwrap().push(label);
                        Ok(())
                    }
                },
                priority,
                JobOptions::default(),
            )
            .unwrap();
        }

        q.resume();
        q.drain().await;
        assert_eq!(*order.lock().unwrap(), vec!["critical", "normal", "low"]);
    }

    #[tokio::test]
    async fn backpressure_when_full() {
        let q = JobQueue::new(QueueConfig {
            concurrency: 1,
            max_pending: 2,
            timeout_ms: 1000,
            max_retries: 0,
        });
        q.pause();

        for _ in 0..2 {
            q.enqueue(
                || async { Ok(()) },
                JobPriority::Normal,
                JobOptions::default(),
            )
            .unwrap();
        }
        let overflow = q.enqueue(
            || async { Ok(()) },
            JobPriority::Normal,
            JobOptions::default(),
        );
        assert!(matches!(overflow, Err(CodeIntelErr::QueueFull { .. })));

        q.resume();
        q.drain().await;
    }

    #[tokio::test]
    async fn timeout_marks_failed() {
        let q = queue(1);
        let id = q
            .enqueue(
                || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                },
                JobPriority::Normal,
                JobOptions {
                    timeout_ms: Some(20),
                    ..JobOptions::default()
                },
            )
            .unwrap();

        q.drain().await;
        let info = q.get_job(&id).unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert!(info.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn retry_on_failure_retries_then_succeeds() {
        let q = queue(1);
        let attempts = Arc::new(AtomicUsize::new(0));

        let attempts_in_job = attempts.clone();
        let id = q
            .enqueue(
                move || {
                    let attempts = attempts_in_job.clone();
                    async move {
                        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(CodeIntelErr::EmbeddingFailed {
                                cause: "first".to_string(),
                            })
                        } else {
                            Ok(())
                        }
                    }
                },
                JobPriority::Normal,
                JobOptions {
                    retry_on_failure: true,
                    ..JobOptions::default()
                },
            )
            .unwrap();

        q.drain().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(q.get_job(&id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_pending_job() {
        let q = queue(1);
        q.pause();
        let id = q
            .enqueue(
                || async { Ok(()) },
                JobPriority::Normal,
                JobOptions::default(),
            )
            .unwrap();

        assert!(q.cancel(&id));
        assert_eq!(q.get_job(&id).unwrap().status, JobStatus::Cancelled);
        assert!(!q.cancel(&id));
        q.resume();
        q.drain().await;
        assert_eq!(q.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn enqueue_and_wait_returns_value() {
        let q = queue(2);
        let value = q
            .enqueue_and_wait(|| async { Ok(40 + 2) }, JobPriority::High)
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn enqueue_and_wait_surfaces_error() {
        let q = queue(2);
        let result: Result<()> = q
            .enqueue_and_wait(
                || async {
                    Err(CodeIntelErr::EmbeddingFailed {
                        cause: "nope".to_string(),
                    })
                },
                JobPriority::High,
            )
            .await;
        match result {
            Err(CodeIntelErr::JobFailed { cause, .. }) => assert!(cause.contains("nope")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let q = queue(1);
        q.shutdown().await;
        let result = q.enqueue(
            || async { Ok(()) },
            JobPriority::Normal,
            JobOptions::default(),
        );
        assert!(matches!(result, Err(CodeIntelErr::QueueShutdown)));
    }
}

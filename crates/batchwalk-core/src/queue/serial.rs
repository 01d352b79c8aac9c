//! Single-worker FIFO task queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use thread_priority::{ThreadPriority, set_current_thread_priority};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::domain::TaskSeq;
use crate::error::{BatchError, Result};
use crate::observability::QueueStats;

const LOG_TARGET: &str = "batchwalk::queue";

type BoxTask = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

struct QueuedTask {
    seq: TaskSeq,
    task: BoxTask,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> QueueStats {
        let submitted = self.submitted.load(Ordering::SeqCst);
        let completed = self.completed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        QueueStats {
            submitted,
            completed,
            failed,
            pending: submitted.saturating_sub(completed + failed),
        }
    }
}

/// Submission side.
///
/// The lock makes "assign sequence number + enqueue" one step, so sequence
/// numbers follow execution order even with concurrent submitters.
struct Intake {
    next_seq: u64,
    sender: Option<mpsc::UnboundedSender<QueuedTask>>,
}

struct Shared {
    intake: Mutex<Intake>,
    counters: Counters,
    /// Set by the worker once the OS accepted the lowered priority.
    low_priority: AtomicBool,
}

/// Cloneable submission handle.
///
/// Tasks use it to resubmit follow-up work onto the same queue.
#[derive(Clone)]
pub struct QueueHandle {
    shared: Arc<Shared>,
}

impl QueueHandle {
    /// Enqueue `task`. Returns as soon as it is queued.
    pub fn submit<F>(&self, task: F) -> Result<TaskSeq>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let task: BoxTask = Box::pin(task);
        let mut intake = self
            .shared
            .intake
            .lock()
            .map_err(|_| BatchError::Worker("queue intake lock poisoned".to_string()))?;
        let Some(sender) = intake.sender.as_ref() else {
            return Err(BatchError::QueueClosed);
        };

        let seq = TaskSeq::new(intake.next_seq + 1);
        sender
            .send(QueuedTask { seq, task })
            .map_err(|_| BatchError::QueueClosed)?;
        intake.next_seq = seq.get();
        self.shared.counters.submitted.fetch_add(1, Ordering::SeqCst);
        drop(intake);

        debug!(target: LOG_TARGET, task = seq.get(), "scheduling task");
        Ok(seq)
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.counters.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.shared
            .intake
            .lock()
            .map(|intake| intake.sender.is_none())
            .unwrap_or(true)
    }

    fn close(&self) {
        if let Ok(mut intake) = self.shared.intake.lock() {
            intake.sender = None;
        }
    }
}

/// Serial background executor.
///
/// - 専用 OS スレッド 1 本が全タスクを実行する
/// - Exactly one dedicated OS thread runs every task.
/// - Tasks run one at a time, in submission order.
/// - A task that fails or panics is logged and the worker moves on.
///
/// Dropping the queue closes it; already queued tasks still drain but the
/// worker thread is not joined. Use `shutdown_and_join` to wait for it.
pub struct TaskQueue {
    handle: QueueHandle,
    worker: Option<JoinHandle<()>>,
}

impl TaskQueue {
    /// Spawn the worker thread.
    pub fn start(config: &QueueConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BatchError::Worker(format!("build worker runtime: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            intake: Mutex::new(Intake {
                next_seq: 0,
                sender: Some(tx),
            }),
            counters: Counters::default(),
            low_priority: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let lower_priority = config.low_priority;
        let worker = std::thread::Builder::new()
            .name(config.worker_name.clone())
            .spawn(move || {
                if lower_priority {
                    lower_worker_priority(&worker_shared);
                }
                runtime.block_on(worker_loop(rx, worker_shared))
            })
            .map_err(|e| BatchError::Worker(format!("spawn worker thread: {e}")))?;

        info!(
            target: LOG_TARGET,
            worker = %config.worker_name,
            low_priority = config.low_priority,
            "task queue started"
        );
        Ok(Self {
            handle: QueueHandle { shared },
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    pub fn submit<F>(&self, task: F) -> Result<TaskSeq>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.handle.submit(task)
    }

    pub fn stats(&self) -> QueueStats {
        self.handle.stats()
    }

    /// Whether the worker thread runs at the lowest OS priority.
    ///
    /// Stays `false` until the worker has started, when lowering is disabled,
    /// or when the OS refused it.
    pub fn runs_at_low_priority(&self) -> bool {
        self.handle.shared.low_priority.load(Ordering::Acquire)
    }

    /// Stop accepting tasks, let the queued ones finish and wait for the
    /// worker thread to exit.
    pub async fn shutdown_and_join(mut self) -> Result<()> {
        self.handle.close();
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || worker.join())
            .await
            .map_err(|e| BatchError::Worker(format!("join worker: {e}")))?
            .map_err(|_| BatchError::Worker("worker thread panicked".to_string()))
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.handle.close();
    }
}

/// バックグラウンド用なので OS 優先度を最低にする。拒否されても続行。
fn lower_worker_priority(shared: &Shared) {
    match set_current_thread_priority(ThreadPriority::Min) {
        Ok(()) => {
            shared.low_priority.store(true, Ordering::Release);
            debug!(target: LOG_TARGET, "worker priority lowered");
        }
        Err(err) => {
            warn!(
                target: LOG_TARGET,
                error = ?err,
                "could not lower worker priority, running at default"
            );
        }
    }
}

async fn worker_loop(mut rx: mpsc::UnboundedReceiver<QueuedTask>, shared: Arc<Shared>) {
    while let Some(QueuedTask { seq, task }) = rx.recv().await {
        debug!(target: LOG_TARGET, task = seq.get(), "running task");

        // spawn して await: panic は JoinError になり、worker 自体は落ちない
        // 前のタスクが終わるまで次は recv しない（= 常に 1 件ずつ）
        match tokio::spawn(task).await {
            Ok(Ok(())) => {
                shared.counters.completed.fetch_add(1, Ordering::SeqCst);
                let left = shared.counters.snapshot().pending;
                debug!(target: LOG_TARGET, task = seq.get(), tasks_left = left, "completed task");
            }
            Ok(Err(err)) => {
                shared.counters.failed.fetch_add(1, Ordering::SeqCst);
                error!(target: LOG_TARGET, task = seq.get(), error = %err, "execution of task failed");
            }
            Err(join_err) => {
                shared.counters.failed.fetch_add(1, Ordering::SeqCst);
                error!(target: LOG_TARGET, task = seq.get(), error = %join_err, "task panicked");
            }
        }
    }
    info!(target: LOG_TARGET, "task queue worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn start_queue() -> TaskQueue {
        TaskQueue::start(&QueueConfig::default()).unwrap()
    }

    /// Submit a marker task and wait until the worker reaches it.
    async fn drain(queue: &QueueHandle) {
        let (tx, rx) = oneshot::channel();
        queue
            .submit(async move {
                let _ = tx.send(());
                Ok(())
            })
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("queue did not drain")
            .unwrap();
    }

    #[tokio::test]
    async fn runs_tasks_in_submission_order() {
        for _ in 0..20 {
            let queue = start_queue();
            let seen = Arc::new(Mutex::new(Vec::new()));
            for n in 1..=3 {
                let seen = Arc::clone(&seen);
                queue
                    .submit(async move {
                        seen.lock().unwrap().push(n);
                        Ok(())
                    })
                    .unwrap();
            }
            drain(&queue.handle()).await;
            assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        }
    }

    #[tokio::test]
    async fn never_runs_two_tasks_at_once() {
        let queue = start_queue();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            queue
                .submit(async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        drain(&queue.handle()).await;
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_task_does_not_stop_the_worker() {
        let queue = start_queue();
        queue
            .submit(async { Err(BatchError::Store("boom".into())) })
            .unwrap();
        drain(&queue.handle()).await;

        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.submitted, 2);
    }

    #[tokio::test]
    async fn panicking_task_does_not_stop_the_worker() {
        let queue = start_queue();
        queue
            .submit(async {
                if true {
                    panic!("task blew up");
                }
                Ok(())
            })
            .unwrap();
        drain(&queue.handle()).await;
        assert_eq!(queue.stats().failed, 1);
    }

    #[tokio::test]
    async fn sequence_numbers_increase() {
        let queue = start_queue();
        let a = queue.submit(async { Ok(()) }).unwrap();
        let b = queue.submit(async { Ok(()) }).unwrap();
        assert!(b > a);
        assert_eq!(a, TaskSeq::new(1));
    }

    #[tokio::test]
    async fn tasks_run_on_the_named_worker_thread() {
        let config = QueueConfig {
            worker_name: "walker-test".to_string(),
            ..QueueConfig::default()
        };
        let queue = TaskQueue::start(&config).unwrap();
        let (tx, rx) = oneshot::channel();
        queue
            .submit(async move {
                let name = std::thread::current().name().map(str::to_string);
                let _ = tx.send(name);
                Ok(())
            })
            .unwrap();
        assert_eq!(rx.await.unwrap().as_deref(), Some("walker-test"));
    }

    #[tokio::test]
    async fn tasks_can_resubmit_onto_the_same_queue() {
        let queue = start_queue();
        let handle = queue.handle();
        let (tx, rx) = oneshot::channel();
        queue
            .submit(async move {
                handle.submit(async move {
                    let _ = tx.send(());
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_submitters_are_all_served() {
        let queue = start_queue();
        let count = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::new();
        for _ in 0..4 {
            let handle = queue.handle();
            let count = Arc::clone(&count);
            threads.push(std::thread::spawn(move || {
                for _ in 0..25 {
                    let count = Arc::clone(&count);
                    handle
                        .submit(async move {
                            count.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        drain(&queue.handle()).await;
        assert_eq!(count.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let queue = start_queue();
        let handle = queue.handle();
        queue.shutdown_and_join().await.unwrap();

        assert!(handle.is_closed());
        let err = handle.submit(async { Ok(()) }).unwrap_err();
        assert!(matches!(err, BatchError::QueueClosed));
    }

    #[tokio::test]
    async fn shutdown_drains_queued_tasks() {
        let queue = start_queue();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            queue
                .submit(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        queue.shutdown_and_join().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn worker_lowers_its_priority_where_the_os_allows() {
        // Same call on a throwaway thread tells whether this host permits it.
        let permitted =
            std::thread::spawn(|| set_current_thread_priority(ThreadPriority::Min).is_ok())
                .join()
                .unwrap();

        let queue = start_queue();
        drain(&queue.handle()).await;
        assert_eq!(queue.runs_at_low_priority(), permitted);
    }

    #[tokio::test]
    async fn priority_is_untouched_when_disabled() {
        let config = QueueConfig {
            low_priority: false,
            ..QueueConfig::default()
        };
        let queue = TaskQueue::start(&config).unwrap();
        drain(&queue.handle()).await;
        assert!(!queue.runs_at_low_priority());
    }
}

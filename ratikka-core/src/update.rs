//! Single-writer task queue for graph mutations.
//!
//! [`UpdateManager`] owns one FIFO queue and one dedicated worker thread.
//! Tasks are submitted from any thread through a cloneable [`UpdateHandle`]
//! and run strictly one after another, each to completion, on the worker.
//! A task that fails or panics is logged and counted; the worker carries on
//! with the next task.

use std::{
    borrow::Cow,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    thread::JoinHandle,
};

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{Graph, GraphError, GraphWriter};

/// Error returned by a writer task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriterTaskError {
    /// A graph edit was rejected.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Any other task-specific failure.
    #[error("{0}")]
    Failed(String),
}

/// Why a task could not be queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The manager is shutting down or has stopped.
    #[error("update manager is closed; task {task:?} was dropped")]
    Closed {
        /// Name of the rejected task.
        task: String,
    },
}

/// Errors raised when starting the manager.
#[derive(Debug, Error)]
pub enum UpdateManagerError {
    /// The worker thread could not be spawned.
    #[error("failed to spawn graph writer thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// What to do with queued tasks when shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPolicy {
    /// Run every task queued before shutdown.
    #[default]
    Drain,
    /// Drop queued tasks without running them.
    Discard,
}

/// Final state of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task ran to completion.
    Completed,
    /// The task returned an error.
    Failed(WriterTaskError),
    /// The task panicked; the payload message is kept when available.
    Panicked(String),
}

type ApplyFn = Box<dyn for<'g> FnOnce(&mut GraphWriter<'g>) -> Result<(), WriterTaskError> + Send>;

/// A unit of exclusive graph mutation.
///
/// # Examples
/// ```
/// use ratikka_core::{EdgeId, WriterTask};
///
/// let task = WriterTask::new("clear-e0", |writer| {
///     writer.replace_alerts(EdgeId::new(0), Vec::new())?;
///     Ok(())
/// });
/// assert_eq!(task.name(), "clear-e0");
/// ```
pub struct WriterTask {
    name: Cow<'static, str>,
    apply: ApplyFn,
}

impl std::fmt::Debug for WriterTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterTask")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl WriterTask {
    /// Wrap a closure as a named task.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, apply: F) -> Self
    where
        F: for<'g> FnOnce(&mut GraphWriter<'g>) -> Result<(), WriterTaskError> + Send + 'static,
    {
        Self {
            name: name.into(),
            apply: Box::new(apply),
        }
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Receipt for a submitted task.
///
/// Dropping the receipt does not cancel the task.
#[derive(Debug)]
pub struct TaskReceipt {
    done: oneshot::Receiver<TaskOutcome>,
    settled: Option<Option<TaskOutcome>>,
}

impl TaskReceipt {
    /// Whether the task is still queued or running.
    pub fn is_pending(&mut self) -> bool {
        if self.settled.is_some() {
            return false;
        }
        match self.done.try_recv() {
            Ok(outcome) => {
                self.settled = Some(Some(outcome));
                false
            }
            Err(oneshot::error::TryRecvError::Empty) => true,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.settled = Some(None);
                false
            }
        }
    }

    /// Wait for the task to finish.
    ///
    /// Returns `None` when the task was discarded without running.
    pub async fn wait(self) -> Option<TaskOutcome> {
        match self.settled {
            Some(settled) => settled,
            None => self.done.await.ok(),
        }
    }

    /// Blocking variant of [`TaskReceipt::wait`] for non-async callers.
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_wait(self) -> Option<TaskOutcome> {
        match self.settled {
            Some(settled) => settled,
            None => self.done.blocking_recv().ok(),
        }
    }
}

struct QueuedTask {
    task: WriterTask,
    done: oneshot::Sender<TaskOutcome>,
}

enum Job {
    Run(QueuedTask),
    Shutdown(ShutdownPolicy),
}

#[derive(Debug, Default)]
struct Counters {
    accepting: AtomicBool,
    discarding: AtomicBool,
    queued: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

/// Cloneable submission endpoint of an [`UpdateManager`].
#[derive(Debug, Clone)]
pub struct UpdateHandle {
    sender: mpsc::UnboundedSender<Job>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Run(queued) => f.debug_tuple("Run").field(&queued.task).finish(),
            Self::Shutdown(policy) => f.debug_tuple("Shutdown").field(policy).finish(),
        }
    }
}

impl UpdateHandle {
    /// Queue a task without blocking.
    pub fn submit(&self, task: WriterTask) -> Result<TaskReceipt, SubmitError> {
        if !self.counters.accepting.load(Ordering::Acquire) {
            warn!("dropping writer task {:?}: update manager is closed", task.name);
            return Err(SubmitError::Closed {
                task: task.name.into_owned(),
            });
        }
        let (done, receiver) = oneshot::channel();
        self.counters.queued.fetch_add(1, Ordering::AcqRel);
        self.sender
            .send(Job::Run(QueuedTask { task, done }))
            .map_err(|rejected| {
                self.counters.queued.fetch_sub(1, Ordering::AcqRel);
                let name = match rejected.0 {
                    Job::Run(queued) => queued.task.name.into_owned(),
                    Job::Shutdown(_) => String::new(),
                };
                warn!("dropping writer task {name:?}: graph writer has stopped");
                SubmitError::Closed { task: name }
            })?;
        Ok(TaskReceipt {
            done: receiver,
            settled: None,
        })
    }

    /// Queue a task and wait for it to settle.
    ///
    /// Returns `Ok(None)` when the task was discarded at shutdown.
    pub async fn submit_and_wait(&self, task: WriterTask) -> Result<Option<TaskOutcome>, SubmitError> {
        Ok(self.submit(task)?.wait().await)
    }

    /// Tasks queued but not yet finished.
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::Acquire)
    }

    /// Whether new tasks are still accepted.
    pub fn is_accepting(&self) -> bool {
        self.counters.accepting.load(Ordering::Acquire)
    }
}

/// Owner of the graph writer thread.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use geo::Coord;
/// use ratikka_core::{Graph, ShutdownPolicy, TaskOutcome, UpdateManager, WriterTask};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut builder = Graph::builder();
/// let a = builder.add_vertex("A", Coord { x: 0.0, y: 0.0 });
/// let b = builder.add_vertex("B", Coord { x: 0.0, y: 1.0 });
/// let edge = builder.add_straight_edge(a, b, "AB")?;
/// let graph = Arc::new(builder.build());
///
/// let manager = UpdateManager::start(Arc::clone(&graph))?;
/// let receipt = manager.handle().submit(WriterTask::new("noop", move |writer| {
///     writer.replace_alerts(edge, Vec::new())?;
///     Ok(())
/// }))?;
/// assert_eq!(receipt.blocking_wait(), Some(TaskOutcome::Completed));
/// manager.shutdown(ShutdownPolicy::Drain);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct UpdateManager {
    handle: UpdateHandle,
    worker: Option<JoinHandle<()>>,
}

impl UpdateManager {
    /// Spawn the writer thread for `graph`.
    pub fn start(graph: Arc<Graph>) -> Result<Self, UpdateManagerError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        counters.accepting.store(true, Ordering::Release);
        let worker_counters = Arc::clone(&counters);
        let worker = std::thread::Builder::new()
            .name("graph-writer".to_owned())
            .spawn(move || run_worker(&graph, receiver, &worker_counters))
            .map_err(UpdateManagerError::Spawn)?;
        info!("graph writer started");
        Ok(Self {
            handle: UpdateHandle { sender, counters },
            worker: Some(worker),
        })
    }

    /// A submission handle that can be cloned and shared.
    pub fn handle(&self) -> UpdateHandle {
        self.handle.clone()
    }

    /// Queue a task without blocking.
    pub fn submit(&self, task: WriterTask) -> Result<TaskReceipt, SubmitError> {
        self.handle.submit(task)
    }

    /// Tasks that ran to completion.
    pub fn executed(&self) -> u64 {
        self.handle.counters.completed.load(Ordering::Acquire)
    }

    /// Tasks that returned an error or panicked.
    pub fn failed(&self) -> u64 {
        self.handle.counters.failed.load(Ordering::Acquire)
    }

    /// Tasks dropped unrun at shutdown.
    pub fn discarded(&self) -> u64 {
        self.handle.counters.discarded.load(Ordering::Acquire)
    }

    /// Stop accepting tasks, settle the queue per `policy`, and join the
    /// worker.
    ///
    /// Blocks until the worker exits; call it from a blocking context.
    pub fn shutdown(mut self, policy: ShutdownPolicy) {
        self.stop(policy);
    }

    fn stop(&mut self, policy: ShutdownPolicy) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if policy == ShutdownPolicy::Discard {
            self.handle.counters.discarding.store(true, Ordering::Release);
        }
        self.handle.counters.accepting.store(false, Ordering::Release);
        if self.handle.sender.send(Job::Shutdown(policy)).is_err() {
            debug!("graph writer already stopped");
        }
        if worker.join().is_err() {
            error!("graph writer thread terminated abnormally");
        }
        info!(
            "graph writer stopped: {} executed, {} failed, {} discarded",
            self.executed(),
            self.failed(),
            self.discarded()
        );
    }
}

impl Drop for UpdateManager {
    fn drop(&mut self) {
        self.stop(ShutdownPolicy::Drain);
    }
}

fn run_worker(graph: &Graph, mut receiver: mpsc::UnboundedReceiver<Job>, counters: &Counters) {
    while let Some(job) = receiver.blocking_recv() {
        match job {
            Job::Run(queued) => dispatch(graph, queued, counters),
            Job::Shutdown(policy) => {
                debug!("graph writer received shutdown ({policy:?})");
                receiver.close();
                // Submissions that raced past the closed flag still settle.
                while let Ok(job) = receiver.try_recv() {
                    if let Job::Run(queued) = job {
                        dispatch(graph, queued, counters);
                    }
                }
                break;
            }
        }
    }
}

fn dispatch(graph: &Graph, queued: QueuedTask, counters: &Counters) {
    if counters.discarding.load(Ordering::Acquire) {
        warn!("discarding queued writer task {:?}", queued.task.name);
        counters.queued.fetch_sub(1, Ordering::AcqRel);
        counters.discarded.fetch_add(1, Ordering::AcqRel);
        return;
    }
    execute(graph, queued, counters);
}

fn execute(graph: &Graph, queued: QueuedTask, counters: &Counters) {
    let QueuedTask { task, done } = queued;
    let WriterTask { name, apply } = task;
    let mut writer = GraphWriter::new(graph);
    let outcome = match catch_unwind(AssertUnwindSafe(|| apply(&mut writer))) {
        Ok(Ok(())) => {
            debug!(
                "writer task {name:?} completed with {} alert-set replacements",
                writer.replacements()
            );
            counters.completed.fetch_add(1, Ordering::AcqRel);
            TaskOutcome::Completed
        }
        Ok(Err(err)) => {
            error!("writer task {name:?} failed: {err}");
            counters.failed.fetch_add(1, Ordering::AcqRel);
            TaskOutcome::Failed(err)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("writer task {name:?} panicked: {message}");
            counters.failed.fetch_add(1, Ordering::AcqRel);
            TaskOutcome::Panicked(message)
        }
    };
    counters.queued.fetch_sub(1, Ordering::AcqRel);
    if done.send(outcome).is_err() {
        debug!("receipt for writer task {name:?} was dropped");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Alert, AlertSource, EdgeId, Validity};
    use geo::{Coord, Geometry, Point};
    use rstest::{fixture, rstest};
    use std::sync::{Barrier, Mutex};

    #[fixture]
    fn graph() -> Arc<Graph> {
        let mut builder = Graph::builder();
        let a = builder.add_vertex("A", Coord { x: 0.0, y: 0.0 });
        let b = builder.add_vertex("B", Coord { x: 1.0, y: 0.0 });
        builder.add_straight_edge(a, b, "AB").expect("edge AB");
        Arc::new(builder.build())
    }

    fn alert(id: &str) -> Alert {
        Alert::new(
            AlertSource::new("test", id),
            "header",
            "",
            Validity::always(),
            Geometry::Point(Point::new(0.0, 0.0)),
        )
    }

    fn append(id: &'static str) -> WriterTask {
        WriterTask::new(id, move |writer| {
            writer.update_alerts(EdgeId::new(0), |current| {
                current.iter().cloned().chain([alert(id)]).collect()
            })?;
            Ok(())
        })
    }

    #[rstest]
    fn tasks_apply_in_submission_order(graph: Arc<Graph>) {
        let manager = UpdateManager::start(Arc::clone(&graph)).expect("start manager");
        let ids = ["1", "2", "3", "4", "5"];
        let receipts: Vec<_> = ids
            .iter()
            .map(|id| manager.submit(append(id)).expect("accepting"))
            .collect();
        for receipt in receipts {
            assert_eq!(receipt.blocking_wait(), Some(TaskOutcome::Completed));
        }

        let applied: Vec<_> = graph
            .alerts(EdgeId::new(0))
            .expect("edge exists")
            .iter()
            .map(|a| a.source.external_id.clone())
            .collect();
        assert_eq!(applied, ids);
        assert_eq!(manager.executed(), 5);
    }

    #[rstest]
    fn failing_and_panicking_tasks_do_not_stop_the_worker(graph: Arc<Graph>) {
        let manager = UpdateManager::start(Arc::clone(&graph)).expect("start manager");
        let failing = manager
            .submit(WriterTask::new("fails", |_| {
                Err(WriterTaskError::Failed("boom".to_owned()))
            }))
            .expect("accepting");
        let panicking = manager
            .submit(WriterTask::new("panics", |_| panic!("kaboom")))
            .expect("accepting");
        let unknown = manager
            .submit(WriterTask::new("unknown-edge", |writer| {
                writer.replace_alerts(EdgeId::new(42), Vec::new())?;
                Ok(())
            }))
            .expect("accepting");
        let after = manager.submit(append("after")).expect("accepting");

        assert!(matches!(
            failing.blocking_wait(),
            Some(TaskOutcome::Failed(WriterTaskError::Failed(_)))
        ));
        assert_eq!(
            panicking.blocking_wait(),
            Some(TaskOutcome::Panicked("kaboom".to_owned()))
        );
        assert_eq!(
            unknown.blocking_wait(),
            Some(TaskOutcome::Failed(WriterTaskError::Graph(
                GraphError::UnknownEdge(EdgeId::new(42))
            )))
        );
        assert_eq!(after.blocking_wait(), Some(TaskOutcome::Completed));
        assert_eq!(manager.failed(), 3);
        assert_eq!(graph.alerts(EdgeId::new(0)).map(|a| a.len()), Some(1));
    }

    #[rstest]
    fn tasks_never_overlap(graph: Arc<Graph>) {
        let manager = UpdateManager::start(graph).expect("start manager");
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let threads = 4;
        let barrier = Arc::new(Barrier::new(threads));
        let receipts = Arc::new(Mutex::new(Vec::new()));

        std::thread::scope(|scope| {
            for _ in 0..threads {
                let handle = manager.handle();
                let active = Arc::clone(&active);
                let overlaps = Arc::clone(&overlaps);
                let barrier = Arc::clone(&barrier);
                let receipts = Arc::clone(&receipts);
                scope.spawn(move || {
                    barrier.wait();
                    for _ in 0..25 {
                        let active = Arc::clone(&active);
                        let overlaps = Arc::clone(&overlaps);
                        let receipt = handle
                            .submit(WriterTask::new("probe", move |_| {
                                if active.fetch_add(1, Ordering::SeqCst) != 0 {
                                    overlaps.fetch_add(1, Ordering::SeqCst);
                                }
                                std::thread::yield_now();
                                active.fetch_sub(1, Ordering::SeqCst);
                                Ok(())
                            }))
                            .expect("accepting");
                        receipts.lock().expect("receipts lock").push(receipt);
                    }
                });
            }
        });

        let receipts = std::mem::take(&mut *receipts.lock().expect("receipts lock"));
        for receipt in receipts {
            assert_eq!(receipt.blocking_wait(), Some(TaskOutcome::Completed));
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[case::drain(ShutdownPolicy::Drain, 3, 0)]
    #[case::discard(ShutdownPolicy::Discard, 0, 3)]
    fn shutdown_settles_queue_per_policy(
        graph: Arc<Graph>,
        #[case] policy: ShutdownPolicy,
        #[case] expected_alerts: usize,
        #[case] expected_discarded: u64,
    ) {
        let manager = UpdateManager::start(Arc::clone(&graph)).expect("start manager");
        let gate = Arc::new(Barrier::new(2));
        let worker_gate = Arc::clone(&gate);
        let blocker = manager
            .submit(WriterTask::new("blocker", move |_| {
                worker_gate.wait();
                Ok(())
            }))
            .expect("accepting");
        let queued: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|id| manager.submit(append(id)).expect("accepting"))
            .collect();
        let handle = manager.handle();

        let stopper = std::thread::spawn(move || {
            let discarded_before = manager.discarded();
            assert_eq!(discarded_before, 0);
            manager.shutdown(policy);
        });
        // Release the blocker only once shutdown has started.
        while handle.is_accepting() {
            std::thread::yield_now();
        }
        gate.wait();
        stopper.join().expect("shutdown thread");

        assert_eq!(blocker.blocking_wait(), Some(TaskOutcome::Completed));
        let settled: Vec<_> = queued
            .into_iter()
            .map(TaskReceipt::blocking_wait)
            .collect();
        let ran = settled.iter().filter(|outcome| outcome.is_some()).count();
        assert_eq!(ran, expected_alerts);
        assert_eq!(
            u64::try_from(settled.len() - ran).expect("small count"),
            expected_discarded
        );
        assert_eq!(
            graph.alerts(EdgeId::new(0)).map(|a| a.len()),
            Some(expected_alerts)
        );
    }

    #[rstest]
    fn submissions_after_shutdown_are_refused(graph: Arc<Graph>) {
        let manager = UpdateManager::start(graph).expect("start manager");
        let handle = manager.handle();
        manager.shutdown(ShutdownPolicy::Drain);

        let err = handle.submit(append("late")).expect_err("closed");
        assert_eq!(
            err,
            SubmitError::Closed {
                task: "late".to_owned()
            }
        );
    }

    #[rstest]
    fn pending_receipt_settles_after_completion(graph: Arc<Graph>) {
        let manager = UpdateManager::start(graph).expect("start manager");
        let gate = Arc::new(Barrier::new(2));
        let worker_gate = Arc::clone(&gate);
        let mut receipt = manager
            .submit(WriterTask::new("gated", move |_| {
                worker_gate.wait();
                Ok(())
            }))
            .expect("accepting");

        assert!(receipt.is_pending());
        gate.wait();
        while receipt.is_pending() {
            std::thread::yield_now();
        }
        assert_eq!(receipt.blocking_wait(), Some(TaskOutcome::Completed));
    }

    #[tokio::test]
    async fn submit_and_wait_reports_the_outcome() {
        let manager = UpdateManager::start(graph()).expect("start manager");
        let handle = manager.handle();
        let outcome = handle
            .submit_and_wait(append("async"))
            .await
            .expect("accepting");
        assert_eq!(outcome, Some(TaskOutcome::Completed));
        assert_eq!(handle.queued(), 0);
        drop(manager);
    }
}

/// Task pool - fixed worker threads for CPU-bound jobs
///
/// Jobs run on worker threads and never touch the GPU. Their results travel
/// back over a channel; the owner thread drains it with `poll` once per tick
/// and applies each completion to its own context (`C`), which is where GPU
/// work derived from the result happens.
///
/// State machine of a task:
///
/// ```text
/// Uninitialized -> Waiting -> Processing -> Processed -> Done
/// ```
///
/// `Processing -> Processed` is observed by `poll`, `Processed -> Done` by
/// `FinishedTask::complete`. An aborted task skips its job body but still
/// walks through every state; its completion receives `None`.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, Result};
use crate::{engine_debug, engine_error, engine_trace, engine_warn};

/// Identifier of a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Unknown id
    Uninitialized,
    /// Queued, not picked up by a worker yet
    Waiting,
    /// A worker runs the job (or skips it when aborted)
    Processing,
    /// Result received by the owner, completion not applied yet
    Processed,
    /// Completion applied
    Done,
}

type Output = Box<dyn Any + Send>;
type Work = Box<dyn FnOnce() -> Output + Send>;
type Completion<C> = Box<dyn FnOnce(&mut C, Option<Output>)>;

struct QueuedJob {
    id: TaskId,
    work: Work,
}

struct JobResult {
    id: TaskId,
    /// `None` when the job was aborted or panicked
    output: Option<Output>,
}

/// State shared with the workers
#[derive(Default)]
struct Shared {
    states: FxHashMap<TaskId, TaskState>,
    aborted: FxHashSet<TaskId>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Result of a task, ready to be applied on the owner thread
pub struct FinishedTask<C> {
    id: TaskId,
    aborted: bool,
    output: Option<Output>,
    completion: Completion<C>,
    shared: Arc<Mutex<Shared>>,
}

impl<C> FinishedTask<C> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// True when the job body never ran
    pub fn was_aborted(&self) -> bool {
        self.aborted
    }

    /// Run the completion against the owner's context; the task becomes done
    pub fn complete(self, context: &mut C) {
        (self.completion)(context, self.output);
        let mut shared = lock(&self.shared);
        shared.states.remove(&self.id);
        shared.aborted.remove(&self.id);
    }
}

/// Fixed-size worker pool
pub struct TaskPool<C> {
    shared: Arc<Mutex<Shared>>,
    jobs: Option<Sender<QueuedJob>>,
    results: Receiver<JobResult>,
    completions: FxHashMap<TaskId, Completion<C>>,
    workers: Vec<JoinHandle<()>>,
    next_id: u64,
}

impl<C> TaskPool<C> {
    /// Spawn `worker_count` worker threads (at least one)
    pub fn new(worker_count: usize) -> Result<Self> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<QueuedJob>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<JobResult>();
        let shared = Arc::new(Mutex::new(Shared::default()));

        let worker_count = worker_count.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("nebula-worker-{}", index))
                .spawn(move || worker_loop(jobs, results, shared))
                .map_err(|e| {
                    engine_error!("nebula::TaskPool", "Failed to spawn worker {}: {}", index, e);
                    Error::InitializationFailed(format!("failed to spawn worker thread: {}", e))
                })?;
            workers.push(handle);
        }

        engine_debug!("nebula::TaskPool", "Task pool started with {} worker(s)", worker_count);

        Ok(Self {
            shared,
            jobs: Some(job_tx),
            results: result_rx,
            completions: FxHashMap::default(),
            workers,
            next_id: 0,
        })
    }

    /// Queue a job
    ///
    /// # Arguments
    ///
    /// * `job` - Runs on a worker thread
    /// * `on_complete` - Runs on the owner thread with the job's output, or
    ///   `None` when the task was aborted or the job panicked
    pub fn submit<T, F, G>(&mut self, job: F, on_complete: G) -> TaskId
    where
        C: 'static,
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        G: FnOnce(&mut C, Option<T>) + 'static,
    {
        let id = TaskId(self.next_id);
        self.next_id += 1;

        lock(&self.shared).states.insert(id, TaskState::Waiting);
        self.completions.insert(id, Box::new(move |context: &mut C, output: Option<Output>| {
            let output = output.and_then(|output| output.downcast::<T>().ok()).map(|output| *output);
            on_complete(context, output);
        }));

        let work: Work = Box::new(move || Box::new(job()) as Output);
        let sent = match &self.jobs {
            Some(jobs) => jobs.send(QueuedJob { id, work }).is_ok(),
            None => false,
        };
        if !sent {
            // Workers are gone: the task finishes as aborted on the next poll
            engine_warn!("nebula::TaskPool", "Task {:?} submitted to a stopped pool", id);
            let mut shared = lock(&self.shared);
            shared.aborted.insert(id);
            shared.states.insert(id, TaskState::Processing);
        }

        engine_trace!("nebula::TaskPool", "Task {:?} queued", id);
        id
    }

    /// Skip the job body of a task that has not started yet
    ///
    /// # Returns
    ///
    /// `false` when the task already started or is unknown.
    pub fn abort(&mut self, id: TaskId) -> bool {
        let mut shared = lock(&self.shared);
        if shared.states.get(&id) == Some(&TaskState::Waiting) {
            shared.aborted.insert(id);
            true
        } else {
            false
        }
    }

    pub fn state(&self, id: TaskId) -> TaskState {
        match lock(&self.shared).states.get(&id) {
            Some(state) => *state,
            None if id.0 < self.next_id => TaskState::Done,
            None => TaskState::Uninitialized,
        }
    }

    /// Tasks submitted and not completed yet
    pub fn pending(&self) -> usize {
        self.completions.len()
    }

    /// Collect every task whose job finished since the last poll
    pub fn poll(&mut self) -> Vec<FinishedTask<C>> {
        let mut finished = Vec::new();
        while let Ok(result) = self.results.try_recv() {
            if let Some(task) = self.finish(result) {
                finished.push(task);
            }
        }
        finished.extend(self.finish_orphans());
        finished
    }

    /// Block until every pending task finished or `timeout` elapsed
    pub fn poll_until_idle(&mut self, timeout: Duration) -> Vec<FinishedTask<C>> {
        let deadline = Instant::now() + timeout;
        let mut finished = self.poll();
        let mut outstanding = self.pending();
        while outstanding > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.results.recv_timeout(remaining) {
                Ok(result) => {
                    if let Some(task) = self.finish(result) {
                        finished.push(task);
                        outstanding -= 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        finished
    }

    fn finish(&mut self, result: JobResult) -> Option<FinishedTask<C>> {
        let completion = self.completions.remove(&result.id)?;
        let aborted = {
            let mut shared = lock(&self.shared);
            shared.states.insert(result.id, TaskState::Processed);
            shared.aborted.contains(&result.id)
        };
        Some(FinishedTask {
            id: result.id,
            aborted,
            output: result.output,
            completion,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Tasks that could not be queued (pool stopped) finish without a worker
    fn finish_orphans(&mut self) -> Vec<FinishedTask<C>> {
        if self.jobs.is_some() {
            return Vec::new();
        }
        let orphans: Vec<TaskId> = self.completions.keys().copied().collect();
        orphans
            .into_iter()
            .filter_map(|id| self.finish(JobResult { id, output: None }))
            .collect()
    }

    /// Stop accepting jobs and join every worker
    ///
    /// Jobs already queued still run; their results are returned by the
    /// next `poll`.
    pub fn shutdown(&mut self) {
        if self.jobs.take().is_none() {
            return;
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                engine_error!("nebula::TaskPool", "Worker thread panicked");
            }
        }
        engine_debug!("nebula::TaskPool", "Task pool stopped");
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl<C> Drop for TaskPool<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(jobs: Receiver<QueuedJob>, results: Sender<JobResult>, shared: Arc<Mutex<Shared>>) {
    // Ends when the pool drops its sender and the queue is empty
    for queued in jobs.iter() {
        let aborted = {
            let mut shared = lock(&shared);
            shared.states.insert(queued.id, TaskState::Processing);
            shared.aborted.contains(&queued.id)
        };

        let output = if aborted {
            engine_debug!("nebula::TaskPool", "Task {:?} aborted before it ran", queued.id);
            None
        } else {
            match catch_unwind(AssertUnwindSafe(queued.work)) {
                Ok(output) => Some(output),
                Err(_) => {
                    engine_error!("nebula::TaskPool", "Task {:?} panicked", queued.id);
                    None
                }
            }
        };

        if results.send(JobResult { id: queued.id, output }).is_err() {
            break;
        }
    }
}

#[cfg(test)]
#[path = "task_pool_tests.rs"]
mod tests;

//! Execution context collaborator.
//!
//! Handlers never run on the thread that decoded their frame. The dispatcher
//! hands each decoded message to an `ExecutionContext` as a boxed task and
//! returns immediately; the context runs tasks one at a time on the thread it
//! owns.
//!
//! `WorkQueue` is the provided context: an unbounded tokio channel whose
//! `WorkQueueRunner` is drained by the owning thread, either from a game-loop
//! style tick (`run_pending`), from a dedicated thread (`run_blocking`) or as
//! an async task (`run`).

use crate::error::{ProtocolError, Result};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Work handed to an execution context
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Schedules tasks to run later on one designated thread.
pub trait ExecutionContext: Send + Sync {
    /// Queue `task` without waiting for it to run.
    ///
    /// # Errors
    /// `ExecutorClosed` when the context no longer accepts work.
    fn enqueue(&self, task: Task) -> Result<()>;
}

/// Sending half of a work queue
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<Task>,
}

/// Receiving half of a work queue, owned by the execution thread
#[derive(Debug)]
pub struct WorkQueueRunner {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl WorkQueue {
    pub fn new() -> (Self, WorkQueueRunner) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, WorkQueueRunner { rx })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl ExecutionContext for WorkQueue {
    fn enqueue(&self, task: Task) -> Result<()> {
        self.tx.send(task).map_err(|_| ProtocolError::ExecutorClosed)
    }
}

impl WorkQueueRunner {
    /// Run the tasks queued before this call and return how many ran.
    ///
    /// Tasks queued by those tasks wait for the next call.
    pub fn run_pending(&mut self) -> usize {
        let queued = self.rx.len();
        let mut ran = 0;
        while ran < queued {
            let Ok(task) = self.rx.try_recv() else {
                break;
            };
            task();
            ran += 1;
        }
        if ran > 0 {
            trace!(tasks = ran, "Drained work queue");
        }
        ran
    }

    /// Run tasks until every `WorkQueue` handle is dropped.
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            task();
        }
        debug!("Work queue closed");
    }

    /// Blocking variant of `run` for a dedicated std thread.
    ///
    /// Must not be called from inside an async runtime.
    pub fn run_blocking(mut self) {
        while let Some(task) = self.rx.blocking_recv() {
            task();
        }
        debug!("Work queue closed");
    }

    /// Stop accepting new tasks. Already queued tasks can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn tasks_run_only_when_drained() {
        let (queue, mut runner) = WorkQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            queue
                .enqueue(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(runner.run_pending(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(runner.run_pending(), 0);
    }

    #[test]
    fn requeued_tasks_wait_for_the_next_drain() {
        fn requeue(queue: WorkQueue, counter: Arc<AtomicUsize>) -> Task {
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let next = requeue(queue.clone(), Arc::clone(&counter));
                queue.enqueue(next).unwrap();
            })
        }

        let (queue, mut runner) = WorkQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        queue
            .enqueue(requeue(queue.clone(), Arc::clone(&counter)))
            .unwrap();

        assert_eq!(runner.run_pending(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(runner.run_pending(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn closed_queue_rejects_work() {
        let (queue, mut runner) = WorkQueue::new();
        runner.close();
        assert!(matches!(
            queue.enqueue(Box::new(|| {})),
            Err(ProtocolError::ExecutorClosed)
        ));
    }

    #[tokio::test]
    async fn async_runner_stops_when_handles_drop() {
        let (queue, runner) = WorkQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        queue
            .enqueue(Box::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        drop(queue);
        runner.run().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

//! Transpile worker pool
//!
//! CPU-bound transforms run on dedicated worker threads. The calling side
//! posts a request tagged with a unique id and blocks on the reply with a
//! deadline; a worker that misses the deadline is detached and replaced, and
//! the request fails with `TranspileTimeout`. Requests are serialized per
//! worker; distinct workers run in parallel.

use crate::error::{Error, Result};
use crate::transpiler::{transform, TranspileOutput, TranspileRequest};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Per-request deadline
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

type Executor = Arc<dyn Fn(&TranspileRequest) -> Result<TranspileOutput> + Send + Sync>;

enum WorkerMessage {
    Job {
        id: u64,
        request: TranspileRequest,
        reply: Sender<JobReply>,
    },
    Shutdown,
}

struct JobReply {
    id: u64,
    /// Worker-side errors travel as plain messages and are rehydrated with
    /// the file path on the calling side.
    result: std::result::Result<TranspileOutput, String>,
}

struct WorkerHandle {
    sender: Sender<WorkerMessage>,
    thread: Option<JoinHandle<()>>,
}

/// Pool of transpile workers
pub struct TranspilerPool {
    workers: Mutex<Vec<WorkerHandle>>,
    executor: Executor,
    deadline: Duration,
    next_id: AtomicU64,
    next_worker: AtomicUsize,
}

impl TranspilerPool {
    /// Pool of `worker_count` threads running the standard pipeline.
    pub fn new(worker_count: usize) -> Self {
        Self::with_executor(worker_count, DEFAULT_DEADLINE, Arc::new(transform))
    }

    /// Pool with an injected executor and deadline (tests, custom passes).
    pub fn with_executor(worker_count: usize, deadline: Duration, executor: Executor) -> Self {
        let count = worker_count.max(1);
        let workers = (0..count)
            .map(|index| spawn_worker(index, Arc::clone(&executor)))
            .collect();
        Self {
            workers: Mutex::new(workers),
            executor,
            deadline,
            next_id: AtomicU64::new(1),
            next_worker: AtomicUsize::new(0),
        }
    }

    /// Run one request to completion, blocking up to the deadline.
    pub fn transpile(&self, request: TranspileRequest) -> Result<TranspileOutput> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let file = request.file_path.clone();
        let (reply_tx, reply_rx) = mpsc::channel();

        let worker_index = {
            let workers = self.workers.lock().expect("worker table poisoned");
            let index = self.next_worker.fetch_add(1, Ordering::SeqCst) % workers.len();
            let job = WorkerMessage::Job {
                id,
                request,
                reply: reply_tx,
            };
            if workers[index].sender.send(job).is_err() {
                return Err(Error::internal("transpile worker hung up"));
            }
            index
        };

        match reply_rx.recv_timeout(self.deadline) {
            Ok(reply) => {
                debug_assert_eq!(reply.id, id);
                reply
                    .result
                    .map_err(|message| Error::transpile(file, message))
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(file = %file, "transpile deadline exceeded; replacing worker");
                self.replace_worker(worker_index);
                Err(Error::TranspileTimeout {
                    file,
                    deadline_ms: self.deadline.as_millis() as u64,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::internal("transpile worker dropped the request"))
            }
        }
    }

    /// Detach a wedged worker and spawn a fresh one in its slot.
    fn replace_worker(&self, index: usize) {
        let mut workers = self.workers.lock().expect("worker table poisoned");
        let fresh = spawn_worker(index, Arc::clone(&self.executor));
        let old = std::mem::replace(&mut workers[index], fresh);
        // The old thread may be stuck mid-job; dropping its sender lets it
        // exit when (if) it returns, without blocking the caller.
        drop(old.sender);
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().expect("worker table poisoned").len()
    }
}

impl Drop for TranspilerPool {
    fn drop(&mut self) {
        let mut workers = self.workers.lock().expect("worker table poisoned");
        for worker in workers.iter() {
            let _ = worker.sender.send(WorkerMessage::Shutdown);
        }
        for worker in workers.iter_mut() {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

fn spawn_worker(index: usize, executor: Executor) -> WorkerHandle {
    let (tx, rx) = mpsc::channel::<WorkerMessage>();
    let thread = thread::Builder::new()
        .name(format!("transpile-worker-{}", index))
        .spawn(move || {
            while let Ok(message) = rx.recv() {
                match message {
                    WorkerMessage::Job { id, request, reply } => {
                        let outcome =
                            catch_unwind(AssertUnwindSafe(|| executor(&request)));
                        let result = match outcome {
                            Ok(Ok(output)) => Ok(output),
                            Ok(Err(err)) => Err(err.to_string()),
                            Err(panic) => Err(panic_message(panic)),
                        };
                        // The caller may have timed out and gone away
                        let _ = reply.send(JobReply { id, result });
                    }
                    WorkerMessage::Shutdown => break,
                }
            }
        })
        .expect("failed to spawn transpile worker");
    WorkerHandle {
        sender: tx,
        thread: Some(thread),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("worker panicked: {}", s)
    } else {
        "worker panicked".to_string()
    }
}

#![forbid(unsafe_code)]

//! Dispatchers: single-consumer execution contexts a binding can marshal its
//! writes onto.
//!
//! A binding captures its dispatcher once, at bind time. Every apply
//! operation is then handed to [`Dispatcher::enqueue`] instead of running on
//! the notifying thread.
//!
//! # Contract
//!
//! 1. `enqueue` never blocks on the job's completion.
//! 2. Jobs run later, one at a time, on one consistent consumer.
//! 3. Jobs run in enqueue order (FIFO). Ordering is a property of enqueue
//!    time, not of how long each job takes.
//!
//! Two implementations ship with the crate:
//!
//! - [`WorkerDispatcher`]: a dedicated named thread draining a channel.
//! - [`QueueDispatcher`]: a queue drained by its owner, for event loops that
//!   already own a thread (call [`QueueDispatcher::run_pending`] each tick).

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::event::lock;

/// A unit of work marshaled onto a dispatcher. State travels in the closure.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single-consumer, FIFO execution context.
pub trait Dispatcher: Send + Sync + 'static {
    /// Queue `job` to run later on this dispatcher's consumer.
    fn enqueue(&self, job: Job);
}

enum Message {
    Run(Job),
    Flush(mpsc::Sender<()>),
}

/// Dispatcher backed by a dedicated worker thread.
///
/// A job that panics is caught and logged; the worker keeps draining.
/// Dropping the dispatcher closes the queue, lets already-queued jobs finish
/// and joins the thread.
pub struct WorkerDispatcher {
    name: String,
    tx: Mutex<Option<mpsc::Sender<Message>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerDispatcher {
    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(name: impl Into<String>) -> io::Result<Arc<Self>> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Message>();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&thread_name, &rx))?;
        tracing::debug!(dispatcher = %name, "dispatcher started");
        Ok(Arc::new(Self {
            name,
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until every job enqueued before this call has run.
    ///
    /// Returns immediately if the dispatcher has shut down or is called from
    /// the worker thread itself.
    pub fn flush(&self) {
        if self.is_worker_thread() {
            return;
        }
        let (done_tx, done_rx) = mpsc::channel();
        let sent = lock(&self.tx)
            .as_ref()
            .is_some_and(|tx| tx.send(Message::Flush(done_tx)).is_ok());
        if sent {
            let _ = done_rx.recv();
        }
    }

    fn is_worker_thread(&self) -> bool {
        lock(&self.handle)
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }
}

fn worker_loop(name: &str, rx: &mpsc::Receiver<Message>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            Message::Run(job) => {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::warn!(dispatcher = %name, "dispatched job panicked");
                }
            }
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!(dispatcher = %name, "dispatcher stopped");
}

impl Dispatcher for WorkerDispatcher {
    fn enqueue(&self, job: Job) {
        if let Some(tx) = lock(&self.tx).as_ref() {
            // A closed channel means shutdown; the job is dropped.
            let _ = tx.send(Message::Run(job));
        }
    }
}

impl Drop for WorkerDispatcher {
    fn drop(&mut self) {
        lock(&self.tx).take();
        let Some(handle) = lock(&self.handle).take() else {
            return;
        };
        // The last Arc may be dropped by a job running on the worker itself.
        if handle.thread().id() != thread::current().id() {
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for WorkerDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerDispatcher")
            .field("name", &self.name)
            .field("running", &lock(&self.tx).is_some())
            .finish()
    }
}

/// Dispatcher whose queue is drained explicitly by its owner.
///
/// The thread calling [`run_pending`](Self::run_pending) is the consumer.
#[derive(Default)]
pub struct QueueDispatcher {
    queue: Mutex<VecDeque<Job>>,
}

impl QueueDispatcher {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Run queued jobs in FIFO order until the queue is empty, including jobs
    /// enqueued by the jobs themselves. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // The lock is released before the job runs so jobs may enqueue.
            let Some(job) = lock(&self.queue).pop_front() else {
                return ran;
            };
            job();
            ran += 1;
        }
    }
}

impl Dispatcher for QueueDispatcher {
    fn enqueue(&self, job: Job) {
        lock(&self.queue).push_back(job);
    }
}

impl fmt::Debug for QueueDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueDispatcher")
            .field("pending", &self.pending())
            .finish()
    }
}

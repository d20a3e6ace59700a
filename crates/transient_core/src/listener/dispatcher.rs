//! Background delivery of async entity events.
//!
//! Events are queued on a channel and delivered by one worker thread, in
//! queue order, after the flush that produced them returned. Errors returned
//! by listeners are logged and dropped.

use crate::listener::{EntityEvent, EntityListener};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

enum Job {
    Deliver {
        listener: Arc<dyn EntityListener>,
        event: EntityEvent,
    },
    Barrier(Sender<()>),
}

/// Worker thread that delivers async entity events.
pub(crate) struct AsyncDispatcher {
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    warn_threshold: usize,
}

impl AsyncDispatcher {
    /// Starts the worker thread.
    pub(crate) fn start(warn_threshold: usize) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = Arc::clone(&pending);

        let worker = thread::Builder::new()
            .name("transient-async-listeners".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Deliver { listener, event } => {
                            if let Err(err) = listener.on_event(&event) {
                                tracing::warn!(
                                    entity = %event.description.entity,
                                    error = %err,
                                    "async entity listener failed"
                                );
                            }
                            worker_pending.fetch_sub(1, Ordering::AcqRel);
                        }
                        Job::Barrier(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                tracing::trace!("async dispatcher stopped");
            })?;

        Ok(Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            pending,
            warn_threshold,
        })
    }

    /// Queues one event. Returns false if the dispatcher has stopped.
    pub(crate) fn submit(&self, listener: Arc<dyn EntityListener>, event: EntityEvent) -> bool {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return false;
        };
        let depth = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        if sender.send(Job::Deliver { listener, event }).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        if depth == self.warn_threshold {
            tracing::warn!(depth, "async listener queue is backing up");
        }
        true
    }

    /// Returns the number of queued, undelivered events.
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Blocks until every event queued before this call was delivered.
    pub(crate) fn wait_idle(&self) {
        let (done_tx, done_rx) = mpsc::channel();
        let sent = match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Job::Barrier(done_tx)).is_ok(),
            None => false,
        };
        if sent {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for AsyncDispatcher {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain the queue and exit.
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                tracing::warn!("async dispatcher thread panicked");
            }
        }
    }
}

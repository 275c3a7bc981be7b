//! Bounded job queue and busy-set
//!
//! Atomicity contract: [`JobQueue::submit`] checks the busy-set, marks the
//! user busy and attempts the non-blocking enqueue while holding the busy-set
//! lock, rolling the mark back if the enqueue fails. The mark records the job
//! id, so a finishing job only clears its own mark
//! ([`JobQueue::release_job`]) and never one set by a later submission.
//! Both hold for any number of workers.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::Job;
use crate::UserId;

/// Why a job could not be enqueued
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The user already has a job in flight
    #[error("user already has a job in flight")]
    Busy,
    /// The queue is at capacity
    #[error("job queue is full")]
    Full,
    /// The queue has been shut down
    #[error("job queue is closed")]
    Closed,
}

enum QueueItem {
    Job(Box<Job>),
    Shutdown,
}

/// Bounded FIFO of jobs plus the set of users with an unfinished job
pub struct JobQueue {
    tx: mpsc::Sender<QueueItem>,
    rx: tokio::sync::Mutex<mpsc::Receiver<QueueItem>>,
    busy: Mutex<HashMap<UserId, Uuid>>,
    capacity: usize,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` jobs (minimum one)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            busy: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Maximum number of queued items
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued, not yet dequeued items
    #[must_use]
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Whether nothing is waiting in the queue
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn busy_set(&self) -> MutexGuard<'_, HashMap<UserId, Uuid>> {
        self.busy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the user has a job in flight
    #[must_use]
    pub fn is_busy(&self, user_id: UserId) -> bool {
        self.busy_set().contains_key(&user_id)
    }

    /// Number of users with a job in flight
    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.busy_set().len()
    }

    /// Enqueue a job without blocking, marking its user busy.
    ///
    /// # Errors
    ///
    /// `Busy` if the user already has a job in flight, `Full` at capacity,
    /// `Closed` after shutdown. The busy-set is unchanged on error.
    pub fn submit(&self, job: Job) -> Result<(), EnqueueError> {
        let user_id = job.user_id;
        let mut busy = self.busy_set();
        if busy.contains_key(&user_id) {
            return Err(EnqueueError::Busy);
        }
        busy.insert(user_id, job.id);

        match self.tx.try_send(QueueItem::Job(Box::new(job))) {
            Ok(()) => {
                debug!(user_id, queued = self.len(), "Job enqueued");
                Ok(())
            }
            Err(e) => {
                busy.remove(&user_id);
                Err(match e {
                    TrySendError::Full(_) => EnqueueError::Full,
                    TrySendError::Closed(_) => EnqueueError::Closed,
                })
            }
        }
    }

    /// Remove the user from the busy-set, whichever job marked them; returns
    /// whether they were in it
    pub fn release(&self, user_id: UserId) -> bool {
        self.busy_set().remove(&user_id).is_some()
    }

    /// Remove the user's mark only if it was set by `job_id`
    pub fn release_job(&self, user_id: UserId, job_id: Uuid) -> bool {
        let mut busy = self.busy_set();
        if busy.get(&user_id) == Some(&job_id) {
            busy.remove(&user_id);
            true
        } else {
            false
        }
    }

    /// Wait for the next job; `None` once a shutdown sentinel is received
    pub async fn dequeue(&self) -> Option<Job> {
        let item = self.rx.lock().await.recv().await;
        match item {
            Some(QueueItem::Job(job)) => Some(*job),
            Some(QueueItem::Shutdown) | None => None,
        }
    }

    /// Enqueue `workers` shutdown sentinels behind the pending jobs.
    ///
    /// Waits for free slots, so every job queued before the call is still
    /// processed.
    pub async fn shutdown(&self, workers: usize) {
        for _ in 0..workers {
            if self.tx.send(QueueItem::Shutdown).await.is_err() {
                warn!("Job queue closed before shutdown sentinel could be sent");
                return;
            }
        }
    }
}

//! Bounded task queue between the producer and the consumer pool.
//!
//! A tokio `mpsc` channel provides the ordering and the capacity bound; the
//! receiving half is shared by every worker behind an async mutex. Closing
//! drops the only sender, so workers drain what is buffered and then see
//! `None`.

use crate::error::{BenchError, BenchResult};
use crate::task::Task;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Bounded FIFO of [`Task`]s.
#[derive(Debug)]
pub struct TaskQueue {
    capacity: usize,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Task>>,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
}

impl TaskQueue {
    /// Create a queue holding at most `capacity` tasks (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            capacity,
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(rx),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add a task, waiting while the queue is full.
    ///
    /// Enqueueing after [`close`](Self::close) is a protocol violation and
    /// returns [`BenchError::QueueClosed`].
    pub async fn enqueue(&self, mut task: Task) -> BenchResult<()> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(sender) = sender else {
            tracing::error!(kind = %task.kind(), "Enqueue on a closed task queue");
            return Err(BenchError::QueueClosed);
        };

        task.stamp();
        sender
            .send(task)
            .await
            .map_err(|_| BenchError::QueueClosed)?;
        self.enqueued.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Close the queue. Must be called exactly once, by the producer.
    pub fn close(&self) -> BenchResult<()> {
        let taken = self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        match taken {
            Some(_) => {
                tracing::debug!(enqueued = self.enqueued(), "Task queue closed");
                Ok(())
            }
            None => {
                tracing::error!("Task queue closed twice");
                Err(BenchError::QueueAlreadyClosed)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    /// Next task, or `None` once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<Task> {
        self.dequeue_with(|_| async {}).await.map(|(task, ())| task)
    }

    /// Dequeue a task and resolve `admit` for it before the next consumer may
    /// dequeue.
    ///
    /// Whatever `admit` acquires is therefore acquired in FIFO order of the
    /// tasks, regardless of how workers are scheduled afterwards.
    pub async fn dequeue_with<F, Fut, T>(&self, admit: F) -> Option<(Task, T)>
    where
        F: FnOnce(&Task) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut rx = self.receiver.lock().await;
        let task = rx.recv().await?;
        self.dequeued.fetch_add(1, Ordering::AcqRel);
        let admitted = admit(&task).await;
        drop(rx);
        Some((task, admitted))
    }

    /// Tasks successfully enqueued so far.
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Acquire)
    }

    /// Tasks handed to consumers so far.
    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Acquire)
    }

    /// Approximate number of buffered tasks.
    pub fn len(&self) -> usize {
        self.enqueued().saturating_sub(self.dequeued()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

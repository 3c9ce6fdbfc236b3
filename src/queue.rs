//! # Task Queue
//!
//! Bounded FIFO of pending analysis tasks. Producers never block: a full queue
//! drops the task. Workers block on the receiving side until the queue is closed.

use std::sync::RwLock;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::task::AnalysisTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    Full,
    Closed,
}

pub struct TaskQueue {
    sender: RwLock<Option<Sender<AnalysisTask>>>,
    receiver: Receiver<AnalysisTask>,
    capacity: usize,
}

impl TaskQueue {
    /// Create a queue holding at most `capacity` tasks.
    ///
    /// With a capacity of zero a task is only accepted when a worker is already
    /// parked waiting for one.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender: RwLock::new(Some(sender)),
            receiver,
            capacity,
        }
    }

    /// Append `task` without blocking. Returns `false` if it was dropped.
    pub fn enqueue(&self, task: AnalysisTask) -> bool {
        self.try_enqueue(task).is_ok()
    }

    pub fn try_enqueue(&self, task: AnalysisTask) -> Result<(), EnqueueError> {
        let guard = self.sender.read().map_err(|_| EnqueueError::Closed)?;
        let sender = guard.as_ref().ok_or(EnqueueError::Closed)?;
        sender.try_send(task).map_err(|err| match err {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Disconnected(_) => EnqueueError::Closed,
        })
    }

    /// Receiving handle for a worker. Iteration ends once the queue is closed and drained.
    pub fn receiver(&self) -> Receiver<AnalysisTask> {
        self.receiver.clone()
    }

    /// Stop accepting tasks. Tasks already queued remain available to workers.
    pub fn close(&self) {
        match self.sender.write() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().map(|guard| guard.is_none()).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

//! Priority-ordered holding structure for deferred calls.
//!
//! Four FIFO lanes, one per [`Priority`]. Dequeue scans
//! Critical → High → Medium → Low and pops the first non-empty lane's head,
//! so ordering is strict priority with FIFO tie-break within a lane.

pub mod dispatcher;

use crate::types::Priority;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::Notify;

/// A deferred call. Owned exclusively by the queue until dequeued.
#[derive(Debug)]
pub struct QueuedCall<T> {
    pub payload: T,
    pub priority: Priority,
    pub enqueued_at: Instant,
    /// Times this call has been re-queued after a refused admission.
    pub retry_count: u32,
}

/// Per-lane depth snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStatus {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl QueueStatus {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

pub struct RequestQueue<T> {
    lanes: Mutex<[VecDeque<QueuedCall<T>>; 4]>,
    notify: Notify,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestQueue<T> {
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new([
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ]),
            notify: Notify::new(),
        }
    }

    pub fn enqueue(&self, payload: T, priority: Priority) {
        self.push(QueuedCall {
            payload,
            priority,
            enqueued_at: Instant::now(),
            retry_count: 0,
        });
    }

    /// Put a previously dequeued call back, preserving its lane and retry
    /// count. It joins the back of the lane so FIFO order holds for calls
    /// enqueued in the meantime.
    pub fn requeue(&self, call: QueuedCall<T>) {
        self.push(call);
    }

    fn push(&self, call: QueuedCall<T>) {
        {
            let mut lanes = self.lanes.lock().unwrap();
            lanes[call.priority.lane()].push_back(call);
        }
        self.notify.notify_one();
    }

    /// Pop the highest-priority call, if any.
    pub fn dequeue(&self) -> Option<QueuedCall<T>> {
        let mut lanes = self.lanes.lock().unwrap();
        lanes.iter_mut().find_map(|lane| lane.pop_front())
    }

    /// Pop the highest-priority call, waiting for an enqueue if empty.
    pub async fn dequeue_or_wait(&self) -> QueuedCall<T> {
        loop {
            let notified = self.notify.notified();
            if let Some(call) = self.dequeue() {
                return call;
            }
            notified.await;
        }
    }

    pub fn status(&self) -> QueueStatus {
        let lanes = self.lanes.lock().unwrap();
        QueueStatus {
            critical: lanes[0].len(),
            high: lanes[1].len(),
            medium: lanes[2].len(),
            low: lanes[3].len(),
        }
    }

    pub fn len(&self) -> usize {
        self.lanes.lock().unwrap().iter().map(|l| l.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Background dispatch loop draining the request queue.
//!
//! One long-lived task pulls the highest-priority call, hands it to the
//! orchestrator, and either delivers the result through the call's reply
//! channel or re-queues it when admission was refused. The loop idles on
//! the queue's notifier when empty and stops on the handle's shutdown
//! signal; an in-flight backend call still runs to completion or timeout.

use crate::orchestrator::{Orchestrator, RunOptions};
use crate::types::{ContextMap, GenerationResponse};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// A deferred generation call carried through the queue.
pub struct DispatchJob {
    pub prompt: String,
    pub context: ContextMap,
    pub options: RunOptions,
    pub(crate) reply: Option<oneshot::Sender<Result<GenerationResponse>>>,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Times a refused call is re-queued before its `QuotaExceeded` error
    /// is delivered to the caller.
    pub max_requeues: u32,
    /// Upper bound on the pause after a refused admission, so the loop
    /// does not spin on a saturated resource.
    pub refusal_backoff_cap: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_requeues: 5,
            refusal_backoff_cap: Duration::from_secs(5),
        }
    }
}

/// Owner handle for the dispatch loop.
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Signal the loop to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub(crate) fn spawn(orchestrator: Arc<Orchestrator>, config: DispatcherConfig) -> DispatcherHandle {
    let (tx, mut rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        tracing::debug!("dispatcher started");
        loop {
            let mut call = tokio::select! {
                changed = rx.changed() => {
                    // A closed channel means the handle was dropped; stop too.
                    if changed.is_err() || *rx.borrow() {
                        break;
                    }
                    continue;
                }
                call = orchestrator.queue().dequeue_or_wait() => call,
            };

            let result = orchestrator
                .generate_with(&call.payload.prompt, &call.payload.context, &call.payload.options)
                .await;

            match result {
                Err(Error::QuotaExceeded {
                    resource,
                    retry_after,
                }) if call.retry_count < config.max_requeues => {
                    call.retry_count += 1;
                    let pause = retry_after.min(config.refusal_backoff_cap);
                    tracing::debug!(
                        resource = %resource,
                        requeues = call.retry_count,
                        pause_ms = pause.as_millis() as u64,
                        "admission refused, re-queueing call"
                    );
                    orchestrator.queue().requeue(call);
                    // Let the refused resource recover before draining again.
                    tokio::select! {
                        changed = rx.changed() => {
                            if changed.is_err() || *rx.borrow() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
                result => {
                    if let Err(ref err) = result {
                        tracing::warn!(error = %err, "queued call finished with error");
                    }
                    if let Some(reply) = call.payload.reply.take() {
                        // The caller may have dropped its handle; that's fine.
                        let _ = reply.send(result);
                    }
                }
            }
        }
        tracing::debug!("dispatcher stopped");
    });

    DispatcherHandle { shutdown: tx, task }
}

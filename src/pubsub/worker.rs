//! Per-subscription delivery task.
//!
//! ```text
//!  Running ──(message)──► handler ──► Running
//!     │
//!     ├──(terminate)──► Draining ──(try_recv until empty)──► Done
//!     └──(queue closed)────────────────────────────────────► Done
//! ```
//!
//! Every message that reached the queue before the terminate signal is handed
//! to the handler before the task exits.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{stats::Counters, MessageHandler};

pub(crate) struct Worker<M: Send + 'static> {
    id: u64,
    subject: Arc<str>,
    queue: mpsc::UnboundedReceiver<M>,
    backlog: Arc<AtomicUsize>,
    terminate: CancellationToken,
    handler: Arc<dyn MessageHandler<M>>,
    counters: Arc<Counters>,
}

impl<M: Send + 'static> Worker<M> {
    pub(crate) fn new(
        id: u64,
        subject: Arc<str>,
        queue: mpsc::UnboundedReceiver<M>,
        backlog: Arc<AtomicUsize>,
        terminate: CancellationToken,
        handler: Arc<dyn MessageHandler<M>>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            id,
            subject,
            queue,
            backlog,
            terminate,
            handler,
            counters,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.terminate.cancelled() => break,
                next = self.queue.recv() => match next {
                    Some(message) => self.deliver(message).await,
                    None => {
                        debug!(
                            subscription_id = self.id,
                            subject = %self.subject,
                            "Queue closed, worker done"
                        );
                        return;
                    }
                },
            }
        }

        let mut drained = 0usize;
        while let Ok(message) = self.queue.try_recv() {
            self.deliver(message).await;
            drained += 1;
        }
        debug!(
            subscription_id = self.id,
            subject = %self.subject,
            drained,
            "Worker drained and stopped"
        );
    }

    async fn deliver(
        &self,
        message: M,
    ) {
        self.backlog.fetch_sub(1, Ordering::AcqRel);
        let fut = self.handler.handle(message);
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(()) => Counters::bump(&self.counters.delivered),
            Err(panic) => {
                Counters::bump(&self.counters.handler_panics);
                error!(
                    subscription_id = self.id,
                    subject = %self.subject,
                    panic = %panic_message(panic.as_ref()),
                    "Message handler panicked"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Weak,
};

use tokio::sync::mpsc::{self, error::SendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::broker::Inner;

/// State shared between the registry, the handle and the delivery worker.
pub(crate) struct Shared<M> {
    pub(crate) id: u64,
    pub(crate) subject: Arc<str>,
    queue: mpsc::UnboundedSender<M>,
    /// Messages enqueued but not yet taken by the worker.
    backlog: Arc<AtomicUsize>,
    terminate: CancellationToken,
    /// Set by the first caller of [`Shared::terminate`].
    fired: AtomicBool,
}

impl<M> Shared<M> {
    pub(crate) fn new(
        id: u64,
        subject: Arc<str>,
        queue: mpsc::UnboundedSender<M>,
        backlog: Arc<AtomicUsize>,
        terminate: CancellationToken,
    ) -> Self {
        Self {
            id,
            subject,
            queue,
            backlog,
            terminate,
            fired: AtomicBool::new(false),
        }
    }

    /// Non-blocking enqueue onto this subscriber's queue. Returns the backlog
    /// including `message`.
    pub(crate) fn offer(
        &self,
        message: M,
    ) -> Result<usize, SendError<M>> {
        // Counted before the send so the worker never decrements below zero.
        let depth = self.backlog.fetch_add(1, Ordering::AcqRel) + 1;
        match self.queue.send(message) {
            Ok(()) => Ok(depth),
            Err(e) => {
                self.backlog.fetch_sub(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }

    pub(crate) fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }

    /// Fires the terminate signal. Only the first call has an effect, no
    /// matter whether `unsubscribe` or `close` gets here first.
    ///
    /// Returns `true` if this call fired the signal.
    pub(crate) fn terminate(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.terminate.cancel();
        true
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// A live registration of interest in one subject.
///
/// Dropping the handle does **not** unsubscribe; call
/// [`Subscription::unsubscribe`] (or close the broker) to stop delivery.
pub struct Subscription<M> {
    shared: Arc<Shared<M>>,
    broker: Weak<Inner<M>>,
}

impl<M> Subscription<M> {
    pub(crate) fn new(
        shared: Arc<Shared<M>>,
        broker: Weak<Inner<M>>,
    ) -> Self {
        Self { shared, broker }
    }

    /// Broker-unique id of this subscription.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Subject this subscription listens on.
    pub fn subject(&self) -> &str {
        &self.shared.subject
    }

    /// `false` once the subscription has been unsubscribed or its broker
    /// closed.
    pub fn is_active(&self) -> bool {
        !self.shared.is_terminated()
    }

    /// Messages queued for this subscription that its handler has not
    /// started on yet.
    pub fn backlog(&self) -> usize {
        self.shared.backlog()
    }

    /// Removes this subscription from the broker and signals its worker.
    ///
    /// Messages already queued are still delivered before the worker exits;
    /// messages published afterwards are not. Calling it again, or after the
    /// broker was closed, does nothing.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.broker.upgrade() {
            inner.remove(&self.shared);
        }
        if self.shared.terminate() {
            debug!(
                subscription_id = self.shared.id,
                subject = %self.shared.subject,
                "Unsubscribed"
            );
        }
    }
}

impl<M> std::fmt::Debug for Subscription<M> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.shared.id)
            .field("subject", &self.shared.subject)
            .field("active", &self.is_active())
            .field("backlog", &self.backlog())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> (Shared<u8>, mpsc::UnboundedReceiver<u8>, CancellationToken) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let shared = Shared::new(7, Arc::from("s"), tx, Arc::default(), token.clone());
        (shared, rx, token)
    }

    /// The terminate signal fires exactly once, however many callers race.
    #[test]
    fn test_terminate_fires_once() {
        let (shared, _rx, token) = shared();
        assert!(!shared.is_terminated());
        assert!(shared.terminate());
        assert!(!shared.terminate());
        assert!(token.is_cancelled());
        assert!(shared.is_terminated());
    }

    #[test]
    fn test_terminate_concurrently_has_one_winner() {
        let (shared, _rx, _token) = shared();
        let shared = Arc::new(shared);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = shared.clone();
                std::thread::spawn(move || s.terminate())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|fired| *fired)
            .count();
        assert_eq!(winners, 1);
    }

    /// The queue never refuses a message while the worker is alive.
    #[test]
    fn test_offer_never_rejects_a_burst() {
        let (shared, mut rx, _token) = shared();
        for n in 0..100u8 {
            assert_eq!(shared.offer(n).unwrap(), n as usize + 1);
        }
        assert_eq!(shared.backlog(), 100);
        for n in 0..100u8 {
            assert_eq!(rx.try_recv().unwrap(), n);
        }
    }

    #[test]
    fn test_offer_to_closed_queue_keeps_backlog() {
        let (shared, rx, _token) = shared();
        drop(rx);
        assert!(shared.offer(1).is_err());
        assert_eq!(shared.backlog(), 0);
    }

    /// Unsubscribing a handle whose broker is gone only fires the signal.
    #[test]
    fn test_unsubscribe_without_broker() {
        let (shared, _rx, token) = shared();
        let sub = Subscription::new(Arc::new(shared), Weak::new());
        assert!(sub.is_active());
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert!(token.is_cancelled());
        assert_eq!(sub.id(), 7);
        assert_eq!(sub.subject(), "s");
    }
}

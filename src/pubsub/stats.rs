use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the broker and its delivery workers.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) published: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) unrouted: AtomicU64,
    pub(crate) handler_panics: AtomicU64,
    pub(crate) peak_backlog: AtomicU64,
}

/// Point-in-time copy of the broker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Accepted `publish` calls.
    pub published: u64,
    /// Handler invocations that returned normally.
    pub delivered: u64,
    /// Publishes to a subject that had no subscribers.
    pub unrouted: u64,
    /// Handler invocations that panicked.
    pub handler_panics: u64,
    /// Deepest single-subscriber queue seen so far.
    pub peak_backlog: u64,
    /// Subscriptions currently in the registry.
    pub active_subscriptions: usize,
}

impl Counters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn observe_backlog(
        &self,
        depth: usize,
    ) {
        self.peak_backlog.fetch_max(depth as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        active_subscriptions: usize,
    ) -> BrokerStats {
        BrokerStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            peak_backlog: self.peak_backlog.load(Ordering::Relaxed),
            active_subscriptions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let counters = Counters::default();
        Counters::bump(&counters.published);
        Counters::bump(&counters.published);
        counters.observe_backlog(3);
        counters.observe_backlog(1);

        let stats = counters.snapshot(4);
        assert_eq!(
            stats,
            BrokerStats {
                published: 2,
                peak_backlog: 3,
                active_subscriptions: 4,
                ..Default::default()
            }
        );
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

/// Traffic counters shared between a connection's send path and its receive
/// loops.
#[derive(Debug, Default)]
pub struct NetworkStats {
    reliable_sent: AtomicU64,
    reliable_received: AtomicU64,
    unreliable_sent: AtomicU64,
    unreliable_received: AtomicU64,
    unreliable_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// Point-in-time copy of [`NetworkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub reliable_sent: u64,
    pub reliable_received: u64,
    pub unreliable_sent: u64,
    pub unreliable_received: u64,
    pub unreliable_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl NetworkStats {
    pub fn record_reliable_sent(&self, bytes: usize) {
        self.reliable_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_reliable_received(&self, bytes: usize) {
        self.reliable_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_unreliable_sent(&self, bytes: usize) {
        self.unreliable_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_unreliable_received(&self, bytes: usize) {
        self.unreliable_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A datagram that was filtered out, failed to decode or could not be sent.
    pub fn record_unreliable_dropped(&self) {
        self.unreliable_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reliable_sent: self.reliable_sent.load(Ordering::Relaxed),
            reliable_received: self.reliable_received.load(Ordering::Relaxed),
            unreliable_sent: self.unreliable_sent.load(Ordering::Relaxed),
            unreliable_received: self.unreliable_received.load(Ordering::Relaxed),
            unreliable_dropped: self.unreliable_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = NetworkStats::default();
        stats.record_reliable_sent(10);
        stats.record_unreliable_sent(5);
        stats.record_unreliable_received(7);
        stats.record_unreliable_dropped();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.reliable_sent, 1);
        assert_eq!(snapshot.unreliable_sent, 1);
        assert_eq!(snapshot.bytes_sent, 15);
        assert_eq!(snapshot.bytes_received, 7);
        assert_eq!(snapshot.unreliable_dropped, 1);
    }
}

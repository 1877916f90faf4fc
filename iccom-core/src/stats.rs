//! Best-effort introspection counters.
//!
//! Per the design note: atomic where cheap, never adding synchronization
//! cost to the hot path to make them exactly consistent. A snapshot taken
//! while counters are updating concurrently may show a slightly
//! inconsistent picture — that's an accepted tradeoff, not a bug.

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine-wide statistics, incremented from the transport and dispatcher
/// contexts and readable from the consumer context at any time.
#[derive(Default)]
pub struct Stats {
    pub(crate) xfer_count: AtomicU64,
    pub(crate) xfer_bytes: AtomicU64,
    pub(crate) packages_xfered: AtomicU64,
    pub(crate) packages_ok: AtomicU64,
    pub(crate) packages_bad: AtomicU64,
    pub(crate) packages_duplicated: AtomicU64,
    pub(crate) packages_parse_failed: AtomicU64,
    pub(crate) packages_failed: AtomicU64,
    pub(crate) packets_received_ok: AtomicU64,
    pub(crate) messages_received_ok: AtomicU64,
    pub(crate) messages_ready: AtomicU64,
    pub(crate) consumer_bytes_received: AtomicU64,
}

/// A point-in-time copy of [`Stats`], safe to format or compare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Number of full-duplex exchanges performed with the transport.
    pub xfer_count: u64,
    /// Total bytes exchanged with the transport, both directions.
    pub xfer_bytes: u64,
    /// Packages handed to the transport (data xfers only).
    pub packages_xfered: u64,
    /// Packages received with a valid CRC.
    pub packages_ok: u64,
    /// Packages received with an invalid CRC.
    pub packages_bad: u64,
    /// Packages received with an already-seen id (suppressed, not redelivered).
    pub packages_duplicated: u64,
    /// Valid packages whose packet records failed to parse.
    pub packages_parse_failed: u64,
    /// Data half-xfers the transport itself reported as failed.
    pub packages_failed: u64,
    /// Packets successfully parsed out of received packages.
    pub packets_received_ok: u64,
    /// Messages that reached `finalized` in the RX store.
    pub messages_received_ok: u64,
    /// Messages currently sitting ready for a consumer to read.
    pub messages_ready: u64,
    /// Bytes a consumer has posted for transmission.
    pub consumer_bytes_received: u64,
    /// Current depth of the TX package queue.
    pub tx_queue_depth: usize,
}

impl Stats {
    fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Take a consistent-enough snapshot for display or tests.
    pub fn snapshot(&self, tx_queue_depth: usize) -> Snapshot {
        Snapshot {
            xfer_count: Self::load(&self.xfer_count),
            xfer_bytes: Self::load(&self.xfer_bytes),
            packages_xfered: Self::load(&self.packages_xfered),
            packages_ok: Self::load(&self.packages_ok),
            packages_bad: Self::load(&self.packages_bad),
            packages_duplicated: Self::load(&self.packages_duplicated),
            packages_parse_failed: Self::load(&self.packages_parse_failed),
            packages_failed: Self::load(&self.packages_failed),
            packets_received_ok: Self::load(&self.packets_received_ok),
            messages_received_ok: Self::load(&self.messages_received_ok),
            messages_ready: Self::load(&self.messages_ready),
            consumer_bytes_received: Self::load(&self.consumer_bytes_received),
            tx_queue_depth,
        }
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "iccom statistics:")?;
        writeln!(f, "  xfers:              {} ({} bytes)", self.xfer_count, self.xfer_bytes)?;
        writeln!(f, "  packages xfered:    {}", self.packages_xfered)?;
        writeln!(f, "  packages ok:        {}", self.packages_ok)?;
        writeln!(f, "  packages bad:       {}", self.packages_bad)?;
        writeln!(f, "  packages duplicate: {}", self.packages_duplicated)?;
        writeln!(f, "  packages parse-fail:{}", self.packages_parse_failed)?;
        writeln!(f, "  packages failed:    {}", self.packages_failed)?;
        writeln!(f, "  packets received:   {}", self.packets_received_ok)?;
        writeln!(f, "  messages received:  {}", self.messages_received_ok)?;
        writeln!(f, "  messages ready:     {}", self.messages_ready)?;
        writeln!(f, "  consumer bytes:     {}", self.consumer_bytes_received)?;
        write!(f, "  tx queue depth:     {}", self.tx_queue_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_stats_snapshot_to_zero() {
        let stats = Stats::default();
        let snap = stats.snapshot(1);
        assert_eq!(snap.xfer_count, 0);
        assert_eq!(snap.tx_queue_depth, 1);
    }

    #[test]
    fn counters_increment_independently() {
        let stats = Stats::default();
        stats.packages_ok.fetch_add(3, Ordering::Relaxed);
        stats.packages_bad.fetch_add(1, Ordering::Relaxed);
        let snap = stats.snapshot(0);
        assert_eq!(snap.packages_ok, 3);
        assert_eq!(snap.packages_bad, 1);
    }

    #[test]
    fn display_renders_without_panicking() {
        let stats = Stats::default();
        let text = stats.snapshot(2).to_string();
        assert!(text.contains("tx queue depth"));
    }
}

//! Link traffic counters.
//!
//! A `Stats` value is threaded through the link engine and updated on the
//! dispatcher and write paths; consumers (the CLI `monitor` verb) snapshot
//! and reset it on their own cadence.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
struct StatsInner {
    recv_count: AtomicU64,
    recv_size: AtomicU64,
    send_count: AtomicU64,
    send_size: AtomicU64,
    rssi_sum: AtomicI64,
    lqi_sum: AtomicU64,
}

/// Shared, cheaply clonable counter set.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    inner: Arc<StatsInner>,
}

/// A consistent-enough snapshot taken by [`Stats::take`]; counters reset to
/// zero at the snapshot point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub recv_count: u64,
    pub recv_size: u64,
    pub send_count: u64,
    pub send_size: u64,
    pub rssi_sum: i64,
    pub lqi_sum: u64,
}

impl StatsSnapshot {
    /// Mean RSSI over the snapshot window, 0 when idle.
    pub fn rssi_avg(&self) -> i64 {
        if self.recv_count == 0 {
            0
        } else {
            self.rssi_sum / self.recv_count as i64
        }
    }

    /// Mean LQI over the snapshot window, 0 when idle.
    pub fn lqi_avg(&self) -> u64 {
        if self.recv_count == 0 {
            0
        } else {
            self.lqi_sum / self.recv_count
        }
    }
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    pub fn record_recv(&self, size: usize, rssi: i8, lqi: u8) {
        self.inner.recv_count.fetch_add(1, Ordering::Relaxed);
        self.inner
            .recv_size
            .fetch_add(size as u64, Ordering::Relaxed);
        self.inner
            .rssi_sum
            .fetch_add(i64::from(rssi), Ordering::Relaxed);
        self.inner
            .lqi_sum
            .fetch_add(u64::from(lqi), Ordering::Relaxed);
    }

    pub fn record_send(&self, size: usize) {
        self.inner.send_count.fetch_add(1, Ordering::Relaxed);
        self.inner
            .send_size
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Snapshot all counters and reset them.
    pub fn take(&self) -> StatsSnapshot {
        StatsSnapshot {
            recv_count: self.inner.recv_count.swap(0, Ordering::Relaxed),
            recv_size: self.inner.recv_size.swap(0, Ordering::Relaxed),
            send_count: self.inner.send_count.swap(0, Ordering::Relaxed),
            send_size: self.inner.send_size.swap(0, Ordering::Relaxed),
            rssi_sum: self.inner.rssi_sum.swap(0, Ordering::Relaxed),
            lqi_sum: self.inner.lqi_sum.swap(0, Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_resets_counters() {
        let stats = Stats::new();
        stats.record_recv(100, -60, 10);
        stats.record_recv(50, -70, 20);
        stats.record_send(25);

        let snap = stats.take();
        assert_eq!(snap.recv_count, 2);
        assert_eq!(snap.recv_size, 150);
        assert_eq!(snap.send_count, 1);
        assert_eq!(snap.send_size, 25);
        assert_eq!(snap.rssi_avg(), -65);
        assert_eq!(snap.lqi_avg(), 15);

        assert_eq!(stats.take(), StatsSnapshot::default());
    }

    #[test]
    fn idle_averages_are_zero() {
        let snap = Stats::new().take();
        assert_eq!(snap.rssi_avg(), 0);
        assert_eq!(snap.lqi_avg(), 0);
    }
}

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics for observability
///
/// Counters and per-shard gauges for monitoring gateway health. Use
/// `snapshot()` for a point-in-time view, or the individual getters.
#[derive(Debug, Default)]
pub struct Metrics {
    connections_total: AtomicU64,
    reconnections_total: AtomicU64,
    resumes_total: AtomicU64,
    zombie_reconnects_total: AtomicU64,
    heartbeats_sent_total: AtomicU64,
    frames_sent_total: AtomicU64,
    events_dispatched_total: AtomicU64,
    errors_total: AtomicU64,

    /// Per-shard status
    shard_status: RwLock<Vec<ShardStatus>>,
}

/// Status of a single shard
#[derive(Debug, Clone)]
pub struct ShardStatus {
    /// Shard identifier
    pub shard_id: usize,
    /// Whether the shard currently holds a live websocket
    pub is_connected: bool,
    /// Duration since the last successful connect (None if never connected)
    pub time_since_connected: Option<Duration>,
    #[doc(hidden)]
    pub(crate) last_connected_at: Option<Instant>,
}

impl Default for ShardStatus {
    fn default() -> Self {
        Self {
            shard_id: 0,
            is_connected: false,
            time_since_connected: None,
            last_connected_at: None,
        }
    }
}

impl ShardStatus {
    fn snapshot(&self) -> ShardStatus {
        ShardStatus {
            shard_id: self.shard_id,
            is_connected: self.is_connected,
            time_since_connected: self.last_connected_at.map(|t| t.elapsed()),
            last_connected_at: self.last_connected_at,
        }
    }
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Get total websocket connections established
    pub fn connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Get total reconnections (close-triggered)
    pub fn reconnections(&self) -> u64 {
        self.reconnections_total.load(Ordering::Relaxed)
    }

    /// Get total session resumes attempted
    pub fn resumes(&self) -> u64 {
        self.resumes_total.load(Ordering::Relaxed)
    }

    /// Get total zombie-triggered reconnects
    pub fn zombie_reconnects(&self) -> u64 {
        self.zombie_reconnects_total.load(Ordering::Relaxed)
    }

    /// Get total heartbeat frames sent
    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent_total.load(Ordering::Relaxed)
    }

    /// Get total outbound frames sent
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent_total.load(Ordering::Relaxed)
    }

    /// Get total dispatches forwarded to the consumer
    pub fn events_dispatched(&self) -> u64 {
        self.events_dispatched_total.load(Ordering::Relaxed)
    }

    /// Get total errors
    pub fn errors(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    pub(crate) fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnection(&self) {
        self.reconnections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resume(&self) {
        self.resumes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_zombie_reconnect(&self) {
        self.zombie_reconnects_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_heartbeat_sent(&self) {
        self.heartbeats_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_sent(&self) {
        self.frames_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event_dispatched(&self) {
        self.events_dispatched_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Update status for a specific shard
    pub(crate) fn update_shard(&self, shard_id: usize, update_fn: impl FnOnce(&mut ShardStatus)) {
        let mut shards = self.shard_status.write();

        while shards.len() <= shard_id {
            let id = shards.len();
            shards.push(ShardStatus {
                shard_id: id,
                ..Default::default()
            });
        }

        update_fn(&mut shards[shard_id]);
    }

    /// Get a snapshot of all shard statuses with computed durations
    pub fn shard_status(&self) -> Vec<ShardStatus> {
        self.shard_status.read().iter().map(|s| s.snapshot()).collect()
    }

    /// Get current connected shard count
    pub fn connected_shards(&self) -> usize {
        self.shard_status
            .read()
            .iter()
            .filter(|s| s.is_connected)
            .count()
    }

    /// Get a point-in-time snapshot of all metrics for export
    pub fn snapshot(&self) -> MetricsSnapshot {
        let shards = self.shard_status.read();
        let shard_snapshots: Vec<ShardStatus> = shards.iter().map(|s| s.snapshot()).collect();

        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Acquire),
            reconnections_total: self.reconnections_total.load(Ordering::Acquire),
            resumes_total: self.resumes_total.load(Ordering::Acquire),
            zombie_reconnects_total: self.zombie_reconnects_total.load(Ordering::Acquire),
            heartbeats_sent_total: self.heartbeats_sent_total.load(Ordering::Acquire),
            frames_sent_total: self.frames_sent_total.load(Ordering::Acquire),
            events_dispatched_total: self.events_dispatched_total.load(Ordering::Acquire),
            errors_total: self.errors_total.load(Ordering::Acquire),
            connected_shards: shard_snapshots.iter().filter(|s| s.is_connected).count(),
            shards: shard_snapshots,
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub reconnections_total: u64,
    pub resumes_total: u64,
    pub zombie_reconnects_total: u64,
    pub heartbeats_sent_total: u64,
    pub frames_sent_total: u64,
    pub events_dispatched_total: u64,
    pub errors_total: u64,
    pub connected_shards: usize,
    pub shards: Vec<ShardStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_counters() {
        let metrics = Metrics::new();

        metrics.record_connection();
        metrics.record_connection();
        metrics.record_reconnection();
        metrics.record_heartbeat_sent();

        assert_eq!(metrics.connections(), 2);
        assert_eq!(metrics.reconnections(), 1);
        assert_eq!(metrics.heartbeats_sent(), 1);
        assert_eq!(metrics.zombie_reconnects(), 0);
    }

    #[test]
    fn test_shard_status() {
        let metrics = Metrics::new();

        metrics.update_shard(0, |s| s.is_connected = true);
        metrics.update_shard(2, |s| s.is_connected = true);

        assert_eq!(metrics.connected_shards(), 2);
        // shard 1 was implicitly created, disconnected
        assert_eq!(metrics.shard_status().len(), 3);
        assert!(!metrics.shard_status()[1].is_connected);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = Metrics::new();

        metrics.record_connection();
        metrics.record_event_dispatched();
        metrics.update_shard(0, |s| {
            s.is_connected = true;
            s.last_connected_at = Some(Instant::now());
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 1);
        assert_eq!(snapshot.events_dispatched_total, 1);
        assert_eq!(snapshot.connected_shards, 1);
        assert!(snapshot.shards[0].time_since_connected.is_some());
    }
}

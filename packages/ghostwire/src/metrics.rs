//! Hub metrics for observability
//!
//! Counters for connections, frame traffic, routing decisions and store failures.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Hub-wide metrics
#[derive(Debug, Default)]
pub struct HubMetrics {
    // Connection metrics
    /// Currently open WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since start
    pub total_connections: AtomicU64,

    // Frame metrics
    /// Frames received from clients
    pub frames_received: AtomicU64,
    /// Frames written to client sockets
    pub frames_sent: AtomicU64,
    /// Frames a connection could not accept (closed or full queue)
    pub frames_dropped: AtomicU64,

    // Routing metrics
    /// Chat messages persisted and routed
    pub messages_routed: AtomicU64,
    /// Routed messages that took the simulation branch
    pub simulated_messages: AtomicU64,
    /// Full-state broadcasts performed
    pub broadcasts: AtomicU64,

    // Error metrics
    /// Store operations that failed (corrupt document, I/O, lock timeout)
    pub store_errors: AtomicU64,

    start_time: Option<Instant>,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_routed(&self, simulated: bool) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
        if simulated {
            self.simulated_messages.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            frames: FrameMetrics {
                received: self.frames_received.load(Ordering::Relaxed),
                sent: self.frames_sent.load(Ordering::Relaxed),
                dropped: self.frames_dropped.load(Ordering::Relaxed),
            },
            routing: RoutingMetrics {
                messages_routed: self.messages_routed.load(Ordering::Relaxed),
                simulated_messages: self.simulated_messages.load(Ordering::Relaxed),
                broadcasts: self.broadcasts.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                store: self.store_errors.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub frames: FrameMetrics,
    pub routing: RoutingMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub received: u64,
    pub sent: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingMetrics {
    pub messages_routed: u64,
    pub simulated_messages: u64,
    pub broadcasts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub store: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: u64,
    pub identified: u64,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_tracking() {
        let metrics = HubMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);

        metrics.connection_closed();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_routing_counters() {
        let metrics = HubMetrics::new();
        metrics.message_routed(false);
        metrics.message_routed(true);
        metrics.message_routed(true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.routing.messages_routed, 3);
        assert_eq!(snapshot.routing.simulated_messages, 2);
    }

    #[test]
    fn test_snapshot() {
        let metrics = HubMetrics::new();
        metrics.connection_opened();
        metrics.frame_received();
        metrics.frame_sent();
        metrics.frame_dropped();
        metrics.broadcast();
        metrics.store_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections.active, 1);
        assert_eq!(snapshot.frames.received, 1);
        assert_eq!(snapshot.frames.sent, 1);
        assert_eq!(snapshot.frames.dropped, 1);
        assert_eq!(snapshot.routing.broadcasts, 1);
        assert_eq!(snapshot.errors.store, 1);
    }
}

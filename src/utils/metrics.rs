//! Observability and Metrics
//!
//! Per-channel counters for frames, handlers and rejected input.
//!
//! Uses atomic counters for thread-safe metrics collection. Each `Channel`
//! owns one `Arc<Metrics>` shared with its dispatcher and with the tasks the
//! dispatcher enqueues.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for one channel
#[derive(Debug)]
pub struct Metrics {
    /// Frames handed to the transport
    pub frames_sent: AtomicU64,
    /// Frames received from the transport
    pub frames_received: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Handlers that ran to completion
    pub handlers_invoked: AtomicU64,
    /// Handlers that panicked
    pub handler_panics: AtomicU64,
    /// Frames carrying an unassigned message id
    pub unknown_types: AtomicU64,
    /// Frames that failed to decode
    pub decode_errors: AtomicU64,
    /// Sends or receives against a declared direction
    pub direction_violations: AtomicU64,
    /// Total handshake attempts
    pub handshakes_total: AtomicU64,
    /// Failed handshakes
    pub handshakes_failed: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            handlers_invoked: AtomicU64::new(0),
            handler_panics: AtomicU64::new(0),
            unknown_types: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            direction_violations: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a frame sent
    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a frame received
    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn handler_invoked(&self) {
        self.handlers_invoked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_panicked(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_type(&self) {
        self.unknown_types.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn direction_violation(&self) {
        self.direction_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handshake attempt
    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed handshake
    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            handlers_invoked: self.handlers_invoked.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            unknown_types: self.unknown_types.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            direction_violations: self.direction_violations.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self, namespace: &str) {
        let snapshot = self.snapshot();
        info!(
            namespace,
            frames_sent = snapshot.frames_sent,
            frames_received = snapshot.frames_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            handlers_invoked = snapshot.handlers_invoked,
            handler_panics = snapshot.handler_panics,
            unknown_types = snapshot.unknown_types,
            decode_errors = snapshot.decode_errors,
            direction_violations = snapshot.direction_violations,
            handshakes_total = snapshot.handshakes_total,
            handshakes_failed = snapshot.handshakes_failed,
            uptime_seconds = snapshot.uptime_seconds,
            "Channel metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub handlers_invoked: u64,
    pub handler_panics: u64,
    pub unknown_types: u64,
    pub decode_errors: u64,
    pub direction_violations: u64,
    pub handshakes_total: u64,
    pub handshakes_failed: u64,
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    /// Frames rejected for any reason
    pub fn rejected(&self) -> u64 {
        self.unknown_types + self.decode_errors + self.direction_violations
    }
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}

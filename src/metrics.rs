use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Relay counters exposed over HTTP.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    received: AtomicU64,
    relayed: AtomicU64,
    dropped_echo: AtomicU64,
    dropped_filtered: AtomicU64,
    failed: AtomicU64,
    edited: AtomicU64,
    deleted: AtomicU64,
    commands: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub relayed: u64,
    pub dropped_echo: u64,
    pub dropped_filtered: u64,
    pub failed: u64,
    pub edited: u64,
    pub deleted: u64,
    pub commands: u64,
}

impl RelayMetrics {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relayed(&self) {
        self.relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_echo(&self) {
        self.dropped_echo.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_filtered(&self) {
        self.dropped_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_edited(&self) {
        self.edited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            dropped_echo: self.dropped_echo.load(Ordering::Relaxed),
            dropped_filtered: self.dropped_filtered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            edited: self.edited.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
        }
    }
}

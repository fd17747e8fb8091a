// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Progress reporting for long-running operations
//!
//! Lets the lister and the node collector report what they are doing,
//! which the CLI can display while a scan runs.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

/// Create a spinner with consistent styling
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.cyan} {msg} {elapsed:.dim}")
    {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Progress update message
#[derive(Clone, Debug)]
pub enum ProgressUpdate {
    // === Discovery ===
    Discovering,
    DiscoveryComplete { kind_count: usize, elapsed_ms: u64 },

    // === Listing ===
    /// Starting to list `units` kind/namespace combinations
    StartingScan { units: usize },
    /// One kind/namespace combination finished
    UnitComplete {
        kind: String,
        namespace: Option<String>,
        items: usize,
    },

    // === Node probing ===
    ProbesCreated { count: usize },
    ProbeComplete { node: String, success: bool },
    CleanupComplete { deleted: usize, leaked: usize },
}

/// Progress reporter shared by concurrent workers
pub struct ProgressReporter {
    sender: broadcast::Sender<ProgressUpdate>,
    /// Completed units for the current scan
    units_done: AtomicUsize,
    /// Total units for the current scan
    units_total: AtomicUsize,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            sender,
            units_done: AtomicUsize::new(0),
            units_total: AtomicUsize::new(0),
        }
    }

    /// Subscribe to progress updates
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.sender.subscribe()
    }

    pub fn discovering(&self) {
        let _ = self.sender.send(ProgressUpdate::Discovering);
    }

    pub fn discovery_complete(&self, kind_count: usize, elapsed_ms: u64) {
        let _ = self.sender.send(ProgressUpdate::DiscoveryComplete {
            kind_count,
            elapsed_ms,
        });
    }

    /// Report scan start; resets the counters
    pub fn start_scan(&self, units: usize) {
        self.units_done.store(0, Ordering::SeqCst);
        self.units_total.store(units, Ordering::SeqCst);
        let _ = self.sender.send(ProgressUpdate::StartingScan { units });
    }

    pub fn unit_complete(&self, kind: &str, namespace: Option<&str>, items: usize) {
        self.units_done.fetch_add(1, Ordering::SeqCst);
        let _ = self.sender.send(ProgressUpdate::UnitComplete {
            kind: kind.to_string(),
            namespace: namespace.map(String::from),
            items,
        });
    }

    pub fn probes_created(&self, count: usize) {
        let _ = self.sender.send(ProgressUpdate::ProbesCreated { count });
    }

    pub fn probe_complete(&self, node: &str, success: bool) {
        let _ = self.sender.send(ProgressUpdate::ProbeComplete {
            node: node.to_string(),
            success,
        });
    }

    pub fn cleanup_complete(&self, deleted: usize, leaked: usize) {
        let _ = self
            .sender
            .send(ProgressUpdate::CleanupComplete { deleted, leaked });
    }

    /// Get current progress (done/total)
    pub fn progress(&self) -> (usize, usize) {
        (
            self.units_done.load(Ordering::SeqCst),
            self.units_total.load(Ordering::SeqCst),
        )
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to progress reporter
pub type ProgressHandle = Arc<ProgressReporter>;

/// Create a new progress reporter handle
pub fn create_progress_handle() -> ProgressHandle {
    Arc::new(ProgressReporter::new())
}

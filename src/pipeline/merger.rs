// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Background merger thread.
//!
//! One thread periodically scans every watched builder and merges any shard
//! whose spill file has grown past the configured threshold, taking that
//! shard's mutex for the duration. Ingestion keeps running; it only
//! contends on the one shard being merged.
//!
//! Three modes, driven by a condvar:
//!
//! - **Run** — scan, merge, sleep, repeat.
//! - **AppendOnly** — parked; ingestion appends without merge contention.
//!   [`Merger::stop_only_append`] does not return until in-flight shard
//!   mutations have drained.
//! - **Stop** — thread exits; [`Merger::stop`] joins it.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info};
use parking_lot::{Condvar, Mutex};

use crate::config::IndexConfig;
use crate::index::MergeScan;

/// How long the merger sleeps between scans while running.
const SCAN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Run,
    AppendOnly,
    Stop,
}

struct Control {
    mode: Mutex<Mode>,
    condvar: Condvar,
}

impl Control {
    fn set_mode(&self, mode: Mode) {
        *self.mode.lock() = mode;
        self.condvar.notify_all();
    }
}

pub struct Merger {
    control: Arc<Control>,
    targets: Vec<Arc<dyn MergeScan>>,
    handle: Option<JoinHandle<()>>,
}

impl Merger {
    /// Spawn the merger over `targets` (one per index level).
    pub fn start(targets: Vec<Arc<dyn MergeScan>>, cfg: Arc<IndexConfig>) -> Merger {
        let control = Arc::new(Control {
            mode: Mutex::new(Mode::Run),
            condvar: Condvar::new(),
        });

        let thread_control = Arc::clone(&control);
        let thread_targets = targets.clone();
        let handle = std::thread::spawn(move || {
            merger_loop(thread_control, thread_targets, cfg);
        });

        Merger {
            control,
            targets,
            handle: Some(handle),
        }
    }

    /// Park the merger but keep ingestion appends flowing. Returns after
    /// every watched shard lock has been acquired and released once, so no
    /// merge is mid-flight when this comes back.
    pub fn stop_only_append(&self) {
        self.control.set_mode(Mode::AppendOnly);
        for target in &self.targets {
            target.quiesce();
        }
        debug!("merger parked (append-only)");
    }

    /// Resume scanning after [`Merger::stop_only_append`].
    pub fn resume(&self) {
        self.control.set_mode(Mode::Run);
    }

    /// Stop the thread and join it.
    pub fn stop(mut self) {
        self.control.set_mode(Mode::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!("merger stopped");
    }
}

impl Drop for Merger {
    fn drop(&mut self) {
        self.control.set_mode(Mode::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn merger_loop(control: Arc<Control>, targets: Vec<Arc<dyn MergeScan>>, cfg: Arc<IndexConfig>) {
    loop {
        {
            let mut mode = control.mode.lock();
            while *mode == Mode::AppendOnly {
                control.condvar.wait(&mut mode);
            }
            if *mode == Mode::Stop {
                return;
            }
        }

        for target in &targets {
            // Stay responsive to mode flips between levels.
            if *control.mode.lock() != Mode::Run {
                break;
            }
            target.merge_over_threshold(cfg.merge_spill_threshold);
        }

        let mut mode = control.mode.lock();
        if *mode == Mode::Run {
            let _ = control.condvar.wait_for(&mut mode, SCAN_INTERVAL);
        }
    }
}

// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Progress reporting for long-running analysis phases.

use log::*;
use std::time::{Duration, Instant};

// Totals at or below this report every step.
const SMALL_TOTAL: usize = 32;
// Larger totals are throttled to roughly this many updates plus completion.
const THROTTLED_UPDATES: usize = 10;
// A report is also due whenever this much time passed since the last one.
const REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Batches progress updates of a phase by count and by time.
///
/// Small phases log every step; large phases log a fixed number of evenly
/// spaced updates, plus a completion line with the elapsed time.
pub struct ProgressTracker {
    label: &'static str,
    total: usize,
    done: usize,
    step: usize,
    started: Instant,
    last_report: Instant,
}

impl ProgressTracker {
    pub fn new(label: &'static str, total: usize) -> Self {
        let step = if total <= SMALL_TOTAL {
            1
        } else {
            (total / THROTTLED_UPDATES).max(1)
        };
        let now = Instant::now();
        ProgressTracker {
            label,
            total,
            done: 0,
            step,
            started: now,
            last_report: now,
        }
    }

    /// Records one completed step, emitting a report when one is due.
    pub fn step(&mut self) {
        self.done += 1;
        if self.done % self.step == 0 || self.last_report.elapsed() >= REPORT_INTERVAL {
            self.last_report = Instant::now();
            info!("{}: {}/{}", self.label, self.done, self.total);
        }
    }

    /// Logs the completion summary with the elapsed wall time.
    pub fn finish(self) {
        info!(
            "{}: done ({} items in {})",
            self.label,
            self.done,
            humantime::format_duration(round_to_millis(self.started.elapsed()))
        );
    }
}

fn round_to_millis(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}

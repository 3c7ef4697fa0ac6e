/*
 * This file is part of Nvtweak.
 *
 * Copyright (C) 2026 Nvtweak contributors
 *
 * Nvtweak is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Nvtweak is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Nvtweak. If not, see <https://www.gnu.org/licenses/>.
 */

//! Periodic read-only status polling
//!
//! The monitor never issues a mutating command. A failed poll produces a
//! `Degraded` sample with the reason instead of an error, so one flaky
//! query does not tear down a long-running loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::command::CommandRunner;
use crate::constants::timing;
use crate::error::Result;
use crate::query::{self, GpuStatus};
use crate::validation::validate_gpu_id;

/// One poll sample for one GPU
#[derive(Debug, Clone, PartialEq)]
pub enum GpuHealth {
    Available(GpuStatus),
    /// The query failed; carries a short reason
    Degraded(String),
}

impl GpuHealth {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

/// Polls one GPU at a fixed interval until stopped
pub struct Monitor {
    runner: Arc<dyn CommandRunner>,
    gpu_id: u32,
    interval: Duration,
    stop: Arc<AtomicBool>,
}

impl Monitor {
    pub fn new(runner: Arc<dyn CommandRunner>, gpu_id: i64) -> Result<Self> {
        let gpu_id = validate_gpu_id(gpu_id)?;
        Ok(Self {
            runner,
            gpu_id,
            interval: timing::POLL_INTERVAL,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Handle for stopping a running loop from another thread
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Take one sample. Never errors: failures degrade into the sample.
    pub fn poll_once(&self) -> GpuHealth {
        match query::query_status(self.runner.as_ref(), self.gpu_id) {
            Ok(status) => GpuHealth::Available(status),
            Err(e) => {
                debug!(gpu = self.gpu_id, "poll failed: {}", e);
                GpuHealth::Degraded(e.to_string())
            }
        }
    }

    /// Poll until the stop flag is set, delivering each sample to the
    /// callback. The flag is checked again after the sleep so a stop
    /// request takes effect within one interval.
    pub fn run<F>(&self, mut on_sample: F)
    where
        F: FnMut(GpuHealth),
    {
        while !self.stop.load(Ordering::Relaxed) {
            on_sample(self.poll_once());
            std::thread::sleep(self.interval);
        }
        debug!(gpu = self.gpu_id, "monitor stopped");
    }
}

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

//! Nvtweak - NVIDIA GPU tuning for Linux via nvidia-smi and nvidia-settings
//!
//! This library provides validated, persistent control over GPU clock locks,
//! power limits, memory offsets, fan control and PowerMizer modes, plus
//! read-only status monitoring. All hardware interaction goes through a
//! whitelisted command dispatcher; applied settings survive restarts through
//! atomic per-GPU settings documents.

pub mod command;
pub mod constants;
pub mod manager;
pub mod monitor;
pub mod persistence;
pub mod profile;
pub mod query;
pub mod validation;

pub mod error {
    pub use nvt_error::*;
}

pub use command::{CommandRunner, SystemRunner};
pub use error::{NvtweakError, Result};
pub use manager::{ApplyOutcome, ApplyStep, GpuManager};
pub use monitor::{GpuHealth, Monitor};
pub use persistence::{LockState, PersistedSettings, SettingsStore};
pub use profile::{ClockLock, FanMode, FanSettings, PerformanceMode, Profile};
pub use query::{GpuIdentity, GpuStatus, HardwareBounds};

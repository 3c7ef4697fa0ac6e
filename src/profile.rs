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

//! Setting types and named profiles
//!
//! A profile is a bundle of optional clock/power/fan settings. Fields left
//! as `None` are not touched when the profile is applied; a profile with no
//! clock lock explicitly releases any active lock (the GPU goes back to
//! managing its own clocks).

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::HardwareBounds;
use crate::validation;

/// PowerMizer performance mode, as exposed by nvidia-settings
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMode {
    Adaptive,
    MaxPerformance,
    Auto,
}

impl PerformanceMode {
    /// Value for the GpuPowerMizerMode nvidia-settings attribute
    pub fn powermizer_value(&self) -> &'static str {
        match self {
            Self::Adaptive => "0",
            Self::MaxPerformance => "1",
            Self::Auto => "2",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Adaptive => "Adaptive",
            Self::MaxPerformance => "Prefer Maximum Performance",
            Self::Auto => "Auto",
        }
    }
}

/// Fan control mode
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    Auto,
    Manual,
}

/// Fan control settings; Manual mode requires Coolbits
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FanSettings {
    pub mode: FanMode,
    /// Target speed percent, only meaningful in Manual mode
    #[serde(default)]
    pub speed_percent: u8,
}

/// A graphics clock lock window in MHz
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClockLock {
    pub min_mhz: u32,
    pub max_mhz: u32,
}

/// Named bundle of GPU settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub clock_lock: Option<ClockLock>,
    #[serde(default)]
    pub mem_offset: Option<i32>,
    #[serde(default)]
    pub power_limit: Option<u32>,
    #[serde(default)]
    pub persistence_mode: Option<bool>,
    #[serde(default)]
    pub perf_mode: Option<PerformanceMode>,
    #[serde(default)]
    pub fan: Option<FanSettings>,
}

impl Profile {
    /// Names of the built-in profiles, in display order
    pub const BUILTIN_NAMES: &'static [&'static str] =
        &["gaming", "balanced", "quiet", "mining"];

    /// Look up a built-in profile by (case-insensitive) name
    pub fn builtin(name: &str) -> Option<Profile> {
        let profile = match name.to_ascii_lowercase().as_str() {
            "gaming" => Profile {
                name: "gaming".to_string(),
                clock_lock: Some(ClockLock { min_mhz: 2400, max_mhz: 2850 }),
                mem_offset: None,
                power_limit: Some(450),
                persistence_mode: None,
                perf_mode: Some(PerformanceMode::MaxPerformance),
                fan: None,
            },
            // Balanced releases the clock lock and lets the GPU manage itself
            "balanced" => Profile {
                name: "balanced".to_string(),
                clock_lock: None,
                mem_offset: None,
                power_limit: Some(350),
                persistence_mode: None,
                perf_mode: Some(PerformanceMode::Adaptive),
                fan: None,
            },
            "quiet" => Profile {
                name: "quiet".to_string(),
                clock_lock: Some(ClockLock { min_mhz: 210, max_mhz: 1500 }),
                mem_offset: None,
                power_limit: Some(250),
                persistence_mode: None,
                perf_mode: Some(PerformanceMode::Adaptive),
                fan: None,
            },
            "mining" => Profile {
                name: "mining".to_string(),
                clock_lock: Some(ClockLock { min_mhz: 1200, max_mhz: 1400 }),
                mem_offset: Some(1000),
                power_limit: Some(300),
                persistence_mode: None,
                perf_mode: Some(PerformanceMode::Adaptive),
                fan: None,
            },
            _ => return None,
        };
        Some(profile)
    }

    /// All-or-nothing pre-check: every setting in the profile is validated
    /// against hardware bounds (or the global fallbacks) before any command
    /// is issued. The first violation aborts the whole apply.
    pub fn validate(&self, bounds: &HardwareBounds, coolbits_enabled: bool) -> Result<()> {
        if let Some(lock) = &self.clock_lock {
            validation::validate_clock_range(lock.min_mhz, lock.max_mhz, bounds.clock)?;
        }
        if let Some(watts) = self.power_limit {
            validation::validate_power_limit(watts, bounds.power)?;
        }
        if let Some(offset) = self.mem_offset {
            validation::validate_memory_offset(offset as i64)?;
        }
        if let Some(fan) = &self.fan {
            validation::validate_fan_speed(fan.speed_percent as i64)?;
            validation::validate_fan_control(fan.mode == FanMode::Manual, coolbits_enabled)?;
        }
        Ok(())
    }
}

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

//! Read-only GPU queries via `nvidia-smi` CSV output
//!
//! Detection and status polling go through one CSV query each; individual
//! `N/A` fields are tolerated rather than failing the whole parse, since a
//! GPU can legitimately report no fan or no power readings.

use tracing::{debug, warn};

use crate::command::{CommandRunner, CommandSpec};
use crate::constants::bounds;
use crate::error::{NvtweakError, Result};

/// Fields requested from nvidia-smi for a full status snapshot, in order
const STATUS_FIELDS: &str = "--query-gpu=name,uuid,clocks.current.graphics,clocks.max.graphics,\
clocks.current.memory,clocks.max.memory,power.draw,power.limit,power.min_limit,power.max_limit,\
temperature.gpu,fan.speed,utilization.gpu,utilization.memory,pstate,persistence_mode";

const STATUS_FIELD_COUNT: usize = 16;

/// A detected GPU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuIdentity {
    pub id: u32,
    pub name: String,
    pub uuid: String,
}

/// Snapshot of a GPU's current state; `None` means the driver reported N/A
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuStatus {
    pub name: String,
    pub uuid: String,
    pub current_clock_mhz: Option<u32>,
    pub max_clock_mhz: Option<u32>,
    pub memory_clock_mhz: Option<u32>,
    pub max_memory_clock_mhz: Option<u32>,
    pub power_draw_w: Option<f32>,
    pub power_limit_w: Option<u32>,
    pub power_min_limit_w: Option<u32>,
    pub power_max_limit_w: Option<u32>,
    pub temperature_c: Option<u32>,
    pub fan_speed_percent: Option<u32>,
    pub utilization_gpu: Option<u32>,
    pub utilization_memory: Option<u32>,
    pub performance_state: Option<String>,
    pub persistence_mode: bool,
}

/// Card-specific value windows used to re-clamp settings at apply time.
/// `None` falls back to the global literal bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareBounds {
    /// (min, max) graphics clock in MHz
    pub clock: Option<(u32, u32)>,
    /// (min, max) power limit in watts
    pub power: Option<(u32, u32)>,
}

impl HardwareBounds {
    /// Derive bounds from a status snapshot. The clock floor is the global
    /// minimum; nvidia-smi only reports the card's ceiling.
    pub fn from_status(status: &GpuStatus) -> Self {
        Self {
            clock: status
                .max_clock_mhz
                .map(|max| (bounds::MIN_CLOCK_MHZ, max)),
            power: match (status.power_min_limit_w, status.power_max_limit_w) {
                (Some(min), Some(max)) => Some((min, max)),
                _ => None,
            },
        }
    }
}

/// Enumerate all NVIDIA GPUs visible to the driver
pub fn detect_gpus(runner: &dyn CommandRunner) -> Result<Vec<GpuIdentity>> {
    let spec = CommandSpec::smi_query(
        &["--query-gpu=index,name,uuid", "--format=csv,noheader"],
        None,
    );
    let output = runner.run(&spec)?;
    let gpus = parse_gpu_list(&output.stdout);
    debug!(count = gpus.len(), "detected GPUs");
    Ok(gpus)
}

fn parse_gpu_list(stdout: &str) -> Vec<GpuIdentity> {
    let mut gpus = Vec::new();
    for line in stdout.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
        if parts.len() < 3 {
            warn!("skipping malformed nvidia-smi line: {}", line);
            continue;
        }
        let id = match parts[0].parse::<u32>() {
            Ok(id) if id <= bounds::MAX_GPU_ID => id,
            _ => {
                warn!("skipping GPU with unusable index: {}", parts[0]);
                continue;
            }
        };
        gpus.push(GpuIdentity {
            id,
            name: parts[1].to_string(),
            uuid: parts[2].to_string(),
        });
    }
    gpus
}

/// Query a full status snapshot for one GPU
pub fn query_status(runner: &dyn CommandRunner, gpu_id: u32) -> Result<GpuStatus> {
    let spec = CommandSpec::smi_query(
        &[STATUS_FIELDS, "--format=csv,noheader,nounits"],
        Some(gpu_id),
    );
    let output = runner.run(&spec)?;
    let line = output
        .stdout
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| NvtweakError::generic("empty nvidia-smi status output"))?;
    parse_status_line(line)
}

fn parse_status_line(line: &str) -> Result<GpuStatus> {
    let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
    if parts.len() != STATUS_FIELD_COUNT {
        return Err(NvtweakError::generic(format!(
            "unexpected nvidia-smi status format: {} fields (expected {})",
            parts.len(),
            STATUS_FIELD_COUNT
        )));
    }

    Ok(GpuStatus {
        name: parts[0].to_string(),
        uuid: parts[1].to_string(),
        current_clock_mhz: parse_value(parts[2]),
        max_clock_mhz: parse_value(parts[3]),
        memory_clock_mhz: parse_value(parts[4]),
        max_memory_clock_mhz: parse_value(parts[5]),
        power_draw_w: parse_value_f32(parts[6]),
        power_limit_w: parse_value(parts[7]),
        power_min_limit_w: parse_value(parts[8]),
        power_max_limit_w: parse_value(parts[9]),
        temperature_c: parse_value(parts[10]),
        fan_speed_percent: parse_value(parts[11]),
        utilization_gpu: parse_value(parts[12]),
        utilization_memory: parse_value(parts[13]),
        performance_state: non_empty(parts[14]),
        persistence_mode: parts[15].eq_ignore_ascii_case("Enabled"),
    })
}

/// Probe whether Coolbits-gated controls are available. A successful
/// GPUFanControlState query means nvidia-settings is present and the driver
/// exposes fan control.
pub fn check_coolbits(runner: &dyn CommandRunner) -> bool {
    let spec = CommandSpec::settings_query(&["-q", "GPUFanControlState"]);
    match runner.run(&spec) {
        Ok(_) => true,
        Err(e) => {
            debug!("Coolbits probe failed: {}", e);
            false
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() || is_na(s) {
        None
    } else {
        Some(s.to_string())
    }
}

fn is_na(s: &str) -> bool {
    s.is_empty() || s == "N/A" || s == "[N/A]" || s == "[Not Supported]"
}

/// Parse an integer field, treating N/A markers as absent. Values like
/// "450.00" (nounits power output) are rounded.
fn parse_value(s: &str) -> Option<u32> {
    if is_na(s) {
        return None;
    }
    s.parse::<u32>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as u32))
}

fn parse_value_f32(s: &str) -> Option<f32> {
    if is_na(s) {
        return None;
    }
    s.parse::<f32>().ok()
}

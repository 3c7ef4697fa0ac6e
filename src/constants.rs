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

//! Constants and configuration values for nvtweak
//!
//! Centralizes all magic numbers, paths, and configuration defaults.
//! Never use magic numbers in other files - add them here first.

use std::time::Duration;

/// Value bounds enforced by the validators
pub mod bounds {
    /// Highest GPU index accepted anywhere (hardware-imposed practical ceiling)
    pub const MAX_GPU_ID: u32 = 127;

    /// Global graphics clock floor in MHz, used when hardware bounds are unknown
    pub const MIN_CLOCK_MHZ: u32 = 210;
    /// Global graphics clock ceiling in MHz, used when hardware bounds are unknown
    pub const MAX_CLOCK_MHZ: u32 = 3200;

    /// Global power limit floor in watts
    pub const MIN_POWER_W: u32 = 100;
    /// Global power limit ceiling in watts
    pub const MAX_POWER_W: u32 = 600;

    /// Memory transfer rate offset range in MHz
    pub const MIN_MEM_OFFSET_MHZ: i32 = -2000;
    pub const MAX_MEM_OFFSET_MHZ: i32 = 2000;

    /// Lenient power ceiling for persisted documents, wider than the
    /// apply-time window so settings saved on beefier hardware still load
    pub const MAX_PERSISTED_POWER_W: u64 = 1000;
}

/// UI-facing defaults and step sizes (kept for CLI snapping, not enforced by validators)
pub mod steps {
    pub const CLOCK_STEP_MHZ: u32 = 15;
    pub const POWER_STEP_W: u32 = 50;
    pub const MEM_OFFSET_STEP_MHZ: i32 = 50;

    pub const DEFAULT_MIN_CLOCK_MHZ: u32 = 210;
    pub const DEFAULT_MAX_CLOCK_MHZ: u32 = 2850;
    pub const DEFAULT_POWER_W: u32 = 450;
}

/// Size ceilings for untrusted on-disk state, checked before any parse
pub mod limits {
    /// Maximum size of a per-GPU settings document or profile file
    pub const MAX_SETTINGS_SIZE: u64 = 1024 * 1024; // 1 MiB
    /// Maximum size of a clock lock marker file
    pub const MAX_MARKER_SIZE: u64 = 1024; // 1 KiB
    /// Maximum stderr snippet length surfaced in errors and logs
    pub const STDERR_SNIPPET_LEN: usize = 200;
    /// Maximum length of a custom profile name
    pub const MAX_PROFILE_NAME_LEN: usize = 64;
}

/// Timeouts and polling intervals
pub mod timing {
    use super::Duration;

    /// Timeout for read-only nvidia-smi queries
    pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
    /// Timeout for state-changing commands (may wait on pkexec auth)
    pub const APPLY_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default monitoring poll interval
    pub const POLL_INTERVAL: Duration = Duration::from_millis(2000);
    /// Granularity of the child-process timeout loop
    pub const WAIT_SLICE: Duration = Duration::from_millis(25);
}

/// System paths and on-disk file naming
pub mod paths {

    /// Per-GPU settings document file name
    pub fn settings_file_name(gpu_id: u32) -> String {
        format!("settings_gpu{}.json", gpu_id)
    }

    /// Per-GPU clock lock marker file name
    pub fn marker_file_name(gpu_id: u32) -> String {
        format!("clock_lock_status_gpu{}.txt", gpu_id)
    }

    /// Custom profile file name for a (pre-validated) profile name
    pub fn profile_file_name(name: &str) -> String {
        format!("profile_{}.json", name)
    }

    /// User configuration directory (~/.config/nvtweak)
    ///
    /// Handles the case where the process runs elevated but needs the
    /// invoking user's config: SUDO_USER and PKEXEC_UID are resolved back
    /// to the original user's home before falling back to XDG/HOME.
    pub fn user_config_dir() -> Option<std::path::PathBuf> {
        let config_base = if let Ok(sudo_user) = std::env::var("SUDO_USER") {
            get_user_home(&sudo_user).map(|h| h.join(".config"))
        } else if let Ok(pkexec_uid) = std::env::var("PKEXEC_UID") {
            if let Ok(uid) = pkexec_uid.parse::<u32>() {
                get_home_by_uid(uid).map(|h| h.join(".config"))
            } else {
                None
            }
        } else {
            None
        };

        let config_base = config_base.or_else(|| {
            if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
                Some(std::path::PathBuf::from(xdg))
            } else if let Ok(home) = std::env::var("HOME") {
                Some(std::path::PathBuf::from(home).join(".config"))
            } else {
                dirs::config_dir()
            }
        });

        config_base.map(|p| p.join("nvtweak"))
    }

    /// Get home directory for a username from /etc/passwd
    fn get_user_home(username: &str) -> Option<std::path::PathBuf> {
        if let Ok(passwd) = std::fs::read_to_string("/etc/passwd") {
            for line in passwd.lines() {
                let parts: Vec<&str> = line.split(':').collect();
                if parts.len() >= 6 && parts[0] == username {
                    return Some(std::path::PathBuf::from(parts[5]));
                }
            }
        }
        None
    }

    /// Get home directory by UID from /etc/passwd
    fn get_home_by_uid(uid: u32) -> Option<std::path::PathBuf> {
        if let Ok(passwd) = std::fs::read_to_string("/etc/passwd") {
            for line in passwd.lines() {
                let parts: Vec<&str> = line.split(':').collect();
                if parts.len() >= 6 {
                    if let Ok(line_uid) = parts[2].parse::<u32>() {
                        if line_uid == uid {
                            return Some(std::path::PathBuf::from(parts[5]));
                        }
                    }
                }
            }
        }
        None
    }
}

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

//! Input validation and sanitization for nvtweak
//!
//! Provides security-focused validation for all user inputs and on-disk state.
//!
//! # Security Considerations
//!
//! - **Path Traversal Protection**: config file names are validated to stay
//!   inside the config directory before any file operation
//! - **Size Limits**: file sizes are checked before parsing to prevent
//!   memory exhaustion from untrusted documents
//! - **Range Checks**: every numeric setting is checked against global
//!   bounds and, where available, hardware-reported bounds
//!
//! All validators are pure: they either hand the value back or fail with a
//! descriptive error, and never touch the filesystem or hardware.

use std::path::{Component, Path, PathBuf};

use serde_json::Value;

use crate::constants::{bounds, limits};
use crate::error::{NvtweakError, Result};

/// Validates a GPU index. Succeeds iff 0 <= id <= 127.
pub fn validate_gpu_id(value: i64) -> Result<u32> {
    if (0..=bounds::MAX_GPU_ID as i64).contains(&value) {
        Ok(value as u32)
    } else {
        Err(NvtweakError::InvalidGpuId { value })
    }
}

/// Validates a graphics clock lock range against hardware bounds.
///
/// When the card's real limits are unknown the global 210-3200 MHz window
/// is used instead.
pub fn validate_clock_range(min: u32, max: u32, hw_bounds: Option<(u32, u32)>) -> Result<()> {
    let (bound_min, bound_max) =
        hw_bounds.unwrap_or((bounds::MIN_CLOCK_MHZ, bounds::MAX_CLOCK_MHZ));
    if bound_min <= min && min <= max && max <= bound_max {
        Ok(())
    } else {
        Err(NvtweakError::InvalidClockRange {
            min,
            max,
            bound_min,
            bound_max,
        })
    }
}

/// Validates a power limit against the intersection of the global 100-600 W
/// window and the hardware-reported range, when known.
pub fn validate_power_limit(value: u32, hw_bounds: Option<(u32, u32)>) -> Result<()> {
    let mut min = bounds::MIN_POWER_W;
    let mut max = bounds::MAX_POWER_W;
    if let Some((hw_min, hw_max)) = hw_bounds {
        min = min.max(hw_min);
        max = max.min(hw_max);
    }
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(NvtweakError::InvalidPowerLimit { value, min, max })
    }
}

/// Validates a fan speed percentage. Succeeds iff 0 <= value <= 100.
pub fn validate_fan_speed(value: i64) -> Result<u8> {
    if (0..=100).contains(&value) {
        Ok(value as u8)
    } else {
        Err(NvtweakError::InvalidFanSpeed { value })
    }
}

/// Checks that manual fan control is actually available.
///
/// Manual mode needs the Coolbits driver flag; without it the request is
/// rejected up front instead of failing inside nvidia-settings.
pub fn validate_fan_control(manual: bool, coolbits_enabled: bool) -> Result<()> {
    if manual && !coolbits_enabled {
        return Err(NvtweakError::CapabilityMissing(
            "manual fan control requires Coolbits to be enabled in the X config".to_string(),
        ));
    }
    Ok(())
}

/// Validates a memory transfer rate offset. Succeeds iff -2000 <= value <= 2000.
pub fn validate_memory_offset(value: i64) -> Result<i32> {
    if (bounds::MIN_MEM_OFFSET_MHZ as i64..=bounds::MAX_MEM_OFFSET_MHZ as i64).contains(&value) {
        Ok(value as i32)
    } else {
        Err(NvtweakError::InvalidMemoryOffset { value })
    }
}

/// Validates a custom profile name for use in a file name.
pub fn validate_profile_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(NvtweakError::InvalidProfileName {
            name: name.to_string(),
            reason: "name cannot be empty".to_string(),
        });
    }
    if trimmed.len() > limits::MAX_PROFILE_NAME_LEN {
        return Err(NvtweakError::InvalidProfileName {
            name: name.to_string(),
            reason: format!("name exceeds {} characters", limits::MAX_PROFILE_NAME_LEN),
        });
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        return Err(NvtweakError::InvalidProfileName {
            name: name.to_string(),
            reason: "only ASCII letters, digits, '-' and '_' are allowed".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

/// Resolves a config file name inside `base_dir`, rejecting anything that
/// would escape it (`../` sequences, absolute paths, embedded separators).
pub fn validate_config_path(base_dir: &Path, name: &str) -> Result<PathBuf> {
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        return Err(NvtweakError::PathTraversal(candidate.to_path_buf()));
    }
    for component in candidate.components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(NvtweakError::PathTraversal(candidate.to_path_buf())),
        }
    }

    let joined = base_dir.join(candidate);
    // A name like "a/b.json" survives the component check but still nests
    // below base_dir; config files must live directly in it.
    if joined.parent() != Some(base_dir) {
        return Err(NvtweakError::PathTraversal(joined));
    }
    Ok(joined)
}

/// Rejects a document whose on-disk size exceeds `max_size`, before any parse.
pub fn check_size(path: &Path, size: u64, max_size: u64) -> Result<()> {
    if size > max_size {
        return Err(NvtweakError::FileTooLarge {
            path: path.to_path_buf(),
            size,
            max_size,
        });
    }
    Ok(())
}

/// Structural shape check for a per-GPU settings document.
///
/// Verifies size ceiling, top-level object shape, required keys, and field
/// types before the typed serde parse runs. Oversized or malformed input is
/// rejected here so the typed layer only ever sees plausible documents.
pub fn check_settings_document(path: &Path, raw: &str) -> Result<()> {
    check_size(path, raw.len() as u64, limits::MAX_SETTINGS_SIZE)?;

    let value: Value = serde_json::from_str(raw)
        .map_err(|e| NvtweakError::malformed(path, format!("not valid JSON: {}", e)))?;
    let obj = value
        .as_object()
        .ok_or_else(|| NvtweakError::malformed(path, "document must be a JSON object"))?;

    let gpu_id = obj
        .get("gpu_id")
        .ok_or_else(|| NvtweakError::malformed(path, "missing required key: gpu_id"))?;
    let gpu_id = gpu_id
        .as_i64()
        .ok_or_else(|| NvtweakError::malformed(path, "gpu_id must be an integer"))?;
    validate_gpu_id(gpu_id)
        .map_err(|_| NvtweakError::malformed(path, "gpu_id out of valid range"))?;

    if let Some(power) = obj.get("power_limit") {
        if !power.is_null() {
            let watts = power
                .as_u64()
                .ok_or_else(|| NvtweakError::malformed(path, "power_limit must be a number"))?;
            if watts > bounds::MAX_PERSISTED_POWER_W {
                return Err(NvtweakError::malformed(path, "power_limit out of valid range"));
            }
        }
    }

    if let Some(lock) = obj.get("clock_lock") {
        if !lock.is_null() {
            let lock = lock
                .as_object()
                .ok_or_else(|| NvtweakError::malformed(path, "clock_lock must be an object"))?;
            for key in ["min_mhz", "max_mhz"] {
                match lock.get(key) {
                    Some(v) if v.as_i64().is_some() => {}
                    Some(_) => {
                        return Err(NvtweakError::malformed(
                            path,
                            format!("clock_lock.{} must be an integer", key),
                        ))
                    }
                    None => {
                        return Err(NvtweakError::malformed(
                            path,
                            format!("clock_lock missing key: {}", key),
                        ))
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_gpu_id_bounds() {
        assert_eq!(validate_gpu_id(0).unwrap(), 0);
        assert_eq!(validate_gpu_id(127).unwrap(), 127);
        assert!(validate_gpu_id(-1).is_err());
        assert!(validate_gpu_id(128).is_err());
        assert!(validate_gpu_id(i64::MAX).is_err());
    }

    #[test]
    fn test_validate_clock_range_global_bounds() {
        assert!(validate_clock_range(210, 3200, None).is_ok());
        assert!(validate_clock_range(2400, 2850, None).is_ok());
        assert!(validate_clock_range(210, 210, None).is_ok());
        assert!(validate_clock_range(209, 3200, None).is_err());
        assert!(validate_clock_range(210, 3201, None).is_err());
        assert!(validate_clock_range(2850, 2400, None).is_err());
    }

    #[test]
    fn test_validate_clock_range_hardware_bounds() {
        assert!(validate_clock_range(500, 2000, Some((300, 2100))).is_ok());
        assert!(validate_clock_range(250, 2000, Some((300, 2100))).is_err());
        assert!(validate_clock_range(500, 2200, Some((300, 2100))).is_err());
    }

    #[test]
    fn test_validate_power_limit_intersection() {
        assert!(validate_power_limit(450, None).is_ok());
        assert!(validate_power_limit(99, None).is_err());
        assert!(validate_power_limit(601, None).is_err());
        // Hardware narrows the window
        assert!(validate_power_limit(450, Some((100, 350))).is_err());
        assert!(validate_power_limit(300, Some((100, 350))).is_ok());
        // Hardware wider than global: global still wins
        assert!(validate_power_limit(650, Some((50, 800))).is_err());
    }

    #[test]
    fn test_validate_fan_speed() {
        assert_eq!(validate_fan_speed(0).unwrap(), 0);
        assert_eq!(validate_fan_speed(100).unwrap(), 100);
        assert!(validate_fan_speed(-1).is_err());
        assert!(validate_fan_speed(101).is_err());
    }

    #[test]
    fn test_validate_fan_control_requires_coolbits() {
        assert!(validate_fan_control(false, false).is_ok());
        assert!(validate_fan_control(true, true).is_ok());
        let err = validate_fan_control(true, false).unwrap_err();
        assert!(matches!(err, NvtweakError::CapabilityMissing(_)));
    }

    #[test]
    fn test_validate_memory_offset() {
        assert_eq!(validate_memory_offset(1000).unwrap(), 1000);
        assert_eq!(validate_memory_offset(-2000).unwrap(), -2000);
        assert!(validate_memory_offset(2001).is_err());
        assert!(validate_memory_offset(-2001).is_err());
    }

    #[test]
    fn test_validate_profile_name() {
        assert_eq!(validate_profile_name("my-profile_1").unwrap(), "my-profile_1");
        assert!(validate_profile_name("").is_err());
        assert!(validate_profile_name("   ").is_err());
        assert!(validate_profile_name("a/b").is_err());
        assert!(validate_profile_name("..").is_err());
        assert!(validate_profile_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_config_path_accepts_plain_names() {
        let base = Path::new("/home/user/.config/nvtweak");
        let resolved = validate_config_path(base, "settings_gpu0.json").unwrap();
        assert_eq!(resolved, base.join("settings_gpu0.json"));
    }

    #[test]
    fn test_validate_config_path_rejects_traversal() {
        let base = Path::new("/home/user/.config/nvtweak");
        assert!(matches!(
            validate_config_path(base, "../../etc/passwd"),
            Err(NvtweakError::PathTraversal(_))
        ));
        assert!(validate_config_path(base, "/etc/passwd").is_err());
        assert!(validate_config_path(base, "..").is_err());
        assert!(validate_config_path(base, "sub/dir.json").is_err());
    }

    #[test]
    fn test_check_size_ceiling() {
        let path = Path::new("settings_gpu0.json");
        assert!(check_size(path, 1024, 1024).is_ok());
        let err = check_size(path, 1025, 1024).unwrap_err();
        assert!(matches!(err, NvtweakError::FileTooLarge { .. }));
    }

    #[test]
    fn test_check_settings_document_valid() {
        let path = Path::new("settings_gpu0.json");
        let raw = r#"{
            "gpu_id": 0,
            "power_limit": 450,
            "clock_lock": { "min_mhz": 2400, "max_mhz": 2850 }
        }"#;
        assert!(check_settings_document(path, raw).is_ok());
    }

    #[test]
    fn test_check_settings_document_rejects_bad_shapes() {
        let path = Path::new("settings_gpu0.json");
        assert!(check_settings_document(path, "[]").is_err());
        assert!(check_settings_document(path, "{}").is_err());
        assert!(check_settings_document(path, r#"{"gpu_id": "zero"}"#).is_err());
        assert!(check_settings_document(path, r#"{"gpu_id": 200}"#).is_err());
        assert!(check_settings_document(path, r#"{"gpu_id": 0, "power_limit": 5000}"#).is_err());
        assert!(
            check_settings_document(path, r#"{"gpu_id": 0, "clock_lock": {"min_mhz": 210}}"#)
                .is_err()
        );
        assert!(check_settings_document(path, r#"{"gpu_id": 0, "clock_lock": 7}"#).is_err());
    }

    #[test]
    fn test_check_settings_document_power_ceiling_boundary() {
        let path = Path::new("settings_gpu0.json");
        let at = format!(
            r#"{{"gpu_id": 0, "power_limit": {}}}"#,
            bounds::MAX_PERSISTED_POWER_W
        );
        assert!(check_settings_document(path, &at).is_ok());
        let over = format!(
            r#"{{"gpu_id": 0, "power_limit": {}}}"#,
            bounds::MAX_PERSISTED_POWER_W + 1
        );
        assert!(check_settings_document(path, &over).is_err());
    }

    #[test]
    fn test_check_settings_document_rejects_oversized_before_parse() {
        let path = Path::new("settings_gpu0.json");
        // Not even valid JSON - the size ceiling must trip first
        let raw = "x".repeat(1024 * 1024 + 1);
        let err = check_settings_document(path, &raw).unwrap_err();
        assert!(matches!(err, NvtweakError::FileTooLarge { .. }));
    }
}

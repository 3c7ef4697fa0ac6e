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

//! On-disk state: per-GPU settings documents, clock lock markers, profiles
//!
//! The store is the sole writer of these files. Every write goes to a temp
//! file in the same directory followed by a rename, so a reader (or a
//! crash) can never observe a partially written document; the previous file
//! is only replaced by the rename itself. Everything read back is treated
//! as untrusted: size ceilings and shape checks run before any typed parse.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{limits, paths};
use crate::error::{NvtweakError, Result};
use crate::profile::{ClockLock, FanSettings, PerformanceMode, Profile};
use crate::validation::{
    check_settings_document, check_size, validate_config_path, validate_profile_name,
};

/// Durable clock lock state for one GPU, mirrored in the marker file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked { min_mhz: u32, max_mhz: u32 },
}

impl LockState {
    /// Marker file representation: `default` or `<min>,<max>`
    pub fn to_marker(self) -> String {
        match self {
            Self::Unlocked => "default".to_string(),
            Self::Locked { min_mhz, max_mhz } => format!("{},{}", min_mhz, max_mhz),
        }
    }

    /// Parse marker content. Unparseable or out-of-range content degrades to
    /// `Unlocked` rather than failing startup; the marker is advisory state,
    /// not a command source.
    pub fn from_marker(content: &str) -> LockState {
        let trimmed = content.trim();
        if trimmed.is_empty() || trimmed == "default" {
            return Self::Unlocked;
        }
        let parts: Vec<&str> = trimmed.split(',').collect();
        if parts.len() == 2 {
            if let (Ok(min), Ok(max)) = (parts[0].trim().parse(), parts[1].trim().parse()) {
                if crate::validation::validate_clock_range(min, max, None).is_ok() {
                    return Self::Locked { min_mhz: min, max_mhz: max };
                }
            }
        }
        warn!("ignoring invalid clock lock marker content: {:?}", trimmed);
        Self::Unlocked
    }
}

/// The per-GPU settings document persisted after each successful apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistedSettings {
    pub gpu_id: u32,
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

impl PersistedSettings {
    pub fn empty(gpu_id: u32) -> Self {
        Self {
            gpu_id,
            clock_lock: None,
            mem_offset: None,
            power_limit: None,
            persistence_mode: None,
            perf_mode: None,
            fan: None,
        }
    }

    pub fn from_profile(gpu_id: u32, profile: &Profile) -> Self {
        Self {
            gpu_id,
            clock_lock: profile.clock_lock,
            mem_offset: profile.mem_offset,
            power_limit: profile.power_limit,
            persistence_mode: profile.persistence_mode,
            perf_mode: profile.perf_mode,
            fan: profile.fan,
        }
    }

    /// Rehydrate as an applicable profile (used by startup restore)
    pub fn to_profile(&self) -> Profile {
        Profile {
            name: format!("restored-gpu{}", self.gpu_id),
            clock_lock: self.clock_lock,
            mem_offset: self.mem_offset,
            power_limit: self.power_limit,
            persistence_mode: self.persistence_mode,
            perf_mode: self.perf_mode,
            fan: self.fan,
        }
    }
}

/// Owner of the on-disk representation under the config directory
#[derive(Debug, Clone)]
pub struct SettingsStore {
    config_dir: PathBuf,
}

impl SettingsStore {
    /// Store rooted at an explicit directory (tests use a temp dir)
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self { config_dir: config_dir.into() }
    }

    /// Store rooted at the user config directory, creating it if needed
    pub fn default_location() -> Result<Self> {
        let dir = paths::user_config_dir()
            .ok_or_else(|| NvtweakError::generic("could not determine config directory"))?;
        fs::create_dir_all(&dir)?;
        Ok(Self { config_dir: dir })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        validate_config_path(&self.config_dir, name)
    }

    // ------------------------------------------------------------------
    // Per-GPU settings documents
    // ------------------------------------------------------------------

    /// Atomically write the settings document for one GPU
    pub fn save_settings(&self, doc: &PersistedSettings) -> Result<()> {
        let path = self.resolve(&paths::settings_file_name(doc.gpu_id))?;
        let json = serde_json::to_string_pretty(doc)?;
        // Guard against a pathological document growing past the load ceiling
        check_size(&path, json.len() as u64, limits::MAX_SETTINGS_SIZE)?;
        self.atomic_write(&path, json.as_bytes())?;
        debug!(gpu = doc.gpu_id, path = %path.display(), "saved settings");
        Ok(())
    }

    /// Load the settings document for one GPU.
    ///
    /// Returns `NotFound` when no document exists; malformed or oversized
    /// content is rejected before the typed parse.
    pub fn load_settings(&self, gpu_id: u32) -> Result<PersistedSettings> {
        let path = self.resolve(&paths::settings_file_name(gpu_id))?;
        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(NvtweakError::NotFound(path))
            }
            Err(e) => return Err(e.into()),
        };
        check_size(&path, metadata.len(), limits::MAX_SETTINGS_SIZE)?;

        let raw = fs::read_to_string(&path)?;
        check_settings_document(&path, &raw)?;
        let doc: PersistedSettings = serde_json::from_str(&raw)
            .map_err(|e| NvtweakError::malformed(&path, format!("unexpected field types: {}", e)))?;
        if doc.gpu_id != gpu_id {
            return Err(NvtweakError::malformed(
                &path,
                format!("document is for GPU {}, expected {}", doc.gpu_id, gpu_id),
            ));
        }
        Ok(doc)
    }

    /// Remove the settings document for one GPU (config wipe)
    pub fn delete_settings(&self, gpu_id: u32) -> Result<()> {
        let path = self.resolve(&paths::settings_file_name(gpu_id))?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Clock lock markers
    // ------------------------------------------------------------------

    /// Atomically record the clock lock state for one GPU
    pub fn write_lock_marker(&self, gpu_id: u32, state: LockState) -> Result<()> {
        let path = self.resolve(&paths::marker_file_name(gpu_id))?;
        self.atomic_write(&path, state.to_marker().as_bytes())
    }

    /// Read the clock lock state for one GPU. Absent marker means unlocked;
    /// oversized markers are rejected before reading.
    pub fn read_lock_marker(&self, gpu_id: u32) -> Result<LockState> {
        let path = self.resolve(&paths::marker_file_name(gpu_id))?;
        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LockState::Unlocked),
            Err(e) => return Err(e.into()),
        };
        check_size(&path, metadata.len(), limits::MAX_MARKER_SIZE)?;
        let content = fs::read_to_string(&path)?;
        Ok(LockState::from_marker(&content))
    }

    /// Remove the marker (explicit unlock / reset)
    pub fn clear_lock_marker(&self, gpu_id: u32) -> Result<()> {
        let path = self.resolve(&paths::marker_file_name(gpu_id))?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Custom profiles
    // ------------------------------------------------------------------

    /// Save a user-named profile as `profile_<name>.json`
    pub fn save_profile(&self, profile: &Profile) -> Result<()> {
        let name = validate_profile_name(&profile.name)?;
        let path = self.resolve(&paths::profile_file_name(&name))?;
        let json = serde_json::to_string_pretty(profile)?;
        check_size(&path, json.len() as u64, limits::MAX_SETTINGS_SIZE)?;
        self.atomic_write(&path, json.as_bytes())?;
        debug!(profile = %name, "saved custom profile");
        Ok(())
    }

    pub fn load_profile(&self, name: &str) -> Result<Profile> {
        let name = validate_profile_name(name)?;
        let path = self.resolve(&paths::profile_file_name(&name))?;
        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(NvtweakError::NotFound(path))
            }
            Err(e) => return Err(e.into()),
        };
        check_size(&path, metadata.len(), limits::MAX_SETTINGS_SIZE)?;
        let raw = fs::read_to_string(&path)?;
        serde_json::from_str(&raw)
            .map_err(|e| NvtweakError::malformed(&path, format!("invalid profile: {}", e)))
    }

    /// Names of all stored custom profiles
    pub fn list_profiles(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.config_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(stem) = file_name
                .strip_prefix("profile_")
                .and_then(|s| s.strip_suffix(".json"))
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn delete_profile(&self, name: &str) -> Result<()> {
        let name = validate_profile_name(name)?;
        let path = self.resolve(&paths::profile_file_name(&name))?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------

    /// Temp-file-plus-rename write. The temp file lives in the same
    /// directory as the target so the rename stays on one filesystem; on
    /// any failure the temp file is discarded and the original is left
    /// untouched.
    fn atomic_write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.config_dir).map_err(|e| NvtweakError::Persistence {
            path: self.config_dir.clone(),
            source: e,
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = path.with_file_name(format!("{}.tmp", file_name));

        let result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&tmp_path, path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(NvtweakError::Persistence {
                path: path.to_path_buf(),
                source: e,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::FanMode;
    use tempfile::tempdir;

    fn sample_doc(gpu_id: u32) -> PersistedSettings {
        PersistedSettings {
            gpu_id,
            clock_lock: Some(ClockLock { min_mhz: 2400, max_mhz: 2850 }),
            mem_offset: Some(500),
            power_limit: Some(450),
            persistence_mode: Some(true),
            perf_mode: Some(PerformanceMode::MaxPerformance),
            fan: Some(FanSettings { mode: FanMode::Auto, speed_percent: 0 }),
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let doc = sample_doc(0);
        store.save_settings(&doc).unwrap();
        assert_eq!(store.load_settings(0).unwrap(), doc);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        assert!(matches!(
            store.load_settings(5),
            Err(NvtweakError::NotFound(_))
        ));
    }

    #[test]
    fn test_save_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        store.save_settings(&sample_doc(1)).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_save_overwrites_atomically() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let mut doc = sample_doc(0);
        store.save_settings(&doc).unwrap();
        doc.power_limit = Some(300);
        store.save_settings(&doc).unwrap();
        assert_eq!(store.load_settings(0).unwrap().power_limit, Some(300));
    }

    #[test]
    fn test_load_rejects_oversized_document() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let path = dir.path().join(paths::settings_file_name(0));
        std::fs::write(&path, "x".repeat((limits::MAX_SETTINGS_SIZE + 1) as usize)).unwrap();
        assert!(matches!(
            store.load_settings(0),
            Err(NvtweakError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_load_rejects_malformed_document() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let path = dir.path().join(paths::settings_file_name(0));
        std::fs::write(&path, "{not json").unwrap();
        let err = store.load_settings(0).unwrap_err();
        assert!(err.is_config_corruption());
    }

    #[test]
    fn test_load_rejects_gpu_id_mismatch() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let doc = sample_doc(3);
        store.save_settings(&doc).unwrap();
        // File renamed to another GPU's slot
        std::fs::rename(
            dir.path().join(paths::settings_file_name(3)),
            dir.path().join(paths::settings_file_name(4)),
        )
        .unwrap();
        assert!(store.load_settings(4).unwrap_err().is_config_corruption());
    }

    #[test]
    fn test_lock_marker_transitions() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());

        assert_eq!(store.read_lock_marker(0).unwrap(), LockState::Unlocked);

        let locked = LockState::Locked { min_mhz: 2400, max_mhz: 2850 };
        store.write_lock_marker(0, locked).unwrap();
        assert_eq!(store.read_lock_marker(0).unwrap(), locked);

        store.clear_lock_marker(0).unwrap();
        assert_eq!(store.read_lock_marker(0).unwrap(), LockState::Unlocked);
    }

    #[test]
    fn test_lock_markers_are_per_gpu() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        store
            .write_lock_marker(0, LockState::Locked { min_mhz: 1200, max_mhz: 1400 })
            .unwrap();
        assert_eq!(store.read_lock_marker(1).unwrap(), LockState::Unlocked);
    }

    #[test]
    fn test_marker_garbage_degrades_to_unlocked() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let path = dir.path().join(paths::marker_file_name(0));
        for garbage in ["not,numbers", "100", "50,99999", "2850,2400"] {
            std::fs::write(&path, garbage).unwrap();
            assert_eq!(store.read_lock_marker(0).unwrap(), LockState::Unlocked);
        }
    }

    #[test]
    fn test_marker_size_ceiling() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let path = dir.path().join(paths::marker_file_name(0));
        std::fs::write(&path, "9".repeat(2048)).unwrap();
        assert!(matches!(
            store.read_lock_marker(0),
            Err(NvtweakError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_custom_profile_round_trip_and_listing() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let mut profile = Profile::builtin("quiet").unwrap();
        profile.name = "night-shift".to_string();

        store.save_profile(&profile).unwrap();
        assert_eq!(store.load_profile("night-shift").unwrap(), profile);
        assert_eq!(store.list_profiles().unwrap(), vec!["night-shift"]);

        store.delete_profile("night-shift").unwrap();
        assert!(store.list_profiles().unwrap().is_empty());
    }

    #[test]
    fn test_profile_name_traversal_rejected() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let mut profile = Profile::builtin("quiet").unwrap();
        profile.name = "../evil".to_string();
        assert!(store.save_profile(&profile).is_err());
        assert!(store.load_profile("../../etc/passwd").is_err());
    }

    #[test]
    fn test_lock_state_marker_format() {
        assert_eq!(LockState::Unlocked.to_marker(), "default");
        assert_eq!(
            LockState::Locked { min_mhz: 210, max_mhz: 1500 }.to_marker(),
            "210,1500"
        );
        assert_eq!(LockState::from_marker("default"), LockState::Unlocked);
        assert_eq!(
            LockState::from_marker("210,1500"),
            LockState::Locked { min_mhz: 210, max_mhz: 1500 }
        );
    }
}

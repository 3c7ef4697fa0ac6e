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

//! Profile application and state restoration
//!
//! The manager owns the only path that changes hardware state. An apply is
//! an all-or-nothing pre-check followed by a fixed command sequence; the
//! first failing step stops the sequence, and whatever was applied up to
//! that point is persisted so a later restore reproduces the real state.
//! There is no rollback: partially applied settings stay applied.
//!
//! Apply order: power limit, persistence mode, performance mode, clock
//! lock (with a reset first when a lock is already active), fan control,
//! memory offset last. Power before clocks so a tighter limit is in place
//! before frequencies move; the memory offset goes last because it is the
//! most likely to be rejected by the driver.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::{NvtweakError, Result};
use crate::persistence::{LockState, PersistedSettings, SettingsStore};
use crate::profile::{FanMode, Profile};
use crate::query::{self, GpuIdentity, GpuStatus, HardwareBounds};
use crate::validation::validate_gpu_id;

/// One step in the apply sequence
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApplyStep {
    PowerLimit,
    PersistenceMode,
    PerformanceMode,
    ClockReset,
    ClockLock,
    Fan,
    MemoryOffset,
}

impl std::fmt::Display for ApplyStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PowerLimit => "power limit",
            Self::PersistenceMode => "persistence mode",
            Self::PerformanceMode => "performance mode",
            Self::ClockReset => "clock reset",
            Self::ClockLock => "clock lock",
            Self::Fan => "fan control",
            Self::MemoryOffset => "memory offset",
        };
        f.write_str(s)
    }
}

/// Result of applying a profile to one GPU
#[derive(Debug)]
pub struct ApplyOutcome {
    pub gpu_id: u32,
    pub profile: String,
    pub applied: Vec<ApplyStep>,
    /// The step that stopped the sequence, if any
    pub failed: Option<(ApplyStep, NvtweakError)>,
}

impl ApplyOutcome {
    pub fn is_full_success(&self) -> bool {
        self.failed.is_none()
    }

    pub fn is_partial(&self) -> bool {
        self.failed.is_some() && !self.applied.is_empty()
    }
}

/// Coordinates validation, command dispatch and persistence for all GPUs.
///
/// Per-GPU mutexes serialize applies against the same card; different
/// cards can be driven concurrently.
pub struct GpuManager {
    runner: Arc<dyn CommandRunner>,
    store: SettingsStore,
    gpu_locks: Mutex<HashMap<u32, Arc<Mutex<()>>>>,
}

impl GpuManager {
    pub fn new(runner: Arc<dyn CommandRunner>, store: SettingsStore) -> Self {
        Self {
            runner,
            store,
            gpu_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    fn gpu_lock(&self, gpu_id: u32) -> Arc<Mutex<()>> {
        self.gpu_locks.lock().entry(gpu_id).or_default().clone()
    }

    fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
        self.runner.run(&spec)
    }

    /// Enumerate GPUs
    pub fn gpus(&self) -> Result<Vec<GpuIdentity>> {
        query::detect_gpus(self.runner.as_ref())
    }

    /// Status snapshot for one GPU
    pub fn status(&self, gpu_id: i64) -> Result<GpuStatus> {
        let gpu_id = validate_gpu_id(gpu_id)?;
        query::query_status(self.runner.as_ref(), gpu_id)
    }

    /// Current clock lock state as recorded on disk. Corrupt marker files
    /// degrade to `Unlocked` rather than blocking reads.
    pub fn lock_state(&self, gpu_id: i64) -> Result<LockState> {
        let gpu_id = validate_gpu_id(gpu_id)?;
        match self.store.read_lock_marker(gpu_id) {
            Ok(state) => Ok(state),
            Err(e) if e.is_config_corruption() => {
                warn!(gpu = gpu_id, "unreadable lock marker, treating as unlocked: {}", e);
                Ok(LockState::Unlocked)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply a profile to one GPU.
    ///
    /// Validation failures return before any command is issued. Once the
    /// sequence starts, the applied subset is persisted even when a later
    /// step fails; the failing step is reported in the outcome.
    pub fn apply_profile(&self, gpu_id: i64, profile: &Profile) -> Result<ApplyOutcome> {
        let gpu_id = validate_gpu_id(gpu_id)?;
        let lock = self.gpu_lock(gpu_id);
        let _guard = lock.lock();

        let bounds = match query::query_status(self.runner.as_ref(), gpu_id) {
            Ok(status) => HardwareBounds::from_status(&status),
            Err(e) => {
                warn!(gpu = gpu_id, "status query failed, using global bounds: {}", e);
                HardwareBounds::default()
            }
        };
        let coolbits = query::check_coolbits(self.runner.as_ref());

        profile.validate(&bounds, coolbits)?;

        let prior_lock = self.lock_state(gpu_id as i64)?;
        let mut doc = self.load_or_empty(gpu_id);
        let mut applied = Vec::new();

        info!(gpu = gpu_id, profile = %profile.name, "applying profile");

        let failed = self
            .run_sequence(gpu_id, profile, prior_lock, &mut doc, &mut applied)
            .err();

        if let Some((step, e)) = &failed {
            warn!(gpu = gpu_id, step = %step, "apply stopped: {}", e);
        }

        self.store.save_settings(&doc)?;

        Ok(ApplyOutcome {
            gpu_id,
            profile: profile.name.clone(),
            applied,
            failed,
        })
    }

    /// The fixed apply sequence; returns the failing step as the error
    fn run_sequence(
        &self,
        gpu_id: u32,
        profile: &Profile,
        prior_lock: LockState,
        doc: &mut PersistedSettings,
        applied: &mut Vec<ApplyStep>,
    ) -> std::result::Result<(), (ApplyStep, NvtweakError)> {
        if let Some(watts) = profile.power_limit {
            self.run(CommandSpec::smi_set(
                &["-pl".to_string(), watts.to_string()],
                gpu_id,
            ))
            .map_err(|e| (ApplyStep::PowerLimit, e))?;
            doc.power_limit = Some(watts);
            applied.push(ApplyStep::PowerLimit);
        }

        if let Some(enabled) = profile.persistence_mode {
            let flag = if enabled { "1" } else { "0" };
            self.run(CommandSpec::smi_set(
                &["-pm".to_string(), flag.to_string()],
                gpu_id,
            ))
            .map_err(|e| (ApplyStep::PersistenceMode, e))?;
            doc.persistence_mode = Some(enabled);
            applied.push(ApplyStep::PersistenceMode);
        }

        if let Some(mode) = profile.perf_mode {
            self.run(settings_assign(format!(
                "[gpu:{}]/GpuPowerMizerMode={}",
                gpu_id,
                mode.powermizer_value()
            )))
            .map_err(|e| (ApplyStep::PerformanceMode, e))?;
            doc.perf_mode = Some(mode);
            applied.push(ApplyStep::PerformanceMode);
        }

        match profile.clock_lock {
            Some(lock) => {
                // A fresh -lgc on top of an existing lock can wedge some
                // driver versions, so release the old window first.
                if prior_lock != LockState::Unlocked {
                    self.run(CommandSpec::smi_set(&["-rgc".to_string()], gpu_id))
                        .map_err(|e| (ApplyStep::ClockReset, e))?;
                    self.record_lock(gpu_id, LockState::Unlocked, doc);
                    applied.push(ApplyStep::ClockReset);
                }
                self.run(CommandSpec::smi_set(
                    &[
                        "-lgc".to_string(),
                        format!("{},{}", lock.min_mhz, lock.max_mhz),
                    ],
                    gpu_id,
                ))
                .map_err(|e| (ApplyStep::ClockLock, e))?;
                self.record_lock(
                    gpu_id,
                    LockState::Locked {
                        min_mhz: lock.min_mhz,
                        max_mhz: lock.max_mhz,
                    },
                    doc,
                );
                applied.push(ApplyStep::ClockLock);
            }
            // No lock in the profile means the GPU manages its own clocks
            None => {
                self.run(CommandSpec::smi_set(&["-rgc".to_string()], gpu_id))
                    .map_err(|e| (ApplyStep::ClockReset, e))?;
                self.record_lock(gpu_id, LockState::Unlocked, doc);
                applied.push(ApplyStep::ClockReset);
            }
        }

        if let Some(fan) = profile.fan {
            let manual = fan.mode == FanMode::Manual;
            let state = if manual { "1" } else { "0" };
            self.run(settings_assign(format!(
                "[gpu:{}]/GPUFanControlState={}",
                gpu_id, state
            )))
            .map_err(|e| (ApplyStep::Fan, e))?;
            if manual {
                self.run(settings_assign(format!(
                    "[fan:{}]/GPUTargetFanSpeed={}",
                    gpu_id, fan.speed_percent
                )))
                .map_err(|e| (ApplyStep::Fan, e))?;
            }
            doc.fan = Some(fan);
            applied.push(ApplyStep::Fan);
        }

        if let Some(offset) = profile.mem_offset {
            self.run(settings_assign(format!(
                "[gpu:{}]/GPUMemoryTransferRateOffset[3]={}",
                gpu_id, offset
            )))
            .map_err(|e| (ApplyStep::MemoryOffset, e))?;
            doc.mem_offset = Some(offset);
            applied.push(ApplyStep::MemoryOffset);
        }

        Ok(())
    }

    /// Release any clock lock on a GPU and clear the marker
    pub fn unlock_clocks(&self, gpu_id: i64) -> Result<()> {
        let gpu_id = validate_gpu_id(gpu_id)?;
        let lock = self.gpu_lock(gpu_id);
        let _guard = lock.lock();

        self.run(CommandSpec::smi_set(&["-rgc".to_string()], gpu_id))?;
        self.store.clear_lock_marker(gpu_id)?;

        match self.store.load_settings(gpu_id) {
            Ok(mut doc) => {
                doc.clock_lock = None;
                self.store.save_settings(&doc)?;
            }
            Err(NvtweakError::NotFound(_)) => {}
            Err(e) if e.is_config_corruption() => {
                warn!(gpu = gpu_id, "not updating corrupt settings document: {}", e);
            }
            Err(e) => return Err(e),
        }
        info!(gpu = gpu_id, "clocks unlocked");
        Ok(())
    }

    /// Re-apply the persisted settings for one GPU, if any.
    ///
    /// A missing document means nothing to restore. A document that is
    /// corrupt, or no longer valid for the current hardware (a card swap
    /// can shrink the power window), is reported and skipped rather than
    /// failing startup.
    pub fn restore(&self, gpu_id: i64) -> Result<Option<ApplyOutcome>> {
        let gpu_id = validate_gpu_id(gpu_id)?;
        let doc = match self.store.load_settings(gpu_id) {
            Ok(doc) => doc,
            Err(NvtweakError::NotFound(_)) => return Ok(None),
            Err(e) if e.is_config_corruption() => {
                warn!(gpu = gpu_id, "skipping restore, settings unreadable: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let profile = doc.to_profile();
        match self.apply_profile(gpu_id as i64, &profile) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e)
                if e.is_validation() || matches!(e, NvtweakError::CapabilityMissing(_)) =>
            {
                warn!(gpu = gpu_id, "skipping restore, saved settings rejected: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Restore persisted settings on every detected GPU. A failure on one
    /// GPU is logged and does not stop the others from being restored.
    pub fn restore_all(&self) -> Result<Vec<ApplyOutcome>> {
        let mut outcomes = Vec::new();
        for gpu in self.gpus()? {
            match self.restore(gpu.id as i64) {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => warn!(gpu = gpu.id, "restore failed: {}", e),
            }
        }
        Ok(outcomes)
    }

    fn load_or_empty(&self, gpu_id: u32) -> PersistedSettings {
        match self.store.load_settings(gpu_id) {
            Ok(doc) => doc,
            Err(NvtweakError::NotFound(_)) => PersistedSettings::empty(gpu_id),
            Err(e) => {
                warn!(gpu = gpu_id, "starting from empty settings, load failed: {}", e);
                PersistedSettings::empty(gpu_id)
            }
        }
    }

    /// Marker writes track hardware state best-effort; a failed marker
    /// write must not undo a command that already succeeded.
    fn record_lock(&self, gpu_id: u32, state: LockState, doc: &mut PersistedSettings) {
        doc.clock_lock = match state {
            LockState::Unlocked => None,
            LockState::Locked { min_mhz, max_mhz } => {
                Some(crate::profile::ClockLock { min_mhz, max_mhz })
            }
        };
        let result = match state {
            LockState::Unlocked => self.store.clear_lock_marker(gpu_id),
            locked => self.store.write_lock_marker(gpu_id, locked),
        };
        if let Err(e) = result {
            warn!(gpu = gpu_id, "failed to update lock marker: {}", e);
        } else {
            debug!(gpu = gpu_id, state = %state.to_marker(), "lock marker updated");
        }
    }
}

fn settings_assign(attribute: String) -> CommandSpec {
    CommandSpec::settings_set(&["-a".to_string(), attribute])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Tool;
    use crate::profile::{ClockLock, FanSettings};
    use tempfile::tempdir;

    const STATUS_LINE: &str = "NVIDIA GeForce RTX 4090, GPU-8f34, 2520, 3165, 10501, 10501, \
321.53, 450.00, 100.00, 600.00, 63, 55, 97, 41, P0, Enabled";

    /// Scripted runner: answers queries from canned output, records every
    /// mutating argv in order, and fails any argv containing `fail_on`.
    struct FakeRunner {
        calls: Mutex<Vec<Vec<String>>>,
        fail_on: Option<&'static str>,
        coolbits: bool,
        status_line: &'static str,
        gpu_list: &'static str,
    }

    impl FakeRunner {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: None,
                coolbits: true,
                status_line: STATUS_LINE,
                gpu_list: "0, NVIDIA GeForce RTX 4090, GPU-8f34\n",
            }
        }

        fn failing_on(pattern: &'static str) -> Self {
            Self {
                fail_on: Some(pattern),
                ..Self::new()
            }
        }

        fn mutating_calls(&self) -> Vec<String> {
            self.calls
                .lock()
                .iter()
                .map(|argv| argv.join(" "))
                .collect()
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            let argv = spec.argv();
            let joined = argv.join(" ");

            if joined.contains("--query-gpu=index") {
                return Ok(CommandOutput {
                    stdout: self.gpu_list.to_string(),
                    stderr: String::new(),
                });
            }
            if joined.contains("--query-gpu=name") {
                return Ok(CommandOutput {
                    stdout: format!("{}\n", self.status_line),
                    stderr: String::new(),
                });
            }
            if spec.tool == Tool::NvidiaSettings && argv.contains(&"-q".to_string()) {
                if self.coolbits {
                    return Ok(CommandOutput::default());
                }
                return Err(NvtweakError::CommandFailed {
                    tool: "nvidia-settings".to_string(),
                    exit_code: Some(1),
                    stderr: "unknown attribute".to_string(),
                });
            }

            self.calls.lock().push(argv);
            if let Some(pattern) = self.fail_on {
                if joined.contains(pattern) {
                    return Err(NvtweakError::CommandFailed {
                        tool: spec.tool.as_str().to_string(),
                        exit_code: Some(1),
                        stderr: "simulated failure".to_string(),
                    });
                }
            }
            Ok(CommandOutput::default())
        }
    }

    fn manager_with(runner: FakeRunner, dir: &std::path::Path) -> (GpuManager, Arc<FakeRunner>) {
        let runner = Arc::new(runner);
        let manager = GpuManager::new(runner.clone(), SettingsStore::new(dir));
        (manager, runner)
    }

    #[test]
    fn test_apply_gaming_issues_expected_sequence() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager_with(FakeRunner::new(), dir.path());
        let gaming = Profile::builtin("gaming").unwrap();

        let outcome = manager.apply_profile(0, &gaming).unwrap();
        assert!(outcome.is_full_success());
        assert_eq!(
            outcome.applied,
            vec![
                ApplyStep::PowerLimit,
                ApplyStep::PerformanceMode,
                ApplyStep::ClockLock
            ]
        );

        assert_eq!(
            runner.mutating_calls(),
            vec![
                "nvidia-smi -i 0 -pl 450",
                "nvidia-settings -a [gpu:0]/GpuPowerMizerMode=1",
                "nvidia-smi -i 0 -lgc 2400,2850",
            ]
        );

        let doc = manager.store().load_settings(0).unwrap();
        assert_eq!(doc.power_limit, Some(450));
        assert_eq!(
            doc.clock_lock,
            Some(ClockLock { min_mhz: 2400, max_mhz: 2850 })
        );
        assert_eq!(
            manager.lock_state(0).unwrap(),
            LockState::Locked { min_mhz: 2400, max_mhz: 2850 }
        );
    }

    #[test]
    fn test_apply_is_idempotent() {
        let dir = tempdir().unwrap();
        let (manager, _runner) = manager_with(FakeRunner::new(), dir.path());
        let quiet = Profile::builtin("quiet").unwrap();

        manager.apply_profile(0, &quiet).unwrap();
        let first = manager.store().load_settings(0).unwrap();

        // Second apply resets the existing lock before re-locking
        let outcome = manager.apply_profile(0, &quiet).unwrap();
        assert!(outcome.applied.contains(&ApplyStep::ClockReset));
        assert_eq!(manager.store().load_settings(0).unwrap(), first);
    }

    #[test]
    fn test_invalid_profile_issues_no_mutating_command() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager_with(FakeRunner::new(), dir.path());

        let mut bad = Profile::builtin("gaming").unwrap();
        bad.power_limit = Some(700);

        let err = manager.apply_profile(0, &bad).unwrap_err();
        assert!(matches!(err, NvtweakError::InvalidPowerLimit { .. }));
        assert!(runner.mutating_calls().is_empty());
        assert!(matches!(
            manager.store().load_settings(0),
            Err(NvtweakError::NotFound(_))
        ));
    }

    #[test]
    fn test_partial_failure_persists_applied_subset() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager_with(
            FakeRunner::failing_on("GPUFanControlState"),
            dir.path(),
        );

        let mut profile = Profile::builtin("gaming").unwrap();
        profile.fan = Some(FanSettings {
            mode: FanMode::Manual,
            speed_percent: 70,
        });
        profile.mem_offset = Some(500);

        let outcome = manager.apply_profile(0, &profile).unwrap();
        assert!(outcome.is_partial());
        assert_eq!(outcome.failed.as_ref().unwrap().0, ApplyStep::Fan);
        assert_eq!(
            outcome.applied,
            vec![
                ApplyStep::PowerLimit,
                ApplyStep::PerformanceMode,
                ApplyStep::ClockLock
            ]
        );

        // Memory offset never ran
        assert!(!runner
            .mutating_calls()
            .iter()
            .any(|c| c.contains("GPUMemoryTransferRateOffset")));

        // Applied subset persisted; failed and skipped steps are not
        let doc = manager.store().load_settings(0).unwrap();
        assert_eq!(doc.power_limit, Some(450));
        assert!(doc.clock_lock.is_some());
        assert!(doc.fan.is_none());
        assert!(doc.mem_offset.is_none());
        assert_eq!(
            manager.lock_state(0).unwrap(),
            LockState::Locked { min_mhz: 2400, max_mhz: 2850 }
        );
    }

    #[test]
    fn test_profile_without_lock_resets_clocks() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager_with(FakeRunner::new(), dir.path());

        manager
            .apply_profile(0, &Profile::builtin("gaming").unwrap())
            .unwrap();
        manager
            .apply_profile(0, &Profile::builtin("balanced").unwrap())
            .unwrap();

        let calls = runner.mutating_calls();
        assert!(calls.iter().any(|c| c == "nvidia-smi -i 0 -rgc"));
        assert_eq!(manager.lock_state(0).unwrap(), LockState::Unlocked);
        assert!(manager.store().load_settings(0).unwrap().clock_lock.is_none());
    }

    #[test]
    fn test_manual_fan_requires_coolbits() {
        let dir = tempdir().unwrap();
        let mut runner = FakeRunner::new();
        runner.coolbits = false;
        let (manager, runner) = manager_with(runner, dir.path());

        let mut profile = Profile::builtin("balanced").unwrap();
        profile.fan = Some(FanSettings {
            mode: FanMode::Manual,
            speed_percent: 60,
        });

        let err = manager.apply_profile(0, &profile).unwrap_err();
        assert!(matches!(err, NvtweakError::CapabilityMissing(_)));
        assert!(runner.mutating_calls().is_empty());
    }

    #[test]
    fn test_manual_fan_sets_state_then_speed() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager_with(FakeRunner::new(), dir.path());

        let mut profile = Profile::builtin("balanced").unwrap();
        profile.fan = Some(FanSettings {
            mode: FanMode::Manual,
            speed_percent: 65,
        });

        let outcome = manager.apply_profile(1, &profile).unwrap();
        assert!(outcome.is_full_success());

        let calls = runner.mutating_calls();
        let state_pos = calls
            .iter()
            .position(|c| c.contains("[gpu:1]/GPUFanControlState=1"))
            .unwrap();
        let speed_pos = calls
            .iter()
            .position(|c| c.contains("[fan:1]/GPUTargetFanSpeed=65"))
            .unwrap();
        assert!(state_pos < speed_pos);
    }

    #[test]
    fn test_mining_profile_applies_memory_offset_last() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager_with(FakeRunner::new(), dir.path());

        manager
            .apply_profile(0, &Profile::builtin("mining").unwrap())
            .unwrap();

        let calls = runner.mutating_calls();
        assert_eq!(
            calls.last().unwrap(),
            "nvidia-settings -a [gpu:0]/GPUMemoryTransferRateOffset[3]=1000"
        );
    }

    #[test]
    fn test_apply_rejects_invalid_gpu_id() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager_with(FakeRunner::new(), dir.path());
        let gaming = Profile::builtin("gaming").unwrap();

        for bad in [-1, 128, 9999] {
            let err = manager.apply_profile(bad, &gaming).unwrap_err();
            assert!(matches!(err, NvtweakError::InvalidGpuId { .. }));
        }
        assert!(runner.mutating_calls().is_empty());
    }

    #[test]
    fn test_unlock_clears_marker_and_document_lock() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager_with(FakeRunner::new(), dir.path());

        manager
            .apply_profile(0, &Profile::builtin("gaming").unwrap())
            .unwrap();
        manager.unlock_clocks(0).unwrap();

        assert_eq!(manager.lock_state(0).unwrap(), LockState::Unlocked);
        assert!(manager.store().load_settings(0).unwrap().clock_lock.is_none());
        assert!(runner
            .mutating_calls()
            .iter()
            .any(|c| c == "nvidia-smi -i 0 -rgc"));
    }

    #[test]
    fn test_restore_reapplies_persisted_settings() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager_with(FakeRunner::new(), dir.path());
        manager
            .apply_profile(0, &Profile::builtin("gaming").unwrap())
            .unwrap();

        // Fresh manager simulating a restart
        let (manager, runner) = manager_with(FakeRunner::new(), dir.path());
        let outcome = manager.restore(0).unwrap().unwrap();
        assert!(outcome.is_full_success());
        assert!(runner
            .mutating_calls()
            .iter()
            .any(|c| c.contains("-lgc 2400,2850")));
    }

    #[test]
    fn test_restore_without_saved_state_is_a_no_op() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager_with(FakeRunner::new(), dir.path());
        assert!(manager.restore(0).unwrap().is_none());
        assert!(runner.mutating_calls().is_empty());
    }

    #[test]
    fn test_restore_skips_corrupt_document() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(crate::constants::paths::settings_file_name(0)),
            "{broken",
        )
        .unwrap();

        let (manager, runner) = manager_with(FakeRunner::new(), dir.path());
        assert!(manager.restore(0).unwrap().is_none());
        assert!(runner.mutating_calls().is_empty());
    }

    #[test]
    fn test_restore_skips_settings_invalid_for_current_hardware() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let mut stale = PersistedSettings::empty(0);
        stale.power_limit = Some(450);
        store.save_settings(&stale).unwrap();
        let mut good = PersistedSettings::empty(1);
        good.power_limit = Some(300);
        store.save_settings(&good).unwrap();

        // Card reports a 35-350 W window: 450 W is stale, 300 W still fits
        let mut runner = FakeRunner::new();
        runner.status_line = "NVIDIA RTX A2000, GPU-cc, 900, 1200, 6000, 6001, \
40.00, 70.00, 35.00, 350.00, 50, 30, 10, 5, P2, Disabled";
        runner.gpu_list = "0, NVIDIA RTX A2000, GPU-cc\n1, NVIDIA RTX A2000, GPU-dd\n";
        let (manager, runner) = manager_with(runner, dir.path());

        let outcomes = manager.restore_all().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].gpu_id, 1);

        let calls = runner.mutating_calls();
        assert!(calls.iter().any(|c| c.contains("-i 1 -pl 300")));
        assert!(!calls.iter().any(|c| c.contains("-pl 450")));
    }

    #[test]
    fn test_restore_all_covers_detected_gpus() {
        let dir = tempdir().unwrap();
        let (manager, _) = manager_with(FakeRunner::new(), dir.path());
        manager
            .apply_profile(0, &Profile::builtin("quiet").unwrap())
            .unwrap();

        let (manager, _) = manager_with(FakeRunner::new(), dir.path());
        let outcomes = manager.restore_all().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].gpu_id, 0);
    }
}

//! Unified error handling for nvtweak
//!
//! This crate provides a single error type used across all nvtweak components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using NvtweakError
pub type Result<T> = std::result::Result<T, NvtweakError>;

/// Unified error type for all nvtweak operations
#[derive(thiserror::Error, Debug)]
pub enum NvtweakError {
    // ============================================================================
    // Value Validation Errors
    // ============================================================================
    #[error("Invalid GPU id: {value} (must be 0-127)")]
    InvalidGpuId {
        value: i64,
    },

    #[error("Invalid clock range: {min}-{max} MHz (allowed {bound_min}-{bound_max} MHz, min <= max)")]
    InvalidClockRange {
        min: u32,
        max: u32,
        bound_min: u32,
        bound_max: u32,
    },

    #[error("Invalid power limit: {value} W (allowed {min}-{max} W)")]
    InvalidPowerLimit {
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("Invalid fan speed: {value}% (must be 0-100)")]
    InvalidFanSpeed {
        value: i64,
    },

    #[error("Invalid memory offset: {value} MHz (must be -2000 to 2000)")]
    InvalidMemoryOffset {
        value: i64,
    },

    #[error("Invalid profile name {name:?}: {reason}")]
    InvalidProfileName {
        name: String,
        reason: String,
    },

    // ============================================================================
    // Capability Errors
    // ============================================================================
    #[error("Capability not available: {0}")]
    CapabilityMissing(String),

    // ============================================================================
    // Path and Config File Errors
    // ============================================================================
    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(PathBuf),

    #[error("Malformed config {path}: {reason}")]
    MalformedConfig {
        path: PathBuf,
        reason: String,
    },

    #[error("File too large: {path} ({size} bytes, max {max_size} bytes)")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to persist {path}: {source}")]
    Persistence {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // External Command Errors
    // ============================================================================
    #[error("Command not in whitelist: {0}")]
    DisallowedCommand(String),

    #[error("Command timed out after {timeout_ms} ms: {tool}")]
    Timeout {
        tool: String,
        timeout_ms: u64,
    },

    #[error("{tool} failed (exit code {exit_code:?}): {stderr}")]
    CommandFailed {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("{0}")]
    Generic(String),
}

impl NvtweakError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a malformed-config error
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedConfig {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that mean "the on-disk state is unusable" rather than
    /// "the operation itself failed". Startup restore treats these as absent
    /// state instead of failing the whole process.
    pub fn is_config_corruption(&self) -> bool {
        matches!(
            self,
            Self::PathTraversal(_)
                | Self::MalformedConfig { .. }
                | Self::FileTooLarge { .. }
                | Self::JsonParse(_)
        )
    }

    /// True if the error is a pre-flight validation rejection (no command was issued).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidGpuId { .. }
                | Self::InvalidClockRange { .. }
                | Self::InvalidPowerLimit { .. }
                | Self::InvalidFanSpeed { .. }
                | Self::InvalidMemoryOffset { .. }
                | Self::InvalidProfileName { .. }
        )
    }
}

impl From<String> for NvtweakError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

impl From<&str> for NvtweakError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

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

//! Whitelist-restricted dispatch of the two external GPU tools
//!
//! Every hardware interaction goes through this module. The tool set is a
//! closed enum so nothing outside `nvidia-smi` and `nvidia-settings` can
//! ever be spawned; arguments are always a discrete argv (no shell), the
//! GPU id is injected as its own `-i <id>` argument, and execution is
//! bounded by a timeout that kills the child when it expires.
//!
//! Privilege elevation is a single controlled path: specs flagged
//! `needs_root` are prefixed with `pkexec` when the process is not already
//! running as root. No credentials are ever embedded here.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::constants::{limits, timing};
use crate::error::{NvtweakError, Result};
use crate::validation::validate_gpu_id;

/// The closed set of external tools this crate may invoke
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Tool {
    NvidiaSmi,
    NvidiaSettings,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NvidiaSmi => "nvidia-smi",
            Self::NvidiaSettings => "nvidia-settings",
        }
    }

    /// Match a tool name against the whitelist. Anything else is rejected
    /// before a process could be spawned; hitting this with an unexpected
    /// name is a programming error, not an environment problem.
    pub fn from_name(name: &str) -> Result<Tool> {
        match name {
            "nvidia-smi" => Ok(Self::NvidiaSmi),
            "nvidia-settings" => Ok(Self::NvidiaSettings),
            other => Err(NvtweakError::DisallowedCommand(other.to_string())),
        }
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully specified external command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub tool: Tool,
    pub args: Vec<String>,
    /// Validated GPU index; injected as `-i <id>` for nvidia-smi
    pub gpu_id: Option<u32>,
    pub needs_root: bool,
    pub timeout: Duration,
}

impl CommandSpec {
    /// Read-only nvidia-smi query (never elevated)
    pub fn smi_query(args: &[&str], gpu_id: Option<u32>) -> Self {
        Self {
            tool: Tool::NvidiaSmi,
            args: args.iter().map(|s| s.to_string()).collect(),
            gpu_id,
            needs_root: false,
            timeout: timing::QUERY_TIMEOUT,
        }
    }

    /// State-changing nvidia-smi command (elevated when not already root)
    pub fn smi_set(args: &[String], gpu_id: u32) -> Self {
        Self {
            tool: Tool::NvidiaSmi,
            args: args.to_vec(),
            gpu_id: Some(gpu_id),
            needs_root: true,
            timeout: timing::APPLY_TIMEOUT,
        }
    }

    /// nvidia-settings attribute assignment; runs as the session user since
    /// it talks to the X driver, not the kernel
    pub fn settings_set(args: &[String]) -> Self {
        Self {
            tool: Tool::NvidiaSettings,
            args: args.to_vec(),
            gpu_id: None,
            needs_root: false,
            timeout: timing::APPLY_TIMEOUT,
        }
    }

    /// nvidia-settings read-only query
    pub fn settings_query(args: &[&str]) -> Self {
        Self {
            tool: Tool::NvidiaSettings,
            args: args.iter().map(|s| s.to_string()).collect(),
            gpu_id: None,
            needs_root: false,
            timeout: timing::QUERY_TIMEOUT,
        }
    }

    /// The argv this spec resolves to, minus any elevation prefix
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.tool.as_str().to_string()];
        if self.tool == Tool::NvidiaSmi {
            if let Some(id) = self.gpu_id {
                argv.push("-i".to_string());
                argv.push(id.to_string());
            }
        }
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Captured output of a completed command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Seam between the managers and the operating system.
///
/// Production code uses [`SystemRunner`]; tests substitute a mock so apply
/// sequencing can be asserted without hardware.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Whitelist-checked entry point matching the untyped boundary: the tool
/// name is matched against the allow-list and the GPU id validated before
/// anything reaches a runner.
pub fn execute(
    runner: &dyn CommandRunner,
    tool_name: &str,
    args: &[&str],
    gpu_id: i64,
    timeout: Duration,
) -> Result<CommandOutput> {
    let tool = Tool::from_name(tool_name)?;
    let gpu_id = validate_gpu_id(gpu_id)?;
    let spec = CommandSpec {
        tool,
        args: args.iter().map(|s| s.to_string()).collect(),
        gpu_id: Some(gpu_id),
        needs_root: false,
        timeout,
    };
    runner.run(&spec)
}

/// Runs commands as real subprocesses with timeout enforcement
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    // SAFETY: geteuid just returns the effective user id of the process.
    fn is_root() -> bool {
        unsafe { libc::geteuid() == 0 }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let argv = spec.argv();
        let elevate = spec.needs_root && !Self::is_root();

        let mut command = if elevate {
            let mut c = Command::new("pkexec");
            c.args(&argv);
            c
        } else {
            let mut c = Command::new(&argv[0]);
            c.args(&argv[1..]);
            c
        };

        debug!(tool = %spec.tool, elevate, ?argv, "spawning");

        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    NvtweakError::CapabilityMissing(format!(
                        "{} is not installed",
                        spec.tool
                    ))
                } else {
                    NvtweakError::Io(e)
                }
            })?;

        wait_with_timeout(child, spec)
    }
}

/// Polls the child until it exits or the deadline passes; on timeout the
/// process is killed and reaped before the error is returned.
fn wait_with_timeout(mut child: Child, spec: &CommandSpec) -> Result<CommandOutput> {
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_thread = std::thread::spawn(move || drain(stdout_pipe));
    let stderr_thread = std::thread::spawn(move || drain(stderr_pipe));

    let deadline = Instant::now() + spec.timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                warn!(tool = %spec.tool, timeout_ms = spec.timeout.as_millis() as u64, "command timed out, killing");
                let _ = child.kill();
                let _ = child.wait();
                return Err(NvtweakError::Timeout {
                    tool: spec.tool.as_str().to_string(),
                    timeout_ms: spec.timeout.as_millis() as u64,
                });
            }
            Ok(None) => std::thread::sleep(timing::WAIT_SLICE),
            // The child must not outlive a failed wait
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        }
    };

    let stdout = stdout_thread.join().unwrap_or_default();
    let stderr = stderr_thread.join().unwrap_or_default();

    if !status.success() {
        let snippet = sanitize_stderr(&stderr);
        warn!(tool = %spec.tool, code = ?status.code(), stderr = %snippet, "command failed");
        return Err(NvtweakError::CommandFailed {
            tool: spec.tool.as_str().to_string(),
            exit_code: status.code(),
            stderr: snippet,
        });
    }

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

fn drain(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

/// Truncates and strips control characters from stderr before it is
/// surfaced in errors or logs.
pub fn sanitize_stderr(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .take(limits::STDERR_SNIPPET_LEN)
        .collect::<String>()
        .trim()
        .to_string()
}

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

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use nvtweak::{
    GpuHealth, GpuManager, Monitor, Profile, SettingsStore, SystemRunner,
};

const USAGE: &str = "\
nvtweak - NVIDIA GPU tuning via nvidia-smi and nvidia-settings

Usage: nvtweak <command> [options]

Commands:
  list                      List detected GPUs
  status [--gpu N]          Show a status snapshot for one GPU
  apply <profile> [--gpu N] Apply a built-in or saved profile
  unlock [--gpu N]          Release the clock lock
  restore [--gpu N]         Re-apply persisted settings (all GPUs by default)
  monitor [--gpu N]         Poll status continuously
  profiles                  List built-in and saved profiles
  copy-profile <src> <dst>  Save a copy of a profile under a new name
  delete-profile <name>     Delete a saved profile

Options:
  --gpu N                   GPU index (default 0)

Logging is controlled via RUST_LOG (default: info).
";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match args.first() {
        Some(c) => c.as_str(),
        None => {
            eprint!("{}", USAGE);
            std::process::exit(2);
        }
    };

    let runner = Arc::new(SystemRunner::new());
    let store = SettingsStore::default_location()?;
    let manager = GpuManager::new(runner.clone(), store);

    match command {
        "list" => {
            for gpu in manager.gpus()? {
                println!("{}: {} ({})", gpu.id, gpu.name, gpu.uuid);
            }
        }
        "status" => {
            let gpu = gpu_arg(&args)?;
            let status = manager.status(gpu)?;
            print_status(gpu, &status);
            println!("clock lock:   {}", manager.lock_state(gpu)?.to_marker());
        }
        "apply" => {
            let name = args
                .get(1)
                .filter(|a| !a.starts_with("--"))
                .ok_or_else(|| anyhow::anyhow!("apply requires a profile name"))?;
            let gpu = gpu_arg(&args)?;
            let profile = resolve_profile(&manager, name)?;
            let outcome = manager.apply_profile(gpu, &profile)?;
            for step in &outcome.applied {
                println!("applied: {}", step);
            }
            match &outcome.failed {
                None => println!("profile '{}' applied to GPU {}", outcome.profile, gpu),
                Some((step, e)) => {
                    eprintln!("stopped at {}: {}", step, e);
                    std::process::exit(1);
                }
            }
        }
        "unlock" => {
            let gpu = gpu_arg(&args)?;
            manager.unlock_clocks(gpu)?;
            println!("GPU {} clocks unlocked", gpu);
        }
        "restore" => {
            if args.iter().any(|a| a == "--gpu") {
                let gpu = gpu_arg(&args)?;
                match manager.restore(gpu)? {
                    Some(outcome) => report_restore(&outcome),
                    None => println!("GPU {}: nothing to restore", gpu),
                }
            } else {
                let outcomes = manager.restore_all()?;
                if outcomes.is_empty() {
                    println!("nothing to restore");
                }
                for outcome in &outcomes {
                    report_restore(outcome);
                }
            }
        }
        "monitor" => {
            let gpu = gpu_arg(&args)?;
            let monitor = Monitor::new(runner, gpu)?;
            monitor.run(|sample| match sample {
                GpuHealth::Available(status) => print_status(gpu, &status),
                GpuHealth::Degraded(reason) => eprintln!("GPU {} unavailable: {}", gpu, reason),
            });
        }
        "profiles" => {
            for name in Profile::BUILTIN_NAMES {
                println!("{} (built-in)", name);
            }
            for name in manager.store().list_profiles()? {
                println!("{}", name);
            }
        }
        "copy-profile" => {
            let (src, dst) = match (args.get(1), args.get(2)) {
                (Some(s), Some(d)) => (s, d),
                _ => anyhow::bail!("copy-profile requires a source and a destination name"),
            };
            let mut profile = resolve_profile(&manager, src)?;
            profile.name = dst.clone();
            manager.store().save_profile(&profile)?;
            println!("saved profile '{}'", dst);
        }
        "delete-profile" => {
            let name = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("delete-profile requires a name"))?;
            manager.store().delete_profile(name)?;
            println!("deleted profile '{}'", name);
        }
        "help" | "--help" | "-h" => print!("{}", USAGE),
        other => {
            eprintln!("unknown command: {}\n", other);
            eprint!("{}", USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}

/// Parse `--gpu N`, defaulting to GPU 0
fn gpu_arg(args: &[String]) -> anyhow::Result<i64> {
    match args.iter().position(|a| a == "--gpu") {
        Some(pos) => {
            let value = args
                .get(pos + 1)
                .ok_or_else(|| anyhow::anyhow!("--gpu requires an index"))?;
            value
                .parse::<i64>()
                .map_err(|_| anyhow::anyhow!("invalid GPU index: {}", value))
        }
        None => Ok(0),
    }
}

/// Built-in names win; anything else is looked up in the profile store
fn resolve_profile(manager: &GpuManager, name: &str) -> anyhow::Result<Profile> {
    if let Some(profile) = Profile::builtin(name) {
        return Ok(profile);
    }
    Ok(manager.store().load_profile(name)?)
}

fn report_restore(outcome: &nvtweak::ApplyOutcome) {
    match &outcome.failed {
        None => println!("GPU {}: restored ({} steps)", outcome.gpu_id, outcome.applied.len()),
        Some((step, e)) => eprintln!("GPU {}: restore stopped at {}: {}", outcome.gpu_id, step, e),
    }
}

fn print_status(gpu: i64, status: &nvtweak::GpuStatus) {
    println!("GPU {}: {}", gpu, status.name);
    println!(
        "  clock:       {} / {} MHz",
        fmt_opt(status.current_clock_mhz),
        fmt_opt(status.max_clock_mhz)
    );
    println!(
        "  memory:      {} / {} MHz (util {}%)",
        fmt_opt(status.memory_clock_mhz),
        fmt_opt(status.max_memory_clock_mhz),
        fmt_opt(status.utilization_memory)
    );
    println!(
        "  power:       {} / {} W",
        status
            .power_draw_w
            .map(|w| format!("{:.1}", w))
            .unwrap_or_else(|| "n/a".to_string()),
        fmt_opt(status.power_limit_w)
    );
    println!(
        "  temp:        {} C, fan {}%",
        fmt_opt(status.temperature_c),
        fmt_opt(status.fan_speed_percent)
    );
    println!(
        "  util:        {}%, pstate {}, persistence {}",
        fmt_opt(status.utilization_gpu),
        status.performance_state.as_deref().unwrap_or("n/a"),
        if status.persistence_mode { "on" } else { "off" }
    );
}

fn fmt_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

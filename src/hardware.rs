//! Host capability snapshot used by the training planner.

use serde::Serialize;
use std::process::Command;
use tracing::{debug, info};

use crate::config::AcceleratorConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceleratorInfo {
    pub name: String,
    pub total_mem_gb: f64,
    pub free_mem_gb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostCapabilities {
    pub logical_cpus: usize,
    pub accelerator: Option<AcceleratorInfo>,
}

impl HostCapabilities {
    /// Probe the current host. With `force_cpu` the accelerator query is
    /// skipped entirely.
    pub fn detect(config: &AcceleratorConfig) -> Self {
        let logical_cpus = num_cpus::get().max(1);
        let accelerator = if config.force_cpu {
            debug!("Accelerator probe skipped (force_cpu)");
            None
        } else {
            probe_nvidia_smi(config.device_ordinal)
        };

        match &accelerator {
            Some(acc) => info!(
                "Host: {} logical CPUs, accelerator '{}' ({:.1} GiB total, {:.1} GiB free)",
                logical_cpus, acc.name, acc.total_mem_gb, acc.free_mem_gb
            ),
            None => info!("Host: {} logical CPUs, no accelerator", logical_cpus),
        }

        Self {
            logical_cpus,
            accelerator,
        }
    }

    pub fn cpu_only(logical_cpus: usize) -> Self {
        Self {
            logical_cpus: logical_cpus.max(1),
            accelerator: None,
        }
    }
}

fn probe_nvidia_smi(ordinal: u32) -> Option<AcceleratorInfo> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=name,memory.total,memory.free",
            "--format=csv,noheader,nounits",
        ])
        .output();

    match output {
        Ok(out) if out.status.success() => {
            let stdout = String::from_utf8_lossy(&out.stdout);
            parse_nvidia_smi(&stdout, ordinal)
        }
        Ok(out) => {
            debug!("nvidia-smi exited with {}", out.status);
            None
        }
        Err(e) => {
            debug!("nvidia-smi not available: {}", e);
            None
        }
    }
}

/// Parse `name, total MiB, free MiB` lines and pick the requested device.
pub fn parse_nvidia_smi(output: &str, ordinal: u32) -> Option<AcceleratorInfo> {
    let line = output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .nth(ordinal as usize)?;

    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 3 {
        return None;
    }
    let total_mib: f64 = parts[1].parse().ok()?;
    let free_mib: f64 = parts[2].parse().ok()?;

    Some(AcceleratorInfo {
        name: parts[0].to_string(),
        total_mem_gb: total_mib / 1024.0,
        free_mem_gb: free_mib / 1024.0,
    })
}

// src/utils/system.rs: System functions

use std::time::Duration;

use anyhow::Result;
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tokio::time::sleep;


/// Determines number of cores that can be used for concurrent stage executions
///
/// # Returns
///
/// Result<usize, f32> physical cores, current cpu usage
pub async fn detect_cores_and_load() -> Result<(usize, f32)> {
    let refresh_kind = RefreshKind::nothing().with_cpu(Default::default());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_cpu_all();
    let physical_cores = System::physical_core_count().unwrap_or(1);
    system.refresh_cpu_specifics(CpuRefreshKind::nothing().with_cpu_usage());
    sleep(Duration::from_millis(100)).await;
    let cpu_load = system.global_cpu_usage();
    Ok((physical_cores, cpu_load))
}


/// Default global bound on concurrent stage executions when `--max-forks` is absent.
/// Each execution runs its tool with `threads` threads, so the cores are split between them.
/// A busy machine (load above 50%) gets half the slots.
pub fn default_forks(physical_cores: usize, cpu_load: f32, threads: usize) -> usize {
    let slots = (physical_cores / threads.max(1)).max(1);
    if cpu_load > 50.0 {
        (slots / 2).max(1)
    } else {
        slots
    }
}

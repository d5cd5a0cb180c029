// Slot pool with resource limits and liveness polling

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::{Pid, System};

use crate::agents::process::WorkerProcess;
use crate::utils::lock_mutex_recover;

/// Resource limits for concurrent worker slots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    /// Maximum number of concurrent slots
    #[serde(alias = "max_slots", default = "default_max_slots")]
    pub max_slots: usize,
    /// Maximum total CPU usage percentage across all workers
    #[serde(alias = "max_total_cpu", default = "default_max_total_cpu")]
    pub max_total_cpu: f32,
    /// Maximum total memory usage in MB across all workers
    #[serde(alias = "max_total_memory_mb", default = "default_max_total_memory_mb")]
    pub max_total_memory_mb: u64,
    /// Maximum worker runtime in seconds (0 = unlimited)
    #[serde(alias = "max_runtime_secs", default = "default_max_runtime_secs")]
    pub max_runtime_secs: u64,
}

fn default_max_slots() -> usize {
    4
}
fn default_max_total_cpu() -> f32 {
    80.0
}
fn default_max_total_memory_mb() -> u64 {
    8192
}
fn default_max_runtime_secs() -> u64 {
    3600
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_slots: default_max_slots(),
            max_total_cpu: default_max_total_cpu(),
            max_total_memory_mb: default_max_total_memory_mb(),
            max_runtime_secs: default_max_runtime_secs(),
        }
    }
}

struct PooledWorker {
    process: WorkerProcess,
    started_at: Instant,
}

/// Tracks running workers and enforces limits before a new launch
pub struct SlotPool {
    limits: ResourceLimits,
    running: Arc<Mutex<HashMap<u32, PooledWorker>>>,
    system: Arc<Mutex<System>>,
}

impl SlotPool {
    pub fn new() -> Self {
        Self::with_limits(ResourceLimits::default())
    }

    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self {
            limits,
            running: Arc::new(Mutex::new(HashMap::new())),
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Whether the pool has capacity for another worker
    pub fn can_launch(&self) -> bool {
        let running = lock_mutex_recover(&self.running);

        if running.len() >= self.limits.max_slots {
            return false;
        }

        let mut system = lock_mutex_recover(&self.system);
        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

        let mut total_cpu = 0.0;
        let mut total_memory_mb: u64 = 0;
        for worker in running.values() {
            if let Some(pid) = worker.process.process_id {
                if let Some(process) = system.process(Pid::from_u32(pid)) {
                    total_cpu += process.cpu_usage();
                    total_memory_mb += process.memory() / 1024 / 1024;
                }
            }
        }

        total_cpu < self.limits.max_total_cpu && total_memory_mb < self.limits.max_total_memory_mb
    }

    /// Register a launched worker. Fails when the pool is at capacity.
    pub fn register(&self, process: WorkerProcess) -> Result<()> {
        if !self.can_launch() {
            return Err(anyhow!(
                "Resource limits exceeded, cannot register slot {}",
                process.slot_number
            ));
        }

        let mut running = lock_mutex_recover(&self.running);
        if running.contains_key(&process.slot_number) {
            return Err(anyhow!("Slot {} already registered", process.slot_number));
        }

        running.insert(
            process.slot_number,
            PooledWorker {
                process,
                started_at: Instant::now(),
            },
        );
        Ok(())
    }

    pub fn running_count(&self) -> usize {
        lock_mutex_recover(&self.running).len()
    }

    pub fn is_running(&self, slot_number: u32) -> bool {
        lock_mutex_recover(&self.running).contains_key(&slot_number)
    }

    pub fn get_runtime_secs(&self, slot_number: u32) -> Option<u64> {
        lock_mutex_recover(&self.running)
            .get(&slot_number)
            .map(|w| w.started_at.elapsed().as_secs())
    }

    /// Reap workers that have exited. Returns (slot_number, exit_code) pairs.
    pub fn poll_exited(&self) -> Vec<(u32, i32)> {
        let mut running = lock_mutex_recover(&self.running);
        let mut exited = Vec::new();

        for (slot_number, worker) in running.iter() {
            match worker.process.try_wait() {
                Ok(Some(code)) => exited.push((*slot_number, code)),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("[SlotPool] Failed to poll slot {}: {}", slot_number, e);
                }
            }
        }

        for (slot_number, code) in &exited {
            running.remove(slot_number);
            log::info!(
                "[SlotPool] Slot {} worker exited with code {}",
                slot_number,
                code
            );
        }

        exited
    }

    /// Slots whose workers have exceeded the runtime limit
    pub fn runtime_violations(&self) -> Vec<u32> {
        if self.limits.max_runtime_secs == 0 {
            return Vec::new();
        }

        let running = lock_mutex_recover(&self.running);
        running
            .iter()
            .filter(|(_, w)| w.started_at.elapsed().as_secs() > self.limits.max_runtime_secs)
            .map(|(slot, _)| *slot)
            .collect()
    }

    /// Kill one worker and drop it from the pool
    pub fn kill(&self, slot_number: u32) -> Result<()> {
        let mut running = lock_mutex_recover(&self.running);
        let worker = running
            .remove(&slot_number)
            .ok_or_else(|| anyhow!("Slot {} not registered", slot_number))?;
        worker.process.kill()
    }

    /// Kill every running worker (cancellation path), best effort
    pub fn kill_all(&self) -> Vec<u32> {
        let mut running = lock_mutex_recover(&self.running);
        let mut killed = Vec::new();

        for (slot_number, worker) in running.drain() {
            if let Err(e) = worker.process.kill() {
                log::warn!("[SlotPool] Failed to kill slot {}: {}", slot_number, e);
            }
            killed.push(slot_number);
        }

        killed
    }
}

impl Default for SlotPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::process::WorkerLaunchConfig;
    use crate::events::EventBus;
    use crate::models::AgentKind;
    use tempfile::TempDir;

    fn stub_worker(dir: &TempDir, slot_number: u32, script: &str) -> Option<WorkerProcess> {
        let (bus, _rx) = EventBus::new();
        let cfg = WorkerLaunchConfig {
            slot_number,
            agent_kind: AgentKind::Claude,
            workspace_path: dir.path().display().to_string(),
            status_doc_path: dir.path().join("status.json").display().to_string(),
            log_dir: dir.path().join("logs"),
            command_override: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
            ]),
        };
        WorkerProcess::launch(&cfg, bus).ok()
    }

    #[test]
    fn test_empty_pool_can_launch() {
        let pool = SlotPool::new();
        assert!(pool.can_launch());
        assert_eq!(pool.running_count(), 0);
    }

    #[test]
    fn test_max_slots_enforced() {
        let dir = TempDir::new().unwrap();
        let pool = SlotPool::with_limits(ResourceLimits {
            max_slots: 1,
            ..Default::default()
        });

        let Some(first) = stub_worker(&dir, 0, "sleep 5") else {
            return; // no PTY support on this host
        };
        pool.register(first).unwrap();
        assert!(!pool.can_launch());

        if let Some(second) = stub_worker(&dir, 1, "sleep 5") {
            assert!(pool.register(second).is_err());
        }

        pool.kill_all();
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let dir = TempDir::new().unwrap();
        let Some(first) = stub_worker(&dir, 0, "sleep 5") else {
            return;
        };
        let pool = SlotPool::new();
        pool.register(first).unwrap();

        if let Some(dup) = stub_worker(&dir, 0, "sleep 5") {
            assert!(pool.register(dup.clone()).is_err());
            let _ = dup.kill();
        }
        pool.kill_all();
    }

    #[test]
    fn test_poll_exited_reaps_finished_workers() {
        let dir = TempDir::new().unwrap();
        let Some(worker) = stub_worker(&dir, 2, "exit 7") else {
            return;
        };
        let pool = SlotPool::new();
        pool.register(worker).unwrap();

        // Wait for the stub to finish
        let mut exited = Vec::new();
        for _ in 0..50 {
            exited = pool.poll_exited();
            if !exited.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }

        assert_eq!(exited, vec![(2, 7)]);
        assert_eq!(pool.running_count(), 0);
    }

    #[test]
    fn test_kill_all_empties_pool() {
        let dir = TempDir::new().unwrap();
        let Some(worker) = stub_worker(&dir, 0, "sleep 60") else {
            return;
        };
        let pool = SlotPool::new();
        pool.register(worker).unwrap();

        let killed = pool.kill_all();
        assert_eq!(killed, vec![0]);
        assert_eq!(pool.running_count(), 0);
    }

    #[test]
    fn test_runtime_violations_empty_when_unlimited() {
        let pool = SlotPool::with_limits(ResourceLimits {
            max_runtime_secs: 0,
            ..Default::default()
        });
        assert!(pool.runtime_violations().is_empty());
    }
}

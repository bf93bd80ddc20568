//! Per-trial resource requests and the GPU lease pool used by the local controller.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

/// Largest CPU request handed to a single trial by default.
pub const DEFAULT_MAX_CPUS_PER_TRIAL: usize = 8;
/// Largest GPU request handed to a single trial by default.
pub const DEFAULT_MAX_GPUS_PER_TRIAL: usize = 1;

/// Resources available on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResources {
    pub cpus: usize,
    /// Device ids that may be handed to trials.
    pub gpu_ids: Vec<u32>,
}

impl HostResources {
    /// Detect logical CPUs and GPUs.
    ///
    /// `CUDA_VISIBLE_DEVICES` wins when set. Otherwise the devices are
    /// enumerated with `nvidia-smi -L`, then from `/proc/driver/nvidia/gpus`.
    pub fn detect() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let gpu_ids = match std::env::var("CUDA_VISIBLE_DEVICES") {
            Ok(value) => parse_device_list(&value),
            Err(_) => enumerate_gpus(),
        };
        debug!("Detected {} cpus and gpus {:?}", cpus, gpu_ids);
        Self { cpus, gpu_ids }
    }

    pub fn with_gpu_count(mut self, count: usize) -> Self {
        self.gpu_ids = (0..count as u32).collect();
        self
    }

    pub fn gpus(&self) -> usize {
        self.gpu_ids.len()
    }
}

fn parse_device_list(value: &str) -> Vec<u32> {
    value
        .split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}

fn enumerate_gpus() -> Vec<u32> {
    let listed = Command::new("nvidia-smi")
        .arg("-L")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| parse_nvidia_smi_list(&String::from_utf8_lossy(&out.stdout)))
        .unwrap_or_default();
    if !listed.is_empty() {
        return listed;
    }
    let count = count_driver_gpus(Path::new("/proc/driver/nvidia/gpus"));
    (0..count as u32).collect()
}

/// Device ids from `nvidia-smi -L` lines such as
/// `GPU 0: NVIDIA A100-SXM4-40GB (UUID: GPU-...)`.
fn parse_nvidia_smi_list(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("GPU "))
        .filter_map(|rest| rest.split(':').next())
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}

/// One entry per device (named by PCI bus id) under the driver's proc directory.
fn count_driver_gpus(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).count())
        .unwrap_or(0)
}

/// Resource requirements for a single trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpus: usize,
    pub gpus: usize,
}

impl ResourceRequest {
    /// Default request: everything the host has, capped per trial.
    pub fn for_host(host: &HostResources) -> Self {
        Self {
            cpus: host.cpus.clamp(1, DEFAULT_MAX_CPUS_PER_TRIAL),
            gpus: host.gpus().min(DEFAULT_MAX_GPUS_PER_TRIAL),
        }
    }

    /// How many trials of this size fit on `host` at once, never above
    /// `max_concurrent` and never below one.
    pub fn parallel_slots(&self, host: &HostResources, max_concurrent: usize) -> usize {
        let mut slots = max_concurrent.max(1);
        if self.cpus > 0 {
            slots = slots.min(host.cpus / self.cpus);
        }
        if self.gpus > 0 {
            slots = slots.min(host.gpus() / self.gpus);
        }
        slots.max(1)
    }
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self { cpus: 1, gpus: 0 }
    }
}

/// Free list of GPU ids shared between concurrently running trials.
#[derive(Debug)]
pub struct GpuPool {
    free: Mutex<Vec<u32>>,
}

impl GpuPool {
    pub fn new(ids: Vec<u32>) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(ids),
        })
    }

    /// Take `count` devices, or `None` if not enough are free.
    pub fn lease(self: &Arc<Self>, count: usize) -> Option<GpuLease> {
        let mut free = self.free.lock();
        if free.len() < count {
            return None;
        }
        let ids: Vec<u32> = free.drain(..count).collect();
        Some(GpuLease {
            ids,
            pool: Arc::clone(self),
        })
    }

    pub fn available(&self) -> usize {
        self.free.lock().len()
    }
}

/// Devices held by one trial; returned to the pool on drop.
#[derive(Debug)]
pub struct GpuLease {
    ids: Vec<u32>,
    pool: Arc<GpuPool>,
}

impl GpuLease {
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Value for `CUDA_VISIBLE_DEVICES`.
    pub fn visible_devices(&self) -> String {
        self.ids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Drop for GpuLease {
    fn drop(&mut self) {
        let mut free = self.pool.free.lock();
        free.extend(self.ids.drain(..));
        free.sort_unstable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(cpus: usize, gpus: usize) -> HostResources {
        HostResources {
            cpus,
            gpu_ids: Vec::new(),
        }
        .with_gpu_count(gpus)
    }

    #[test]
    fn request_is_capped_per_trial() {
        let req = ResourceRequest::for_host(&host(24, 4));
        assert_eq!(req, ResourceRequest { cpus: 8, gpus: 1 });

        let req = ResourceRequest::for_host(&host(4, 0));
        assert_eq!(req, ResourceRequest { cpus: 4, gpus: 0 });
    }

    #[test]
    fn parallel_slots_bounded_by_resources() {
        let req = ResourceRequest { cpus: 8, gpus: 1 };
        assert_eq!(req.parallel_slots(&host(24, 4), 10), 3);
        assert_eq!(req.parallel_slots(&host(64, 2), 10), 2);
        assert_eq!(req.parallel_slots(&host(64, 4), 1), 1);
        // Oversized request still gets one slot
        assert_eq!(req.parallel_slots(&host(2, 0), 4), 1);
    }

    #[test]
    fn device_list_parsing() {
        assert_eq!(parse_device_list("0, 2,3"), vec![0, 2, 3]);
        assert!(parse_device_list("").is_empty());
    }

    #[test]
    fn nvidia_smi_listing_parsing() {
        let output = "GPU 0: NVIDIA GeForce RTX 3090 (UUID: GPU-5d0a1c2e-aaaa)\n\
                      GPU 1: NVIDIA GeForce RTX 3090 (UUID: GPU-77b3e9f0-bbbb)\n\
                      GPU 3: Tesla V100-SXM2-16GB (UUID: GPU-0c1d2e3f-cccc)\n";
        assert_eq!(parse_nvidia_smi_list(output), vec![0, 1, 3]);

        // MIG instances are nested under their parent GPU
        let mig = "GPU 0: NVIDIA A100-SXM4-40GB (UUID: GPU-1111)\n  \
                   MIG 1g.5gb Device 0: (UUID: MIG-2222)\n";
        assert_eq!(parse_nvidia_smi_list(mig), vec![0]);

        assert!(parse_nvidia_smi_list("").is_empty());
        assert!(parse_nvidia_smi_list("NVIDIA-SMI has failed").is_empty());
    }

    #[test]
    fn driver_proc_entries_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("0000:3b:00.0")).unwrap();
        std::fs::create_dir(dir.path().join("0000:af:00.0")).unwrap();
        assert_eq!(count_driver_gpus(dir.path()), 2);
        assert_eq!(count_driver_gpus(&dir.path().join("missing")), 0);
    }

    #[test]
    fn gpu_lease_returns_devices_on_drop() {
        let pool = GpuPool::new(vec![0, 1, 2]);
        let a = pool.lease(2).unwrap();
        assert_eq!(a.ids(), &[0, 1]);
        assert_eq!(a.visible_devices(), "0,1");
        assert!(pool.lease(2).is_none());

        drop(a);
        assert_eq!(pool.available(), 3);
        let b = pool.lease(3).unwrap();
        assert_eq!(b.ids(), &[0, 1, 2]);
    }
}

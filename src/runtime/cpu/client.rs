//! CPU client implementation

use super::device::CpuDevice;
use super::runtime::CpuRuntime;
use crate::error::Result;
use crate::runtime::RuntimeClient;
use crate::ufunc::LaunchGeometry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Activity counters shared by clones of one client
#[derive(Debug, Default)]
struct ClientStats {
    allocations: AtomicUsize,
    bytes_allocated: AtomicUsize,
    synchronizations: AtomicUsize,
    launches: Mutex<Vec<LaunchGeometry>>,
}

/// CPU client (stream) for operation dispatch
///
/// Work on the CPU runs synchronously, so every client is trivially
/// ordered. Clones share one set of activity counters, which lets callers
/// observe how many buffers a call allocated and which grids it launched.
#[derive(Clone, Debug)]
pub struct CpuClient {
    pub(crate) device: CpuDevice,
    stats: Arc<ClientStats>,
}

impl CpuClient {
    /// Create a new CPU client
    pub fn new(device: CpuDevice) -> Self {
        Self {
            device,
            stats: Arc::new(ClientStats::default()),
        }
    }

    /// Number of non-empty allocations made through this client
    pub fn allocations(&self) -> usize {
        self.stats.allocations.load(Ordering::Relaxed)
    }

    /// Total bytes allocated through this client
    pub fn bytes_allocated(&self) -> usize {
        self.stats.bytes_allocated.load(Ordering::Relaxed)
    }

    /// Number of explicit synchronizations
    pub fn synchronizations(&self) -> usize {
        self.stats.synchronizations.load(Ordering::Relaxed)
    }

    /// Geometries of every kernel launched on this client, in issue order
    pub fn launches(&self) -> Vec<LaunchGeometry> {
        self.stats.launches.lock().clone()
    }

    /// Number of kernels launched on this client
    pub fn launch_count(&self) -> usize {
        self.stats.launches.lock().len()
    }

    pub(crate) fn record_allocation(&self, size_bytes: usize) {
        self.stats.allocations.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_allocated
            .fetch_add(size_bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_launch(&self, geometry: LaunchGeometry) {
        self.stats.launches.lock().push(geometry);
    }
}

impl RuntimeClient<CpuRuntime> for CpuClient {
    fn device(&self) -> &CpuDevice {
        &self.device
    }

    fn synchronize(&self) -> Result<()> {
        // CPU operations are synchronous, nothing to wait for
        self.stats.synchronizations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

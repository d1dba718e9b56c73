//! Launch geometry planning

use super::kernel::Kernel;
use crate::error::{Error, Result};
use crate::runtime::Runtime;

/// Default per-dispatcher thread ceiling: effectively unbounded
pub const DEFAULT_MAX_BLOCKSIZE: u32 = 1 << 30;

/// One-dimensional grid shape for a kernel launch
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LaunchGeometry {
    /// Number of blocks in the grid
    pub blocks: u32,
    /// Threads in each block
    pub threads_per_block: u32,
}

impl LaunchGeometry {
    /// Total threads launched
    pub fn total_threads(&self) -> u64 {
        u64::from(self.blocks) * u64::from(self.threads_per_block)
    }

    /// Whether the grid has at least one thread per element
    pub fn covers(&self, count: usize) -> bool {
        self.total_threads() >= count as u64
    }

    /// Whether nothing would run
    pub fn is_empty(&self) -> bool {
        self.blocks == 0 || self.threads_per_block == 0
    }
}

/// Plan a launch of `count` elements under a per-block `ceiling`
///
/// `threads_per_block = min(ceiling, count)` and
/// `blocks = ceil(count / ceiling)`. The block count divides by the
/// ceiling, not the clipped thread count. `count == 0` yields an empty
/// geometry.
///
/// # Example
/// ```
/// use ufunc_dispatch::ufunc::geometry::plan;
/// let g = plan(1000, 256).unwrap();
/// assert_eq!((g.blocks, g.threads_per_block), (4, 256));
/// let g = plan(10, 256).unwrap();
/// assert_eq!((g.blocks, g.threads_per_block), (1, 10));
/// ```
pub fn plan(count: usize, ceiling: u32) -> Result<LaunchGeometry> {
    if ceiling == 0 {
        return Err(Error::InsufficientResources);
    }
    let threads_per_block = ceiling.min(u32::try_from(count).unwrap_or(u32::MAX));
    let blocks = count.div_ceil(ceiling as usize);
    let blocks = u32::try_from(blocks).map_err(|_| Error::InsufficientResources)?;
    Ok(LaunchGeometry {
        blocks,
        threads_per_block,
    })
}

/// Threads-per-block ceiling for `kernel` under a dispatcher override
///
/// The ceiling is `min(hardware limit, max_blocksize)`. When the override
/// does not bind, the kernel's autotuner (if any) picks the value, capped
/// at the hardware limit. An autotuner reporting 0 is a resource error.
pub fn thread_ceiling<R: Runtime>(kernel: &dyn Kernel<R>, max_blocksize: u32) -> Result<u32> {
    let hardware = kernel.max_threads_per_block();
    let ceiling = hardware.min(max_blocksize);
    if ceiling != hardware {
        return Ok(ceiling);
    }
    match kernel.autotuner() {
        Some(tuner) => match tuner.best() {
            0 => Err(Error::InsufficientResources),
            best => {
                log::trace!("autotuned threads per block: {}", best);
                Ok(best.min(hardware))
            }
        },
        None => Ok(ceiling),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::cpu::{CpuKernel, CpuRuntime};

    #[test]
    fn test_plan_small_count_clips_threads() {
        let g = plan(3, 1024).unwrap();
        assert_eq!(g.threads_per_block, 3);
        assert_eq!(g.blocks, 1);
    }

    #[test]
    fn test_plan_divides_by_ceiling() {
        let g = plan(1025, 512).unwrap();
        assert_eq!(g.threads_per_block, 512);
        assert_eq!(g.blocks, 3);
        assert!(g.covers(1025));
    }

    #[test]
    fn test_plan_zero_count() {
        let g = plan(0, 128).unwrap();
        assert!(g.is_empty());
        assert_eq!(g.blocks, 0);
    }

    #[test]
    fn test_plan_zero_ceiling() {
        assert!(matches!(plan(8, 0), Err(Error::InsufficientResources)));
    }

    #[test]
    fn test_ceiling_override_skips_autotune() {
        let k = CpuKernel::unary(|a: f32| a)
            .with_max_threads(1024)
            .with_autotune(0);
        assert_eq!(thread_ceiling::<CpuRuntime>(&k, 64).unwrap(), 64);
    }

    #[test]
    fn test_ceiling_uses_autotune_when_unbounded() {
        let k = CpuKernel::unary(|a: f32| a)
            .with_max_threads(1024)
            .with_autotune(96);
        assert_eq!(
            thread_ceiling::<CpuRuntime>(&k, DEFAULT_MAX_BLOCKSIZE).unwrap(),
            96
        );
    }

    #[test]
    fn test_ceiling_autotune_zero_is_fatal() {
        let k = CpuKernel::unary(|a: f32| a).with_autotune(0);
        assert!(matches!(
            thread_ceiling::<CpuRuntime>(&k, DEFAULT_MAX_BLOCKSIZE),
            Err(Error::InsufficientResources)
        ));
    }

    #[test]
    fn test_ceiling_without_autotune() {
        let k = CpuKernel::unary(|a: f32| a).with_max_threads(256);
        assert_eq!(
            thread_ceiling::<CpuRuntime>(&k, DEFAULT_MAX_BLOCKSIZE).unwrap(),
            256
        );
    }
}

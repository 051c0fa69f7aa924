//! Growable descriptor set allocation.
//!
//! [`GrowableDescriptorAllocator`] hands out descriptor sets from a list of
//! pools instead of creating a pool per set. Pools live in one of two lists:
//!
//! - *ready*: may still have room
//! - *full*: reported exhaustion and are skipped until [`clear_pools`]
//!
//! When no pool is ready, a new one is created at the current working
//! capacity and the capacity for the next pool grows by half, up to a
//! ceiling. Existing pools are never resized.
//!
//! A pool is checked out of *ready* for the duration of one allocation and
//! returned at most once, so it is never in both places at the same time.
//!
//! [`clear_pools`]: GrowableDescriptorAllocator::clear_pools

use std::sync::Arc;

use ember_rhi::descriptor::{PoolSizeRatio, pool_sizes};
use ember_rhi::{GpuDevice, RhiError, vk};
use tracing::{debug, warn};

use crate::error::{RenderError, RenderResult};

/// Multiplier applied to the working capacity each time a pool is created.
const GROWTH_FACTOR: f32 = 1.5;

fn grown(capacity: u32, ceiling: u32) -> u32 {
    ((capacity as f32 * GROWTH_FACTOR) as u32).min(ceiling)
}

/// Descriptor allocator that rotates through pools and adds new ones on demand.
pub struct GrowableDescriptorAllocator<D: GpuDevice> {
    device: Arc<D>,
    ratios: Vec<PoolSizeRatio>,
    ready: Vec<vk::DescriptorPool>,
    full: Vec<vk::DescriptorPool>,
    sets_per_pool: u32,
    max_sets_per_pool: u32,
    pools_created: usize,
}

impl<D: GpuDevice> GrowableDescriptorAllocator<D> {
    /// Creates the allocator with one pool sized for `initial_sets` sets.
    ///
    /// The next pool, if one is ever needed, holds `initial_sets * 1.5` sets.
    /// A `max_sets_per_pool` below `initial_sets` is raised to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the first pool cannot be created.
    pub fn new(
        device: Arc<D>,
        initial_sets: u32,
        ratios: &[PoolSizeRatio],
        max_sets_per_pool: u32,
    ) -> RenderResult<Self> {
        if initial_sets == 0 {
            return Err(RenderError::InvalidArgument(
                "descriptor allocator needs at least one set per pool".into(),
            ));
        }

        // Capacity never shrinks below the first pool.
        let max_sets_per_pool = max_sets_per_pool.max(initial_sets);
        let mut allocator = Self {
            device,
            ratios: ratios.to_vec(),
            ready: Vec::new(),
            full: Vec::new(),
            sets_per_pool: grown(initial_sets, max_sets_per_pool),
            max_sets_per_pool,
            pools_created: 0,
        };
        let first = allocator.create_pool(initial_sets)?;
        allocator.ready.push(first);
        Ok(allocator)
    }

    /// Allocates one set with `layout`.
    ///
    /// An exhausted or fragmented pool is retired to the full list and the
    /// allocation is retried once on another pool.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ResourceExhaustion`] if the retry fails the same
    /// way, or the underlying error for any other failure.
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> RenderResult<vk::DescriptorSet> {
        let pool = self.checkout_pool()?;
        match self.try_allocate(pool, layout)? {
            Some(set) => return Ok(set),
            None => debug!("Descriptor pool {:?} exhausted, rotating", pool),
        }

        let pool = self.checkout_pool()?;
        match self.try_allocate(pool, layout)? {
            Some(set) => Ok(set),
            None => Err(RenderError::ResourceExhaustion(format!(
                "descriptor allocation failed on two consecutive pools ({} pool(s) created)",
                self.pools_created
            ))),
        }
    }

    /// Resets every pool and makes all of them available again.
    ///
    /// Every set previously returned by [`allocate`](Self::allocate) becomes
    /// invalid. Capacity is unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if a pool reset fails.
    pub fn clear_pools(&mut self) -> RenderResult<()> {
        for &pool in &self.ready {
            self.device.reset_descriptor_pool(pool)?;
        }
        for pool in std::mem::take(&mut self.full) {
            self.device.reset_descriptor_pool(pool)?;
            self.ready.push(pool);
        }
        Ok(())
    }

    /// Destroys every pool. Used at teardown, never between frames.
    pub fn destroy_pools(&mut self) {
        let count = self.ready.len() + self.full.len();
        for pool in self.ready.drain(..).chain(self.full.drain(..)) {
            self.device.destroy_descriptor_pool(pool);
        }
        if count > 0 {
            debug!("Destroyed {} descriptor pool(s)", count);
        }
    }

    /// Total pools created over the allocator's lifetime.
    #[inline]
    pub fn pools_created(&self) -> usize {
        self.pools_created
    }

    #[inline]
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    #[inline]
    pub fn full_count(&self) -> usize {
        self.full.len()
    }

    /// Set count the next created pool will have.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.sets_per_pool
    }

    /// Pops a ready pool, creating one if none is left.
    fn checkout_pool(&mut self) -> RenderResult<vk::DescriptorPool> {
        if let Some(pool) = self.ready.pop() {
            return Ok(pool);
        }
        let pool = self.create_pool(self.sets_per_pool)?;
        self.sets_per_pool = grown(self.sets_per_pool, self.max_sets_per_pool);
        Ok(pool)
    }

    /// Allocates from a checked-out pool and files the pool back.
    ///
    /// `Ok(None)` means the pool was exhausted and now sits in the full list.
    fn try_allocate(
        &mut self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RenderResult<Option<vk::DescriptorSet>> {
        match self.device.allocate_descriptor_set(pool, layout) {
            Ok(set) => {
                self.ready.push(pool);
                Ok(Some(set))
            }
            Err(err) if err.is_pool_exhausted() => {
                self.full.push(pool);
                Ok(None)
            }
            Err(err) => {
                self.ready.push(pool);
                Err(err.into())
            }
        }
    }

    fn create_pool(&mut self, set_count: u32) -> Result<vk::DescriptorPool, RhiError> {
        let sizes = pool_sizes(&self.ratios, set_count);
        let pool = self.device.create_descriptor_pool(set_count, &sizes)?;
        self.pools_created += 1;
        debug!(
            "Created descriptor pool #{} with {} set(s)",
            self.pools_created, set_count
        );
        Ok(pool)
    }
}

impl<D: GpuDevice> Drop for GrowableDescriptorAllocator<D> {
    fn drop(&mut self) {
        if !self.ready.is_empty() || !self.full.is_empty() {
            warn!("Descriptor allocator dropped without destroy_pools, destroying now");
            self.destroy_pools();
        }
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::contexts::frame_ctx::deletion::DeletionTasks;
use crate::renderer::contexts::frame_ctx::frame::FrameContext;
use crate::renderer::contexts::resource_ctx::descriptor_device::DescriptorPoolDevice;
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::DescriptorSetLayout;

/// Hands out descriptor sets of one layout from a growing list of pools.
///
/// Every set a pool can hold is allocated up front and parked on the free list, so
/// [`DescriptorSetAllocator::free`] only has to push the set back for reuse.
pub struct DescriptorSetAllocator<D: DescriptorPoolDevice> {
    device: D,
    layout: Arc<DescriptorSetLayout>,
    sets_per_pool: u32,
    pools: Vec<vk::DescriptorPool>,
    free_sets: Vec<vk::DescriptorSet>,
}

impl<D: DescriptorPoolDevice> DescriptorSetAllocator<D> {
    pub fn new(device: D, layout: Arc<DescriptorSetLayout>, sets_per_pool: u32) -> Self {
        Self {
            device,
            layout,
            sets_per_pool: sets_per_pool.max(1),
            pools: Vec::new(),
            free_sets: Vec::new(),
        }
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    pub fn allocate(&mut self) -> Result<vk::DescriptorSet> {
        if self.free_sets.is_empty() {
            self.grow()?;
        }

        self.free_sets
            .pop()
            .ok_or_else(|| eyre!("Descriptor pool yielded no sets"))
    }

    /// Returns `set` to the free list. The caller guarantees the GPU no longer reads it.
    pub fn free(&mut self, set: vk::DescriptorSet) {
        self.free_sets.push(set);
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_sets.len()
    }

    fn grow(&mut self) -> Result<()> {
        let pool = self.device.create_pool(&self.layout, self.sets_per_pool)?;
        self.pools.push(pool);

        let sets = self.device.allocate_sets(pool, &self.layout, self.sets_per_pool)?;
        log::debug!(
            "Created descriptor pool #{} with {} set(s) for layout {:?}",
            self.pools.len(),
            sets.len(),
            self.layout.raw(),
        );
        self.free_sets.extend(sets);

        Ok(())
    }
}

impl<D: DescriptorPoolDevice> Drop for DescriptorSetAllocator<D> {
    fn drop(&mut self) {
        for pool in self.pools.drain(..) {
            self.device.destroy_pool(pool);
        }
    }
}

/// A descriptor set that goes back to its allocator's free list when dropped.
///
/// Dropping returns the set immediately, so only drop it directly once no submitted command
/// buffer can reference it. While frames are in flight use [`PooledDescriptorSet::retire`].
pub struct PooledDescriptorSet<D: DescriptorPoolDevice> {
    set: vk::DescriptorSet,
    allocator: Arc<Mutex<DescriptorSetAllocator<D>>>,
}

impl<D: DescriptorPoolDevice> PooledDescriptorSet<D> {
    pub fn raw(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Returns the set to the free list once `frame`'s ring slot comes around again.
    pub fn retire(self, deletion_tasks: &mut DeletionTasks, frame: &FrameContext)
    where
        D: 'static,
    {
        deletion_tasks.retire(self, frame);
    }
}

impl<D: DescriptorPoolDevice> Drop for PooledDescriptorSet<D> {
    fn drop(&mut self) {
        match self.allocator.lock() {
            Ok(mut allocator) => allocator.free(self.set),
            Err(_) => log::error!("Descriptor allocator lock poisoned; leaking set {:?}", self.set),
        }
    }
}

/// One [`DescriptorSetAllocator`] per layout, created on first use.
pub struct DescriptorAllocatorSet<D: DescriptorPoolDevice + Clone> {
    device: D,
    sets_per_pool: u32,
    allocators: HashMap<vk::DescriptorSetLayout, Arc<Mutex<DescriptorSetAllocator<D>>>>,
}

impl<D: DescriptorPoolDevice + Clone> DescriptorAllocatorSet<D> {
    pub fn new(device: D, sets_per_pool: u32) -> Self {
        Self {
            device,
            sets_per_pool,
            allocators: HashMap::new(),
        }
    }

    pub fn allocator_for(
        &mut self,
        layout: &Arc<DescriptorSetLayout>,
    ) -> Arc<Mutex<DescriptorSetAllocator<D>>> {
        self.allocators
            .entry(layout.raw())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DescriptorSetAllocator::new(
                    self.device.clone(),
                    layout.clone(),
                    self.sets_per_pool,
                )))
            })
            .clone()
    }

    pub fn allocate(&mut self, layout: &Arc<DescriptorSetLayout>) -> Result<PooledDescriptorSet<D>> {
        let allocator = self.allocator_for(layout);
        let set = allocator
            .lock()
            .map_err(|_| eyre!("Descriptor allocator lock poisoned"))?
            .allocate()?;

        Ok(PooledDescriptorSet { set, allocator })
    }

    pub fn layout_count(&self) -> usize {
        self.allocators.len()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::cell::RefCell;
    use std::rc::Rc;
    use ash::vk::Handle;
    use super::*;
    use crate::renderer::contexts::resource_ctx::descriptor_device::DescriptorWrite;

    #[derive(Default)]
    pub struct MockLog {
        pub next_handle: u64,
        pub created_pools: Vec<vk::DescriptorPool>,
        pub destroyed_pools: Vec<vk::DescriptorPool>,
        pub writes: Vec<Vec<DescriptorWrite>>,
    }

    #[derive(Clone, Default)]
    pub struct MockDevice(pub Rc<RefCell<MockLog>>);

    impl MockDevice {
        fn next_handle(&self) -> u64 {
            let mut log = self.0.borrow_mut();
            log.next_handle += 1;
            log.next_handle
        }
    }

    impl DescriptorPoolDevice for MockDevice {
        fn create_pool(&self, _layout: &DescriptorSetLayout, _max_sets: u32) -> Result<vk::DescriptorPool> {
            let pool = vk::DescriptorPool::from_raw(self.next_handle());
            self.0.borrow_mut().created_pools.push(pool);
            Ok(pool)
        }

        fn allocate_sets(
            &self,
            _pool: vk::DescriptorPool,
            _layout: &DescriptorSetLayout,
            count: u32,
        ) -> Result<Vec<vk::DescriptorSet>> {
            Ok((0..count)
                .map(|_| vk::DescriptorSet::from_raw(self.next_handle()))
                .collect())
        }

        fn destroy_pool(&self, pool: vk::DescriptorPool) {
            self.0.borrow_mut().destroyed_pools.push(pool);
        }

        fn write_descriptors(&self, writes: &[DescriptorWrite]) {
            self.0.borrow_mut().writes.push(writes.to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use ash::vk::Handle;
    use super::mock::MockDevice;
    use super::*;
    use crate::renderer::contexts::frame_ctx::frame::FrameContext;
    use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::LayoutBinding;

    fn layout(raw: u64) -> Arc<DescriptorSetLayout> {
        Arc::new(DescriptorSetLayout::from_bindings(
            vk::DescriptorSetLayout::from_raw(raw),
            vec![LayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
                stages: vk::ShaderStageFlags::ALL,
            }],
        ))
    }

    #[test]
    fn grows_a_new_pool_when_exhausted() {
        let device = MockDevice::default();
        let mut allocator = DescriptorSetAllocator::new(device.clone(), layout(1), 2);

        let sets = (0..3)
            .map(|_| allocator.allocate().unwrap())
            .collect::<HashSet<_>>();

        assert_eq!(sets.len(), 3);
        assert_eq!(allocator.pool_count(), 2);
        assert_eq!(allocator.free_count(), 1);
    }

    #[test]
    fn freed_sets_are_reused_before_growing() {
        let device = MockDevice::default();
        let mut allocator = DescriptorSetAllocator::new(device.clone(), layout(1), 1);

        let first = allocator.allocate().unwrap();
        allocator.free(first);
        let second = allocator.allocate().unwrap();

        assert_eq!(first, second);
        assert_eq!(allocator.pool_count(), 1);
    }

    #[test]
    fn dropping_the_allocator_destroys_every_pool() {
        let device = MockDevice::default();
        {
            let mut allocator = DescriptorSetAllocator::new(device.clone(), layout(1), 1);
            allocator.allocate().unwrap();
            allocator.allocate().unwrap();
        }

        let log = device.0.borrow();
        assert_eq!(log.created_pools.len(), 2);
        assert_eq!(log.created_pools, log.destroyed_pools);
    }

    #[test]
    fn allocator_set_keeps_one_allocator_per_layout() {
        let mut allocators = DescriptorAllocatorSet::new(MockDevice::default(), 4);
        let first_layout = layout(10);
        let second_layout = layout(20);

        let a = allocators.allocate(&first_layout).unwrap();
        let b = allocators.allocate(&first_layout).unwrap();
        let c = allocators.allocate(&second_layout).unwrap();

        assert_eq!(allocators.layout_count(), 2);
        assert_ne!(a.raw(), b.raw());
        assert_ne!(b.raw(), c.raw());
    }

    fn frame(ring_index: usize) -> FrameContext {
        FrameContext::new(0.0, 0.016, ring_index, 0).unwrap()
    }

    #[test]
    fn retired_set_is_reused_only_after_its_ring_slot_cycles() {
        let mut allocators = DescriptorAllocatorSet::new(MockDevice::default(), 2);
        let layout = layout(10);
        let allocator = allocators.allocator_for(&layout);
        let mut deletion_tasks = DeletionTasks::new();

        let set = allocators.allocate(&layout).unwrap();
        let raw = set.raw();
        set.retire(&mut deletion_tasks, &frame(1));

        let other = allocators.allocate(&layout).unwrap();
        assert_ne!(other.raw(), raw);
        assert_eq!(allocator.lock().unwrap().free_count(), 0);

        deletion_tasks.tick(&frame(2));
        deletion_tasks.tick(&frame(0));
        assert_eq!(allocator.lock().unwrap().free_count(), 0);

        deletion_tasks.tick(&frame(1));
        assert_eq!(allocator.lock().unwrap().free_count(), 1);

        let reused = allocators.allocate(&layout).unwrap();
        assert_eq!(reused.raw(), raw);
        assert_eq!(allocator.lock().unwrap().pool_count(), 1);
        drop(other);
    }

    #[test]
    fn pooled_set_returns_to_free_list_on_drop() {
        let mut allocators = DescriptorAllocatorSet::new(MockDevice::default(), 2);
        let layout = layout(10);

        let set = allocators.allocate(&layout).unwrap();
        let raw = set.raw();
        let allocator = allocators.allocator_for(&layout);
        assert_eq!(allocator.lock().unwrap().free_count(), 1);

        drop(set);
        assert_eq!(allocator.lock().unwrap().free_count(), 2);

        let reused = allocators.allocate(&layout).unwrap();
        assert_eq!(reused.raw(), raw);
    }
}

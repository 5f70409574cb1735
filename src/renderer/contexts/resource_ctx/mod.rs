pub mod bindless;
pub mod descriptor_allocator;
pub mod descriptor_assignment;
pub mod descriptor_device;
pub mod descriptor_set_layout_builder;
pub mod resource_type;

use std::sync::Arc;
use color_eyre::Result;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::resource_ctx::bindless::GlobalHeap;
use crate::renderer::contexts::resource_ctx::descriptor_allocator::{DescriptorAllocatorSet, PooledDescriptorSet};
use crate::renderer::contexts::resource_ctx::descriptor_device::AshDescriptorDevice;
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::DescriptorSetLayout;

/// Responsibilities:
/// - Own the global bindless heap and hand out resource handles
/// - Allocate and recycle fixed-layout descriptor sets
pub struct ResourceContext {
    pub heap: GlobalHeap,
    pub descriptor_allocators: DescriptorAllocatorSet<AshDescriptorDevice>,
    device: AshDescriptorDevice,
}

impl ResourceContext {
    pub fn new(device: Arc<ash::Device>, config: &RenderConfig) -> Result<Self> {
        let heap = GlobalHeap::new(device.clone(), config)?;
        let device = AshDescriptorDevice::from(device);
        let descriptor_allocators =
            DescriptorAllocatorSet::new(device.clone(), config.descriptor_sets_per_pool);

        Ok(Self {
            heap,
            descriptor_allocators,
            device,
        })
    }

    pub fn allocate_descriptor_set(
        &mut self,
        layout: &Arc<DescriptorSetLayout>,
    ) -> Result<PooledDescriptorSet<AshDescriptorDevice>> {
        self.descriptor_allocators.allocate(layout)
    }

    /// Device used to submit [`descriptor_assignment::DescriptorAssignment`] writes.
    pub fn descriptor_device(&self) -> &AshDescriptorDevice {
        &self.device
    }
}

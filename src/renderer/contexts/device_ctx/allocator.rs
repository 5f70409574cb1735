use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::{AllocatorDebugSettings, MemoryLocation};
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::transfer_ctx::SingleTimeCommands;
use crate::renderer::contexts::graph_ctx::barrier::{cmd_image_barriers, image_barrier, ResourceState};
use crate::renderer::resources::buffer::BufferAllocation;
use crate::renderer::resources::image::{check_upload_size, ImageAllocation, ImageDescriptor};

/// Creates buffers and images backed by the shared gpu-allocator instance.
#[derive(Clone)]
pub struct ResourceAllocator {
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl ResourceAllocator {
    pub fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        config: &RenderConfig,
    ) -> Result<Self> {
        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: AllocatorDebugSettings {
                log_memory_information: config.allocator_debug,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: config.allocator_debug,
                log_frees: config.allocator_debug,
                log_stack_traces: false,
            },
            buffer_device_address: config.ray_tracing,
            allocation_sizes: Default::default(),
        })?;

        log::info!("Memory allocator created (debug logging: {})", config.allocator_debug);

        Ok(Self {
            memory_allocator: Arc::new(Mutex::new(memory_allocator)),
            device,
        })
    }

    pub fn memory_allocator(&self) -> &Arc<Mutex<Allocator>> {
        &self.memory_allocator
    }

    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<BufferAllocation> {
        BufferAllocation::new(
            size,
            usage,
            location,
            name,
            self.memory_allocator.clone(),
            self.device.clone(),
        )
    }

    pub fn create_image(
        &self,
        descriptor: &ImageDescriptor,
        location: MemoryLocation,
    ) -> Result<ImageAllocation> {
        ImageAllocation::new(
            descriptor,
            location,
            self.memory_allocator.clone(),
            self.device.clone(),
        )
    }

    /// Copies `data` into `dst` through a staging buffer that is released before returning.
    pub fn upload_buffer(
        &self,
        commands: &SingleTimeCommands,
        dst: &BufferAllocation,
        data: &[u8],
    ) -> Result<()> {
        if data.len() as u64 > dst.size() {
            return Err(eyre!(
                "Upload of {} bytes does not fit into a {} byte buffer",
                data.len(),
                dst.size(),
            ));
        }
        if data.is_empty() {
            return Ok(());
        }

        let mut staging = self.create_buffer(
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "Buffer staging buffer",
        )?;
        staging.write(data, 0)?;

        commands.immediate_submit(|cmd, device| {
            let region = vk::BufferCopy::default()
                .src_offset(0)
                .dst_offset(0)
                .size(data.len() as u64);
            unsafe {
                device.cmd_copy_buffer(cmd, staging.buffer(), dst.buffer(), &[region]);
            }
            Ok(())
        })
    }

    /// Fills mip 0 of `dst` and leaves the image in `final_state`. `data` must cover it exactly.
    pub fn upload_image(
        &self,
        commands: &SingleTimeCommands,
        dst: &ImageAllocation,
        data: &[u8],
        final_state: ResourceState,
    ) -> Result<()> {
        check_upload_size(dst.format(), dst.extent(), data.len())?;

        let mut staging = self.create_buffer(
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "Image staging buffer",
        )?;
        staging.write(data, 0)?;

        commands.immediate_submit(|cmd, device| {
            let to_transfer = image_barrier(
                dst.image(),
                dst.aspect(),
                &ResourceState::UNDEFINED,
                &ResourceState::TRANSFER_DST,
            );
            cmd_image_barriers(device, cmd, &[to_transfer]);

            let copy_region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(dst.aspect())
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_extent(dst.extent());
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer(),
                    dst.image(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[copy_region],
                );
            }

            let to_final = image_barrier(
                dst.image(),
                dst.aspect(),
                &ResourceState::TRANSFER_DST,
                &final_state,
            );
            cmd_image_barriers(device, cmd, &[to_final]);
            Ok(())
        })
    }
}

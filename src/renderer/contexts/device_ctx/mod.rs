pub mod allocator;
pub mod debug;
pub mod queue;
pub mod transfer_ctx;

use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::allocator::ResourceAllocator;
use crate::renderer::contexts::device_ctx::debug::DebugMessenger;
use crate::renderer::contexts::device_ctx::queue::Queue;
use crate::renderer::contexts::device_ctx::transfer_ctx::SingleTimeCommands;

/// Responsibilities:
/// - Wrap the externally created instance, device and queue
/// - Own the memory allocator every buffer and image is created through
/// - Submit blocking one-shot command buffers
pub struct RenderContext {
    pub single_time_commands: SingleTimeCommands,
    pub allocator: ResourceAllocator,
    pub graphics_queue: Arc<Queue>,
    /// Present only when `RenderConfig::ray_tracing` is set.
    ray_tracing_pipeline: Option<ash::khr::ray_tracing_pipeline::Device>,
    debug_messenger: Option<DebugMessenger>,

    pub config: RenderConfig,
    pub physical_device: vk::PhysicalDevice,
    pub device: Arc<ash::Device>,
    pub instance: ash::Instance,
}

impl RenderContext {
    pub fn new(
        instance: ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        config: RenderConfig,
    ) -> Result<Self> {
        let allocator = ResourceAllocator::new(
            &instance,
            device.clone(),
            physical_device,
            &config,
        )?;
        let graphics_queue = Arc::new(Queue::new(queue_family_index, device.clone()));
        let single_time_commands = SingleTimeCommands::new(
            graphics_queue.clone(),
            device.clone(),
        )?;
        let ray_tracing_pipeline = config.ray_tracing
            .then(|| ash::khr::ray_tracing_pipeline::Device::new(&instance, &device));

        log::info!(
            "Render context created (queue family {}, ray tracing: {})",
            queue_family_index,
            config.ray_tracing,
        );

        Ok(Self {
            single_time_commands,
            allocator,
            graphics_queue,
            ray_tracing_pipeline,
            debug_messenger: None,
            config,
            physical_device,
            device,
            instance,
        })
    }

    /// Routes validation output into `log`. Requires `VK_EXT_debug_utils` on the instance.
    pub fn with_debug_messenger(mut self, entry: &ash::Entry) -> Result<Self> {
        self.debug_messenger = Some(DebugMessenger::new(entry, &self.instance)?);
        Ok(self)
    }

    pub fn ray_tracing_pipeline(&self) -> Result<&ash::khr::ray_tracing_pipeline::Device> {
        self.ray_tracing_pipeline
            .as_ref()
            .ok_or_eyre("Ray tracing was not enabled in RenderConfig")
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

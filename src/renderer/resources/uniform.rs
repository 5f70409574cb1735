use std::marker::PhantomData;
use ash::vk;
use bytemuck::Pod;
use color_eyre::Result;
use gpu_allocator::MemoryLocation;
use crate::renderer::contexts::device_ctx::allocator::ResourceAllocator;
use crate::renderer::contexts::device_ctx::transfer_ctx::SingleTimeCommands;
use crate::renderer::contexts::frame_ctx::deletion::DeletionTasks;
use crate::renderer::contexts::frame_ctx::frame::{FrameContext, FrameRing};
use crate::renderer::resources::buffer::BufferAllocation;
use crate::renderer::shader_data::GpuData;

/// One host-visible uniform buffer per frame in flight, each holding a single `T`.
///
/// Dropping frees every replica at once. Use [`UniformBuffer::retire`] while frames are in flight.
pub struct UniformBuffer<T: GpuData> {
    buffers: FrameRing<BufferAllocation>,
    _marker: PhantomData<T>,
}

impl<T: GpuData> UniformBuffer<T> {
    pub fn new(allocator: &ResourceAllocator, name: &str) -> Result<Self> {
        T::check_uniform_layout()?;

        let buffers = FrameRing::try_new(|ring_index| {
            allocator.create_buffer(
                T::size() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                &format!("{} [{}]", name, ring_index),
            )
        })?;

        Ok(Self {
            buffers,
            _marker: PhantomData,
        })
    }

    /// Overwrites the replica owned by `frame`. Replicas of frames still in flight are untouched.
    pub fn write(&mut self, frame: &FrameContext, data: &T) -> Result<()> {
        self.buffers
            .get_mut(frame)
            .write(std::slice::from_ref(data), 0)
    }

    pub fn buffer(&self, frame: &FrameContext) -> vk::Buffer {
        self.buffers.get(frame).buffer()
    }

    pub fn buffers(&self) -> impl Iterator<Item = vk::Buffer> + '_ {
        self.buffers.iter().map(BufferAllocation::buffer)
    }

    pub fn size(&self) -> vk::DeviceSize {
        T::size() as vk::DeviceSize
    }

    /// Frees the replicas once `frame`'s ring slot comes around again.
    pub fn retire(self, deletion_tasks: &mut DeletionTasks, frame: &FrameContext) {
        deletion_tasks.retire(self, frame);
    }
}

/// Frame-ringed storage buffer of arbitrary byte size, rewritten every frame.
pub struct DynamicBuffer {
    buffers: FrameRing<BufferAllocation>,
    size: vk::DeviceSize,
}

impl DynamicBuffer {
    pub fn new(
        allocator: &ResourceAllocator,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<Self> {
        let buffers = FrameRing::try_new(|ring_index| {
            allocator.create_buffer(
                size,
                usage | vk::BufferUsageFlags::STORAGE_BUFFER,
                MemoryLocation::CpuToGpu,
                &format!("{} [{}]", name, ring_index),
            )
        })?;

        Ok(Self { buffers, size })
    }

    pub fn write<T: Pod>(&mut self, frame: &FrameContext, data: &[T], offset: usize) -> Result<()> {
        self.buffers.get_mut(frame).write(data, offset)
    }

    pub fn buffer(&self, frame: &FrameContext) -> vk::Buffer {
        self.buffers.get(frame).buffer()
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn retire(self, deletion_tasks: &mut DeletionTasks, frame: &FrameContext) {
        deletion_tasks.retire(self, frame);
    }
}

/// A single device-local uniform, uploaded once at load time and never frame-indexed.
pub struct ConstantBuffer<T: GpuData> {
    buffer: BufferAllocation,
    _marker: PhantomData<T>,
}

impl<T: GpuData> ConstantBuffer<T> {
    pub fn new(
        allocator: &ResourceAllocator,
        commands: &SingleTimeCommands,
        data: &T,
        name: &str,
    ) -> Result<Self> {
        T::check_uniform_layout()?;

        let buffer = allocator.create_buffer(
            T::size() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )?;
        allocator.upload_buffer(commands, &buffer, bytemuck::bytes_of(data))?;

        Ok(Self {
            buffer,
            _marker: PhantomData,
        })
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer.buffer()
    }

    pub fn size(&self) -> vk::DeviceSize {
        T::size() as vk::DeviceSize
    }

    pub fn retire(self, deletion_tasks: &mut DeletionTasks, frame: &FrameContext) {
        deletion_tasks.retire(self, frame);
    }
}

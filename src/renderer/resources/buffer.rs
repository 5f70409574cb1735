use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use crate::renderer::error::CoreError;

/// Rejects writes of `len` bytes at `offset` that would run past a `size` byte allocation.
pub fn check_write_bounds(offset: u64, len: u64, size: u64) -> Result<(), CoreError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(CoreError::AllocationOverflow { offset, len, size }),
    }
}

/// Exclusively owns one native buffer and the memory bound to it.
pub struct BufferAllocation {
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    location: MemoryLocation,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl BufferAllocation {
    pub fn new(
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let buffer = {
            let buffer_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            unsafe { device.create_buffer(&buffer_info, None)? }
        };

        let requirements = unsafe {
            device.get_buffer_memory_requirements(buffer)
        };
        let allocation = memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name,
                        requirements,
                        location,
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|e| eyre!("Failed to allocate {} bytes for buffer '{}': {}", size, name, e))
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        unsafe {
            device.bind_buffer_memory(
                buffer,
                allocation.memory(),
                allocation.offset(),
            )?;
        }

        log::trace!("Created buffer '{}' ({} bytes, {:?})", name, size, location);

        Ok(Self {
            buffer,
            size,
            location,

            allocation: Some(allocation),
            memory_allocator,
            device,
        })
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    /// Scoped host access to the buffer memory. Fails for device-local memory.
    pub fn map_memory(&mut self) -> Result<MappedMemory<'_>> {
        if self.location == MemoryLocation::GpuOnly {
            return Err(CoreError::NotHostVisible.into());
        }

        let allocation = self.allocation
            .as_mut()
            .ok_or_else(|| eyre!("Buffer allocation was already released"))?;
        if allocation.mapped_ptr().is_none() {
            return Err(CoreError::NotHostVisible.into());
        }

        Ok(MappedMemory {
            allocation,
            size: self.size,
        })
    }

    pub fn write<T: Copy>(&mut self, data: &[T], offset: usize) -> Result<()> {
        self.map_memory()?.write(data, offset)
    }
}

impl Drop for BufferAllocation {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.memory_allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(err) = allocator.free(allocation) {
                        log::error!("Failed to free buffer memory: {}", err);
                    }
                }
                Err(_) => log::error!("Memory allocator lock poisoned; leaking buffer memory"),
            }
        }

        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Borrowed view of host-visible allocation memory.
///
/// gpu-allocator keeps host-visible blocks persistently mapped, so ending the scope
/// releases the borrow rather than calling `vkUnmapMemory`.
pub struct MappedMemory<'a> {
    allocation: &'a mut Allocation,
    size: vk::DeviceSize,
}

impl MappedMemory<'_> {
    pub fn write<T: Copy>(&mut self, data: &[T], offset: usize) -> Result<()> {
        check_write_bounds(offset as u64, size_of_val(data) as u64, self.size)?;
        presser::copy_from_slice_to_offset(data, &mut *self.allocation, offset)?;
        Ok(())
    }

    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        let size = self.size as usize;
        self.allocation
            .mapped_slice_mut()
            .map(|slice| &mut slice[..size])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_bounds_allow_exact_fit() {
        assert!(check_write_bounds(0, 64, 64).is_ok());
        assert!(check_write_bounds(48, 16, 64).is_ok());
        assert!(check_write_bounds(64, 0, 64).is_ok());
    }

    #[test]
    fn write_bounds_reject_overflow() {
        assert_eq!(
            check_write_bounds(56, 16, 64),
            Err(CoreError::AllocationOverflow { offset: 56, len: 16, size: 64 })
        );
        assert!(check_write_bounds(u64::MAX, 1, 64).is_err());
    }
}

use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use gpu_descriptor::{
    CreatePoolError,
    DescriptorDevice,
    DescriptorPoolCreateFlags,
    DescriptorTotalCount,
    DeviceAllocationError,
};
use smallvec::SmallVec;
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::{DescriptorSetLayout, LayoutBinding};
use crate::renderer::error::CoreError;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BufferDescriptorInfo {
    pub ty: vk::DescriptorType,
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub range: vk::DeviceSize,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ImageDescriptorInfo {
    pub ty: vk::DescriptorType,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub layout: vk::ImageLayout,
}

/// The resource a single descriptor points at.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DescriptorResource {
    Buffer(BufferDescriptorInfo),
    Image(ImageDescriptorInfo),
    AccelerationStructure(vk::AccelerationStructureKHR),
}

impl DescriptorResource {
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::Buffer(buffer) => buffer.ty,
            Self::Image(image) => image.ty,
            Self::AccelerationStructure(_) => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub array_element: u32,
    pub resource: DescriptorResource,
}

/// The device calls descriptor pools and sets are built on.
pub trait DescriptorPoolDevice {
    fn create_pool(
        &self,
        layout: &DescriptorSetLayout,
        max_sets: u32,
    ) -> Result<vk::DescriptorPool>;

    fn allocate_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: &DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>>;

    fn destroy_pool(&self, pool: vk::DescriptorPool);

    fn write_descriptors(&self, writes: &[DescriptorWrite]);
}

/// Sums descriptors per type over `bindings`, scaled by the number of sets a pool must hold.
pub fn descriptor_total_count(
    bindings: &[LayoutBinding],
    max_sets: u32,
) -> Result<DescriptorTotalCount, CoreError> {
    let mut total = DescriptorTotalCount {
        sampler: 0,
        combined_image_sampler: 0,
        sampled_image: 0,
        storage_image: 0,
        uniform_texel_buffer: 0,
        storage_texel_buffer: 0,
        uniform_buffer: 0,
        storage_buffer: 0,
        uniform_buffer_dynamic: 0,
        storage_buffer_dynamic: 0,
        input_attachment: 0,
        acceleration_structure: 0,
        inline_uniform_block_bytes: 0,
        inline_uniform_block_bindings: 0,
    };

    for binding in bindings {
        let overflow = CoreError::DescriptorCountOverflow {
            binding: binding.binding,
            max_sets,
        };
        let count = binding.descriptor_count
            .checked_mul(max_sets)
            .ok_or(overflow.clone())?;
        let slot = match binding.descriptor_type {
            vk::DescriptorType::SAMPLER => &mut total.sampler,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER => &mut total.combined_image_sampler,
            vk::DescriptorType::SAMPLED_IMAGE => &mut total.sampled_image,
            vk::DescriptorType::STORAGE_IMAGE => &mut total.storage_image,
            vk::DescriptorType::UNIFORM_TEXEL_BUFFER => &mut total.uniform_texel_buffer,
            vk::DescriptorType::STORAGE_TEXEL_BUFFER => &mut total.storage_texel_buffer,
            vk::DescriptorType::UNIFORM_BUFFER => &mut total.uniform_buffer,
            vk::DescriptorType::STORAGE_BUFFER => &mut total.storage_buffer,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => &mut total.uniform_buffer_dynamic,
            vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => &mut total.storage_buffer_dynamic,
            vk::DescriptorType::INPUT_ATTACHMENT => &mut total.input_attachment,
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR => &mut total.acceleration_structure,
            other => {
                log::warn!("Descriptor type {:?} is not pooled", other);
                continue;
            }
        };
        *slot = slot.checked_add(count).ok_or(overflow)?;
    }

    Ok(total)
}

pub fn pool_sizes(total: &DescriptorTotalCount) -> SmallVec<[vk::DescriptorPoolSize; 12]> {
    [
        (vk::DescriptorType::SAMPLER, total.sampler),
        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, total.combined_image_sampler),
        (vk::DescriptorType::SAMPLED_IMAGE, total.sampled_image),
        (vk::DescriptorType::STORAGE_IMAGE, total.storage_image),
        (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, total.uniform_texel_buffer),
        (vk::DescriptorType::STORAGE_TEXEL_BUFFER, total.storage_texel_buffer),
        (vk::DescriptorType::UNIFORM_BUFFER, total.uniform_buffer),
        (vk::DescriptorType::STORAGE_BUFFER, total.storage_buffer),
        (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, total.uniform_buffer_dynamic),
        (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, total.storage_buffer_dynamic),
        (vk::DescriptorType::INPUT_ATTACHMENT, total.input_attachment),
        (vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, total.acceleration_structure),
    ]
        .into_iter()
        .filter(|(_, count)| *count != 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
        .collect()
}

#[derive(Clone)]
pub struct AshDescriptorDevice(pub Arc<ash::Device>);

impl From<Arc<ash::Device>> for AshDescriptorDevice {
    fn from(device: Arc<ash::Device>) -> Self {
        Self(device)
    }
}

impl DescriptorPoolDevice for AshDescriptorDevice {
    fn create_pool(
        &self,
        layout: &DescriptorSetLayout,
        max_sets: u32,
    ) -> Result<vk::DescriptorPool> {
        let sizes = pool_sizes(&descriptor_total_count(layout.bindings(), max_sets)?);
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        let pool = unsafe {
            self.0.create_descriptor_pool(&pool_info, None)?
        };

        Ok(pool)
    }

    fn allocate_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: &DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let set_layouts: SmallVec<[_; 16]> = (0..count).map(|_| layout.raw()).collect();
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);

        let sets = unsafe {
            self.0.allocate_descriptor_sets(&allocate_info)?
        };

        Ok(sets)
    }

    fn destroy_pool(&self, pool: vk::DescriptorPool) {
        unsafe {
            self.0.destroy_descriptor_pool(pool, None);
        }
    }

    fn write_descriptors(&self, writes: &[DescriptorWrite]) {
        let buffer_infos = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::Buffer(buffer) => vk::DescriptorBufferInfo::default()
                    .buffer(buffer.buffer)
                    .offset(buffer.offset)
                    .range(buffer.range),
                _ => vk::DescriptorBufferInfo::default(),
            })
            .collect::<Vec<_>>();
        let image_infos = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::Image(image) => vk::DescriptorImageInfo::default()
                    .image_view(image.view)
                    .sampler(image.sampler)
                    .image_layout(image.layout),
                _ => vk::DescriptorImageInfo::default(),
            })
            .collect::<Vec<_>>();
        let acceleration_structures = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::AccelerationStructure(tlas) => tlas,
                _ => vk::AccelerationStructureKHR::null(),
            })
            .collect::<Vec<_>>();
        let mut acceleration_structure_infos = acceleration_structures
            .iter()
            .map(|tlas| {
                vk::WriteDescriptorSetAccelerationStructureKHR::default()
                    .acceleration_structures(std::slice::from_ref(tlas))
            })
            .collect::<Vec<_>>();

        let vk_writes = writes
            .iter()
            .zip(acceleration_structure_infos.iter_mut())
            .enumerate()
            .map(|(i, (write, acceleration_structure_info))| {
                let vk_write = vk::WriteDescriptorSet::default()
                    .dst_set(write.set)
                    .dst_binding(write.binding)
                    .dst_array_element(write.array_element)
                    .descriptor_type(write.resource.descriptor_type());

                match write.resource {
                    DescriptorResource::Buffer(_) => {
                        vk_write.buffer_info(std::slice::from_ref(&buffer_infos[i]))
                    }
                    DescriptorResource::Image(_) => {
                        vk_write.image_info(std::slice::from_ref(&image_infos[i]))
                    }
                    // The count is not implied by any info slice for acceleration structures
                    DescriptorResource::AccelerationStructure(_) => vk_write
                        .descriptor_count(1)
                        .push_next(acceleration_structure_info),
                }
            })
            .collect::<Vec<_>>();

        unsafe {
            self.0.update_descriptor_sets(&vk_writes, &[]);
        }
    }
}

impl DescriptorDevice<vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet>
for AshDescriptorDevice
{
    unsafe fn create_descriptor_pool(
        &self,
        descriptor_count: &DescriptorTotalCount,
        max_sets: u32,
        flags: DescriptorPoolCreateFlags,
    ) -> Result<vk::DescriptorPool, CreatePoolError> {
        if descriptor_count.inline_uniform_block_bytes != 0
            || descriptor_count.inline_uniform_block_bindings != 0
        {
            log::error!("Inline uniform blocks are not supported; ignoring their pool sizes");
        }

        let sizes = pool_sizes(descriptor_count);

        let mut ash_flags = vk::DescriptorPoolCreateFlags::empty();
        if flags.contains(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET) {
            ash_flags |= vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
        }
        if flags.contains(DescriptorPoolCreateFlags::UPDATE_AFTER_BIND) {
            ash_flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }

        let result = unsafe {
            self.0.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(max_sets)
                    .pool_sizes(&sizes)
                    .flags(ash_flags),
                None,
            )
        };

        match result {
            Ok(pool) => Ok(pool),
            Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => Err(CreatePoolError::OutOfHostMemory),
            Err(vk::Result::ERROR_FRAGMENTATION) => Err(CreatePoolError::Fragmentation),
            Err(err) => {
                log::error!("Unexpected descriptor pool creation result '{}'", err);
                Err(CreatePoolError::OutOfDeviceMemory)
            }
        }
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe {
            self.0.destroy_descriptor_pool(pool, None)
        }
    }

    unsafe fn alloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        layouts: impl ExactSizeIterator<Item = &'a vk::DescriptorSetLayout>,
        sets: &mut impl Extend<vk::DescriptorSet>,
    ) -> Result<(), DeviceAllocationError> {
        let set_layouts: SmallVec<[_; 16]> = layouts.copied().collect();

        let result = unsafe {
            self.0.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .set_layouts(&set_layouts)
                    .descriptor_pool(*pool),
            )
        };

        match result {
            Ok(allocated) => {
                sets.extend(allocated);
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => Err(DeviceAllocationError::OutOfHostMemory),
            Err(vk::Result::ERROR_FRAGMENTED_POOL) => Err(DeviceAllocationError::FragmentedPool),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) => Err(DeviceAllocationError::OutOfPoolMemory),
            Err(err) => {
                log::error!("Unexpected descriptor set allocation result '{}'", err);
                Err(DeviceAllocationError::OutOfDeviceMemory)
            }
        }
    }

    unsafe fn dealloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        sets: impl Iterator<Item = vk::DescriptorSet>,
    ) {
        let sets: SmallVec<[_; 16]> = sets.collect();
        if let Err(err) = unsafe { self.0.free_descriptor_sets(*pool, &sets) } {
            log::error!("Failed to free {} descriptor set(s): {}", sets.len(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_count_scales_with_set_count() {
        let bindings = [
            LayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
                stages: vk::ShaderStageFlags::ALL,
            },
            LayoutBinding {
                binding: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 4,
                stages: vk::ShaderStageFlags::FRAGMENT,
            },
            LayoutBinding {
                binding: 2,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 2,
                stages: vk::ShaderStageFlags::ALL,
            },
        ];

        let total = descriptor_total_count(&bindings, 10).unwrap();
        assert_eq!(total.uniform_buffer, 30);
        assert_eq!(total.combined_image_sampler, 40);

        let sizes = pool_sizes(&total);
        assert_eq!(sizes.len(), 2);
        assert!(sizes.iter().all(|size| size.descriptor_count > 0));
    }

    #[test]
    fn total_count_rejects_overflowing_pools() {
        let bindings = [
            LayoutBinding {
                binding: 3,
                descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: u32::MAX / 2,
                stages: vk::ShaderStageFlags::ALL,
            },
            LayoutBinding {
                binding: 4,
                descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: u32::MAX / 2 + 2,
                stages: vk::ShaderStageFlags::ALL,
            },
        ];

        assert_eq!(
            descriptor_total_count(&bindings[..1], 3).unwrap_err(),
            CoreError::DescriptorCountOverflow { binding: 3, max_sets: 3 }
        );
        // Each binding fits on its own but their sum does not.
        assert_eq!(
            descriptor_total_count(&bindings, 1).unwrap_err(),
            CoreError::DescriptorCountOverflow { binding: 4, max_sets: 1 }
        );
        assert!(descriptor_total_count(&bindings[..1], 2).is_ok());
    }

    #[test]
    fn resource_reports_its_descriptor_type() {
        let tlas = DescriptorResource::AccelerationStructure(vk::AccelerationStructureKHR::null());
        assert_eq!(tlas.descriptor_type(), vk::DescriptorType::ACCELERATION_STRUCTURE_KHR);

        let storage = DescriptorResource::Buffer(BufferDescriptorInfo {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            buffer: vk::Buffer::null(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        });
        assert_eq!(storage.descriptor_type(), vk::DescriptorType::STORAGE_BUFFER);
    }
}

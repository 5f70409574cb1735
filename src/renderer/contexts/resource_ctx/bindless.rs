use std::sync::Arc;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use gpu_descriptor::{DescriptorAllocator, DescriptorSetLayoutCreateFlags};
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::resource_ctx::descriptor_device::{
    descriptor_total_count,
    AshDescriptorDevice,
    BufferDescriptorInfo,
    DescriptorPoolDevice,
    DescriptorResource,
    DescriptorWrite,
    ImageDescriptorInfo,
};
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::{DescriptorSetLayout, DescriptorSetLayoutBuilder};
use crate::renderer::contexts::resource_ctx::resource_type::BindlessTableType;
use crate::renderer::error::CoreError;

const INVALID_INDEX: u32 = u32::MAX;

macro_rules! bindless_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Pod, Zeroable)]
        pub struct $name(u32);

        impl $name {
            pub const INVALID: Self = Self(INVALID_INDEX);

            fn new(index: u32) -> Self {
                Self(index)
            }

            pub fn index(&self) -> u32 {
                self.0
            }

            pub fn is_valid(&self) -> bool {
                self.0 != INVALID_INDEX
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }
    };
}

bindless_handle!(
    /// Slot in the storage buffer table.
    BufferHandle
);
bindless_handle!(
    /// Slot in the uniform buffer table.
    UniformHandle
);
bindless_handle!(
    /// Slot in the sampled texture table.
    ImageHandle
);
bindless_handle!(StorageImageHandle);
bindless_handle!(TlasHandle);

struct BindlessTable {
    ty: BindlessTableType,
    capacity: u32,
    slots: Vec<Option<DescriptorResource>>,
}

impl BindlessTable {
    fn new(ty: BindlessTableType, config: &RenderConfig) -> Self {
        Self {
            ty,
            capacity: ty.capacity(config),
            slots: Vec::new(),
        }
    }

    fn register(&mut self) -> Result<u32, CoreError> {
        let index = self.slots.len() as u32;
        if index >= self.capacity {
            return Err(CoreError::HeapCapacityExceeded {
                table: self.ty.name(),
                capacity: self.capacity,
            });
        }

        self.slots.push(None);
        Ok(index)
    }

    fn update(
        &mut self,
        set: vk::DescriptorSet,
        index: u32,
        resource: DescriptorResource,
    ) -> Result<DescriptorWrite, CoreError> {
        let expected = self.ty.descriptor_type();
        if resource.descriptor_type() != expected {
            return Err(CoreError::BindingTypeMismatch {
                binding: self.ty.binding(),
                expected,
                actual: resource.descriptor_type(),
            });
        }

        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(CoreError::UnregisteredHandle {
                table: self.ty.name(),
                index,
            })?;
        *slot = Some(resource);

        Ok(DescriptorWrite {
            set,
            binding: self.ty.binding(),
            array_element: index,
            resource,
        })
    }

    fn get(&self, index: u32) -> Option<&DescriptorResource> {
        self.slots.get(index as usize)?.as_ref()
    }

    fn len(&self) -> u32 {
        self.slots.len() as u32
    }
}

/// Slot bookkeeping for the global heap, with a CPU shadow of every written descriptor.
///
/// Produces the [`DescriptorWrite`]s that [`GlobalHeap`] submits. Slots are handed out
/// monotonically and never recycled.
pub struct BindlessTables {
    set: vk::DescriptorSet,
    storage_buffers: BindlessTable,
    uniform_buffers: BindlessTable,
    textures: BindlessTable,
    storage_images: BindlessTable,
    tlas: BindlessTable,
}

impl BindlessTables {
    pub fn new(config: &RenderConfig, set: vk::DescriptorSet) -> Self {
        Self {
            set,
            storage_buffers: BindlessTable::new(BindlessTableType::StorageBuffer, config),
            uniform_buffers: BindlessTable::new(BindlessTableType::UniformBuffer, config),
            textures: BindlessTable::new(BindlessTableType::Texture, config),
            storage_images: BindlessTable::new(BindlessTableType::StorageImage, config),
            tlas: BindlessTable::new(BindlessTableType::Tlas, config),
        }
    }

    pub fn register_storage_buffer(&mut self) -> Result<BufferHandle, CoreError> {
        self.storage_buffers.register().map(BufferHandle::new)
    }

    pub fn register_uniform_buffer(&mut self) -> Result<UniformHandle, CoreError> {
        self.uniform_buffers.register().map(UniformHandle::new)
    }

    pub fn register_texture(&mut self) -> Result<ImageHandle, CoreError> {
        self.textures.register().map(ImageHandle::new)
    }

    pub fn register_storage_image(&mut self) -> Result<StorageImageHandle, CoreError> {
        self.storage_images.register().map(StorageImageHandle::new)
    }

    pub fn register_tlas(&mut self) -> Result<TlasHandle, CoreError> {
        self.tlas.register().map(TlasHandle::new)
    }

    pub fn update_storage_buffer(
        &mut self,
        handle: BufferHandle,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Result<DescriptorWrite, CoreError> {
        let resource = DescriptorResource::Buffer(BufferDescriptorInfo {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            buffer,
            offset,
            range,
        });
        self.storage_buffers.update(self.set, handle.index(), resource)
    }

    pub fn update_uniform_buffer(
        &mut self,
        handle: UniformHandle,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Result<DescriptorWrite, CoreError> {
        let resource = DescriptorResource::Buffer(BufferDescriptorInfo {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            buffer,
            offset,
            range,
        });
        self.uniform_buffers.update(self.set, handle.index(), resource)
    }

    pub fn update_texture(
        &mut self,
        handle: ImageHandle,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Result<DescriptorWrite, CoreError> {
        let resource = DescriptorResource::Image(ImageDescriptorInfo {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            view,
            sampler,
            layout,
        });
        self.textures.update(self.set, handle.index(), resource)
    }

    pub fn update_storage_image(
        &mut self,
        handle: StorageImageHandle,
        view: vk::ImageView,
    ) -> Result<DescriptorWrite, CoreError> {
        let resource = DescriptorResource::Image(ImageDescriptorInfo {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            view,
            sampler: vk::Sampler::null(),
            layout: vk::ImageLayout::GENERAL,
        });
        self.storage_images.update(self.set, handle.index(), resource)
    }

    pub fn update_tlas(
        &mut self,
        handle: TlasHandle,
        tlas: vk::AccelerationStructureKHR,
    ) -> Result<DescriptorWrite, CoreError> {
        let resource = DescriptorResource::AccelerationStructure(tlas);
        self.tlas.update(self.set, handle.index(), resource)
    }

    pub fn storage_buffer_descriptor(&self, handle: BufferHandle) -> Option<BufferDescriptorInfo> {
        match self.storage_buffers.get(handle.index())? {
            DescriptorResource::Buffer(buffer) => Some(*buffer),
            _ => None,
        }
    }

    pub fn uniform_buffer_descriptor(&self, handle: UniformHandle) -> Option<BufferDescriptorInfo> {
        match self.uniform_buffers.get(handle.index())? {
            DescriptorResource::Buffer(buffer) => Some(*buffer),
            _ => None,
        }
    }

    pub fn texture_descriptor(&self, handle: ImageHandle) -> Option<ImageDescriptorInfo> {
        match self.textures.get(handle.index())? {
            DescriptorResource::Image(image) => Some(*image),
            _ => None,
        }
    }

    pub fn storage_image_descriptor(&self, handle: StorageImageHandle) -> Option<ImageDescriptorInfo> {
        match self.storage_images.get(handle.index())? {
            DescriptorResource::Image(image) => Some(*image),
            _ => None,
        }
    }

    pub fn tlas_descriptor(&self, handle: TlasHandle) -> Option<vk::AccelerationStructureKHR> {
        match self.tlas.get(handle.index())? {
            DescriptorResource::AccelerationStructure(tlas) => Some(*tlas),
            _ => None,
        }
    }

    pub fn registered_count(&self, table: BindlessTableType) -> u32 {
        match table {
            BindlessTableType::StorageBuffer => self.storage_buffers.len(),
            BindlessTableType::UniformBuffer => self.uniform_buffers.len(),
            BindlessTableType::Texture => self.textures.len(),
            BindlessTableType::StorageImage => self.storage_images.len(),
            BindlessTableType::Tlas => self.tlas.len(),
        }
    }
}

/// The single persistently bound, update-after-bind descriptor set every pipeline shares.
pub struct GlobalHeap {
    device: AshDescriptorDevice,
    tables: BindlessTables,
    layout: Arc<DescriptorSetLayout>,
    descriptor_set: Option<gpu_descriptor::DescriptorSet<vk::DescriptorSet>>,
    descriptor_allocator: DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>,
}

impl GlobalHeap {
    pub fn new(device: Arc<ash::Device>, config: &RenderConfig) -> Result<Self> {
        let mut builder = DescriptorSetLayoutBuilder::new();
        for table in BindlessTableType::ALL {
            let capacity = table.capacity(config);
            if capacity > 0 {
                builder = builder.add_binding_for_table(*table, capacity);
            }
        }
        let layout = builder.build(
            vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL,
            device.clone(),
        )?;

        let device = AshDescriptorDevice::from(device);
        let max_update_after_bind_descriptors = layout
            .bindings()
            .iter()
            .fold(0u32, |total, binding| total.saturating_add(binding.descriptor_count));
        let mut descriptor_allocator: DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>
            = DescriptorAllocator::new(max_update_after_bind_descriptors);
        let raw_layout = layout.raw();

        let descriptor_set = unsafe {
            descriptor_allocator
                .allocate(
                    &device,
                    &raw_layout,
                    DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND,
                    &descriptor_total_count(layout.bindings(), 1)?,
                    1,
                )?
                .drain(..)
                .next()
                .ok_or_eyre("Failed to allocate global heap descriptor set")?
        };

        log::info!(
            "Global heap created: {} storage buffers, {} uniform buffers, {} textures, {} storage images, {} acceleration structures",
            BindlessTableType::StorageBuffer.capacity(config),
            BindlessTableType::UniformBuffer.capacity(config),
            BindlessTableType::Texture.capacity(config),
            BindlessTableType::StorageImage.capacity(config),
            BindlessTableType::Tlas.capacity(config),
        );

        Ok(Self {
            tables: BindlessTables::new(config, *descriptor_set.raw()),
            device,
            layout,
            descriptor_set: Some(descriptor_set),
            descriptor_allocator,
        })
    }

    pub fn tables(&self) -> &BindlessTables {
        &self.tables
    }

    pub fn pipeline_layout_set(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.tables.set
    }

    pub fn register_storage_buffer(&mut self) -> Result<BufferHandle, CoreError> {
        self.tables.register_storage_buffer()
    }

    pub fn register_uniform_buffer(&mut self) -> Result<UniformHandle, CoreError> {
        self.tables.register_uniform_buffer()
    }

    pub fn register_texture(&mut self) -> Result<ImageHandle, CoreError> {
        self.tables.register_texture()
    }

    pub fn register_storage_image(&mut self) -> Result<StorageImageHandle, CoreError> {
        self.tables.register_storage_image()
    }

    pub fn register_tlas(&mut self) -> Result<TlasHandle, CoreError> {
        self.tables.register_tlas()
    }

    pub fn update_storage_buffer(
        &mut self,
        handle: BufferHandle,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Result<(), CoreError> {
        let write = self.tables.update_storage_buffer(handle, buffer, offset, range)?;
        self.device.write_descriptors(&[write]);
        Ok(())
    }

    pub fn update_uniform_buffer(
        &mut self,
        handle: UniformHandle,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Result<(), CoreError> {
        let write = self.tables.update_uniform_buffer(handle, buffer, offset, range)?;
        self.device.write_descriptors(&[write]);
        Ok(())
    }

    pub fn update_texture(
        &mut self,
        handle: ImageHandle,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Result<(), CoreError> {
        let write = self.tables.update_texture(handle, view, sampler, layout)?;
        self.device.write_descriptors(&[write]);
        Ok(())
    }

    pub fn update_storage_image(
        &mut self,
        handle: StorageImageHandle,
        view: vk::ImageView,
    ) -> Result<(), CoreError> {
        let write = self.tables.update_storage_image(handle, view)?;
        self.device.write_descriptors(&[write]);
        Ok(())
    }

    pub fn update_tlas(
        &mut self,
        handle: TlasHandle,
        tlas: vk::AccelerationStructureKHR,
    ) -> Result<(), CoreError> {
        let write = self.tables.update_tlas(handle, tlas)?;
        self.device.write_descriptors(&[write]);
        Ok(())
    }

    pub fn storage_buffer_descriptor(&self, handle: BufferHandle) -> Option<BufferDescriptorInfo> {
        self.tables.storage_buffer_descriptor(handle)
    }

    pub fn uniform_buffer_descriptor(&self, handle: UniformHandle) -> Option<BufferDescriptorInfo> {
        self.tables.uniform_buffer_descriptor(handle)
    }

    pub fn texture_descriptor(&self, handle: ImageHandle) -> Option<ImageDescriptorInfo> {
        self.tables.texture_descriptor(handle)
    }

    pub fn storage_image_descriptor(&self, handle: StorageImageHandle) -> Option<ImageDescriptorInfo> {
        self.tables.storage_image_descriptor(handle)
    }

    pub fn tlas_descriptor(&self, handle: TlasHandle) -> Option<vk::AccelerationStructureKHR> {
        self.tables.tlas_descriptor(handle)
    }

    pub fn bind(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        set_index: u32,
    ) {
        let sets = [self.tables.set];
        unsafe {
            self.device.0.cmd_bind_descriptor_sets(
                cmd,
                bind_point,
                pipeline_layout,
                set_index,
                &sets,
                &[],
            );
        }
    }
}

impl Drop for GlobalHeap {
    fn drop(&mut self) {
        unsafe {
            if let Some(set) = self.descriptor_set.take() {
                self.descriptor_allocator.free(&self.device, [set]);
            }
            self.descriptor_allocator.cleanup(&self.device);
        }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use super::*;

    fn tables() -> BindlessTables {
        BindlessTables::new(&RenderConfig::default(), vk::DescriptorSet::null())
    }

    #[test]
    fn registration_is_monotonic_until_capacity() {
        let mut tables = tables();
        let capacity = RenderConfig::default().max_storage_buffers;

        let first: Vec<u32> = (0..3)
            .map(|_| tables.register_storage_buffer().unwrap().index())
            .collect();
        assert_eq!(first, [0, 1, 2]);

        let mut previous = 2;
        for _ in 3..capacity {
            let handle = tables.register_storage_buffer().unwrap();
            assert!(handle.is_valid());
            assert!(handle.index() > previous);
            previous = handle.index();
        }

        let err = tables.register_storage_buffer().unwrap_err();
        assert_eq!(
            err,
            CoreError::HeapCapacityExceeded { table: "storage buffer", capacity }
        );
        // Failure is deterministic and does not consume a slot.
        assert_eq!(tables.register_storage_buffer().unwrap_err(), err);
        assert_eq!(tables.registered_count(BindlessTableType::StorageBuffer), capacity);
    }

    #[test]
    fn tables_count_independently() {
        let mut tables = tables();
        tables.register_storage_buffer().unwrap();
        tables.register_storage_buffer().unwrap();

        assert_eq!(tables.register_uniform_buffer().unwrap().index(), 0);
        assert_eq!(tables.register_texture().unwrap().index(), 0);
        assert_eq!(tables.register_storage_image().unwrap().index(), 0);
    }

    #[test]
    fn storage_buffer_update_round_trips() {
        let mut tables = tables();
        let handle = tables.register_storage_buffer().unwrap();
        let buffer = vk::Buffer::from_raw(42);

        assert_eq!(tables.storage_buffer_descriptor(handle), None);

        let write = tables.update_storage_buffer(handle, buffer, 256, 1024).unwrap();
        assert_eq!(write.binding, BindlessTableType::StorageBuffer.binding());
        assert_eq!(write.array_element, handle.index());

        let descriptor = tables.storage_buffer_descriptor(handle).unwrap();
        assert_eq!(
            (descriptor.buffer, descriptor.offset, descriptor.range),
            (buffer, 256, 1024)
        );
    }

    #[test]
    fn texture_update_round_trips() {
        let mut tables = tables();
        let handle = tables.register_texture().unwrap();
        let view = vk::ImageView::from_raw(5);
        let sampler = vk::Sampler::from_raw(6);

        tables
            .update_texture(handle, view, sampler, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .unwrap();

        let descriptor = tables.texture_descriptor(handle).unwrap();
        assert_eq!(descriptor.view, view);
        assert_eq!(descriptor.sampler, sampler);
        assert_eq!(descriptor.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn updating_unregistered_slot_fails() {
        let mut tables = tables();
        tables.register_uniform_buffer().unwrap();

        let err = tables
            .update_uniform_buffer(UniformHandle::new(1), vk::Buffer::null(), 0, 16)
            .unwrap_err();
        assert_eq!(err, CoreError::UnregisteredHandle { table: "uniform buffer", index: 1 });

        let err = tables
            .update_storage_buffer(BufferHandle::INVALID, vk::Buffer::null(), 0, 16)
            .unwrap_err();
        assert!(matches!(err, CoreError::UnregisteredHandle { .. }));
    }

    #[test]
    fn tlas_registration_requires_ray_tracing() {
        let mut tables = tables();
        assert!(matches!(
            tables.register_tlas(),
            Err(CoreError::HeapCapacityExceeded { capacity: 0, .. })
        ));

        let config = RenderConfig {
            ray_tracing: true,
            ..RenderConfig::default()
        };
        let mut tables = BindlessTables::new(&config, vk::DescriptorSet::null());
        let handle = tables.register_tlas().unwrap();
        let tlas = vk::AccelerationStructureKHR::from_raw(9);
        tables.update_tlas(handle, tlas).unwrap();
        assert_eq!(tables.tlas_descriptor(handle), Some(tlas));
    }

    #[test]
    fn default_handles_are_invalid() {
        assert!(!BufferHandle::default().is_valid());
        assert!(!TlasHandle::INVALID.is_valid());
        assert_eq!(bytemuck::bytes_of(&ImageHandle::INVALID), &[0xFF; 4]);
    }
}

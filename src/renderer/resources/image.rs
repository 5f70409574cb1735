use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use crate::renderer::contexts::graph_ctx::barrier::infer_image_aspect;
use crate::renderer::error::CoreError;

/// Bytes per texel of uncompressed, single-plane formats.
pub fn texel_size(format: vk::Format) -> Option<u64> {
    let size = match format {
        vk::Format::R8_UNORM
        | vk::Format::R8_SNORM
        | vk::Format::R8_UINT
        | vk::Format::R8_SINT
        | vk::Format::R8_SRGB
        | vk::Format::S8_UINT => 1,
        vk::Format::R8G8_UNORM
        | vk::Format::R8G8_SNORM
        | vk::Format::R8G8_UINT
        | vk::Format::R8G8_SINT
        | vk::Format::R16_UNORM
        | vk::Format::R16_SFLOAT
        | vk::Format::R16_UINT
        | vk::Format::R16_SINT
        | vk::Format::D16_UNORM => 2,
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SNORM
        | vk::Format::R8G8B8A8_UINT
        | vk::Format::R8G8B8A8_SINT
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::A2B10G10R10_UNORM_PACK32
        | vk::Format::B10G11R11_UFLOAT_PACK32
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R16G16_UNORM
        | vk::Format::R32_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::R32_SINT
        | vk::Format::D32_SFLOAT
        | vk::Format::X8_D24_UNORM_PACK32 => 4,
        vk::Format::R16G16B16A16_SFLOAT
        | vk::Format::R16G16B16A16_UNORM
        | vk::Format::R32G32_SFLOAT
        | vk::Format::R32G32_UINT => 8,
        vk::Format::R32G32B32_SFLOAT => 12,
        vk::Format::R32G32B32A32_SFLOAT
        | vk::Format::R32G32B32A32_UINT
        | vk::Format::R32G32B32A32_SINT => 16,
        _ => return None,
    };
    Some(size)
}

/// Checks that `len` bytes fill mip 0 of a `format` image of `extent` exactly.
pub fn check_upload_size(
    format: vk::Format,
    extent: vk::Extent3D,
    len: usize,
) -> Result<(), CoreError> {
    let texel_size = texel_size(format).ok_or(CoreError::UnsupportedUploadFormat { format })?;
    let expected = extent.width as u64 * extent.height as u64 * extent.depth as u64 * texel_size;
    if expected != len as u64 {
        return Err(CoreError::ImageDataSize {
            expected,
            actual: len as u64,
        });
    }
    Ok(())
}

/// Everything needed to create an image and its default view.
#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub name: String,
}

impl ImageDescriptor {
    pub fn new_2d(
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
        name: impl Into<String>,
    ) -> Self {
        Self {
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            usage,
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            name: name.into(),
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        infer_image_aspect(self.format)
    }

    pub fn full_subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect(),
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }
}

/// Exclusively owns one native image, its default view and its memory.
pub struct ImageAllocation {
    image: vk::Image,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent3D,
    aspect: vk::ImageAspectFlags,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl ImageAllocation {
    pub fn new(
        descriptor: &ImageDescriptor,
        location: MemoryLocation,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let image = {
            let info = vk::ImageCreateInfo::default()
                .format(descriptor.format)
                .usage(descriptor.usage)
                .extent(descriptor.extent)
                .image_type(if descriptor.extent.depth > 1 {
                    vk::ImageType::TYPE_3D
                } else {
                    vk::ImageType::TYPE_2D
                })
                .mip_levels(descriptor.mip_levels)
                .array_layers(descriptor.array_layers)
                .samples(descriptor.samples)
                .tiling(vk::ImageTiling::OPTIMAL)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            unsafe { device.create_image(&info, None)? }
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocation = memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: &descriptor.name,
                        requirements,
                        location,
                        linear: false,
                        allocation_scheme: AllocationScheme::DedicatedImage(image),
                    })
                    .map_err(|e| eyre!("Failed to allocate image '{}': {}", descriptor.name, e))
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(err);
            }
        };

        unsafe {
            device.bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        let view = {
            let info = vk::ImageViewCreateInfo::default()
                .view_type(if descriptor.extent.depth > 1 {
                    vk::ImageViewType::TYPE_3D
                } else if descriptor.array_layers > 1 {
                    vk::ImageViewType::TYPE_2D_ARRAY
                } else {
                    vk::ImageViewType::TYPE_2D
                })
                .image(image)
                .format(descriptor.format)
                .subresource_range(descriptor.full_subresource_range());
            unsafe { device.create_image_view(&info, None)? }
        };

        log::trace!(
            "Created image '{}' ({}x{}x{}, {:?})",
            descriptor.name,
            descriptor.extent.width,
            descriptor.extent.height,
            descriptor.extent.depth,
            descriptor.format,
        );

        Ok(Self {
            image,
            view,
            format: descriptor.format,
            extent: descriptor.extent,
            aspect: descriptor.aspect(),

            allocation: Some(allocation),
            memory_allocator,
            device,
        })
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }
}

impl Drop for ImageAllocation {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.memory_allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(err) = allocator.free(allocation) {
                        log::error!("Failed to free image memory: {}", err);
                    }
                }
                Err(_) => log::error!("Memory allocator lock poisoned; leaking image memory"),
            }
        }

        unsafe {
            self.device.destroy_image(self.image, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_descriptor_covers_depth_aspect() {
        let descriptor = ImageDescriptor::new_2d(
            vk::Format::D32_SFLOAT,
            vk::Extent2D { width: 800, height: 600 },
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            "depth",
        );

        let range = descriptor.full_subresource_range();
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!(range.level_count, 1);
        assert_eq!(descriptor.extent.depth, 1);
    }

    #[test]
    fn upload_must_fill_the_base_level_exactly() {
        let extent = vk::Extent3D { width: 4, height: 2, depth: 1 };
        assert!(check_upload_size(vk::Format::R8G8B8A8_SRGB, extent, 32).is_ok());
        assert_eq!(
            check_upload_size(vk::Format::R8G8B8A8_SRGB, extent, 31),
            Err(CoreError::ImageDataSize { expected: 32, actual: 31 })
        );
        assert_eq!(
            check_upload_size(vk::Format::R32G32B32A32_SFLOAT, extent, 32),
            Err(CoreError::ImageDataSize { expected: 128, actual: 32 })
        );
        assert_eq!(
            check_upload_size(vk::Format::BC7_SRGB_BLOCK, extent, 32),
            Err(CoreError::UnsupportedUploadFormat { format: vk::Format::BC7_SRGB_BLOCK })
        );
    }

    #[test]
    fn mip_levels_are_never_zero() {
        let descriptor = ImageDescriptor::new_2d(
            vk::Format::R8G8B8A8_SRGB,
            vk::Extent2D { width: 4, height: 4 },
            vk::ImageUsageFlags::SAMPLED,
            "albedo",
        )
            .with_mip_levels(0);

        assert_eq!(descriptor.mip_levels, 1);
        assert_eq!(descriptor.aspect(), vk::ImageAspectFlags::COLOR);
    }
}

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use crate::renderer::contexts::resource_ctx::bindless::{BufferHandle, ImageHandle, UniformHandle};
use crate::renderer::error::CoreError;

/// Byte layout contract for structs that cross the CPU/GPU boundary.
///
/// `LAYOUT_VERSION` must be bumped whenever the field layout changes so that shader-side
/// declarations can be kept in lockstep.
pub trait GpuData: Pod {
    const LAYOUT_VERSION: u32;

    fn size() -> usize {
        size_of::<Self>()
    }

    /// Uniform blocks are consumed with std140 rules, so the size must be 16-byte aligned.
    fn check_uniform_layout() -> Result<(), CoreError> {
        if Self::size() % 16 != 0 {
            return Err(CoreError::UnalignedGpuData {
                type_name: std::any::type_name::<Self>(),
                size: Self::size(),
            });
        }
        Ok(())
    }
}

/// Data unique to each frame passed into uniform buffer
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct PerFrameData {
    pub viewproj: Mat4,
    pub time: f32,
    pub delta_time: f32,
    pub frame_ring_index: u32,
    _padding: u32,
}

impl PerFrameData {
    pub fn new(viewproj: Mat4, time: f32, delta_time: f32, frame_ring_index: u32) -> Self {
        Self {
            viewproj,
            time,
            delta_time,
            frame_ring_index,
            _padding: 0,
        }
    }
}

impl GpuData for PerFrameData {
    const LAYOUT_VERSION: u32 = 1;
}

/// Data unique to each draw call passed as a push constant.
/// Every field is a bindless index the shader dereferences itself.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct PerDrawData {
    pub object_buffer: BufferHandle,
    pub material_uniform: UniformHandle,
    pub albedo_texture: ImageHandle,
    pub vertex_offset: u32,
}

impl GpuData for PerDrawData {
    const LAYOUT_VERSION: u32 = 1;
}

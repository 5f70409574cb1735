use std::collections::HashMap;
use ash::vk;

const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::SHADER_WRITE.as_raw()
        | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
        | vk::AccessFlags2::HOST_WRITE.as_raw()
        | vk::AccessFlags2::MEMORY_WRITE.as_raw()
        | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR.as_raw(),
);

/// Last known use of an image: the stage and access that touched it, and its layout.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ResourceState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl ResourceState {
    pub const fn new(
        stage: vk::PipelineStageFlags2,
        access: vk::AccessFlags2,
        layout: vk::ImageLayout,
    ) -> Self {
        Self { stage, access, layout }
    }

    pub const UNDEFINED: Self = Self::new(
        vk::PipelineStageFlags2::TOP_OF_PIPE,
        vk::AccessFlags2::NONE,
        vk::ImageLayout::UNDEFINED,
    );

    pub const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    pub const TRANSFER_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    pub const COLOR_ATTACHMENT_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    pub const DEPTH_ATTACHMENT_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    );

    pub const SHADER_READ_FRAGMENT: Self = Self::new(
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    pub const SHADER_READ_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    pub const STORAGE_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_STORAGE_WRITE,
        vk::ImageLayout::GENERAL,
    );

    pub const STORAGE_WRITE_RAY_TRACING: Self = Self::new(
        vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags2::SHADER_STORAGE_WRITE,
        vk::ImageLayout::GENERAL,
    );

    pub const PRESENT: Self = Self::new(
        vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        vk::AccessFlags2::NONE,
        vk::ImageLayout::PRESENT_SRC_KHR,
    );

    pub fn is_write(&self) -> bool {
        self.access.intersects(WRITE_ACCESS)
    }

    /// Only writes have to be made available; reads never need a source access mask.
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access & WRITE_ACCESS
    }
}

/// Read-to-read with an unchanged layout is the only transition that needs no barrier.
pub fn needs_barrier(src: &ResourceState, dst: &ResourceState) -> bool {
    src.layout != dst.layout || src.is_write() || dst.is_write()
}

pub fn infer_image_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

pub fn is_depth_format(format: vk::Format) -> bool {
    infer_image_aspect(format).contains(vk::ImageAspectFlags::DEPTH)
}

pub fn image_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    src: &ResourceState,
    dst: &ResourceState,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .image(image)
        .src_stage_mask(src.stage)
        .src_access_mask(src.src_access())
        .dst_stage_mask(dst.stage)
        .dst_access_mask(dst.access)
        .old_layout(src.layout)
        .new_layout(dst.layout)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect)
                .base_mip_level(0)
                .level_count(vk::REMAINING_MIP_LEVELS)
                .base_array_layer(0)
                .layer_count(vk::REMAINING_ARRAY_LAYERS),
        )
}

pub fn cmd_image_barriers(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    barriers: &[vk::ImageMemoryBarrier2],
) {
    if barriers.is_empty() {
        return;
    }

    let dependency_info = vk::DependencyInfo::default()
        .image_memory_barriers(barriers);
    unsafe {
        device.cmd_pipeline_barrier2(cmd, &dependency_info);
    }
}

struct TrackedImage {
    aspect: vk::ImageAspectFlags,
    state: ResourceState,
}

/// Remembers the last state of each image so transitions only state where the image goes.
///
/// Callers still decide when a transition is recorded.
#[derive(Default)]
pub struct ImageStateTracker {
    images: HashMap<vk::Image, TrackedImage>,
}

impl ImageStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        state: ResourceState,
    ) {
        self.images.insert(image, TrackedImage { aspect, state });
    }

    pub fn forget(&mut self, image: vk::Image) {
        self.images.remove(&image);
    }

    pub fn state(&self, image: vk::Image) -> Option<ResourceState> {
        self.images.get(&image).map(|tracked| tracked.state)
    }

    /// Records `new_state` as current and returns the barrier leading there, if any.
    ///
    /// Unknown images are treated as color images in `UNDEFINED` layout.
    pub fn transition(
        &mut self,
        image: vk::Image,
        new_state: ResourceState,
    ) -> Option<vk::ImageMemoryBarrier2<'static>> {
        let tracked = self.images
            .entry(image)
            .or_insert(TrackedImage {
                aspect: vk::ImageAspectFlags::COLOR,
                state: ResourceState::UNDEFINED,
            });

        let old_state = std::mem::replace(&mut tracked.state, new_state);
        needs_barrier(&old_state, &new_state)
            .then(|| image_barrier(image, tracked.aspect, &old_state, &new_state))
    }

    pub fn cmd_transition(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        new_state: ResourceState,
    ) {
        if let Some(barrier) = self.transition(image, new_state) {
            cmd_image_barriers(device, cmd, &[barrier]);
        }
    }
}

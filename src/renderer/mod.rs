pub mod config;
pub mod contexts;
pub mod error;
pub mod resources;
pub mod shader_data;

pub use config::{RenderConfig, MAX_FRAMES_IN_FLIGHT};
pub use contexts::device_ctx::RenderContext;
pub use contexts::frame_ctx::deletion::DeletionTasks;
pub use contexts::frame_ctx::frame::{FrameContext, FrameRing};
pub use contexts::graph_ctx::barrier::{ImageStateTracker, ResourceState};
pub use contexts::graph_ctx::draw::{DescriptorSlot, DrawContext};
pub use contexts::graph_ctx::render_pass::{
    ActiveRenderPass, Attachment, RenderPass, RenderTargets, SubpassBuilder, SubpassHandler,
};
pub use contexts::pipeline_ctx::compiler::{DefaultCompiler, NagaCompiler, ShaderCompiler, SpirvLoader};
pub use contexts::pipeline_ctx::shader_library::{ShaderId, ShaderLibrary};
pub use contexts::resource_ctx::bindless::{
    BufferHandle, GlobalHeap, ImageHandle, StorageImageHandle, TlasHandle, UniformHandle,
};
pub use contexts::resource_ctx::ResourceContext;
pub use error::CoreError;

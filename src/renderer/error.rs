//! Programmer-error class failures.
//!
//! Every variant here is a defect in the calling code rather than an expected runtime
//! condition: the core reports it immediately and never tries to recover. Native API
//! failures during setup are reported through `color_eyre` instead.

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Bindless {table} table is full (capacity {capacity})")]
    HeapCapacityExceeded {
        table: &'static str,
        capacity: u32,
    },

    #[error("Bindless {table} slot {index} was never registered")]
    UnregisteredHandle {
        table: &'static str,
        index: u32,
    },

    #[error("Descriptor binding {binding} expects {expected:?} but received {actual:?}")]
    BindingTypeMismatch {
        binding: u32,
        expected: vk::DescriptorType,
        actual: vk::DescriptorType,
    },

    #[error("Descriptor set layout declares only {declared} bindings")]
    TooManyBindings { declared: usize },

    #[error("Descriptor assignment bound {bound} of {declared} declared bindings")]
    MissingBindings { bound: usize, declared: usize },

    #[error("Subpass {requested} is out of range for a render pass with {count} subpasses")]
    SubpassOutOfRange { requested: usize, count: usize },

    #[error("Render pass has already ended")]
    RenderPassEnded,

    #[error("Descriptor slot {slot} is empty while a later slot is bound")]
    DescriptorSlotGap { slot: usize },

    #[error("Expected {expected} subpass handlers, got {actual}")]
    SubpassHandlerCount { expected: usize, actual: usize },

    #[error("{count} shader stage(s) hold compile errors")]
    ShaderCompileErrors { count: usize },

    #[error("Pipeline was already superseded and cannot be recreated again")]
    OutdatedPipeline,

    #[error("GPU data type {type_name} is {size} bytes, which is not a multiple of 16")]
    UnalignedGpuData {
        type_name: &'static str,
        size: usize,
    },

    #[error("Frame ring index {index} is out of range (max {max})")]
    FrameRingIndexOutOfRange { index: usize, max: usize },

    #[error("Write of {len} bytes at offset {offset} overflows a {size} byte allocation")]
    AllocationOverflow { offset: u64, len: u64, size: u64 },

    #[error("Allocation is not host visible")]
    NotHostVisible,

    #[error("Descriptor count of binding {binding} overflows when scaled to {max_sets} sets")]
    DescriptorCountOverflow { binding: u32, max_sets: u32 },

    #[error("Image upload expects {expected} bytes but received {actual}")]
    ImageDataSize { expected: u64, actual: u64 },

    #[error("Cannot compute the upload size of format {format:?}")]
    UnsupportedUploadFormat { format: vk::Format },

    #[error("Shader {index} does not belong to this library")]
    UnknownShader { index: usize },
}

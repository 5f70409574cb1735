use std::ffi::CString;
use std::path::PathBuf;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;

/// Where a shader's source lives.
#[derive(Debug, Clone)]
pub enum ShaderOrigin {
    File(PathBuf),
    /// Source kept in memory, replaced through `ShaderLibrary::set_source`.
    Memory(Vec<u8>),
}

impl ShaderOrigin {
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            Self::File(path) => std::fs::read(path)
                .map_err(|e| eyre!("Failed to read shader source {:?}: {}", path, e)),
            Self::Memory(source) => Ok(source.clone()),
        }
    }
}

/// Hot-reload state of one shader stage.
///
/// `Clean -> Stale -> CompiledOk | CompileError`, back to `Clean` once dependent
/// pipelines have been rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderState {
    Clean,
    Stale,
    CompiledOk,
    CompileError(String),
}

pub fn content_hash(source: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(source)
}

/// One shader stage: its source, the last good SPIR-V and its reload state.
pub struct ShaderBuilder {
    name: String,
    origin: ShaderOrigin,
    stage: vk::ShaderStageFlags,
    entry_point: CString,
    hash: u64,
    spirv: Vec<u32>,
    state: ShaderState,
}

impl ShaderBuilder {
    pub fn new(
        name: impl Into<String>,
        origin: ShaderOrigin,
        stage: vk::ShaderStageFlags,
        hash: u64,
        spirv: Vec<u32>,
    ) -> Self {
        Self {
            name: name.into(),
            origin,
            stage,
            entry_point: c"main".to_owned(),
            hash,
            spirv,
            state: ShaderState::Clean,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &ShaderOrigin {
        &self.origin
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    pub fn entry_point(&self) -> &CString {
        &self.entry_point
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Last successfully compiled bytecode. A failed recompile never replaces it.
    pub fn spirv(&self) -> &[u32] {
        &self.spirv
    }

    pub fn state(&self) -> &ShaderState {
        &self.state
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            ShaderState::CompileError(error) => Some(error),
            _ => None,
        }
    }

    pub(crate) fn set_origin(&mut self, origin: ShaderOrigin) {
        self.origin = origin;
    }

    pub(crate) fn mark_stale(&mut self, hash: u64) {
        self.hash = hash;
        self.state = ShaderState::Stale;
    }

    pub(crate) fn finish_compile(&mut self, result: std::result::Result<Vec<u32>, String>) {
        self.state = match result {
            Ok(spirv) => {
                self.spirv = spirv;
                ShaderState::CompiledOk
            }
            Err(error) => ShaderState::CompileError(error),
        };
    }

    pub(crate) fn mark_clean(&mut self) {
        if self.state == ShaderState::CompiledOk {
            self.state = ShaderState::Clean;
        }
    }

    pub fn create_module(&self, device: Arc<ash::Device>) -> Result<ShaderModule> {
        let shader_module_info = vk::ShaderModuleCreateInfo::default()
            .code(&self.spirv);

        let module = unsafe {
            device.create_shader_module(&shader_module_info, None)?
        };

        Ok(ShaderModule {
            module,
            stage: self.stage,
            entry_point: self.entry_point.clone(),
            device,
        })
    }
}

/// A native shader module that lives only as long as pipeline creation needs it.
pub struct ShaderModule {
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    entry_point: CString,
    device: Arc<ash::Device>,
}

impl ShaderModule {
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage)
            .module(self.module)
            .name(&self.entry_point)
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shader() -> ShaderBuilder {
        ShaderBuilder::new(
            "triangle.vert",
            ShaderOrigin::Memory(b"v1".to_vec()),
            vk::ShaderStageFlags::VERTEX,
            content_hash(b"v1"),
            vec![0x0723_0203, 1],
        )
    }

    #[test]
    fn failed_compile_keeps_previous_bytecode() {
        let mut shader = shader();
        shader.mark_stale(content_hash(b"v2"));
        assert_eq!(shader.state(), &ShaderState::Stale);

        shader.finish_compile(Err("syntax error".into()));
        assert_eq!(shader.error(), Some("syntax error"));
        assert_eq!(shader.spirv(), &[0x0723_0203, 1]);
    }

    #[test]
    fn only_compiled_shaders_become_clean() {
        let mut shader = shader();
        shader.mark_stale(1);
        shader.finish_compile(Err("bad".into()));
        shader.mark_clean();
        assert!(matches!(shader.state(), ShaderState::CompileError(_)));

        shader.mark_stale(2);
        shader.finish_compile(Ok(vec![0x0723_0203, 2]));
        assert_eq!(shader.state(), &ShaderState::CompiledOk);
        shader.mark_clean();
        assert_eq!(shader.state(), &ShaderState::Clean);
        assert_eq!(shader.spirv(), &[0x0723_0203, 2]);
    }

    #[test]
    fn hash_tracks_content() {
        assert_eq!(content_hash(b"void main() {}"), content_hash(b"void main() {}"));
        assert_ne!(content_hash(b"a"), content_hash(b"b"));
    }
}

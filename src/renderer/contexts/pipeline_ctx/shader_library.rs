use std::sync::atomic::{AtomicU32, Ordering};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::contexts::pipeline_ctx::compiler::ShaderCompiler;
use crate::renderer::error::CoreError;
use crate::renderer::resources::shader::{content_hash, ShaderBuilder, ShaderOrigin, ShaderState};

static NEXT_LIBRARY_ID: AtomicU32 = AtomicU32::new(0);

/// Index of a shader inside the [`ShaderLibrary`] that created it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ShaderId {
    library: u32,
    index: usize,
}

impl ShaderId {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Owns every shader stage and drives their hot-reload state machine.
pub struct ShaderLibrary {
    id: u32,
    shaders: Vec<ShaderBuilder>,
    compiler: Box<dyn ShaderCompiler>,
}

impl ShaderLibrary {
    pub fn new(compiler: impl ShaderCompiler + 'static) -> Self {
        Self {
            id: NEXT_LIBRARY_ID.fetch_add(1, Ordering::Relaxed),
            shaders: Vec::new(),
            compiler: Box::new(compiler),
        }
    }

    /// Loads and compiles a shader. Unlike later recompiles, a failure here is fatal.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        origin: ShaderOrigin,
        stage: vk::ShaderStageFlags,
    ) -> Result<ShaderId> {
        let name = name.into();
        let source = origin.read()?;
        let spirv = self.compiler
            .compile(&name, &source, stage)
            .map_err(|error| eyre!("Failed to compile shader '{}':\n{}", name, error))?;

        log::debug!("Loaded shader '{}' ({} words)", name, spirv.len());

        let id = ShaderId {
            library: self.id,
            index: self.shaders.len(),
        };
        self.shaders.push(ShaderBuilder::new(name, origin, stage, content_hash(&source), spirv));
        Ok(id)
    }

    /// Fails for ids handed out by a different library.
    pub fn get(&self, id: ShaderId) -> Result<&ShaderBuilder, CoreError> {
        self.shaders
            .get(id.index)
            .filter(|_| id.library == self.id)
            .ok_or(CoreError::UnknownShader { index: id.index })
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }

    /// Replaces the source of a shader. Picked up by the next recompile.
    pub fn set_source(&mut self, id: ShaderId, source: impl Into<Vec<u8>>) -> Result<(), CoreError> {
        let shader = self.shaders
            .get_mut(id.index)
            .filter(|_| id.library == self.id)
            .ok_or(CoreError::UnknownShader { index: id.index })?;
        shader.set_origin(ShaderOrigin::Memory(source.into()));
        Ok(())
    }

    /// Re-reads every source and recompiles the ones whose content hash changed.
    ///
    /// Returns whether any shader was stale.
    pub fn recompile_stale_shaders(&mut self) -> bool {
        let mut any_stale = false;

        for shader in &mut self.shaders {
            let source = match shader.origin().read() {
                Ok(source) => source,
                Err(err) => {
                    log::warn!("Skipping reload of '{}': {}", shader.name(), err);
                    continue;
                }
            };

            let hash = content_hash(&source);
            if hash == shader.hash() {
                continue;
            }

            any_stale = true;
            shader.mark_stale(hash);

            let result = self.compiler.compile(shader.name(), &source, shader.stage());
            match &result {
                Ok(_) => log::debug!("Recompiled shader '{}'", shader.name()),
                Err(error) => log::warn!("Failed to recompile shader '{}':\n{}", shader.name(), error),
            }
            shader.finish_compile(result);
        }

        any_stale
    }

    pub fn has_shader_recompile_errors(&self) -> bool {
        self.shaders.iter().any(|shader| shader.error().is_some())
    }

    pub fn shader_errors(&self) -> Vec<(&str, &str)> {
        self.shaders
            .iter()
            .filter_map(|shader| shader.error().map(|error| (shader.name(), error)))
            .collect()
    }

    /// Whether any of `ids` holds fresh bytecode a pipeline has not picked up yet.
    pub fn needs_rebuild(&self, ids: &[ShaderId]) -> bool {
        ids.iter()
            .filter_map(|id| self.get(*id).ok())
            .any(|shader| shader.state() == &ShaderState::CompiledOk)
    }

    /// Fails if any of `ids` is unknown or in the compile error state.
    pub fn check_recreatable(&self, ids: &[ShaderId]) -> Result<(), CoreError> {
        let mut count = 0;
        for id in ids {
            if self.get(*id)?.error().is_some() {
                count += 1;
            }
        }
        if count > 0 {
            return Err(CoreError::ShaderCompileErrors { count });
        }
        Ok(())
    }

    pub fn mark_pipelines_rebuilt(&mut self) {
        for shader in &mut self.shaders {
            shader.mark_clean();
        }
    }
}

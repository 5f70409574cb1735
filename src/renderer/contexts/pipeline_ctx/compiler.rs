use ash::vk;
use naga::back::spv;
use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::ShaderStage;

/// Turns shader source into SPIR-V. Failures come back as human-readable text.
pub trait ShaderCompiler {
    fn compile(
        &self,
        name: &str,
        source: &[u8],
        stage: vk::ShaderStageFlags,
    ) -> Result<Vec<u32>, String>;
}

/// Compiles GLSL vertex, fragment and compute stages with naga.
#[derive(Default)]
pub struct NagaCompiler;

impl NagaCompiler {
    fn naga_stage(stage: vk::ShaderStageFlags) -> Option<ShaderStage> {
        match stage {
            vk::ShaderStageFlags::VERTEX => Some(ShaderStage::Vertex),
            vk::ShaderStageFlags::FRAGMENT => Some(ShaderStage::Fragment),
            vk::ShaderStageFlags::COMPUTE => Some(ShaderStage::Compute),
            _ => None,
        }
    }
}

impl ShaderCompiler for NagaCompiler {
    fn compile(
        &self,
        name: &str,
        source: &[u8],
        stage: vk::ShaderStageFlags,
    ) -> Result<Vec<u32>, String> {
        let naga_stage = Self::naga_stage(stage)
            .ok_or_else(|| format!("{}: stage {:?} cannot be compiled from GLSL", name, stage))?;
        let source = std::str::from_utf8(source)
            .map_err(|e| format!("{}: source is not valid UTF-8: {}", name, e))?;

        let mut frontend = Frontend::default();
        let module = frontend
            .parse(&Options::from(naga_stage), source)
            .map_err(|e| e.emit_to_string(source))?;

        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        let validation_info = validator
            .validate(&module)
            .map_err(|e| e.emit_to_string(source))?;

        spv::write_vec(&module, &validation_info, &spv::Options::default(), None)
            .map_err(|e| format!("{}: SPIR-V generation failed: {}", name, e))
    }
}

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Accepts precompiled SPIR-V, e.g. ray-tracing stages naga cannot produce.
#[derive(Default)]
pub struct SpirvLoader;

impl ShaderCompiler for SpirvLoader {
    fn compile(
        &self,
        name: &str,
        source: &[u8],
        _stage: vk::ShaderStageFlags,
    ) -> Result<Vec<u32>, String> {
        if source.len() % 4 != 0 || source.len() < 20 {
            return Err(format!("{}: {} bytes is not a valid SPIR-V module", name, source.len()));
        }

        let words: Vec<u32> = source
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        if words[0] != SPIRV_MAGIC {
            return Err(format!("{}: missing SPIR-V magic number", name));
        }

        Ok(words)
    }
}

/// Sends GLSL stages to naga and everything else to the SPIR-V loader.
#[derive(Default)]
pub struct DefaultCompiler {
    naga: NagaCompiler,
    spirv: SpirvLoader,
}

impl ShaderCompiler for DefaultCompiler {
    fn compile(
        &self,
        name: &str,
        source: &[u8],
        stage: vk::ShaderStageFlags,
    ) -> Result<Vec<u32>, String> {
        if source.len() >= 4 && source[..4] == SPIRV_MAGIC.to_le_bytes() {
            self.spirv.compile(name, source, stage)
        } else {
            self.naga.compile(name, source, stage)
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::cell::Cell;
    use std::rc::Rc;
    use super::*;

    /// Accepts any source except ones containing "error" and counts invocations.
    #[derive(Default)]
    pub struct ScriptedCompiler {
        pub calls: Rc<Cell<u32>>,
    }

    impl ShaderCompiler for ScriptedCompiler {
        fn compile(
            &self,
            name: &str,
            source: &[u8],
            _stage: vk::ShaderStageFlags,
        ) -> Result<Vec<u32>, String> {
            self.calls.set(self.calls.get() + 1);
            if source.windows(5).any(|window| window == b"error") {
                return Err(format!("{}: scripted failure", name));
            }
            Ok(vec![SPIRV_MAGIC, source.len() as u32])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE_VERT: &str = r#"
        #version 450
        layout(location = 0) in vec3 in_position;
        void main() {
            gl_Position = vec4(in_position, 1.0);
        }
    "#;

    #[test]
    fn naga_compiles_glsl_vertex_stage() {
        let spirv = NagaCompiler
            .compile("triangle.vert", TRIANGLE_VERT.as_bytes(), vk::ShaderStageFlags::VERTEX)
            .unwrap();
        assert_eq!(spirv[0], SPIRV_MAGIC);
    }

    #[test]
    fn naga_reports_syntax_errors_as_text() {
        let error = NagaCompiler
            .compile("broken.frag", b"#version 450\nvoid main( {", vk::ShaderStageFlags::FRAGMENT)
            .unwrap_err();
        assert!(!error.is_empty());
    }

    #[test]
    fn naga_rejects_ray_tracing_stages() {
        let error = NagaCompiler
            .compile("shadow.rgen", b"", vk::ShaderStageFlags::RAYGEN_KHR)
            .unwrap_err();
        assert!(error.contains("shadow.rgen"));
    }

    #[test]
    fn spirv_loader_checks_magic() {
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0500, 0, 1, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let words = SpirvLoader
            .compile("hit.rchit", &bytes, vk::ShaderStageFlags::CLOSEST_HIT_KHR)
            .unwrap();
        assert_eq!(words.len(), 5);

        bytes[0] = 0;
        assert!(SpirvLoader.compile("hit.rchit", &bytes, vk::ShaderStageFlags::CLOSEST_HIT_KHR).is_err());
    }

    #[test]
    fn default_compiler_dispatches_on_content() {
        let spirv = DefaultCompiler::default()
            .compile("triangle.vert", TRIANGLE_VERT.as_bytes(), vk::ShaderStageFlags::VERTEX)
            .unwrap();

        let bytes: Vec<u8> = spirv.iter().flat_map(|word| word.to_le_bytes()).collect();
        let reloaded = DefaultCompiler::default()
            .compile("triangle.vert", &bytes, vk::ShaderStageFlags::VERTEX)
            .unwrap();
        assert_eq!(reloaded, spirv);
    }
}

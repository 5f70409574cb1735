pub mod compiler;
pub mod shader_library;

// Responsibilities:
// - Turn shader sources into SPIR-V (ShaderCompiler)
// - Track every shader stage through hot reload (ShaderLibrary)
// - Tell pipelines when fresh bytecode is ready or recreation must wait

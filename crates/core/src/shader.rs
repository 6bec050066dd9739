//! Compiled shader stages.
//!
//! A [`Shader`] is verified at construction: [`Shader::new`] either returns a
//! compiled stage or deletes the handle and reports the driver's info log
//! with the source lines numbered. Shaders are handed out as `Rc<Shader>` so
//! several programs can link the same stage; the GL object is deleted when
//! the last program and caller let go of it.

use std::rc::Rc;

use thiserror::Error;

use crate::context::{RenderContext, SharedGl};
use crate::error::{check_error, GpuError};

/// Errors that can occur during shader compilation or program linking.
#[derive(Debug, Clone, Error)]
pub enum ShaderError {
    /// A shader stage failed to compile.
    #[error("shader compile error ({stage}):\n{log}")]
    Compile {
        /// The stage that failed.
        stage: ShaderStage,
        /// The driver's info log, prefixed with the numbered source.
        log: String,
    },
    /// A program failed to link.
    #[error("shader link error:\n{0}")]
    Link(String),
}

/// Pipeline stage a shader is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    TessControl,
    TessEvaluation,
    Compute,
}

impl ShaderStage {
    /// The GL shader type enum.
    pub fn gl_enum(self) -> u32 {
        match self {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
            ShaderStage::Geometry => glow::GEOMETRY_SHADER,
            ShaderStage::TessControl => glow::TESS_CONTROL_SHADER,
            ShaderStage::TessEvaluation => glow::TESS_EVALUATION_SHADER,
            ShaderStage::Compute => glow::COMPUTE_SHADER,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Geometry => "geometry",
            ShaderStage::TessControl => "tessellation control",
            ShaderStage::TessEvaluation => "tessellation evaluation",
            ShaderStage::Compute => "compute",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Formats a shader compilation error for human-readable debugging.
///
/// Prepends right-aligned line numbers to each line of `source`, then
/// appends the driver's error `log`, so that line references in the log can
/// be matched against the GLSL. Either input may be empty.
pub fn format_shader_error(source: &str, log: &str) -> String {
    let source_lines: Vec<&str> = source.lines().collect();

    let width = source_lines.len().max(1).to_string().len();

    let numbered: String = source_lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:>width$}: {line}", i + 1, width = width))
        .collect::<Vec<_>>()
        .join("\n");

    match (numbered.is_empty(), log.is_empty()) {
        (true, true) => String::new(),
        (true, false) => log.to_string(),
        (false, true) => numbered,
        (false, false) => format!("{numbered}\n\n{log}"),
    }
}

/// One compiled shader stage.
pub struct Shader {
    gl: Rc<SharedGl>,
    handle: glow::Shader,
    stage: ShaderStage,
}

impl Shader {
    /// Compiles `source` as a `stage` shader.
    ///
    /// # Errors
    ///
    /// [`ShaderError::Compile`] (wrapped in [`GpuError::Shader`]) with the
    /// numbered source and the driver's info log,
    /// [`GpuError::Allocation`] if no handle is available, or a driver error
    /// from uploading or compiling the source. The handle is deleted before
    /// any error is returned.
    #[allow(unsafe_code)]
    pub fn new(ctx: &RenderContext, stage: ShaderStage, source: &str) -> Result<Rc<Self>, GpuError> {
        use glow::HasContext;

        let gl = Rc::clone(ctx.gl());

        // SAFETY: glow wraps raw GL calls as unsafe. The stage enum is valid.
        let handle = unsafe { gl.create_shader(stage.gl_enum()) }
            .map_err(GpuError::allocation("shader"))?;

        // Owned from here on so every failure below deletes the handle.
        let shader = Self { gl, handle, stage };
        check_error(&shader.gl, "glCreateShader")?;

        unsafe { shader.gl.shader_source(handle, source) };
        check_error(&shader.gl, "glShaderSource")?;

        unsafe { shader.gl.compile_shader(handle) };
        check_error(&shader.gl, "glCompileShader")?;

        let compiled = unsafe { shader.gl.get_shader_compile_status(handle) };
        if !compiled {
            let info_log = unsafe { shader.gl.get_shader_info_log(handle) };
            return Err(ShaderError::Compile {
                stage,
                log: format_shader_error(source, &info_log),
            }
            .into());
        }

        log::debug!("compiled {stage} shader ({} lines)", source.lines().count());
        Ok(Rc::new(shader))
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn handle(&self) -> glow::Shader {
        self.handle
    }
}

impl Drop for Shader {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        use glow::HasContext;

        // SAFETY: the handle is owned by this wrapper; programs that linked
        // it have detached it in their own Drop.
        unsafe { self.gl.delete_shader(self.handle) };
        log::trace!("released {} shader", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- format_shader_error tests ---

    #[test]
    fn format_shader_error_prepends_line_numbers() {
        let source = "#version 330 core\nvoid main() {\n}\n";
        let log = "ERROR: 0:2: syntax error";
        let formatted = format_shader_error(source, log);

        assert!(
            formatted.contains("1: #version 330 core"),
            "expected line 1 with content, got:\n{formatted}"
        );
        assert!(
            formatted.contains("2: void main() {"),
            "expected line 2 with content, got:\n{formatted}"
        );
        assert!(
            formatted.contains(log),
            "expected original log in output, got:\n{formatted}"
        );
    }

    #[test]
    fn format_shader_error_handles_empty_inputs() {
        assert_eq!(format_shader_error("", "some error"), "some error");
        assert_eq!(format_shader_error("void main() {}", ""), "1: void main() {}");
        assert!(format_shader_error("", "").is_empty());
    }

    #[test]
    fn format_shader_error_right_aligns_line_numbers() {
        let source = (1..=12)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let formatted = format_shader_error(&source, "err");
        let lines: Vec<&str> = formatted.lines().collect();

        assert!(
            lines[0].starts_with(" 1: "),
            "expected right-aligned single digit, got: '{}'",
            lines[0]
        );
        assert!(
            lines[9].starts_with("10: "),
            "expected no padding for double digit, got: '{}'",
            lines[9]
        );
    }

    #[test]
    fn stages_map_to_gl_enums() {
        assert_eq!(ShaderStage::Vertex.gl_enum(), glow::VERTEX_SHADER);
        assert_eq!(ShaderStage::Fragment.gl_enum(), glow::FRAGMENT_SHADER);
        assert_eq!(ShaderStage::Geometry.gl_enum(), glow::GEOMETRY_SHADER);
        assert_eq!(ShaderStage::TessControl.gl_enum(), glow::TESS_CONTROL_SHADER);
        assert_eq!(
            ShaderStage::TessEvaluation.gl_enum(),
            glow::TESS_EVALUATION_SHADER
        );
        assert_eq!(ShaderStage::Compute.gl_enum(), glow::COMPUTE_SHADER);
    }

    #[test]
    fn compile_error_display_includes_stage_and_log() {
        let err = ShaderError::Compile {
            stage: ShaderStage::Fragment,
            log: "undeclared identifier".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("fragment"), "missing stage in: {msg}");
        assert!(msg.contains("undeclared identifier"), "missing log in: {msg}");
    }

    #[test]
    fn link_error_display_includes_log() {
        let err = ShaderError::Link("varying mismatch".into());
        assert!(err.to_string().contains("varying mismatch"));
    }

    #[test]
    #[cfg(feature = "headless")]
    #[ignore = "requires GL context"]
    fn new_rejects_invalid_source() {
        let ctx = RenderContext::initialize().unwrap();
        let err = Shader::new(&ctx, ShaderStage::Vertex, "#version 330 core\nnot glsl")
            .err()
            .expect("compile should fail");
        assert!(matches!(
            err,
            GpuError::Shader(ShaderError::Compile {
                stage: ShaderStage::Vertex,
                ..
            })
        ));
        assert_eq!(err.kind(), crate::error::ErrorKind::CompileLink);
    }

    #[test]
    #[cfg(feature = "headless")]
    #[ignore = "requires GL context"]
    fn compile_leaves_no_pending_driver_error() {
        let ctx = RenderContext::initialize().unwrap();
        let vertex = "#version 330 core\nvoid main() { gl_Position = vec4(0.0); }\n";
        Shader::new(&ctx, ShaderStage::Vertex, vertex).unwrap();
        let _ = Shader::new(&ctx, ShaderStage::Fragment, "not glsl");
        assert!(check_error(ctx.gl(), "after shader compilation").is_ok());
    }
}

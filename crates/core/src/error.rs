//! Error types and the driver error check shared by every GPU wrapper.
//!
//! Every state-mutating call into GL is followed by [`check_error`], which
//! turns a nonzero `glGetError` code into [`GpuError::Driver`] tagged with
//! the operation name. The check is synchronous: errors are never batched.

use thiserror::Error;

use crate::context::ContextError;
use crate::shader::ShaderError;

/// Errors produced by GPU resource operations.
#[derive(Debug, Error)]
pub enum GpuError {
    /// The driver error flag was set after `operation`.
    #[error("OpenGL error 0x{code:04X} at {operation}")]
    Driver {
        /// Name of the GL entry point that raised the error.
        operation: &'static str,
        /// Raw `glGetError` code.
        code: u32,
    },

    /// Context or driver bring-up failed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Shader compilation or program linking failed.
    #[error(transparent)]
    Shader(#[from] ShaderError),

    /// The driver refused to allocate a new object handle.
    #[error("failed to create {object}: {message}")]
    Allocation {
        object: &'static str,
        message: String,
    },

    /// No active uniform with this name exists in the linked program.
    #[error("uniform \"{0}\" is unknown")]
    UnknownUniform(String),

    /// No active attribute with this name exists in the linked program.
    #[error("attribute \"{0}\" is unknown")]
    UnknownAttribute(String),

    /// The uniform shape has no matching `glUniform*` entry point.
    #[error("failed to set uniform with dimension {rows}x{cols} and array length {array_length}")]
    UniformShape {
        rows: usize,
        cols: usize,
        array_length: usize,
    },

    /// The uniform data does not hold `rows * cols * array_length` floats.
    #[error("uniform data holds {actual} floats, expected {expected}")]
    UniformDataLength { expected: usize, actual: usize },

    /// Image readback needs a four-channel internal format.
    #[error("internal format 0x{format:04X} must be RGBA or BGRA to extract an image")]
    TextureFormat { format: u32 },

    /// The operation does not apply to this texture's shape.
    #[error("operation {operation} requires a {expected} texture")]
    TextureShape {
        operation: &'static str,
        expected: &'static str,
    },

    /// A layer index was not below the layer count.
    #[error("layer ({layer}) exceeds layer count ({layers})")]
    LayerOutOfBounds { layer: u32, layers: u32 },

    /// An uploaded image does not match the texture's dimensions.
    #[error(
        "image needs to have the same size as an array layer (image={image_width}x{image_height}, array={width}x{height})"
    )]
    ImageSize {
        image_width: u32,
        image_height: u32,
        width: u32,
        height: u32,
    },

    /// Uploaded byte length disagrees with the declared buffer shape.
    #[error(
        "buffer data is {actual} bytes, expected {expected} ({elements} elements x {dimension} components)"
    )]
    BufferSize {
        elements: usize,
        dimension: u8,
        expected: usize,
        actual: usize,
    },

    /// A draw would submit more vertices or indices than GL can address.
    #[error("draw of {count} vertices does not fit in a GLsizei")]
    DrawCount { count: usize },

    /// Per-element dimension outside `1..=4`.
    #[error("buffer dimension {0} is outside 1..=4")]
    BufferDimension(u8),

    /// A color attachment slot would leave a gap.
    #[error("attachment slot {slot} is not sequential ({attached} attachments present)")]
    AttachmentSequence { slot: usize, attached: usize },

    /// A framebuffer was bound without any color attachment.
    #[error("no color attachments, nothing to draw to")]
    NoColorAttachments,

    /// `glCheckFramebufferStatus` did not report completeness.
    #[error("framebuffer is not complete: status 0x{status:04X}")]
    FramebufferIncomplete { status: u32 },
}

/// Coarse failure category of a [`GpuError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Nonzero driver error code after a call.
    Driver,
    /// Context, surface or handle creation failed.
    Construction,
    /// Shader compile or program link failed.
    CompileLink,
    /// Unknown attribute or uniform name.
    Lookup,
    /// Mismatched format, dimensions or uniform shape.
    ShapeFormat,
    /// Attachment ordering or framebuffer completeness.
    Sequencing,
}

impl GpuError {
    /// Returns the failure category, for callers that branch on the kind of
    /// error rather than the exact variant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GpuError::Driver { .. } => ErrorKind::Driver,
            GpuError::Context(_) | GpuError::Allocation { .. } => ErrorKind::Construction,
            GpuError::Shader(_) => ErrorKind::CompileLink,
            GpuError::UnknownUniform(_) | GpuError::UnknownAttribute(_) => ErrorKind::Lookup,
            GpuError::UniformShape { .. }
            | GpuError::UniformDataLength { .. }
            | GpuError::TextureFormat { .. }
            | GpuError::TextureShape { .. }
            | GpuError::LayerOutOfBounds { .. }
            | GpuError::ImageSize { .. }
            | GpuError::BufferSize { .. }
            | GpuError::BufferDimension(_)
            | GpuError::DrawCount { .. } => ErrorKind::ShapeFormat,
            GpuError::AttachmentSequence { .. }
            | GpuError::NoColorAttachments
            | GpuError::FramebufferIncomplete { .. } => ErrorKind::Sequencing,
        }
    }

    pub(crate) fn allocation(object: &'static str) -> impl FnOnce(String) -> GpuError {
        move |message| GpuError::Allocation { object, message }
    }
}

/// Maps a raw `glGetError` code to a result.
pub fn driver_result(operation: &'static str, code: u32) -> Result<(), GpuError> {
    if code == glow::NO_ERROR {
        Ok(())
    } else {
        Err(GpuError::Driver { operation, code })
    }
}

/// Reads the driver error flag and fails if it is set.
///
/// Must be called right after the GL call named by `operation`; the flag
/// is sticky until read, so a skipped check blames the next caller.
#[allow(unsafe_code)]
pub fn check_error(gl: &glow::Context, operation: &'static str) -> Result<(), GpuError> {
    use glow::HasContext;

    // SAFETY: glGetError has no preconditions beyond a current context.
    let code = unsafe { gl.get_error() };
    driver_result(operation, code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_error_code_is_ok() {
        assert!(driver_result("glBufferData", glow::NO_ERROR).is_ok());
    }

    #[test]
    fn driver_error_names_operation_and_code() {
        let err = driver_result("glTexImage2D", glow::INVALID_VALUE).unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("glTexImage2D"), "missing operation in: {msg}");
        assert!(msg.contains("0x0501"), "missing hex code in: {msg}");
        assert_eq!(err.kind(), ErrorKind::Driver);
    }

    #[test]
    fn uniform_shape_includes_rows_cols_and_array_length() {
        let err = GpuError::UniformShape {
            rows: 5,
            cols: 3,
            array_length: 7,
        };
        let msg = format!("{err}");
        assert!(msg.contains("5x3"), "missing shape in: {msg}");
        assert!(msg.contains('7'), "missing array length in: {msg}");
        assert_eq!(err.kind(), ErrorKind::ShapeFormat);
    }

    #[test]
    fn layer_out_of_bounds_includes_layer_and_count() {
        let err = GpuError::LayerOutOfBounds {
            layer: 4,
            layers: 4,
        };
        let msg = format!("{err}");
        assert!(msg.contains("(4)"), "missing values in: {msg}");
        assert_eq!(err.kind(), ErrorKind::ShapeFormat);
    }

    #[test]
    fn attachment_sequence_includes_slot() {
        let err = GpuError::AttachmentSequence {
            slot: 3,
            attached: 1,
        };
        let msg = format!("{err}");
        assert!(msg.contains("slot 3"), "missing slot in: {msg}");
        assert!(msg.contains("1 attachments"), "missing count in: {msg}");
        assert_eq!(err.kind(), ErrorKind::Sequencing);
    }

    #[test]
    fn lookup_errors_name_the_missing_symbol() {
        let uniform = GpuError::UnknownUniform("camera".into());
        let attribute = GpuError::UnknownAttribute("vertex".into());
        assert!(uniform.to_string().contains("camera"));
        assert!(attribute.to_string().contains("vertex"));
        assert_eq!(uniform.kind(), ErrorKind::Lookup);
        assert_eq!(attribute.kind(), ErrorKind::Lookup);
    }

    #[test]
    fn wrapped_errors_keep_their_category() {
        let shader = GpuError::from(ShaderError::Link("varying mismatch".into()));
        assert_eq!(shader.kind(), ErrorKind::CompileLink);
        assert!(shader.to_string().contains("varying mismatch"));

        let context = GpuError::from(ContextError::Surface("no pbuffer".into()));
        assert_eq!(context.kind(), ErrorKind::Construction);
    }

    #[test]
    fn no_color_attachments_is_sequencing() {
        assert_eq!(GpuError::NoColorAttachments.kind(), ErrorKind::Sequencing);
        let incomplete = GpuError::FramebufferIncomplete { status: 0x8CD6 };
        assert!(incomplete.to_string().contains("0x8CD6"));
        assert_eq!(incomplete.kind(), ErrorKind::Sequencing);
    }

    #[test]
    fn gpu_error_implements_std_error() {
        fn assert_std_error<T: std::error::Error>() {}
        assert_std_error::<GpuError>();
    }
}

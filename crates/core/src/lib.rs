#![deny(unsafe_code)]
//! Typed RAII wrappers over OpenGL for offscreen rendering.
//!
//! Provides `RenderContext` (driver bring-up, headless EGL surface behind the
//! `headless` feature), `VertexBuffer`/`IndexBuffer`, flat and layered
//! `Texture`s, `Framebuffer`, and `Shader`/`Program` with shape-dispatched
//! matrix uniforms. Every wrapper owns exactly one GL handle, deletes it on
//! drop, and checks the driver error flag after each state-mutating call.

pub mod buffer;
pub mod context;
pub mod error;
pub mod framebuffer;
#[cfg(feature = "headless")]
pub mod headless;
pub mod program;
pub mod shader;
pub mod texture;
pub mod uniform;

pub use buffer::{Buffer, BufferElement, BufferKind, IndexBuffer, Topology, ValueType, VertexBuffer};
pub use context::{ContextError, RenderContext, SharedGl, Surface, SurfaceConfig};
pub use error::{check_error, ErrorKind, GpuError};
pub use framebuffer::{ColorAttachment, Framebuffer};
#[cfg(feature = "headless")]
pub use headless::HeadlessSurface;
pub use program::{Program, ProgramState};
pub use shader::{Shader, ShaderError, ShaderStage};
pub use texture::{Filter, Texture, TextureFormat, TextureShape, TextureSize};
pub use uniform::{AsUniform, MatrixOrder, UniformMatrix, UniformOp};

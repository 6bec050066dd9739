//! GPU context ownership and driver bring-up.
//!
//! A [`RenderContext`] brings up the drawing [`Surface`] and the loaded
//! `glow::Context`, both held in a [`SharedGl`]. Exactly one should exist per
//! process, created before any other wrapper. Every wrapper keeps an
//! `Rc<SharedGl>`, so the driver session outlives the last wrapper, and
//! wrappers are `!Send`: the thread that created the context is the only one
//! that may touch GL.

use std::ffi::{c_void, CStr};
use std::ops::Deref;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{check_error, GpuError};

/// Failures while bringing up or querying the GL context.
///
/// Each bring-up phase has its own variant so a failed start can be
/// diagnosed without reading driver logs.
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    /// The platform driver or display connection could not be initialized.
    #[error("failed to initialize the OpenGL driver: {0}")]
    Driver(String),
    /// The offscreen drawable could not be created or made current.
    #[error("failed to create an OpenGL surface: {0}")]
    Surface(String),
    /// A required GL entry point could not be loaded.
    #[error("failed to load OpenGL entry points: {0}")]
    Extensions(String),
    /// The driver returned no value for a string query.
    #[error("glGetString returned nothing for 0x{0:04X}")]
    Query(u32),
}

/// A drawable that GL function pointers can be loaded from.
///
/// This is the boundary to the windowing/driver layer. Implementations own
/// whatever native objects back the surface and release them on drop.
pub trait Surface {
    /// Binds the surface's context to the calling thread.
    fn make_current(&self) -> Result<(), ContextError>;

    /// Looks up a GL entry point; returns null when it is unavailable.
    fn proc_address(&self, symbol: &CStr) -> *const c_void;
}

/// Parameters for the offscreen surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Drawable width in pixels. Rendering goes to framebuffers, so 1 suffices.
    pub width: u32,
    /// Drawable height in pixels.
    pub height: u32,
    /// Requested GL major version.
    pub gl_major: u8,
    /// Requested GL minor version.
    pub gl_minor: u8,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            gl_major: 3,
            gl_minor: 3,
        }
    }
}

/// Entry points the wrappers call, including the one glow does not bind
/// (`glGetTexLevelParameteriv`). Checked before loading so a missing one is
/// reported by name instead of crashing on first use.
const REQUIRED_ENTRY_POINTS: &[&CStr] = &[
    c"glGetError",
    c"glGetTexLevelParameteriv",
    c"glGenBuffers",
    c"glVertexAttribPointer",
    c"glGenVertexArrays",
    c"glTexImage3D",
    c"glTexSubImage3D",
    c"glGenFramebuffers",
    c"glFramebufferTextureLayer",
    c"glDrawBuffers",
    c"glCreateShader",
    c"glUniformMatrix2x3fv",
];

/// Returns the first required entry point that `lookup` cannot resolve.
pub fn missing_entry_point<F>(mut lookup: F) -> Option<&'static CStr>
where
    F: FnMut(&CStr) -> *const c_void,
{
    REQUIRED_ENTRY_POINTS
        .iter()
        .copied()
        .find(|symbol| lookup(symbol).is_null())
}

type GetTexLevelParameteriv = unsafe extern "system" fn(u32, i32, u32, *mut i32);

/// Driver session state shared by the context and every wrapper.
///
/// Derefs to `glow::Context`. Dropping the last `Rc` deletes the default
/// vertex array and then tears the surface down, so no wrapper can issue GL
/// calls after the session is gone.
pub struct SharedGl {
    gl: glow::Context,
    get_tex_level_parameter_iv: GetTexLevelParameteriv,
    vertex_array: glow::VertexArray,
    // Last field: dropped after everything that may still call into GL.
    surface: Box<dyn Surface>,
}

impl SharedGl {
    /// `glGetTexLevelParameteriv` for the texture bound to `target`.
    ///
    /// # Safety
    ///
    /// The context must be current and `target`/`pname` valid enums, as for
    /// any `glow::HasContext` call.
    #[allow(unsafe_code)]
    pub(crate) unsafe fn tex_level_parameter_i32(&self, target: u32, level: i32, pname: u32) -> i32 {
        let mut value = 0;
        // SAFETY: the pointer was resolved from this context's loader and
        // `value` outlives the call.
        unsafe { (self.get_tex_level_parameter_iv)(target, level, pname, &mut value) };
        value
    }
}

impl Deref for SharedGl {
    type Target = glow::Context;

    fn deref(&self) -> &glow::Context {
        &self.gl
    }
}

impl Drop for SharedGl {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        use glow::HasContext;

        // SAFETY: the VAO was created by this context in from_surface().
        unsafe { self.gl.delete_vertex_array(self.vertex_array) };
        log::debug!("render context released");
    }
}

/// The process-wide GL context.
pub struct RenderContext {
    shared: Rc<SharedGl>,
}

impl RenderContext {
    /// Brings up a headless driver session with a 1x1 offscreen surface.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Driver`], [`ContextError::Surface`] or
    /// [`ContextError::Extensions`] depending on which phase failed.
    #[cfg(feature = "headless")]
    pub fn initialize() -> Result<Self, ContextError> {
        Self::initialize_with(&SurfaceConfig::default())
    }

    /// Like [`RenderContext::initialize`] with an explicit surface config.
    ///
    /// # Errors
    ///
    /// See [`RenderContext::initialize`].
    #[cfg(feature = "headless")]
    pub fn initialize_with(config: &SurfaceConfig) -> Result<Self, ContextError> {
        let surface = crate::headless::HeadlessSurface::new(config)?;
        Self::from_surface(Box::new(surface))
    }

    /// Makes `surface` current, loads GL through it and binds a default
    /// vertex array object (core profiles have none).
    ///
    /// Binding: leaves the default VAO bound for the session's lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Surface`] if the surface cannot be made
    /// current, [`ContextError::Extensions`] if an entry point is missing and
    /// [`ContextError::Driver`] if the default VAO cannot be set up.
    #[allow(unsafe_code)]
    pub fn from_surface(surface: Box<dyn Surface>) -> Result<Self, ContextError> {
        use glow::HasContext;

        surface.make_current()?;

        if let Some(symbol) = missing_entry_point(|s| surface.proc_address(s)) {
            return Err(ContextError::Extensions(format!(
                "{} is not available",
                symbol.to_string_lossy()
            )));
        }

        // SAFETY: the symbol was resolved above, so the pointer is non-null,
        // and glGetTexLevelParameteriv has exactly this signature.
        let get_tex_level_parameter_iv = unsafe {
            std::mem::transmute::<*const c_void, GetTexLevelParameteriv>(
                surface.proc_address(c"glGetTexLevelParameteriv"),
            )
        };

        // SAFETY: the surface is current on this thread and every pointer the
        // loader returns belongs to that context.
        let gl = unsafe { glow::Context::from_loader_function_cstr(|s| surface.proc_address(s)) };
        let driver = |e: GpuError| ContextError::Driver(e.to_string());

        // SAFETY: the context was just loaded and is current.
        let vertex_array = unsafe { gl.create_vertex_array() }.map_err(ContextError::Driver)?;
        check_error(&gl, "glGenVertexArrays").map_err(driver)?;

        let shared = Rc::new(SharedGl {
            gl,
            get_tex_level_parameter_iv,
            vertex_array,
            surface,
        });

        unsafe { shared.bind_vertex_array(Some(shared.vertex_array)) };
        check_error(&shared, "glBindVertexArray").map_err(driver)?;

        let ctx = Self { shared };
        match ctx.describe() {
            Ok(summary) => log::info!("{summary}"),
            Err(e) => log::warn!("context created but driver strings unavailable: {e}"),
        }

        Ok(ctx)
    }

    /// Rebinds this context to the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Surface`] if the driver refuses.
    pub fn make_current(&self) -> Result<(), ContextError> {
        self.shared.surface.make_current()
    }

    /// Returns `"<vendor>/<renderer>"` as reported by the driver.
    ///
    /// # Errors
    ///
    /// Fails if either string is empty or the query raised a driver error.
    pub fn vendor_string(&self) -> Result<String, GpuError> {
        let vendor = self.query(glow::VENDOR)?;
        let renderer = self.query(glow::RENDERER)?;
        Ok(format!("{vendor}/{renderer}"))
    }

    /// Returns the driver's `GL_VERSION` string.
    ///
    /// # Errors
    ///
    /// Fails if the string is empty or the query raised a driver error.
    pub fn version_string(&self) -> Result<String, GpuError> {
        self.query(glow::VERSION)
    }

    /// One-line summary of vendor and version, suitable for logs.
    ///
    /// # Errors
    ///
    /// Propagates failures of [`vendor_string`](Self::vendor_string) and
    /// [`version_string`](Self::version_string).
    pub fn describe(&self) -> Result<String, GpuError> {
        Ok(format!(
            "opengl context: vendor=\"{}\", version=\"{}\"",
            self.vendor_string()?,
            self.version_string()?
        ))
    }

    /// Returns the shared session every wrapper keeps a reference to.
    pub fn gl(&self) -> &Rc<SharedGl> {
        &self.shared
    }

    #[allow(unsafe_code)]
    fn query(&self, name: u32) -> Result<String, GpuError> {
        use glow::HasContext;

        // SAFETY: `name` is one of the fixed glGetString enums.
        let value = unsafe { self.shared.get_parameter_string(name) };
        check_error(&self.shared, "glGetString")?;

        if value.is_empty() {
            return Err(ContextError::Query(name).into());
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn missing_entry_point_is_none_when_all_resolve() {
        let found = missing_entry_point(|_| 1 as *const c_void);
        assert!(found.is_none());
    }

    #[test]
    fn missing_entry_point_names_first_unresolved_symbol() {
        let found = missing_entry_point(|s| {
            if s == c"glTexImage3D" {
                ptr::null()
            } else {
                1 as *const c_void
            }
        });
        assert_eq!(found, Some(c"glTexImage3D"));
    }

    #[test]
    fn missing_entry_point_stops_at_first_gap() {
        let mut lookups = 0;
        let found = missing_entry_point(|_| {
            lookups += 1;
            ptr::null()
        });
        assert_eq!(found, Some(c"glGetError"));
        assert_eq!(lookups, 1);
    }

    #[test]
    fn surface_config_defaults_to_minimal_drawable() {
        let config = SurfaceConfig::default();
        assert_eq!((config.width, config.height), (1, 1));
        assert_eq!((config.gl_major, config.gl_minor), (3, 3));
    }

    #[test]
    fn surface_config_fills_missing_fields_from_default() {
        let config: SurfaceConfig = serde_json::from_str(r#"{"gl_minor": 1}"#).unwrap();
        assert_eq!(config.gl_minor, 1);
        assert_eq!(config.gl_major, 3);
        assert_eq!(config.width, 1);
    }

    #[test]
    fn context_error_phases_are_distinguishable() {
        let driver = ContextError::Driver("no display".into()).to_string();
        let surface = ContextError::Surface("no pbuffer".into()).to_string();
        let ext = ContextError::Extensions("glDrawBuffers".into()).to_string();
        assert!(driver.contains("driver"), "got: {driver}");
        assert!(surface.contains("surface"), "got: {surface}");
        assert!(ext.contains("entry points"), "got: {ext}");
        assert!(ext.contains("glDrawBuffers"), "got: {ext}");
    }

    #[test]
    fn query_error_shows_enum_in_hex() {
        let msg = ContextError::Query(glow::VERSION).to_string();
        assert!(msg.contains("0x1F02"), "got: {msg}");
    }

    #[test]
    fn render_context_exposes_shared_gl() {
        fn _assert_api(ctx: &RenderContext) {
            let shared: &Rc<SharedGl> = ctx.gl();
            let _table: &glow::Context = shared;
        }
    }

    #[test]
    fn tex_level_query_is_a_required_entry_point() {
        let found = missing_entry_point(|s| {
            if s == c"glGetTexLevelParameteriv" {
                ptr::null()
            } else {
                1 as *const c_void
            }
        });
        assert_eq!(found, Some(c"glGetTexLevelParameteriv"));
    }

    #[test]
    #[cfg(feature = "headless")]
    #[ignore = "requires GL context"]
    #[allow(unsafe_code)]
    fn wrappers_keep_the_session_alive() {
        use glow::HasContext;

        let ctx = RenderContext::initialize().unwrap();
        let shared = Rc::clone(ctx.gl());
        drop(ctx);
        // SAFETY: the session is still owned by `shared`, so the context is
        // current.
        let code = unsafe { shared.get_error() };
        assert_eq!(code, glow::NO_ERROR);
        assert_eq!(Rc::strong_count(&shared), 1);
    }
}

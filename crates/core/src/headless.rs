//! Headless EGL surface for offscreen rendering.
//!
//! Picks the first EGL device, creates a context for the requested GL
//! version and a tiny pbuffer drawable to make it current against. All real
//! rendering happens in framebuffers; the pbuffer only exists because a
//! context needs something to be current on.

use std::ffi::{c_void, CStr};
use std::num::NonZeroU32;

use glutin::api::egl::context::PossiblyCurrentContext;
use glutin::api::egl::device::Device;
use glutin::api::egl::display::Display;
use glutin::api::egl::surface::Surface as EglSurface;
use glutin::config::{ConfigSurfaceTypes, ConfigTemplateBuilder};
use glutin::context::{
    ContextApi, ContextAttributesBuilder, NotCurrentGlContext, PossiblyCurrentGlContext, Version,
};
use glutin::display::GlDisplay;
use glutin::surface::{PbufferSurface, SurfaceAttributesBuilder};

use crate::context::{ContextError, Surface, SurfaceConfig};

/// An EGL context made current on a pbuffer surface.
pub struct HeadlessSurface {
    // Declaration order is drop order: context and surface go before the display.
    context: PossiblyCurrentContext,
    surface: EglSurface<PbufferSurface>,
    display: Display,
}

impl HeadlessSurface {
    /// Brings up EGL and returns a current surface of `config.width` x
    /// `config.height` pixels.
    ///
    /// # Errors
    ///
    /// [`ContextError::Driver`] if no EGL device, display, config or context
    /// is available; [`ContextError::Surface`] if the pbuffer cannot be
    /// created or made current.
    #[allow(unsafe_code)]
    pub fn new(config: &SurfaceConfig) -> Result<Self, ContextError> {
        let driver = |e: glutin::error::Error| ContextError::Driver(e.to_string());
        let surface_err = |e: glutin::error::Error| ContextError::Surface(e.to_string());

        let device = Device::query_devices()
            .map_err(driver)?
            .next()
            .ok_or_else(|| ContextError::Driver("no EGL device found".into()))?;

        // SAFETY: no native display is passed, so EGL owns the connection.
        let display = unsafe { Display::with_device(&device, None) }.map_err(driver)?;

        let template = ConfigTemplateBuilder::new()
            .with_alpha_size(8)
            .with_surface_type(ConfigSurfaceTypes::PBUFFER)
            .build();

        // SAFETY: the template is fully initialized by the builder.
        let gl_config = unsafe { display.find_configs(template) }
            .map_err(driver)?
            .next()
            .ok_or_else(|| ContextError::Driver("no EGL config supports pbuffers".into()))?;

        let attributes = ContextAttributesBuilder::new()
            .with_context_api(ContextApi::OpenGl(Some(Version::new(
                config.gl_major,
                config.gl_minor,
            ))))
            .build(None);

        // SAFETY: the config was produced by this display.
        let not_current =
            unsafe { display.create_context(&gl_config, &attributes) }.map_err(driver)?;

        let width = NonZeroU32::new(config.width).unwrap_or(NonZeroU32::MIN);
        let height = NonZeroU32::new(config.height).unwrap_or(NonZeroU32::MIN);
        let surface_attributes =
            SurfaceAttributesBuilder::<PbufferSurface>::new().build(width, height);

        // SAFETY: same display and config as the context.
        let surface = unsafe { display.create_pbuffer_surface(&gl_config, &surface_attributes) }
            .map_err(surface_err)?;

        let context = not_current.make_current(&surface).map_err(surface_err)?;

        log::debug!(
            "EGL pbuffer surface {}x{} for OpenGL {}.{}",
            width,
            height,
            config.gl_major,
            config.gl_minor
        );

        Ok(Self {
            context,
            surface,
            display,
        })
    }
}

impl Surface for HeadlessSurface {
    fn make_current(&self) -> Result<(), ContextError> {
        self.context
            .make_current(&self.surface)
            .map_err(|e| ContextError::Surface(e.to_string()))
    }

    fn proc_address(&self, symbol: &CStr) -> *const c_void {
        self.display.get_proc_address(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_surface_implements_surface() {
        fn assert_surface<T: Surface>() {}
        assert_surface::<HeadlessSurface>();
    }

    #[test]
    #[ignore = "requires EGL driver"]
    fn new_creates_current_surface() {
        let surface = HeadlessSurface::new(&SurfaceConfig::default()).unwrap();
        assert!(!surface.proc_address(c"glGetError").is_null());
    }
}

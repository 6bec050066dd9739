//! GPU textures: flat 2D images and layered 2D arrays.
//!
//! One [`Texture`] type covers both shapes; the [`TextureShape`] chosen at
//! construction is fixed for the texture's lifetime. Shape-specific
//! operations ([`Texture::read_image`] for flat textures,
//! [`Texture::read_layer`] / [`Texture::write_layer`] for arrays) fail with
//! [`GpuError::TextureShape`] on the other shape.
//!
//! Host-side pixels cross the boundary as `image` crate buffers: readback
//! produces an [`RgbaImage`], layer upload takes a [`DynamicImage`].

use std::borrow::Cow;
use std::rc::Rc;

use image::{DynamicImage, RgbaImage};

use crate::context::{RenderContext, SharedGl};
use crate::error::{check_error, GpuError};

/// Storage and upload formats for a texture allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFormat {
    /// GL internal format (e.g. `glow::RGBA`, `glow::RGBA16F`).
    pub internal_format: u32,
    /// Pixel layout of the (absent) initial upload.
    pub format: u32,
    /// Component type of the (absent) initial upload.
    pub pixel_type: u32,
}

impl TextureFormat {
    /// Unsized RGBA with byte components.
    pub fn rgba() -> Self {
        Self {
            internal_format: glow::RGBA,
            format: glow::RGBA,
            pixel_type: glow::UNSIGNED_BYTE,
        }
    }

    /// Sized 8-bit RGBA.
    pub fn rgba8() -> Self {
        Self::with_internal_format(glow::RGBA8)
    }

    /// Half-float RGBA for HDR intermediates.
    pub fn rgba16f() -> Self {
        Self::with_internal_format(glow::RGBA16F)
    }

    /// Full-float RGBA.
    pub fn rgba32f() -> Self {
        Self::with_internal_format(glow::RGBA32F)
    }

    /// RGBA upload layout with the pixel type derived from `internal_format`.
    pub fn with_internal_format(internal_format: u32) -> Self {
        Self {
            internal_format,
            format: glow::RGBA,
            pixel_type: pixel_type_for_format(internal_format),
        }
    }
}

impl Default for TextureFormat {
    fn default() -> Self {
        Self::rgba()
    }
}

/// Returns the GL pixel type that corresponds to a given internal format.
pub fn pixel_type_for_format(internal_format: u32) -> u32 {
    match internal_format {
        glow::RGBA16F | glow::RGB16F => glow::HALF_FLOAT,
        glow::RGBA32F | glow::RGB32F => glow::FLOAT,
        _ => glow::UNSIGNED_BYTE,
    }
}

/// Whether readback into an 8-bit RGBA image is allowed for this internal format.
pub fn is_four_channel(internal_format: u32) -> bool {
    matches!(internal_format, glow::RGBA | glow::BGRA | glow::RGBA8)
}

/// Minification and magnification filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

impl Filter {
    pub fn gl_enum(self) -> u32 {
        match self {
            Filter::Nearest => glow::NEAREST,
            Filter::Linear => glow::LINEAR,
        }
    }
}

/// Flat 2D image or layered 2D array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureShape {
    Flat,
    Layered { layers: u32 },
}

impl TextureShape {
    /// The GL texture target for this shape.
    pub fn target(self) -> u32 {
        match self {
            TextureShape::Flat => glow::TEXTURE_2D,
            TextureShape::Layered { .. } => glow::TEXTURE_2D_ARRAY,
        }
    }

    /// Number of layers; 1 for flat textures.
    pub fn layers(self) -> u32 {
        match self {
            TextureShape::Flat => 1,
            TextureShape::Layered { layers } => layers,
        }
    }
}

/// Texture extent as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSize {
    pub width: u32,
    pub height: u32,
    /// Layer count for arrays, 1 for flat textures.
    pub depth: u32,
}

/// Fails with [`GpuError::LayerOutOfBounds`] unless `layer < layers`.
pub fn check_layer(layer: u32, layers: u32) -> Result<(), GpuError> {
    if layer >= layers {
        return Err(GpuError::LayerOutOfBounds { layer, layers });
    }
    Ok(())
}

/// Picks the upload format for `image` and returns its pixels in that
/// layout. RGB8 and RGBA8 upload as-is; every other layout is converted to
/// RGBA8 first.
pub fn upload_layout(image: &DynamicImage) -> (u32, Cow<'_, [u8]>) {
    match image {
        DynamicImage::ImageRgb8(rgb) => (glow::RGB, Cow::Borrowed(rgb.as_raw().as_slice())),
        DynamicImage::ImageRgba8(rgba) => (glow::RGBA, Cow::Borrowed(rgba.as_raw().as_slice())),
        other => (glow::RGBA, Cow::Owned(other.to_rgba8().into_raw())),
    }
}

/// GPU image storage.
pub struct Texture {
    gl: Rc<SharedGl>,
    handle: glow::Texture,
    shape: TextureShape,
    width: u32,
    height: u32,
    format: TextureFormat,
}

impl Texture {
    /// Allocates a flat 2D texture with undefined contents and linear filtering.
    ///
    /// Binding: leaves the texture bound to `TEXTURE_2D` on the active unit.
    ///
    /// # Errors
    ///
    /// [`GpuError::Allocation`] or a driver error from `glTexImage2D`.
    #[allow(unsafe_code)]
    pub fn new_2d(
        ctx: &RenderContext,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<Self, GpuError> {
        use glow::HasContext;

        let texture = Self::create(ctx, TextureShape::Flat, width, height, format)?;
        let gl = &texture.gl;

        // SAFETY: the handle was just created; no initial data is read.
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(texture.handle));
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                format.internal_format as i32,
                width as i32,
                height as i32,
                0,
                format.format,
                format.pixel_type,
                glow::PixelUnpackData::Slice(None),
            );
        }
        check_error(gl, "glTexImage2D")?;

        texture.set_filter(Filter::Linear)?;
        log::debug!("created {width}x{height} texture (format 0x{:04X})", format.internal_format);
        Ok(texture)
    }

    /// Allocates a 2D array texture of `layers` layers with undefined
    /// contents and linear filtering.
    ///
    /// Binding: leaves the texture bound to `TEXTURE_2D_ARRAY` on the active unit.
    ///
    /// # Errors
    ///
    /// [`GpuError::Allocation`] or a driver error from `glTexImage3D`.
    #[allow(unsafe_code)]
    pub fn new_2d_array(
        ctx: &RenderContext,
        width: u32,
        height: u32,
        layers: u32,
        format: TextureFormat,
    ) -> Result<Self, GpuError> {
        use glow::HasContext;

        let shape = TextureShape::Layered { layers };
        let texture = Self::create(ctx, shape, width, height, format)?;
        let gl = &texture.gl;

        // SAFETY: the handle was just created; no initial data is read.
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D_ARRAY, Some(texture.handle));
        }
        check_error(gl, "glBindTexture")?;

        unsafe {
            gl.tex_image_3d(
                glow::TEXTURE_2D_ARRAY,
                0,
                format.internal_format as i32,
                width as i32,
                height as i32,
                layers as i32,
                0,
                format.format,
                format.pixel_type,
                glow::PixelUnpackData::Slice(None),
            );
        }
        check_error(gl, "glTexImage3D")?;

        texture.set_filter(Filter::Linear)?;
        log::debug!(
            "created {width}x{height}x{layers} texture array (format 0x{:04X})",
            format.internal_format
        );
        Ok(texture)
    }

    #[allow(unsafe_code)]
    fn create(
        ctx: &RenderContext,
        shape: TextureShape,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<Self, GpuError> {
        use glow::HasContext;

        let gl = Rc::clone(ctx.gl());
        // SAFETY: the context is current.
        let handle = unsafe { gl.create_texture() }.map_err(GpuError::allocation("texture"))?;
        check_error(&gl, "glGenTextures")?;

        Ok(Self {
            gl,
            handle,
            shape,
            width,
            height,
            format,
        })
    }

    /// Sets min and mag filtering to `filter` and clamps both wrap axes to
    /// the border color. The wrap mode is not configurable.
    ///
    /// Binding: binds this texture on the active unit.
    ///
    /// # Errors
    ///
    /// Returns a driver error from `glTexParameteri`.
    #[allow(unsafe_code)]
    pub fn set_filter(&self, filter: Filter) -> Result<(), GpuError> {
        use glow::HasContext;

        let target = self.target();
        let filter = filter.gl_enum() as i32;
        // SAFETY: the handle is live and the parameters are valid enums.
        unsafe {
            self.gl.bind_texture(target, Some(self.handle));
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, filter);
            self.gl
                .tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, filter);
            self.gl.tex_parameter_i32(
                target,
                glow::TEXTURE_WRAP_S,
                glow::CLAMP_TO_BORDER as i32,
            );
            self.gl.tex_parameter_i32(
                target,
                glow::TEXTURE_WRAP_T,
                glow::CLAMP_TO_BORDER as i32,
            );
        }
        check_error(&self.gl, "glTexParameteri")
    }

    /// Reads `(WRAP_S, WRAP_T)` back from the driver.
    ///
    /// Binding: binds this texture on the active unit.
    ///
    /// # Errors
    ///
    /// Returns a driver error from `glGetTexParameteriv`.
    #[allow(unsafe_code)]
    pub fn wrap_modes(&self) -> Result<(u32, u32), GpuError> {
        use glow::HasContext;

        let target = self.target();
        // SAFETY: the handle is live.
        let (s, t) = unsafe {
            self.gl.bind_texture(target, Some(self.handle));
            (
                self.gl.get_tex_parameter_i32(target, glow::TEXTURE_WRAP_S),
                self.gl.get_tex_parameter_i32(target, glow::TEXTURE_WRAP_T),
            )
        };
        check_error(&self.gl, "glGetTexParameteriv")?;
        Ok((s as u32, t as u32))
    }

    /// Binds this texture to its target on the currently active unit.
    ///
    /// # Errors
    ///
    /// Returns a driver error from `glBindTexture`.
    #[allow(unsafe_code)]
    pub fn bind(&self) -> Result<(), GpuError> {
        use glow::HasContext;

        // SAFETY: the handle is live.
        unsafe { self.gl.bind_texture(self.target(), Some(self.handle)) };
        check_error(&self.gl, "glBindTexture")
    }

    /// Width, height and layer count as reported by the driver.
    ///
    /// Binding: binds this texture on the active unit.
    ///
    /// # Errors
    ///
    /// Returns a driver error from `glGetTexLevelParameteriv`.
    #[allow(unsafe_code)]
    pub fn size(&self) -> Result<TextureSize, GpuError> {
        use glow::HasContext;

        let target = self.target();
        // SAFETY: the handle is live; level 0 always exists after allocation.
        let (width, height, depth) = unsafe {
            self.gl.bind_texture(target, Some(self.handle));
            let width = self
                .gl
                .tex_level_parameter_i32(target, 0, glow::TEXTURE_WIDTH);
            let height = self
                .gl
                .tex_level_parameter_i32(target, 0, glow::TEXTURE_HEIGHT);
            let depth = match self.shape {
                TextureShape::Flat => 1,
                TextureShape::Layered { .. } => {
                    self.gl
                        .tex_level_parameter_i32(target, 0, glow::TEXTURE_DEPTH)
                }
            };
            (width, height, depth)
        };
        check_error(&self.gl, "glGetTexLevelParameteriv")?;

        Ok(TextureSize {
            width: width as u32,
            height: height as u32,
            depth: depth as u32,
        })
    }

    /// Copies a flat texture into a new RGBA image.
    ///
    /// Binding: binds this texture on the active unit.
    ///
    /// # Errors
    ///
    /// [`GpuError::TextureShape`] for arrays, [`GpuError::TextureFormat`] if
    /// the internal format is not four-channel, or a driver error.
    #[allow(unsafe_code)]
    pub fn read_image(&self) -> Result<RgbaImage, GpuError> {
        use glow::HasContext;

        self.require_flat("read_image")?;
        self.require_four_channel()?;
        let size = self.size()?;

        let mut image = RgbaImage::new(size.width, size.height);
        // SAFETY: `image` holds width * height * 4 bytes, exactly what an
        // RGBA/UNSIGNED_BYTE readback of level 0 writes.
        unsafe {
            self.gl.bind_texture(glow::TEXTURE_2D, Some(self.handle));
            self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            self.gl.get_tex_image(
                glow::TEXTURE_2D,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(Some(&mut *image)),
            );
        }
        check_error(&self.gl, "glGetTexImage")?;
        Ok(image)
    }

    /// Copies one layer of an array texture into a new RGBA image.
    ///
    /// The layer is attached to a scratch framebuffer that is deleted on
    /// every return path.
    ///
    /// Binding: leaves `FRAMEBUFFER` bound to 0 (the scratch target is
    /// deleted while bound).
    ///
    /// # Errors
    ///
    /// [`GpuError::TextureShape`] for flat textures,
    /// [`GpuError::LayerOutOfBounds`], [`GpuError::TextureFormat`], or a
    /// driver error.
    #[allow(unsafe_code)]
    pub fn read_layer(&self, layer: u32) -> Result<RgbaImage, GpuError> {
        use glow::HasContext;

        let layers = self.require_layered("read_layer")?;
        check_layer(layer, layers)?;
        self.require_four_channel()?;
        let size = self.size()?;

        let scratch = ScratchFramebuffer::new(&self.gl)?;
        // SAFETY: the scratch framebuffer and the texture are live; the
        // layer index was bounds-checked above.
        unsafe {
            self.gl
                .bind_framebuffer(glow::FRAMEBUFFER, Some(scratch.handle));
            self.gl.framebuffer_texture_layer(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                Some(self.handle),
                0,
                layer as i32,
            );
        }
        check_error(&self.gl, "glFramebufferTextureLayer")?;

        let mut image = RgbaImage::new(size.width, size.height);
        // SAFETY: `image` holds exactly width * height * 4 bytes.
        unsafe {
            self.gl.read_buffer(glow::COLOR_ATTACHMENT0);
            self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            self.gl.read_pixels(
                0,
                0,
                size.width as i32,
                size.height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(Some(&mut *image)),
            );
        }
        check_error(&self.gl, "glReadPixels")?;

        drop(scratch);
        check_error(&self.gl, "glDeleteFramebuffers")?;
        Ok(image)
    }

    /// Replaces one layer of an array texture with `image`, leaving the
    /// other layers untouched. RGB images upload as `RGB`, RGBA as `RGBA`.
    ///
    /// Binding: binds this texture on the active unit and sets
    /// `UNPACK_ALIGNMENT` to 1.
    ///
    /// # Errors
    ///
    /// [`GpuError::TextureShape`] for flat textures,
    /// [`GpuError::LayerOutOfBounds`] if `layer >= layers`,
    /// [`GpuError::ImageSize`] if the image extent differs from the
    /// texture's, or a driver error from `glTexSubImage3D`.
    #[allow(unsafe_code)]
    pub fn write_layer(&self, layer: u32, image: &DynamicImage) -> Result<(), GpuError> {
        use glow::HasContext;

        let layers = self.require_layered("write_layer")?;
        check_layer(layer, layers)?;

        if image.width() != self.width || image.height() != self.height {
            return Err(GpuError::ImageSize {
                image_width: image.width(),
                image_height: image.height(),
                width: self.width,
                height: self.height,
            });
        }

        let (format, pixels) = upload_layout(image);
        // SAFETY: `pixels` holds width * height * channels bytes for `format`
        // and alignment is 1, so RGB rows need no padding.
        unsafe {
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl
                .bind_texture(glow::TEXTURE_2D_ARRAY, Some(self.handle));
            self.gl.tex_sub_image_3d(
                glow::TEXTURE_2D_ARRAY,
                0,
                0,
                0,
                layer as i32,
                self.width as i32,
                self.height as i32,
                1,
                format,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(&*pixels)),
            );
        }
        check_error(&self.gl, "glTexSubImage3D")
    }

    /// The GL target this texture binds to.
    pub fn target(&self) -> u32 {
        self.shape.target()
    }

    pub fn shape(&self) -> TextureShape {
        self.shape
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of layers; 1 for flat textures.
    pub fn layers(&self) -> u32 {
        self.shape.layers()
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn handle(&self) -> glow::Texture {
        self.handle
    }

    fn require_flat(&self, operation: &'static str) -> Result<(), GpuError> {
        match self.shape {
            TextureShape::Flat => Ok(()),
            TextureShape::Layered { .. } => Err(GpuError::TextureShape {
                operation,
                expected: "2D",
            }),
        }
    }

    fn require_layered(&self, operation: &'static str) -> Result<u32, GpuError> {
        match self.shape {
            TextureShape::Layered { layers } => Ok(layers),
            TextureShape::Flat => Err(GpuError::TextureShape {
                operation,
                expected: "2D array",
            }),
        }
    }

    #[allow(unsafe_code)]
    fn require_four_channel(&self) -> Result<(), GpuError> {
        use glow::HasContext;

        let target = self.target();
        // SAFETY: the handle is live.
        let internal = unsafe {
            self.gl.bind_texture(target, Some(self.handle));
            self.gl
                .tex_level_parameter_i32(target, 0, glow::TEXTURE_INTERNAL_FORMAT)
        } as u32;
        check_error(&self.gl, "glGetTexLevelParameteriv")?;

        if !is_four_channel(internal) {
            return Err(GpuError::TextureFormat { format: internal });
        }
        Ok(())
    }
}

impl Drop for Texture {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        use glow::HasContext;

        // SAFETY: the handle is owned exclusively by this wrapper.
        unsafe { self.gl.delete_texture(self.handle) };
        log::trace!("released {}x{} texture", self.width, self.height);
    }
}

/// Framebuffer that exists only for the duration of one readback.
struct ScratchFramebuffer<'a> {
    gl: &'a glow::Context,
    handle: glow::Framebuffer,
}

impl<'a> ScratchFramebuffer<'a> {
    #[allow(unsafe_code)]
    fn new(gl: &'a glow::Context) -> Result<Self, GpuError> {
        use glow::HasContext;

        // SAFETY: the context is current.
        let handle =
            unsafe { gl.create_framebuffer() }.map_err(GpuError::allocation("framebuffer"))?;
        Ok(Self { gl, handle })
    }
}

impl Drop for ScratchFramebuffer<'_> {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        use glow::HasContext;

        // SAFETY: the handle was created in new() and is not shared.
        unsafe { self.gl.delete_framebuffer(self.handle) };
    }
}

//! Off-screen render targets.
//!
//! A [`Framebuffer`] holds an ordered list of color attachments (whole 2D
//! textures or single layers of array textures) plus an optional depth
//! renderbuffer. Attachment slots are contiguous from 0: a slot either
//! replaces an existing attachment or appends the next one.

use std::rc::Rc;

use crate::context::{RenderContext, SharedGl};
use crate::error::{check_error, GpuError};
use crate::texture::{check_layer, Texture, TextureShape};

/// One color attachment of a [`Framebuffer`].
#[derive(Clone)]
pub enum ColorAttachment {
    /// A whole 2D texture.
    Flat(Rc<Texture>),
    /// One layer of a 2D array texture.
    Layer { texture: Rc<Texture>, layer: u32 },
}

impl ColorAttachment {
    pub fn texture(&self) -> &Rc<Texture> {
        match self {
            ColorAttachment::Flat(texture) | ColorAttachment::Layer { texture, .. } => texture,
        }
    }
}

/// Stores `item` at `slot`, replacing when `slot < len` and appending when
/// `slot == len`.
///
/// # Errors
///
/// [`GpuError::AttachmentSequence`] for any `slot > len`; `slots` is left
/// unchanged.
pub fn place_attachment<T>(slots: &mut Vec<T>, item: T, slot: usize) -> Result<(), GpuError> {
    let attached = slots.len();
    match slot.cmp(&attached) {
        std::cmp::Ordering::Less => slots[slot] = item,
        std::cmp::Ordering::Equal => slots.push(item),
        std::cmp::Ordering::Greater => {
            return Err(GpuError::AttachmentSequence { slot, attached });
        }
    }
    Ok(())
}

/// Draw-buffer enums for `count` attachments, in slot order.
pub fn draw_buffer_list(count: usize) -> Vec<u32> {
    (0..count as u32).map(|i| glow::COLOR_ATTACHMENT0 + i).collect()
}

/// A framebuffer object with its attachments.
pub struct Framebuffer {
    gl: Rc<SharedGl>,
    handle: glow::Framebuffer,
    depth_buffer: Option<glow::Renderbuffer>,
    width: u32,
    height: u32,
    clear_color: [f32; 4],
    attachments: Vec<ColorAttachment>,
}

impl Framebuffer {
    /// Creates a `width` x `height` framebuffer, with a 32-bit float depth
    /// renderbuffer when `depth` is set.
    ///
    /// Binding: leaves this framebuffer bound to `FRAMEBUFFER` when `depth`
    /// is set.
    ///
    /// # Errors
    ///
    /// [`GpuError::Allocation`] or a driver error.
    #[allow(unsafe_code)]
    pub fn new(ctx: &RenderContext, width: u32, height: u32, depth: bool) -> Result<Self, GpuError> {
        use glow::HasContext;

        let gl = Rc::clone(ctx.gl());
        // SAFETY: the context is current.
        let handle =
            unsafe { gl.create_framebuffer() }.map_err(GpuError::allocation("framebuffer"))?;
        check_error(&gl, "glGenFramebuffers")?;

        // Owned from here on so every failure below releases the handle.
        let mut framebuffer = Self {
            gl,
            handle,
            depth_buffer: None,
            width,
            height,
            clear_color: [0.0; 4],
            attachments: Vec::new(),
        };

        if depth {
            framebuffer.attach_depth()?;
        }

        log::debug!(
            "created {width}x{height} framebuffer (depth: {})",
            if depth { "on" } else { "off" }
        );
        Ok(framebuffer)
    }

    #[allow(unsafe_code)]
    fn attach_depth(&mut self) -> Result<(), GpuError> {
        use glow::HasContext;

        let gl = &self.gl;
        // SAFETY: the context is current.
        let renderbuffer =
            unsafe { gl.create_renderbuffer() }.map_err(GpuError::allocation("renderbuffer"))?;
        self.depth_buffer = Some(renderbuffer);
        check_error(gl, "glGenRenderbuffers")?;

        // SAFETY: both handles are live; the storage matches the
        // framebuffer extent.
        unsafe {
            gl.bind_renderbuffer(glow::RENDERBUFFER, Some(renderbuffer));
            gl.renderbuffer_storage(
                glow::RENDERBUFFER,
                glow::DEPTH_COMPONENT32F,
                self.width as i32,
                self.height as i32,
            );
        }
        check_error(gl, "glRenderbufferStorage")?;

        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.handle));
            gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                glow::DEPTH_ATTACHMENT,
                glow::RENDERBUFFER,
                Some(renderbuffer),
            );
        }
        check_error(gl, "glFramebufferRenderbuffer")
    }

    /// Sets the color [`bind`](Self::bind) clears to. Defaults to
    /// transparent black.
    pub fn with_clear_color(mut self, rgba: [f32; 4]) -> Self {
        self.clear_color = rgba;
        self
    }

    /// Attaches a flat texture's level 0 at `slot`.
    ///
    /// Binding: leaves this framebuffer bound to `FRAMEBUFFER`.
    ///
    /// # Errors
    ///
    /// [`GpuError::TextureShape`] for array textures,
    /// [`GpuError::AttachmentSequence`] if `slot` skips ahead, or a driver
    /// error.
    #[allow(unsafe_code)]
    pub fn set_color_attachment(&mut self, texture: Rc<Texture>, slot: usize) -> Result<(), GpuError> {
        use glow::HasContext;

        if texture.shape() != TextureShape::Flat {
            return Err(GpuError::TextureShape {
                operation: "set_color_attachment",
                expected: "2D",
            });
        }
        self.check_slot(slot)?;

        // SAFETY: both handles are live.
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.handle));
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0 + slot as u32,
                glow::TEXTURE_2D,
                Some(texture.handle()),
                0,
            );
        }
        check_error(&self.gl, "glFramebufferTexture2D")?;

        place_attachment(&mut self.attachments, ColorAttachment::Flat(texture), slot)
    }

    /// Attaches one layer of an array texture at `slot`.
    ///
    /// Binding: leaves this framebuffer bound to `FRAMEBUFFER`.
    ///
    /// # Errors
    ///
    /// [`GpuError::TextureShape`] for flat textures,
    /// [`GpuError::LayerOutOfBounds`], [`GpuError::AttachmentSequence`], or a
    /// driver error.
    #[allow(unsafe_code)]
    pub fn set_color_attachment_layer(
        &mut self,
        texture: Rc<Texture>,
        layer: u32,
        slot: usize,
    ) -> Result<(), GpuError> {
        use glow::HasContext;

        let TextureShape::Layered { layers } = texture.shape() else {
            return Err(GpuError::TextureShape {
                operation: "set_color_attachment_layer",
                expected: "2D array",
            });
        };
        check_layer(layer, layers)?;
        self.check_slot(slot)?;

        // SAFETY: both handles are live and the layer is in range.
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.handle));
            self.gl.framebuffer_texture_layer(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0 + slot as u32,
                Some(texture.handle()),
                0,
                layer as i32,
            );
        }
        check_error(&self.gl, "glFramebufferTextureLayer")?;

        place_attachment(
            &mut self.attachments,
            ColorAttachment::Layer { texture, layer },
            slot,
        )
    }

    fn check_slot(&self, slot: usize) -> Result<(), GpuError> {
        let attached = self.attachments.len();
        if slot > attached {
            return Err(GpuError::AttachmentSequence { slot, attached });
        }
        Ok(())
    }

    /// Makes this framebuffer the draw target and clears it.
    ///
    /// Sets the viewport to the full extent, enables every attachment as a
    /// draw buffer in slot order and clears color. With depth the depth test
    /// is enabled and depth cleared; without it the depth test is disabled.
    ///
    /// # Errors
    ///
    /// [`GpuError::NoColorAttachments`] before touching GL,
    /// [`GpuError::FramebufferIncomplete`], or a driver error.
    #[allow(unsafe_code)]
    pub fn bind(&self) -> Result<(), GpuError> {
        use glow::HasContext;

        if self.attachments.is_empty() {
            return Err(GpuError::NoColorAttachments);
        }

        let gl = &self.gl;
        // SAFETY: the handle is live.
        unsafe { gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.handle)) };
        check_error(gl, "glBindFramebuffer")?;

        let status = unsafe { gl.check_framebuffer_status(glow::FRAMEBUFFER) };
        if status != glow::FRAMEBUFFER_COMPLETE {
            return Err(GpuError::FramebufferIncomplete { status });
        }

        unsafe { gl.viewport(0, 0, self.width as i32, self.height as i32) };
        check_error(gl, "glViewport")?;

        unsafe { gl.draw_buffers(&draw_buffer_list(self.attachments.len())) };
        check_error(gl, "glDrawBuffers")?;

        let [r, g, b, a] = self.clear_color;
        unsafe {
            gl.clear_color(r, g, b, a);
            gl.clear(glow::COLOR_BUFFER_BIT);
        }
        check_error(gl, "glClear")?;

        if self.depth_buffer.is_some() {
            unsafe {
                gl.enable(glow::DEPTH_TEST);
                gl.clear(glow::DEPTH_BUFFER_BIT);
            }
            check_error(gl, "glClear")
        } else {
            unsafe { gl.disable(glow::DEPTH_TEST) };
            check_error(gl, "glDisable")
        }
    }

    pub fn attachments(&self) -> &[ColorAttachment] {
        &self.attachments
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn has_depth(&self) -> bool {
        self.depth_buffer.is_some()
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn handle(&self) -> glow::Framebuffer {
        self.handle
    }
}

impl Drop for Framebuffer {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        use glow::HasContext;

        // SAFETY: both handles are owned by this wrapper. Attached textures
        // are only referenced; their own Rc decides when they go.
        unsafe {
            if let Some(renderbuffer) = self.depth_buffer.take() {
                self.gl.delete_renderbuffer(renderbuffer);
            }
            self.gl.delete_framebuffer(self.handle);
        }
        log::trace!("released {}x{} framebuffer", self.width, self.height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_attachment_goes_to_slot_zero() {
        let mut slots = Vec::new();
        place_attachment(&mut slots, 'a', 0).unwrap();
        assert_eq!(slots, vec!['a']);
    }

    #[test]
    fn empty_list_rejects_slot_one() {
        let mut slots: Vec<char> = Vec::new();
        let err = place_attachment(&mut slots, 'a', 1).unwrap_err();
        assert!(matches!(
            err,
            GpuError::AttachmentSequence {
                slot: 1,
                attached: 0
            }
        ));
        assert!(slots.is_empty());
    }

    #[test]
    fn existing_slot_is_replaced() {
        let mut slots = vec!['a', 'b'];
        place_attachment(&mut slots, 'z', 1).unwrap();
        assert_eq!(slots, vec!['a', 'z']);
    }

    #[test]
    fn draw_buffers_follow_slot_order() {
        assert_eq!(
            draw_buffer_list(3),
            vec![
                glow::COLOR_ATTACHMENT0,
                glow::COLOR_ATTACHMENT1,
                glow::COLOR_ATTACHMENT2
            ]
        );
        assert!(draw_buffer_list(0).is_empty());
    }

    proptest! {
        #[test]
        fn placement_keeps_slots_contiguous(ops in proptest::collection::vec(0usize..8, 0..32)) {
            let mut slots: Vec<usize> = Vec::new();
            for (i, slot) in ops.into_iter().enumerate() {
                let before = slots.len();
                match place_attachment(&mut slots, i, slot) {
                    Ok(()) => {
                        prop_assert!(slot <= before);
                        prop_assert_eq!(slots[slot], i);
                        prop_assert_eq!(slots.len(), before.max(slot + 1));
                    }
                    Err(GpuError::AttachmentSequence { slot: s, attached }) => {
                        prop_assert!(s > before);
                        prop_assert_eq!(attached, before);
                        prop_assert_eq!(slots.len(), before);
                    }
                    Err(other) => prop_assert!(false, "unexpected error {other:?}"),
                }
            }
        }
    }

    #[test]
    #[cfg(feature = "headless")]
    #[ignore = "requires GL context"]
    fn bind_without_attachments_fails_first() {
        let ctx = RenderContext::initialize().unwrap();
        let framebuffer = Framebuffer::new(&ctx, 4, 4, false).unwrap();
        assert!(matches!(
            framebuffer.bind(),
            Err(GpuError::NoColorAttachments)
        ));
    }
}

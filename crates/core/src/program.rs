//! Linked shader programs and draw submission.
//!
//! A [`Program`] moves through `Empty -> Composing -> Linked` as shaders are
//! appended and linked. Once linked and in use, attributes and uniforms are
//! bound by name for one draw; [`Program::render`] and
//! [`Program::render_arrays`] submit the draw and then clear the per-draw
//! state (enabled attribute arrays, texture units) on every path, including
//! failed draws. Buffers, textures and shaders are never destroyed by a draw.

use std::mem;
use std::rc::Rc;

use crate::buffer::{IndexBuffer, Topology, VertexBuffer};
use crate::context::{RenderContext, SharedGl};
use crate::error::{check_error, GpuError};
use crate::shader::{Shader, ShaderError};
use crate::texture::Texture;
use crate::uniform::{apply, resolve, AsUniform, UniformMatrix};

/// Link progress of a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    /// No shader attached yet.
    Empty,
    /// Shaders attached, not linked.
    Composing,
    /// Linked; attribute and uniform names resolve.
    Linked,
}

/// Converts a buffer's component count to the `GLsizei` a draw call takes.
///
/// # Errors
///
/// [`GpuError::DrawCount`] when `count` does not fit in an `i32`.
pub fn draw_count(count: usize) -> Result<i32, GpuError> {
    i32::try_from(count).map_err(|_| GpuError::DrawCount { count })
}

/// A shader program plus the transient bindings of the next draw.
pub struct Program {
    gl: Rc<SharedGl>,
    handle: glow::Program,
    shaders: Vec<Rc<Shader>>,
    state: ProgramState,
    active_attributes: Vec<(u32, Rc<VertexBuffer>)>,
    active_textures: Vec<Rc<Texture>>,
}

impl Program {
    /// Creates an empty program.
    ///
    /// # Errors
    ///
    /// [`GpuError::Allocation`] if the driver refuses a handle.
    #[allow(unsafe_code)]
    pub fn new(ctx: &RenderContext) -> Result<Self, GpuError> {
        use glow::HasContext;

        let gl = Rc::clone(ctx.gl());
        // SAFETY: the context is current.
        let handle = unsafe { gl.create_program() }.map_err(GpuError::allocation("program"))?;
        check_error(&gl, "glCreateProgram")?;

        Ok(Self {
            gl,
            handle,
            shaders: Vec::new(),
            state: ProgramState::Empty,
            active_attributes: Vec::new(),
            active_textures: Vec::new(),
        })
    }

    /// Attaches a compiled shader. The program keeps a reference until it
    /// is dropped.
    ///
    /// # Errors
    ///
    /// Returns a driver error from `glAttachShader`.
    #[allow(unsafe_code)]
    pub fn append(&mut self, shader: Rc<Shader>) -> Result<(), GpuError> {
        use glow::HasContext;

        // SAFETY: both handles are live.
        unsafe { self.gl.attach_shader(self.handle, shader.handle()) };
        check_error(&self.gl, "glAttachShader")?;

        self.shaders.push(shader);
        if self.state == ProgramState::Empty {
            self.state = ProgramState::Composing;
        }
        Ok(())
    }

    /// Attaches several shaders in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing [`append`](Self::append).
    pub fn append_all<I>(&mut self, shaders: I) -> Result<(), GpuError>
    where
        I: IntoIterator<Item = Rc<Shader>>,
    {
        shaders.into_iter().try_for_each(|s| self.append(s))
    }

    /// Links the attached shaders.
    ///
    /// # Errors
    ///
    /// [`ShaderError::Link`] with the driver's info log, or a driver error.
    #[allow(unsafe_code)]
    pub fn link(&mut self) -> Result<(), GpuError> {
        use glow::HasContext;

        // SAFETY: the handle is live; link status is queried before use.
        unsafe { self.gl.link_program(self.handle) };
        check_error(&self.gl, "glLinkProgram")?;

        let linked = unsafe { self.gl.get_program_link_status(self.handle) };
        if !linked {
            let info_log = unsafe { self.gl.get_program_info_log(self.handle) };
            return Err(ShaderError::Link(info_log).into());
        }

        self.state = ProgramState::Linked;
        log::debug!("linked program with {} shaders", self.shaders.len());
        Ok(())
    }

    /// Makes this the current program.
    ///
    /// # Errors
    ///
    /// Returns a driver error from `glUseProgram` (e.g. when not linked).
    #[allow(unsafe_code)]
    pub fn use_program(&self) -> Result<(), GpuError> {
        use glow::HasContext;

        // SAFETY: the handle is live.
        unsafe { self.gl.use_program(Some(self.handle)) };
        check_error(&self.gl, "glUseProgram")
    }

    /// Resolves an active uniform by name.
    ///
    /// # Errors
    ///
    /// [`GpuError::UnknownUniform`] if the linked program has no such uniform.
    #[allow(unsafe_code)]
    pub fn uniform_location(&self, name: &str) -> Result<glow::UniformLocation, GpuError> {
        use glow::HasContext;

        // SAFETY: the handle is live.
        let location = unsafe { self.gl.get_uniform_location(self.handle, name) };
        check_error(&self.gl, "glGetUniformLocation")?;

        location.ok_or_else(|| GpuError::UnknownUniform(name.to_string()))
    }

    /// Binds `buffer` to the named attribute for the next draw.
    ///
    /// Precondition: linked.
    /// Binding: leaves `buffer` bound to `ARRAY_BUFFER`.
    ///
    /// # Errors
    ///
    /// [`GpuError::UnknownAttribute`] or a driver error.
    #[allow(unsafe_code)]
    pub fn attribute(&mut self, name: &str, buffer: &Rc<VertexBuffer>) -> Result<(), GpuError> {
        use glow::HasContext;

        // SAFETY: the handle is live.
        let location = unsafe { self.gl.get_attrib_location(self.handle, name) };
        check_error(&self.gl, "glGetAttribLocation")?;

        let location = location.ok_or_else(|| GpuError::UnknownAttribute(name.to_string()))?;
        buffer.bind_as_vertex_attribute(location)?;
        self.active_attributes.push((location, Rc::clone(buffer)));
        Ok(())
    }

    /// Sets an `int` (or sampler) uniform.
    ///
    /// Precondition: this program is in use.
    ///
    /// # Errors
    ///
    /// [`GpuError::UnknownUniform`] or a driver error.
    #[allow(unsafe_code)]
    pub fn set_int(&self, name: &str, value: i32) -> Result<(), GpuError> {
        use glow::HasContext;

        let location = self.uniform_location(name)?;
        // SAFETY: the location belongs to this program.
        unsafe { self.gl.uniform_1_i32(Some(&location), value) };
        check_error(&self.gl, "glUniform1i")
    }

    /// Sets an integer uniform from an unsigned value; same entry point as
    /// [`set_int`](Self::set_int).
    ///
    /// # Errors
    ///
    /// See [`set_int`](Self::set_int).
    pub fn set_uint(&self, name: &str, value: u32) -> Result<(), GpuError> {
        self.set_int(name, value as i32)
    }

    /// Sets a `float` uniform.
    ///
    /// Precondition: this program is in use.
    ///
    /// # Errors
    ///
    /// [`GpuError::UnknownUniform`] or a driver error.
    #[allow(unsafe_code)]
    pub fn set_float(&self, name: &str, value: f32) -> Result<(), GpuError> {
        use glow::HasContext;

        let location = self.uniform_location(name)?;
        // SAFETY: the location belongs to this program.
        unsafe { self.gl.uniform_1_f32(Some(&location), value) };
        check_error(&self.gl, "glUniform1f")
    }

    /// Binds `texture` to the next free texture unit and points the named
    /// sampler at it. Units are assigned in call order from 0 and released
    /// after the next draw.
    ///
    /// Precondition: this program is in use.
    /// Binding: changes the active texture unit and that unit's binding.
    ///
    /// # Errors
    ///
    /// [`GpuError::UnknownUniform`] or a driver error.
    #[allow(unsafe_code)]
    pub fn set_texture(&mut self, name: &str, texture: Rc<Texture>) -> Result<(), GpuError> {
        use glow::HasContext;

        let unit = self.active_textures.len() as u32;
        self.set_uint(name, unit)?;

        // SAFETY: TEXTURE0 + unit stays below the driver's unit count for
        // any realistic number of samplers; GL reports otherwise.
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) };
        check_error(&self.gl, "glActiveTexture")?;

        texture.bind()?;
        self.active_textures.push(texture);
        Ok(())
    }

    /// Sets a float vector or matrix uniform, dispatching on its shape.
    ///
    /// Precondition: this program is in use.
    ///
    /// # Errors
    ///
    /// [`GpuError::UnknownUniform`], [`GpuError::UniformShape`],
    /// [`GpuError::UniformDataLength`] or a driver error.
    pub fn set_uniform(&self, name: &str, value: &UniformMatrix<'_>) -> Result<(), GpuError> {
        let location = self.uniform_location(name)?;
        self.set_uniform_at(&location, value)
    }

    /// Like [`set_uniform`](Self::set_uniform) for an already resolved location.
    ///
    /// # Errors
    ///
    /// See [`set_uniform`](Self::set_uniform).
    pub fn set_uniform_at(
        &self,
        location: &glow::UniformLocation,
        value: &UniformMatrix<'_>,
    ) -> Result<(), GpuError> {
        let (op, data) = resolve(value)?;
        apply(&self.gl, location, op, &data)
    }

    /// Sets a glam vector/matrix or `f32` uniform.
    ///
    /// # Errors
    ///
    /// See [`set_uniform`](Self::set_uniform).
    pub fn set_value<T: AsUniform>(&self, name: &str, value: &T) -> Result<(), GpuError> {
        self.set_uniform(name, &value.as_uniform())
    }

    /// Draws the bound attributes indexed by `indices`, using its topology
    /// and `elements * dimension` indices.
    ///
    /// Precondition: this program is in use and a framebuffer is bound.
    /// Binding: leaves `indices` as the index source; attribute arrays are
    /// disabled and texture unit 0 is active afterwards.
    ///
    /// # Errors
    ///
    /// Any error from enabling attributes, binding, drawing or cleanup; the
    /// first one wins, cleanup always runs.
    #[allow(unsafe_code)]
    pub fn render(&mut self, indices: &IndexBuffer) -> Result<(), GpuError> {
        use glow::HasContext;

        self.draw_scoped(|program| {
            let count = draw_count(indices.component_count())?;
            indices.bind_as_index_source()?;
            // SAFETY: the index buffer is bound and holds component_count()
            // values of value_type().
            unsafe {
                program.gl.draw_elements(
                    indices.topology().gl_enum(),
                    count,
                    indices.value_type().gl_enum(),
                    0,
                );
            }
            check_error(&program.gl, "glDrawElements")
        })
    }

    /// Binds `vertices` to `attribute` and draws `elements * dimension`
    /// vertices as `topology`, without an index buffer.
    ///
    /// Precondition: this program is in use and a framebuffer is bound.
    ///
    /// # Errors
    ///
    /// [`GpuError::UnknownAttribute`] or any draw error; cleanup always runs.
    #[allow(unsafe_code)]
    pub fn render_arrays(
        &mut self,
        vertices: &Rc<VertexBuffer>,
        attribute: &str,
        topology: Topology,
    ) -> Result<(), GpuError> {
        use glow::HasContext;

        let bound = self.attribute(attribute, vertices);
        if bound.is_err() {
            return bound.and(self.clear_draw_state());
        }

        self.draw_scoped(|program| {
            let count = draw_count(vertices.component_count())?;
            // SAFETY: every enabled attribute points at a live buffer.
            unsafe { program.gl.draw_arrays(topology.gl_enum(), 0, count) };
            check_error(&program.gl, "glDrawArrays")
        })
    }

    /// Enables the active attributes, runs `draw`, then clears per-draw
    /// state whatever the outcome.
    fn draw_scoped<F>(&mut self, draw: F) -> Result<(), GpuError>
    where
        F: FnOnce(&Self) -> Result<(), GpuError>,
    {
        let drawn = self.enable_attributes().and_then(|()| draw(&*self));
        let cleared = self.clear_draw_state();
        drawn.and(cleared)
    }

    #[allow(unsafe_code)]
    fn enable_attributes(&self) -> Result<(), GpuError> {
        use glow::HasContext;

        for (location, _) in &self.active_attributes {
            // SAFETY: the location was resolved from this program.
            unsafe { self.gl.enable_vertex_attrib_array(*location) };
            check_error(&self.gl, "glEnableVertexAttribArray")?;
        }
        Ok(())
    }

    /// Disables and forgets the active attributes; if any texture was bound
    /// for the draw, forgets the textures and reactivates unit 0.
    #[allow(unsafe_code)]
    fn clear_draw_state(&mut self) -> Result<(), GpuError> {
        use glow::HasContext;

        let attributes = mem::take(&mut self.active_attributes);
        let textures = mem::take(&mut self.active_textures);

        for (location, _) in &attributes {
            // SAFETY: the location was resolved from this program.
            unsafe { self.gl.disable_vertex_attrib_array(*location) };
            check_error(&self.gl, "glDisableVertexAttribArray")?;
        }

        if !textures.is_empty() {
            // SAFETY: TEXTURE0 always exists.
            unsafe { self.gl.active_texture(glow::TEXTURE0) };
            check_error(&self.gl, "glActiveTexture")?;
        }
        Ok(())
    }

    pub fn state(&self) -> ProgramState {
        self.state
    }

    /// Shaders attached so far, in append order.
    pub fn shaders(&self) -> &[Rc<Shader>] {
        &self.shaders
    }

    /// Number of attributes bound for the next draw.
    pub fn active_attribute_count(&self) -> usize {
        self.active_attributes.len()
    }

    /// Number of texture units assigned for the next draw.
    pub fn active_texture_count(&self) -> usize {
        self.active_textures.len()
    }

    pub fn handle(&self) -> glow::Program {
        self.handle
    }
}

impl Drop for Program {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        use glow::HasContext;

        // SAFETY: the program handle is owned by this wrapper; shaders are
        // only detached, their own Rc decides when they are deleted.
        unsafe {
            for shader in &self.shaders {
                self.gl.detach_shader(self.handle, shader.handle());
            }
            self.gl.delete_program(self.handle);
        }
        log::trace!("released program");
    }
}

//! GPU buffers holding typed, dimensioned numeric data.
//!
//! A [`Buffer`] records the shape of its last upload (element count,
//! components per element, value type) so that attribute binding and draw
//! calls can describe the data to the driver without the caller repeating it.
//! [`VertexBuffer`] feeds vertex attributes; [`IndexBuffer`] feeds indexed
//! draws and carries the primitive topology used at draw time.

use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::context::{RenderContext, SharedGl};
use crate::error::{check_error, GpuError};

/// Numeric type of each buffer component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    HalfFloat,
    Float,
    Double,
    Fixed,
}

impl ValueType {
    /// The GL type enum.
    pub fn gl_enum(self) -> u32 {
        match self {
            ValueType::Byte => glow::BYTE,
            ValueType::UnsignedByte => glow::UNSIGNED_BYTE,
            ValueType::Short => glow::SHORT,
            ValueType::UnsignedShort => glow::UNSIGNED_SHORT,
            ValueType::Int => glow::INT,
            ValueType::UnsignedInt => glow::UNSIGNED_INT,
            ValueType::HalfFloat => glow::HALF_FLOAT,
            ValueType::Float => glow::FLOAT,
            ValueType::Double => glow::DOUBLE,
            ValueType::Fixed => glow::FIXED,
        }
    }

    /// Size of one component in bytes.
    pub fn size(self) -> usize {
        match self {
            ValueType::Byte | ValueType::UnsignedByte => 1,
            ValueType::Short | ValueType::UnsignedShort | ValueType::HalfFloat => 2,
            ValueType::Int | ValueType::UnsignedInt | ValueType::Float | ValueType::Fixed => 4,
            ValueType::Double => 8,
        }
    }
}

/// Host types that can be uploaded without naming a [`ValueType`].
pub trait BufferElement: bytemuck::Pod {
    /// The value type recorded for uploads of this type.
    const VALUE_TYPE: ValueType;
}

macro_rules! buffer_element {
    ($($ty:ty => $value:ident),* $(,)?) => {
        $(impl BufferElement for $ty {
            const VALUE_TYPE: ValueType = ValueType::$value;
        })*
    };
}

buffer_element! {
    i8 => Byte,
    u8 => UnsignedByte,
    i16 => Short,
    u16 => UnsignedShort,
    i32 => Int,
    u32 => UnsignedInt,
    f32 => Float,
    f64 => Double,
}

/// Which binding point a buffer is uploaded through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
}

impl BufferKind {
    /// The GL buffer target for this kind.
    pub fn target(self) -> u32 {
        match self {
            BufferKind::Vertex => glow::ARRAY_BUFFER,
            BufferKind::Index => glow::ELEMENT_ARRAY_BUFFER,
        }
    }
}

/// How consecutive vertices are assembled into primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    Points,
    Lines,
    LineStrip,
    LineLoop,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl Topology {
    /// The GL draw mode enum.
    pub fn gl_enum(self) -> u32 {
        match self {
            Topology::Points => glow::POINTS,
            Topology::Lines => glow::LINES,
            Topology::LineStrip => glow::LINE_STRIP,
            Topology::LineLoop => glow::LINE_LOOP,
            Topology::Triangles => glow::TRIANGLES,
            Topology::TriangleStrip => glow::TRIANGLE_STRIP,
            Topology::TriangleFan => glow::TRIANGLE_FAN,
        }
    }
}

/// Checks a declared upload shape against the byte length of the data and
/// returns the expected byte size.
///
/// # Errors
///
/// [`GpuError::BufferDimension`] when `dimension` is outside `1..=4`,
/// [`GpuError::BufferSize`] when `byte_len` differs from
/// `elements * dimension * value_type.size()`.
pub fn validate_upload(
    elements: usize,
    dimension: u8,
    value_type: ValueType,
    byte_len: usize,
) -> Result<usize, GpuError> {
    if !(1..=4).contains(&dimension) {
        return Err(GpuError::BufferDimension(dimension));
    }

    let expected = elements
        .checked_mul(usize::from(dimension))
        .and_then(|n| n.checked_mul(value_type.size()))
        .unwrap_or(usize::MAX);

    if expected != byte_len {
        return Err(GpuError::BufferSize {
            elements,
            dimension,
            expected,
            actual: byte_len,
        });
    }
    Ok(expected)
}

/// A block of GPU memory with a recorded element shape.
pub struct Buffer {
    gl: Rc<SharedGl>,
    handle: glow::Buffer,
    kind: BufferKind,
    elements: usize,
    dimension: u8,
    value_type: ValueType,
}

impl Buffer {
    /// Creates an empty buffer. Shape queries return zero until the first upload.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::Allocation`] if the driver refuses a handle.
    #[allow(unsafe_code)]
    pub fn new(ctx: &RenderContext, kind: BufferKind) -> Result<Self, GpuError> {
        use glow::HasContext;

        let gl = Rc::clone(ctx.gl());
        // SAFETY: the context is current; glGenBuffers has no other preconditions.
        let handle = unsafe { gl.create_buffer() }.map_err(GpuError::allocation("buffer"))?;
        check_error(&gl, "glGenBuffers")?;

        Ok(Self {
            gl,
            handle,
            kind,
            elements: 0,
            dimension: 0,
            value_type: ValueType::Float,
        })
    }

    /// Uploads `data`, replacing previous contents, with the value type
    /// implied by `T`.
    ///
    /// Binding: leaves this buffer bound to its kind's target.
    ///
    /// # Errors
    ///
    /// Shape validation errors (see [`validate_upload`]) or a driver error
    /// from `glBufferData`.
    pub fn upload<T: BufferElement>(
        &mut self,
        elements: usize,
        dimension: u8,
        data: &[T],
    ) -> Result<(), GpuError> {
        self.upload_bytes(elements, dimension, T::VALUE_TYPE, bytemuck::cast_slice(data))
    }

    /// Uploads raw bytes described as `elements` x `dimension` components of
    /// `value_type`. Used for types with no host equivalent (`HalfFloat`,
    /// `Fixed`).
    ///
    /// Binding: leaves this buffer bound to its kind's target.
    ///
    /// # Errors
    ///
    /// See [`Buffer::upload`].
    #[allow(unsafe_code)]
    pub fn upload_bytes(
        &mut self,
        elements: usize,
        dimension: u8,
        value_type: ValueType,
        bytes: &[u8],
    ) -> Result<(), GpuError> {
        use glow::HasContext;

        validate_upload(elements, dimension, value_type, bytes.len())?;

        let target = self.kind.target();
        // SAFETY: self.handle is a live buffer and `bytes` outlives the call.
        unsafe {
            self.gl.bind_buffer(target, Some(self.handle));
            self.gl.buffer_data_u8_slice(target, bytes, glow::STATIC_DRAW);
        }
        check_error(&self.gl, "glBufferData")?;

        self.elements = elements;
        self.dimension = dimension;
        self.value_type = value_type;
        log::trace!(
            "uploaded {elements}x{dimension} {value_type:?} to {:?} buffer",
            self.kind
        );
        Ok(())
    }

    /// Number of elements in the last upload.
    pub fn elements(&self) -> usize {
        self.elements
    }

    /// Components per element in the last upload.
    pub fn dimension(&self) -> u8 {
        self.dimension
    }

    /// Component type of the last upload.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Size of the last upload in bytes.
    pub fn byte_size(&self) -> usize {
        self.elements * usize::from(self.dimension) * self.value_type.size()
    }

    /// Number of components across all elements; the vertex or index count
    /// used by draw calls.
    pub fn component_count(&self) -> usize {
        self.elements * usize::from(self.dimension)
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn handle(&self) -> glow::Buffer {
        self.handle
    }

    pub(crate) fn gl(&self) -> &glow::Context {
        &self.gl
    }
}

impl Drop for Buffer {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        use glow::HasContext;

        // SAFETY: the handle is owned exclusively by this wrapper.
        unsafe { self.gl.delete_buffer(self.handle) };
        log::trace!("released {:?} buffer", self.kind);
    }
}

/// A buffer whose contents feed a vertex attribute.
pub struct VertexBuffer {
    buffer: Buffer,
}

impl VertexBuffer {
    /// Creates an empty vertex buffer.
    ///
    /// # Errors
    ///
    /// See [`Buffer::new`].
    pub fn new(ctx: &RenderContext) -> Result<Self, GpuError> {
        Ok(Self {
            buffer: Buffer::new(ctx, BufferKind::Vertex)?,
        })
    }

    /// Binds the buffer and describes its layout (dimension, value type,
    /// tightly packed, not normalized) to attribute slot `index`.
    ///
    /// Precondition: the program that owns `index` is linked.
    /// Binding: leaves this buffer bound to `ARRAY_BUFFER`; the attribute
    /// array itself stays disabled until a draw enables it.
    ///
    /// # Errors
    ///
    /// Returns a driver error from `glVertexAttribPointer`.
    #[allow(unsafe_code)]
    pub fn bind_as_vertex_attribute(&self, index: u32) -> Result<(), GpuError> {
        use glow::HasContext;

        let gl = self.buffer.gl();
        // SAFETY: the buffer handle is live; offset 0 is within any upload.
        unsafe {
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.buffer.handle()));
            gl.vertex_attrib_pointer_f32(
                index,
                i32::from(self.buffer.dimension()),
                self.buffer.value_type().gl_enum(),
                false,
                0,
                0,
            );
        }
        check_error(gl, "glVertexAttribPointer")
    }
}

impl Deref for VertexBuffer {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

impl DerefMut for VertexBuffer {
    fn deref_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }
}

/// A buffer of vertex indices with the topology used to draw them.
pub struct IndexBuffer {
    buffer: Buffer,
    topology: Topology,
}

impl IndexBuffer {
    /// Creates an empty index buffer drawn as a triangle list.
    ///
    /// # Errors
    ///
    /// See [`Buffer::new`].
    pub fn new(ctx: &RenderContext) -> Result<Self, GpuError> {
        Self::with_topology(ctx, Topology::Triangles)
    }

    /// Creates an empty index buffer drawn with `topology`.
    ///
    /// # Errors
    ///
    /// See [`Buffer::new`].
    pub fn with_topology(ctx: &RenderContext, topology: Topology) -> Result<Self, GpuError> {
        Ok(Self {
            buffer: Buffer::new(ctx, BufferKind::Index)?,
            topology,
        })
    }

    /// Binds the buffer as the index source of the next draw.
    ///
    /// Binding: `ELEMENT_ARRAY_BUFFER` is per-VAO state, so this replaces the
    /// index source of the context's default vertex array.
    ///
    /// # Errors
    ///
    /// Returns a driver error from `glBindBuffer`.
    #[allow(unsafe_code)]
    pub fn bind_as_index_source(&self) -> Result<(), GpuError> {
        use glow::HasContext;

        let gl = self.buffer.gl();
        // SAFETY: the buffer handle is live.
        unsafe { gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(self.buffer.handle())) };
        check_error(gl, "glBindBuffer")
    }

    /// The primitive topology used when drawing with this buffer.
    pub fn topology(&self) -> Topology {
        self.topology
    }
}

impl Deref for IndexBuffer {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

impl DerefMut for IndexBuffer {
    fn deref_mut(&mut self) -> &mut Buffer {
        &mut self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_sizes_match_gl() {
        assert_eq!(ValueType::Byte.size(), 1);
        assert_eq!(ValueType::HalfFloat.size(), 2);
        assert_eq!(ValueType::Float.size(), 4);
        assert_eq!(ValueType::UnsignedInt.size(), 4);
        assert_eq!(ValueType::Double.size(), 8);
    }

    #[test]
    fn host_types_imply_value_types() {
        assert_eq!(<f32 as BufferElement>::VALUE_TYPE, ValueType::Float);
        assert_eq!(<u32 as BufferElement>::VALUE_TYPE, ValueType::UnsignedInt);
        assert_eq!(<f64 as BufferElement>::VALUE_TYPE, ValueType::Double);
        assert_eq!(<u16 as BufferElement>::VALUE_TYPE, ValueType::UnsignedShort);
    }

    #[test]
    fn element_value_type_size_matches_host_size() {
        fn check<T: BufferElement>() {
            assert_eq!(T::VALUE_TYPE.size(), std::mem::size_of::<T>());
        }
        check::<i8>();
        check::<u8>();
        check::<i16>();
        check::<u16>();
        check::<i32>();
        check::<u32>();
        check::<f32>();
        check::<f64>();
    }

    #[test]
    fn buffer_kind_targets() {
        assert_eq!(BufferKind::Vertex.target(), glow::ARRAY_BUFFER);
        assert_eq!(BufferKind::Index.target(), glow::ELEMENT_ARRAY_BUFFER);
    }

    #[test]
    fn topology_defaults_to_triangle_list() {
        assert_eq!(Topology::default(), Topology::Triangles);
        assert_eq!(Topology::default().gl_enum(), glow::TRIANGLES);
    }

    #[test]
    fn validate_upload_accepts_exact_size() {
        // Three vec3 positions as f32.
        let size = validate_upload(3, 3, ValueType::Float, 36).unwrap();
        assert_eq!(size, 36);
    }

    #[test]
    fn validate_upload_rejects_short_data() {
        let err = validate_upload(3, 3, ValueType::Float, 32).unwrap_err();
        match err {
            GpuError::BufferSize {
                expected, actual, ..
            } => {
                assert_eq!(expected, 36);
                assert_eq!(actual, 32);
            }
            other => panic!("expected BufferSize, got {other:?}"),
        }
    }

    #[test]
    fn validate_upload_rejects_dimension_out_of_range() {
        assert!(matches!(
            validate_upload(1, 0, ValueType::Float, 0),
            Err(GpuError::BufferDimension(0))
        ));
        assert!(matches!(
            validate_upload(1, 5, ValueType::Float, 20),
            Err(GpuError::BufferDimension(5))
        ));
    }

    #[test]
    fn validate_upload_overflow_never_matches() {
        let err = validate_upload(usize::MAX, 4, ValueType::Double, 0).unwrap_err();
        assert!(matches!(err, GpuError::BufferSize { .. }));
    }

    #[test]
    fn validate_upload_allows_empty_buffers() {
        assert_eq!(validate_upload(0, 2, ValueType::Float, 0).unwrap(), 0);
    }
}

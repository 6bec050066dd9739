//! Shape-based dispatch of float vector and matrix uniforms.
//!
//! A [`UniformMatrix`] is a run of `f32`s described as `array_length`
//! consecutive `rows x cols` matrices. [`resolve`] picks the one
//! `glUniform*` entry point ([`UniformOp`]) that accepts that shape and
//! returns the data in column-major order, which is what GL expects:
//!
//! - `cols == 1` is a vector of `rows` components (1–4);
//! - `cols` in 2–4 with `rows` in 2–4 is a matrix, non-square shapes
//!   included (a 3-row, 2-column matrix goes to `glUniformMatrix2x3fv`);
//! - everything else is a [`GpuError::UniformShape`].

use std::borrow::Cow;

use glam::{Mat2, Mat3, Mat4, Vec2, Vec3, Vec4};

use crate::error::{check_error, GpuError};

/// Memory layout of matrix elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixOrder {
    /// Elements stored column by column; what GL consumes.
    #[default]
    ColumnMajor,
    /// Elements stored row by row; transposed before upload.
    RowMajor,
}

/// The `glUniform*` entry point for a shape. Matrix variants use GL naming,
/// columns first: `Mat2x3` is two columns of three rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformOp {
    Vec1,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat2x3,
    Mat2x4,
    Mat3x2,
    Mat3,
    Mat3x4,
    Mat4x2,
    Mat4x3,
    Mat4,
}

impl UniformOp {
    /// `(rows, cols)` accepted by this entry point.
    pub fn shape(self) -> (usize, usize) {
        match self {
            UniformOp::Vec1 => (1, 1),
            UniformOp::Vec2 => (2, 1),
            UniformOp::Vec3 => (3, 1),
            UniformOp::Vec4 => (4, 1),
            UniformOp::Mat2 => (2, 2),
            UniformOp::Mat2x3 => (3, 2),
            UniformOp::Mat2x4 => (4, 2),
            UniformOp::Mat3x2 => (2, 3),
            UniformOp::Mat3 => (3, 3),
            UniformOp::Mat3x4 => (4, 3),
            UniformOp::Mat4x2 => (2, 4),
            UniformOp::Mat4x3 => (3, 4),
            UniformOp::Mat4 => (4, 4),
        }
    }

    /// Number of floats in one element of this shape.
    pub fn floats(self) -> usize {
        let (rows, cols) = self.shape();
        rows * cols
    }
}

/// Selects the entry point for `array_length` matrices of `rows x cols`.
///
/// # Errors
///
/// [`GpuError::UniformShape`] carrying the given values when no entry point
/// matches, or when `array_length` is zero.
pub fn select_op(rows: usize, cols: usize, array_length: usize) -> Result<UniformOp, GpuError> {
    let op = match (cols, rows) {
        _ if array_length == 0 => None,
        (1, 1) => Some(UniformOp::Vec1),
        (1, 2) => Some(UniformOp::Vec2),
        (1, 3) => Some(UniformOp::Vec3),
        (1, 4) => Some(UniformOp::Vec4),
        (2, 2) => Some(UniformOp::Mat2),
        (2, 3) => Some(UniformOp::Mat2x3),
        (2, 4) => Some(UniformOp::Mat2x4),
        (3, 2) => Some(UniformOp::Mat3x2),
        (3, 3) => Some(UniformOp::Mat3),
        (3, 4) => Some(UniformOp::Mat3x4),
        (4, 2) => Some(UniformOp::Mat4x2),
        (4, 3) => Some(UniformOp::Mat4x3),
        (4, 4) => Some(UniformOp::Mat4),
        _ => None,
    };

    op.ok_or(GpuError::UniformShape {
        rows,
        cols,
        array_length,
    })
}

/// Reorders `array_length` row-major `rows x cols` matrices into
/// column-major order, each matrix independently.
///
/// `data` must hold exactly `rows * cols * array_length` floats.
pub fn to_column_major(data: &[f32], rows: usize, cols: usize, array_length: usize) -> Vec<f32> {
    let stride = rows * cols;
    let mut out = Vec::with_capacity(stride * array_length);
    for matrix in data.chunks_exact(stride).take(array_length) {
        for c in 0..cols {
            for r in 0..rows {
                out.push(matrix[r * cols + c]);
            }
        }
    }
    out
}

/// Float data with the shape needed to pick a uniform entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformMatrix<'a> {
    pub data: Cow<'a, [f32]>,
    pub rows: usize,
    pub cols: usize,
    pub order: MatrixOrder,
    /// How many same-shaped matrices are packed back to back in `data`.
    pub array_length: usize,
}

impl<'a> UniformMatrix<'a> {
    /// One column-major `rows x cols` matrix.
    pub fn column_major(data: impl Into<Cow<'a, [f32]>>, rows: usize, cols: usize) -> Self {
        Self {
            data: data.into(),
            rows,
            cols,
            order: MatrixOrder::ColumnMajor,
            array_length: 1,
        }
    }

    /// One row-major `rows x cols` matrix.
    pub fn row_major(data: impl Into<Cow<'a, [f32]>>, rows: usize, cols: usize) -> Self {
        Self {
            order: MatrixOrder::RowMajor,
            ..Self::column_major(data, rows, cols)
        }
    }

    /// Declares `data` to hold `array_length` matrices instead of one.
    pub fn with_array_length(mut self, array_length: usize) -> Self {
        self.array_length = array_length;
        self
    }

    /// An array uniform of 4x4 matrices.
    pub fn from_mat4_array(matrices: &[Mat4]) -> UniformMatrix<'static> {
        let data: Vec<f32> = matrices.iter().flat_map(|m| m.to_cols_array()).collect();
        UniformMatrix::column_major(data, 4, 4).with_array_length(matrices.len())
    }
}

/// Resolves `matrix` to its entry point and column-major data.
///
/// Row-major input is transposed and resolved again, so it dispatches
/// exactly like the equivalent column-major input.
///
/// # Errors
///
/// [`GpuError::UniformShape`] for unsupported shapes,
/// [`GpuError::UniformDataLength`] when `data` does not hold
/// `rows * cols * array_length` floats.
pub fn resolve<'m>(matrix: &'m UniformMatrix<'_>) -> Result<(UniformOp, Cow<'m, [f32]>), GpuError> {
    let op = select_op(matrix.rows, matrix.cols, matrix.array_length)?;

    let expected = op.floats() * matrix.array_length;
    if matrix.data.len() != expected {
        return Err(GpuError::UniformDataLength {
            expected,
            actual: matrix.data.len(),
        });
    }

    match matrix.order {
        MatrixOrder::ColumnMajor => Ok((op, Cow::Borrowed(&matrix.data[..]))),
        MatrixOrder::RowMajor => {
            let transposed = UniformMatrix::column_major(
                to_column_major(&matrix.data, matrix.rows, matrix.cols, matrix.array_length),
                matrix.rows,
                matrix.cols,
            )
            .with_array_length(matrix.array_length);
            let (op, data) = resolve(&transposed)?;
            Ok((op, Cow::Owned(data.into_owned())))
        }
    }
}

/// Uploads resolved uniform data to `location` of the program in use.
///
/// Precondition: the owning program is the current program.
///
/// # Errors
///
/// Returns a driver error from the `glUniform*` call.
#[allow(unsafe_code)]
pub(crate) fn apply(
    gl: &glow::Context,
    location: &glow::UniformLocation,
    op: UniformOp,
    data: &[f32],
) -> Result<(), GpuError> {
    use glow::HasContext;

    let loc = Some(location);
    // SAFETY: `data` holds a whole number of `op`-shaped elements (checked
    // in resolve()); glow derives the array count from the slice length.
    unsafe {
        match op {
            UniformOp::Vec1 => gl.uniform_1_f32_slice(loc, data),
            UniformOp::Vec2 => gl.uniform_2_f32_slice(loc, data),
            UniformOp::Vec3 => gl.uniform_3_f32_slice(loc, data),
            UniformOp::Vec4 => gl.uniform_4_f32_slice(loc, data),
            UniformOp::Mat2 => gl.uniform_matrix_2_f32_slice(loc, false, data),
            UniformOp::Mat2x3 => gl.uniform_matrix_2x3_f32_slice(loc, false, data),
            UniformOp::Mat2x4 => gl.uniform_matrix_2x4_f32_slice(loc, false, data),
            UniformOp::Mat3x2 => gl.uniform_matrix_3x2_f32_slice(loc, false, data),
            UniformOp::Mat3 => gl.uniform_matrix_3_f32_slice(loc, false, data),
            UniformOp::Mat3x4 => gl.uniform_matrix_3x4_f32_slice(loc, false, data),
            UniformOp::Mat4x2 => gl.uniform_matrix_4x2_f32_slice(loc, false, data),
            UniformOp::Mat4x3 => gl.uniform_matrix_4x3_f32_slice(loc, false, data),
            UniformOp::Mat4 => gl.uniform_matrix_4_f32_slice(loc, false, data),
        }
    }
    check_error(gl, "glUniform*fv")
}

/// Values that can be set as a float uniform.
pub trait AsUniform {
    fn as_uniform(&self) -> UniformMatrix<'_>;
}

impl AsUniform for f32 {
    fn as_uniform(&self) -> UniformMatrix<'_> {
        UniformMatrix::column_major(std::slice::from_ref(self), 1, 1)
    }
}

impl AsUniform for Vec2 {
    fn as_uniform(&self) -> UniformMatrix<'_> {
        UniformMatrix::column_major(self.to_array().to_vec(), 2, 1)
    }
}

impl AsUniform for Vec3 {
    fn as_uniform(&self) -> UniformMatrix<'_> {
        UniformMatrix::column_major(self.to_array().to_vec(), 3, 1)
    }
}

impl AsUniform for Vec4 {
    fn as_uniform(&self) -> UniformMatrix<'_> {
        UniformMatrix::column_major(self.to_array().to_vec(), 4, 1)
    }
}

impl AsUniform for Mat2 {
    fn as_uniform(&self) -> UniformMatrix<'_> {
        UniformMatrix::column_major(self.to_cols_array().to_vec(), 2, 2)
    }
}

impl AsUniform for Mat3 {
    fn as_uniform(&self) -> UniformMatrix<'_> {
        UniformMatrix::column_major(self.to_cols_array().to_vec(), 3, 3)
    }
}

impl AsUniform for Mat4 {
    fn as_uniform(&self) -> UniformMatrix<'_> {
        UniformMatrix::column_major(self.to_cols_array().to_vec(), 4, 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_OPS: [UniformOp; 13] = [
        UniformOp::Vec1,
        UniformOp::Vec2,
        UniformOp::Vec3,
        UniformOp::Vec4,
        UniformOp::Mat2,
        UniformOp::Mat2x3,
        UniformOp::Mat2x4,
        UniformOp::Mat3x2,
        UniformOp::Mat3,
        UniformOp::Mat3x4,
        UniformOp::Mat4x2,
        UniformOp::Mat4x3,
        UniformOp::Mat4,
    ];

    #[test]
    fn every_op_is_selected_by_its_own_shape() {
        for op in ALL_OPS {
            let (rows, cols) = op.shape();
            assert_eq!(select_op(rows, cols, 1).unwrap(), op, "shape {rows}x{cols}");
        }
    }

    #[test]
    fn non_square_shapes_are_not_forced_square() {
        // 3 rows, 2 columns -> glUniformMatrix2x3fv
        assert_eq!(select_op(3, 2, 1).unwrap(), UniformOp::Mat2x3);
        assert_eq!(select_op(2, 3, 1).unwrap(), UniformOp::Mat3x2);
        assert_eq!(select_op(3, 4, 1).unwrap(), UniformOp::Mat4x3);
        assert_eq!(select_op(4, 3, 1).unwrap(), UniformOp::Mat3x4);
    }

    #[test]
    fn one_row_matrix_is_a_shape_error() {
        match select_op(1, 2, 1) {
            Err(GpuError::UniformShape {
                rows,
                cols,
                array_length,
            }) => assert_eq!((rows, cols, array_length), (1, 2, 1)),
            other => panic!("expected UniformShape, got {other:?}"),
        }
    }

    #[test]
    fn zero_array_length_is_a_shape_error() {
        assert!(matches!(
            select_op(4, 4, 0),
            Err(GpuError::UniformShape {
                array_length: 0,
                ..
            })
        ));
    }

    #[test]
    fn to_column_major_transposes_each_matrix() {
        // Row-major 2x3:
        // [1 2 3]
        // [4 5 6]
        let row_major = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(
            to_column_major(&row_major, 2, 3, 1),
            vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]
        );

        let two = [1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0];
        assert_eq!(
            to_column_major(&two, 2, 2, 2),
            vec![1.0, 3.0, 2.0, 4.0, 10.0, 30.0, 20.0, 40.0]
        );
    }

    #[test]
    fn resolve_passes_column_major_data_through() {
        let data = [0.0_f32; 6];
        let m = UniformMatrix::column_major(&data[..], 3, 2);
        let (op, out) = resolve(&m).unwrap();
        assert_eq!(op, UniformOp::Mat2x3);
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn resolve_rejects_wrong_data_length() {
        let data = [0.0_f32; 15];
        let m = UniformMatrix::column_major(&data[..], 4, 4);
        assert!(matches!(
            resolve(&m),
            Err(GpuError::UniformDataLength {
                expected: 16,
                actual: 15
            })
        ));
    }

    #[test]
    fn resolve_reports_shape_before_length() {
        let m = UniformMatrix::column_major(vec![0.0; 3], 5, 5);
        assert!(matches!(
            resolve(&m),
            Err(GpuError::UniformShape { rows: 5, cols: 5, .. })
        ));
    }

    #[test]
    fn array_length_scales_expected_data() {
        let matrices = [Mat4::IDENTITY, Mat4::from_scale(Vec3::splat(2.0))];
        let m = UniformMatrix::from_mat4_array(&matrices);
        assert_eq!(m.array_length, 2);
        let (op, data) = resolve(&m).unwrap();
        assert_eq!(op, UniformOp::Mat4);
        assert_eq!(data.len(), 32);
        assert_eq!(data[16], 2.0);
    }

    #[test]
    fn glam_values_resolve_to_matching_ops() {
        assert_eq!(resolve(&1.5_f32.as_uniform()).unwrap().0, UniformOp::Vec1);
        assert_eq!(resolve(&Vec2::ONE.as_uniform()).unwrap().0, UniformOp::Vec2);
        assert_eq!(resolve(&Vec3::ONE.as_uniform()).unwrap().0, UniformOp::Vec3);
        assert_eq!(resolve(&Vec4::ONE.as_uniform()).unwrap().0, UniformOp::Vec4);
        assert_eq!(resolve(&Mat2::IDENTITY.as_uniform()).unwrap().0, UniformOp::Mat2);
        assert_eq!(resolve(&Mat3::IDENTITY.as_uniform()).unwrap().0, UniformOp::Mat3);
        assert_eq!(resolve(&Mat4::IDENTITY.as_uniform()).unwrap().0, UniformOp::Mat4);
    }

    #[test]
    fn mat4_uniform_is_column_major() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let uniform = m.as_uniform();
        let (_, data) = resolve(&uniform).unwrap();
        assert_eq!(&data[12..15], &[1.0, 2.0, 3.0]);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn dispatch_accepts_exactly_the_supported_shapes(
                rows in 0_usize..=6,
                cols in 0_usize..=6,
                array_length in 1_usize..=8,
            ) {
                let supported = match cols {
                    1 => (1..=4).contains(&rows),
                    2..=4 => (2..=4).contains(&rows),
                    _ => false,
                };
                match select_op(rows, cols, array_length) {
                    Ok(op) => {
                        prop_assert!(supported, "{rows}x{cols} should be rejected");
                        prop_assert_eq!(op.shape(), (rows, cols));
                    }
                    Err(GpuError::UniformShape { rows: r, cols: c, array_length: n }) => {
                        prop_assert!(!supported, "{rows}x{cols} should be accepted");
                        prop_assert_eq!((r, c, n), (rows, cols, array_length));
                    }
                    Err(other) => prop_assert!(false, "unexpected error {other:?}"),
                }
            }

            #[test]
            fn row_major_dispatches_like_equivalent_column_major(
                rows in 1_usize..=4,
                cols in 1_usize..=4,
                array_length in 1_usize..=3,
                seed in proptest::collection::vec(-100.0_f32..100.0, 48),
            ) {
                prop_assume!(select_op(rows, cols, array_length).is_ok());
                let n = rows * cols * array_length;
                let row_major = &seed[..n];

                let via_row = UniformMatrix::row_major(row_major, rows, cols)
                    .with_array_length(array_length);
                let direct = UniformMatrix::column_major(
                    to_column_major(row_major, rows, cols, array_length),
                    rows,
                    cols,
                )
                .with_array_length(array_length);

                let (op_row, data_row) = resolve(&via_row).unwrap();
                let (op_col, data_col) = resolve(&direct).unwrap();
                prop_assert_eq!(op_row, op_col);
                prop_assert_eq!(data_row.as_ref(), data_col.as_ref());
            }

            #[test]
            fn transposing_twice_restores_data(
                rows in 1_usize..=4,
                cols in 1_usize..=4,
                seed in proptest::collection::vec(-100.0_f32..100.0, 16),
            ) {
                let data = &seed[..rows * cols];
                let once = to_column_major(data, rows, cols, 1);
                // Column-major rows x cols is row-major cols x rows.
                let twice = to_column_major(&once, cols, rows, 1);
                prop_assert_eq!(twice.as_slice(), data);
            }
        }
    }
}

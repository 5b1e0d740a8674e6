//! Minimal dense-matrix capability the denominator computation relies on.
//!
//! The engine only ever needs to allocate a matrix, exponentiate it in place,
//! accumulate a (possibly transposed) matrix product into it, and read or write
//! its entries row by row. Anything implementing [`DenseMatrix`] can carry the
//! network output, the denominators and both gradients; the CPU implementation
//! for [`ndarray::Array2<f64>`] lives here.

use ndarray::linalg::general_mat_mul;
use ndarray::{Array2, ArrayView2, ArrayViewMut2};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::{Error, Result};

/// Whether an operand of [`DenseMatrix::add_mat_mat`] is used as-is or transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixTranspose {
    NoTrans,
    Trans,
}

/// Backend matrix of `f64` values.
pub trait DenseMatrix: Sized {
    /// Allocates a `rows x cols` matrix. Contents are zero.
    fn allocate(rows: usize, cols: usize) -> Self;

    fn num_rows(&self) -> usize;

    fn num_cols(&self) -> usize;

    /// Read-only row-major view of the entries.
    fn view(&self) -> ArrayView2<'_, f64>;

    /// Mutable row-major view of the entries.
    fn view_mut(&mut self) -> ArrayViewMut2<'_, f64>;

    /// Replaces every entry `x` with `exp(x)`.
    fn apply_exp(&mut self);

    /// `self = alpha * op(a) * op(b) + beta * self`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the operand shapes do not line up.
    fn add_mat_mat(
        &mut self,
        alpha: f64,
        a: &Self,
        trans_a: MatrixTranspose,
        b: &Self,
        trans_b: MatrixTranspose,
        beta: f64,
    ) -> Result<()>;

    /// Fills the matrix with independent standard-normal samples drawn from `rng`.
    fn fill_randn<R: Rng + ?Sized>(&mut self, rng: &mut R);
}

fn apply_transpose(m: ArrayView2<'_, f64>, trans: MatrixTranspose) -> ArrayView2<'_, f64> {
    match trans {
        MatrixTranspose::NoTrans => m,
        MatrixTranspose::Trans => m.reversed_axes(),
    }
}

impl DenseMatrix for Array2<f64> {
    fn allocate(rows: usize, cols: usize) -> Self {
        Array2::zeros((rows, cols))
    }

    fn num_rows(&self) -> usize {
        self.nrows()
    }

    fn num_cols(&self) -> usize {
        self.ncols()
    }

    fn view(&self) -> ArrayView2<'_, f64> {
        ArrayView2::from(self)
    }

    fn view_mut(&mut self) -> ArrayViewMut2<'_, f64> {
        ArrayViewMut2::from(self)
    }

    fn apply_exp(&mut self) {
        self.mapv_inplace(f64::exp);
    }

    fn add_mat_mat(
        &mut self,
        alpha: f64,
        a: &Self,
        trans_a: MatrixTranspose,
        b: &Self,
        trans_b: MatrixTranspose,
        beta: f64,
    ) -> Result<()> {
        let a = apply_transpose(a.view(), trans_a);
        let b = apply_transpose(b.view(), trans_b);
        if a.ncols() != b.nrows() || a.nrows() != self.nrows() || b.ncols() != self.ncols() {
            return Err(Error::DimensionMismatch(format!(
                "cannot accumulate a {}x{} by {}x{} product into a {}x{} matrix",
                a.nrows(),
                a.ncols(),
                b.nrows(),
                b.ncols(),
                self.nrows(),
                self.ncols()
            )));
        }
        general_mat_mul(alpha, &a, &b, beta, self);
        Ok(())
    }

    fn fill_randn<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for x in self.iter_mut() {
            *x = StandardNormal.sample(rng);
        }
    }
}

use faer::linalg::solvers;
use faer::linalg::triangular_solve::{
    solve_lower_triangular_in_place, solve_upper_triangular_in_place,
};
use faer::{Mat, MatRef, Par, Side};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
    #[error("Triangular factor must be square, got {rows}x{cols}")]
    NonSquareFactor { rows: usize, cols: usize },
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

enum FaerStorage<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

impl<'a> FaerStorage<'a> {
    #[inline]
    fn as_ref(&self) -> MatRef<'_, f64> {
        match self {
            FaerStorage::Borrowed(view) => *view,
            FaerStorage::Owned(mat) => mat.as_ref(),
        }
    }
}

/// Zero-copy faer view of an ndarray matrix when the memory layout allows it,
/// an owned copy otherwise.
pub struct FaerArrayView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let storage = match array.as_slice_memory_order() {
            Some(slice) if array.is_standard_layout() => FaerStorage::Borrowed(
                MatRef::from_row_major_slice(slice, array.nrows(), array.ncols()),
            ),
            Some(slice) if array.t().is_standard_layout() => FaerStorage::Borrowed(
                MatRef::from_column_major_slice(slice, array.nrows(), array.ncols()),
            ),
            _ => {
                let (rows, cols) = array.dim();
                FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)]))
            }
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.storage.as_ref()
    }
}

/// Lower Cholesky factor `L` of a symmetric positive definite matrix `A = L Lᵀ`.
///
/// The factor is held as a plain ndarray matrix so it can be stored inside a
/// posterior record and rebuilt later; solves go through faer's triangular kernels.
#[derive(Debug, Clone)]
pub struct FaerCholeskyFactor {
    lower: Array2<f64>,
}

impl FaerCholeskyFactor {
    /// Wraps an existing lower-triangular factor. Entries above the diagonal are ignored.
    pub fn from_lower(lower: Array2<f64>) -> Result<Self, FaerLinalgError> {
        let (rows, cols) = lower.dim();
        if rows != cols {
            return Err(FaerLinalgError::NonSquareFactor { rows, cols });
        }
        Ok(Self { lower })
    }

    pub fn lower(&self) -> &Array2<f64> {
        &self.lower
    }

    pub fn dim(&self) -> usize {
        self.lower.nrows()
    }

    fn solve_in_place(&self, rhs: &mut Mat<f64>) {
        let factor = FaerArrayView::new(&self.lower);
        let l = factor.as_ref();
        solve_lower_triangular_in_place(l, rhs.as_mut(), Par::Seq);
        solve_upper_triangular_in_place(l.transpose(), rhs.as_mut(), Par::Seq);
    }

    /// Solves `A x = rhs`.
    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let mut sol = Mat::from_fn(rhs.len(), 1, |i, _| rhs[i]);
        self.solve_in_place(&mut sol);
        Array1::from_shape_fn(rhs.len(), |i| sol[(i, 0)])
    }

    /// Dense `A⁻¹`, obtained by solving against the identity.
    pub fn inverse(&self) -> Array2<f64> {
        let n = self.dim();
        let mut sol = Mat::<f64>::identity(n, n);
        self.solve_in_place(&mut sol);
        mat_to_array(sol.as_ref())
    }

    /// `Σ log L_ii`, i.e. `½ log|A|`.
    pub fn half_log_det(&self) -> f64 {
        self.lower.diag().iter().map(|v| v.ln()).sum()
    }
}

pub trait FaerCholesky {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerCholesky for ArrayBase<S, Ix2> {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let factor = faer_view
            .as_ref()
            .llt(side)
            .map_err(FaerLinalgError::Cholesky)?;
        Ok(FaerCholeskyFactor {
            lower: mat_to_array(factor.L()),
        })
    }
}

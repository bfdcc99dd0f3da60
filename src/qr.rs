//! Pivoted QR factorization and a specialized LLS solver.
//!
//! The QR factorization is used to implement an efficient solver for the
//! linear least squares problem which is repeatedly required to be
//! solved in the LM algorithm.
use core::ops::Range;

use nalgebra::{convert, DMatrix, DVector, DVectorView, Dyn, RealField, U1};
use num_traits::Float;

use crate::{ConvergenceFailure, OptimizerError};
#[cfg(test)]
use approx::assert_relative_eq;
#[cfg(test)]
use nalgebra::{dmatrix, dvector};
#[cfg(test)]
use pcg_rand::Pcg64;
#[cfg(test)]
use rand::Rng;

/// Rank-revealing pivoted QR decomposition based on Householder reflections.
///
/// Let `$\mathbf{A}\in\R^{m\times n}$`.
/// Then this algorithm computes a permutation matrix `$\mathbf{P}$`,
/// an orthogonal matrix `$\mathbf{Q}$`
/// and an upper triangular matrix `$\mathbf{R}$` such that
/// ```math
/// \mathbf{A} \mathbf{P} = \mathbf{Q}\mathbf{R}.
/// ```
/// In step `$k$` the column with the largest remaining norm is moved to the
/// front. When that squared norm is at most the ranking threshold the
/// decomposition stops and the rank is `$k$`.
pub struct PivotedQR<F: RealField> {
    /// The column norms of the input matrix `$\mathbf{A}$`
    column_norms: DVector<F>,
    /// Strictly upper part of `$\mathbf{R}$` and the Householder vectors,
    /// combined in one matrix. Columns are never moved: column `$j$` of
    /// `$\mathbf{R}$` lives in column `permutation[j]`.
    qr: DMatrix<F>,
    /// Diagonal entries of R, indexed like the columns of `qr`.
    r_diag: DVector<F>,
    /// Scaling factors of the Householder reflections, indexed like `r_diag`.
    beta: DVector<F>,
    /// Permution. Column `$j$` of `$\mathbf{A}\mathbf{P}$` is column `permutation[j]` of `$\mathbf{A}$`.
    permutation: Vec<usize>,
    rank: usize,
}

impl<F: RealField + Float> PivotedQR<F> {
    /// Decompose `a`.
    ///
    /// # Errors
    ///
    /// Fails with [`UnableToPerformQr`](enum.ConvergenceFailure.html#variant.UnableToPerformQr)
    /// if a column norm is `NaN` or infinite.
    pub fn new(mut a: DMatrix<F>, threshold: F) -> Result<Self, OptimizerError> {
        let (rows, cols) = a.shape();
        let column_norms = DVector::from_iterator(cols, a.column_iter().map(|c| c.norm()));
        let mut permutation: Vec<usize> = (0..cols).collect();
        let mut r_diag = DVector::zeros(cols);
        let mut beta = DVector::zeros(cols);
        let solved = rows.min(cols);
        let mut rank = solved;
        for k in 0..solved {
            // pivot
            let mut next = k;
            let mut ak2 = <F as Float>::neg_infinity();
            for i in k..cols {
                let norm2 = a.view_range(k.., permutation[i]).norm_squared();
                if !Float::is_finite(norm2) {
                    return Err(ConvergenceFailure::UnableToPerformQr { rows, cols }.into());
                }
                if norm2 > ak2 {
                    next = i;
                    ak2 = norm2;
                }
            }
            if ak2 <= threshold {
                rank = k;
                break;
            }
            permutation.swap(k, next);
            let pk = permutation[k];

            // compute the Householder reflection reducing the k-th column
            let akk = a[(k, pk)];
            let alpha = if akk > F::zero() {
                -Float::sqrt(ak2)
            } else {
                Float::sqrt(ak2)
            };
            let beta_k = F::one() / (ak2 - akk * alpha);
            beta[pk] = beta_k;
            r_diag[pk] = alpha;
            a[(k, pk)] -= alpha;

            // apply reflection to remaining columns
            for &pj in &permutation[k + 1..] {
                let gamma = a.view_range(k.., pk).dot(&a.view_range(k.., pj)) * beta_k;
                for i in k..rows {
                    let v = a[(i, pk)];
                    a[(i, pj)] -= gamma * v;
                }
            }
        }
        Ok(Self {
            column_norms,
            qr: a,
            r_diag,
            beta,
            permutation,
            rank,
        })
    }

    /// Numerical rank found by the decomposition.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Compute `$\mathbf{Q}^\top\vec{y}$`.
    fn q_t_y(&self, mut y: DVector<F>) -> DVector<F> {
        for k in 0..self.rank {
            let pk = self.permutation[k];
            let axis = self.qr.view_range(k.., pk);
            let gamma = axis.dot(&y.rows_range(k..)) * self.beta[pk];
            y.rows_range_mut(k..).axpy(-gamma, &axis, F::one());
        }
        y
    }

    /// Consume the QR-decomposition and transform it into
    /// a parametrized least squares problem.
    ///
    /// See [`LinearLeastSquaresDiagonalProblem`](struct.LinearLeastSquaresDiagonalProblem.html)
    /// for details.
    ///
    /// # Panics
    ///
    /// Panics if `b` does not have one entry per row of `$\mathbf{A}$`.
    pub fn into_least_squares_diagonal_problem(
        mut self,
        b: DVector<F>,
    ) -> LinearLeastSquaresDiagonalProblem<F> {
        assert_eq!(b.nrows(), self.qr.nrows(), "right-hand side has wrong length");
        let (rows, cols) = self.qr.shape();
        let solved = rows.min(cols);
        let qt_full = self.q_t_y(b);
        let mut qt_b = DVector::zeros(cols);
        qt_b.rows_range_mut(..solved)
            .copy_from(&qt_full.rows_range(..solved));
        for k in 0..solved {
            let pk = self.permutation[k];
            self.qr[(k, pk)] = self.r_diag[pk];
        }
        LinearLeastSquaresDiagonalProblem {
            qt_b,
            upper_r: self.qr,
            r_diag: self.r_diag,
            l_diag: DVector::zeros(cols),
            permutation: self.permutation,
            rank: self.rank,
            column_norms: self.column_norms,
        }
    }
}

/// Parametrized linear least squares problem for the LM algorithm.
///
/// The problem is of the form
/// ```math
///   \min_{\vec{x}\in\R^n}\frac{1}{2}\Bigl\|
///     \begin{bmatrix}
///        \mathbf{A} \\
///        \mathbf{D}
///     \end{bmatrix}\vec{x} -
///     \begin{bmatrix}
///         \vec{b} \\
///         \vec{0}
///     \end{bmatrix}
///   \Bigr\|^2,
/// ```
/// for a matrix `$\mathbf{A}\in\R^{m \times n}$`, diagonal matrix
/// `$\mathbf{D}\in\R^n$` and vector `$\vec{b}\in\R^m$`.
/// Everything except the diagonal matrix `$\mathbf{D}$` is considered
/// fixed.
///
/// The problem can be efficiently solved for a sequence of diagonal
/// matrices `$\mathbf{D}$`.
///
/// You must create an instance of this by first computing a pivotized
/// QR decomposition of `$\mathbf{A}$`, then use
/// [`into_least_squares_diagonal_problem`](struct.PivotedQR.html#into_least_squares_diagonal_problem).
///
/// Vectors passed in and returned by the public methods are in parameter
/// order unless documented otherwise.
pub struct LinearLeastSquaresDiagonalProblem<F: RealField> {
    /// The first `$\min(m,n)$` entries of `$\mathbf{Q}^\top \vec{b}$`, padded with zeros.
    qt_b: DVector<F>,
    /// Upper part of `$\mathbf{R}$`, also used to store strictly lower part of `$\mathbf{L}$`.
    /// Entry `$(i, j)$` of either factor is stored at `(i, permutation[j])`.
    upper_r: DMatrix<F>,
    /// Diagonal entries of `$\mathbf{R}$`, indexed by `permutation[j]`.
    r_diag: DVector<F>,
    /// Diagonal entries of `$\mathbf{L}$` in pivot order.
    l_diag: DVector<F>,
    permutation: Vec<usize>,
    rank: usize,
    pub(crate) column_norms: DVector<F>,
}

impl<F: RealField + Float> LinearLeastSquaresDiagonalProblem<F> {
    fn solved(&self) -> usize {
        self.upper_r.nrows().min(self.upper_r.ncols())
    }

    /// Rows `range` of column `$j$` of `$\mathbf{R}$` (or `$\mathbf{L}$` below the diagonal).
    fn column(&self, range: Range<usize>, j: usize) -> DVectorView<'_, F, U1, Dyn> {
        self.upper_r.view_range(range, self.permutation[j])
    }

    pub fn has_full_rank(&self) -> bool {
        self.rank == self.solved()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Compute scaled maximum of dot products between `$\vec{b}$` and the columns of `$\mathbf{A}$`.
    ///
    /// It computes
    /// ```math
    ///   \max_{i=1,\ldots,n}\frac{|(\mathbf{A}^\top \vec{b})_i|}{\|\mathbf{A}\vec{e}_i\|\,\|\vec{b}\|}.
    /// ```
    ///
    /// A fraction with column norm zero is counted as zero, as is everything
    /// for `$\|\vec{b}\| = 0$`.
    pub fn max_a_t_b_scaled(&self, b_norm: F) -> F {
        let mut max = F::zero();
        if b_norm.is_zero() {
            return max;
        }
        for j in 0..self.solved() {
            let scale = self.column_norms[self.permutation[j]];
            if scale.is_zero() {
                continue;
            }
            let sum = self.column(0..j + 1, j).dot(&self.qt_b.rows_range(..j + 1));
            max = Float::max(max, Float::abs(sum) / (scale * b_norm));
        }
        max
    }

    /// Compute `$\|\mathbf{A}\vec{x}\| = \|\mathbf{R}\mathbf{P}^\top\vec{x}\|$`.
    pub fn a_x_norm(&self, x: &DVector<F>) -> F {
        let solved = self.solved();
        let mut work = DVector::zeros(solved);
        for j in 0..solved {
            work.rows_range_mut(..j + 1).axpy(
                x[self.permutation[j]],
                &self.column(0..j + 1, j),
                F::one(),
            );
        }
        work.norm()
    }

    /// Compute `$\|\mathbf{D}^{-1}\mathbf{A}^\top\vec{b}\|$`.
    pub fn scaled_gradient_norm(&self, diag: &DVector<F>) -> F {
        let sum2 = (0..self.solved()).fold(F::zero(), |acc, j| {
            let sum = self.column(0..j + 1, j).dot(&self.qt_b.rows_range(..j + 1))
                / diag[self.permutation[j]];
            acc + sum * sum
        });
        Float::sqrt(sum2)
    }

    /// Solve the least squares problem with a zero diagonal.
    ///
    /// Columns beyond the rank get a zero entry.
    pub fn solve_with_zero_diagonal(&self) -> DVector<F> {
        let n = self.upper_r.ncols();
        let mut work = self.qt_b.clone();
        work.rows_range_mut(self.rank..).fill(F::zero());
        for k in (0..self.rank).rev() {
            work[k] /= self.r_diag[self.permutation[k]];
            let wk = work[k];
            work.rows_range_mut(..k)
                .axpy(-wk, &self.column(0..k, k), F::one());
        }
        self.to_parameter_order(&work, n)
    }

    /// Solve `$\mathbf{R}^\top\vec{z} = \mathbf{P}^\top\vec{v}$`.
    ///
    /// The result is in pivot order. Requires full rank.
    pub fn solve_r_transpose(&self, v: &DVector<F>) -> DVector<F> {
        let solved = self.solved();
        let mut work = DVector::from_fn(solved, |j, _| v[self.permutation[j]]);
        for j in 0..solved {
            let sum = self.column(0..j, j).dot(&work.rows_range(..j));
            work[j] = (work[j] - sum) / self.r_diag[self.permutation[j]];
        }
        work
    }

    /// Solve `$\mathbf{L}\vec{z} = \mathbf{P}^\top\vec{v}$` with the factor
    /// computed by the latest call to
    /// [`solve_with_diagonal`](#method.solve_with_diagonal).
    ///
    /// The result is in pivot order.
    pub fn solve_l(&self, v: &DVector<F>) -> DVector<F> {
        let solved = self.solved();
        let mut work = DVector::from_fn(solved, |j, _| v[self.permutation[j]]);
        for j in 0..solved {
            work[j] /= self.l_diag[j];
            let x = work[j];
            work.rows_range_mut(j + 1..)
                .axpy(-x, &self.column(j + 1..solved, j), F::one());
        }
        work
    }

    /// Solve the linear least squares problem
    /// for a diagonal matrix `$\mathbf{D}$` (`diag`).
    ///
    /// This is equivalent to solving
    /// ```math
    /// (\mathbf{A}^\top\mathbf{A} + \mathbf{D}\mathbf{D})\vec{x} = \mathbf{A}^\top \vec{b}.
    /// ```
    ///
    /// Afterwards the strictly lower part of `upper_r` together with `l_diag`
    /// holds a lower triangular matrix `$\mathbf{L}$` with
    /// ```math
    ///   \mathbf{P}^\top(\mathbf{A}^\top\mathbf{A} + \mathbf{D}\mathbf{D})\mathbf{P} = \mathbf{L}\mathbf{L}^\top.
    /// ```
    pub fn solve_with_diagonal(&mut self, diag: &DVector<F>) -> DVector<F> {
        let rhs = self.eliminate_diag(diag);
        self.solve_after_elimination(rhs)
    }

    fn eliminate_diag(&mut self, diag: &DVector<F>) -> DVector<F> {
        let solved = self.solved();
        let mut rhs = self.qt_b.clone();
        let perm = &self.permutation;
        let r_and_l = &mut self.upper_r;
        // only lower triangular part is used which was filled with R^T.
        // This part is then iteratively overwritten with L.
        for j in 0..solved {
            for i in j + 1..solved {
                r_and_l[(i, perm[j])] = r_and_l[(j, perm[i])];
            }
        }
        // eliminate the diagonal entries from D using Givens rotations
        let p5: F = convert(0.5);
        let p25: F = convert(0.25);
        for j in 0..solved {
            let diag_entry = diag[perm[j]];
            if !diag_entry.is_zero() {
                self.l_diag[j] = diag_entry;
                self.l_diag.rows_range_mut(j + 1..).fill(F::zero());

                let mut qtbpj = F::zero();
                for k in j..solved {
                    if self.l_diag[k].is_zero() {
                        continue;
                    }
                    let pk = perm[k];
                    let r_kk = r_and_l[(k, pk)];
                    // determine the Givens rotation
                    let (sin, cos) = if Float::abs(r_kk) < Float::abs(self.l_diag[k]) {
                        let cot = r_kk / self.l_diag[k];
                        let sin = p5 / Float::sqrt(p25 + p25 * (cot * cot));
                        (sin, sin * cot)
                    } else {
                        let tan = self.l_diag[k] / r_kk;
                        let cos = p5 / Float::sqrt(p25 + p25 * (tan * tan));
                        (cos * tan, cos)
                    };
                    // compute the modified diagonal element of R and (Q^T*b,0)
                    r_and_l[(k, pk)] = cos * r_kk + sin * self.l_diag[k];
                    let temp = cos * rhs[k] + sin * qtbpj;
                    qtbpj = -sin * rhs[k] + cos * qtbpj;
                    rhs[k] = temp;

                    // accumulate the transformation in the row of L
                    for i in k + 1..solved {
                        let r_ik = r_and_l[(i, pk)];
                        let temp = cos * r_ik + sin * self.l_diag[i];
                        self.l_diag[i] = -sin * r_ik + cos * self.l_diag[i];
                        r_and_l[(i, pk)] = temp;
                    }
                }
            }
            let pj = perm[j];
            self.l_diag[j] = r_and_l[(j, pj)];
            r_and_l[(j, pj)] = self.r_diag[pj];
        }
        rhs
    }

    fn solve_after_elimination(&self, mut rhs: DVector<F>) -> DVector<F> {
        let solved = self.solved();
        let n = self.upper_r.ncols();
        let rank = self
            .l_diag
            .rows_range(..solved)
            .iter()
            .position(|x| x.is_zero())
            .unwrap_or(solved);
        rhs.rows_range_mut(rank..).fill(F::zero());

        // solve L^T * x = rhs
        for j in (0..rank).rev() {
            let dot = self.column(j + 1..rank, j).dot(&rhs.rows_range(j + 1..rank));
            rhs[j] = (rhs[j] - dot) / self.l_diag[j];
        }
        self.to_parameter_order(&rhs, n)
    }

    fn to_parameter_order(&self, v: &DVector<F>, n: usize) -> DVector<F> {
        let mut x = DVector::zeros(n);
        for (j, p) in self.permutation.iter().enumerate() {
            x[*p] = v[j];
        }
        x
    }
}

#[cfg(test)]
fn sample_matrix() -> DMatrix<f64> {
    dmatrix![
        2.0,  1.,  4.0;
        0.0, 10., -1.0;
        0.0,  4.,  0.5;
        1.0,  0.,   0.;
    ]
}

/// Diagonal of `$\mathbf{R}$` in pivot order.
#[cfg(test)]
fn pivoted_r_diag(qr: &PivotedQR<f64>) -> DVector<f64> {
    DVector::from_fn(qr.r_diag.nrows(), |k, _| qr.r_diag[qr.permutation[k]])
}

#[cfg(test)]
fn lls(a: DMatrix<f64>, b: DVector<f64>) -> LinearLeastSquaresDiagonalProblem<f64> {
    PivotedQR::new(a, f64::MIN_POSITIVE)
        .ok()
        .unwrap()
        .into_least_squares_diagonal_problem(b)
}

#[test]
fn test_pivoted_qr() {
    let qr = PivotedQR::new(sample_matrix(), f64::MIN_POSITIVE)
        .ok()
        .unwrap();
    assert_eq!(qr.permutation, vec![1, 2, 0]);
    assert_eq!(qr.rank(), 3);

    let column_norms = dvector![2.23606797749979, 10.816653826391969, 4.153311931459037];
    assert_relative_eq!(qr.column_norms, column_norms);

    let r_diag = dvector![-10.816653826391967, 4.1368161505254095, 1.0778765953488594];
    assert_relative_eq!(pivoted_r_diag(&qr), r_diag, epsilon = 1e-12);
    assert_relative_eq!(qr.r_diag[1], r_diag[0], epsilon = 1e-12);

    let lls = qr.into_least_squares_diagonal_problem(dvector![1.0, 2.0, 5.0, 4.0]);
    // strictly upper part of R, column j stored at column permutation[j]
    assert_relative_eq!(lls.upper_r[(0, 2)], 0.3698001308168193, epsilon = 1e-12);
    assert_relative_eq!(lls.upper_r[(0, 0)], -0.18490006540840964, epsilon = 1e-12);
    assert_relative_eq!(lls.upper_r[(1, 0)], 1.9503830421256012, epsilon = 1e-12);
    assert_relative_eq!(lls.upper_r[(1, 2)], 4.1368161505254095, epsilon = 1e-12);
}

#[test]
fn test_pivoted_qr_keeps_column_order() {
    let a = sample_matrix();
    let qr = PivotedQR::new(a.clone(), f64::MIN_POSITIVE).ok().unwrap();
    assert_eq!(qr.permutation, vec![1, 2, 0]);
    // the first reflection is stored in column 1, where its column was
    for i in 1..4 {
        assert_eq!(qr.qr[(i, 1)], a[(i, 1)]);
    }
    assert_relative_eq!(qr.qr[(0, 1)], a[(0, 1)] - qr.r_diag[1], epsilon = 1e-12);
    let v_norm2 = qr.qr.column(1).norm_squared();
    assert_relative_eq!(qr.beta[1] * v_norm2, 2., epsilon = 1e-12);
}

#[test]
fn test_pivoted_qr_reconstructs() {
    let a = dmatrix![
        3., 6., 2.;
        7., 4., 3.;
        2., 0., 4.;
        5., 1., 6.;
    ];
    let qr = PivotedQR::new(a.clone(), f64::MIN_POSITIVE).ok().unwrap();
    let permutation = qr.permutation.clone();
    let lls = qr.into_least_squares_diagonal_problem(DVector::zeros(4));
    // A^T A = P R^T R P^T
    let mut rp = DMatrix::zeros(3, 3);
    for (j, p) in permutation.iter().enumerate() {
        rp.view_range_mut(..j + 1, *p)
            .copy_from(&lls.upper_r.view_range(..j + 1, *p));
    }
    assert_relative_eq!(rp.tr_mul(&rp), a.tr_mul(&a), epsilon = 1e-10);
}

#[test]
fn test_pivoted_qr_more_branches() {
    let a = DMatrix::from_column_slice(
        4,
        3,
        &[
            30.0, 43.0, 34.0, 26.0, 30.0, 43.0, 34.0, 26.0, 24.0, 39.0, -10.0, -34.0,
        ],
    );
    let qr = PivotedQR::new(a, f64::MIN_POSITIVE).ok().unwrap();
    let r_diag = dvector![-67.683085036070864, -55.250741178610944, 0.];
    assert_relative_eq!(pivoted_r_diag(&qr), r_diag, epsilon = 1e-10);
}

#[test]
fn test_pivoted_qr_big_rank1() {
    let a = DMatrix::<f64>::from_fn(10, 5, |i, j| ((i + 1) * (j + 1)) as f64);
    let qr = PivotedQR::new(a, 1e-20).ok().unwrap();
    assert_eq!(qr.rank(), 1);
    assert_eq!(qr.permutation[0], 4);
    assert_relative_eq!(qr.r_diag[4], -98.107084351742913, epsilon = 1e-10);
    assert!(pivoted_r_diag(&qr).rows_range(1..).iter().all(|x| *x == 0.));
}

#[cfg(test)]
fn assert_r_diag_non_increasing(qr: &PivotedQR<f64>) {
    let r_diag = pivoted_r_diag(qr);
    for k in 1..qr.rank() {
        assert!(
            r_diag[k].abs() <= r_diag[k - 1].abs() * (1. + 1e-12),
            "|r_diag| increases at {}: {}",
            k,
            r_diag
        );
    }
    assert!(r_diag.rows_range(qr.rank()..).iter().all(|x| *x == 0.));
}

#[test]
fn test_pivoted_qr_r_diag_non_increasing() {
    let mut rng = Pcg64::new_unseeded();
    for _ in 0..50 {
        let rows = rng.gen_range(1..12);
        let cols = rng.gen_range(1..8);
        let a = DMatrix::<f64>::from_fn(rows, cols, |_, _| rng.gen_range(-10.0..10.0));
        let qr = PivotedQR::new(a, f64::MIN_POSITIVE).ok().unwrap();
        assert_eq!(qr.rank(), rows.min(cols));
        assert_r_diag_non_increasing(&qr);
    }
}

#[test]
fn test_pivoted_qr_r_diag_non_increasing_rank_deficient() {
    let mut rng = Pcg64::new_unseeded();
    for _ in 0..20 {
        // rank 2 by construction
        let b = DMatrix::<f64>::from_fn(8, 2, |_, _| rng.gen_range(-1.0..1.0));
        let c = DMatrix::<f64>::from_fn(2, 5, |_, _| rng.gen_range(-1.0..1.0));
        let qr = PivotedQR::new(&b * &c, 1e-20).ok().unwrap();
        assert_eq!(qr.rank(), 2);
        assert_r_diag_non_increasing(&qr);
    }
}

#[test]
fn test_non_finite_column() {
    let mut a = sample_matrix();
    a[(2, 1)] = f64::NAN;
    assert_eq!(
        PivotedQR::new(a, f64::MIN_POSITIVE).err(),
        Some(OptimizerError::Convergence(
            ConvergenceFailure::UnableToPerformQr { rows: 4, cols: 3 }
        ))
    );
    let mut a = sample_matrix();
    a[(0, 0)] = f64::INFINITY;
    assert!(PivotedQR::new(a, f64::MIN_POSITIVE).is_err());
}

#[test]
fn test_into_lls() {
    // data was generated with Python implementation "lmmin" and SciPy MINPACK binding
    let lls = lls(sample_matrix(), dvector![1.0, 2.0, 5.0, 4.0]);
    let qt_b = dvector![-3.790451340872398, 1.4266308163005572, 2.334839404175348];
    assert_relative_eq!(lls.qt_b, qt_b, epsilon = 1e-12);
}

#[test]
fn test_eliminate_diag_gives_cholesky_factor() {
    let a = DMatrix::<f64>::from_iterator(4, 3, (0..12).map(|i| i as f64));
    let mut lls = lls(a.clone(), dvector![1.0, 2.0, 5.0, 4.0]);
    let diag = dvector![1.0, 0.5, 0.0];
    lls.solve_with_diagonal(&diag);

    let p = lls.permutation.clone();
    let l = DMatrix::from_fn(3, 3, |i, j| match i.cmp(&j) {
        std::cmp::Ordering::Greater => lls.upper_r[(i, p[j])],
        std::cmp::Ordering::Equal => lls.l_diag[j],
        std::cmp::Ordering::Less => 0.,
    });
    let mut expected = a.tr_mul(&a) + DMatrix::from_diagonal(&diag.component_mul(&diag));
    // permute rows and columns into pivot order
    expected = DMatrix::from_fn(3, 3, |i, j| expected[(p[i], p[j])]);
    assert_relative_eq!(&l * l.transpose(), expected, epsilon = 1e-10);
    // the diagonal of R is restored
    for j in 0..3 {
        assert_eq!(lls.upper_r[(j, p[j])], lls.r_diag[p[j]]);
    }
}

#[test]
fn test_lls_x_1() {
    let a = DMatrix::<f64>::from_iterator(4, 3, (0..12).map(|i| i as f64));
    let mut lls = lls(a, dvector![1.0, 2.0, 5.0, 4.0]);
    let x_out = lls.solve_with_diagonal(&dvector![1.0, 0.5, 0.0]);
    let x_ref = dvector![0.459330143540669, 0.918660287081341, -0.287081339712919];
    assert_relative_eq!(x_out, x_ref, epsilon = 1e-10);
}

#[test]
fn test_lls_x_2() {
    // R is singular but L is not
    let a = DMatrix::from_column_slice(
        4,
        3,
        &[
            14., -12., 20., -11., 19., 38., -4., -11., -14., 12., -20., 11.,
        ],
    );
    let qr = PivotedQR::new(a, 1e-10).ok().unwrap();
    assert_eq!(qr.rank(), 2);
    let mut lls = qr.into_least_squares_diagonal_problem(dvector![-5., 3., -2., 7.]);
    assert!(!lls.has_full_rank());

    let rdiag_exp = dvector![-44.068129073061407, 29.147349299100057, 0.];
    let rdiag = DVector::from_fn(3, |j, _| lls.upper_r[(j, lls.permutation[j])]);
    assert_relative_eq!(rdiag, rdiag_exp, epsilon = 1e-10);

    let diag = dvector![2.772724292099739, 0.536656314599949, 0.089442719099992];
    let x_out = lls.solve_with_diagonal(&diag);
    let x_exp = dvector![-0.000277544878320, -0.046225239392197, 0.266720628065249];
    assert_relative_eq!(x_out, x_exp, epsilon = 1e-10);
}

#[test]
fn test_lls_zero_diagonal() {
    let a = dmatrix![
        1., 2., -1.;
        0., 1., 4.;
        0., 0., 0.5;
        0., 0., 0.;
    ];
    let lls = lls(a, dvector![1.0, 2.0, 5.0, 4.0]);
    assert!(lls.has_full_rank());
    let x_out = lls.solve_with_zero_diagonal();
    assert_relative_eq!(x_out, dvector![87., -38., 10.], epsilon = 1e-10);
}

#[test]
fn test_triangular_solves() {
    let a = dmatrix![
        3., 6., 2.;
        7., 4., 3.;
        2., 0., 4.;
        5., 1., 6.;
    ];
    let mut lls = lls(a.clone(), DVector::zeros(4));
    let v = dvector![1., -2., 0.5];
    // R^T z = P^T v  <=>  ||z|| = ||R^{-T} P^T v||
    let z = lls.solve_r_transpose(&v);
    let ata = a.tr_mul(&a);
    let inv = ata.clone().try_inverse().unwrap();
    assert_relative_eq!(z.norm_squared(), v.dot(&(&inv * &v)), epsilon = 1e-10);

    let diag = dvector![0.5, 1., 2.];
    lls.solve_with_diagonal(&diag);
    let z = lls.solve_l(&v);
    let m = ata + DMatrix::from_diagonal(&diag.component_mul(&diag));
    let inv = m.try_inverse().unwrap();
    assert_relative_eq!(z.norm_squared(), v.dot(&(&inv * &v)), epsilon = 1e-10);
}

#[test]
fn test_column_max_norm() {
    let a = DMatrix::from_column_slice(
        4,
        3,
        &[
            14., -12., 20., -11., 19., 38., -4., -11., -14., 12., -20., 11.,
        ],
    );
    let b = dvector![1., 2., 3., 4.];
    let lls = lls(a, b.clone());
    assert_relative_eq!(lls.max_a_t_b_scaled(1.), 0.88499332, epsilon = 1e-8);
    assert_relative_eq!(lls.max_a_t_b_scaled(b.norm()), 0.88499332 / b.norm(), epsilon = 1e-8);
    assert_eq!(lls.max_a_t_b_scaled(0.), 0.);

    let lls = lls_zero();
    assert_eq!(lls.max_a_t_b_scaled(1.), 0.);
    assert_eq!(lls.rank(), 0);
}

#[cfg(test)]
fn lls_zero() -> LinearLeastSquaresDiagonalProblem<f64> {
    lls(DMatrix::zeros(4, 3), dvector![1., 2., 3., 4.])
}

#[test]
fn test_a_x_norm() {
    let a = dmatrix![
        3., 6., 2.;
        7., 4., 3.;
        2., 0., 4.;
        5., 1., 6.;
    ];
    let lls = lls(a, DVector::zeros(4));
    let result = lls.a_x_norm(&dvector![1., 8., 3.]);
    assert_relative_eq!(result, 6710f64.sqrt(), epsilon = 1e-10);
}

#[test]
fn test_scaled_gradient_norm() {
    let a = dmatrix![
        3., 6., 2.;
        7., 4., 3.;
        2., 0., 4.;
        5., 1., 6.;
    ];
    let b = dvector![1., -1., 2., 0.5];
    let gradient = a.tr_mul(&b);
    let diag = dvector![2., 1., 4.];
    let lls = lls(a, b);
    let expected = gradient.component_div(&diag).norm();
    assert_relative_eq!(lls.scaled_gradient_norm(&diag), expected, epsilon = 1e-10);
}

use nalgebra::{DMatrix, DVector, RealField};
use num_traits::Float;

use crate::OptimizerError;
#[cfg(test)]
use approx::assert_relative_eq;
#[cfg(test)]
use nalgebra::{dmatrix, dvector};

/// A vector valued model function `$\vec{f}\!:\R^n\to\R^m$`.
///
/// The optimizers compare `$\vec{f}(\vec{x})$` against the target values of a
/// [`LeastSquaresProblem`](struct.LeastSquaresProblem.html). See the
/// [crate documentation](index.html) for a usage example.
pub trait VectorFunction<F: RealField> {
    /// Compute the model values at `x`.
    fn value(&self, x: &DVector<F>) -> DVector<F>;
}

/// A vector valued model function together with its Jacobian.
pub trait DifferentiableVectorFunction<F: RealField>: VectorFunction<F> {
    /// Compute the Jacobian `$\mathbf{J}\in\R^{m\times n}$` of the model values,
    /// ```math
    ///   \mathbf{J}_{ij} = \frac{\partial f_i}{\partial x_j}(\vec{x}).
    /// ```
    fn jacobian(&self, x: &DVector<F>) -> DMatrix<F>;
}

/// Weight matrix `$\mathbf{W}$` of the observations.
///
/// The cost minimized by the least squares optimizers is
/// `$\sqrt{\vec{r}^\top\mathbf{W}\vec{r}}$` for the residuals `$\vec{r}$`.
#[derive(Debug, Clone, PartialEq)]
pub enum Weight<F: RealField> {
    /// Diagonal of a diagonal weight matrix. This is the common case.
    Diagonal(DVector<F>),
    /// A symmetric positive definite `$m\times m$` matrix.
    Dense(DMatrix<F>),
}

impl<F: RealField + Float> Weight<F> {
    /// All observations weighted with one.
    pub fn unit(observations: usize) -> Self {
        Weight::Diagonal(DVector::from_element(observations, F::one()))
    }

    /// Number of observations this weight applies to.
    pub fn dim(&self) -> usize {
        match self {
            Weight::Diagonal(w) => w.nrows(),
            Weight::Dense(w) => w.nrows(),
        }
    }

    /// Compute `$\mathbf{W}^{1/2}$`.
    ///
    /// The diagonal case takes element-wise square roots, the dense case
    /// goes through the symmetric eigendecomposition
    /// `$\mathbf{W} = \mathbf{V}\mathbf{\Lambda}\mathbf{V}^\top$`.
    pub(crate) fn sqrt(&self) -> Result<Self, OptimizerError> {
        match self {
            Weight::Diagonal(w) => {
                if w.iter().any(|x| !(*x > F::zero())) {
                    return Err(OptimizerError::InvalidArgument("weights must be positive"));
                }
                Ok(Weight::Diagonal(w.map(|x| Float::sqrt(x))))
            }
            Weight::Dense(w) => {
                if !w.is_square() {
                    return Err(OptimizerError::DimensionMismatch {
                        expected: w.nrows(),
                        found: w.ncols(),
                    });
                }
                if !is_symmetric(w) {
                    return Err(OptimizerError::InvalidArgument(
                        "weight matrix must be symmetric",
                    ));
                }
                let eigen = w.clone().symmetric_eigen();
                if eigen.eigenvalues.iter().any(|l| !(*l > F::zero())) {
                    return Err(OptimizerError::InvalidArgument(
                        "weight matrix must be positive definite",
                    ));
                }
                let sqrt_values = eigen.eigenvalues.map(|l| Float::sqrt(l));
                let v = &eigen.eigenvectors;
                Ok(Weight::Dense(
                    v * DMatrix::from_diagonal(&sqrt_values) * v.transpose(),
                ))
            }
        }
    }

    /// Compute `$\mathbf{W}\vec{v}$`.
    pub(crate) fn mul_vector(&self, v: &DVector<F>) -> DVector<F> {
        match self {
            Weight::Diagonal(w) => w.component_mul(v),
            Weight::Dense(w) => w * v,
        }
    }

    /// Compute `$\mathbf{W}\mathbf{M}$`.
    pub(crate) fn mul_matrix(&self, mut m: DMatrix<F>) -> DMatrix<F> {
        match self {
            Weight::Diagonal(w) => {
                for (mut row, wi) in m.row_iter_mut().zip(w.iter()) {
                    row *= *wi;
                }
                m
            }
            Weight::Dense(w) => w * m,
        }
    }
}

fn is_symmetric<F: RealField + Float>(m: &DMatrix<F>) -> bool {
    let n = m.nrows();
    let eps = <F as Float>::epsilon() * nalgebra::convert((10 * n * n) as f64);
    for i in 0..n {
        for j in i + 1..n {
            let (a, b) = (m[(i, j)], m[(j, i)]);
            let scale = Float::max(Float::abs(a), Float::abs(b));
            if Float::abs(a - b) > scale * eps {
                return false;
            }
        }
    }
    true
}

/// A weighted least squares problem.
///
/// Holds the target values `$\vec{y}\in\R^m$`, the weights and the
/// start point `$\vec{x}_0\in\R^n$`. The optimizers search
/// ```math
///   \min_{\vec{x}\in\R^n}\bigl(\vec{y} - \vec{f}(\vec{x})\bigr)^\top\mathbf{W}\bigl(\vec{y} - \vec{f}(\vec{x})\bigr).
/// ```
#[derive(Debug, Clone)]
pub struct LeastSquaresProblem<F: RealField> {
    target: DVector<F>,
    weight: Weight<F>,
    pub(crate) weight_sqrt: Weight<F>,
    start: DVector<F>,
}

impl<F: RealField + Float> LeastSquaresProblem<F> {
    /// Validate the inputs and precompute the square root of the weights.
    ///
    /// # Errors
    ///
    /// - [`DimensionMismatch`](enum.OptimizerError.html#variant.DimensionMismatch)
    ///   if the weight does not match the number of targets.
    /// - [`InvalidArgument`](enum.OptimizerError.html#variant.InvalidArgument)
    ///   for an empty start point, diagonal weights which are not strictly
    ///   positive or a dense weight matrix which is not symmetric positive definite.
    pub fn new(
        target: DVector<F>,
        weight: Weight<F>,
        start: DVector<F>,
    ) -> Result<Self, OptimizerError> {
        if weight.dim() != target.nrows() {
            return Err(OptimizerError::DimensionMismatch {
                expected: target.nrows(),
                found: weight.dim(),
            });
        }
        if start.nrows() == 0 {
            return Err(OptimizerError::InvalidArgument(
                "start point must have at least one parameter",
            ));
        }
        let weight_sqrt = weight.sqrt()?;
        Ok(Self {
            target,
            weight,
            weight_sqrt,
            start,
        })
    }

    pub fn target(&self) -> &DVector<F> {
        &self.target
    }

    pub fn weight(&self) -> &Weight<F> {
        &self.weight
    }

    pub fn start(&self) -> &DVector<F> {
        &self.start
    }

    /// Number of observations `$m$`.
    pub fn observations(&self) -> usize {
        self.target.nrows()
    }

    /// Number of parameters `$n$`.
    pub fn parameters(&self) -> usize {
        self.start.nrows()
    }
}

#[test]
fn problem_keeps_its_inputs() {
    let weight = Weight::Diagonal(dvector![4., 1., 9.]);
    let problem =
        LeastSquaresProblem::new(dvector![1., 2., 3.], weight.clone(), dvector![0.5, 0.]).unwrap();
    assert_eq!(problem.weight(), &weight);
    assert_eq!(problem.weight_sqrt, Weight::Diagonal(dvector![2., 1., 3.]));
    assert_eq!(problem.target(), &dvector![1., 2., 3.]);
    assert_eq!(problem.start(), &dvector![0.5, 0.]);
    assert_eq!(problem.observations(), 3);
    assert_eq!(problem.parameters(), 2);
}

#[test]
fn weight_dimension_is_checked() {
    let err = LeastSquaresProblem::new(
        dvector![0., 0., 0.],
        Weight::unit(2),
        dvector![1.],
    )
    .unwrap_err();
    assert_eq!(
        err,
        OptimizerError::DimensionMismatch {
            expected: 3,
            found: 2
        }
    );
}

#[test]
fn empty_start_is_rejected() {
    let err = LeastSquaresProblem::new(dvector![0.], Weight::unit(1), DVector::<f64>::zeros(0))
        .unwrap_err();
    assert!(matches!(err, OptimizerError::InvalidArgument(_)));
}

#[test]
fn non_positive_weight_is_rejected() {
    for bad in [-1., 0., f64::NAN] {
        let err = LeastSquaresProblem::new(
            dvector![0., 0.],
            Weight::Diagonal(dvector![1., bad]),
            dvector![1.],
        )
        .unwrap_err();
        assert_eq!(err, OptimizerError::InvalidArgument("weights must be positive"));
    }
}

#[test]
fn diagonal_sqrt() {
    let w = Weight::Diagonal(dvector![4., 9., 0.25]).sqrt().unwrap();
    assert_eq!(w, Weight::Diagonal(dvector![2., 3., 0.5]));
}

#[test]
fn dense_sqrt_squares_back() {
    let m = dmatrix![
        4., 1., 0.;
        1., 3., 0.5;
        0., 0.5, 2.;
    ];
    let sqrt = match Weight::Dense(m.clone()).sqrt().unwrap() {
        Weight::Dense(s) => s,
        Weight::Diagonal(_) => unreachable!(),
    };
    assert_relative_eq!(&sqrt * &sqrt, m, epsilon = 1e-12);
    assert_relative_eq!(sqrt.transpose(), sqrt, epsilon = 1e-12);
}

#[test]
fn dense_weight_must_be_positive_definite() {
    let m = dmatrix![
        1., 2.;
        2., 1.;
    ];
    assert!(matches!(
        Weight::Dense(m).sqrt(),
        Err(OptimizerError::InvalidArgument(_))
    ));
    let m = dmatrix![
        1., 2.;
        0., 1.;
    ];
    assert!(matches!(
        Weight::Dense(m).sqrt(),
        Err(OptimizerError::InvalidArgument(_))
    ));
}

#[test]
fn weight_application() {
    let w = Weight::Diagonal(dvector![2., 3.]);
    assert_eq!(w.mul_vector(&dvector![1., 1.]), dvector![2., 3.]);
    let m = dmatrix![
        1., 2.;
        3., 4.;
    ];
    assert_eq!(
        w.mul_matrix(m.clone()),
        dmatrix![
            2., 4.;
            9., 12.;
        ]
    );
    let dense = Weight::Dense(dmatrix![
        2., 0.;
        0., 3.;
    ]);
    assert_eq!(dense.mul_matrix(m), w.mul_matrix(dmatrix![1., 2.; 3., 4.]));
}

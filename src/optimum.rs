use nalgebra::{DVector, RealField};

/// A parameter vector together with the model values at that point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointVectorValuePair<F: RealField> {
    pub point: DVector<F>,
    pub value: DVector<F>,
}

/// A parameter vector together with a scalar objective value at that point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointValuePair<F: RealField> {
    pub point: DVector<F>,
    pub value: F,
}

/// Result of a successful least squares optimization.
///
/// Besides the optimal point and the model values there, this reports the
/// cost `$\sqrt{\vec{r}^\top\mathbf{W}\vec{r}}$` of the returned point
/// and how much work was spent.
#[derive(Debug, Clone)]
pub struct LeastSquaresOptimum<F: RealField> {
    pub point: DVector<F>,
    /// Model values `$\vec{f}(\vec{x})$` at `point`.
    pub value: DVector<F>,
    /// Residuals `$\vec{y} - \vec{f}(\vec{x})$` at `point`.
    pub residuals: DVector<F>,
    pub cost: F,
    pub iterations: usize,
    pub evaluations: usize,
    pub jacobian_evaluations: usize,
}

impl<F: RealField> LeastSquaresOptimum<F> {
    pub fn into_pair(self) -> PointVectorValuePair<F> {
        PointVectorValuePair {
            point: self.point,
            value: self.value,
        }
    }
}

/// Result of a successful scalar optimization.
#[derive(Debug, Clone)]
pub struct ScalarOptimum<F: RealField> {
    pub point: DVector<F>,
    pub value: F,
    pub iterations: usize,
    pub evaluations: usize,
}

//! Curve fitting on top of the least squares optimizers.
use nalgebra::{DMatrix, DVector, RealField};
use num_traits::Float;

use crate::{
    DifferentiableVectorFunction, LeastSquaresOptimum, LevenbergMarquardt, OptimizerError,
    VectorFunction, Weight,
};
#[cfg(test)]
use approx::assert_relative_eq;
#[cfg(test)]
use nalgebra::dvector;

/// A scalar function `$f(x; \vec{p})$` of one variable with parameters `$\vec{p}$`.
///
/// For example:
///
/// ```
/// # use approx::assert_relative_eq;
/// # use nalgebra::{dvector, DVector};
/// use nlsq::ParametricFunction;
///
/// struct Problem;
///
/// impl ParametricFunction<f64> for Problem {
///     fn value(&self, x: f64, ws: &DVector<f64>) -> f64 {
///         // This is our equation; we want to find the coefficients `ws`.
///         ws[0] * 2.0 * x + ws[1] * 0.5 * x.powi(2)
///     }
///
///     fn gradient(&self, x: f64, _ws: &DVector<f64>) -> DVector<f64> {
///         // These are the partial derivatives of our equation, one for each coefficient.
///         dvector![2.0 * x, 0.5 * x.powi(2)]
///     }
/// }
///
/// // Let's pick some coefficients...
/// let ws = dvector![1.33, 0.66];
///
/// // ...and generate some data...
/// let xs = [1.0, 10.0, 100.0];
/// let ys = xs.map(|x| Problem.value(x, &ws));
///
/// // Now we can run the LM algorithm to calculate the coefficients from the data.
/// let optimum = Problem.least_squares_fit(&xs, &ys, dvector![1.5, 1.0]).unwrap();
///
/// // They're the same as what we've picked!
/// assert_relative_eq!(optimum.point[0], 1.33, epsilon = 1e-10);
/// assert_relative_eq!(optimum.point[1], 0.66, epsilon = 1e-10);
/// ```
pub trait ParametricFunction<F: RealField> {
    fn value(&self, x: F, params: &DVector<F>) -> F;

    /// The partial derivatives `$\partial f/\partial p_j$`, one for each parameter.
    fn gradient(&self, x: F, params: &DVector<F>) -> DVector<F>;

    /// Fit the parameters to the points `$(x_i, y_i)$` with unit weights,
    /// using the default [`LevenbergMarquardt`](struct.LevenbergMarquardt.html)
    /// configuration and an unlimited evaluation budget.
    ///
    /// # Errors
    ///
    /// Fails with [`DimensionMismatch`](enum.OptimizerError.html#variant.DimensionMismatch)
    /// if `xs` and `ys` differ in length, otherwise as
    /// [`LevenbergMarquardt::optimize`](struct.LevenbergMarquardt.html#method.optimize).
    fn least_squares_fit(
        &self,
        xs: &[F],
        ys: &[F],
        initial_guess: DVector<F>,
    ) -> Result<LeastSquaresOptimum<F>, OptimizerError>
    where
        F: Float,
    {
        if xs.len() != ys.len() {
            return Err(OptimizerError::DimensionMismatch {
                expected: xs.len(),
                found: ys.len(),
            });
        }
        LevenbergMarquardt::new().optimize(
            usize::MAX,
            &Curve::new(self, xs),
            DVector::from_column_slice(ys),
            Weight::unit(ys.len()),
            initial_guess,
        )
    }
}

/// A [`ParametricFunction`](trait.ParametricFunction.html) sampled at fixed
/// abscissae, seen as a model function of its parameters.
pub struct Curve<'a, F, P: ?Sized> {
    function: &'a P,
    xs: &'a [F],
}

impl<'a, F, P: ?Sized> Curve<'a, F, P> {
    pub fn new(function: &'a P, xs: &'a [F]) -> Self {
        Self { function, xs }
    }
}

impl<'a, F, P> VectorFunction<F> for Curve<'a, F, P>
where
    F: RealField + Copy,
    P: ParametricFunction<F> + ?Sized,
{
    fn value(&self, params: &DVector<F>) -> DVector<F> {
        DVector::from_iterator(
            self.xs.len(),
            self.xs.iter().map(|&x| self.function.value(x, params)),
        )
    }
}

impl<'a, F, P> DifferentiableVectorFunction<F> for Curve<'a, F, P>
where
    F: RealField + Copy,
    P: ParametricFunction<F> + ?Sized,
{
    fn jacobian(&self, params: &DVector<F>) -> DMatrix<F> {
        let mut jacobian = DMatrix::zeros(self.xs.len(), params.nrows());
        for (mut row, &x) in jacobian.row_iter_mut().zip(self.xs.iter()) {
            row.tr_copy_from(&self.function.gradient(x, params));
        }
        jacobian
    }
}

/// An observation `$(x, y)$` with its weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedObservedPoint<F> {
    pub weight: F,
    pub x: F,
    pub y: F,
}

/// Collects weighted observations and fits a
/// [`ParametricFunction`](trait.ParametricFunction.html) to them.
#[derive(Debug, Clone)]
pub struct CurveFitter<F> {
    optimizer: LevenbergMarquardt<F>,
    max_evaluations: usize,
    observations: Vec<WeightedObservedPoint<F>>,
}

impl<F: RealField + Float> CurveFitter<F> {
    pub fn new(optimizer: LevenbergMarquardt<F>) -> Self {
        Self {
            optimizer,
            max_evaluations: usize::MAX,
            observations: vec![],
        }
    }

    pub fn with_max_evaluations(self, max_evaluations: usize) -> Self {
        Self {
            max_evaluations,
            ..self
        }
    }

    pub fn add_observed_point(&mut self, weight: F, x: F, y: F) {
        self.observations
            .push(WeightedObservedPoint { weight, x, y });
    }

    pub fn add_observation(&mut self, observation: WeightedObservedPoint<F>) {
        self.observations.push(observation);
    }

    pub fn observations(&self) -> &[WeightedObservedPoint<F>] {
        &self.observations
    }

    pub fn clear_observations(&mut self) {
        self.observations.clear();
    }

    /// Fit `function` to the observations, starting from `initial_guess`.
    pub fn fit<P>(
        &self,
        function: &P,
        initial_guess: DVector<F>,
    ) -> Result<LeastSquaresOptimum<F>, OptimizerError>
    where
        P: ParametricFunction<F> + ?Sized,
    {
        let xs: Vec<F> = self.observations.iter().map(|o| o.x).collect();
        let target = DVector::from_iterator(xs.len(), self.observations.iter().map(|o| o.y));
        let weights = DVector::from_iterator(xs.len(), self.observations.iter().map(|o| o.weight));
        self.optimizer.optimize(
            self.max_evaluations,
            &Curve::new(function, &xs),
            target,
            Weight::Diagonal(weights),
            initial_guess,
        )
    }
}

impl<F: RealField + Float> Default for CurveFitter<F> {
    fn default() -> Self {
        Self::new(LevenbergMarquardt::new())
    }
}

/// `$a \sin(\omega x)$`
#[cfg(test)]
struct Sine;

#[cfg(test)]
impl ParametricFunction<f64> for Sine {
    fn value(&self, x: f64, p: &DVector<f64>) -> f64 {
        p[0] * (p[1] * x).sin()
    }

    fn gradient(&self, x: f64, p: &DVector<f64>) -> DVector<f64> {
        dvector![(p[1] * x).sin(), p[0] * x * (p[1] * x).cos()]
    }
}

#[test]
fn curve_jacobian() {
    let xs = [0., 0.5, 1.];
    let curve = Curve::new(&Sine, &xs);
    let params = dvector![2., 1.5];
    let numerical = crate::differentiate_numerically(&curve, &params).unwrap();
    assert_relative_eq!(curve.jacobian(&params), numerical, epsilon = 1e-10);
    assert_eq!(curve.value(&params)[0], 0.);
}

#[test]
fn fitter_uses_weights() {
    let mut fitter = CurveFitter::default();
    for i in 0..20 {
        let x = i as f64 * 0.2;
        fitter.add_observed_point(1., x, Sine.value(x, &dvector![1.7, 1.1]));
    }
    // an outlier with a tiny weight barely disturbs the fit
    fitter.add_observation(WeightedObservedPoint {
        weight: 1e-20,
        x: 1.,
        y: 100.,
    });
    assert_eq!(fitter.observations().len(), 21);
    assert_eq!(fitter.observations()[20].y, 100.);

    let optimum = fitter.fit(&Sine, dvector![1., 1.]).unwrap();
    assert_relative_eq!(optimum.point, dvector![1.7, 1.1], epsilon = 1e-6);
    assert!(optimum.cost < 1e-8);

    fitter.clear_observations();
    assert!(fitter.observations().is_empty());
}

#[test]
fn mismatched_data() {
    assert_eq!(
        Sine.least_squares_fit(&[1., 2.], &[1.], dvector![1., 1.])
            .err()
            .unwrap(),
        OptimizerError::DimensionMismatch {
            expected: 2,
            found: 1
        }
    );
}

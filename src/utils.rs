//! Numerical differentiation of model functions.
use nalgebra::{DMatrix, DVector, RealField};
use num_traits::Float;

use crate::{DifferentiableVectorFunction, VectorFunction};

mod finite_difference;

pub use finite_difference::derivative;
#[cfg(test)]
use crate::{LevenbergMarquardt, Weight};
#[cfg(test)]
use approx::assert_relative_eq;
#[cfg(test)]
use nalgebra::dvector;

/// Compute a [numerical approximation](https://en.wikipedia.org/wiki/Numerical_differentiation)
/// to the Jacobian of `function` at `x`.
///
/// The function is intended to be used for debugging or testing.
/// You can try to check your derivative implementation of a
/// [`DifferentiableVectorFunction`](trait.DifferentiableVectorFunction.html) with this.
///
/// Computing the derivatives numerically is unstable: You can construct
/// functions where the computed result is catastrophically wrong. If you
/// observe large differences between the derivative computed by this function
/// and your implementation the reason _might_ be due to instability.
///
/// The achieved precision by this function
/// is lower than the floating point precision in general. So the error is
/// bigger than `$10^{-15}$` for `f64` and bigger than `$10^{-7}$` for `f32`.
/// If possible use `f64` for the testing.
///
/// Returns `None` if an entry could not be approximated, which happens when
/// the model values are `NaN` around `x`.
///
/// # Example
///
/// ```
/// # use nalgebra::{dmatrix, dvector, DVector};
/// # use approx::assert_relative_eq;
/// use nlsq::{differentiate_numerically, VectorFunction};
///
/// struct Parabola;
///
/// impl VectorFunction<f64> for Parabola {
///     fn value(&self, x: &DVector<f64>) -> DVector<f64> {
///         dvector![x[0] * x[0], x[0] * x[1]]
///     }
/// }
///
/// let jacobian = differentiate_numerically(&Parabola, &dvector![2., 3.]).unwrap();
/// assert_relative_eq!(jacobian, dmatrix![4., 0.; 3., 2.], epsilon = 1e-10);
/// ```
pub fn differentiate_numerically<F, V>(function: &V, x: &DVector<F>) -> Option<DMatrix<F>>
where
    F: RealField + Float,
    V: VectorFunction<F> + ?Sized,
{
    let m = function.value(x).nrows();
    let n = x.nrows();
    let mut jacobian = DMatrix::zeros(m, n);
    for j in 0..n {
        for i in 0..m {
            let entry = derivative(x[j], |t| {
                let mut shifted = x.clone();
                shifted[j] = t;
                function.value(&shifted)[i]
            });
            jacobian[(i, j)] = entry?;
        }
    }
    Some(jacobian)
}

/// Turns a [`VectorFunction`](trait.VectorFunction.html) into a
/// [`DifferentiableVectorFunction`](trait.DifferentiableVectorFunction.html)
/// by approximating the Jacobian with
/// [`differentiate_numerically`](fn.differentiate_numerically.html).
///
/// Entries which cannot be approximated are set to `NaN`, so the optimizers
/// fail with a QR error instead of running with a wrong Jacobian.
#[derive(Debug, Clone)]
pub struct NumericalJacobian<V>(pub V);

impl<F, V> VectorFunction<F> for NumericalJacobian<V>
where
    F: RealField,
    V: VectorFunction<F>,
{
    fn value(&self, x: &DVector<F>) -> DVector<F> {
        self.0.value(x)
    }
}

impl<F, V> DifferentiableVectorFunction<F> for NumericalJacobian<V>
where
    F: RealField + Float,
    V: VectorFunction<F>,
{
    fn jacobian(&self, x: &DVector<F>) -> DMatrix<F> {
        differentiate_numerically(&self.0, x).unwrap_or_else(|| {
            let m = self.0.value(x).nrows();
            DMatrix::from_element(m, x.nrows(), <F as Float>::nan())
        })
    }
}

#[cfg(test)]
struct Exponential;

#[cfg(test)]
impl VectorFunction<f64> for Exponential {
    fn value(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(5, |i, _| x[0] * (x[1] * i as f64).exp())
    }
}

#[test]
fn jacobian_of_exponential() {
    let x = dvector![2., -0.5];
    let jacobian = differentiate_numerically(&Exponential, &x).unwrap();
    let expected = DMatrix::from_fn(5, 2, |i, j| {
        let t = i as f64;
        if j == 0 {
            (x[1] * t).exp()
        } else {
            x[0] * t * (x[1] * t).exp()
        }
    });
    assert_relative_eq!(jacobian, expected, epsilon = 1e-10);
}

#[test]
fn nan_values_give_none() {
    struct Broken;
    impl VectorFunction<f64> for Broken {
        fn value(&self, _x: &DVector<f64>) -> DVector<f64> {
            dvector![f64::NAN]
        }
    }
    assert_eq!(differentiate_numerically(&Broken, &dvector![1.]), None);
    assert!(NumericalJacobian(Broken).jacobian(&dvector![1.])[(0, 0)].is_nan());
}

#[test]
fn fit_without_analytic_jacobian() {
    let target = Exponential.value(&dvector![3., -0.25]);
    let optimum = LevenbergMarquardt::new()
        .optimize(
            1000,
            &NumericalJacobian(Exponential),
            target,
            Weight::unit(5),
            dvector![1., 0.],
        )
        .unwrap();
    assert_relative_eq!(optimum.point, dvector![3., -0.25], epsilon = 1e-8);
    assert_eq!(
        NumericalJacobian(Exponential).value(&dvector![1., 0.]),
        DVector::from_element(5, 1.)
    );
}

//! Nonlinear least squares and scalar optimizers using [nalgebra](https://nalgebra.org).
//!
//! The least squares optimizers fit a model function `$\vec{f}\!:\R^n\to\R^m$`
//! to target values `$\vec{y}\in\R^m$`, that is they solve
//! ```math
//! \min_{\vec{x}\in\R^n}\sqrt{\vec{r}^\top\mathbf{W}\vec{r}}\quad\text{where}\quad
//!   \vec{r} \coloneqq \vec{y} - \vec{f}(\vec{x})
//! ```
//! for a symmetric positive semi-definite weight matrix `$\mathbf{W}$`.
//! Two algorithms are available:
//!
//! - [`LevenbergMarquardt`](struct.LevenbergMarquardt.html), the MINPACK
//!   trust-region variant, robust for bad start points,
//! - [`GaussNewton`](struct.GaussNewton.html), without step control.
//!
//! For scalar objectives with a gradient there is the
//! [`NonLinearConjugateGradient`](struct.NonLinearConjugateGradient.html)
//! optimizer, which uses the [`BrentSolver`](struct.BrentSolver.html) root
//! finder for its line search.
//!
//! # Inputs
//!
//! You must provide an implementation of
//!
//! - the model values `$\vec{x} \mapsto (f_1(\vec{x}), \ldots, f_m(\vec{x}))^\top\in\R^m$`
//!   as a [`VectorFunction`](trait.VectorFunction.html)
//! - and its Jacobian `$\mathbf{J} \in \R^{m\times n}$` as a
//!   [`DifferentiableVectorFunction`](trait.DifferentiableVectorFunction.html), defined as
//!   ```math
//!   \mathbf{J} \coloneqq
//!   \begin{pmatrix}
//!   \frac{\partial f_1}{\partial x_1} & \cdots & \frac{\partial f_1}{\partial x_n} \\
//!   \vdots & \ddots & \vdots \\
//!   \frac{\partial f_m}{\partial x_1} & \cdots & \frac{\partial f_m}{\partial x_n}
//!   \end{pmatrix}.
//!   ```
//!
//! Finally, you have to provide an initial guess for `$\vec{x}$`. This can
//! be a constant value, but typically the optimization result _crucially_ depends
//! on a good initial value.
//!
//! The algorithms also have a number of hyperparameters which are documented
//! at the optimizer structs along with implementation details.
//!
//! # Usage Example
//!
//! We use `$f(x, y) \coloneqq (x^2 + y - 11)^2 + (x + y^2 - 7)^2$` as a [test function](https://en.wikipedia.org/wiki/Himmelblau%27s_function)
//! for this example.
//! In this case we have `$n = 2$` and `$m = 2$` with target values zero and
//!
//! ```math
//!   f_1(\vec{x}) \coloneqq x_1^2 + x_2 - 11\quad\text{and}\quad
//!   f_2(\vec{x}) \coloneqq x_1 + x_2^2 - 7.
//! ```
//!
//! ```
//! # use nalgebra::{dmatrix, dvector, DMatrix, DVector};
//! use nlsq::{DifferentiableVectorFunction, LevenbergMarquardt, VectorFunction, Weight};
//!
//! struct Himmelblau;
//!
//! impl VectorFunction<f64> for Himmelblau {
//!     fn value(&self, p: &DVector<f64>) -> DVector<f64> {
//!         dvector![p[0] * p[0] + p[1] - 11.0, p[0] + p[1] * p[1] - 7.0]
//!     }
//! }
//!
//! impl DifferentiableVectorFunction<f64> for Himmelblau {
//!     fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
//!         dmatrix![
//!             2.0 * p[0], 1.0;
//!             1.0, 2.0 * p[1];
//!         ]
//!     }
//! }
//!
//! let optimum = LevenbergMarquardt::new()
//!     .optimize(
//!         100,
//!         &Himmelblau,
//!         dvector![0., 0.],
//!         Weight::unit(2),
//!         dvector![1., 1.],
//!     )
//!     .unwrap();
//! assert!(optimum.cost < 1e-10);
//! ```
//!
//! # Derivative checking
//!
//! A hand-written Jacobian can be compared against
//! [`differentiate_numerically`](fn.differentiate_numerically.html). If no
//! Jacobian is at hand at all, wrap the model in a
//! [`NumericalJacobian`](struct.NumericalJacobian.html).
//!
//! # Curve fitting
//!
//! Scalar models `$y = f(x; \vec{p})$` are fitted to observations through the
//! [`ParametricFunction`](trait.ParametricFunction.html) trait and the
//! [`CurveFitter`](struct.CurveFitter.html).
//!
//! # Logging
//!
//! The optimizers report their progress through the [`log`](https://docs.rs/log)
//! facade, at the `debug` level per iteration and `trace` for the internals of
//! the trust-region step.

mod brent;
mod checker;
mod conjugate_gradient;
mod equation;
mod error;
mod gauss_newton;
mod least_squares;
mod lm;
mod optimum;
mod problem;
mod qr;
mod trust_region;
mod utils;

pub use brent::{BrentSolver, Root};
pub use checker::{ConvergenceChecker, SimpleValueChecker, SimpleVectorValueChecker};
pub use conjugate_gradient::{
    find_upper_bound, DifferentiableMultivariateFunction, Formula, GoalType,
    NonLinearConjugateGradient,
};
pub use equation::{Curve, CurveFitter, ParametricFunction, WeightedObservedPoint};
pub use error::{ConvergenceFailure, OptimizerError};
pub use gauss_newton::GaussNewton;
pub use lm::LevenbergMarquardt;
pub use optimum::{LeastSquaresOptimum, PointValuePair, PointVectorValuePair, ScalarOptimum};
pub use problem::{DifferentiableVectorFunction, LeastSquaresProblem, VectorFunction, Weight};

pub use utils::{derivative, differentiate_numerically, NumericalJacobian};

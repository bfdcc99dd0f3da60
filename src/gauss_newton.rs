//! Gauss-Newton least squares optimizer.
use log::debug;
use nalgebra::{convert, DMatrix, DVector, RealField};
use num_traits::Float;

use crate::least_squares::{Evaluator, IterationState};
use crate::{
    ConvergenceChecker, ConvergenceFailure, DifferentiableVectorFunction, LeastSquaresOptimum,
    LeastSquaresProblem, OptimizerError, PointVectorValuePair, SimpleVectorValueChecker, Weight,
};
#[cfg(test)]
use crate::VectorFunction;
#[cfg(test)]
use approx::assert_relative_eq;
#[cfg(test)]
use nalgebra::{dmatrix, dvector};

/// Gauss-Newton optimization algorithm.
///
/// Every iteration linearizes the model around the current point and jumps
/// to the minimizer of the linearized problem,
/// ```math
///   \vec{x}_{k+1} = \vec{x}_k + \Delta\vec{x}\quad\text{where}\quad
///   \mathbf{J}^\top\mathbf{W}\mathbf{J}\,\Delta\vec{x} = \mathbf{J}^\top\mathbf{W}\vec{r}.
/// ```
/// There is no step control, so the algorithm only converges for good start
/// points. The linear system is solved either by an LU decomposition of the
/// normal equations (the default) or by a QR decomposition of the weighted
/// Jacobian.
///
/// A [`ConvergenceChecker`](trait.ConvergenceChecker.html) is required since
/// it is the only termination criterion.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussNewton<F, C = SimpleVectorValueChecker<F>> {
    use_lu: bool,
    singularity_threshold: F,
    checker: Option<C>,
}

impl<F: RealField + Float> GaussNewton<F> {
    pub fn new() -> Self {
        Self {
            use_lu: true,
            singularity_threshold: convert(1.0e-11),
            checker: None,
        }
    }
}

impl<F: RealField + Float> Default for GaussNewton<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: RealField + Float, C> GaussNewton<F, C> {
    /// Solve the linear systems with a QR decomposition of the weighted Jacobian
    /// instead of an LU decomposition of the normal equations.
    pub fn with_qr(self, use_qr: bool) -> Self {
        Self {
            use_lu: !use_qr,
            ..self
        }
    }

    /// LU pivots with smaller magnitude make the normal equations singular.
    /// The QR path only rejects exact zeros on the diagonal of `$\mathbf{R}$`.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{threshold} < 0$`.
    pub fn with_singularity_threshold(self, threshold: F) -> Self {
        assert!(!threshold.is_negative(), "singularity threshold must be >= 0");
        Self {
            singularity_threshold: threshold,
            ..self
        }
    }

    pub fn with_checker<C2>(self, checker: C2) -> GaussNewton<F, C2> {
        GaussNewton {
            use_lu: self.use_lu,
            singularity_threshold: self.singularity_threshold,
            checker: Some(checker),
        }
    }
}

impl<F, C> GaussNewton<F, C>
where
    F: RealField + Float,
    C: ConvergenceChecker<PointVectorValuePair<F>>,
{
    /// Fit `function` to `target`, spending at most `max_evaluations`
    /// evaluations of the model values.
    ///
    /// # Errors
    ///
    /// - [`InvalidArgument`](enum.OptimizerError.html#variant.InvalidArgument)
    ///   if no convergence checker was set,
    /// - [`SingularProblem`](enum.ConvergenceFailure.html#variant.SingularProblem)
    ///   if a linear system cannot be solved,
    /// - [`NonFiniteCost`](enum.ConvergenceFailure.html#variant.NonFiniteCost)
    ///   if the cost at an evaluated point is `NaN` or infinite,
    /// - [`TooManyEvaluations`](enum.OptimizerError.html#variant.TooManyEvaluations)
    ///   if the budget is exhausted.
    pub fn optimize<P>(
        &self,
        max_evaluations: usize,
        function: &P,
        target: DVector<F>,
        weight: Weight<F>,
        start: DVector<F>,
    ) -> Result<LeastSquaresOptimum<F>, OptimizerError>
    where
        P: DifferentiableVectorFunction<F> + ?Sized,
    {
        let problem = LeastSquaresProblem::new(target, weight, start)?;
        self.optimize_problem(max_evaluations, function, &problem)
    }

    pub fn optimize_problem<P>(
        &self,
        max_evaluations: usize,
        function: &P,
        problem: &LeastSquaresProblem<F>,
    ) -> Result<LeastSquaresOptimum<F>, OptimizerError>
    where
        P: DifferentiableVectorFunction<F> + ?Sized,
    {
        let checker = self.checker.as_ref().ok_or(OptimizerError::InvalidArgument(
            "Gauss-Newton requires a convergence checker",
        ))?;
        let mut evaluator = Evaluator::new(problem, function, max_evaluations);
        let mut point = problem.start().clone();
        let mut previous: Option<IterationState<F>> = None;
        let mut iterations = 0;
        loop {
            iterations += 1;
            let current = evaluator.evaluate(point)?;
            let jacobian = evaluator.compute_weighted_jacobian(&current.point)?;
            let weighted_residuals = problem.weighted_residuals(&current.residuals);
            debug!("iteration {}: cost {}", iterations, current.cost);

            let step = if self.use_lu {
                self.solve_normal_equations(jacobian, &weighted_residuals)
            } else {
                self.solve_least_squares(jacobian, &weighted_residuals)
            }
            .ok_or(ConvergenceFailure::SingularProblem)?;
            point = &current.point + step;

            if let Some(previous) = &previous {
                if checker.converged(iterations, &previous.pair(), &current.pair()) {
                    debug!(
                        "converged after {} iterations, cost {}",
                        iterations, current.cost
                    );
                    return Ok(evaluator.optimum(current, iterations));
                }
            }
            previous = Some(current);
        }
    }

    /// Solve `$\mathbf{J}^\top\mathbf{J}\vec{x} = \mathbf{J}^\top\vec{b}$` with an LU decomposition.
    ///
    /// The normal matrix and right-hand side are formed with `tr_mul`.
    fn solve_normal_equations(&self, jacobian: DMatrix<F>, b: &DVector<F>) -> Option<DVector<F>> {
        let normal = jacobian.tr_mul(&jacobian);
        let rhs = jacobian.tr_mul(b);
        let lu = normal.lu();
        if lu
            .u()
            .diagonal()
            .iter()
            .any(|u| Float::abs(*u) < self.singularity_threshold)
        {
            return None;
        }
        lu.solve(&rhs)
    }

    /// Solve `$\min_{\vec{x}}\|\mathbf{J}\vec{x} - \vec{b}\|$` with a QR decomposition.
    fn solve_least_squares(&self, jacobian: DMatrix<F>, b: &DVector<F>) -> Option<DVector<F>> {
        let (m, n) = jacobian.shape();
        if m < n {
            return None;
        }
        let qr = jacobian.qr();
        let r = qr.r();
        if r.diagonal().iter().any(|r| r.is_zero()) {
            return None;
        }
        let qt_b = qr.q().tr_mul(b);
        r.solve_upper_triangular(&qt_b)
    }
}

/// `$f(x) = (x - 3, x - 3)$`
#[cfg(test)]
struct Shifted;

#[cfg(test)]
impl VectorFunction<f64> for Shifted {
    fn value(&self, x: &DVector<f64>) -> DVector<f64> {
        dvector![x[0] - 3., x[0] - 3.]
    }
}

#[cfg(test)]
impl DifferentiableVectorFunction<f64> for Shifted {
    fn jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
        dmatrix![1.; 1.]
    }
}

/// `$f(a, b) = a + b t$` observed at `$t = 0, 1, 2$`.
#[cfg(test)]
struct Line;

#[cfg(test)]
impl VectorFunction<f64> for Line {
    fn value(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(3, |i, _| x[0] + x[1] * i as f64)
    }
}

#[cfg(test)]
impl DifferentiableVectorFunction<f64> for Line {
    fn jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(3, 2, |i, j| if j == 0 { 1. } else { i as f64 })
    }
}

#[cfg(test)]
fn optimizer(use_qr: bool) -> GaussNewton<f64> {
    GaussNewton::new()
        .with_qr(use_qr)
        .with_checker(SimpleVectorValueChecker::new(1e-10, 1e-10))
}

#[test]
fn single_parameter() {
    for use_qr in [false, true] {
        let optimum = optimizer(use_qr)
            .optimize(10, &Shifted, dvector![0., 0.], Weight::unit(2), dvector![0.])
            .unwrap();
        assert_relative_eq!(optimum.point, dvector![3.], epsilon = 1e-12);
        assert_relative_eq!(optimum.cost, 0., epsilon = 1e-12);
    }
}

#[test]
fn linear_model_is_solved_in_one_step() {
    for use_qr in [false, true] {
        let optimum = optimizer(use_qr)
            .optimize(
                10,
                &Line,
                dvector![1., 2., 4.],
                Weight::Diagonal(dvector![1., 2., 1.]),
                dvector![10., -10.],
            )
            .unwrap();
        // start, the solution and the repeated evaluation at the solution
        assert_eq!(optimum.evaluations, 3);
        assert_eq!(optimum.iterations, 3);
        // weighted normal equations [[4, 4], [4, 6]] x = [9, 12]
        assert_relative_eq!(optimum.point, dvector![0.75, 1.5], epsilon = 1e-10);
    }
}

#[test]
fn step_is_solved_before_the_convergence_check() {
    // the Jacobian vanishes at the solution x = 3
    struct Flat;
    impl VectorFunction<f64> for Flat {
        fn value(&self, x: &DVector<f64>) -> DVector<f64> {
            dvector![x[0] - 3.]
        }
    }
    impl DifferentiableVectorFunction<f64> for Flat {
        fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
            dmatrix![if x[0] < 2. { 1. } else { 0. }]
        }
    }
    let always = |_: usize, _: &PointVectorValuePair<f64>, _: &PointVectorValuePair<f64>| true;
    for use_qr in [false, true] {
        let result = GaussNewton::new()
            .with_qr(use_qr)
            .with_checker(always)
            .optimize(10, &Flat, dvector![0.], Weight::unit(1), dvector![0.]);
        assert_eq!(
            result.err().unwrap(),
            OptimizerError::Convergence(ConvergenceFailure::SingularProblem)
        );
    }

    // the first check compares the start with the first step
    let optimum = GaussNewton::new()
        .with_checker(always)
        .optimize(10, &Shifted, dvector![0., 0.], Weight::unit(2), dvector![0.])
        .unwrap();
    assert_eq!(optimum.iterations, 2);
    assert_eq!(optimum.evaluations, 2);
    assert_eq!(optimum.jacobian_evaluations, 2);
    assert_relative_eq!(optimum.point, dvector![3.], epsilon = 1e-12);
}

#[test]
fn checker_is_required() {
    let result = GaussNewton::new().optimize(
        10,
        &Shifted,
        dvector![0., 0.],
        Weight::unit(2),
        dvector![0.],
    );
    assert!(matches!(result, Err(OptimizerError::InvalidArgument(_))));
}

#[test]
fn singular_problem() {
    struct Degenerate;
    impl VectorFunction<f64> for Degenerate {
        fn value(&self, x: &DVector<f64>) -> DVector<f64> {
            dvector![x[0], x[0]]
        }
    }
    impl DifferentiableVectorFunction<f64> for Degenerate {
        fn jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
            dmatrix![
                1., 0.;
                1., 0.;
            ]
        }
    }
    for use_qr in [false, true] {
        let result = optimizer(use_qr).optimize(
            10,
            &Degenerate,
            dvector![1., 2.],
            Weight::unit(2),
            dvector![0., 0.],
        );
        assert_eq!(
            result.err().unwrap(),
            OptimizerError::Convergence(ConvergenceFailure::SingularProblem)
        );
    }
}

#[test]
fn evaluation_budget() {
    let never = |_: usize, _: &PointVectorValuePair<f64>, _: &PointVectorValuePair<f64>| false;
    let result = GaussNewton::new().with_checker(never).optimize(
        4,
        &Shifted,
        dvector![0., 0.],
        Weight::unit(2),
        dvector![0.],
    );
    assert_eq!(
        result.err().unwrap(),
        OptimizerError::TooManyEvaluations { max: 4 }
    );
}

//! Weighted least squares building blocks shared by the optimizers.
//!
//! A [`LeastSquaresProblem`](../struct.LeastSquaresProblem.html) knows how to
//! turn model values into residuals and costs, and how to estimate the
//! covariance of the parameters. The [`Evaluator`] adds a model function and
//! the bookkeeping of a single optimization run.
use nalgebra::{convert, DMatrix, DVector, RealField};
use num_traits::Float;

use crate::{
    ConvergenceFailure, DifferentiableVectorFunction, LeastSquaresOptimum, LeastSquaresProblem,
    OptimizerError, PointVectorValuePair,
};
#[cfg(test)]
use crate::{VectorFunction, Weight};
#[cfg(test)]
use approx::assert_relative_eq;
#[cfg(test)]
use nalgebra::{dmatrix, dvector};

impl<F: RealField + Float> LeastSquaresProblem<F> {
    /// Compute the residuals `$\vec{y} - \vec{f}(\vec{x})$`.
    pub fn compute_residuals(&self, objective: &DVector<F>) -> Result<DVector<F>, OptimizerError> {
        if objective.nrows() != self.observations() {
            return Err(OptimizerError::DimensionMismatch {
                expected: self.observations(),
                found: objective.nrows(),
            });
        }
        Ok(self.target() - objective)
    }

    /// Compute `$\mathbf{W}^{1/2}\vec{r}$`.
    pub fn weighted_residuals(&self, residuals: &DVector<F>) -> DVector<F> {
        self.weight_sqrt.mul_vector(residuals)
    }

    /// Compute the cost `$\sqrt{\vec{r}^\top\mathbf{W}\vec{r}}$`.
    pub fn compute_cost(&self, residuals: &DVector<F>) -> F {
        self.weighted_residuals(residuals).norm()
    }

    /// The weighted sum of squares `$\vec{r}^\top\mathbf{W}\vec{r}$` for a given cost.
    pub fn chi_square(&self, cost: F) -> F {
        cost * cost
    }

    /// Root mean square of the weighted residuals for a given cost.
    pub fn rms(&self, cost: F) -> F {
        Float::sqrt(self.chi_square(cost) / convert(self.observations() as f64))
    }

    /// Compute the covariance matrix `$(\mathbf{J}^\top\mathbf{W}\mathbf{J})^{-1}$` of the
    /// parameters at `params`.
    ///
    /// The inversion goes through a QR decomposition. If the magnitude of a
    /// diagonal entry of `$\mathbf{R}$` is at most `threshold` the matrix is
    /// considered singular.
    pub fn compute_covariances<P>(
        &self,
        function: &P,
        params: &DVector<F>,
        threshold: F,
    ) -> Result<DMatrix<F>, OptimizerError>
    where
        P: DifferentiableVectorFunction<F> + ?Sized,
    {
        let jacobian = self.weighted_jacobian(function, params)?;
        let jtj = jacobian.tr_mul(&jacobian);
        let n = jtj.nrows();
        let qr = jtj.qr();
        if qr
            .r()
            .diagonal()
            .iter()
            .any(|r| Float::abs(*r) <= threshold)
        {
            return Err(OptimizerError::SingularMatrix);
        }
        qr.solve(&DMatrix::identity(n, n))
            .ok_or(OptimizerError::SingularMatrix)
    }

    /// Estimate the standard deviation of every parameter,
    /// the square roots of the diagonal of the covariance matrix.
    pub fn compute_sigma<P>(
        &self,
        function: &P,
        params: &DVector<F>,
        threshold: F,
    ) -> Result<DVector<F>, OptimizerError>
    where
        P: DifferentiableVectorFunction<F> + ?Sized,
    {
        let covariances = self.compute_covariances(function, params, threshold)?;
        Ok(covariances.diagonal().map(|c| Float::sqrt(c)))
    }

    /// Scale the standard deviations by the goodness of fit,
    /// `$\sigma_i\sqrt{\chi^2/(m-n)}$`.
    ///
    /// # Errors
    ///
    /// Requires more observations than parameters.
    pub fn estimate_parameter_errors(
        &self,
        cost: F,
        sigma: &DVector<F>,
    ) -> Result<DVector<F>, OptimizerError> {
        let (m, n) = (self.observations(), sigma.nrows());
        if m <= n {
            return Err(OptimizerError::NotEnoughObservations {
                observations: m,
                parameters: n,
            });
        }
        let factor = Float::sqrt(self.chi_square(cost) / convert((m - n) as f64));
        Ok(sigma * factor)
    }

    fn weighted_jacobian<P>(&self, function: &P, x: &DVector<F>) -> Result<DMatrix<F>, OptimizerError>
    where
        P: DifferentiableVectorFunction<F> + ?Sized,
    {
        let jacobian = function.jacobian(x);
        if jacobian.nrows() != self.observations() {
            return Err(OptimizerError::DimensionMismatch {
                expected: self.observations(),
                found: jacobian.nrows(),
            });
        }
        if jacobian.ncols() != x.nrows() {
            return Err(OptimizerError::DimensionMismatch {
                expected: x.nrows(),
                found: jacobian.ncols(),
            });
        }
        Ok(self.weight_sqrt.mul_matrix(jacobian))
    }
}

/// Model values, residuals and cost at one point.
#[derive(Debug, Clone)]
pub(crate) struct IterationState<F: RealField> {
    pub point: DVector<F>,
    pub objective: DVector<F>,
    pub residuals: DVector<F>,
    pub cost: F,
}

impl<F: RealField> IterationState<F> {
    pub fn pair(&self) -> PointVectorValuePair<F> {
        PointVectorValuePair {
            point: self.point.clone(),
            value: self.objective.clone(),
        }
    }
}

/// Everything a single optimization run needs: the problem, the model
/// function, and the evaluation counters.
pub(crate) struct Evaluator<'a, F: RealField, P: ?Sized> {
    problem: &'a LeastSquaresProblem<F>,
    function: &'a P,
    max_evaluations: usize,
    evaluations: usize,
    jacobian_evaluations: usize,
}

impl<'a, F, P> Evaluator<'a, F, P>
where
    F: RealField + Float,
    P: DifferentiableVectorFunction<F> + ?Sized,
{
    pub fn new(problem: &'a LeastSquaresProblem<F>, function: &'a P, max_evaluations: usize) -> Self {
        Self {
            problem,
            function,
            max_evaluations,
            evaluations: 0,
            jacobian_evaluations: 0,
        }
    }

    pub fn problem(&self) -> &'a LeastSquaresProblem<F> {
        self.problem
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn jacobian_evaluations(&self) -> usize {
        self.jacobian_evaluations
    }

    /// Evaluate the model function, counted against the budget.
    pub fn compute_objective_value(&mut self, x: &DVector<F>) -> Result<DVector<F>, OptimizerError> {
        if self.evaluations >= self.max_evaluations {
            return Err(OptimizerError::TooManyEvaluations {
                max: self.max_evaluations,
            });
        }
        self.evaluations += 1;
        let value = self.function.value(x);
        if value.nrows() != self.problem.observations() {
            return Err(OptimizerError::DimensionMismatch {
                expected: self.problem.observations(),
                found: value.nrows(),
            });
        }
        Ok(value)
    }

    /// Compute `$\mathbf{W}^{1/2}\mathbf{J}$`.
    pub fn compute_weighted_jacobian(&mut self, x: &DVector<F>) -> Result<DMatrix<F>, OptimizerError> {
        self.jacobian_evaluations += 1;
        self.problem.weighted_jacobian(self.function, x)
    }

    /// Evaluate everything the optimizers need at `point`.
    ///
    /// A point with a `NaN` or infinite cost is rejected with
    /// [`NonFiniteCost`](enum.ConvergenceFailure.html#variant.NonFiniteCost).
    pub fn evaluate(&mut self, point: DVector<F>) -> Result<IterationState<F>, OptimizerError> {
        let objective = self.compute_objective_value(&point)?;
        let residuals = self.problem.compute_residuals(&objective)?;
        let cost = self.problem.compute_cost(&residuals);
        if !Float::is_finite(cost) {
            return Err(ConvergenceFailure::NonFiniteCost.into());
        }
        Ok(IterationState {
            point,
            objective,
            residuals,
            cost,
        })
    }

    pub fn optimum(&self, state: IterationState<F>, iterations: usize) -> LeastSquaresOptimum<F> {
        LeastSquaresOptimum {
            point: state.point,
            value: state.objective,
            residuals: state.residuals,
            cost: state.cost,
            iterations,
            evaluations: self.evaluations,
            jacobian_evaluations: self.jacobian_evaluations,
        }
    }
}

/// `$f(a, b) = a + b t$` observed at `$t = 0, 1, 2, 3$`.
#[cfg(test)]
struct Line;

#[cfg(test)]
impl VectorFunction<f64> for Line {
    fn value(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(4, |i, _| x[0] + x[1] * i as f64)
    }
}

#[cfg(test)]
impl DifferentiableVectorFunction<f64> for Line {
    fn jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(4, 2, |i, j| if j == 0 { 1. } else { i as f64 })
    }
}

#[cfg(test)]
fn line_problem(weight: Weight<f64>) -> LeastSquaresProblem<f64> {
    LeastSquaresProblem::new(dvector![1., 3., 4., 8.], weight, dvector![0., 0.]).unwrap()
}

#[test]
fn residuals_and_cost() {
    let problem = line_problem(Weight::Diagonal(dvector![1., 4., 1., 1.]));
    let residuals = problem.compute_residuals(&dvector![1., 2., 4., 6.]).unwrap();
    assert_eq!(residuals, dvector![0., 1., 0., 2.]);
    assert_relative_eq!(problem.compute_cost(&residuals), 8f64.sqrt());
    assert_relative_eq!(problem.chi_square(problem.compute_cost(&residuals)), 8.);
    assert_relative_eq!(problem.rms(problem.compute_cost(&residuals)), 2f64.sqrt());

    assert_eq!(
        problem.compute_residuals(&dvector![1., 2.]),
        Err(OptimizerError::DimensionMismatch {
            expected: 4,
            found: 2
        })
    );
}

#[test]
fn cost_is_reproducible() {
    let problem = line_problem(Weight::unit(4));
    let mut evaluator = Evaluator::new(&problem, &Line, 10);
    let a = evaluator.evaluate(dvector![0.5, 1.5]).unwrap();
    let b = evaluator.evaluate(dvector![0.5, 1.5]).unwrap();
    assert_eq!(a.cost, b.cost);
    assert_eq!(a.residuals, b.residuals);
    assert_eq!(evaluator.evaluations(), 2);
}

#[test]
fn non_finite_cost_is_rejected() {
    let problem = line_problem(Weight::unit(4));
    let mut evaluator = Evaluator::new(&problem, &Line, 10);
    assert_eq!(
        evaluator.evaluate(dvector![f64::NAN, 0.]).err(),
        Some(OptimizerError::Convergence(ConvergenceFailure::NonFiniteCost))
    );
    assert_eq!(
        evaluator.evaluate(dvector![0., f64::INFINITY]).err(),
        Some(OptimizerError::Convergence(ConvergenceFailure::NonFiniteCost))
    );
    assert_eq!(evaluator.evaluations(), 2);
}

#[test]
fn evaluation_budget() {
    let problem = line_problem(Weight::unit(4));
    let mut evaluator = Evaluator::new(&problem, &Line, 2);
    assert!(evaluator.compute_objective_value(&dvector![0., 0.]).is_ok());
    assert!(evaluator.compute_objective_value(&dvector![0., 0.]).is_ok());
    assert_eq!(
        evaluator.compute_objective_value(&dvector![0., 0.]),
        Err(OptimizerError::TooManyEvaluations { max: 2 })
    );
}

#[test]
fn weighted_jacobian_diagonal_and_dense() {
    let problem = line_problem(Weight::Diagonal(dvector![1., 4., 9., 16.]));
    let mut evaluator = Evaluator::new(&problem, &Line, 10);
    let jacobian = evaluator.compute_weighted_jacobian(&dvector![0., 0.]).unwrap();
    assert_eq!(
        jacobian,
        dmatrix![
            1., 0.;
            2., 2.;
            3., 6.;
            4., 12.;
        ]
    );
    assert_eq!(evaluator.jacobian_evaluations(), 1);

    let dense = DMatrix::from_diagonal(&dvector![1., 4., 9., 16.]);
    let problem = line_problem(Weight::Dense(dense));
    let mut evaluator = Evaluator::new(&problem, &Line, 10);
    let dense_jacobian = evaluator.compute_weighted_jacobian(&dvector![0., 0.]).unwrap();
    assert_relative_eq!(dense_jacobian, jacobian, epsilon = 1e-12);
}

#[test]
fn jacobian_shape_is_checked() {
    struct Broken;
    impl VectorFunction<f64> for Broken {
        fn value(&self, _x: &DVector<f64>) -> DVector<f64> {
            DVector::zeros(4)
        }
    }
    impl DifferentiableVectorFunction<f64> for Broken {
        fn jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::zeros(3, 2)
        }
    }
    let problem = line_problem(Weight::unit(4));
    let mut evaluator = Evaluator::new(&problem, &Broken, 10);
    assert_eq!(
        evaluator.compute_weighted_jacobian(&dvector![0., 0.]),
        Err(OptimizerError::DimensionMismatch {
            expected: 4,
            found: 3
        })
    );
}

#[test]
fn covariances_of_line_fit() {
    let problem = line_problem(Weight::unit(4));
    let params = dvector![0., 0.];
    // J^T J = [[4, 6], [6, 14]]
    let covariances = problem.compute_covariances(&Line, &params, 1e-10).unwrap();
    let expected = dmatrix![
        0.7, -0.3;
        -0.3, 0.2;
    ];
    assert_relative_eq!(covariances, expected, epsilon = 1e-12);
    assert_relative_eq!(covariances.transpose(), covariances, epsilon = 1e-12);
    assert!(covariances.diagonal().iter().all(|c| *c >= 0.));

    let sigma = problem.compute_sigma(&Line, &params, 1e-10).unwrap();
    assert_relative_eq!(sigma, dvector![0.7f64.sqrt(), 0.2f64.sqrt()], epsilon = 1e-12);

    let errors = problem.estimate_parameter_errors(2., &sigma).unwrap();
    assert_relative_eq!(errors, &sigma * 2f64.sqrt(), epsilon = 1e-12);
}

#[test]
fn singular_covariances() {
    struct Degenerate;
    impl VectorFunction<f64> for Degenerate {
        fn value(&self, x: &DVector<f64>) -> DVector<f64> {
            DVector::from_element(3, x[0] + x[1])
        }
    }
    impl DifferentiableVectorFunction<f64> for Degenerate {
        fn jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_element(3, 2, 1.)
        }
    }
    let problem =
        LeastSquaresProblem::new(dvector![1., 2., 3.], Weight::unit(3), dvector![0., 0.])
            .unwrap();
    assert_eq!(
        problem.compute_covariances(&Degenerate, &dvector![0., 0.], 1e-10),
        Err(OptimizerError::SingularMatrix)
    );
    assert_eq!(
        problem.compute_sigma(&Degenerate, &dvector![0., 0.], 1e-10),
        Err(OptimizerError::SingularMatrix)
    );
}

#[test]
fn parameter_errors_need_observations() {
    let problem =
        LeastSquaresProblem::new(dvector![1., 2.], Weight::unit(2), dvector![0., 0.]).unwrap();
    assert_eq!(
        problem.estimate_parameter_errors(1., &dvector![1., 1.]),
        Err(OptimizerError::NotEnoughObservations {
            observations: 2,
            parameters: 2
        })
    );
}

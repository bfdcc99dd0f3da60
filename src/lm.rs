use log::{debug, trace};
use nalgebra::{convert, DVector, RealField};
use num_traits::Float;

use crate::least_squares::{Evaluator, IterationState};
use crate::qr::{LinearLeastSquaresDiagonalProblem, PivotedQR};
use crate::trust_region::determine_lambda_and_parameter_update;
use crate::{
    ConvergenceChecker, ConvergenceFailure, DifferentiableVectorFunction, LeastSquaresOptimum,
    LeastSquaresProblem, OptimizerError, PointVectorValuePair, SimpleVectorValueChecker, Weight,
};

#[cfg(test)]
mod test_examples;
#[cfg(test)]
mod test_helpers;
#[cfg(test)]
mod test_init_step;
#[cfg(test)]
mod test_update_diag;

/// Reasons for a successful termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
    /// The residuals are orthogonal to the columns of the Jacobian.
    Orthogonal,
    /// The relative reduction of the cost or the relative step size is small enough.
    Converged { ftol: bool, xtol: bool },
    /// The convergence checker accepted the last step.
    Checker,
}

/// Levenberg-Marquardt optimization algorithm.
///
/// See the [crate documentation](index.html) for a usage example.
///
/// This is the MINPACK variant of the algorithm which solves the
/// trust-region sub-problem through a pivoted QR decomposition of the
/// weighted Jacobian. The runtime and termination behavior can be
/// controlled by various hyperparameters.
///
/// An optional [`ConvergenceChecker`](trait.ConvergenceChecker.html) is
/// consulted after every accepted step, in addition to the built-in tests.
#[derive(Clone, Debug, PartialEq)]
pub struct LevenbergMarquardt<F, C = SimpleVectorValueChecker<F>> {
    initial_step_bound_factor: F,
    cost_relative_tolerance: F,
    par_relative_tolerance: F,
    ortho_tolerance: F,
    qr_ranking_threshold: F,
    checker: Option<C>,
}

impl<F: RealField + Float> LevenbergMarquardt<F> {
    pub fn new() -> Self {
        let tol: F = convert(1.0e-10);
        Self {
            initial_step_bound_factor: convert(100.0),
            cost_relative_tolerance: tol,
            par_relative_tolerance: tol,
            ortho_tolerance: tol,
            qr_ranking_threshold: <F as Float>::min_positive_value(),
            checker: None,
        }
    }
}

impl<F: RealField + Float> Default for LevenbergMarquardt<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: RealField + Float, C> LevenbergMarquardt<F, C> {
    /// Set factor for the initial step bound.
    ///
    /// This bound is set to `$\mathtt{factor}\cdot\|\mathbf{D}\vec{x}\|$`
    /// if nonzero, or else to `factor` itself. In most cases `factor` should lie
    /// in the interval `$[0.1,100]$`.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{factor} \leq 0$`.
    pub fn with_initial_step_bound_factor(self, factor: F) -> Self {
        assert!(factor.is_positive(), "initial step bound factor must be > 0");
        Self {
            initial_step_bound_factor: factor,
            ..self
        }
    }

    /// Set the relative reduction of the cost desired.
    ///
    /// Termination occurs when both the actual and
    /// predicted relative reductions of the sum of squares are at most `tolerance`.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{tolerance} < 0$`.
    pub fn with_cost_relative_tolerance(self, tolerance: F) -> Self {
        assert!(!tolerance.is_negative(), "cost tolerance must be >= 0");
        Self {
            cost_relative_tolerance: tolerance,
            ..self
        }
    }

    /// Set relative error between last two approximations.
    ///
    /// Termination occurs when the relative error between
    /// two consecutive iterates is at most `tolerance`.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{tolerance} < 0$`.
    pub fn with_par_relative_tolerance(self, tolerance: F) -> Self {
        assert!(!tolerance.is_negative(), "parameter tolerance must be >= 0");
        Self {
            par_relative_tolerance: tolerance,
            ..self
        }
    }

    /// Set orthogonality desired between the residual vector and its derivative.
    ///
    /// Termination occurs when the cosine of the angle
    /// between the weighted residuals `$\vec{r}$` and any column of the weighted Jacobian `$\mathbf{J}$` is at
    /// most `tolerance` in absolute value.
    ///
    /// With other words, the algorithm will terminate if
    /// ```math
    ///   \max_{i=1,\ldots,n}\frac{|(\mathbf{J}^\top \vec{r})_i|}{\|\mathbf{J}\vec{e}_i\|\|\vec{r}\|} \leq \texttt{tolerance}.
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{tolerance} < 0$`.
    pub fn with_ortho_tolerance(self, tolerance: F) -> Self {
        assert!(!tolerance.is_negative(), "orthogonality tolerance must be >= 0");
        Self {
            ortho_tolerance: tolerance,
            ..self
        }
    }

    /// Set the threshold for the squared column norms below which the QR
    /// decomposition considers the Jacobian rank deficient.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{threshold} < 0$`.
    pub fn with_qr_ranking_threshold(self, threshold: F) -> Self {
        assert!(!threshold.is_negative(), "ranking threshold must be >= 0");
        Self {
            qr_ranking_threshold: threshold,
            ..self
        }
    }

    /// Consult `checker` after every accepted step.
    pub fn with_checker<C2>(self, checker: C2) -> LevenbergMarquardt<F, C2> {
        LevenbergMarquardt {
            initial_step_bound_factor: self.initial_step_bound_factor,
            cost_relative_tolerance: self.cost_relative_tolerance,
            par_relative_tolerance: self.par_relative_tolerance,
            ortho_tolerance: self.ortho_tolerance,
            qr_ranking_threshold: self.qr_ranking_threshold,
            checker: Some(checker),
        }
    }
}

impl<F, C> LevenbergMarquardt<F, C>
where
    F: RealField + Float,
    C: ConvergenceChecker<PointVectorValuePair<F>>,
{
    /// Fit `function` to `target`.
    ///
    /// At most `max_evaluations` evaluations of the model values are spent.
    ///
    /// # Errors
    ///
    /// Besides invalid input, which is reported as in
    /// [`LeastSquaresProblem::new`](struct.LeastSquaresProblem.html#method.new),
    /// this fails with
    ///
    /// - [`TooManyEvaluations`](enum.OptimizerError.html#variant.TooManyEvaluations)
    ///   if the budget is exhausted,
    /// - [`Convergence`](enum.OptimizerError.html#variant.Convergence) if the
    ///   tolerances are too small to be reached in floating point arithmetic,
    ///   the Jacobian contains `NaN` or `$\pm\infty$` or the cost at an
    ///   evaluated point is not finite.
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

    /// Like [`optimize`](#method.optimize) for an already validated problem.
    pub fn optimize_problem<P>(
        &self,
        max_evaluations: usize,
        function: &P,
        problem: &LeastSquaresProblem<F>,
    ) -> Result<LeastSquaresOptimum<F>, OptimizerError>
    where
        P: DifferentiableVectorFunction<F> + ?Sized,
    {
        let evaluator = Evaluator::new(problem, function, max_evaluations);
        let (optimum, termination) = LM::new(self, evaluator)?.run()?;
        debug!(
            "terminated with {:?} after {} iterations and {} evaluations, cost {}",
            termination, optimum.iterations, optimum.evaluations, optimum.cost
        );
        Ok(optimum)
    }
}

/// Reductions of the cost predicted and achieved by a trial step.
#[derive(Debug, Clone, Copy)]
struct TrialStep<F> {
    actual_reduction: F,
    predicted_reduction: F,
    ratio: F,
    accepted: bool,
}

/// State of a single run of the algorithm.
pub(crate) struct LM<'a, F, P, C>
where
    F: RealField,
    P: ?Sized,
{
    config: &'a LevenbergMarquardt<F, C>,
    evaluator: Evaluator<'a, F, P>,
    current: IterationState<F>,
    diag: DVector<F>,
    delta: F,
    lambda: F,
    xnorm: F,
    max_cosine: F,
    first_iteration: bool,
    iterations: usize,
}

impl<'a, F, P, C> LM<'a, F, P, C>
where
    F: RealField + Float,
    P: DifferentiableVectorFunction<F> + ?Sized,
    C: ConvergenceChecker<PointVectorValuePair<F>>,
{
    /// Evaluate the start point.
    pub fn new(
        config: &'a LevenbergMarquardt<F, C>,
        mut evaluator: Evaluator<'a, F, P>,
    ) -> Result<Self, OptimizerError> {
        let start = evaluator.problem().start().clone();
        let n = start.nrows();
        let current = evaluator.evaluate(start)?;
        Ok(Self {
            config,
            evaluator,
            current,
            diag: DVector::from_element(n, F::one()),
            delta: F::zero(),
            lambda: F::zero(),
            xnorm: F::zero(),
            max_cosine: F::zero(),
            first_iteration: true,
            iterations: 0,
        })
    }

    pub fn run(mut self) -> Result<(LeastSquaresOptimum<F>, Termination), OptimizerError> {
        loop {
            self.iterations += 1;
            let previous = self.current.pair();
            let mut lls = self.linearize()?;
            if let Err(termination) = self.update_diag(&lls) {
                return Ok(self.finish(termination));
            }
            debug!(
                "iteration {}: cost {}, delta {}, rank {}",
                self.iterations,
                self.current.cost,
                self.delta,
                lls.rank()
            );

            loop {
                let step = self.trial_step(&mut lls)?;
                if step.accepted {
                    self.first_iteration = false;
                    self.xnorm = self.diag.component_mul(&self.current.point).norm();
                    if let Some(checker) = &self.config.checker {
                        if checker.converged(self.iterations, &previous, &self.current.pair()) {
                            return Ok(self.finish(Termination::Checker));
                        }
                    }
                }
                if let Some(termination) = self.check_convergence(&step)? {
                    return Ok(self.finish(termination));
                }
                if step.accepted {
                    break;
                }
            }
        }
    }

    /// Decompose the negated weighted Jacobian at the current point.
    ///
    /// The right-hand side of the resulting problem are the weighted residuals.
    fn linearize(&mut self) -> Result<LinearLeastSquaresDiagonalProblem<F>, OptimizerError> {
        let jacobian = self
            .evaluator
            .compute_weighted_jacobian(&self.current.point)?;
        let qr = PivotedQR::new(-jacobian, self.config.qr_ranking_threshold)?;
        let weighted_residuals = self
            .evaluator
            .problem()
            .weighted_residuals(&self.current.residuals);
        Ok(qr.into_least_squares_diagonal_problem(weighted_residuals))
    }

    /// Initialize or update the scaling and test for orthogonality.
    fn update_diag(&mut self, lls: &LinearLeastSquaresDiagonalProblem<F>) -> Result<(), Termination> {
        if self.first_iteration {
            for (d, norm) in self.diag.iter_mut().zip(lls.column_norms.iter()) {
                *d = if norm.is_zero() { F::one() } else { *norm };
            }
            self.xnorm = self.diag.component_mul(&self.current.point).norm();
            let factor = self.config.initial_step_bound_factor;
            self.delta = if self.xnorm.is_zero() {
                factor
            } else {
                factor * self.xnorm
            };
        }

        self.max_cosine = lls.max_a_t_b_scaled(self.current.cost);
        if self.max_cosine <= self.config.ortho_tolerance {
            return Err(Termination::Orthogonal);
        }

        for (d, norm) in self.diag.iter_mut().zip(lls.column_norms.iter()) {
            *d = Float::max(*d, *norm);
        }
        Ok(())
    }

    /// Compute, evaluate and rate a step within the trust region.
    ///
    /// The step replaces the current point when accepted.
    fn trial_step(
        &mut self,
        lls: &mut LinearLeastSquaresDiagonalProblem<F>,
    ) -> Result<TrialStep<F>, OptimizerError> {
        let p1: F = convert(0.1);
        let half: F = convert(0.5);

        let param = determine_lambda_and_parameter_update(lls, &self.diag, self.delta, self.lambda);
        self.lambda = param.lambda;
        let pnorm = param.dp_norm;
        // at first call, adjust the initial step bound
        if self.first_iteration {
            self.delta = Float::min(self.delta, pnorm);
        }

        let trial = self.evaluator.evaluate(&self.current.point - &param.step)?;
        let previous_cost = self.current.cost;

        // Compute predicted and actual reduction
        let actual_reduction = if p1 * trial.cost < previous_cost {
            F::one() - Float::powi(trial.cost / previous_cost, 2)
        } else {
            -F::one()
        };
        let previous_cost2 = previous_cost * previous_cost;
        let coeff1 = Float::powi(lls.a_x_norm(&param.step), 2) / previous_cost2;
        let coeff2 = self.lambda * pnorm * pnorm / previous_cost2;
        let predicted_reduction = coeff1 + coeff2 + coeff2;
        let dir_der = -(coeff1 + coeff2);
        let ratio = if predicted_reduction.is_zero() {
            F::zero()
        } else {
            actual_reduction / predicted_reduction
        };

        if ratio <= convert(0.25) {
            let mut temp = if actual_reduction < F::zero() {
                half * dir_der / (dir_der + half * actual_reduction)
            } else {
                half
            };
            if p1 * trial.cost >= previous_cost || temp < p1 {
                temp = p1;
            }
            self.delta = temp * Float::min(self.delta, pnorm / p1);
            self.lambda /= temp;
        } else if self.lambda.is_zero() || ratio >= convert(0.75) {
            self.delta = pnorm + pnorm;
            self.lambda *= half;
        }
        trace!(
            "lambda {}, |Dp| {}, ratio {}, new delta {}",
            self.lambda,
            pnorm,
            ratio,
            self.delta
        );

        let accepted = ratio >= convert(1.0e-4);
        if accepted {
            self.current = trial;
        }
        Ok(TrialStep {
            actual_reduction,
            predicted_reduction,
            ratio,
            accepted,
        })
    }

    fn check_convergence(&self, step: &TrialStep<F>) -> Result<Option<Termination>, OptimizerError> {
        let two: F = convert(2.0);
        let ftol = Float::abs(step.actual_reduction) <= self.config.cost_relative_tolerance
            && step.predicted_reduction <= self.config.cost_relative_tolerance
            && step.ratio <= two;
        let xtol = self.delta <= self.config.par_relative_tolerance * self.xnorm;
        if ftol || xtol {
            return Ok(Some(Termination::Converged { ftol, xtol }));
        }

        // the tolerances cannot be reached in floating point arithmetic
        let eps = <F as Float>::epsilon();
        if Float::abs(step.actual_reduction) <= eps
            && step.predicted_reduction <= eps
            && step.ratio <= two
        {
            Err(ConvergenceFailure::TooSmallCostRelativeTolerance.into())
        } else if self.delta <= eps * self.xnorm {
            Err(ConvergenceFailure::TooSmallParametersRelativeTolerance.into())
        } else if self.max_cosine <= eps {
            Err(ConvergenceFailure::TooSmallOrthogonalityTolerance.into())
        } else {
            Ok(None)
        }
    }

    fn finish(self, termination: Termination) -> (LeastSquaresOptimum<F>, Termination) {
        (
            self.evaluator.optimum(self.current, self.iterations),
            termination,
        )
    }
}

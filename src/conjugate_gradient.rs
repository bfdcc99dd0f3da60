//! Nonlinear conjugate gradient optimizer for scalar objectives.
use log::{debug, trace};
use nalgebra::{convert, DVector, RealField};
use num_traits::Float;

use crate::{BrentSolver, ConvergenceChecker, OptimizerError, PointValuePair, ScalarOptimum};
#[cfg(test)]
use crate::SimpleValueChecker;
#[cfg(test)]
use approx::assert_relative_eq;
#[cfg(test)]
use nalgebra::dvector;

/// A scalar objective `$f\!:\R^n\to\R$` together with its gradient.
pub trait DifferentiableMultivariateFunction<F: RealField> {
    fn value(&self, x: &DVector<F>) -> F;

    /// Compute `$\nabla f(\vec{x})$`.
    fn gradient(&self, x: &DVector<F>) -> DVector<F>;
}

/// Update formula for the conjugate search direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formula {
    /// `$\beta_k = \frac{\|\vec{g}_{k+1}\|^2}{\|\vec{g}_k\|^2}$`
    FletcherReeves,
    /// `$\beta_k = \frac{\vec{g}_{k+1}^\top(\vec{g}_{k+1} - \vec{g}_k)}{\|\vec{g}_k\|^2}$`
    PolakRibiere,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalType {
    Minimize,
    Maximize,
}

/// Nonlinear conjugate gradient optimization algorithm.
///
/// Each iteration searches along the current direction for a zero of the
/// directional derivative. The zero is bracketed by growing the step from
/// `initial_step` and then refined with a [`BrentSolver`](struct.BrentSolver.html).
/// The direction is reset to steepest descent every `$n$` iterations and
/// whenever `$\beta < 0$`.
///
/// A [`ConvergenceChecker`](trait.ConvergenceChecker.html) on
/// [`PointValuePair`](struct.PointValuePair.html) is required.
#[derive(Clone, Debug, PartialEq)]
pub struct NonLinearConjugateGradient<F, C> {
    formula: Formula,
    goal: GoalType,
    initial_step: F,
    solver: BrentSolver<F>,
    checker: C,
}

impl<F: RealField + Float, C> NonLinearConjugateGradient<F, C> {
    /// The line search uses a Brent solver with an absolute accuracy of `$10^{-15}$`.
    pub fn new(formula: Formula, checker: C) -> Self {
        Self {
            formula,
            goal: GoalType::Minimize,
            initial_step: F::one(),
            solver: BrentSolver::new().with_absolute_accuracy(convert(1.0e-15)),
            checker,
        }
    }

    pub fn with_goal(self, goal: GoalType) -> Self {
        Self { goal, ..self }
    }

    /// Set the first trial step of the bracketing phase of the line search.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{step} \leq 0$`.
    pub fn with_initial_step(self, step: F) -> Self {
        assert!(step.is_positive(), "initial step must be > 0");
        Self {
            initial_step: step,
            ..self
        }
    }

    pub fn with_line_search_solver(self, solver: BrentSolver<F>) -> Self {
        Self { solver, ..self }
    }
}

impl<F, C> NonLinearConjugateGradient<F, C>
where
    F: RealField + Float,
    C: ConvergenceChecker<PointValuePair<F>>,
{
    /// Optimize `function` from `start`.
    ///
    /// At most `max_evaluations` evaluations are spent on objective values and
    /// line searches together.
    ///
    /// # Errors
    ///
    /// - [`BracketNotFound`](enum.OptimizerError.html#variant.BracketNotFound)
    ///   if the line search finds no zero of the directional derivative,
    /// - [`TooManyEvaluations`](enum.OptimizerError.html#variant.TooManyEvaluations)
    ///   if the budget is exhausted,
    /// - [`InvalidArgument`](enum.OptimizerError.html#variant.InvalidArgument)
    ///   for an empty start point.
    pub fn optimize<P>(
        &self,
        max_evaluations: usize,
        function: &P,
        start: DVector<F>,
    ) -> Result<ScalarOptimum<F>, OptimizerError>
    where
        P: DifferentiableMultivariateFunction<F> + ?Sized,
    {
        let n = start.nrows();
        if n == 0 {
            return Err(OptimizerError::InvalidArgument(
                "start point must have at least one parameter",
            ));
        }
        let mut evaluations = 0;
        let mut line_search_evaluations = 0;

        let mut point = start;
        let mut steepest_descent = self.descent(function, &point);
        let mut search_direction = steepest_descent.clone();
        let mut delta = steepest_descent.norm_squared();
        let mut current: Option<PointValuePair<F>> = None;
        let mut iterations = 0;

        loop {
            iterations += 1;
            if evaluations + line_search_evaluations >= max_evaluations {
                return Err(OptimizerError::TooManyEvaluations {
                    max: max_evaluations,
                });
            }
            evaluations += 1;
            let objective = function.value(&point);
            let previous = current.replace(PointValuePair {
                point: point.clone(),
                value: objective,
            });
            if let (Some(previous), Some(current)) = (&previous, &current) {
                if self.checker.converged(iterations, previous, current) {
                    debug!(
                        "converged after {} iterations, objective {}",
                        iterations, objective
                    );
                    return Ok(ScalarOptimum {
                        point,
                        value: objective,
                        iterations,
                        evaluations,
                    });
                }
            }
            debug!("iteration {}: objective {}", iterations, objective);

            // zero of the directional derivative along the search direction
            let line = |alpha: F| {
                let shifted = &point + &search_direction * alpha;
                self.descent(function, &shifted).dot(&search_direction)
            };
            let upper = find_upper_bound(&line, F::zero(), self.initial_step)?;
            let remaining = max_evaluations.saturating_sub(evaluations + line_search_evaluations);
            let step = self
                .solver
                .solve(remaining, &line, F::zero(), upper)
                .map_err(|err| match err {
                    OptimizerError::TooManyEvaluations { .. } => OptimizerError::TooManyEvaluations {
                        max: max_evaluations,
                    },
                    err => err,
                })?;
            line_search_evaluations += step.evaluations;
            trace!("line search: bracket [0, {}], step {}", upper, step.x);
            point += &search_direction * step.x;

            let next_descent = self.descent(function, &point);
            let delta_old = delta;
            delta = next_descent.norm_squared();
            let beta = match self.formula {
                Formula::FletcherReeves => delta / delta_old,
                Formula::PolakRibiere => {
                    let delta_mid = next_descent.dot(&steepest_descent);
                    (delta - delta_mid) / delta_old
                }
            };
            steepest_descent = next_descent;

            if iterations % n == 0 || beta < F::zero() {
                // restart
                search_direction.copy_from(&steepest_descent);
            } else {
                search_direction = &steepest_descent + &search_direction * beta;
            }
        }
    }

    /// The gradient, negated when minimizing.
    fn descent<P>(&self, function: &P, x: &DVector<F>) -> DVector<F>
    where
        P: DifferentiableMultivariateFunction<F> + ?Sized,
    {
        let gradient = function.gradient(x);
        match self.goal {
            GoalType::Minimize => -gradient,
            GoalType::Maximize => gradient,
        }
    }
}

/// Find `$b > a$` such that `$f(a)$` and `$f(b)$` do not have the same sign.
///
/// The trial step starts at `h` and grows by a factor of at least 2, more if
/// `$|f|$` decreases slowly.
///
/// # Errors
///
/// Fails with [`BracketNotFound`](enum.OptimizerError.html#variant.BracketNotFound)
/// once the step exceeds the largest finite value.
pub fn find_upper_bound<F, G>(f: G, a: F, h: F) -> Result<F, OptimizerError>
where
    F: RealField + Float,
    G: Fn(F) -> F,
{
    let two: F = convert(2.);
    let y_a = f(a);
    let mut step = h;
    while step < <F as Float>::max_value() {
        let b = a + step;
        let y_b = f(b);
        if y_a * y_b <= F::zero() {
            return Ok(b);
        }
        step *= Float::max(two, y_a / y_b);
    }
    Err(OptimizerError::BracketNotFound)
}

/// `$(x - 1)^2 + 10 (y + 2)^2$`
#[cfg(test)]
struct Bowl;

#[cfg(test)]
impl DifferentiableMultivariateFunction<f64> for Bowl {
    fn value(&self, x: &DVector<f64>) -> f64 {
        (x[0] - 1.).powi(2) + 10. * (x[1] + 2.).powi(2)
    }

    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        dvector![2. * (x[0] - 1.), 20. * (x[1] + 2.)]
    }
}

/// `$-\frac{1}{2}\|\vec{x} - \vec{c}\|^2$` with a maximum at `$\vec{c}$`.
#[cfg(test)]
struct Dome;

#[cfg(test)]
impl DifferentiableMultivariateFunction<f64> for Dome {
    fn value(&self, x: &DVector<f64>) -> f64 {
        -0.5 * ((x[0] - 3.).powi(2) + (x[1] - 0.5).powi(2) + 4. * x[2].powi(2))
    }

    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        dvector![-(x[0] - 3.), -(x[1] - 0.5), -4. * x[2]]
    }
}

/// `$x + y$`, unbounded below.
#[cfg(test)]
struct Plane;

#[cfg(test)]
impl DifferentiableMultivariateFunction<f64> for Plane {
    fn value(&self, x: &DVector<f64>) -> f64 {
        x[0] + x[1]
    }

    fn gradient(&self, _x: &DVector<f64>) -> DVector<f64> {
        dvector![1., 1.]
    }
}

#[cfg(test)]
fn checker() -> SimpleValueChecker<f64> {
    SimpleValueChecker::new(1e-12, 1e-12)
}

#[test]
fn quadratic_with_both_formulas() {
    for formula in [Formula::FletcherReeves, Formula::PolakRibiere] {
        let optimum = NonLinearConjugateGradient::new(formula, checker())
            .optimize(1000, &Bowl, dvector![-3., 4.])
            .unwrap();
        assert_relative_eq!(optimum.point, dvector![1., -2.], epsilon = 1e-6);
        assert_relative_eq!(optimum.value, 0., epsilon = 1e-10);
        assert!(optimum.evaluations <= optimum.iterations);
    }
}

#[test]
fn line_search_solver() {
    let optimizer = NonLinearConjugateGradient::new(Formula::PolakRibiere, checker());
    assert_eq!(optimizer.solver.absolute_accuracy(), 1e-15);
    let optimizer =
        optimizer.with_line_search_solver(BrentSolver::new().with_absolute_accuracy(1e-8));
    assert_eq!(optimizer.solver.absolute_accuracy(), 1e-8);
    let optimum = optimizer.optimize(1000, &Bowl, dvector![-3., 4.]).unwrap();
    assert!(optimum.value < 1e-6);
}

#[test]
fn maximize() {
    let optimum = NonLinearConjugateGradient::new(Formula::PolakRibiere, checker())
        .with_goal(GoalType::Maximize)
        .optimize(1000, &Dome, dvector![0., 0., 1.])
        .unwrap();
    assert_relative_eq!(optimum.point, dvector![3., 0.5, 0.], epsilon = 1e-6);
    assert_relative_eq!(optimum.value, 0., epsilon = 1e-10);
}

#[test]
fn unbounded_objective() {
    let result = NonLinearConjugateGradient::new(Formula::FletcherReeves, checker())
        .optimize(1000, &Plane, dvector![0., 0.]);
    assert_eq!(result.err().unwrap(), OptimizerError::BracketNotFound);
}

#[test]
fn evaluation_budget() {
    let result = NonLinearConjugateGradient::new(Formula::FletcherReeves, checker())
        .optimize(3, &Bowl, dvector![-3., 4.]);
    assert_eq!(
        result.err().unwrap(),
        OptimizerError::TooManyEvaluations { max: 3 }
    );
}

#[test]
fn upper_bound() {
    // sign change between 2 and 4
    let b = find_upper_bound(|x: f64| 3. - x, 0., 1.).unwrap();
    assert!(b >= 3.);
    assert!((3. - b) * 3. <= 0.);

    assert_eq!(
        find_upper_bound(|x: f64| x * x + 1., 0., 1.),
        Err(OptimizerError::BracketNotFound)
    );
}

//! Brent's method for the roots of univariate functions.
use nalgebra::{convert, RealField};
use num_traits::Float;

use crate::OptimizerError;
#[cfg(test)]
use approx::assert_relative_eq;
#[cfg(test)]
use std::f64::consts::{FRAC_PI_2, SQRT_2};

/// A root found by [`BrentSolver::solve`](struct.BrentSolver.html#method.solve).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Root<F> {
    pub x: F,
    /// Number of function evaluations spent.
    pub evaluations: usize,
}

/// Root finder combining bisection, secant steps and inverse quadratic
/// interpolation.
///
/// The search stops when the bracketing interval is smaller than
/// `$2\epsilon_\text{rel}|x| + \epsilon_\text{abs}$` or the function value is
/// exactly zero. The endpoints are accepted right away if the magnitude of
/// their function value is at most the function value accuracy.
///
/// # Reference
///
/// > R. P. Brent. Algorithms for Minimization without Derivatives.
/// > Prentice-Hall, 1973, chapter 4.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BrentSolver<F> {
    absolute_accuracy: F,
    relative_accuracy: F,
    function_value_accuracy: F,
}

impl<F: RealField + Float> BrentSolver<F> {
    pub fn new() -> Self {
        Self {
            absolute_accuracy: convert(1.0e-6),
            relative_accuracy: convert(1.0e-14),
            function_value_accuracy: convert(1.0e-15),
        }
    }

    /// # Panics
    ///
    /// Panics if `$\mathtt{accuracy} \leq 0$`.
    pub fn with_absolute_accuracy(self, accuracy: F) -> Self {
        assert!(accuracy.is_positive(), "absolute accuracy must be > 0");
        Self {
            absolute_accuracy: accuracy,
            ..self
        }
    }

    /// # Panics
    ///
    /// Panics if `$\mathtt{accuracy} < 0$`.
    pub fn with_relative_accuracy(self, accuracy: F) -> Self {
        assert!(!accuracy.is_negative(), "relative accuracy must be >= 0");
        Self {
            relative_accuracy: accuracy,
            ..self
        }
    }

    /// # Panics
    ///
    /// Panics if `$\mathtt{accuracy} < 0$`.
    pub fn with_function_value_accuracy(self, accuracy: F) -> Self {
        assert!(!accuracy.is_negative(), "function value accuracy must be >= 0");
        Self {
            function_value_accuracy: accuracy,
            ..self
        }
    }

    pub fn absolute_accuracy(&self) -> F {
        self.absolute_accuracy
    }

    /// Find a root of `f` in `$[\mathtt{min}, \mathtt{max}]$` with at most
    /// `max_evaluations` evaluations of `f`.
    ///
    /// # Errors
    ///
    /// - [`InvalidArgument`](enum.OptimizerError.html#variant.InvalidArgument)
    ///   if `$\mathtt{min} \geq \mathtt{max}$`,
    /// - [`BracketNotFound`](enum.OptimizerError.html#variant.BracketNotFound)
    ///   if the function values at the endpoints have the same sign,
    /// - [`TooManyEvaluations`](enum.OptimizerError.html#variant.TooManyEvaluations)
    ///   if the budget is exhausted.
    pub fn solve<G>(
        &self,
        max_evaluations: usize,
        f: G,
        min: F,
        max: F,
    ) -> Result<Root<F>, OptimizerError>
    where
        G: FnMut(F) -> F,
    {
        if !(min < max) {
            return Err(OptimizerError::InvalidArgument(
                "search interval must satisfy min < max",
            ));
        }
        let mut f = Counted {
            f,
            evaluations: 0,
            max_evaluations,
        };
        let root = |x, f: Counted<G>| Root {
            x,
            evaluations: f.evaluations,
        };

        let y_min = f.value(min)?;
        if Float::abs(y_min) <= self.function_value_accuracy {
            return Ok(root(min, f));
        }
        let y_max = f.value(max)?;
        if Float::abs(y_max) <= self.function_value_accuracy {
            return Ok(root(max, f));
        }
        if y_min * y_max > F::zero() {
            return Err(OptimizerError::BracketNotFound);
        }
        let x = self.brent(&mut f, min, max, y_min, y_max)?;
        Ok(root(x, f))
    }

    /// Brent-Dekker iteration on a bracket `$[a, b]$` with `$f(a)f(b) \leq 0$`.
    fn brent<G>(&self, f: &mut Counted<G>, lo: F, hi: F, f_lo: F, f_hi: F) -> Result<F, OptimizerError>
    where
        G: FnMut(F) -> F,
    {
        let half: F = convert(0.5);
        let two: F = convert(2.);
        let one_and_half: F = convert(1.5);

        let (mut a, mut fa) = (lo, f_lo);
        let (mut b, mut fb) = (hi, f_hi);
        let (mut c, mut fc) = (a, fa);
        let mut d = b - a;
        let mut e = d;

        loop {
            if Float::abs(fc) < Float::abs(fb) {
                a = b;
                b = c;
                c = a;
                fa = fb;
                fb = fc;
                fc = fa;
            }

            let tol = two * self.relative_accuracy * Float::abs(b) + self.absolute_accuracy;
            let m = half * (c - b);
            if Float::abs(m) <= tol || fb.is_zero() {
                return Ok(b);
            }

            if Float::abs(e) < tol || Float::abs(fa) <= Float::abs(fb) {
                // bisection
                d = m;
                e = d;
            } else {
                let s = fb / fa;
                let (mut p, mut q) = if a == c {
                    // secant
                    (two * m * s, F::one() - s)
                } else {
                    // inverse quadratic interpolation
                    let q = fa / fc;
                    let r = fb / fc;
                    (
                        s * (two * m * q * (q - r) - (b - a) * (r - F::one())),
                        (q - F::one()) * (r - F::one()) * (s - F::one()),
                    )
                };
                if p > F::zero() {
                    q = -q;
                } else {
                    p = -p;
                }
                let previous_e = e;
                e = d;
                if p >= one_and_half * m * q - Float::abs(tol * q)
                    || p >= Float::abs(half * previous_e * q)
                {
                    // interpolation does not stay inside the bracket
                    d = m;
                    e = d;
                } else {
                    d = p / q;
                }
            }
            a = b;
            fa = fb;

            if Float::abs(d) > tol {
                b += d;
            } else if m > F::zero() {
                b += tol;
            } else {
                b -= tol;
            }
            fb = f.value(b)?;
            if (fb > F::zero() && fc > F::zero()) || (fb <= F::zero() && fc <= F::zero()) {
                c = a;
                fc = fa;
                d = b - a;
                e = d;
            }
        }
    }
}

impl<F: RealField + Float> Default for BrentSolver<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// A function with an evaluation budget.
struct Counted<G> {
    f: G,
    evaluations: usize,
    max_evaluations: usize,
}

impl<G> Counted<G> {
    fn value<F>(&mut self, x: F) -> Result<F, OptimizerError>
    where
        G: FnMut(F) -> F,
    {
        if self.evaluations >= self.max_evaluations {
            return Err(OptimizerError::TooManyEvaluations {
                max: self.max_evaluations,
            });
        }
        self.evaluations += 1;
        Ok((self.f)(x))
    }
}

#[test]
fn square_root_of_two() {
    let root = BrentSolver::new()
        .solve(100, |x: f64| x * x - 2., 0., 2.)
        .unwrap();
    assert_relative_eq!(root.x, SQRT_2, epsilon = 1e-6);
    assert!(root.evaluations < 20);
}

#[test]
fn high_accuracy() {
    assert_eq!(BrentSolver::<f64>::new().absolute_accuracy(), 1e-6);
    let solver = BrentSolver::new().with_absolute_accuracy(1e-14);
    assert_eq!(solver.absolute_accuracy(), 1e-14);
    let root = solver.solve(100, f64::cos, 1., 3.).unwrap();
    assert_relative_eq!(root.x, FRAC_PI_2, epsilon = 1e-13);
}

#[test]
fn decreasing_function() {
    let root = BrentSolver::new()
        .with_absolute_accuracy(1e-12)
        .solve(100, |x: f64| (-x).exp() - 0.5, -1., 5.)
        .unwrap();
    assert_relative_eq!(root.x, 2f64.ln(), epsilon = 1e-11);
}

#[test]
fn root_at_endpoint() {
    let root = BrentSolver::new()
        .solve(100, |x: f64| x - 1., 1., 2.)
        .unwrap();
    assert_eq!(root.x, 1.);
    assert_eq!(root.evaluations, 1);
}

#[test]
fn no_sign_change() {
    assert_eq!(
        BrentSolver::new().solve(100, |x: f64| x * x + 1., -1., 1.),
        Err(OptimizerError::BracketNotFound)
    );
}

#[test]
fn invalid_interval() {
    assert!(matches!(
        BrentSolver::new().solve(100, |x: f64| x, 1., 1.),
        Err(OptimizerError::InvalidArgument(_))
    ));
}

#[test]
fn evaluation_budget() {
    assert_eq!(
        BrentSolver::new()
            .with_absolute_accuracy(1e-15)
            .solve(5, |x: f64| x.powi(3) - 0.3, 0., 10.),
        Err(OptimizerError::TooManyEvaluations { max: 5 })
    );
}

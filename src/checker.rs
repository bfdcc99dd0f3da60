//! Convergence checkers deciding when an optimizer may stop.
use nalgebra::{convert, RealField};
use num_traits::Float;

use crate::{PointValuePair, PointVectorValuePair};
#[cfg(test)]
use nalgebra::dvector;

/// Decides whether an optimization has converged.
///
/// `previous` and `current` are the points (and values) of two consecutive
/// iterations, `iteration` counts from one.
pub trait ConvergenceChecker<P> {
    fn converged(&self, iteration: usize, previous: &P, current: &P) -> bool;
}

impl<P, T> ConvergenceChecker<P> for T
where
    T: Fn(usize, &P, &P) -> bool,
{
    fn converged(&self, iteration: usize, previous: &P, current: &P) -> bool {
        self(iteration, previous, current)
    }
}

fn close<F: RealField + Float>(p: F, c: F, relative: F, absolute: F) -> bool {
    let difference = Float::abs(p - c);
    let size = Float::max(Float::abs(p), Float::abs(c));
    difference <= size * relative || difference <= absolute
}

fn default_thresholds<F: RealField + Float>() -> (F, F) {
    let hundred: F = convert(100.0);
    (
        hundred * <F as Float>::epsilon(),
        hundred * <F as Float>::min_positive_value(),
    )
}

/// Checks every component of the model value vector.
///
/// Converged when for every `$i$`
/// `$|p_i - c_i| \leq \max(|p_i|, |c_i|)\cdot\mathtt{relative}$` or
/// `$|p_i - c_i| \leq \mathtt{absolute}$`. If a maximal iteration count is
/// set, reaching it also counts as converged.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SimpleVectorValueChecker<F> {
    relative: F,
    absolute: F,
    max_iterations: Option<usize>,
}

impl<F: RealField + Float> SimpleVectorValueChecker<F> {
    /// # Panics
    ///
    /// Panics if a threshold is negative.
    pub fn new(relative: F, absolute: F) -> Self {
        assert!(!relative.is_negative(), "relative threshold must be >= 0");
        assert!(!absolute.is_negative(), "absolute threshold must be >= 0");
        Self {
            relative,
            absolute,
            max_iterations: None,
        }
    }

    /// Also stop after `max_iterations` iterations.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{max\_iterations} = 0$`.
    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        assert!(max_iterations > 0, "max_iterations must be > 0");
        Self {
            max_iterations: Some(max_iterations),
            ..self
        }
    }
}

impl<F: RealField + Float> Default for SimpleVectorValueChecker<F> {
    fn default() -> Self {
        let (relative, absolute) = default_thresholds();
        Self::new(relative, absolute)
    }
}

impl<F: RealField + Float> ConvergenceChecker<PointVectorValuePair<F>>
    for SimpleVectorValueChecker<F>
{
    fn converged(
        &self,
        iteration: usize,
        previous: &PointVectorValuePair<F>,
        current: &PointVectorValuePair<F>,
    ) -> bool {
        if self.max_iterations.map_or(false, |max| iteration >= max) {
            return true;
        }
        previous.value.len() == current.value.len()
            && previous
                .value
                .iter()
                .zip(current.value.iter())
                .all(|(p, c)| close(*p, *c, self.relative, self.absolute))
    }
}

/// Checks the scalar objective value.
///
/// Same thresholds as [`SimpleVectorValueChecker`](struct.SimpleVectorValueChecker.html)
/// for a single value.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SimpleValueChecker<F> {
    relative: F,
    absolute: F,
    max_iterations: Option<usize>,
}

impl<F: RealField + Float> SimpleValueChecker<F> {
    /// # Panics
    ///
    /// Panics if a threshold is negative.
    pub fn new(relative: F, absolute: F) -> Self {
        assert!(!relative.is_negative(), "relative threshold must be >= 0");
        assert!(!absolute.is_negative(), "absolute threshold must be >= 0");
        Self {
            relative,
            absolute,
            max_iterations: None,
        }
    }

    /// # Panics
    ///
    /// Panics if `$\mathtt{max\_iterations} = 0$`.
    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        assert!(max_iterations > 0, "max_iterations must be > 0");
        Self {
            max_iterations: Some(max_iterations),
            ..self
        }
    }
}

impl<F: RealField + Float> Default for SimpleValueChecker<F> {
    fn default() -> Self {
        let (relative, absolute) = default_thresholds();
        Self::new(relative, absolute)
    }
}

impl<F: RealField + Float> ConvergenceChecker<PointValuePair<F>> for SimpleValueChecker<F> {
    fn converged(
        &self,
        iteration: usize,
        previous: &PointValuePair<F>,
        current: &PointValuePair<F>,
    ) -> bool {
        if self.max_iterations.map_or(false, |max| iteration >= max) {
            return true;
        }
        close(previous.value, current.value, self.relative, self.absolute)
    }
}

#[cfg(test)]
fn pair(value: nalgebra::DVector<f64>) -> PointVectorValuePair<f64> {
    PointVectorValuePair {
        point: dvector![0.],
        value,
    }
}

#[test]
fn vector_checker_thresholds() {
    let checker = SimpleVectorValueChecker::new(1e-3, 1e-10);
    assert!(checker.converged(1, &pair(dvector![1000., 0.]), &pair(dvector![1000.5, 0.])));
    assert!(!checker.converged(1, &pair(dvector![1000., 0.]), &pair(dvector![1002., 0.])));
    // absolute threshold near zero
    assert!(checker.converged(1, &pair(dvector![1., 1e-11]), &pair(dvector![1., 0.])));
    assert!(!checker.converged(1, &pair(dvector![1., 1e-9]), &pair(dvector![1., 0.])));
}

#[test]
fn vector_checker_max_iterations() {
    let checker = SimpleVectorValueChecker::new(0., 0.).with_max_iterations(3);
    let (a, b) = (pair(dvector![1.]), pair(dvector![2.]));
    assert!(!checker.converged(2, &a, &b));
    assert!(checker.converged(3, &a, &b));
}

#[test]
fn value_checker() {
    let checker = SimpleValueChecker::new(1e-6, 0.);
    let p = |value| PointValuePair {
        point: dvector![0.],
        value,
    };
    assert!(checker.converged(1, &p(1.), &p(1. + 1e-7)));
    assert!(!checker.converged(1, &p(1.), &p(1. + 1e-5)));
}

#[test]
fn closures_are_checkers() {
    let checker = |iteration: usize, _: &PointValuePair<f64>, _: &PointValuePair<f64>| {
        iteration > 4
    };
    let p = PointValuePair {
        point: dvector![0.],
        value: 0.,
    };
    assert!(!checker.converged(4, &p, &p));
    assert!(checker.converged(5, &p, &p));
}

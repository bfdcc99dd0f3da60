//! Adaptive central difference approximation of a scalar derivative.
use std::cmp::Ordering;

use nalgebra::{convert, Matrix3, RealField};
use num_traits::Float;
#[cfg(test)]
use approx::assert_relative_eq;

const STEP_RATIO: f64 = 2.;

/// Compute `$f'(x)$` with an adaptive central difference quotient.
///
/// The initial step follows
///
/// > R. S. Stepleman and N. D. Winarsky. Adaptive Numerical Differentiation.
/// > Mathematics of Computation, Vol. 33, No. 148 (Oct., 1979), pp. 1257-1264.
///
/// The quotients of the shrinking steps are refined by a Richardson
/// extrapolation followed by Wynn's epsilon algorithm, and the estimate with
/// the smallest error is picked after penalizing outliers.
///
/// Returns `None` if every estimate is `NaN`.
pub fn derivative<F: Float + RealField>(x: F, f: impl Fn(F) -> F) -> Option<F> {
    let p_cbrt = Float::cbrt(<F as Float>::epsilon());
    let step_ratio: F = convert(STEP_RATIO);
    let two: F = convert(2.);
    let quotient = |h: F| (f(x + h) - f(x - h)) / (h * two);

    // find initial h which is large enough
    let mut h = Float::max(
        Float::max(Float::ln(F::one() + Float::abs(x)), F::one()),
        step_ratio * p_cbrt * if x.is_zero() { convert(0.01) } else { x },
    );
    let (f1, f2) = (f(x + h), f(x - h));
    if f1 * f2 > F::zero() && f1 != f2 {
        let fx = f(x);
        let fx = if fx.is_zero() { F::one() } else { fx };
        let delta_h0 = Float::abs((f1 - f2) / fx);
        if !delta_h0.is_zero() {
            let mut n_h0 = -Float::ln(delta_h0);
            while n_h0 > -Float::ln(p_cbrt * step_ratio) {
                h *= step_ratio;
                n_h0 -= Float::ln(step_ratio);
            }
        }
    }

    let mut quotients = vec![quotient(h)];
    h /= step_ratio;
    quotients.push(quotient(h));
    for i in 1.. {
        h /= step_ratio;
        if x + h == x || h < <F as Float>::epsilon() {
            break;
        }
        let last = quotients[quotients.len() - 1];
        let before = quotients[quotients.len() - 2];
        let next = quotient(h);
        // rounding errors start to dominate
        if i >= 4 && Float::abs(next - last) > Float::abs(last - before) * convert(10.) {
            break;
        }
        quotients.push(next);
    }
    extrapolate(&quotients)
}

fn extrapolate<F: RealField + Float>(quotients: &[F]) -> Option<F> {
    let estimates = richardson_extrapolate(quotients)?;
    if estimates.len() <= 2 {
        return estimates.last().copied();
    }
    outlier_aware_minimum(wynn_extrapolate(&estimates))
}

/// Pick the derivative with the smallest error, where values far from the
/// median get their distance added to the error.
fn outlier_aware_minimum<F: RealField + Float>(mut values: Vec<(F, F)>) -> Option<F> {
    values.retain(|(der, _)| !Float::is_nan(*der));
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
    let num = values.len();
    let percentile = |p: f64| {
        let i = ((num - 1) as f64) * p;
        let a: F = convert(i.fract());
        values[i.floor() as usize].0 * (F::one() - a) + values[i.ceil() as usize].0 * a
    };
    let p25 = percentile(0.25);
    let median = Float::abs(percentile(0.5));
    let p75 = percentile(0.75);
    let iqr = Float::abs(p75 - p25) * convert(1.5);

    let trim_fact: F = convert(10.);
    let tiny: F = convert(1.0e-8);
    let mut min_err = <F as Float>::max_value();
    let mut best = F::one();
    for &(der, err) in values.iter() {
        let is_outlier = ((Float::abs(der) < median / trim_fact
            || Float::abs(der) > median * trim_fact)
            && median > tiny)
            || der < p25 - iqr
            || p75 + iqr < der;
        let err = if is_outlier {
            err + Float::abs(der - median)
        } else {
            err
        };
        if err < min_err {
            best = der;
            min_err = err;
        }
    }
    Some(best)
}

/// Wynn's epsilon algorithm on three consecutive estimates, returning
/// the refined values together with an error estimate.
fn wynn_extrapolate<F: RealField + Float>(estimates: &[F]) -> Vec<(F, F)> {
    let tiny = <F as Float>::min_positive_value();
    let eps = <F as Float>::epsilon();
    estimates
        .windows(3)
        .map(|e| {
            let (e0, e1, e2) = (e[0], e[1], e[2]);
            let (err1, err2) = (Float::abs(e1 - e0), Float::abs(e2 - e1));
            let d1 = if err1 < tiny { tiny } else { e1 - e0 };
            let d2 = if err2 < tiny { tiny } else { e2 - e1 };
            let tol1 = Float::max(Float::abs(e1), Float::abs(e0)) * eps;
            let tol2 = Float::max(Float::abs(e2), Float::abs(e1)) * eps;
            let ss = Float::recip(d2) - Float::recip(d1) + tiny;
            let is_small = Float::abs(ss * e1) <= convert(1.0e-3);
            let converged = (err1 <= tol1 && err2 <= tol2) || is_small;
            let result = if converged { e2 } else { e1 + Float::recip(ss) };
            let abserr = err1
                + err2
                + if converged {
                    tol2 * convert(10.)
                } else {
                    Float::abs(result - e2)
                };
            (result, abserr)
        })
        .collect()
}

fn richardson_extrapolate<F: RealField + Float>(quotients: &[F]) -> Option<Vec<F>> {
    const STEP: i32 = 2;
    const ORDER: i32 = 2;
    if quotients.len() <= 3 {
        return quotients.last().map(|x| vec![*x]);
    }
    let step_ratio: F = convert(STEP_RATIO);
    let entry = |i: i32, j: i32| Float::powi(step_ratio, -i * (STEP * j + ORDER));
    #[rustfmt::skip]
    let r_matrix = Matrix3::new(
        F::one(),    F::one(),    F::one(),
        F::one(), entry(1, 0), entry(2, 0),
        F::one(), entry(1, 1), entry(2, 1),
    );
    let pinv = r_matrix.pseudo_inverse(<F as Float>::epsilon()).ok()?;
    let coeff = pinv.column(0);
    Some(
        quotients
            .windows(3)
            .map(|q| coeff[0] * q[0] + coeff[1] * q[1] + coeff[2] * q[2])
            .collect(),
    )
}

#[test]
fn linear() {
    assert_relative_eq!(derivative(0.123f64, |x| 3. * x - 1.).unwrap(), 3., epsilon = 1e-14);
    assert_relative_eq!(derivative(-0.123, |x| 30. * x - 1.).unwrap(), 30., epsilon = 1e-14);
    assert_relative_eq!(derivative(0.0, |x| -3. * x - 1.).unwrap(), -3., epsilon = 1e-14);
    assert_relative_eq!(derivative(0.2, |_: f64| 1.).unwrap(), 0.);
}

#[test]
fn standard_functions() {
    assert_relative_eq!(derivative(0., f64::exp).unwrap(), 1., epsilon = 1e-14);
    assert_relative_eq!(
        derivative(-1.2, f64::exp).unwrap(),
        (-1.2f64).exp(),
        epsilon = 5e-14
    );
    assert_relative_eq!(derivative(90., f64::ln).unwrap(), 1. / 90., epsilon = 1e-14);
    assert_relative_eq!(
        derivative(238., f64::sin).unwrap(),
        238f64.cos(),
        epsilon = 2e-12
    );
    assert_relative_eq!(
        derivative(-34.233, f64::sin).unwrap(),
        (-34.233f64).cos(),
        epsilon = 1e-11
    );
}

#[test]
fn polynomial() {
    assert_relative_eq!(derivative(0., |x| x * x).unwrap(), 0., epsilon = 1e-14);
    assert_relative_eq!(derivative(3., |x| x * x).unwrap(), 6., epsilon = 1e-12);
    assert_relative_eq!(
        derivative(2., |x| 4. * x * x - 2. * x).unwrap(),
        14.,
        epsilon = 1e-12
    );
}

#[test]
fn nan_everywhere() {
    assert_eq!(derivative(1., |_: f64| f64::NAN), None);
}

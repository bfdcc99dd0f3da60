//! Solver for the trust-region sub-problem in the LM algorithm.
use crate::qr::LinearLeastSquaresDiagonalProblem;
use nalgebra::{convert, DVector, RealField};
use num_traits::Float;
#[cfg(test)]
use crate::qr::PivotedQR;
#[cfg(test)]
use approx::assert_relative_eq;
#[cfg(test)]
use nalgebra::{dmatrix, dvector, DMatrix};

/// Maximal number of Newton corrections of `$\lambda$`.
const MAX_ITERATIONS: usize = 10;

/// Result of [`determine_lambda_and_parameter_update`](fn.determine_lambda_and_parameter_update.html).
#[derive(Debug, Clone)]
pub struct LMParameter<F: RealField> {
    /// The solution `$\vec{p}$` of the sub-problem.
    pub step: DVector<F>,
    /// The Levenberg-Marquardt parameter `$\lambda$` belonging to `step`.
    pub lambda: F,
    /// `$\|\mathbf{D}\vec{p}\|$`
    pub dp_norm: F,
}

/// Approximately solve the LM trust-region subproblem.
///
/// Given `$\mathbf{A}\in\R^{m\times n}$` and a non-singular diagonal matrix `$\mathbf{D}$`
/// this routine approximately solves the problem
/// ```math
///   \min_{\vec{p}\in\R^n}\|\mathbf{A}\vec{p} - \vec{b}\|^2\text{ subject to }\|\mathbf{D}\vec{p}\|\leq\Delta.
/// ```
///
/// It can be shown that `$\vec{p}$` with `$\|\mathbf{D}\vec{p}\|\leq\Delta$` is
/// a solution if and only if there exists `$\lambda\geq 0$` such that
/// ```math
/// \begin{aligned}
/// (\mathbf{A}^\top\mathbf{A} + \lambda \mathbf{D}\mathbf{D})\vec{p} &= \mathbf{A}^\top\vec{b}, \\
/// \lambda(\Delta - \|\mathbf{D}\vec{p}\|) &= 0.
/// \end{aligned}
/// ```
/// The returned `$\lambda$` either is zero with `$\|\mathbf{D}\vec{p}\|\leq 1.1\Delta$`
/// or satisfies `$|\|\mathbf{D}\vec{p}\| - \Delta| \leq 0.1\Delta$`, unless the
/// iteration limit of ten Newton corrections is reached first.
///
/// # Inputs
///
/// The matrix `$\mathbf{A}$` and vector `$\vec{b}$` are those of
/// [`LinearLeastSquaresDiagonalProblem`](../qr/struct.LinearLeastSquaresDiagonalProblem.html).
/// `initial_lambda` is the value of the previous call and is used as a
/// starting point.
///
/// # Reference
///
/// This method resembles `LMPAR` from `MINPACK`. See the following paper
/// on how it works:
///
/// > Moré J.J. (1978) The Levenberg-Marquardt algorithm: Implementation and theory. In: Watson G.A. (eds) Numerical Analysis. Lecture Notes in Mathematics, vol 630. Springer, Berlin, Heidelberg.
///
/// Chapter 4.3 of "Numerical Optimization" by Nocedal and Wright also contains
/// information about this algorithm but is misses a few details.
pub fn determine_lambda_and_parameter_update<F>(
    lls: &mut LinearLeastSquaresDiagonalProblem<F>,
    diag: &DVector<F>,
    delta: F,
    initial_lambda: F,
) -> LMParameter<F>
where
    F: RealField + Float,
{
    let p1: F = convert(0.1);
    let p001: F = convert(0.001);

    let p = lls.solve_with_zero_diagonal();
    let mut dp = p.component_mul(diag);
    let mut dp_norm = dp.norm();
    let mut fp = dp_norm - delta;
    if fp <= p1 * delta {
        // we have a feasible p with lambda = 0
        return LMParameter {
            step: p,
            lambda: F::zero(),
            dp_norm,
        };
    }

    // we now look for lambda > 0 with ||D p|| = delta
    // by using an approximate Newton iteration.

    // lower bound, only available with full rank
    let mut parl = F::zero();
    if lls.has_full_rank() {
        let v = diag.component_mul(&dp) / dp_norm;
        let z = lls.solve_r_transpose(&v);
        parl = fp / (delta * z.norm_squared());
    }

    // upper bound
    let gnorm = lls.scaled_gradient_norm(diag);
    let mut paru = gnorm / delta;
    if paru.is_zero() {
        paru = <F as Float>::min_positive_value() / Float::min(delta, p1);
    }

    let mut lambda = Float::min(paru, Float::max(initial_lambda, parl));
    if lambda.is_zero() {
        lambda = gnorm / dp_norm;
    }

    let mut iteration = 0;
    loop {
        iteration += 1;
        if lambda.is_zero() {
            lambda = Float::max(<F as Float>::min_positive_value(), p001 * paru);
        }
        let diag_lambda = diag * Float::sqrt(lambda);
        let p = lls.solve_with_diagonal(&diag_lambda);
        dp = p.component_mul(diag);
        dp_norm = dp.norm();
        let fp_old = fp;
        fp = dp_norm - delta;

        if Float::abs(fp) <= p1 * delta
            || (parl.is_zero() && fp <= fp_old && fp_old < F::zero())
            || iteration == MAX_ITERATIONS
        {
            return LMParameter {
                step: p,
                lambda,
                dp_norm,
            };
        }

        // Newton correction
        let v = diag.component_mul(&dp) / dp_norm;
        let z = lls.solve_l(&v);
        let correction = fp / (delta * z.norm_squared());

        if fp > F::zero() {
            parl = Float::max(parl, lambda);
        } else if fp < F::zero() {
            paru = Float::min(paru, lambda);
        }
        lambda = Float::max(parl, lambda + correction);
    }
}

#[cfg(test)]
fn lls(a: DMatrix<f64>, b: DVector<f64>) -> LinearLeastSquaresDiagonalProblem<f64> {
    PivotedQR::new(a, f64::MIN_POSITIVE)
        .ok()
        .unwrap()
        .into_least_squares_diagonal_problem(b)
}

#[cfg(test)]
fn diagonal_problem() -> LinearLeastSquaresDiagonalProblem<f64> {
    lls(
        dmatrix![
            2., 0.;
            0., 4.;
        ],
        dvector![2., 4.],
    )
}

#[test]
fn gauss_newton_step_inside_region() {
    let mut lls = diagonal_problem();
    let param = determine_lambda_and_parameter_update(&mut lls, &dvector![1., 1.], 10., 0.);
    assert_eq!(param.lambda, 0.);
    assert_relative_eq!(param.step, dvector![1., 1.], epsilon = 1e-12);
    assert_relative_eq!(param.dp_norm, 2f64.sqrt(), epsilon = 1e-12);
}

#[test]
fn fixed_lambda_direction() {
    let mut lls = diagonal_problem();
    let p = lls.solve_with_diagonal(&dvector![1., 1.]);
    assert_relative_eq!(p, dvector![4. / 5., 16. / 17.], epsilon = 1e-12);
}

#[test]
fn step_on_region_boundary() {
    let delta = 0.5;
    let mut lls = diagonal_problem();
    let param = determine_lambda_and_parameter_update(&mut lls, &dvector![1., 1.], delta, 0.);
    assert!(param.lambda > 0.);
    assert!((param.dp_norm - delta).abs() <= 0.1 * delta);
    assert_relative_eq!(param.step.norm(), param.dp_norm, epsilon = 1e-12);
    // (A^T A + lambda I) p = A^T b
    let l = param.lambda;
    let expected = dvector![4. / (4. + l), 16. / (16. + l)];
    assert_relative_eq!(param.step, expected, epsilon = 1e-10);
}

#[test]
fn scaled_region() {
    let delta = 0.3;
    let diag = dvector![3., 0.5];
    let mut lls = diagonal_problem();
    let param = determine_lambda_and_parameter_update(&mut lls, &diag, delta, 0.);
    assert!(param.lambda > 0.);
    assert!((param.step.component_mul(&diag).norm() - delta).abs() <= 0.1 * delta);
    let l = param.lambda;
    let expected = dvector![4. / (4. + 9. * l), 16. / (16. + 0.25 * l)];
    assert_relative_eq!(param.step, expected, epsilon = 1e-10);
}

#[test]
fn initial_lambda_is_used_as_start() {
    let delta = 0.5;
    let mut lls = diagonal_problem();
    let first = determine_lambda_and_parameter_update(&mut lls, &dvector![1., 1.], delta, 0.);
    let mut lls = diagonal_problem();
    let second =
        determine_lambda_and_parameter_update(&mut lls, &dvector![1., 1.], delta, first.lambda);
    assert!((second.dp_norm - delta).abs() <= 0.1 * delta);
    assert!(second.lambda > 0.);
}

#[cfg(test)]
fn rank_one() -> LinearLeastSquaresDiagonalProblem<f64> {
    let a = dmatrix![
        1., 1.;
        1., 1.;
        1., 1.;
    ];
    PivotedQR::new(a, 1e-10)
        .ok()
        .unwrap()
        .into_least_squares_diagonal_problem(dvector![1., 2., 3.])
}

#[test]
fn rank_deficient_jacobian() {
    let mut lls = rank_one();
    assert!(!lls.has_full_rank());
    let param = determine_lambda_and_parameter_update(&mut lls, &dvector![1., 1.], 100., 0.);
    assert_eq!(param.lambda, 0.);
    // a least squares solution, not necessarily the minimal one
    assert_relative_eq!(param.step.sum(), 2., epsilon = 1e-12);

    let mut lls = rank_one();
    let param = determine_lambda_and_parameter_update(&mut lls, &dvector![1., 1.], 0.1, 0.);
    assert!(param.lambda > 0.);
    assert!(param.step.iter().all(|x| x.is_finite()));
    assert!(param.dp_norm <= 0.11 + 1e-12);
    // both columns are equal, so are both components
    assert_relative_eq!(param.step[0], param.step[1], epsilon = 1e-12);
}

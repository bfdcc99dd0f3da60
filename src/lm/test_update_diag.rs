use approx::assert_relative_eq;
use nalgebra::{dmatrix, dvector, DMatrix, DVector};

use super::test_helpers::{MockCall, MockFunction};
use super::{LevenbergMarquardt, Termination, TrialStep, LM};
use crate::least_squares::Evaluator;
use crate::{ConvergenceFailure, LeastSquaresProblem, OptimizerError, Weight};

fn jacobian() -> DMatrix<f64> {
    dmatrix![
        1., 2.;
        4., -2.;
        0.5, 0.1;
    ]
}

fn problem(start: DVector<f64>) -> LeastSquaresProblem<f64> {
    LeastSquaresProblem::new(dvector![1., 2., 0.5], Weight::unit(3), start).unwrap()
}

fn function(jacobians: Vec<DMatrix<f64>>) -> MockFunction {
    MockFunction::new(vec![dvector![0., 0., 0.]], jacobians)
}

#[test]
fn max_cosine_and_ortho_tolerance() {
    let problem = problem(dvector![0., 0.]);
    let function = function(vec![jacobian()]);

    let config = LevenbergMarquardt::new().with_ortho_tolerance(0.98);
    let mut lm = LM::new(&config, Evaluator::new(&problem, &function, 10))
        .ok()
        .unwrap();
    let lls = lm.linearize().ok().unwrap();
    assert_eq!(lm.update_diag(&lls), Err(Termination::Orthogonal));

    let config = LevenbergMarquardt::new().with_ortho_tolerance(0.96);
    let mut lm = LM::new(&config, Evaluator::new(&problem, &function, 10))
        .ok()
        .unwrap();
    let lls = lm.linearize().ok().unwrap();
    assert!(lm.update_diag(&lls).is_ok());
    assert!(lm.max_cosine > 0.96 && lm.max_cosine < 0.98);
}

#[test]
fn diag_init_and_second_call() {
    let problem = problem(dvector![1.5, 10.]);
    let mut changed = jacobian();
    changed[(0, 0)] = 100.;
    changed[(0, 1)] = 0.;
    let function = function(vec![jacobian(), changed]);
    let config = LevenbergMarquardt::new().with_initial_step_bound_factor(42.);
    let mut lm = LM::new(&config, Evaluator::new(&problem, &function, 10))
        .ok()
        .unwrap();

    let lls = lm.linearize().ok().unwrap();
    assert!(lm.update_diag(&lls).is_ok());
    // set diagonal to the column norms of J
    assert_relative_eq!(lm.diag, dvector![4.153311931459037, 2.8301943396169813]);
    // xnorm = ||D * x||
    assert_relative_eq!(lm.xnorm, 28.979518629542486);
    assert_eq!(lm.delta, lm.xnorm * 42.);
    let delta = lm.delta;

    lm.first_iteration = false;
    lm.xnorm = 123.;
    let lls = lm.linearize().ok().unwrap();
    assert!(lm.update_diag(&lls).is_ok());
    // on later calls only pick the max
    assert_relative_eq!(lm.diag, dvector![100.08121701897915, 2.8301943396169813]);
    assert_eq!(lm.xnorm, 123.);
    assert_eq!(lm.delta, delta);
    assert_eq!(
        function.calls(),
        [MockCall::Value, MockCall::Jacobian, MockCall::Jacobian]
    );
}

#[test]
fn zero_x() {
    let problem = problem(dvector![0., 0.]);
    let function = function(vec![jacobian()]);
    let config = LevenbergMarquardt::new().with_initial_step_bound_factor(900.);
    let mut lm = LM::new(&config, Evaluator::new(&problem, &function, 10))
        .ok()
        .unwrap();
    let lls = lm.linearize().ok().unwrap();
    assert!(lm.update_diag(&lls).is_ok());
    assert_eq!(lm.xnorm, 0.);
    assert_eq!(lm.delta, 900.);
}

#[test]
fn zero_column_keeps_unit_scale() {
    let problem = problem(dvector![1., 1.]);
    let function = function(vec![dmatrix![
        1., 0.;
        2., 0.;
        2., 0.;
    ]]);
    let config = LevenbergMarquardt::new();
    let mut lm = LM::new(&config, Evaluator::new(&problem, &function, 10))
        .ok()
        .unwrap();
    let lls = lm.linearize().ok().unwrap();
    assert!(lm.update_diag(&lls).is_ok());
    assert_eq!(lm.diag, dvector![3., 1.]);
}

#[test]
fn nan_inf_jacobian() {
    for bad in [f64::NAN, f64::INFINITY] {
        let problem = problem(dvector![1., 2.]);
        let mut broken = jacobian();
        broken[(0, 0)] = bad;
        let function = function(vec![broken]);
        let config = LevenbergMarquardt::new();
        let mut lm = LM::new(&config, Evaluator::new(&problem, &function, 10))
            .ok()
            .unwrap();
        assert_eq!(
            lm.linearize().err().unwrap(),
            OptimizerError::Convergence(ConvergenceFailure::UnableToPerformQr { rows: 3, cols: 2 })
        );
    }
}

#[test]
fn tolerances_below_epsilon() {
    let problem = problem(dvector![1.5, 10.]);
    let function = function(vec![jacobian()]);
    let config = LevenbergMarquardt::new()
        .with_cost_relative_tolerance(0.)
        .with_par_relative_tolerance(0.)
        .with_ortho_tolerance(0.);
    let mut lm = LM::new(&config, Evaluator::new(&problem, &function, 10))
        .ok()
        .unwrap();
    let lls = lm.linearize().ok().unwrap();
    assert!(lm.update_diag(&lls).is_ok());

    let step = TrialStep {
        actual_reduction: 0.5,
        predicted_reduction: 0.6,
        ratio: 0.8,
        accepted: true,
    };
    assert_eq!(lm.check_convergence(&step), Ok(None));

    // the trust region cannot shrink below the parameter resolution
    lm.delta = f64::EPSILON * lm.xnorm;
    assert_eq!(
        lm.check_convergence(&step),
        Err(OptimizerError::Convergence(
            ConvergenceFailure::TooSmallParametersRelativeTolerance
        ))
    );

    // residuals orthogonal to the Jacobian up to rounding
    lm.delta = 1.;
    lm.max_cosine = f64::EPSILON;
    assert_eq!(
        lm.check_convergence(&step),
        Err(OptimizerError::Convergence(
            ConvergenceFailure::TooSmallOrthogonalityTolerance
        ))
    );

    // the cost check comes first
    let flat = TrialStep {
        actual_reduction: 1e-17,
        predicted_reduction: 1e-17,
        ratio: 1.,
        accepted: false,
    };
    assert_eq!(
        lm.check_convergence(&flat),
        Err(OptimizerError::Convergence(
            ConvergenceFailure::TooSmallCostRelativeTolerance
        ))
    );
}

use approx::assert_relative_eq;
use nalgebra::{dmatrix, dvector, DMatrix, DVector};

use super::test_helpers::{MockCall, MockFunction};
use super::{LevenbergMarquardt, Termination, LM};
use crate::least_squares::Evaluator;
use crate::{LeastSquaresProblem, OptimizerError, Weight};

fn problem(target: DVector<f64>, start: DVector<f64>) -> LeastSquaresProblem<f64> {
    let m = target.nrows();
    LeastSquaresProblem::new(target, Weight::unit(m), start).unwrap()
}

#[test]
fn initial_evaluation() {
    let problem = problem(dvector![0.5, 1.], dvector![0., 0.]);
    let function = MockFunction::new(vec![dvector![0., 0.]], vec![DMatrix::zeros(2, 2)]);
    let config = LevenbergMarquardt::new();
    let lm = LM::new(&config, Evaluator::new(&problem, &function, 10))
        .ok()
        .unwrap();
    assert_relative_eq!(lm.current.cost, 1.25f64.sqrt());
    assert_eq!(lm.current.residuals, dvector![0.5, 1.]);
    assert_eq!(lm.diag, dvector![1., 1.]);
    assert!(lm.first_iteration);
    assert_eq!(lm.evaluator.evaluations(), 1);
    assert_eq!(function.calls(), [MockCall::Value]);
}

#[test]
fn no_evaluation_budget() {
    let problem = problem(dvector![0.5, 1.], dvector![0., 0.]);
    let function = MockFunction::new(vec![dvector![0., 0.]], vec![DMatrix::zeros(2, 2)]);
    let config = LevenbergMarquardt::new();
    let err = LM::new(&config, Evaluator::new(&problem, &function, 0))
        .err()
        .unwrap();
    assert_eq!(err, OptimizerError::TooManyEvaluations { max: 0 });
    assert!(function.calls().is_empty());
}

#[test]
fn wrong_number_of_values() {
    let problem = problem(dvector![0.5, 1.], dvector![0., 0.]);
    let function = MockFunction::new(vec![dvector![0., 0., 0.]], vec![DMatrix::zeros(3, 2)]);
    let config = LevenbergMarquardt::new();
    let err = LM::new(&config, Evaluator::new(&problem, &function, 10))
        .err()
        .unwrap();
    assert_eq!(
        err,
        OptimizerError::DimensionMismatch {
            expected: 2,
            found: 3
        }
    );
}

#[test]
fn already_zero() {
    let problem = problem(dvector![0., 0., 0.], dvector![1., 2.]);
    let jacobian = dmatrix![
        1., 2.;
        4., -2.;
        0.5, 0.1;
    ];
    let function = MockFunction::new(vec![dvector![0., 0., 0.]], vec![jacobian]);
    let config = LevenbergMarquardt::new();
    let (optimum, termination) = LM::new(&config, Evaluator::new(&problem, &function, 10))
        .ok()
        .unwrap()
        .run()
        .ok()
        .unwrap();
    assert_eq!(termination, Termination::Orthogonal);
    assert_eq!(optimum.cost, 0.);
    assert_eq!(optimum.point, dvector![1., 2.]);
    assert_eq!(optimum.iterations, 1);
    assert_eq!(optimum.evaluations, 1);
    assert_eq!(optimum.jacobian_evaluations, 1);
    assert_eq!(function.calls(), [MockCall::Value, MockCall::Jacobian]);
}

#[test]
fn accepted_step_replaces_point() {
    // f(x) = x, y = 2
    let problem = problem(dvector![2.], dvector![0.]);
    let function = MockFunction::new(vec![dvector![0.], dvector![2.]], vec![dmatrix![1.]]);
    let config = LevenbergMarquardt::new();
    let mut lm = LM::new(&config, Evaluator::new(&problem, &function, 10))
        .ok()
        .unwrap();
    let mut lls = lm.linearize().ok().unwrap();
    assert!(lm.update_diag(&lls).is_ok());
    assert_eq!(lm.delta, 100.);

    let step = lm.trial_step(&mut lls).ok().unwrap();
    assert!(step.accepted);
    assert_relative_eq!(step.ratio, 1.);
    assert_eq!(lm.current.point, dvector![2.]);
    assert_eq!(lm.current.cost, 0.);
    assert_eq!(lm.lambda, 0.);
    assert_relative_eq!(lm.delta, 4.);
    assert_eq!(
        function.calls(),
        [MockCall::Value, MockCall::Jacobian, MockCall::Value]
    );
}

#[test]
fn rejected_step_keeps_point() {
    // f(x) = 1 for any x, but the Jacobian claims f(x) = 1 + x
    let problem = problem(dvector![0.], dvector![0.]);
    let function = MockFunction::new(vec![dvector![1.]], vec![dmatrix![1.]]);
    let config = LevenbergMarquardt::new();
    let mut lm = LM::new(&config, Evaluator::new(&problem, &function, 10))
        .ok()
        .unwrap();
    let mut lls = lm.linearize().ok().unwrap();
    assert!(lm.update_diag(&lls).is_ok());

    let step = lm.trial_step(&mut lls).ok().unwrap();
    assert!(!step.accepted);
    assert_eq!(step.ratio, 0.);
    assert_eq!(lm.current.point, dvector![0.]);
    assert_eq!(lm.current.cost, 1.);
    assert_relative_eq!(lm.delta, 0.5);
    assert_eq!(lm.evaluator.evaluations(), 2);
    assert_eq!(lm.check_convergence(&step), Ok(None));
}

use approx::assert_relative_eq;
use nalgebra::{dmatrix, dvector, DMatrix, DVector};
use nlsq::{
    BrentSolver, ConvergenceFailure, DifferentiableMultivariateFunction,
    DifferentiableVectorFunction, Formula, GaussNewton, LevenbergMarquardt,
    NonLinearConjugateGradient, OptimizerError, PointVectorValuePair, SimpleValueChecker,
    SimpleVectorValueChecker, VectorFunction, Weight,
};

/// Rosenbrock's function written as two model values with target zero.
struct Rosenbrock;

impl VectorFunction<f64> for Rosenbrock {
    fn value(&self, x: &DVector<f64>) -> DVector<f64> {
        dvector![10. * (x[1] - x[0] * x[0]), 1. - x[0]]
    }
}

impl DifferentiableVectorFunction<f64> for Rosenbrock {
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        dmatrix![
            -20. * x[0], 10.;
            -1., 0.;
        ]
    }
}

impl DifferentiableMultivariateFunction<f64> for Rosenbrock {
    fn value(&self, x: &DVector<f64>) -> f64 {
        VectorFunction::value(self, x).norm_squared()
    }

    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        let r = VectorFunction::value(self, x);
        self.jacobian(x).tr_mul(&r) * 2.
    }
}

#[test]
fn rosenbrock_levenberg_marquardt() {
    let optimum = LevenbergMarquardt::new()
        .optimize(
            1000,
            &Rosenbrock,
            dvector![0., 0.],
            Weight::unit(2),
            dvector![-1.2, 1.],
        )
        .unwrap();
    assert_relative_eq!(optimum.point, dvector![1., 1.], epsilon = 1e-6);
    assert!(optimum.cost < 1e-10);
    assert!(optimum.jacobian_evaluations <= optimum.evaluations);
}

#[test]
fn rosenbrock_with_checker() {
    let optimum = LevenbergMarquardt::new()
        .with_checker(SimpleVectorValueChecker::new(1e-6, 1e-6))
        .optimize(
            1000,
            &Rosenbrock,
            dvector![0., 0.],
            Weight::unit(2),
            dvector![-1.2, 1.],
        )
        .unwrap();
    assert_relative_eq!(optimum.point, dvector![1., 1.], epsilon = 1e-3);

    let value = optimum.value.clone();
    let pair = optimum.into_pair();
    assert_relative_eq!(pair.point, dvector![1., 1.], epsilon = 1e-3);
    assert_eq!(pair.value, value);
}

#[test]
fn rosenbrock_conjugate_gradient() {
    let optimum = NonLinearConjugateGradient::new(
        Formula::PolakRibiere,
        SimpleValueChecker::new(1e-12, 1e-12),
    )
    .optimize(100_000, &Rosenbrock, dvector![-1.2, 1.])
    .unwrap();
    assert!(optimum.value < 1e-4);
    assert_relative_eq!(optimum.point, dvector![1., 1.], epsilon = 2e-2);
}

#[test]
fn gauss_newton_close_to_the_solution() {
    let optimum = GaussNewton::new()
        .with_checker(|_: usize, a: &PointVectorValuePair<f64>, b: &PointVectorValuePair<f64>| {
            (&a.value - &b.value).norm() < 1e-12
        })
        .optimize(
            100,
            &Rosenbrock,
            dvector![0., 0.],
            Weight::unit(2),
            dvector![0.9, 0.8],
        )
        .unwrap();
    assert_relative_eq!(optimum.point, dvector![1., 1.], epsilon = 1e-10);
}

#[test]
fn mismatched_target() {
    let result = LevenbergMarquardt::new().optimize(
        100,
        &Rosenbrock,
        dvector![0., 0., 0.],
        Weight::unit(3),
        dvector![-1.2, 1.],
    );
    assert_eq!(
        result.err().unwrap(),
        OptimizerError::DimensionMismatch {
            expected: 3,
            found: 2
        }
    );
}

#[test]
fn nan_jacobian_is_reported() {
    struct Broken;
    impl VectorFunction<f64> for Broken {
        fn value(&self, x: &DVector<f64>) -> DVector<f64> {
            dvector![x[0], x[0]]
        }
    }
    impl DifferentiableVectorFunction<f64> for Broken {
        fn jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
            dmatrix![f64::NAN; 1.]
        }
    }
    let result = LevenbergMarquardt::new().optimize(
        100,
        &Broken,
        dvector![1., 1.],
        Weight::unit(2),
        dvector![0.],
    );
    assert_eq!(
        result.err().unwrap(),
        OptimizerError::Convergence(ConvergenceFailure::UnableToPerformQr { rows: 2, cols: 1 })
    );
}

#[test]
fn nan_cost_is_reported() {
    struct NanModel;
    impl VectorFunction<f64> for NanModel {
        fn value(&self, _x: &DVector<f64>) -> DVector<f64> {
            dvector![f64::NAN, 1.]
        }
    }
    impl DifferentiableVectorFunction<f64> for NanModel {
        fn jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::identity(2, 2)
        }
    }
    let result = LevenbergMarquardt::new().optimize(
        100,
        &NanModel,
        dvector![0., 0.],
        Weight::unit(2),
        dvector![1., 1.],
    );
    assert_eq!(
        result.err().unwrap(),
        OptimizerError::Convergence(ConvergenceFailure::NonFiniteCost)
    );

    let result = GaussNewton::new()
        .with_checker(SimpleVectorValueChecker::new(1e-6, 1e-6))
        .optimize(
            100,
            &NanModel,
            dvector![0., 0.],
            Weight::unit(2),
            dvector![1., 1.],
        );
    assert_eq!(
        result.err().unwrap(),
        OptimizerError::Convergence(ConvergenceFailure::NonFiniteCost)
    );
}

#[test]
fn brent_through_the_public_api() {
    let root = BrentSolver::new()
        .with_absolute_accuracy(1e-12)
        .solve(100, |x: f64| x.powi(3) - 2. * x - 5., 2., 3.)
        .unwrap();
    assert_relative_eq!(root.x, 2.0945514815423265, epsilon = 1e-10);
}

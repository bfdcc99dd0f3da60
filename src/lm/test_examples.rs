//! Tests with example functions from the MINPACK test suite.
//!
//! The model values are the MINPACK residuals and the target is zero, so the
//! expected objective `$\frac{1}{2}\|\vec{f}(\vec{x})\|^2$` is the one MINPACK reports.
use std::cell::RefCell;
use std::f64::consts::PI;

use approx::assert_relative_eq;
use nalgebra::{dmatrix, dvector, DMatrix, DVector};

use crate::utils::differentiate_numerically;
use crate::{
    ConvergenceFailure, DifferentiableVectorFunction, LeastSquaresOptimum, LevenbergMarquardt,
    OptimizerError, PointVectorValuePair, VectorFunction, Weight,
};

/// TOL value used by SciPy
const TOL: f64 = 1.49012e-08;

fn minimize<P>(function: &P, m: usize, start: DVector<f64>) -> LeastSquaresOptimum<f64>
where
    P: DifferentiableVectorFunction<f64>,
{
    LevenbergMarquardt::new()
        .with_cost_relative_tolerance(TOL)
        .with_par_relative_tolerance(TOL)
        .optimize(1000, function, DVector::zeros(m), Weight::unit(m), start)
        .unwrap()
}

fn objective(optimum: &LeastSquaresOptimum<f64>) -> f64 {
    0.5 * optimum.cost * optimum.cost
}

fn check_jacobian<P>(function: &P, x: DVector<f64>, epsilon: f64)
where
    P: DifferentiableVectorFunction<f64>,
{
    let numerical = differentiate_numerically(function, &x).unwrap();
    assert_relative_eq!(numerical, function.jacobian(&x), epsilon = epsilon);
}

struct LinearFullRank {
    m: usize,
}

impl VectorFunction<f64> for LinearFullRank {
    fn value(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut value = DVector::from_element(self.m, -2. * x.sum() / self.m as f64 - 1.);
        value.rows_range_mut(..5).axpy(1., x, 1.);
        value
    }
}

impl DifferentiableVectorFunction<f64> for LinearFullRank {
    fn jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
        let mut jacobian = DMatrix::from_element(self.m, 5, -2. / self.m as f64);
        for i in 0..5 {
            jacobian[(i, i)] += 1.;
        }
        jacobian
    }
}

#[test]
fn linear_full_rank() {
    for (m, expected) in [(10, 2.5), (50, 22.5)] {
        let function = LinearFullRank { m };
        check_jacobian(&function, dvector![0.3, -0.1, 0.7, 0.2, 0.9], 1e-10);
        let optimum = minimize(&function, m, DVector::from_element(5, 1.));
        assert_relative_eq!(objective(&optimum), expected, epsilon = 1e-10);
        assert_relative_eq!(optimum.point, DVector::from_element(5, -1.), epsilon = 1e-8);
    }
}

struct LinearRank1 {
    m: usize,
}

impl VectorFunction<f64> for LinearRank1 {
    fn value(&self, x: &DVector<f64>) -> DVector<f64> {
        let weighted_sum: f64 = x.iter().enumerate().map(|(j, p)| (j + 1) as f64 * p).sum();
        DVector::from_fn(self.m, |i, _| (i + 1) as f64 * weighted_sum - 1.)
    }
}

impl DifferentiableVectorFunction<f64> for LinearRank1 {
    fn jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(self.m, 5, |i, j| ((i + 1) * (j + 1)) as f64)
    }
}

#[test]
fn linear_rank1() {
    for (m, expected) in [(10, 1.0714285714285714), (50, 6.064356435643563)] {
        let function = LinearRank1 { m };
        check_jacobian(&function, dvector![0.3, -0.1, 0.7, 0.2, 0.9], 1e-8);
        let optimum = minimize(&function, m, DVector::from_element(5, 1.));
        assert_relative_eq!(objective(&optimum), expected, epsilon = 1e-8);
    }
}

struct LinearRank1ZeroColumns {
    m: usize,
}

impl VectorFunction<f64> for LinearRank1ZeroColumns {
    fn value(&self, x: &DVector<f64>) -> DVector<f64> {
        let weighted_sum: f64 = (1..4).map(|j| (j + 1) as f64 * x[j]).sum();
        DVector::from_fn(self.m, |i, _| {
            if i == self.m - 1 {
                -1.
            } else {
                i as f64 * weighted_sum - 1.
            }
        })
    }
}

impl DifferentiableVectorFunction<f64> for LinearRank1ZeroColumns {
    fn jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(self.m, 5, |i, j| {
            if i >= 1 && (1..4).contains(&j) && i < self.m - 1 {
                ((j + 1) * i) as f64
            } else {
                0.
            }
        })
    }
}

#[test]
fn linear_rank1_zero_columns() {
    for (m, expected) in [(10, 1.8235294117647063), (50, 6.814432989690721)] {
        let function = LinearRank1ZeroColumns { m };
        check_jacobian(&function, dvector![0.3, -0.1, 0.7, 0.2, 0.9], 1e-8);
        let optimum = minimize(&function, m, DVector::from_element(5, 1.));
        assert_relative_eq!(objective(&optimum), expected, epsilon = 1e-8);
        // parameters without influence stay where they are
        assert_relative_eq!(optimum.point[0], 1., epsilon = 1e-12);
        assert_relative_eq!(optimum.point[4], 1., epsilon = 1e-12);
    }
}

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

#[test]
fn rosenbrock() {
    check_jacobian(&Rosenbrock, dvector![0.4, -0.7], 1e-10);
    for factor in [0., 10., 100.] {
        let start = dvector![-1.2, 1.].add_scalar(factor);
        let optimum = minimize(&Rosenbrock, 2, start);
        assert!(objective(&optimum) < 1e-20);
        assert_relative_eq!(optimum.point, dvector![1., 1.], epsilon = 1e-8);
    }
}

struct HelicalValley;

const TPI: f64 = PI * 2.;

impl VectorFunction<f64> for HelicalValley {
    fn value(&self, x: &DVector<f64>) -> DVector<f64> {
        let tmp1 = if x[0] == 0. {
            0.25f64.copysign(x[1])
        } else if x[0] > 0. {
            (x[1] / x[0]).atan() / TPI
        } else {
            (x[1] / x[0]).atan() / TPI + 0.5
        };
        let tmp2 = (x[0] * x[0] + x[1] * x[1]).sqrt();
        dvector![10. * (x[2] - 10. * tmp1), 10. * (tmp2 - 1.), x[2]]
    }
}

impl DifferentiableVectorFunction<f64> for HelicalValley {
    #[rustfmt::skip]
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let temp = x[0] * x[0] + x[1] * x[1];
        let tmp1 = TPI * temp;
        let tmp2 = temp.sqrt();
        dmatrix![
            100. * x[1] / tmp1, -100. * x[0] / tmp1, 10.;
             10. * x[0] / tmp2,   10. * x[1] / tmp2,  0.;
                            0.,                  0.,  1.;
        ]
    }
}

#[test]
fn helical_valley() {
    check_jacobian(&HelicalValley, dvector![0.6, 0.3, -0.2], 1e-8);
    for factor in [1., 10., 100.] {
        let optimum = minimize(&HelicalValley, 3, dvector![-1., 0., 0.] * factor);
        assert!(objective(&optimum) < 1e-20);
        assert_relative_eq!(optimum.point, dvector![1., 0., 0.], epsilon = 1e-8);
    }
}

struct FreudensteinRoth;

impl VectorFunction<f64> for FreudensteinRoth {
    fn value(&self, x: &DVector<f64>) -> DVector<f64> {
        dvector![
            -13. + x[0] + ((5. - x[1]) * x[1] - 2.) * x[1],
            -29. + x[0] + ((1. + x[1]) * x[1] - 14.) * x[1]
        ]
    }
}

impl DifferentiableVectorFunction<f64> for FreudensteinRoth {
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        dmatrix![
            1., x[1] * (10. - 3. * x[1]) - 2.;
            1., x[1] * (2. + 3. * x[1]) - 14.;
        ]
    }
}

#[test]
fn freudenstein_roth() {
    check_jacobian(&FreudensteinRoth, dvector![0.2, 0.8], 1e-9);
    // converges to the local minimum
    let optimum = minimize(&FreudensteinRoth, 2, dvector![0.5, -2.]);
    assert_relative_eq!(objective(&optimum), 24.492126863534953, epsilon = 1e-6);
    assert_relative_eq!(optimum.point, dvector![11.4125, -0.8968], epsilon = 1e-3);
}

struct Bard;

#[rustfmt::skip]
const Y1: [f64; 15] = [
    0.14, 0.18, 0.22, 0.25, 0.29,
    0.32, 0.35, 0.39, 0.37, 0.58,
    0.73, 0.96, 1.34, 2.10, 4.39,
];

impl VectorFunction<f64> for Bard {
    fn value(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(15, |i, _| {
            let tmp2 = (15 - i) as f64;
            let tmp3 = if i > 7 { tmp2 } else { (i + 1) as f64 };
            Y1[i] - (x[0] + (i + 1) as f64 / (x[1] * tmp2 + x[2] * tmp3))
        })
    }
}

impl DifferentiableVectorFunction<f64> for Bard {
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(15, 3, |i, j| {
            let tmp2 = (15 - i) as f64;
            let tmp3 = if i > 7 { tmp2 } else { (i + 1) as f64 };
            let tmp4 = (x[1] * tmp2 + x[2] * tmp3).powi(2);
            match j {
                0 => -1.,
                1 => (i + 1) as f64 * tmp2 / tmp4,
                _ => (i + 1) as f64 * tmp3 / tmp4,
            }
        })
    }
}

#[test]
fn bard() {
    check_jacobian(&Bard, dvector![0.81, 0.47, 0.43], 1e-9);
    let optimum = minimize(&Bard, 15, dvector![1., 1., 1.]);
    assert_relative_eq!(objective(&optimum), 0.00410743865329062, epsilon = 1e-9);
    assert_relative_eq!(
        optimum.point,
        dvector![0.0824105765758334, 1.1330366534715044, 2.343694638941154],
        epsilon = 1e-5
    );
}

struct KowalikOsborne;

const V: [f64; 11] = [
    4., 2., 1., 0.5, 0.25, 0.167, 0.125, 0.1, 0.0833, 0.0714, 0.0625,
];
const Y2: [f64; 11] = [
    0.1957, 0.1947, 0.1735, 0.16, 0.0844, 0.0627, 0.0456, 0.0342, 0.0323, 0.0235, 0.0246,
];

impl VectorFunction<f64> for KowalikOsborne {
    fn value(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(11, |i, _| {
            let tmp1 = V[i] * (V[i] + x[1]);
            let tmp2 = V[i] * (V[i] + x[2]) + x[3];
            Y2[i] - x[0] * tmp1 / tmp2
        })
    }
}

impl DifferentiableVectorFunction<f64> for KowalikOsborne {
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(11, 4, |i, j| {
            let tmp1 = V[i] * (V[i] + x[1]);
            let tmp2 = V[i] * (V[i] + x[2]) + x[3];
            match j {
                0 => -tmp1 / tmp2,
                1 => -V[i] * x[0] / tmp2,
                2 => (tmp1 / tmp2) * (V[i] * x[0] / tmp2),
                _ => (tmp1 / tmp2) * (V[i] * x[0] / tmp2) / V[i],
            }
        })
    }
}

#[test]
fn kowalik_osborne() {
    check_jacobian(&KowalikOsborne, dvector![0.25, 0.31, 0.19, 0.75], 1e-9);
    let optimum = minimize(&KowalikOsborne, 11, dvector![0.25, 0.39, 0.415, 0.39]);
    assert_relative_eq!(objective(&optimum), 0.00015375280229088455, epsilon = 1e-10);
    assert_relative_eq!(
        optimum.point,
        dvector![0.1928, 0.1913, 0.1231, 0.1361],
        epsilon = 1e-3
    );
}

/// The model ignores its parameter but claims to depend on it.
struct Stuck;

impl VectorFunction<f64> for Stuck {
    fn value(&self, _x: &DVector<f64>) -> DVector<f64> {
        dvector![1.]
    }
}

impl DifferentiableVectorFunction<f64> for Stuck {
    fn jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
        dmatrix![1.]
    }
}

#[test]
fn unreachable_tolerances() {
    let result = LevenbergMarquardt::new()
        .with_cost_relative_tolerance(0.)
        .with_par_relative_tolerance(0.)
        .optimize(1000, &Stuck, dvector![0.], Weight::unit(1), dvector![0.]);
    assert_eq!(
        result.err().unwrap(),
        OptimizerError::Convergence(ConvergenceFailure::TooSmallCostRelativeTolerance)
    );

    let optimum = LevenbergMarquardt::new()
        .optimize(1000, &Stuck, dvector![0.], Weight::unit(1), dvector![0.])
        .unwrap();
    assert_eq!(optimum.cost, 1.);
    assert_eq!(optimum.point, dvector![0.]);
}

#[test]
fn evaluation_budget_is_respected() {
    let result = LevenbergMarquardt::new()
        .with_cost_relative_tolerance(0.)
        .with_par_relative_tolerance(0.)
        .optimize(5, &Stuck, dvector![0.], Weight::unit(1), dvector![0.]);
    assert_eq!(
        result.err().unwrap(),
        OptimizerError::TooManyEvaluations { max: 5 }
    );
}

#[test]
fn accepted_steps_never_increase_cost() {
    let costs = RefCell::new(vec![]);
    let checker = |_: usize, _: &PointVectorValuePair<f64>, current: &PointVectorValuePair<f64>| {
        costs.borrow_mut().push(current.value.norm());
        false
    };
    let optimum = LevenbergMarquardt::new()
        .with_checker(checker)
        .optimize(
            1000,
            &Bard,
            DVector::zeros(15),
            Weight::unit(15),
            dvector![1., 1., 1.],
        )
        .unwrap();
    let costs = costs.into_inner();
    assert!(costs.len() >= 2);
    assert!(costs.windows(2).all(|w| w[1] <= w[0]));
    assert_eq!(*costs.last().unwrap(), optimum.cost);
}

#[test]
fn checker_stops_early() {
    let optimum = LevenbergMarquardt::new()
        .with_checker(|iteration: usize, _: &PointVectorValuePair<f64>, _: &PointVectorValuePair<f64>| {
            iteration >= 2
        })
        .optimize(
            1000,
            &Rosenbrock,
            DVector::zeros(2),
            Weight::unit(2),
            dvector![-1.2, 1.],
        )
        .unwrap();
    assert_eq!(optimum.iterations, 2);
    assert!(optimum.cost > 0.);
}

#[test]
fn weights_scale_the_cost() {
    let weighted = LevenbergMarquardt::new()
        .optimize(
            1000,
            &Stuck,
            dvector![0.],
            Weight::Diagonal(dvector![4.]),
            dvector![0.],
        )
        .unwrap();
    assert_relative_eq!(weighted.cost, 2.);
}

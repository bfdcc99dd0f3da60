use approx::assert_relative_eq;
use nalgebra::{dvector, DVector};
use nlsq::{Curve, CurveFitter, LeastSquaresProblem, LevenbergMarquardt, ParametricFunction, Weight};
use pcg_rand::Pcg64;
use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;

/// `$a e^{-b x} + c$`
struct Decay;

impl ParametricFunction<f64> for Decay {
    fn value(&self, x: f64, p: &DVector<f64>) -> f64 {
        p[0] * (-p[1] * x).exp() + p[2]
    }

    fn gradient(&self, x: f64, p: &DVector<f64>) -> DVector<f64> {
        let e = (-p[1] * x).exp();
        dvector![e, -p[0] * x * e, 1.]
    }
}

#[test]
fn noisy_exponential_decay() {
    let mut rng = Pcg64::seed_from_u64(0x5eed);
    let noise = Uniform::new(-0.05, 0.05);
    let truth = dvector![5., 0.7, 1.];

    let mut fitter = CurveFitter::new(LevenbergMarquardt::new()).with_max_evaluations(200);
    let xs: Vec<f64> = (0..60).map(|i| i as f64 * 0.1).collect();
    for &x in &xs {
        fitter.add_observed_point(1., x, Decay.value(x, &truth) + noise.sample(&mut rng));
    }
    let optimum = fitter.fit(&Decay, dvector![1., 0.1, 0.]).unwrap();
    assert_relative_eq!(optimum.point, truth, epsilon = 0.08);
    // uniform noise of width 0.1 has a standard deviation of about 0.029
    let rms = optimum.cost / (xs.len() as f64).sqrt();
    assert!(rms > 0.01 && rms < 0.05, "rms {}", rms);

    // parameter uncertainties at the optimum
    let ys: Vec<f64> = fitter.observations().iter().map(|o| o.y).collect();
    let problem = LeastSquaresProblem::new(
        DVector::from_vec(ys),
        Weight::unit(xs.len()),
        optimum.point.clone(),
    )
    .unwrap();
    let curve = Curve::new(&Decay, &xs);
    let sigma = problem
        .compute_sigma(&curve, &optimum.point, 1e-14)
        .unwrap();
    let errors = problem
        .estimate_parameter_errors(optimum.cost, &sigma)
        .unwrap();
    for (error, (fit, real)) in errors.iter().zip(optimum.point.iter().zip(truth.iter())) {
        assert!(*error > 0. && *error < 0.05, "error {}", error);
        assert!((fit - real).abs() < 10. * error);
    }
}

#[test]
fn convenience_fit_matches_fitter() {
    let xs = [0., 0.5, 1., 2., 3., 5.];
    let truth = dvector![2., 1.3, -0.5];
    let ys = xs.map(|x| Decay.value(x, &truth));

    let direct = Decay.least_squares_fit(&xs, &ys, dvector![1., 1., 0.]).unwrap();

    let mut fitter = CurveFitter::default();
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        fitter.add_observed_point(1., x, y);
    }
    let collected = fitter.fit(&Decay, dvector![1., 1., 0.]).unwrap();

    assert_relative_eq!(direct.point, truth, epsilon = 1e-8);
    assert_relative_eq!(direct.point, collected.point, epsilon = 1e-12);
    assert_eq!(direct.evaluations, collected.evaluations);
}

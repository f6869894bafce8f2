use kriging::{FittedKriging, Kernel, Objective, Optimizer, Trend};
use linfa::prelude::*;
use ndarray::{Array, Array1, Array2, Axis, arr2, concatenate};

fn xsinx(x: &Array2<f64>) -> Array1<f64> {
    ((x - 3.5) * ((x - 3.5) / std::f64::consts::PI).mapv(|v| v.sin())).remove_axis(Axis(1))
}

fn main() {
    env_logger::init();

    let xt = arr2(&[[0.0], [5.0], [10.0], [15.0], [18.0], [20.0], [25.0]]);
    let yt = xsinx(&xt);

    println!("Train kriging surrogate of 'xsinx' at {}", xt.column(0));
    let mut kriging = FittedKriging::<f64>::params(Kernel::SquaredExponential)
        .trend(Trend::Linear)
        .objective(Objective::LeaveOneOut)
        .optimizer(Optimizer::Bfgs { n_start: 5 })
        .fit(&Dataset::new(xt, yt))
        .expect("Kriging fitting");
    println!("{kriging}");

    let xtest = Array::linspace(0., 25., 26).insert_axis(Axis(1));
    let ytest = xsinx(&xtest);
    let prediction = kriging.predict(&xtest, false).expect("Kriging prediction");
    let ysigma = prediction.variance.mapv(f64::sqrt);

    println!("Compute prediction errors (x, err(x), sigma(x))");
    println!(
        "{}",
        concatenate![
            Axis(1),
            xtest,
            (prediction.mean - &ytest).insert_axis(Axis(1)),
            ysigma.insert_axis(Axis(1))
        ]
    );

    println!("Add observation at x = 12.5");
    let xnew = arr2(&[[12.5]]);
    kriging.update(&xsinx(&xnew), &xnew).expect("Kriging update");
    let (loo_mean, loo_var) = kriging
        .leave_one_out_residuals()
        .expect("Leave-one-out residuals");
    println!("LOO means = {loo_mean}");
    println!("LOO variances = {loo_var}");
}

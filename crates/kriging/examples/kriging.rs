use kriging::{Kriging, Parameters, Trend};
use ndarray::{Array, Axis, arr1, arr2};

fn main() {
    env_logger::init();

    let xtrain = arr2(&[[0.0], [1.0], [2.0], [3.0], [4.0]]);
    let ytrain = arr1(&[0.0, 1.0, 1.5, 0.9, 1.0]);

    let mut model = Kriging::new("matern5_2").expect("Known kernel");
    model
        .fit(
            &ytrain,
            &xtrain,
            Trend::Constant,
            false,
            "BFGS10",
            "LL",
            Parameters::default(),
        )
        .expect("Kriging fitting");
    println!("{}", model.describe_model().expect("Fitted model"));

    let xtest = Array::linspace(0., 4., 9).insert_axis(Axis(1));
    let prediction = model.predict(&xtest, false).expect("Kriging prediction");
    println!("mean = {}", prediction.mean);
    println!("std = {}", prediction.variance.mapv(f64::sqrt));

    let draws = model.simulate(&xtest, 3, 42).expect("Kriging simulation");
    println!("simulations =\n{draws}");
}

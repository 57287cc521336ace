pub mod checkpoint;
pub mod config;
pub mod data;
pub mod example;
pub mod metrics;
pub mod nn;
pub mod search;
pub mod tfrecord;
pub mod trainer;

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Sigmoid,
    Tanh,
    ReLU,
    Identity,
}

impl Activation {
    /// The activations the architecture sampler draws from.
    pub const SAMPLED: [Activation; 3] = [Activation::Sigmoid, Activation::Tanh, Activation::ReLU];

    pub fn get_fun32(&self) -> fn(&mut f32) {
        match self {
            Activation::Sigmoid => |x: &mut f32| *x = sigmoid(*x),
            Activation::Tanh => |x: &mut f32| *x = x.tanh(),
            Activation::ReLU => |x: &mut f32| *x = x.max(0.),
            Activation::Identity => |_: &mut f32| {},
        }
    }

    /// Derivative with respect to the pre-activation `z`.
    pub fn get_dir32(&self) -> fn(&mut f32) {
        match self {
            Activation::Sigmoid => |x: &mut f32| *x = sigmoid(*x) * (1. - sigmoid(*x)),
            Activation::Tanh => |x: &mut f32| *x = 1. - x.tanh().powi(2),
            Activation::ReLU => |x: &mut f32| *x = if *x > 0. { 1. } else { 0. },
            Activation::Identity => |x: &mut f32| *x = 1.,
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::ReLU => "relu",
            Activation::Identity => "identity",
        };
        f.write_str(name)
    }
}

/// The sigmoid function.
pub fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn activations_match_their_definitions() {
        let mut x = 0.0;
        Activation::Sigmoid.get_fun32()(&mut x);
        assert!((x - 0.5).abs() < 1e-6);

        let mut x = -3.0;
        Activation::ReLU.get_fun32()(&mut x);
        assert_eq!(x, 0.0);

        let mut x = 0.0;
        Activation::Tanh.get_dir32()(&mut x);
        assert!((x - 1.0).abs() < 1e-6);

        let mut x = 0.0;
        Activation::Sigmoid.get_dir32()(&mut x);
        assert!((x - 0.25).abs() < 1e-6);
    }

    #[test]
    fn derivatives_agree_with_finite_differences() {
        let h = 1e-3_f32;
        for activation in Activation::SAMPLED {
            for z in [-1.3_f32, -0.2, 0.4, 2.1] {
                let f = activation.get_fun32();
                let (mut lo, mut hi) = (z - h, z + h);
                f(&mut lo);
                f(&mut hi);
                let numeric = (hi - lo) / (2. * h);

                let mut analytic = z;
                activation.get_dir32()(&mut analytic);
                assert!(
                    (numeric - analytic).abs() < 1e-2,
                    "{activation} at {z}: {numeric} vs {analytic}"
                );
            }
        }
    }

    #[test]
    fn activation_names_round_trip_through_serde() {
        let json = serde_json::to_string(&Activation::ReLU).unwrap();
        assert_eq!(json, "\"relu\"");
        let back: Activation = serde_json::from_str("\"tanh\"").unwrap();
        assert_eq!(back, Activation::Tanh);
        assert_eq!(Activation::Sigmoid.to_string(), "sigmoid");
    }
}

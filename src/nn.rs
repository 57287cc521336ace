use std::iter::zip;

use anyhow::{ensure, Result};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::Activation;

pub type Sample = (DVector<f32>, usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    sizes: Vec<usize>,
    activations: Vec<Activation>,
    biases: Vec<DVector<f32>>,
    weights: Vec<DMatrix<f32>>,
}

/// Per-layer gradients, shaped like the network's parameters.
pub struct Gradients {
    pub weights: Vec<DMatrix<f32>>,
    pub biases: Vec<DVector<f32>>,
}

impl Network {
    /// ``sizes`` lists the number of neurons in every layer, input first
    /// and output last; ``activations`` has one entry per hidden layer.
    /// The output layer is always a softmax.
    ///
    /// Weights and biases are drawn from a standard normal scaled by
    /// ``1 / sqrt(fan_in)``. The input layer has no biases.
    pub fn new<R: Rng>(sizes: &[usize], activations: &[Activation], rng: &mut R) -> Result<Self> {
        ensure!(sizes.len() >= 2, "a network needs an input and an output layer");
        ensure!(
            activations.len() == sizes.len() - 2,
            "{} hidden layers but {} activations",
            sizes.len() - 2,
            activations.len()
        );
        ensure!(!sizes.contains(&0), "layer sizes must be positive: {sizes:?}");

        let mut normal =
            |fan_in: usize| rng.sample::<f32, _>(StandardNormal) / (fan_in as f32).sqrt();

        let weights = zip(&sizes[..sizes.len() - 1], &sizes[1..])
            .map(|(x, y)| DMatrix::from_fn(*y, *x, |_, _| normal(*x)))
            .collect();
        let biases = zip(&sizes[..sizes.len() - 1], &sizes[1..])
            .map(|(x, y)| DVector::from_fn(*y, |_, _| normal(*x)))
            .collect();

        Ok(Self {
            sizes: sizes.to_vec(),
            activations: activations.to_vec(),
            biases,
            weights,
        })
    }

    /// Class probabilities for input ``a``.
    pub fn feedforward(&self, mut a: DVector<f32>) -> DVector<f32> {
        let last = self.weights.len() - 1;
        for (i, (b, w)) in zip(&self.biases, &self.weights).enumerate() {
            a = w * a;
            a += b;

            if i == last {
                a = softmax(a);
            } else {
                a.apply(self.activations[i].get_fun32());
            }
        }

        a
    }

    pub fn classify(&self, x: &DVector<f32>) -> usize {
        argmax(&self.feedforward(x.clone()))
    }

    pub fn predict(&self, inputs: &[DVector<f32>]) -> Vec<usize> {
        inputs.par_iter().map(|x| self.classify(x)).collect()
    }

    pub fn zero_gradients(&self) -> Gradients {
        Gradients {
            weights: self
                .weights
                .iter()
                .map(|w| DMatrix::zeros(w.nrows(), w.ncols()))
                .collect(),
            biases: self.biases.iter().map(|b| DVector::zeros(b.len())).collect(),
        }
    }

    /// Update the network's weights and biases by applying gradient
    /// descent using backpropagation to a single mini batch. ``eta`` is
    /// the learning rate.
    pub fn update_mini_batch(&mut self, mini_batch: &[Sample], eta: f32) {
        if mini_batch.is_empty() {
            return;
        }
        let mut grad = self.zero_gradients();

        for (x, y) in mini_batch {
            self.backprop(x, *y, &mut grad);
        }

        let lr_bs = eta / mini_batch.len() as f32;

        zip(&mut self.weights, &grad.weights).for_each(|(w, nw)| *w -= lr_bs * nw);
        zip(&mut self.biases, &grad.biases).for_each(|(b, nb)| *b -= lr_bs * nb);
    }

    /// Accumulates the gradient of the cross-entropy loss for a single
    /// example ``(x, label)`` into ``grad``.
    pub fn backprop(&self, x: &DVector<f32>, label: usize, grad: &mut Gradients) {
        let last = self.weights.len() - 1;
        let mut activations = vec![x.clone()]; // layer by layer
        let mut zs = Vec::with_capacity(self.weights.len());

        for (i, (b, w)) in zip(&self.biases, &self.weights).enumerate() {
            let z = w * activations[i].clone() + b;
            let a = if i == last {
                softmax(z.clone())
            } else {
                z.clone().apply_into(self.activations[i].get_fun32())
            };
            zs.push(z);
            activations.push(a);
        }

        // softmax followed by cross-entropy: dC/dz = a - y
        let mut delta = activations[last + 1].clone();
        delta[label] -= 1.0;

        for l in (0..=last).rev() {
            grad.weights[l] += &delta * activations[l].transpose();
            grad.biases[l] += &delta;

            if l > 0 {
                let sp = zs[l - 1].clone().apply_into(self.activations[l - 1].get_dir32());
                delta = self.weights[l].tr_mul(&delta).component_mul(&sp);
            }
        }
    }

    /// Cross-entropy of the prediction for ``x`` against ``label``.
    pub fn cost(&self, x: &DVector<f32>, label: usize) -> f32 {
        cross_entropy(&self.feedforward(x.clone()), label)
    }

    /// Return the number of inputs the network classifies correctly and
    /// the mean cross-entropy over them.
    pub fn evaluate(&self, test_data: &[Sample]) -> (usize, f32) {
        if test_data.is_empty() {
            return (0, 0.0);
        }

        let (correct, loss) = test_data
            .par_iter()
            .map(|(x, y)| {
                let out = self.feedforward(x.clone());
                (usize::from(argmax(&out) == *y), cross_entropy(&out, *y))
            })
            .reduce(|| (0, 0.0), |(c1, l1), (c2, l2)| (c1 + c2, l1 + l2));

        (correct, loss / test_data.len() as f32)
    }

    #[cfg(test)]
    fn weights_mut(&mut self) -> &mut Vec<DMatrix<f32>> {
        &mut self.weights
    }
}

pub fn softmax(z: DVector<f32>) -> DVector<f32> {
    let max = z.max();
    let exp = z.map(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// `-ln p[label]`, clamped so a zero probability stays finite.
pub fn cross_entropy(p: &DVector<f32>, label: usize) -> f32 {
    -p[label].max(f32::MIN_POSITIVE).ln()
}

pub fn argmax(v: &DVector<f32>) -> usize {
    v.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

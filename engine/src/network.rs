//! Small dense regression network: the default approximator behind both
//! index stages.
//!
//! Topology is `Dense(1→width) → ReLU → Dense(width→1)`, or a single
//! `Dense(1→1)` when `width == 0`. Weights start Glorot-normal, biases at
//! zero; training minimizes a Huber loss with Adam.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::approximator::{Approximator, ApproximatorBuilder, TrainingBatch};
use crate::config::NetworkParameters;

/// Residual (in position units) where the Huber loss turns linear.
const HUBER_DELTA: f32 = 1.0;

const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPSILON: f32 = 1e-8;

#[inline]
pub fn huber_loss(residual: f32) -> f32 {
    let abs = residual.abs();
    if abs <= HUBER_DELTA {
        0.5 * residual * residual
    } else {
        HUBER_DELTA * (abs - 0.5 * HUBER_DELTA)
    }
}

#[inline]
pub fn huber_gradient(residual: f32) -> f32 {
    residual.clamp(-HUBER_DELTA, HUBER_DELTA)
}

/// First and second moment estimates for one parameter tensor.
#[derive(Debug, Clone)]
struct AdamState {
    m: Vec<f32>,
    v: Vec<f32>,
}

impl AdamState {
    fn new(len: usize) -> Self {
        Self {
            m: vec![0.0; len],
            v: vec![0.0; len],
        }
    }

    fn step(&mut self, params: &mut [f32], grads: &[f32], learning_rate: f32, t: i32) {
        let bias_correction1 = 1.0 - ADAM_BETA1.powi(t);
        let bias_correction2 = 1.0 - ADAM_BETA2.powi(t);

        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = ADAM_BETA1 * self.m[i] + (1.0 - ADAM_BETA1) * g;
            self.v[i] = ADAM_BETA2 * self.v[i] + (1.0 - ADAM_BETA2) * g * g;
            let m_hat = self.m[i] / bias_correction1;
            let v_hat = self.v[i] / bias_correction2;
            params[i] -= learning_rate * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
        }
    }
}

/// Fully connected layer, weights stored row-major as `[outputs][inputs]`.
#[derive(Debug, Clone)]
struct Dense {
    inputs: usize,
    outputs: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
    weight_opt: AdamState,
    bias_opt: AdamState,
}

struct DenseGradients {
    input: Vec<f32>,
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl Dense {
    fn glorot_normal(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        let std_dev = (2.0 / (inputs + outputs) as f32).sqrt();
        let weights = (0..inputs * outputs)
            .map(|_| {
                let z: f32 = rng.sample(StandardNormal);
                z * std_dev
            })
            .collect();

        Self {
            inputs,
            outputs,
            weights,
            bias: vec![0.0; outputs],
            weight_opt: AdamState::new(inputs * outputs),
            bias_opt: AdamState::new(outputs),
        }
    }

    fn forward(&self, input: &[f32], batch: usize) -> Vec<f32> {
        let mut out = vec![0.0; batch * self.outputs];
        for b in 0..batch {
            let x = &input[b * self.inputs..(b + 1) * self.inputs];
            for o in 0..self.outputs {
                let row = &self.weights[o * self.inputs..(o + 1) * self.inputs];
                let dot: f32 = row.iter().zip(x).map(|(w, x)| w * x).sum();
                out[b * self.outputs + o] = self.bias[o] + dot;
            }
        }
        out
    }

    fn backward(&self, input: &[f32], grad_out: &[f32], batch: usize) -> DenseGradients {
        let mut grads = DenseGradients {
            input: vec![0.0; batch * self.inputs],
            weights: vec![0.0; self.weights.len()],
            bias: vec![0.0; self.outputs],
        };

        for b in 0..batch {
            for o in 0..self.outputs {
                let g = grad_out[b * self.outputs + o];
                grads.bias[o] += g;
                for i in 0..self.inputs {
                    grads.weights[o * self.inputs + i] += g * input[b * self.inputs + i];
                    grads.input[b * self.inputs + i] += g * self.weights[o * self.inputs + i];
                }
            }
        }
        grads
    }

    fn apply(&mut self, grads: &DenseGradients, learning_rate: f32, t: i32) {
        self.weight_opt
            .step(&mut self.weights, &grads.weights, learning_rate, t);
        self.bias_opt.step(&mut self.bias, &grads.bias, learning_rate, t);
    }
}

/// Dense ReLU regressor trained with Huber loss and Adam.
#[derive(Debug, Clone)]
pub struct DenseNetwork {
    layers: Vec<Dense>,
    learning_rate: f32,
    steps: u64,
}

impl DenseNetwork {
    pub fn new(params: &NetworkParameters, rng: &mut StdRng) -> Self {
        let layers = if params.width == 0 {
            vec![Dense::glorot_normal(1, 1, rng)]
        } else {
            vec![
                Dense::glorot_normal(1, params.width, rng),
                Dense::glorot_normal(params.width, 1, rng),
            ]
        };

        Self {
            layers,
            learning_rate: params.learning_rate,
            steps: 0,
        }
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Training steps taken so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Returns (activations per layer boundary, pre-activations per layer).
    fn forward_batch(&self, inputs: &[f32]) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
        let batch = inputs.len();
        let last = self.layers.len() - 1;
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        let mut pre_activations = Vec::with_capacity(self.layers.len());
        activations.push(inputs.to_vec());

        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&activations[i], batch);
            let a = if i == last {
                z.clone()
            } else {
                z.iter().map(|v| v.max(0.0)).collect()
            };
            pre_activations.push(z);
            activations.push(a);
        }
        (activations, pre_activations)
    }
}

impl Approximator for DenseNetwork {
    fn train_step(&mut self, batch: &TrainingBatch<'_>) -> f32 {
        let n = batch.len();
        if n == 0 {
            return 0.0;
        }
        let scale = if batch.output_scale > 0.0 {
            batch.output_scale
        } else {
            1.0
        };

        let (activations, pre_activations) = self.forward_batch(batch.inputs);
        let output = &activations[self.layers.len()];

        // Loss in position units; gradient scaled back to normalized output units
        let mut loss = 0.0;
        let mut grad = vec![0.0; n];
        for b in 0..n {
            let residual = output[b] * scale - batch.labels[b];
            loss += huber_loss(residual);
            grad[b] = huber_gradient(residual) / scale / n as f32;
        }
        loss /= n as f32;

        let last = self.layers.len() - 1;
        let mut layer_grads = Vec::with_capacity(self.layers.len());
        for i in (0..self.layers.len()).rev() {
            if i != last {
                for (g, z) in grad.iter_mut().zip(&pre_activations[i]) {
                    if *z <= 0.0 {
                        *g = 0.0;
                    }
                }
            }
            let grads = self.layers[i].backward(&activations[i], &grad, n);
            grad = grads.input.clone();
            layer_grads.push(grads);
        }
        layer_grads.reverse();

        self.steps += 1;
        let t = self.steps.min(i32::MAX as u64) as i32;
        for (layer, grads) in self.layers.iter_mut().zip(&layer_grads) {
            layer.apply(grads, self.learning_rate, t);
        }

        loss
    }

    fn predict(&self, input: f32) -> f32 {
        let (activations, _) = self.forward_batch(&[input]);
        activations[self.layers.len()][0]
    }
}

/// Builds a fresh [`DenseNetwork`] per stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseNetworkBuilder;

impl ApproximatorBuilder for DenseNetworkBuilder {
    type Model = DenseNetwork;

    fn build(&self, params: &NetworkParameters, rng: &mut StdRng) -> DenseNetwork {
        DenseNetwork::new(params, rng)
    }
}

//! Trainable function approximator seam.
//!
//! Both index stages depend only on these two traits, so the numeric engine
//! behind them is swappable. `network::DenseNetworkBuilder` is the default.

use rand::rngs::StdRng;

use crate::config::NetworkParameters;

/// One mini-batch of scalar regression samples.
///
/// Labels are expressed in output units multiplied by `output_scale`
/// (positions in a dataset of `output_scale` records). The approximator's own
/// output stays normalized; it is multiplied by `output_scale` only while the
/// loss is computed.
#[derive(Debug, Clone, Copy)]
pub struct TrainingBatch<'a> {
    pub inputs: &'a [f32],
    pub labels: &'a [f32],
    pub output_scale: f32,
}

impl<'a> TrainingBatch<'a> {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// A regressor mapping a scalar input to a scalar output.
pub trait Approximator: Send + Sync {
    /// One forward/loss/backward/optimizer cycle. Returns the batch loss.
    fn train_step(&mut self, batch: &TrainingBatch<'_>) -> f32;

    /// Normalized output for a single input.
    fn predict(&self, input: f32) -> f32;
}

/// Creates fresh approximators for a stage.
pub trait ApproximatorBuilder: Send + Sync + 'static {
    type Model: Approximator + 'static;

    fn build(&self, params: &NetworkParameters, rng: &mut StdRng) -> Self::Model;
}

/// Module that contains the convolutional layer implementation
pub mod convolutional;
/// Module that contains the dense (fully connected) layer implementation
pub mod dense;
/// Module that contains the recurrent LSTM layer implementation
pub mod lstm;

pub use convolutional::*;
pub use dense::*;
pub use lstm::*;

use super::{Optimizer, Vector};
use crate::error::NetworkError;
use ndarray::Array1;

/// Recurrent memory a layer consumed during one training forward pass.
///
/// Concurrent batch workers share the layers, so a recurrent layer cannot
/// park the state it read in a shared field for its backward pass; another
/// worker's forward would overwrite it in between. Instead
/// [`forward_train`](Layer::forward_train) hands the snapshot back to the
/// caller, who keeps it in the sample's own forward cache and returns it to
/// [`update_gradient`](Layer::update_gradient). Stateless layers carry
/// `None`.
#[derive(Debug, Clone, Default)]
pub enum StepMemory {
    #[default]
    None,
    Recurrent {
        hidden: Array1<f64>,
        cell: Array1<f64>,
    },
}

/// Defines the interface for neural network layers.
///
/// A layer owns its learnable parameters, the gradient accumulators for
/// those parameters, and the per-parameter optimizer state. Gradient
/// accumulators are interior-mutable (guarded by a lock held only around the
/// accumulation) so that concurrent mini-batch workers may call
/// [`update_gradient`](Layer::update_gradient) against a shared layer; the
/// parameters themselves are only mutated through `&mut self` in
/// [`apply_gradient`](Layer::apply_gradient), which runs strictly after all
/// workers have joined.
pub trait Layer: Send + Sync {
    /// Applies the learned parameters of this layer to the given input,
    /// returning the raw (pre-activation) output vector.
    fn forward(&self, input: &Vector) -> Vector;

    /// Like [`forward`](Layer::forward), but additionally returns the
    /// recurrent memory the layer consumed, for the matching
    /// [`update_gradient`](Layer::update_gradient) call. Stateless layers
    /// return [`StepMemory::None`].
    fn forward_train(&self, input: &Vector) -> (Vector, StepMemory) {
        (self.forward(input), StepMemory::None)
    }

    /// Accumulates this layer's parameter gradients for one sample.
    ///
    /// # Parameters
    ///
    /// - `dz_dc` - Gradient of the cost with respect to this layer's raw output
    /// - `x` - The input this layer received during the matching forward pass
    /// - `memory` - The snapshot returned by the matching
    ///   [`forward_train`](Layer::forward_train) call
    ///
    /// # Returns
    ///
    /// * `Vector` - `da/dC`, the gradient of the cost with respect to the
    ///   preceding layer's activation output
    fn update_gradient(&self, dz_dc: &Vector, x: &Vector, memory: &StepMemory) -> Vector;

    /// Applies the accumulated gradients to this layer's parameters using
    /// the given optimizer rule, updating the optimizer state tensors and
    /// the layer's update counter as well.
    fn apply_gradient(
        &mut self,
        optimizer: Optimizer,
        adjusted_learning_rate: f64,
        momentum: f64,
        beta: f64,
        epsilon: f64,
    );

    /// Resets every gradient accumulator of this layer to exactly zero.
    fn clear_gradient(&self);

    /// Populates this layer's parameters from the initializer and allocates
    /// optimizer state for the chosen optimizer variant.
    fn initialize(&mut self, initializer: &mut dyn FnMut() -> f64, optimizer: Optimizer);

    /// The width of the input vectors this layer accepts.
    fn input_size(&self) -> usize;

    /// The number of nodes (output width) of this layer.
    fn node_count(&self) -> usize;

    /// The number of learnable parameters in this layer.
    fn parameter_count(&self) -> usize;

    /// A flattened deep copy of every learnable parameter, used for
    /// summaries and comparisons.
    fn parameters(&self) -> Vec<f64>;

    /// Resets any persistent recurrent memory this layer carries.
    ///
    /// # Returns
    ///
    /// - `Ok(())` - For recurrent layers, after zeroing their memory
    /// - `Err(NetworkError::NotSupported)` - For layers without recurrent state
    fn reset_memory(&self) -> Result<(), NetworkError> {
        Err(NetworkError::NotSupported(
            "only recurrent layers carry resettable memory",
        ))
    }

    /// An independent deep copy of this layer, including gradient buffers
    /// and optimizer state (never aliased with the original).
    fn clone_layer(&self) -> Box<dyn Layer>;
}

impl Clone for Box<dyn Layer> {
    fn clone(&self) -> Self {
        self.clone_layer()
    }
}

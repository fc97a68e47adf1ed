//! # gradnet
//!
//! A hand-rolled neural network training engine: forward inference,
//! reverse-mode backpropagation, gradient accumulation and parameter updates
//! across dense, convolutional and recurrent (LSTM) layers, driven by
//! pluggable activation, cost and optimizer strategies.
//!
//! Networks are built with [`network::NetworkBuilder`], which wires an
//! ordered sequence of layers together with an activation pair, a cost
//! function and an optimizer, then initializes every parameter with He or
//! Xavier scaling depending on the hidden activation.
//!
//! Mini-batch training runs one rayon worker per sample; each worker performs
//! its own forward and backward pass and accumulates into the shared
//! per-layer gradient buffers, and the optimizer is applied exactly once per
//! batch with the learning rate scaled by `1 / batch_size`.
//!
//! # Example
//! ```rust
//! use gradnet::network::*;
//! use ndarray::array;
//!
//! let mut net = NetworkBuilder::new()
//!     .input_num(2)?
//!     .add_dense_layer(8)?
//!     .add_dense_layer(2)?
//!     .hidden_activation(Activation::Tanh)
//!     .output_activation(Activation::Softmax)
//!     .cost_function(Cost::CrossEntropy)
//!     .optimizer(Optimizer::SgdMomentum)
//!     .seed(7)
//!     .build()?;
//!
//! let inputs = [array![0.0, 1.0], array![1.0, 0.0]];
//! let targets = [array![1.0, 0.0], array![1.0, 0.0]];
//! for _ in 0..100 {
//!     net.learn(0.5, 0.9, 0.999, 1e-8, &inputs, &targets)?;
//! }
//! let prediction = net.calculate_output(&array![0.0, 1.0])?;
//! assert_eq!(prediction.len(), 2);
//! # Ok::<(), gradnet::error::NetworkError>(())
//! ```

/// Error types shared across the crate
pub mod error;

/// Neural network core: layer variants, activation / cost / optimizer
/// strategies, and the training orchestrator
pub mod network;

#[cfg(test)]
mod test;

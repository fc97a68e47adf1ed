use super::{Layer, StepMemory};
use crate::network::{Optimizer, Vector};
use ndarray::{Array1, Array2};
use std::sync::Mutex;

/// Gradient accumulators for a dense layer, summed over the samples of one
/// mini-batch and cleared before the next.
#[derive(Debug, Clone)]
pub(crate) struct DenseGradient {
    pub(crate) weights: Array2<f64>,
    pub(crate) bias: Array1<f64>,
}

/// A fully connected layer: every input node is wired to every output node.
///
/// The weight matrix is shaped `(input_size, nodes)`: row `i` holds the
/// outgoing synapses of input node `i`. Velocity tensors are allocated at
/// [`initialize`](Layer::initialize) only when the chosen optimizer needs
/// them.
pub struct Dense {
    pub(crate) weights: Array2<f64>,
    pub(crate) bias: Array1<f64>,
    /// Shared accumulator; concurrent batch workers lock it only for the
    /// duration of their accumulation.
    pub(crate) gradient: Mutex<DenseGradient>,
    weights_velocity: Option<Array2<f64>>,
    weights_velocity_squared: Option<Array2<f64>>,
    bias_velocity: Option<Array1<f64>>,
    bias_velocity_squared: Option<Array1<f64>>,
    /// Number of gradient steps applied so far, starting at 1 (Adam bias
    /// correction).
    t: u64,
}

impl Dense {
    /// Creates the shell of a dense layer with all parameters zeroed.
    ///
    /// Call [`initialize`](Layer::initialize) to populate the parameters and
    /// allocate optimizer state.
    ///
    /// # Parameters
    ///
    /// - `input_size` - Number of nodes in the preceding layer
    /// - `nodes` - Number of neurons in this layer
    pub fn new(input_size: usize, nodes: usize) -> Self {
        Self {
            weights: Array2::zeros((input_size, nodes)),
            bias: Array1::zeros(nodes),
            gradient: Mutex::new(DenseGradient {
                weights: Array2::zeros((input_size, nodes)),
                bias: Array1::zeros(nodes),
            }),
            weights_velocity: None,
            weights_velocity_squared: None,
            bias_velocity: None,
            bias_velocity_squared: None,
            t: 1,
        }
    }

    /// Returns a reference to the weight matrix, shaped `(input_size, nodes)`.
    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    /// Returns a reference to the bias vector.
    pub fn bias(&self) -> &Array1<f64> {
        &self.bias
    }
}

impl Layer for Dense {
    /// `forward(x) = x·W + b`
    fn forward(&self, input: &Vector) -> Vector {
        input.dot(&self.weights) + &self.bias
    }

    /// Accumulates `weight_gradient += outer(x, dz_dc)` and
    /// `bias_gradient += dz_dc`, then returns `W·dz_dc` as the gradient for
    /// the preceding layer's activation output.
    fn update_gradient(&self, dz_dc: &Vector, x: &Vector, _memory: &StepMemory) -> Vector {
        // Weights are read-only during the batch; only the accumulator
        // needs the lock.
        let da_dc = self.weights.dot(dz_dc);

        let mut gradient = self.gradient.lock().expect("poisoned gradient lock");
        gradient.bias += dz_dc;
        for (i, &xi) in x.iter().enumerate() {
            gradient.weights.row_mut(i).scaled_add(xi, dz_dc);
        }

        da_dc
    }

    fn apply_gradient(
        &mut self,
        optimizer: Optimizer,
        adjusted_learning_rate: f64,
        momentum: f64,
        beta: f64,
        epsilon: f64,
    ) {
        let gradient = self.gradient.get_mut().expect("poisoned gradient lock");
        optimizer.apply_update(
            &mut self.weights,
            &gradient.weights,
            self.weights_velocity.as_mut(),
            self.weights_velocity_squared.as_mut(),
            self.t,
            adjusted_learning_rate,
            momentum,
            beta,
            epsilon,
        );
        optimizer.apply_update(
            &mut self.bias,
            &gradient.bias,
            self.bias_velocity.as_mut(),
            self.bias_velocity_squared.as_mut(),
            self.t,
            adjusted_learning_rate,
            momentum,
            beta,
            epsilon,
        );
        self.t += 1;
    }

    fn clear_gradient(&self) {
        let mut gradient = self.gradient.lock().expect("poisoned gradient lock");
        gradient.weights.fill(0.0);
        gradient.bias.fill(0.0);
    }

    fn initialize(&mut self, initializer: &mut dyn FnMut() -> f64, optimizer: Optimizer) {
        if optimizer.uses_velocity() {
            self.weights_velocity = Some(Array2::zeros(self.weights.raw_dim()));
            self.bias_velocity = Some(Array1::zeros(self.bias.raw_dim()));
        }
        if optimizer.uses_velocity_squared() {
            self.weights_velocity_squared = Some(Array2::zeros(self.weights.raw_dim()));
            self.bias_velocity_squared = Some(Array1::zeros(self.bias.raw_dim()));
        }
        self.weights.mapv_inplace(|_| initializer());
        self.bias.mapv_inplace(|_| initializer());
    }

    fn input_size(&self) -> usize {
        self.weights.nrows()
    }

    fn node_count(&self) -> usize {
        self.bias.len()
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    fn parameters(&self) -> Vec<f64> {
        self.weights.iter().chain(self.bias.iter()).copied().collect()
    }

    fn clone_layer(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}

impl Clone for Dense {
    fn clone(&self) -> Self {
        Self {
            weights: self.weights.clone(),
            bias: self.bias.clone(),
            gradient: Mutex::new(self.gradient.lock().expect("poisoned gradient lock").clone()),
            weights_velocity: self.weights_velocity.clone(),
            weights_velocity_squared: self.weights_velocity_squared.clone(),
            bias_velocity: self.bias_velocity.clone(),
            bias_velocity_squared: self.bias_velocity_squared.clone(),
            t: self.t,
        }
    }
}

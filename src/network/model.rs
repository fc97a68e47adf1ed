use super::layer::{Convolutional, ConvolutionalSpec, Dense, Layer, Lstm, StepMemory};
use super::{Activation, Cost, Optimizer, Vector, assert_all_finite};
use crate::error::NetworkError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use std::fmt;

/// A feedforward neural network: an ordered stack of layers sharing one
/// hidden activation, one output activation, one cost function and one
/// optimizer.
///
/// Construct networks through [`NetworkBuilder`]. Training entry points take
/// `&mut self`, so two batches can never interleave on the same network;
/// within a batch the samples run concurrently against the shared layers.
#[derive(Clone)]
pub struct Network {
    input_num: usize,
    output_num: usize,
    layers: Vec<Box<dyn Layer>>,
    hidden_activation: Activation,
    output_activation: Activation,
    cost: Cost,
    optimizer: Optimizer,
    /// Softmax exploration temperature. Divides the final layer's raw output
    /// before the softmax; has no effect under other output activations.
    temperature: f64,
}

impl Network {
    /// Runs a forward pass and returns the network's prediction.
    ///
    /// # Parameters
    ///
    /// * `input` - Input vector of width `input_num`
    ///
    /// # Returns
    ///
    /// - `Ok(Vector)` - The prediction, of width `output_num`
    /// - `Err(NetworkError::InputValidationError)` - If the input width is wrong
    ///
    /// # Panics
    ///
    /// When the input contains non-finite values.
    pub fn calculate_output(&self, input: &Vector) -> Result<Vector, NetworkError> {
        if input.len() != self.input_num {
            return Err(NetworkError::InputValidationError(format!(
                "expected input of width {}, got {}",
                self.input_num,
                input.len()
            )));
        }
        assert_all_finite("network input", input);

        let mut activated = input.clone();
        let last = self.layers.len() - 1;
        for layer in &self.layers[..last] {
            let z = layer.forward(&activated);
            activated = self.hidden_activation.calculate(&z);
        }

        let mut z = self.layers[last].forward(&activated);
        if self.output_activation == Activation::Softmax {
            z.mapv_inplace(|v| v / self.temperature);
        }
        Ok(self.output_activation.calculate(&z))
    }

    /// Returns the scalar loss of the network's prediction against the
    /// expected output, summed across output dimensions.
    pub fn calculate_cost(&self, input: &Vector, expected: &Vector) -> Result<f64, NetworkError> {
        if expected.len() != self.output_num {
            return Err(NetworkError::InputValidationError(format!(
                "expected target of width {}, got {}",
                self.output_num,
                expected.len()
            )));
        }
        let output = self.calculate_output(input)?;
        Ok(self.cost.calculate(&output, expected).sum())
    }

    /// Accumulates the gradients of one sample into every layer.
    ///
    /// Performs a forward sweep caching each layer's raw output `z` and
    /// activated input `x`, then walks the layers in reverse, converting the
    /// cost gradient through the activation derivative at each step and
    /// handing `dz/dC` to the layer's gradient accumulator.
    ///
    /// Callable concurrently; accumulation into each layer is serialized by
    /// that layer's own lock. Parameters are not modified.
    pub fn back_propagate(&self, input: &Vector, expected: &Vector) -> Result<(), NetworkError> {
        if input.len() != self.input_num {
            return Err(NetworkError::InputValidationError(format!(
                "expected input of width {}, got {}",
                self.input_num,
                input.len()
            )));
        }
        if expected.len() != self.output_num {
            return Err(NetworkError::InputValidationError(format!(
                "expected target of width {}, got {}",
                self.output_num,
                expected.len()
            )));
        }

        let count = self.layers.len();
        let mut zs: Vec<Vector> = Vec::with_capacity(count);
        let mut xs: Vec<Vector> = Vec::with_capacity(count);
        let mut memories: Vec<StepMemory> = Vec::with_capacity(count);
        xs.push(input.clone());
        for i in 0..count - 1 {
            let (z, memory) = self.layers[i].forward_train(&xs[i]);
            xs.push(self.hidden_activation.calculate(&z));
            zs.push(z);
            memories.push(memory);
        }

        let (mut z, memory) = self.layers[count - 1].forward_train(&xs[count - 1]);
        memories.push(memory);
        if self.output_activation == Activation::Softmax {
            z.mapv_inplace(|v| v / self.temperature);
        }
        let output = self.output_activation.calculate(&z);
        zs.push(z);

        let mut da_dc = self.cost.derivative(&output, expected);
        for i in (0..count).rev() {
            let activation = if i == count - 1 {
                self.output_activation
            } else {
                self.hidden_activation
            };
            let mut dz_dc = activation.derivative(&zs[i], &da_dc);
            if i == count - 1 && self.output_activation == Activation::Softmax {
                // The logits were divided by the temperature before the
                // softmax, so the chain rule carries a 1/T factor back onto
                // the raw layer output.
                dz_dc.mapv_inplace(|v| v / self.temperature);
            }
            da_dc = self.layers[i].update_gradient(&dz_dc, &xs[i], &memories[i]);
        }

        Ok(())
    }

    /// Trains the network on one mini-batch.
    ///
    /// Clears every gradient accumulator, backpropagates all samples
    /// concurrently (one rayon task per sample), then applies the optimizer
    /// exactly once with the learning rate scaled by `1 / batch_size`.
    ///
    /// Depending on the optimizer, different hyperparameters are consulted:
    ///
    /// - [`Optimizer::Sgd`]: learning rate
    /// - [`Optimizer::SgdMomentum`]: learning rate, momentum
    /// - [`Optimizer::RmsProp`]: learning rate, beta, epsilon
    /// - [`Optimizer::Adam`]: learning rate, momentum, beta, epsilon
    ///
    /// # Parameters
    ///
    /// - `learning_rate` - Step size of the parameter update
    /// - `momentum` - Decay rate of the first-moment average, in `[0, 1]`
    /// - `beta` - Decay rate of the second-moment average, in `[0, 1]`
    /// - `epsilon` - Small constant avoiding division by zero
    /// - `inputs` - Batch of input vectors
    /// - `expected` - Batch of target vectors, parallel to `inputs`
    pub fn learn(
        &mut self,
        learning_rate: f64,
        momentum: f64,
        beta: f64,
        epsilon: f64,
        inputs: &[Vector],
        expected: &[Vector],
    ) -> Result<(), NetworkError> {
        if inputs.is_empty() {
            return Err(NetworkError::InputValidationError(
                "training batch is empty".to_string(),
            ));
        }
        if inputs.len() != expected.len() {
            return Err(NetworkError::InputValidationError(format!(
                "batch has {} inputs but {} targets",
                inputs.len(),
                expected.len()
            )));
        }
        if !learning_rate.is_finite() {
            return Err(NetworkError::InputValidationError(format!(
                "learning rate must be finite, got {}",
                learning_rate
            )));
        }

        self.clear_gradient();
        inputs
            .par_iter()
            .zip(expected.par_iter())
            .try_for_each(|(input, target)| self.back_propagate(input, target))?;
        self.apply_gradient(
            learning_rate / inputs.len() as f64,
            momentum,
            beta,
            epsilon,
        );
        Ok(())
    }

    /// Trains a single output coordinate toward an expected value.
    ///
    /// The remaining coordinates are set to the network's own current
    /// prediction, so only the chosen coordinate produces a gradient. The
    /// learning rate is applied unscaled (batch of one). Useful for
    /// reinforcement-learning style updates where only one action's value is
    /// known.
    pub fn learn_single_output(
        &mut self,
        learning_rate: f64,
        momentum: f64,
        beta: f64,
        epsilon: f64,
        input: &Vector,
        output_index: usize,
        expected_value: f64,
    ) -> Result<(), NetworkError> {
        if output_index >= self.output_num {
            return Err(NetworkError::InputValidationError(format!(
                "output index {} out of range for {} outputs",
                output_index, self.output_num
            )));
        }

        let mut target = self.calculate_output(input)?;
        target[output_index] = expected_value;

        self.clear_gradient();
        self.back_propagate(input, &target)?;
        self.apply_gradient(learning_rate, momentum, beta, epsilon);
        Ok(())
    }

    /// Zeroes every layer's gradient accumulators.
    pub(crate) fn clear_gradient(&self) {
        for layer in &self.layers {
            layer.clear_gradient();
        }
    }

    /// Applies the accumulated gradients to every layer with the network's
    /// optimizer. The learning rate must already be scaled by the batch size.
    pub(crate) fn apply_gradient(
        &mut self,
        adjusted_learning_rate: f64,
        momentum: f64,
        beta: f64,
        epsilon: f64,
    ) {
        let optimizer = self.optimizer;
        for layer in &mut self.layers {
            layer.apply_gradient(optimizer, adjusted_learning_rate, momentum, beta, epsilon);
        }
    }

    /// Resets the recurrent memory of every layer that carries one; layers
    /// without memory are skipped.
    pub fn reset_memory(&self) {
        for layer in &self.layers {
            // layers without memory report NotSupported
            let _ = layer.reset_memory();
        }
    }

    /// Overwrites the softmax exploration temperature.
    ///
    /// # Returns
    ///
    /// - `Ok(())` - If the temperature is finite and strictly positive
    /// - `Err(NetworkError::InputValidationError)` - Otherwise
    pub fn set_temperature(&mut self, temperature: f64) -> Result<(), NetworkError> {
        if !(temperature.is_finite() && temperature > 0.0) {
            return Err(NetworkError::InputValidationError(format!(
                "temperature must be positive and finite, got {}",
                temperature
            )));
        }
        self.temperature = temperature;
        Ok(())
    }

    /// The input width this network accepts.
    pub fn input_num(&self) -> usize {
        self.input_num
    }

    /// The output width this network produces.
    pub fn output_num(&self) -> usize {
        self.output_num
    }

    /// Total learnable parameter count across all layers.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.parameter_count()).sum()
    }

    /// A flattened deep copy of every learnable parameter, layer by layer.
    pub fn parameters(&self) -> Vec<f64> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    #[cfg(test)]
    pub(crate) fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Network with {} parameters ({} -> {}, {:?} optimizer, {:?} cost)",
            self.parameter_count(),
            self.input_num,
            self.output_num,
            self.optimizer,
            self.cost
        )?;
        for (i, layer) in self.layers.iter().enumerate() {
            writeln!(
                f,
                "Layer {}: {} -> {} ({} parameters)",
                i,
                layer.input_size(),
                layer.node_count(),
                layer.parameter_count()
            )?;
        }
        Ok(())
    }
}

/// Step-by-step constructor for [`Network`].
///
/// The input width must be declared before the first layer so each layer can
/// be wired to the width of its predecessor; layer-adding methods are
/// fallible and reject widths that do not line up. `build` verifies every
/// mandatory option was provided, then draws all initial parameters from one
/// normal distribution whose standard deviation follows the hidden
/// activation (He scaling for the ReLU family, Xavier otherwise).
pub struct NetworkBuilder {
    input_num: Option<usize>,
    hidden_activation: Option<Activation>,
    output_activation: Option<Activation>,
    cost: Option<Cost>,
    optimizer: Optimizer,
    temperature: f64,
    seed: Option<u64>,
    layers: Vec<Box<dyn Layer>>,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self {
            input_num: None,
            hidden_activation: None,
            output_activation: None,
            cost: None,
            optimizer: Optimizer::Adam,
            temperature: 1.0,
            seed: None,
            layers: Vec::new(),
        }
    }

    /// Declares the network's input width. Must precede any layer.
    pub fn input_num(mut self, input_num: usize) -> Result<Self, NetworkError> {
        if !self.layers.is_empty() {
            return Err(NetworkError::ConfigurationError(
                "input width must be declared before any layer is added".to_string(),
            ));
        }
        if input_num == 0 {
            return Err(NetworkError::ConfigurationError(
                "input width must be at least 1".to_string(),
            ));
        }
        self.input_num = Some(input_num);
        Ok(self)
    }

    /// Width of the vector the next layer will receive.
    fn incoming_width(&self) -> Result<usize, NetworkError> {
        match self.layers.last() {
            Some(layer) => Ok(layer.node_count()),
            None => self.input_num.ok_or_else(|| {
                NetworkError::ConfigurationError(
                    "input width must be declared before any layer is added".to_string(),
                )
            }),
        }
    }

    /// Appends a fully connected layer with the given node count.
    pub fn add_dense_layer(mut self, nodes: usize) -> Result<Self, NetworkError> {
        if nodes == 0 {
            return Err(NetworkError::ConfigurationError(
                "a dense layer needs at least 1 node".to_string(),
            ));
        }
        let input_size = self.incoming_width()?;
        self.layers.push(Box::new(Dense::new(input_size, nodes)));
        Ok(self)
    }

    /// Appends a convolutional layer.
    ///
    /// The spec's input volume (`width × height × depth`) must equal the
    /// width of the preceding layer's output.
    pub fn add_convolutional_layer(
        mut self,
        spec: ConvolutionalSpec,
    ) -> Result<Self, NetworkError> {
        let incoming = self.incoming_width()?;
        let volume = spec.input_width * spec.input_height * spec.input_depth;
        if volume != incoming {
            return Err(NetworkError::ConfigurationError(format!(
                "convolutional input volume {} does not match the preceding width {}",
                volume, incoming
            )));
        }
        self.layers.push(Box::new(Convolutional::new(spec)?));
        Ok(self)
    }

    /// Appends an LSTM layer with the given number of memory cells.
    pub fn add_lstm_layer(mut self, nodes: usize) -> Result<Self, NetworkError> {
        if nodes == 0 {
            return Err(NetworkError::ConfigurationError(
                "an LSTM layer needs at least 1 memory cell".to_string(),
            ));
        }
        let input_size = self.incoming_width()?;
        self.layers.push(Box::new(Lstm::new(input_size, nodes)));
        Ok(self)
    }

    pub fn hidden_activation(mut self, activation: Activation) -> Self {
        self.hidden_activation = Some(activation);
        self
    }

    pub fn output_activation(mut self, activation: Activation) -> Self {
        self.output_activation = Some(activation);
        self
    }

    pub fn cost_function(mut self, cost: Cost) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Softmax exploration temperature, validated at `build`. Defaults to 1.
    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Fixes the parameter initialization RNG for reproducible networks.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Finalizes the network: validates the configuration, draws every
    /// initial parameter and allocates optimizer state.
    ///
    /// # Returns
    ///
    /// - `Ok(Network)` - The ready-to-train network
    /// - `Err(NetworkError::ConfigurationError)` - If a mandatory option is
    ///   missing, no layer was added, or the temperature is invalid
    pub fn build(mut self) -> Result<Network, NetworkError> {
        let input_num = self.input_num.ok_or_else(|| {
            NetworkError::ConfigurationError("input width was never declared".to_string())
        })?;
        let hidden_activation = self.hidden_activation.ok_or_else(|| {
            NetworkError::ConfigurationError("hidden activation was never chosen".to_string())
        })?;
        let output_activation = self.output_activation.ok_or_else(|| {
            NetworkError::ConfigurationError("output activation was never chosen".to_string())
        })?;
        let cost = self.cost.ok_or_else(|| {
            NetworkError::ConfigurationError("cost function was never chosen".to_string())
        })?;
        let output_num = match self.layers.last() {
            Some(layer) => layer.node_count(),
            None => {
                return Err(NetworkError::ConfigurationError(
                    "network has no layers".to_string(),
                ));
            }
        };
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(NetworkError::ConfigurationError(format!(
                "temperature must be positive and finite, got {}",
                self.temperature
            )));
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let std = hidden_activation.initializer_std(input_num, output_num);
        let normal = Normal::new(0.0, std).map_err(|e| {
            NetworkError::ConfigurationError(format!("parameter initializer: {}", e))
        })?;
        let mut initializer = || normal.sample(&mut rng);
        for layer in &mut self.layers {
            layer.initialize(&mut initializer, self.optimizer);
            layer.clear_gradient();
        }

        Ok(Network {
            input_num,
            output_num,
            layers: self.layers,
            hidden_activation,
            output_activation,
            cost,
            optimizer: self.optimizer,
            temperature: self.temperature,
        })
    }
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

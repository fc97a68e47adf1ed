use super::{Dense, Layer, StepMemory};
use crate::error::NetworkError;
use crate::network::{Activation, Optimizer, Vector};
use ndarray::Array1;
use std::sync::Mutex;

/// Recurrent memory of an LSTM layer, carried across forward calls.
#[derive(Debug, Clone)]
struct LstmState {
    hidden: Array1<f64>,
    cell: Array1<f64>,
}

/// A long short-term memory layer.
///
/// Each of the four gates (forget, candidate weight, candidate content,
/// output) is a pair of [`Dense`] sub-layers, one fed by the recurrent hidden
/// state and one by the layer input. The gate pre-activation is the sum of
/// the two affine outputs. Gradients flow into the sub-layers' own
/// accumulators; the LSTM itself holds no parameters beyond theirs.
///
/// The layer's raw output is the new hidden state; the network applies its
/// hidden activation on top like any other layer.
pub struct Lstm {
    pub(crate) forget_h: Dense,
    pub(crate) forget_x: Dense,
    pub(crate) candidate_weight_h: Dense,
    pub(crate) candidate_weight_x: Dense,
    pub(crate) candidate_content_h: Dense,
    pub(crate) candidate_content_x: Dense,
    pub(crate) output_h: Dense,
    pub(crate) output_x: Dense,
    state: Mutex<LstmState>,
}

impl Lstm {
    /// Creates an LSTM layer with zeroed parameters and zeroed memory.
    ///
    /// # Parameters
    ///
    /// - `input_size` - Number of nodes in the preceding layer
    /// - `nodes` - Number of memory cells (also the output width)
    pub fn new(input_size: usize, nodes: usize) -> Self {
        Self {
            forget_h: Dense::new(nodes, nodes),
            forget_x: Dense::new(input_size, nodes),
            candidate_weight_h: Dense::new(nodes, nodes),
            candidate_weight_x: Dense::new(input_size, nodes),
            candidate_content_h: Dense::new(nodes, nodes),
            candidate_content_x: Dense::new(input_size, nodes),
            output_h: Dense::new(nodes, nodes),
            output_x: Dense::new(input_size, nodes),
            state: Mutex::new(LstmState {
                hidden: Array1::zeros(nodes),
                cell: Array1::zeros(nodes),
            }),
        }
    }

    /// Clones of the current hidden and cell state, in that order.
    pub fn memories(&self) -> (Array1<f64>, Array1<f64>) {
        let state = self.state.lock().expect("poisoned LSTM state lock");
        (state.hidden.clone(), state.cell.clone())
    }

    /// Overwrites the hidden and cell state the next forward pass will consume.
    #[cfg(test)]
    pub(crate) fn set_memory(&self, hidden: Array1<f64>, cell: Array1<f64>) {
        let mut state = self.state.lock().expect("poisoned LSTM state lock");
        state.hidden = hidden;
        state.cell = cell;
    }

    /// Pre-activations of the four gates for the given hidden state and input.
    fn gate_sums(&self, hidden: &Vector, input: &Vector) -> (Vector, Vector, Vector, Vector) {
        let forget = self.forget_h.forward(hidden) + self.forget_x.forward(input);
        let weight = self.candidate_weight_h.forward(hidden) + self.candidate_weight_x.forward(input);
        let content =
            self.candidate_content_h.forward(hidden) + self.candidate_content_x.forward(input);
        let output = self.output_h.forward(hidden) + self.output_x.forward(input);
        (forget, weight, content, output)
    }

    /// Advances the recurrence by one step and returns the new hidden state
    /// together with the (hidden, cell) pair the step consumed. The state is
    /// read and replaced under a single lock acquisition.
    fn step(&self, input: &Vector) -> (Vector, Array1<f64>, Array1<f64>) {
        let mut state = self.state.lock().expect("poisoned LSTM state lock");
        let previous_hidden = state.hidden.clone();
        let previous_cell = state.cell.clone();

        let (forget_sum, weight_sum, content_sum, output_sum) =
            self.gate_sums(&previous_hidden, input);
        let forget = Activation::Sigmoid.calculate(&forget_sum);
        let weight = Activation::Sigmoid.calculate(&weight_sum);
        let content = Activation::Tanh.calculate(&content_sum);
        let output = Activation::Sigmoid.calculate(&output_sum);

        let cell = forget * &previous_cell + weight * content;
        let hidden = output * cell.mapv(f64::tanh);

        state.cell = cell;
        state.hidden = hidden.clone();
        (hidden, previous_hidden, previous_cell)
    }
}

impl Layer for Lstm {
    /// Runs one step of the recurrence and returns the new hidden state.
    ///
    /// `cell = forget ⊙ cell + weight ⊙ content` and
    /// `hidden = output ⊙ tanh(cell)`, with sigmoid gates on forget, weight
    /// and output and tanh on content.
    fn forward(&self, input: &Vector) -> Vector {
        self.step(input).0
    }

    /// Runs one recurrence step and returns the (hidden, cell) pair it
    /// consumed. Concurrent batch workers interleave their forward passes on
    /// the shared layer, so the snapshot travels with the sample's cache
    /// rather than living in the shared state.
    fn forward_train(&self, input: &Vector) -> (Vector, StepMemory) {
        let (hidden, previous_hidden, previous_cell) = self.step(input);
        (
            hidden,
            StepMemory::Recurrent {
                hidden: previous_hidden,
                cell: previous_cell,
            },
        )
    }

    /// Backpropagates one recurrence step.
    ///
    /// Rebuilds the gate values from the snapshot taken by the matching
    /// forward pass, splits the incoming hidden-state gradient across the
    /// output gate and the cell, and pushes each gate's pre-activation
    /// gradient into both of its dense sub-layers. The returned input
    /// gradient is the sum over the four input-side sub-layers; gradients
    /// through the recurrent hidden state are not chained into earlier steps.
    fn update_gradient(&self, dz_dc: &Vector, x: &Vector, memory: &StepMemory) -> Vector {
        let StepMemory::Recurrent {
            hidden: previous_hidden,
            cell: previous_cell,
        } = memory
        else {
            panic!("LSTM backward pass called without the forward pass snapshot");
        };

        let (forget_sum, weight_sum, content_sum, output_sum) =
            self.gate_sums(previous_hidden, x);
        let forget = Activation::Sigmoid.calculate(&forget_sum);
        let weight = Activation::Sigmoid.calculate(&weight_sum);
        let content = Activation::Tanh.calculate(&content_sum);
        let output = Activation::Sigmoid.calculate(&output_sum);
        let cell = forget * previous_cell + weight.clone() * &content;

        // hidden = output ⊙ tanh(cell)
        let d_output_sum = Activation::Sigmoid.derivative(&output_sum, &(dz_dc * cell.mapv(f64::tanh)));
        let d_cell = Activation::Tanh.derivative(&cell, &(dz_dc * output));

        // cell = forget ⊙ previous_cell + weight ⊙ content
        let d_forget_sum = Activation::Sigmoid.derivative(&forget_sum, &(&d_cell * previous_cell));
        let d_weight_sum = Activation::Sigmoid.derivative(&weight_sum, &(&d_cell * &content));
        let d_content_sum = Activation::Tanh.derivative(&content_sum, &(d_cell * weight));

        self.forget_h
            .update_gradient(&d_forget_sum, previous_hidden, &StepMemory::None);
        self.candidate_weight_h
            .update_gradient(&d_weight_sum, previous_hidden, &StepMemory::None);
        self.candidate_content_h
            .update_gradient(&d_content_sum, previous_hidden, &StepMemory::None);
        self.output_h
            .update_gradient(&d_output_sum, previous_hidden, &StepMemory::None);

        self.forget_x.update_gradient(&d_forget_sum, x, &StepMemory::None)
            + self
                .candidate_weight_x
                .update_gradient(&d_weight_sum, x, &StepMemory::None)
            + self
                .candidate_content_x
                .update_gradient(&d_content_sum, x, &StepMemory::None)
            + self.output_x.update_gradient(&d_output_sum, x, &StepMemory::None)
    }

    fn apply_gradient(
        &mut self,
        optimizer: Optimizer,
        adjusted_learning_rate: f64,
        momentum: f64,
        beta: f64,
        epsilon: f64,
    ) {
        for sub_layer in [
            &mut self.forget_h,
            &mut self.forget_x,
            &mut self.candidate_weight_h,
            &mut self.candidate_weight_x,
            &mut self.candidate_content_h,
            &mut self.candidate_content_x,
            &mut self.output_h,
            &mut self.output_x,
        ] {
            sub_layer.apply_gradient(optimizer, adjusted_learning_rate, momentum, beta, epsilon);
        }
    }

    fn clear_gradient(&self) {
        for sub_layer in [
            &self.forget_h,
            &self.forget_x,
            &self.candidate_weight_h,
            &self.candidate_weight_x,
            &self.candidate_content_h,
            &self.candidate_content_x,
            &self.output_h,
            &self.output_x,
        ] {
            sub_layer.clear_gradient();
        }
    }

    fn initialize(&mut self, initializer: &mut dyn FnMut() -> f64, optimizer: Optimizer) {
        for sub_layer in [
            &mut self.forget_h,
            &mut self.forget_x,
            &mut self.candidate_weight_h,
            &mut self.candidate_weight_x,
            &mut self.candidate_content_h,
            &mut self.candidate_content_x,
            &mut self.output_h,
            &mut self.output_x,
        ] {
            sub_layer.initialize(initializer, optimizer);
        }
    }

    fn input_size(&self) -> usize {
        self.forget_x.input_size()
    }

    fn node_count(&self) -> usize {
        self.forget_h.node_count()
    }

    fn parameter_count(&self) -> usize {
        self.sub_layers().iter().map(|l| l.parameter_count()).sum()
    }

    fn parameters(&self) -> Vec<f64> {
        self.sub_layers()
            .iter()
            .flat_map(|l| l.parameters())
            .collect()
    }

    fn reset_memory(&self) -> Result<(), NetworkError> {
        let mut state = self.state.lock().expect("poisoned LSTM state lock");
        state.hidden.fill(0.0);
        state.cell.fill(0.0);
        Ok(())
    }

    fn clone_layer(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}

impl Lstm {
    fn sub_layers(&self) -> [&Dense; 8] {
        [
            &self.forget_h,
            &self.forget_x,
            &self.candidate_weight_h,
            &self.candidate_weight_x,
            &self.candidate_content_h,
            &self.candidate_content_x,
            &self.output_h,
            &self.output_x,
        ]
    }
}

impl Clone for Lstm {
    fn clone(&self) -> Self {
        Self {
            forget_h: self.forget_h.clone(),
            forget_x: self.forget_x.clone(),
            candidate_weight_h: self.candidate_weight_h.clone(),
            candidate_weight_x: self.candidate_weight_x.clone(),
            candidate_content_h: self.candidate_content_h.clone(),
            candidate_content_x: self.candidate_content_x.clone(),
            output_h: self.output_h.clone(),
            output_x: self.output_x.clone(),
            state: Mutex::new(self.state.lock().expect("poisoned LSTM state lock").clone()),
        }
    }
}

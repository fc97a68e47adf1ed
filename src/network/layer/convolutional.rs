use super::{Layer, StepMemory};
use crate::error::NetworkError;
use crate::network::{Optimizer, Vector};
use ndarray::{Array1, Array3};
use rayon::prelude::*;
use std::sync::Mutex;

/// Geometry of a convolutional layer.
///
/// The layer consumes a flattened `input_width × input_height × input_depth`
/// volume and scans it with `kernel_count` 2-D kernels. With `padding`
/// disabled the output shrinks to `ceil((input − kernel + 1) / stride)` per
/// axis; with `padding` enabled the spatial dimensions are preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvolutionalSpec {
    pub input_width: usize,
    pub input_height: usize,
    pub input_depth: usize,
    pub kernel_width: usize,
    pub kernel_height: usize,
    pub kernel_count: usize,
    pub stride_width: usize,
    pub stride_height: usize,
    pub padding: bool,
}

/// Gradient accumulators for a convolutional layer.
#[derive(Debug, Clone)]
pub(crate) struct ConvolutionalGradient {
    pub(crate) kernels: Array3<f64>,
    pub(crate) bias: Array1<f64>,
}

/// A convolutional layer over a flattened 3-D input volume.
///
/// An index table built once at construction maps every padded `(x, y, depth)`
/// coordinate to a flat offset into the input vector, using reflect padding
/// (edge values are mirrored, never zeroed). The forward pass evaluates depth
/// planes in parallel; there is no cross-plane dependency.
pub struct Convolutional {
    spec: ConvolutionalSpec,
    output_width: usize,
    output_height: usize,
    padded_width: usize,
    padded_height: usize,
    /// Flat `(depth, padded_y, padded_x)` table of input-vector offsets,
    /// built once and reused on every call.
    index_map: Vec<usize>,
    pub(crate) kernels: Array3<f64>,
    pub(crate) bias: Array1<f64>,
    pub(crate) gradient: Mutex<ConvolutionalGradient>,
    kernels_velocity: Option<Array3<f64>>,
    kernels_velocity_squared: Option<Array3<f64>>,
    bias_velocity: Option<Array1<f64>>,
    bias_velocity_squared: Option<Array1<f64>>,
    t: u64,
}

/// Mirrors an out-of-range coordinate back into `0..size`.
fn reflect(v: isize, size: usize) -> Result<usize, NetworkError> {
    let size = size as isize;
    let r = if v < 0 {
        -v
    } else if v >= size {
        2 * size - 2 - v
    } else {
        v
    };
    if (0..size).contains(&r) {
        Ok(r as usize)
    } else {
        Err(NetworkError::InputValidationError(format!(
            "padding requires reflecting coordinate {} beyond the input extent {}",
            v, size
        )))
    }
}

impl Convolutional {
    /// Creates a convolutional layer and precomputes its padded index table.
    ///
    /// # Parameters
    ///
    /// * `spec` - The layer geometry
    ///
    /// # Returns
    ///
    /// - `Ok(Convolutional)` - The layer, parameters still zeroed until
    ///   [`initialize`](Layer::initialize)
    /// - `Err(NetworkError::InputValidationError)` - If the geometry is
    ///   degenerate (zero extents, kernel larger than input, zero stride, or
    ///   padding that would reflect past the opposite edge)
    pub fn new(spec: ConvolutionalSpec) -> Result<Self, NetworkError> {
        if spec.input_width == 0
            || spec.input_height == 0
            || spec.input_depth == 0
            || spec.kernel_width == 0
            || spec.kernel_height == 0
            || spec.kernel_count == 0
        {
            return Err(NetworkError::InputValidationError(
                "convolutional geometry must have non-zero extents".to_string(),
            ));
        }
        if spec.stride_width == 0 || spec.stride_height == 0 {
            return Err(NetworkError::InputValidationError(
                "convolutional strides must be at least 1".to_string(),
            ));
        }
        if spec.kernel_width > spec.input_width || spec.kernel_height > spec.input_height {
            return Err(NetworkError::InputValidationError(format!(
                "kernel {}x{} does not fit input {}x{}",
                spec.kernel_width, spec.kernel_height, spec.input_width, spec.input_height
            )));
        }

        let (output_width, padding_width) = axis_geometry(
            spec.input_width,
            spec.kernel_width,
            spec.stride_width,
            spec.padding,
        );
        let (output_height, padding_height) = axis_geometry(
            spec.input_height,
            spec.kernel_height,
            spec.stride_height,
            spec.padding,
        );

        // Preserving the input size spreads the padding across both edges;
        // stride-overshoot padding goes entirely to the leading edge.
        let (padding_left, padding_top) = if spec.padding {
            (padding_width.div_ceil(2), padding_height.div_ceil(2))
        } else {
            (padding_width, padding_height)
        };

        let padded_width = spec.input_width + padding_width;
        let padded_height = spec.input_height + padding_height;

        let mut index_map = Vec::with_capacity(padded_width * padded_height * spec.input_depth);
        for d in 0..spec.input_depth {
            for y in 0..padded_height {
                let j = reflect(y as isize - padding_top as isize, spec.input_height)?;
                for x in 0..padded_width {
                    let i = reflect(x as isize - padding_left as isize, spec.input_width)?;
                    index_map
                        .push(d * spec.input_width * spec.input_height + j * spec.input_width + i);
                }
            }
        }

        let nodes = output_width * output_height * spec.input_depth;
        let kernel_dim = (spec.kernel_width, spec.kernel_height, spec.kernel_count);
        Ok(Self {
            spec,
            output_width,
            output_height,
            padded_width,
            padded_height,
            index_map,
            kernels: Array3::zeros(kernel_dim),
            bias: Array1::zeros(nodes),
            gradient: Mutex::new(ConvolutionalGradient {
                kernels: Array3::zeros(kernel_dim),
                bias: Array1::zeros(nodes),
            }),
            kernels_velocity: None,
            kernels_velocity_squared: None,
            bias_velocity: None,
            bias_velocity_squared: None,
            t: 1,
        })
    }

    /// Output spatial size as `(width, height)`.
    pub fn output_size(&self) -> (usize, usize) {
        (self.output_width, self.output_height)
    }

    /// The input-vector offset backing padded coordinate `(x, y, d)`.
    fn mapped(&self, x: usize, y: usize, d: usize) -> usize {
        self.index_map[(d * self.padded_height + y) * self.padded_width + x]
    }
}

/// Output size and total padding for one spatial axis.
fn axis_geometry(input: usize, kernel: usize, stride: usize, padding: bool) -> (usize, usize) {
    if padding {
        (input, (input - 1) * stride + kernel - input)
    } else {
        let output = (input - kernel + 1).div_ceil(stride);
        let needed = (output - 1) * stride + kernel;
        (output, needed.saturating_sub(input))
    }
}

impl Layer for Convolutional {
    fn forward(&self, input: &Vector) -> Vector {
        assert_eq!(
            input.len(),
            self.input_size(),
            "convolutional layer fed a vector of mismatched length"
        );

        let ow = self.output_width;
        let oh = self.output_height;
        let plane = ow * oh;
        let spec = &self.spec;

        let planes: Vec<Vec<f64>> = (0..spec.input_depth)
            .into_par_iter()
            .map(|d| {
                let mut out = vec![0.0; plane];
                for y in 0..oh {
                    for x in 0..ow {
                        let mut weighted_sum = 0.0;
                        for ky in 0..spec.kernel_height {
                            for kx in 0..spec.kernel_width {
                                let value = input
                                    [self.mapped(x * spec.stride_width + kx, y * spec.stride_height + ky, d)];
                                for k in 0..spec.kernel_count {
                                    weighted_sum += self.kernels[[kx, ky, k]] * value;
                                }
                            }
                        }
                        let position = y * ow + x;
                        out[position] = weighted_sum + self.bias[d * plane + position];
                    }
                }
                out
            })
            .collect();

        Array1::from(planes.concat())
    }

    /// Accumulates `kernel_gradient[kx][ky][k] += dz[pos] * x[map]` for every
    /// output position and scatter-adds `da_dC[map] += dz[pos] * kernel`.
    ///
    /// Overlapping receptive fields mean several output positions contribute
    /// to the same input coordinate, so the scatter must always add. The
    /// per-sample gradients are built locally and merged into the shared
    /// accumulator under the lock in one step.
    fn update_gradient(&self, dz_dc: &Vector, x: &Vector, _memory: &StepMemory) -> Vector {
        let ow = self.output_width;
        let oh = self.output_height;
        let plane = ow * oh;
        let spec = &self.spec;

        let mut kernel_gradient = Array3::<f64>::zeros(self.kernels.raw_dim());
        let mut da_dc = Array1::<f64>::zeros(self.input_size());

        for d in 0..spec.input_depth {
            for y in 0..oh {
                for ox in 0..ow {
                    let g = dz_dc[d * plane + y * ow + ox];
                    assert!(g.is_finite(), "non-finite gradient entering convolution: {}", g);
                    for ky in 0..spec.kernel_height {
                        for kx in 0..spec.kernel_width {
                            let mapped = self.mapped(
                                ox * spec.stride_width + kx,
                                y * spec.stride_height + ky,
                                d,
                            );
                            let value = x[mapped];
                            for k in 0..spec.kernel_count {
                                kernel_gradient[[kx, ky, k]] += g * value;
                                da_dc[mapped] += g * self.kernels[[kx, ky, k]];
                            }
                        }
                    }
                }
            }
        }

        {
            let mut gradient = self.gradient.lock().expect("poisoned gradient lock");
            gradient.kernels += &kernel_gradient;
            gradient.bias += dz_dc;
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
            &mut self.kernels,
            &gradient.kernels,
            self.kernels_velocity.as_mut(),
            self.kernels_velocity_squared.as_mut(),
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
        gradient.kernels.fill(0.0);
        gradient.bias.fill(0.0);
    }

    fn initialize(&mut self, initializer: &mut dyn FnMut() -> f64, optimizer: Optimizer) {
        if optimizer.uses_velocity() {
            self.kernels_velocity = Some(Array3::zeros(self.kernels.raw_dim()));
            self.bias_velocity = Some(Array1::zeros(self.bias.raw_dim()));
        }
        if optimizer.uses_velocity_squared() {
            self.kernels_velocity_squared = Some(Array3::zeros(self.kernels.raw_dim()));
            self.bias_velocity_squared = Some(Array1::zeros(self.bias.raw_dim()));
        }
        self.kernels.mapv_inplace(|_| initializer());
        self.bias.mapv_inplace(|_| initializer());
    }

    fn input_size(&self) -> usize {
        self.spec.input_width * self.spec.input_height * self.spec.input_depth
    }

    fn node_count(&self) -> usize {
        self.bias.len()
    }

    fn parameter_count(&self) -> usize {
        self.kernels.len() + self.bias.len()
    }

    fn parameters(&self) -> Vec<f64> {
        self.kernels.iter().chain(self.bias.iter()).copied().collect()
    }

    fn clone_layer(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}

impl Clone for Convolutional {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec,
            output_width: self.output_width,
            output_height: self.output_height,
            padded_width: self.padded_width,
            padded_height: self.padded_height,
            index_map: self.index_map.clone(),
            kernels: self.kernels.clone(),
            bias: self.bias.clone(),
            gradient: Mutex::new(self.gradient.lock().expect("poisoned gradient lock").clone()),
            kernels_velocity: self.kernels_velocity.clone(),
            kernels_velocity_squared: self.kernels_velocity_squared.clone(),
            bias_velocity: self.bias_velocity.clone(),
            bias_velocity_squared: self.bias_velocity_squared.clone(),
            t: self.t,
        }
    }
}

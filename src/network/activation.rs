use super::{Vector, assert_all_finite};
use ndarray::Zip;

/// Activation function strategies and their derivatives.
///
/// Each variant provides the forward transform `calculate` and the
/// backward-pass Jacobian-vector product `derivative`. Softmax is the only
/// whole-vector transform; every other variant is elementwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Passthrough, f(x) = x
    Identity,
    /// Rectified linear unit, f(x) = max(0, x)
    ReLU,
    /// Leaky rectified linear unit, f(x) = x if x > 0 else 0.1x
    LeakyReLU,
    /// Logistic sigmoid, f(x) = 1 / (1 + e^-x)
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
    /// Softmax over the whole vector, numerically stabilized with the
    /// max-subtraction shift
    Softmax,
}

impl Activation {
    /// Applies the activation function to a pre-activation vector.
    ///
    /// # Parameters
    ///
    /// * `z` - Pre-activation values
    ///
    /// # Returns
    ///
    /// * `Vector` - Post-activation values, same length as `z`
    ///
    /// # Panics
    ///
    /// When `z` or the result contains non-finite values.
    pub fn calculate(&self, z: &Vector) -> Vector {
        assert_all_finite("activation input", z);

        let a = match self {
            Activation::Identity => z.clone(),
            Activation::ReLU => z.mapv(|v| if v > 0.0 { v } else { 0.0 }),
            Activation::LeakyReLU => z.mapv(|v| if v > 0.0 { v } else { 0.1 * v }),
            Activation::Sigmoid => z.mapv(sigmoid),
            Activation::Tanh => z.mapv(f64::tanh),
            Activation::Softmax => softmax(z),
        };

        assert_all_finite("activation output", &a);
        a
    }

    /// Computes the Jacobian-vector product of the activation at `z`.
    ///
    /// Used in backpropagation to convert the gradient of the cost with
    /// respect to the activated output (`da/dC`) into the gradient with
    /// respect to the pre-activation output (`dz/dC`).
    ///
    /// For softmax the vectorized form `a ⊙ (g − a·g)` is used instead of
    /// materializing the full Jacobian.
    ///
    /// # Parameters
    ///
    /// - `z` - Pre-activation values from the forward pass
    /// - `upstream` - Gradient of the cost with respect to the activation output
    ///
    /// # Returns
    ///
    /// * `Vector` - Gradient of the cost with respect to `z`
    ///
    /// # Panics
    ///
    /// When any input or the result contains non-finite values.
    pub fn derivative(&self, z: &Vector, upstream: &Vector) -> Vector {
        assert_all_finite("activation derivative upstream gradient", upstream);

        let gradient = match self {
            Activation::Identity => upstream.clone(),
            Activation::ReLU => Zip::from(z)
                .and(upstream)
                .map_collect(|&z, &g| if z > 0.0 { g } else { 0.0 }),
            Activation::LeakyReLU => Zip::from(z)
                .and(upstream)
                .map_collect(|&z, &g| if z > 0.0 { g } else { 0.1 * g }),
            Activation::Sigmoid => Zip::from(z).and(upstream).map_collect(|&z, &g| {
                let a = sigmoid(z);
                g * a * (1.0 - a)
            }),
            Activation::Tanh => Zip::from(z).and(upstream).map_collect(|&z, &g| {
                let t = z.tanh();
                g * (1.0 - t * t)
            }),
            Activation::Softmax => {
                let a = softmax(z);
                let dot = a.dot(upstream);
                Zip::from(&a).and(upstream).map_collect(|&a, &g| a * (g - dot))
            }
        };

        assert_all_finite("activation derivative output", &gradient);
        gradient
    }

    /// Returns the standard deviation for randomly initialized parameters
    /// feeding into layers that use this activation.
    ///
    /// He-style scaling for the ReLU family, Xavier-style otherwise.
    pub(crate) fn initializer_std(&self, input_num: usize, output_num: usize) -> f64 {
        let n = (input_num + output_num) as f64;
        match self {
            Activation::ReLU | Activation::LeakyReLU => (2.0 / n).sqrt(),
            _ => n.sqrt().recip().sqrt(),
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(z: &Vector) -> Vector {
    let max = z.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut out = z.mapv(|v| (v - max).exp());
    let sum = out.sum();
    out.mapv_inplace(|v| v / sum);
    out
}

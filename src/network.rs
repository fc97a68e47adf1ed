/// Module that contains activation function implementations
pub mod activation;
/// Module that contains cost (loss) function implementations
pub mod cost;
/// Module that contains the layer abstraction and its variants
pub mod layer;
/// Module that contains the network orchestrator and its builder
pub mod model;
/// Module that contains the optimizer update rules
pub mod optimizer;

pub use activation::*;
pub use cost::*;
pub use layer::*;
pub use model::*;
pub use optimizer::*;

use ndarray::Array1;

/// Type alias for the 1-D sample vectors flowing between layers
pub type Vector = Array1<f64>;

/// Fails fast when a numeric contract is violated.
///
/// Non-finite values entering or leaving an activation, cost or gradient
/// computation indicate a genuine bug (divergent training, exploding
/// gradients) and must never be swallowed or recovered from.
pub(crate) fn assert_all_finite(context: &str, values: &Vector) {
    assert!(
        values.iter().all(|v| v.is_finite()),
        "{} contains non-finite values: {}",
        context,
        values
    );
}

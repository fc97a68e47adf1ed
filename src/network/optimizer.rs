use ndarray::{Array, Dimension, Zip};

/// Optimizer update rules, selected once per network and applied uniformly
/// to every layer's every parameter tensor.
///
/// Depending on the variant, different hyperparameters of
/// [`learn`](super::Network::learn) are consulted:
///
/// - `Sgd`: learning rate
/// - `SgdMomentum`: learning rate, momentum
/// - `RmsProp`: learning rate, beta, epsilon
/// - `Adam`: learning rate, momentum, beta, epsilon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optimizer {
    /// `param -= lr * grad`
    Sgd,
    /// `v = v*momentum + (1-momentum)*grad; param -= lr*v`
    SgdMomentum,
    /// `v2 = v2*beta + (1-beta)*grad²; param -= lr*grad/sqrt(v2+eps)`
    RmsProp,
    /// Momentum and RMSProp combined, with `1 - rate^t` bias correction on
    /// both moving averages
    Adam,
}

impl Optimizer {
    /// Whether this update rule maintains a velocity (first moment) tensor.
    pub(crate) fn uses_velocity(&self) -> bool {
        matches!(self, Optimizer::SgdMomentum | Optimizer::Adam)
    }

    /// Whether this update rule maintains a squared-velocity (second moment) tensor.
    pub(crate) fn uses_velocity_squared(&self) -> bool {
        matches!(self, Optimizer::RmsProp | Optimizer::Adam)
    }

    /// Applies one optimizer step to a parameter tensor.
    ///
    /// Pure with respect to the batch: reads only the current parameters,
    /// the accumulated gradient and the prior optimizer state. Individual
    /// parameter updates within the tensor are independent and run in
    /// parallel.
    ///
    /// # Parameters
    ///
    /// - `params` - The parameter tensor to mutate
    /// - `gradient` - The gradient accumulated over the batch, same shape
    /// - `velocity` - First-moment state, required by `SgdMomentum` and `Adam`
    /// - `velocity_squared` - Second-moment state, required by `RmsProp` and `Adam`
    /// - `t` - The owning layer's update counter, used for Adam bias correction
    /// - `adjusted_learning_rate` - Learning rate already scaled by `1 / batch_size`
    /// - `momentum` - Decay rate of the first moment
    /// - `beta` - Decay rate of the second moment
    /// - `epsilon` - Small constant avoiding division by zero
    ///
    /// # Panics
    ///
    /// When the gradient contains non-finite values, or when a parameter
    /// becomes non-finite after the update.
    pub(crate) fn apply_update<D: Dimension>(
        &self,
        params: &mut Array<f64, D>,
        gradient: &Array<f64, D>,
        velocity: Option<&mut Array<f64, D>>,
        velocity_squared: Option<&mut Array<f64, D>>,
        t: u64,
        adjusted_learning_rate: f64,
        momentum: f64,
        beta: f64,
        epsilon: f64,
    ) {
        let lr = adjusted_learning_rate;
        match self {
            Optimizer::Sgd => {
                Zip::from(params).and(gradient).par_for_each(|p, &g| {
                    assert!(g.is_finite(), "non-finite gradient: {}", g);
                    *p -= lr * g;
                    assert!(p.is_finite(), "parameter diverged under SGD");
                });
            }
            Optimizer::SgdMomentum => {
                let velocity = velocity.expect("momentum state not allocated");
                Zip::from(params)
                    .and(velocity)
                    .and(gradient)
                    .par_for_each(|p, v, &g| {
                        assert!(g.is_finite(), "non-finite gradient: {}", g);
                        *v = *v * momentum + (1.0 - momentum) * g;
                        *p -= lr * *v;
                        assert!(p.is_finite(), "parameter diverged under SGD with momentum");
                    });
            }
            Optimizer::RmsProp => {
                let velocity_squared =
                    velocity_squared.expect("RMSProp state not allocated");
                Zip::from(params)
                    .and(velocity_squared)
                    .and(gradient)
                    .par_for_each(|p, v2, &g| {
                        assert!(g.is_finite(), "non-finite gradient: {}", g);
                        *v2 = *v2 * beta + (1.0 - beta) * g * g;
                        *p -= lr * g / (*v2 + epsilon).sqrt();
                        assert!(p.is_finite(), "parameter diverged under RMSProp");
                    });
            }
            Optimizer::Adam => {
                let velocity = velocity.expect("Adam velocity state not allocated");
                let velocity_squared =
                    velocity_squared.expect("Adam squared-velocity state not allocated");
                let correction_momentum = 1.0 - momentum.powi(t as i32);
                let correction_beta = 1.0 - beta.powi(t as i32);
                Zip::from(params)
                    .and(velocity)
                    .and(velocity_squared)
                    .and(gradient)
                    .par_for_each(|p, v, v2, &g| {
                        assert!(g.is_finite(), "non-finite gradient: {}", g);
                        *v = *v * momentum + (1.0 - momentum) * g;
                        *v2 = *v2 * beta + (1.0 - beta) * g * g;
                        let corrected_velocity = *v / correction_momentum;
                        let corrected_velocity_squared = *v2 / correction_beta;
                        *p -= lr * corrected_velocity
                            / (corrected_velocity_squared + epsilon).sqrt();
                        assert!(
                            p.is_finite(),
                            "parameter diverged under Adam: velocity {} squared velocity {}",
                            v,
                            v2
                        );
                    });
            }
        }
    }
}

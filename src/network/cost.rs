use super::{Vector, assert_all_finite};
use ndarray::Zip;

/// Smallest argument ever passed to `ln` by the cross-entropy cost.
///
/// Keeps the cost finite when a prediction lands exactly on 0 or 1.
const LOG_CLIP: f64 = 1e-12;

/// Cost (loss) function strategies and their derivatives.
///
/// `calculate` returns the per-element costs; callers sum across output
/// dimensions to obtain the scalar loss. `derivative` returns the gradient of
/// the cost with respect to each output element, which seeds the backward
/// pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cost {
    /// Squared error, (o − e)² / n per element
    SquaredError,
    /// Cross-entropy, −[e·ln(o) + (1−e)·ln(1−o)] per element.
    ///
    /// Outputs must be valid probabilities. The log argument is clamped to
    /// at least `1e-12` and the derivative treats a division by an output of
    /// exactly 0 or 1 as a zero contribution, so boundary predictions never
    /// produce non-finite values.
    CrossEntropy,
}

impl Cost {
    /// Computes the per-element cost between the actual and expected output.
    ///
    /// # Panics
    ///
    /// When `output` or the result contains non-finite values.
    pub fn calculate(&self, output: &Vector, expected: &Vector) -> Vector {
        assert_all_finite("cost input", output);

        let costs = match self {
            Cost::SquaredError => {
                let n = output.len() as f64;
                Zip::from(output)
                    .and(expected)
                    .map_collect(|&o, &e| (o - e) * (o - e) / n)
            }
            Cost::CrossEntropy => Zip::from(output)
                .and(expected)
                .map_collect(|&o, &e| -(e * o.max(LOG_CLIP).ln() + (1.0 - e) * (1.0 - o).max(LOG_CLIP).ln())),
        };

        assert_all_finite("cost output", &costs);
        costs
    }

    /// Computes the gradient of the cost with respect to each output element.
    ///
    /// # Panics
    ///
    /// When `output` or the result contains non-finite values.
    pub fn derivative(&self, output: &Vector, expected: &Vector) -> Vector {
        assert_all_finite("cost derivative input", output);

        let gradient = match self {
            Cost::SquaredError => {
                let n = output.len() as f64;
                Zip::from(output)
                    .and(expected)
                    .map_collect(|&o, &e| 2.0 * (o - e) / n)
            }
            Cost::CrossEntropy => Zip::from(output)
                .and(expected)
                .map_collect(|&o, &e| -(guarded_div(e, o) - guarded_div(1.0 - e, 1.0 - o))),
        };

        assert_all_finite("cost derivative output", &gradient);
        gradient
    }
}

/// Quotient with the boundary policy: a denominator of exactly 0 contributes
/// nothing instead of propagating toward infinity.
fn guarded_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

use super::*;

/// Numeric Jacobian-vector product of `activation` at `z`, central differences.
fn numeric_jvp(activation: Activation, z: &Vector, upstream: &Vector) -> Vector {
    let h = 1e-5;
    let mut out = Array1::zeros(z.len());
    for i in 0..z.len() {
        let mut plus = z.clone();
        plus[i] += h;
        let mut minus = z.clone();
        minus[i] -= h;
        out[i] = (activation.calculate(&plus).dot(upstream)
            - activation.calculate(&minus).dot(upstream))
            / (2.0 * h);
    }
    out
}

#[test]
fn test_derivative_matches_finite_difference() {
    // Points chosen away from the ReLU kink at zero
    let z = array![0.4, -1.3, 2.1, -0.2];
    let upstream = array![0.7, -0.3, 1.1, 0.5];

    for activation in [
        Activation::Identity,
        Activation::ReLU,
        Activation::LeakyReLU,
        Activation::Sigmoid,
        Activation::Tanh,
        Activation::Softmax,
    ] {
        let analytic = activation.derivative(&z, &upstream);
        let numeric = numeric_jvp(activation, &z, &upstream);
        for i in 0..z.len() {
            assert_relative_eq!(analytic[i], numeric[i], epsilon = 1e-7, max_relative = 1e-6);
        }
    }
}

#[test]
fn test_softmax_is_a_probability_distribution() {
    let z = array![3.0, -1.0, 0.5, 2.0];
    let a = Activation::Softmax.calculate(&z);

    for &v in a.iter() {
        assert!(v > 0.0 && v < 1.0, "softmax output out of (0, 1): {}", v);
    }
    assert_relative_eq!(a.sum(), 1.0, epsilon = 1e-12);
}

#[test]
fn test_softmax_survives_large_logits() {
    // Without the max-subtraction shift these would overflow exp
    let z = array![1000.0, 1001.0, 999.0];
    let a = Activation::Softmax.calculate(&z);
    assert_relative_eq!(a.sum(), 1.0, epsilon = 1e-12);
    assert!(a[1] > a[0] && a[0] > a[2]);
}

#[test]
fn test_relu_family_forward_values() {
    let z = array![2.0, -2.0, 0.0];

    let relu = Activation::ReLU.calculate(&z);
    assert_eq!(relu, array![2.0, 0.0, 0.0]);

    let leaky = Activation::LeakyReLU.calculate(&z);
    assert_relative_eq!(leaky[0], 2.0);
    assert_relative_eq!(leaky[1], -0.2);
    assert_relative_eq!(leaky[2], 0.0);
}

#[test]
fn test_sigmoid_and_tanh_ranges() {
    let z = array![-5.0, -0.5, 0.0, 0.5, 5.0];

    for &v in Activation::Sigmoid.calculate(&z).iter() {
        assert!(v > 0.0 && v < 1.0, "sigmoid output out of (0, 1): {}", v);
    }
    for &v in Activation::Tanh.calculate(&z).iter() {
        assert!(v > -1.0 && v < 1.0, "tanh output out of (-1, 1): {}", v);
    }
    assert_relative_eq!(Activation::Sigmoid.calculate(&z)[2], 0.5);
}

#[test]
fn test_initializer_std_follows_activation_family() {
    // He scaling for the ReLU family, Xavier scaling otherwise
    let he = Activation::ReLU.initializer_std(4, 2);
    assert_relative_eq!(he, (2.0_f64 / 6.0).sqrt(), epsilon = 1e-12);

    let xavier = Activation::Tanh.initializer_std(4, 2);
    assert_relative_eq!(xavier, 6.0_f64.powf(-0.25), epsilon = 1e-12);
}

use super::*;

/// A 2-in 2-out dense layer with hand-picked parameters.
fn fixed_dense() -> Dense {
    let mut dense = Dense::new(2, 2);
    dense.weights = array![[1.0, 2.0], [3.0, 4.0]];
    dense.bias = array![0.5, -0.5];
    dense
}

#[test]
fn test_forward_is_affine() {
    let dense = fixed_dense();
    let output = dense.forward(&array![1.0, 1.0]);
    assert_relative_eq!(output[0], 4.5);
    assert_relative_eq!(output[1], 5.5);
}

#[test]
fn test_update_gradient_accumulates_outer_product() {
    let dense = fixed_dense();
    let dz = array![1.0, 2.0];
    let x = array![3.0, 4.0];

    let da = dense.update_gradient(&dz, &x, &StepMemory::None);

    // da/dC = W · dz/dC
    assert_relative_eq!(da[0], 5.0);
    assert_relative_eq!(da[1], 11.0);

    let gradient = dense.gradient.lock().unwrap();
    assert_eq!(gradient.bias, dz);
    assert_eq!(gradient.weights, array![[3.0, 6.0], [4.0, 8.0]]);
}

#[test]
fn test_gradients_sum_across_samples() {
    let dense = fixed_dense();
    let dz = array![1.0, 2.0];
    let x = array![3.0, 4.0];

    dense.update_gradient(&dz, &x, &StepMemory::None);
    dense.update_gradient(&dz, &x, &StepMemory::None);

    let gradient = dense.gradient.lock().unwrap();
    assert_eq!(gradient.bias, array![2.0, 4.0]);
    assert_eq!(gradient.weights, array![[6.0, 12.0], [8.0, 16.0]]);
}

#[test]
fn test_clear_gradient_zeroes_accumulators() {
    let dense = fixed_dense();
    dense.update_gradient(&array![1.0, 2.0], &array![3.0, 4.0], &StepMemory::None);

    dense.clear_gradient();
    dense.clear_gradient(); // idempotent

    let gradient = dense.gradient.lock().unwrap();
    assert!(gradient.weights.iter().all(|&v| v == 0.0));
    assert!(gradient.bias.iter().all(|&v| v == 0.0));
}

#[test]
fn test_apply_gradient_steps_against_the_gradient() {
    let mut dense = fixed_dense();
    dense.update_gradient(&array![1.0, 0.0], &array![1.0, 0.0], &StepMemory::None);

    dense.apply_gradient(Optimizer::Sgd, 0.1, 0.0, 0.0, 0.0);

    // only weight (0, 0) and bias 0 saw gradient 1
    assert_relative_eq!(dense.weights()[[0, 0]], 0.9);
    assert_relative_eq!(dense.weights()[[1, 1]], 4.0);
    assert_relative_eq!(dense.bias()[0], 0.4);
    assert_relative_eq!(dense.bias()[1], -0.5);
}

#[test]
fn test_clone_is_independent() {
    let original = fixed_dense();
    let copy = original.clone();

    original.update_gradient(&array![1.0, 1.0], &array![1.0, 1.0], &StepMemory::None);

    let copied_gradient = copy.gradient.lock().unwrap();
    assert!(copied_gradient.bias.iter().all(|&v| v == 0.0));
}

#[test]
fn test_dense_has_no_recurrent_memory() {
    let dense = fixed_dense();
    assert!(matches!(
        dense.reset_memory(),
        Err(NetworkError::NotSupported(_))
    ));
}

#[test]
fn test_size_reporting() {
    let dense = Dense::new(3, 5);
    assert_eq!(dense.input_size(), 3);
    assert_eq!(dense.node_count(), 5);
    assert_eq!(dense.parameter_count(), 20);
    assert_eq!(dense.parameters().len(), 20);
}

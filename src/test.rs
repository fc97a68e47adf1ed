use crate::error::NetworkError;
use crate::network::*;
use approx::assert_relative_eq;
use ndarray::prelude::*;

mod activation_test;
mod dense_test;

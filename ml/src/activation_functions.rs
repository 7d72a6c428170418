//! This module provides the necessary activation functions for our neural
//! networks, namely Relu.
//!
//! All activation functions are exposed as a layer as well as a free function
use ndarray::*;

use crate::{models::InternalDataRepresentation, ImagePrecision};

/// Leaky relu implementation
#[allow(dead_code)]
pub fn leaky_relu<D: Dimension>(data: &Array<ImagePrecision, D>) -> Array<ImagePrecision, D> {
    data.mapv(|x| if x > 0. { x } else { 0.01 * x })
}

/// Relu implementation
pub fn relu<D: Dimension>(data: &Array<ImagePrecision, D>) -> Array<ImagePrecision, D> {
    data.mapv(|x| if x > 0. { x } else { 0. })
}

/// Implementation of Relu as a layer.
pub struct ReluLayer {}

impl ReluLayer {
    pub fn new() -> Self {
        Self {}
    }

    pub fn activate(&self, x: &InternalDataRepresentation) -> InternalDataRepresentation {
        x.map(|a| a.max(0.0))
    }
}

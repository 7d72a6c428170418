pub mod activation_functions;
pub mod convolutions;
pub mod models;
pub mod pooling;
pub mod transposed_convolutions;
pub mod weight_loader;

pub type WeightPrecision = f32;
pub type ImagePrecision = f32;

/// Convolution kernels are stored in the order in which pytorch saves them,
/// (output channels, input channels, kernel height, kernel width).
/// Transposed convolutions swap the first two axes, see the
/// `transposed_convolutions` module.
pub type ConvKernel = ndarray::Array4<WeightPrecision>;

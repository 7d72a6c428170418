//! This crate links continuous-tone images to the stippled dot patterns the
//! reconstruction network consumes.
//!
//! For this purpose, this crate provides the trait for stipplers, halftoning
//! implementations of it under the "dithering" module, and the image quality
//! statistics used to judge reconstructions under "statistics".

pub mod dithering;
pub mod statistics;
mod stippling_errors;

use ndarray::Array2;
pub use stippling_errors::StipplingError;

/// Returned wherever stippling setup might fail
pub type StipplingResult<T> = std::result::Result<T, StipplingError>;

/// The trait of a stippler. A stippler takes a continuous-tone grayscale
/// image with values in [0, 1] and turns it into a binary dot pattern with
/// values in {0.0, 1.0} (1.0 being paper white).
pub trait Stippler {
    /// Stipples the given image.
    fn stipple(&self, image: &Array2<f32>) -> Array2<f32>;
}

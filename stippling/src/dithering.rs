//! Halftoning passes that turn a continuous-tone image into the kind of
//! binary dot pattern the reconstruction network was trained on.
use crate::{Stippler, StipplingError, StipplingResult};
use ndarray::Array2;
use std::fmt;
use std::str::FromStr;

/// 4x4 Bayer index matrix, row-major.
const BAYER_4X4: [[u8; 4]; 4] = [[0, 8, 2, 10], [12, 4, 14, 6], [3, 11, 1, 9], [15, 7, 13, 5]];

/// The available stippling methods, selectable by name on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DitherMethod {
    FloydSteinberg,
    Ordered,
    Threshold,
}

impl DitherMethod {
    /// Returns the stippler implementing this method.
    pub fn stippler(&self) -> Box<dyn Stippler> {
        match self {
            DitherMethod::FloydSteinberg => Box::new(FloydSteinbergDither::new()),
            DitherMethod::Ordered => Box::new(OrderedDither::new()),
            DitherMethod::Threshold => Box::new(ThresholdDither::new(0.5)),
        }
    }
}

impl FromStr for DitherMethod {
    type Err = StipplingError;

    fn from_str(s: &str) -> StipplingResult<DitherMethod> {
        match s {
            "floyd-steinberg" => Ok(DitherMethod::FloydSteinberg),
            "ordered" => Ok(DitherMethod::Ordered),
            "threshold" => Ok(DitherMethod::Threshold),
            _ => Err(StipplingError::UnknownMethod(s.to_string())),
        }
    }
}

impl fmt::Display for DitherMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DitherMethod::FloydSteinberg => "floyd-steinberg",
            DitherMethod::Ordered => "ordered",
            DitherMethod::Threshold => "threshold",
        };
        write!(f, "{}", name)
    }
}

/// Floyd-Steinberg error diffusion. Each pixel is rounded to black or white
/// and the rounding error is pushed onto the yet unvisited neighbors with
/// the classic 7/16, 3/16, 5/16, 1/16 weights.
pub struct FloydSteinbergDither {}

impl FloydSteinbergDither {
    pub fn new() -> Self {
        Self {}
    }
}

impl Stippler for FloydSteinbergDither {
    fn stipple(&self, image: &Array2<f32>) -> Array2<f32> {
        let (height, width) = image.dim();
        let mut carry = image.clone();
        let mut out = Array2::zeros((height, width));

        for i in 0..height {
            for j in 0..width {
                let old = carry[[i, j]];
                let new = if old >= 0.5 { 1.0 } else { 0.0 };
                out[[i, j]] = new;
                let err = old - new;

                if j + 1 < width {
                    carry[[i, j + 1]] += err * 7.0 / 16.0;
                }
                if i + 1 < height {
                    if j > 0 {
                        carry[[i + 1, j - 1]] += err * 3.0 / 16.0;
                    }
                    carry[[i + 1, j]] += err * 5.0 / 16.0;
                    if j + 1 < width {
                        carry[[i + 1, j + 1]] += err * 1.0 / 16.0;
                    }
                }
            }
        }
        out
    }
}

/// Ordered dithering against a tiled 4x4 Bayer matrix. Purely local, so the
/// dot placement is perfectly repeatable.
pub struct OrderedDither {}

impl OrderedDither {
    pub fn new() -> Self {
        Self {}
    }

    fn threshold_at(i: usize, j: usize) -> f32 {
        (BAYER_4X4[i % 4][j % 4] as f32 + 0.5) / 16.0
    }
}

impl Stippler for OrderedDither {
    fn stipple(&self, image: &Array2<f32>) -> Array2<f32> {
        let mut out = image.clone();
        for ((i, j), x) in out.indexed_iter_mut() {
            *x = if *x >= OrderedDither::threshold_at(i, j) {
                1.0
            } else {
                0.0
            };
        }
        out
    }
}

/// Fixed global threshold, the crudest possible stippling.
pub struct ThresholdDither {
    threshold: f32,
}

impl ThresholdDither {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Stippler for ThresholdDither {
    fn stipple(&self, image: &Array2<f32>) -> Array2<f32> {
        image.mapv(|x| if x >= self.threshold { 1.0 } else { 0.0 })
    }
}

use crate::{models::InternalDataRepresentation, ImagePrecision};
use ndarray::*;

/// Rust implementation of a max pooling layer. Pooling is applied
/// independently per channel.
pub struct MaxPoolLayer {
    kernel_size: usize,
    stride: usize,
    /// With ceil rounding, a final partial window is emitted when the
    /// kernel does not evenly cover the input; the maximum is then taken
    /// over the in-bounds elements only (pytorch semantics).
    ceil_mode: bool,
}

impl MaxPoolLayer {
    pub fn new(kernel_size: usize, stride: usize) -> MaxPoolLayer {
        debug_assert!(kernel_size > 0, "Kernel size of 0 passed");
        debug_assert!(stride > 0, "Stride of 0 passed");
        MaxPoolLayer {
            kernel_size,
            stride,
            ceil_mode: false,
        }
    }

    pub fn with_ceil_mode(kernel_size: usize, stride: usize) -> MaxPoolLayer {
        MaxPoolLayer {
            ceil_mode: true,
            ..MaxPoolLayer::new(kernel_size, stride)
        }
    }

    fn output_len(&self, input_len: usize) -> usize {
        debug_assert!(input_len >= self.kernel_size);
        let span = input_len - self.kernel_size;
        let mut out = if self.ceil_mode {
            (span + self.stride - 1) / self.stride + 1
        } else {
            span / self.stride + 1
        };
        // The last window has to start inside the input.
        if self.ceil_mode && (out - 1) * self.stride >= input_len {
            out -= 1;
        }
        out
    }

    /// Reduces every kernel-sized window of the image to its maximum.
    pub fn max_pool(&self, image: &InternalDataRepresentation) -> InternalDataRepresentation {
        let channels = image.len_of(Axis(0));
        let im_height = image.len_of(Axis(1));
        let im_width = image.len_of(Axis(2));

        let new_im_height = self.output_len(im_height);
        let new_im_width = self.output_len(im_width);

        let mut output: Array3<ImagePrecision> =
            Array::zeros((channels, new_im_height, new_im_width));

        for c in 0..channels {
            for i in 0..new_im_height {
                let h_start = i * self.stride;
                let h_end = (h_start + self.kernel_size).min(im_height);
                for j in 0..new_im_width {
                    let w_start = j * self.stride;
                    let w_end = (w_start + self.kernel_size).min(im_width);
                    let window = image.slice(s![c, h_start..h_end, w_start..w_end]);
                    output[[c, i, j]] =
                        window.fold(f32::NEG_INFINITY, |max, &x| max.max(x));
                }
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_pool() {
        let input = array![[
            [1., 2., 5., 6.],
            [3., 4., 7., 8.],
            [-1., -2., 0., 0.],
            [-3., -4., 0., 1.],
        ]];
        let pool = MaxPoolLayer::new(2, 2);

        assert_eq!(pool.max_pool(&input), arr3(&[[[4., 8.], [-1., 1.]]]));
    }

    #[test]
    fn test_max_pool_floor_drops_partial_window() {
        let input = array![[[1., 2., 3., 4., 9.], [5., 6., 7., 8., 10.]]];
        let pool = MaxPoolLayer::new(2, 2);

        // floor rounding: the trailing column does not form a full window
        assert_eq!(pool.max_pool(&input), arr3(&[[[6., 8.]]]));
    }

    #[test]
    fn test_max_pool_ceil_keeps_partial_window() {
        let input = array![[[1., 2., 3., 4., 9.], [5., 6., 7., 8., 10.]]];
        let pool = MaxPoolLayer::with_ceil_mode(2, 2);

        assert_eq!(pool.max_pool(&input), arr3(&[[[6., 8., 10.]]]));
    }

    #[test]
    fn test_max_pool_multichannel() {
        let input = array![[[1., 2.], [3., 4.]], [[-4., -3.], [-2., -1.]]];
        let pool = MaxPoolLayer::new(2, 2);

        assert_eq!(pool.max_pool(&input), arr3(&[[[4.]], [[-1.]]]));
    }
}

//! Transposed convolutions (also wrongly called deconvolution layers)
//! are learnable upsampling maps.
//! More can be read here:
//! - https://datascience.stackexchange.com/questions/6107/what-are-deconvolutional-layers
//! - https://github.com/akutzer/numpy_cnn/blob/master/CNN/Layer/TransposedConv.py
//! - https://ieee.nitk.ac.in/blog/deconv/
use crate::{models::InternalDataRepresentation, ConvKernel, ImagePrecision, WeightPrecision};
use ndarray::*;

/// Analog to a Convolution Layer. The weight matrix shall have dimension
/// (in that order)
/// input channels x output channels x kernel height x kernel width
/// (to comply with the order in which pytorch saves transposed convolution
/// weights, which is swapped compared to regular convolutions).
pub struct TransposedConvolutionLayer {
    kernel: ConvKernel,
    bias: Option<Array1<WeightPrecision>>,
    kernel_height: usize,
    kernel_width: usize,
    stride: usize,
    img_channels: usize,
    num_filters: usize,
}

impl TransposedConvolutionLayer {
    pub fn new(
        weights: ConvKernel,
        bias: Option<Array1<WeightPrecision>>,
        stride: usize,
    ) -> TransposedConvolutionLayer {
        let img_channels = weights.len_of(Axis(0));
        let num_filters = weights.len_of(Axis(1));
        let kernel_height = weights.len_of(Axis(2));
        let kernel_width = weights.len_of(Axis(3));

        debug_assert!(stride > 0, "Stride of 0 passed");
        if let Some(b) = &bias {
            debug_assert_eq!(b.len(), num_filters);
        }

        TransposedConvolutionLayer {
            kernel: weights,
            bias,
            kernel_height,
            kernel_width,
            stride,
            img_channels,
            num_filters,
        }
    }

    /// Performs a transposed convolution on the input image. This upsamples
    /// the image to shape
    /// H' = (H - 1) * stride + HH
    /// W' = (W - 1) * stride + WW
    /// (https://theano-pymc.readthedocs.io/en/latest/tutorial/conv_arithmetic.html).
    ///
    /// Each input pixel stamps a kernel-sized, weighted copy of the filters
    /// into the output, overlapping contributions accumulate. This is the
    /// exact adjoint of the strided convolution forward pass.
    pub fn transposed_convolve(
        &self,
        image: &InternalDataRepresentation,
    ) -> InternalDataRepresentation {
        let im_channels = image.len_of(Axis(0));
        let im_height = image.len_of(Axis(1));
        let im_width = image.len_of(Axis(2));
        debug_assert_eq!(im_channels, self.img_channels);

        let new_im_height = (im_height - 1) * self.stride + self.kernel_height;
        let new_im_width = (im_width - 1) * self.stride + self.kernel_width;

        let mut output: Array3<ImagePrecision> =
            Array::zeros((self.num_filters, new_im_height, new_im_width));

        for c in 0..im_channels {
            // (F, HH, WW) filter stack of this input channel
            let filters = self.kernel.slice(s![c, .., .., ..]);
            for i in 0..im_height {
                for j in 0..im_width {
                    let mut window = output.slice_mut(s![
                        ..,
                        i * self.stride..(i * self.stride + self.kernel_height),
                        j * self.stride..(j * self.stride + self.kernel_width)
                    ]);
                    window.scaled_add(image[[c, i, j]], &filters);
                }
            }
        }

        if let Some(bias) = &self.bias {
            for (mut filter_map, b) in output.axis_iter_mut(Axis(0)).zip(bias.iter()) {
                filter_map += *b;
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_2d_transposed_conv() {
        let test_img = array![[[55.0, 52.0], [57.0, 50.0]]];
        let kernel = Array::from_shape_vec((1, 1, 2, 2), vec![1., 2., 3., 4.]).unwrap();
        let layer = TransposedConvolutionLayer::new(kernel, None, 1);

        let upsampled = layer.transposed_convolve(&test_img);
        let expected = arr3(&[[
            [55.0, 162.0, 104.0],
            [222.0, 540.0, 308.0],
            [171.0, 378.0, 200.0],
        ]]);
        assert_eq!(upsampled, expected);
    }

    #[test]
    fn test_2d_transposed_conv_with_stride() {
        // With kernel size == stride the stamps tile the output without
        // overlap, every input pixel becomes a 2x2 block.
        let test_img = array![[[1.0, 2.0], [3.0, 4.0]]];
        let kernel = Array::from_shape_vec((1, 1, 2, 2), vec![1.; 4]).unwrap();
        let layer = TransposedConvolutionLayer::new(kernel, None, 2);

        let upsampled = layer.transposed_convolve(&test_img);
        let expected = arr3(&[[
            [1.0, 1.0, 2.0, 2.0],
            [1.0, 1.0, 2.0, 2.0],
            [3.0, 3.0, 4.0, 4.0],
            [3.0, 3.0, 4.0, 4.0],
        ]]);
        assert_eq!(upsampled, expected);
    }

    #[test]
    fn test_2d_transposed_conv_multichannel_bias() {
        // Two input channels mapping onto one filter, plus bias.
        let test_img = array![[[1.0]], [[2.0]]];
        let kernel =
            Array::from_shape_vec((2, 1, 2, 2), vec![1., 1., 1., 1., 10., 10., 10., 10.]).unwrap();
        let bias = array![0.5];
        let layer = TransposedConvolutionLayer::new(kernel, Some(bias), 2);

        let upsampled = layer.transposed_convolve(&test_img);
        let expected = arr3(&[[[21.5, 21.5], [21.5, 21.5]]]);
        assert_eq!(upsampled, expected);
    }
}

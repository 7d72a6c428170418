use crate::{models::InternalDataRepresentation, ConvKernel, ImagePrecision, WeightPrecision};
use ndarray::*;

/// Padding behaviour of a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// Zero-pads the input so that the output keeps the input size
    /// (divided by the stride, rounded up).
    Same,
    /// No padding, the kernel only visits positions where it fully overlaps
    /// the input.
    Valid,
}

/// Rust implementation of a convolutional layer.
/// The weight matrix shall have dimension (in that order)
/// output channels x input channels x kernel height x kernel width
/// (to comply with the order in which pytorch weights are saved).
pub struct ConvolutionLayer {
    /// Weight matrix of the kernel
    pub(crate) kernel: ConvKernel,
    /// Bias, one value per output channel
    pub(crate) bias: Option<Array1<WeightPrecision>>,
    pub(crate) kernel_height: usize,
    pub(crate) kernel_width: usize,
    pub(crate) stride: usize,
    pub(crate) padding: Padding,
    /// Number of output channels
    pub(crate) num_filters: usize,
    /// Number of input channels
    pub(crate) img_channels: usize,
}

impl ConvolutionLayer {
    pub fn new(
        weights: ConvKernel,
        bias: Option<Array1<WeightPrecision>>,
        stride: usize,
        padding: Padding,
    ) -> ConvolutionLayer {
        let num_filters = weights.len_of(Axis(0));
        let img_channels = weights.len_of(Axis(1));
        let kernel_height = weights.len_of(Axis(2));
        let kernel_width = weights.len_of(Axis(3));

        debug_assert!(stride > 0, "Stride of 0 passed");
        if let Some(b) = &bias {
            debug_assert_eq!(b.len(), num_filters);
        }

        ConvolutionLayer {
            kernel: weights,
            bias,
            kernel_height,
            kernel_width,
            stride,
            padding,
            num_filters,
            img_channels,
        }
    }

    /// Performs a convolution on the given image data using this layers parameters.
    /// We convolve on flattened images via an im2col transformation, so the
    /// actual numerical work is a single matrix multiplication (read more here:
    /// https://leonardoaraujosantos.gitbook.io/artificial-inteligence/machine_learning/deep_learning/convolution_layer/making_faster)
    pub fn convolve(&self, image: &InternalDataRepresentation) -> InternalDataRepresentation {
        debug_assert_eq!(image.len_of(Axis(0)), self.img_channels);
        self.conv_2d(&self.kernel, &image.view())
    }

    /// Naive implementation of 2d convolution, retained as a reference for tests.
    #[allow(dead_code)]
    fn conv_2d_naive<'a, T, V>(&self, kernel_weights: T, im2d: V) -> Array2<ImagePrecision>
    where
        // This trait bound ensures that kernel and im2d can be passed as owned array or view.
        // AsArray just ensures that im2d can be converted to an array view via ".into()".
        // Read more here: https://docs.rs/ndarray/0.12.1/ndarray/trait.AsArray.html
        V: AsArray<'a, ImagePrecision, Ix2>,
        T: AsArray<'a, ImagePrecision, Ix2>,
    {
        let im2d_arr: ArrayView2<f32> = im2d.into();
        let kernel_weights_arr: ArrayView2<f32> = kernel_weights.into();

        let im_height = im2d_arr.len_of(Axis(0));
        let im_width = im2d_arr.len_of(Axis(1));

        let new_im_height = (im_height - self.kernel_height) / self.stride + 1;
        let new_im_width = (im_width - self.kernel_width) / self.stride + 1;

        let mut ret = Array::zeros((new_im_height, new_im_width));

        for i in 0..new_im_height {
            let i_with_stride = i * self.stride;
            for j in 0..new_im_width {
                let j_with_stride = j * self.stride;
                let imslice = im2d_arr.slice(s![
                    i_with_stride..(i_with_stride + self.kernel_height),
                    j_with_stride..(j_with_stride + self.kernel_width)
                ]);

                let conv_entry = (&imslice * &kernel_weights_arr).sum();
                ret[[i, j]] = conv_entry;
            }
        }
        ret
    }

    /// Returns the total padding along each axis together with its split onto
    /// the four image borders, following the convention that the surplus unit
    /// of an odd total goes to the bottom/right.
    pub(crate) fn get_padding_size(
        &self,
        im_height: usize,
        im_width: usize,
    ) -> (usize, usize, usize, usize, usize, usize) {
        let out_height = (im_height + self.stride - 1) / self.stride;
        let out_width = (im_width + self.stride - 1) / self.stride;

        let pad_along_height =
            ((out_height - 1) * self.stride + self.kernel_height).saturating_sub(im_height);
        let pad_along_width =
            ((out_width - 1) * self.stride + self.kernel_width).saturating_sub(im_width);

        let pad_top = pad_along_height / 2;
        let pad_bottom = pad_along_height - pad_top;
        let pad_left = pad_along_width / 2;
        let pad_right = pad_along_width - pad_left;

        (
            pad_along_height,
            pad_along_width,
            pad_top,
            pad_bottom,
            pad_left,
            pad_right,
        )
    }

    /// Zero-pads the image on its spatial axes.
    fn pad_input(
        &self,
        image: &ArrayView3<ImagePrecision>,
        pad_top: usize,
        pad_bottom: usize,
        pad_left: usize,
        pad_right: usize,
    ) -> Array3<ImagePrecision> {
        let channels = image.len_of(Axis(0));
        let im_height = image.len_of(Axis(1));
        let im_width = image.len_of(Axis(2));

        let mut padded: Array3<ImagePrecision> = Array::zeros((
            channels,
            im_height + pad_top + pad_bottom,
            im_width + pad_left + pad_right,
        ));
        // https://github.com/rust-ndarray/ndarray/issues/823
        padded
            .slice_mut(s![
                ..,
                pad_top..pad_top + im_height,
                pad_left..pad_left + im_width
            ])
            .assign(image);
        padded
    }

    /// Lays out every kernel-sized patch of the image as one row of a matrix,
    /// so that the convolution becomes a matrix product with the flattened
    /// kernel.
    fn im2col_ref<'a, T>(
        &self,
        im_arr: T,
        ker_height: usize,
        ker_width: usize,
        im_height: usize,
        im_width: usize,
        im_channel: usize,
    ) -> Array2<ImagePrecision>
    where
        T: AsArray<'a, ImagePrecision, Ix3>,
    {
        let im2d_arr: ArrayView3<f32> = im_arr.into();
        let new_h = (im_height - ker_height) / self.stride + 1;
        let new_w = (im_width - ker_width) / self.stride + 1;
        let mut img_matrix: Array2<ImagePrecision> =
            Array::zeros((new_h * new_w, im_channel * ker_height * ker_width));
        let mut row = 0;
        for i in 0..new_h {
            for j in 0..new_w {
                let patch = im2d_arr.slice(s![
                    ..,
                    i * self.stride..(i * self.stride + ker_height),
                    j * self.stride..(j * self.stride + ker_width),
                ]);
                let patch_row = Array::from_iter(patch.iter().copied());
                img_matrix.row_mut(row).assign(&patch_row);
                row += 1;
            }
        }
        img_matrix
    }

    /// Inverse of the im2col layout on the output side: reshapes the
    /// (positions x filters) product matrix back into an image of shape
    /// (filters, height, width).
    fn col2im_ref<'a, T>(
        &self,
        mat: T,
        height_prime: usize,
        width_prime: usize,
        num_filters: usize,
    ) -> Array3<ImagePrecision>
    where
        T: AsArray<'a, ImagePrecision, Ix2>,
    {
        let mat_arr: ArrayView2<f32> = mat.into();
        debug_assert_eq!(mat_arr.len_of(Axis(0)), height_prime * width_prime);
        debug_assert_eq!(mat_arr.len_of(Axis(1)), num_filters);
        // The transposed view iterates filter-major, which is exactly the
        // (F, H', W') memory order we need.
        Array::from_shape_vec(
            (num_filters, height_prime, width_prime),
            mat_arr.t().iter().copied().collect(),
        )
        .unwrap()
    }

    fn conv_2d<'a, T, V>(&self, kernel_weights: T, im2d: V) -> Array3<ImagePrecision>
    where
        // This trait bound ensures that kernel and im2d can be passed as owned array or view.
        // AsArray just ensures that im2d can be converted to an array view via ".into()".
        // Read more here: https://docs.rs/ndarray/0.12.1/ndarray/trait.AsArray.html

        // Weights.shape = [F, C, HH, WW]
        V: AsArray<'a, ImagePrecision, Ix3>,
        T: AsArray<'a, ImagePrecision, Ix4>,
    {
        let im2d_arr: ArrayView3<f32> = im2d.into();
        let kernel_weights_arr: ArrayView4<f32> = kernel_weights.into();

        let im_height = im2d_arr.len_of(Axis(1));
        let im_width = im2d_arr.len_of(Axis(2));

        let padded;
        let im2d_padded = match self.padding {
            Padding::Same => {
                let (_, _, pad_top, pad_bottom, pad_left, pad_right) =
                    self.get_padding_size(im_height, im_width);
                padded = self.pad_input(&im2d_arr, pad_top, pad_bottom, pad_left, pad_right);
                padded.view()
            }
            Padding::Valid => im2d_arr.view(),
        };

        let im_height_pad = im2d_padded.len_of(Axis(1));
        let im_width_pad = im2d_padded.len_of(Axis(2));
        let im_channel = im2d_padded.len_of(Axis(0));

        // HH = self.kernel_height, WW = self.kernel_width
        // new_h = (H + 2*P - HH) / S + 1
        let new_im_height = (im_height_pad - self.kernel_height) / self.stride + 1;
        let new_im_width = (im_width_pad - self.kernel_width) / self.stride + 1;

        // weights.reshape(F, C*HH*WW)
        let filter_col = kernel_weights_arr
            .into_shape((
                self.num_filters,
                self.img_channels * self.kernel_height * self.kernel_width,
            ))
            .unwrap();

        let im_col = self.im2col_ref(
            im2d_padded,
            self.kernel_height,
            self.kernel_width,
            im_height_pad,
            im_width_pad,
            im_channel,
        );
        // (positions x C*HH*WW) . (C*HH*WW x F) = (positions x F)
        let mut mul = im_col.dot(&filter_col.t());

        if let Some(bias) = &self.bias {
            mul += &bias.view().insert_axis(Axis(0));
        }

        self.col2im_ref(&mul, new_im_height, new_im_width, self.num_filters)
    }
}

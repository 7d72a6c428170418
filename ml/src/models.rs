use crate::{
    activation_functions::relu,
    convolutions::{ConvolutionLayer, Padding},
    pooling::MaxPoolLayer,
    transposed_convolutions::TransposedConvolutionLayer,
    weight_loader::{WeightLoader, WeightResult},
    ConvKernel, ImagePrecision,
};
use log::debug;
use ndarray::*;

/// Images and feature maps are passed between layers in pytorch layout,
/// (channels, height, width).
pub type InternalDataRepresentation = Array3<ImagePrecision>;

/// General model trait for image-to-image reconstruction networks.
pub trait ReconstructionModel {
    fn forward_pass(&self, input: &InternalDataRepresentation) -> InternalDataRepresentation;
}

/// U-Net as described in Ronneberger et al. 2015,
/// https://arxiv.org/abs/1505.04597, with same-padding convolutions,
/// trained to reconstruct a continuous-tone image from a stippled input.
///
/// Four encoder stages of two 3x3 convolutions with relu and a 2x max
/// pooling each (the fourth stage pools with ceil rounding so odd spatial
/// dimensions survive), a bottleneck of two more 3x3 convolutions, and four
/// decoder stages of a learned 2x upsampling, concatenation with the
/// matching encoder feature map and two 3x3 convolutions with relu.
/// A final 1x1 convolution projects down to the output channels.
///
/// Layer names follow the parameter names of the trained checkpoint, so a
/// state dict export loads without any renaming.
pub struct UNet {
    e11: ConvolutionLayer,
    e12: ConvolutionLayer,
    pool1: MaxPoolLayer,
    e21: ConvolutionLayer,
    e22: ConvolutionLayer,
    pool2: MaxPoolLayer,
    e31: ConvolutionLayer,
    e32: ConvolutionLayer,
    pool3: MaxPoolLayer,
    e41: ConvolutionLayer,
    e42: ConvolutionLayer,
    pool4: MaxPoolLayer,
    e51: ConvolutionLayer,
    e52: ConvolutionLayer,
    upconv1: TransposedConvolutionLayer,
    d11: ConvolutionLayer,
    d12: ConvolutionLayer,
    upconv2: TransposedConvolutionLayer,
    d21: ConvolutionLayer,
    d22: ConvolutionLayer,
    upconv3: TransposedConvolutionLayer,
    d31: ConvolutionLayer,
    d32: ConvolutionLayer,
    upconv4: TransposedConvolutionLayer,
    d41: ConvolutionLayer,
    d42: ConvolutionLayer,
    outconv: ConvolutionLayer,
}

/// Loads a 3x3 same-padding convolution from "<name>.weight" / "<name>.bias".
fn conv3x3(
    loader: &mut impl WeightLoader,
    name: &str,
    in_channels: usize,
    out_channels: usize,
) -> WeightResult<ConvolutionLayer> {
    let weight: ConvKernel =
        loader.get_weight(&format!("{}.weight", name), (out_channels, in_channels, 3, 3))?;
    let bias = loader.get_weight(&format!("{}.bias", name), out_channels)?;
    Ok(ConvolutionLayer::new(weight, Some(bias), 1, Padding::Same))
}

/// Loads the final 1x1 projection convolution.
fn conv1x1(
    loader: &mut impl WeightLoader,
    name: &str,
    in_channels: usize,
    out_channels: usize,
) -> WeightResult<ConvolutionLayer> {
    let weight: ConvKernel =
        loader.get_weight(&format!("{}.weight", name), (out_channels, in_channels, 1, 1))?;
    let bias = loader.get_weight(&format!("{}.bias", name), out_channels)?;
    Ok(ConvolutionLayer::new(weight, Some(bias), 1, Padding::Same))
}

/// Loads a learned 2x upsampling (2x2 transposed convolution with stride 2).
/// Note the swapped axis order of transposed convolution weights.
fn upconv2x2(
    loader: &mut impl WeightLoader,
    name: &str,
    in_channels: usize,
    out_channels: usize,
) -> WeightResult<TransposedConvolutionLayer> {
    let weight: ConvKernel =
        loader.get_weight(&format!("{}.weight", name), (in_channels, out_channels, 2, 2))?;
    let bias = loader.get_weight(&format!("{}.bias", name), out_channels)?;
    Ok(TransposedConvolutionLayer::new(weight, Some(bias), 2))
}

/// Concatenates an upsampled decoder map with the matching encoder map
/// along the channel axis. When ceil-mode pooling produced an odd-sized
/// map further down, the upsampled map overshoots by one row/column and is
/// cropped back to the encoder map (the skip connection fixes the
/// authoritative size).
fn concat_skip(
    upsampled: &InternalDataRepresentation,
    encoder: &InternalDataRepresentation,
) -> InternalDataRepresentation {
    let height = encoder.len_of(Axis(1));
    let width = encoder.len_of(Axis(2));
    let cropped = upsampled.slice(s![.., ..height, ..width]);
    concatenate![Axis(0), cropped, encoder.view()]
}

impl UNet {
    /// Channel width of the first encoder stage in the trained checkpoint.
    /// Widths double with each stage.
    pub const DEFAULT_BASE_CHANNELS: usize = 64;

    /// Number of input channels (the network reads grayscale stipplings).
    pub const IN_CHANNELS: usize = 1;

    /// Builds the network at checkpoint size, reading all parameters from
    /// the given loader.
    pub fn new(loader: &mut impl WeightLoader, out_channels: usize) -> WeightResult<UNet> {
        UNet::with_base_channels(loader, out_channels, UNet::DEFAULT_BASE_CHANNELS)
    }

    /// Builds the network with a custom width of the first stage. Smaller
    /// widths keep unit tests cheap, the topology is unaffected.
    pub fn with_base_channels(
        loader: &mut impl WeightLoader,
        out_channels: usize,
        base_channels: usize,
    ) -> WeightResult<UNet> {
        let b = base_channels;

        Ok(UNet {
            e11: conv3x3(loader, "e11", UNet::IN_CHANNELS, b)?,
            e12: conv3x3(loader, "e12", b, b)?,
            pool1: MaxPoolLayer::new(2, 2),
            e21: conv3x3(loader, "e21", b, 2 * b)?,
            e22: conv3x3(loader, "e22", 2 * b, 2 * b)?,
            pool2: MaxPoolLayer::new(2, 2),
            e31: conv3x3(loader, "e31", 2 * b, 4 * b)?,
            e32: conv3x3(loader, "e32", 4 * b, 4 * b)?,
            pool3: MaxPoolLayer::new(2, 2),
            e41: conv3x3(loader, "e41", 4 * b, 8 * b)?,
            e42: conv3x3(loader, "e42", 8 * b, 8 * b)?,
            pool4: MaxPoolLayer::with_ceil_mode(2, 2),
            e51: conv3x3(loader, "e51", 8 * b, 16 * b)?,
            e52: conv3x3(loader, "e52", 16 * b, 16 * b)?,
            upconv1: upconv2x2(loader, "upconv1", 16 * b, 8 * b)?,
            d11: conv3x3(loader, "d11", 16 * b, 8 * b)?,
            d12: conv3x3(loader, "d12", 8 * b, 8 * b)?,
            upconv2: upconv2x2(loader, "upconv2", 8 * b, 4 * b)?,
            d21: conv3x3(loader, "d21", 8 * b, 4 * b)?,
            d22: conv3x3(loader, "d22", 4 * b, 4 * b)?,
            upconv3: upconv2x2(loader, "upconv3", 4 * b, 2 * b)?,
            d31: conv3x3(loader, "d31", 4 * b, 2 * b)?,
            d32: conv3x3(loader, "d32", 2 * b, 2 * b)?,
            upconv4: upconv2x2(loader, "upconv4", 2 * b, b)?,
            d41: conv3x3(loader, "d41", 2 * b, b)?,
            d42: conv3x3(loader, "d42", b, b)?,
            outconv: conv1x1(loader, "outconv", b, out_channels)?,
        })
    }
}

impl ReconstructionModel for UNet {
    fn forward_pass(&self, input: &InternalDataRepresentation) -> InternalDataRepresentation {
        // Encoder
        debug!("encoder input {:?}", input.dim());
        let xe11 = relu(&self.e11.convolve(input));
        let xe12 = relu(&self.e12.convolve(&xe11));
        let xp1 = self.pool1.max_pool(&xe12);

        let xe21 = relu(&self.e21.convolve(&xp1));
        let xe22 = relu(&self.e22.convolve(&xe21));
        let xp2 = self.pool2.max_pool(&xe22);

        let xe31 = relu(&self.e31.convolve(&xp2));
        let xe32 = relu(&self.e32.convolve(&xe31));
        let xp3 = self.pool3.max_pool(&xe32);

        let xe41 = relu(&self.e41.convolve(&xp3));
        let xe42 = relu(&self.e42.convolve(&xe41));
        let xp4 = self.pool4.max_pool(&xe42);

        // Bottleneck
        debug!("bottleneck input {:?}", xp4.dim());
        let xe51 = relu(&self.e51.convolve(&xp4));
        let xe52 = relu(&self.e52.convolve(&xe51));

        // Decoder
        let xu1 = self.upconv1.transposed_convolve(&xe52);
        let xu11 = concat_skip(&xu1, &xe42);
        let xd11 = relu(&self.d11.convolve(&xu11));
        let xd12 = relu(&self.d12.convolve(&xd11));

        let xu2 = self.upconv2.transposed_convolve(&xd12);
        let xu22 = concat_skip(&xu2, &xe32);
        let xd21 = relu(&self.d21.convolve(&xu22));
        let xd22 = relu(&self.d22.convolve(&xd21));

        let xu3 = self.upconv3.transposed_convolve(&xd22);
        let xu33 = concat_skip(&xu3, &xe22);
        let xd31 = relu(&self.d31.convolve(&xu33));
        let xd32 = relu(&self.d32.convolve(&xd31));

        let xu4 = self.upconv4.transposed_convolve(&xd32);
        let xu44 = concat_skip(&xu4, &xe12);
        let xd41 = relu(&self.d41.convolve(&xu44));
        let xd42 = relu(&self.d42.convolve(&xd41));

        // Output projection, no activation
        let out = self.outconv.convolve(&xd42);
        debug!("output {:?}", out.dim());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weight_loader::WeightLoader;
    use crate::WeightPrecision;
    use ndarray::StrideShape;

    /// Hands out zeros for every requested parameter.
    struct ZeroLoader;

    impl WeightLoader for ZeroLoader {
        fn get_weight<D, Sh>(
            &mut self,
            _param_name: &str,
            shape: Sh,
        ) -> WeightResult<Array<WeightPrecision, D>>
        where
            D: Dimension,
            Sh: Into<StrideShape<D>>,
        {
            let shape: StrideShape<D> = shape.into();
            Ok(Array::zeros(shape.raw_dim().clone()))
        }
    }

    #[test]
    fn test_unet_shapes() {
        let model = UNet::with_base_channels(&mut ZeroLoader, 1, 1).unwrap();
        let input = Array::zeros((1, 32, 32));

        let output = model.forward_pass(&input);

        assert_eq!(output.dim(), (1, 32, 32));
        assert!(output.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_unet_shapes_odd_input() {
        // 40 is divisible by 8 but not by 16, so the fourth pooling stage
        // rounds up and the first upsampling overshoots by one row, which
        // the skip connection has to crop away.
        let model = UNet::with_base_channels(&mut ZeroLoader, 1, 1).unwrap();
        let input = Array::zeros((1, 40, 48));

        let output = model.forward_pass(&input);

        assert_eq!(output.dim(), (1, 40, 48));
    }

    #[test]
    fn test_unet_multiclass_output() {
        let model = UNet::with_base_channels(&mut ZeroLoader, 3, 1).unwrap();
        let input = Array::zeros((1, 16, 16));

        let output = model.forward_pass(&input);

        assert_eq!(output.dim(), (3, 16, 16));
    }

    #[test]
    fn test_unet_loads_npz_state_dict() {
        use crate::weight_loader::NpzWeightLoader;
        use ndarray_npy::NpzWriter;
        use std::fs::File;
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let path = dir.path().join("unet-weights.npz");
        let mut npz = NpzWriter::new(File::create(&path).unwrap());

        // base width 1 instance of the architecture, everything zero except
        // the output projection bias
        let convs = [
            ("e11", 1, 1),
            ("e12", 1, 1),
            ("e21", 1, 2),
            ("e22", 2, 2),
            ("e31", 2, 4),
            ("e32", 4, 4),
            ("e41", 4, 8),
            ("e42", 8, 8),
            ("e51", 8, 16),
            ("e52", 16, 16),
            ("d11", 16, 8),
            ("d12", 8, 8),
            ("d21", 8, 4),
            ("d22", 4, 4),
            ("d31", 4, 2),
            ("d32", 2, 2),
            ("d41", 2, 1),
            ("d42", 1, 1),
        ];
        for (name, c_in, c_out) in convs.iter() {
            let weight: ConvKernel = Array::zeros((*c_out, *c_in, 3, 3));
            npz.add_array(format!("{}.weight", name).as_str(), &weight)
                .unwrap();
            let bias: Array1<f32> = Array::zeros(*c_out);
            npz.add_array(format!("{}.bias", name).as_str(), &bias)
                .unwrap();
        }
        let upconvs = [
            ("upconv1", 16, 8),
            ("upconv2", 8, 4),
            ("upconv3", 4, 2),
            ("upconv4", 2, 1),
        ];
        for (name, c_in, c_out) in upconvs.iter() {
            let weight: ConvKernel = Array::zeros((*c_in, *c_out, 2, 2));
            npz.add_array(format!("{}.weight", name).as_str(), &weight)
                .unwrap();
            let bias: Array1<f32> = Array::zeros(*c_out);
            npz.add_array(format!("{}.bias", name).as_str(), &bias)
                .unwrap();
        }
        let out_weight: ConvKernel = Array::zeros((1, 1, 1, 1));
        npz.add_array("outconv.weight", &out_weight).unwrap();
        npz.add_array("outconv.bias", &array![0.5f32]).unwrap();
        npz.finish().unwrap();

        let mut loader = NpzWeightLoader::from_path(&path).unwrap();
        let model = UNet::with_base_channels(&mut loader, 1, 1).unwrap();

        let output = model.forward_pass(&Array::zeros((1, 16, 16)));

        assert_eq!(output.dim(), (1, 16, 16));
        // only the output projection bias survives all the zero weights
        assert!(output.iter().all(|&x| x == 0.5));

        dir.close().unwrap();
    }

    #[test]
    fn test_concat_skip_crops_oversized_map() {
        let upsampled = Array::ones((2, 5, 4));
        let encoder = Array::zeros((3, 4, 4));

        let merged = concat_skip(&upsampled, &encoder);

        assert_eq!(merged.dim(), (5, 4, 4));
        // upsampled channels first, encoder channels after
        assert_eq!(merged[[0, 0, 0]], 1.0);
        assert_eq!(merged[[2, 0, 0]], 0.0);
    }
}

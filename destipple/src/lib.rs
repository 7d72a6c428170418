use image::{DynamicImage, GrayImage};
use ndarray::Array2;
use nshare::ToNdarray2;

/// Turns an ndarray into a grayscale image.
///
/// Adapted from <https://stackoverflow.com/questions/56762026/how-to-save-ndarray-in-rust-as-image>
pub fn array_to_gray_image(arr: Array2<u8>) -> GrayImage {
    // (H, W) row-major is exactly the memory order from_raw expects
    assert!(arr.is_standard_layout());

    let (height, width) = arr.dim();
    let raw = arr.into_raw_vec();

    GrayImage::from_raw(width as u32, height as u32, raw)
        .expect("container should have the right size for the image dimensions")
}

/// Returns the image as pre-scaled grayscale array, ready to be put into
/// the network
pub fn image_to_gray_array(img: &DynamicImage) -> Array2<f32> {
    img.to_luma8().into_ndarray2().map(|x| *x as f32 / 255.0)
}

/// Turns output from the neural net into a pixel value, performs postprocessing
pub fn to_pixel(x: &f32) -> u8 {
    (x.clamp(0.0, 1.0) * 255.0).round() as u8
}

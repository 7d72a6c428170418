//! This crate ties in all the parts of the project and provides a clean
//! command line interface to reconstruct continuous-tone images from
//! stippled inputs.

use destipple::{array_to_gray_image, image_to_gray_array, to_pixel};
use env_logger::Builder;
use image::imageops::FilterType;
use image::io::Reader as ImageReader;
use ml::{
    models::{ReconstructionModel, UNet},
    weight_loader::{JsonWeightLoader, NpzWeightLoader},
};
use ndarray::{Array2, Axis};
use ndarray_npy::read_npy;
use nshare::ToNdarray2;
use quicli::prelude::*;
use std::ffi::OsStr;
use std::path::PathBuf;
use stippling::{dithering::DitherMethod, statistics::Statistics, Stippler};
use structopt::StructOpt;

/// Reconstructs a continuous-tone image from a stippled input
#[derive(Debug, StructOpt)]
struct ReconstructOpts {
    /// Path to the stippled input image
    #[structopt(parse(from_os_str))]
    image: PathBuf,
    /// Path to the network weights, a .npz or .json state dict export
    #[structopt(short = "w", long = "weights", parse(from_os_str))]
    weights: PathBuf,
    /// Output path, writes to "<input>-reconstructed.png" if not available
    #[structopt(short = "o", long = "output", parse(from_os_str))]
    output: Option<PathBuf>,
    /// Width the input is resized to before entering the network
    #[structopt(long = "width", default_value = "800")]
    width: u32,
    /// Height the input is resized to before entering the network
    #[structopt(long = "height", default_value = "592")]
    height: u32,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Stipples a continuous-tone image into a binary dot pattern
#[derive(Debug, StructOpt)]
struct StippleOpts {
    /// Path to the input image
    #[structopt(parse(from_os_str))]
    image: PathBuf,
    /// Output path, writes to "<input>-stippled.png" if not available
    #[structopt(short = "o", long = "output", parse(from_os_str))]
    output: Option<PathBuf>,
    /// Stippling method: floyd-steinberg, ordered or threshold
    #[structopt(
        short = "m",
        long = "method",
        default_value = "floyd-steinberg",
        parse(try_from_str)
    )]
    method: DitherMethod,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Prints statistics about the reconstruction quality
#[derive(Debug, StructOpt)]
struct StatsOpts {
    /// Path to the reference image
    #[structopt(parse(from_os_str))]
    reference: PathBuf,
    /// Path to the reconstructed image
    #[structopt(parse(from_os_str))]
    reconstruction: PathBuf,
    #[structopt(flatten)]
    verbosity: Verbosity,
}

/// Reconstruct continuous-tone images from stippled dot patterns using a
/// neural network.
#[derive(Debug, StructOpt)]
#[structopt(name = "Destipple")]
enum Destipple {
    #[structopt(
        name = "reconstruct",
        about = "Reconstructs a continuous-tone image from a stippled input using a neural network."
    )]
    Reconstruct(ReconstructOpts),
    #[structopt(
        name = "stipple",
        about = "Turns a continuous-tone image into a binary dot pattern, e.g. to produce network inputs."
    )]
    Stipple(StippleOpts),
    #[structopt(
        name = "statistics",
        about = "Prints out statistics comparing a reconstruction against its reference image to StdOut."
    )]
    Statistics(StatsOpts),
}

/// Trait for the subcommands that destipple uses
trait DestippleOpts {
    /// Performs the subcommand
    fn run(&self);
    /// Returns the verbosity command
    fn get_verbosity(&self) -> &Verbosity;
    /// Sets up logging
    fn setup_env_logger(&self) -> CliResult {
        let mut builder = Builder::from_default_env();

        builder
            .filter(None, self.get_verbosity().log_level().to_level_filter())
            .init();

        Ok(())
    }
}

impl DestippleOpts for ReconstructOpts {
    // Performs the reconstruction
    fn run(&self) {
        let img_data = get_image(&self.image, self.width, self.height);

        let model = match self.weights.extension().and_then(OsStr::to_str).unwrap() {
            "npz" => {
                let mut loader = NpzWeightLoader::from_path(&self.weights).unwrap();
                UNet::new(&mut loader, 1).unwrap()
            }
            "json" => {
                let mut loader = JsonWeightLoader::new(&self.weights).unwrap();
                UNet::new(&mut loader, 1).unwrap()
            }
            _ => panic!("Weight file had unrecognized type. Only .npz and .json are supported."),
        };

        // the network runs on (C, H, W) data with a single input channel
        let input = img_data.insert_axis(Axis(0));
        let reconstructed = model.forward_pass(&input);
        let gray = reconstructed.index_axis_move(Axis(0), 0);

        let image = array_to_gray_image(gray.map(|x| to_pixel(x)));

        let filepath = output_or_suffixed(&self.output, &self.image, "-reconstructed.png");
        image.save(&filepath).unwrap();
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl DestippleOpts for StippleOpts {
    // Performs the stippling
    fn run(&self) {
        let img = ImageReader::open(&self.image).unwrap().decode().unwrap();
        let img_data = image_to_gray_array(&img);

        let stippler: Box<dyn Stippler> = self.method.stippler();
        let stippled = stippler.stipple(&img_data);

        let image = array_to_gray_image(stippled.map(|x| to_pixel(x)));

        let filepath = output_or_suffixed(&self.output, &self.image, "-stippled.png");
        image.save(&filepath).unwrap();
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl DestippleOpts for StatsOpts {
    // Prints out statistics to StdOut
    fn run(&self) {
        let reference = get_image_raw(&self.reference);
        let reconstruction = get_image_raw(&self.reconstruction);
        let stats = Statistics::new(&reference, &reconstruction);
        println!("{}", stats);
    }

    fn get_verbosity(&self) -> &Verbosity {
        &self.verbosity
    }
}

impl DestippleOpts for Destipple {
    fn run(&self) {
        match self {
            Destipple::Reconstruct(c) => c.run(),
            Destipple::Stipple(c) => c.run(),
            Destipple::Statistics(c) => c.run(),
        }
    }

    fn get_verbosity(&self) -> &Verbosity {
        match self {
            Destipple::Reconstruct(c) => c.get_verbosity(),
            Destipple::Stipple(c) => c.get_verbosity(),
            Destipple::Statistics(c) => c.get_verbosity(),
        }
    }
}

/// Returns the preprocessed image from the path buffer, resized to the
/// network input size and scaled to [0, 1]. Arrays in .npy format are
/// passed through as-is.
fn get_image(im_path: &PathBuf, width: u32, height: u32) -> Array2<f32> {
    match im_path.extension().and_then(OsStr::to_str).unwrap() {
        "npy" => read_npy(im_path).unwrap(),
        "png" | "jpg" | "jpeg" => {
            let img = ImageReader::open(im_path)
                .unwrap()
                .decode()
                .unwrap()
                .resize_exact(width, height, FilterType::Triangle);
            image_to_gray_array(&img)
        }
        _ => panic!("Image had unrecognized type. Only .jpg, .png and .npy are supported."),
    }
}

/// Returns the image as raw grayscale values without preprocessing. Only
/// useable for actual images, not npy arrays.
fn get_image_raw(im_path: &PathBuf) -> Array2<u8> {
    ImageReader::open(im_path)
        .unwrap()
        .decode()
        .unwrap()
        .to_luma8()
        .into_ndarray2()
}

/// Returns the explicit output path if given, otherwise derives one from
/// the input by appending the suffix to the file stem.
fn output_or_suffixed(output: &Option<PathBuf>, input: &PathBuf, suffix: &str) -> PathBuf {
    match output {
        Some(p) => p.clone(),
        None => {
            let stem = input.file_stem().unwrap();
            let new_filename = stem.to_str().unwrap().to_owned() + suffix;
            input.parent().unwrap().join(new_filename)
        }
    }
}

fn main() -> CliResult {
    let args = Destipple::from_args();
    args.setup_env_logger()?;
    args.run();
    Ok(())
}

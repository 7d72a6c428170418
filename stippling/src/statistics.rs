use ndarray::*;
use std::fmt::Display;

type GrayImageRaw = Array2<u8>;

fn mse(orig: &GrayImageRaw, rec: &GrayImageRaw) -> f64 {
    let orig_f = orig.mapv(|a| a as f64);
    let rec_f = rec.mapv(|a| a as f64);
    (orig_f - rec_f).mapv(|a| a.powi(2)).sum() / (orig.len() as f64)
}

fn calc_psnr(orig: &GrayImageRaw, rec: &GrayImageRaw) -> f64 {
    debug_assert_eq!(orig.len(), rec.len());
    let max_sq = (255f64).powi(2);
    10.0 * (max_sq / mse(orig, rec)).log10()
}

/// Quality of a reconstruction, measured against the reference image it
/// should reproduce.
pub struct Statistics {
    pub psnr: f64,
    pub mse: f64,
}

impl Statistics {
    pub fn new(reference: &GrayImageRaw, reconstruction: &GrayImageRaw) -> Statistics {
        Statistics {
            psnr: calc_psnr(reference, reconstruction),
            mse: mse(reference, reconstruction),
        }
    }
}

impl Display for Statistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PSNR: {} dB\nMSE: {}", self.psnr, self.mse)
    }
}

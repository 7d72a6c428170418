use thiserror::Error;

#[derive(Error, Debug)]
pub enum StipplingError {
    #[error("Unknown stippling method \"{0}\". Available: floyd-steinberg, ordered, threshold.")]
    UnknownMethod(String),
}

use crate::WeightPrecision;
use ndarray::{Array, Dimension, ErrorKind, ShapeError, StrideShape};
use ndarray_npy::{NpzReader, ReadNpzError};
use serde_json::{self, Map, Value};
use std::io::{Read, Seek};
use std::{fs, fs::File, path::Path};
use thiserror::Error;

pub type WeightResult<T> = Result<T, WeightError>;

#[derive(Error, Debug)]
pub enum WeightError {
    #[error("No weights with name {0} found")]
    WeightKeyError(String),
    #[error("Weight file didn't have the correct format (required: JSON dict of pairs (key, flattened array of weights))")]
    WeightFormatError,
    #[error("Weight file not found. Filesystem reported error\n {0}.")]
    WeightFileNotFoundError(#[from] std::io::Error),
    #[error("Weight file not readable. Filesystem reported error\n {0}.")]
    WeightFileNpzError(#[from] ReadNpzError),
    #[error("Wrong shape for weight:\n {0}.")]
    WeightShapeError(#[from] ShapeError),
}

/// Source of pretrained network parameters. Implementations hand out single
/// parameter arrays by their state dict name (e.g. "e11.weight").
pub trait WeightLoader {
    fn get_weight<D, Sh>(
        &mut self,
        param_name: &str,
        shape: Sh,
    ) -> WeightResult<Array<WeightPrecision, D>>
    where
        D: Dimension,
        Sh: Into<StrideShape<D>>;
}

/// Loads weights from a JSON dict of flattened weight arrays
/// (all arrays have the same nesting depth that way, which keeps the
/// export script trivial).
pub struct JsonWeightLoader {
    content: Map<String, Value>,
}

impl JsonWeightLoader {
    pub fn new<P: AsRef<Path>>(path: P) -> WeightResult<JsonWeightLoader> {
        let raw_file = fs::read_to_string(path)?;
        let parsed: Value =
            serde_json::from_str(&raw_file).map_err(|_| WeightError::WeightFormatError)?;
        let content = parsed
            .as_object()
            .ok_or(WeightError::WeightFormatError)?
            .clone();
        Ok(JsonWeightLoader { content })
    }
}

impl WeightLoader for JsonWeightLoader {
    /// Returns weights with the given name, reshaped from their flattened
    /// form to the requested shape.
    fn get_weight<D, Sh>(
        &mut self,
        param_name: &str,
        shape: Sh,
    ) -> WeightResult<Array<WeightPrecision, D>>
    where
        D: Dimension,
        Sh: Into<StrideShape<D>>,
    {
        let raw_arr = self
            .content
            .get(param_name)
            .ok_or_else(|| WeightError::WeightKeyError(param_name.to_string()))?;

        let raw_value_vector = match raw_arr {
            Value::Array(v) => v,
            _ => return Err(WeightError::WeightFormatError),
        };

        let weight_vector: Result<Vec<_>, _> = raw_value_vector
            .iter()
            .map(|j| {
                j.as_f64()
                    .map(|v| v as f32)
                    .ok_or(WeightError::WeightFormatError)
            })
            .collect();

        let weights = Array::from_shape_vec(shape, weight_vector?)?;

        Ok(weights)
    }
}

/// Loads weights from an uncompressed .npz file, the format our state dict
/// export script writes.
pub struct NpzWeightLoader<R>
where
    R: Seek + Read,
{
    reader: NpzReader<R>,
}

impl NpzWeightLoader<File> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> WeightResult<NpzWeightLoader<File>> {
        let handle = File::open(path)?;
        Ok(NpzWeightLoader {
            reader: NpzReader::new(handle)?,
        })
    }
}

impl<R> WeightLoader for NpzWeightLoader<R>
where
    R: Seek + Read,
{
    fn get_weight<D, Sh>(
        &mut self,
        param_name: &str,
        shape: Sh,
    ) -> WeightResult<Array<WeightPrecision, D>>
    where
        D: Dimension,
        Sh: Into<StrideShape<D>>,
    {
        let arr: Array<WeightPrecision, D> = self.reader.by_name(param_name)?;

        // The .npz archive already stores the shapes, the requested shape
        // only serves as a consistency check here.
        if &arr.raw_dim() != shape.into().raw_dim() {
            return Err(WeightError::WeightShapeError(ShapeError::from_kind(
                ErrorKind::IncompatibleShape,
            )));
        }
        Ok(arr)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use super::*;
    use ndarray::{array, Array1, Array2};
    use tempfile::tempdir;

    #[test]
    fn test_json_weight_loader() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("temp-weights.txt");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            // Rust escapes curly braces by doubling them
            "{{ \"arr1\": [0.0, 1e-3, 1.0], \"arr2\": [0.0, 1.0, 2.0, 3.0]}}"
        )
        .unwrap();

        let mut loader = JsonWeightLoader::new(&file_path).unwrap();

        assert_eq!(
            loader.get_weight("arr1", 3).unwrap(),
            array![0.0, 1e-3, 1.0]
        );
        assert_eq!(
            loader.get_weight("arr2", (2, 2)).unwrap(),
            array![[0.0, 1.0], [2.0, 3.0]]
        );

        drop(file);
        dir.close().unwrap();
    }

    #[test]
    fn test_json_weight_loader_missing_key() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("temp-weights.txt");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "{{ \"arr1\": [0.0]}}").unwrap();

        let mut loader = JsonWeightLoader::new(&file_path).unwrap();
        let res: WeightResult<Array1<f32>> = loader.get_weight("nonexistent", 1);

        assert!(matches!(res, Err(WeightError::WeightKeyError(_))));

        drop(file);
        dir.close().unwrap();
    }

    #[test]
    fn test_npz_weight_loader() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("temp-weights.npz");
        let file = File::create(&file_path).unwrap();
        let mut npz = ndarray_npy::NpzWriter::new(file);
        let a: Array2<f32> = array![[1., 2., 3.], [4., 5., 6.]];
        let b: Array1<f32> = array![7., 8., 9.];
        npz.add_array("a", &a).unwrap();
        npz.add_array("b", &b).unwrap();
        npz.finish().unwrap();

        let mut loader = NpzWeightLoader::from_path(&file_path).unwrap();

        assert_eq!(loader.get_weight("a", (2, 3)).unwrap(), a);
        assert_eq!(loader.get_weight("b", 3).unwrap(), b);

        dir.close().unwrap();
    }

    #[test]
    fn test_npz_weight_loader_shape_mismatch() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("temp-weights.npz");
        let file = File::create(&file_path).unwrap();
        let mut npz = ndarray_npy::NpzWriter::new(file);
        let a: Array1<f32> = array![1., 2., 3.];
        npz.add_array("a", &a).unwrap();
        npz.finish().unwrap();

        let mut loader = NpzWeightLoader::from_path(&file_path).unwrap();
        let res: WeightResult<Array1<f32>> = loader.get_weight("a", 4);

        assert!(matches!(res, Err(WeightError::WeightShapeError(_))));

        dir.close().unwrap();
    }
}

//! NPZ persistence of volumes and pickled scan summaries
//!
//! Masks are stored as `u8` 0/1 arrays and frame validity as `i8` codes, the
//! conversions happen here only.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use nalgebra as na;
use ndarray::{Array1, Array3};
use npyz::npz::{NpzArchive, NpzWriter};
use npyz::WriterBuilder;
use serde::Serialize;

use crate::error::{DataShapeError, Error, Result};
use crate::volume::{dims, FrameValidity, PadWidth, QAxes};

type Archive = NpzArchive<BufReader<File>>;

/// Reads the array `name` with its shape, `None` if it is not in the archive
fn read<T: npyz::Deserialize>(archive: &mut Archive, name: &str) -> Result<Option<(Vec<u64>, Vec<T>)>> {
    match archive.by_name(name)? {
        Some(npy) => {
            if npy.order() != npyz::Order::C {
                return Err(DataShapeError::Array {
                    name: name.to_string(),
                    shape: npy.shape().to_vec(),
                    expected: "C ordered values",
                }
                .into());
            }
            let shape = npy.shape().to_vec();
            Ok(Some((shape, npy.into_vec()?)))
        }
        None => Ok(None),
    }
}

fn into_array3<T>(name: &str, shape: Vec<u64>, values: Vec<T>) -> Result<Array3<T>> {
    if shape.len() != 3 {
        return Err(DataShapeError::Array {
            name: name.to_string(),
            shape,
            expected: "3 dimensions",
        }
        .into());
    }
    let dim = (shape[0] as usize, shape[1] as usize, shape[2] as usize);
    Array3::from_shape_vec(dim, values).map_err(|_| {
        DataShapeError::Array {
            name: name.to_string(),
            shape,
            expected: "as many values as voxels",
        }
        .into()
    })
}

fn required<T>(path: &Path, name: &str, array: Option<T>) -> Result<T> {
    array.ok_or_else(|| Error::MissingArray(name.to_string(), path.display().to_string()))
}

fn read_volume(archive: &mut Archive, path: &Path, name: &str) -> Result<Array3<f64>> {
    let (shape, values) = required(path, name, read::<f64>(archive, name)?)?;
    into_array3(name, shape, values)
}

fn read_axis(archive: &mut Archive, path: &Path, name: &str) -> Result<Array1<f64>> {
    let (shape, values) = required(path, name, read::<f64>(archive, name)?)?;
    if shape.len() != 1 {
        return Err(DataShapeError::Array {
            name: name.to_string(),
            shape,
            expected: "1 dimension",
        }
        .into());
    }
    Ok(Array1::from(values))
}

/// Detector frames of a rocking scan
#[derive(Debug, Clone)]
pub struct DetectorScan {
    pub data: Array3<f64>,
    pub mask: Array3<bool>,
    pub frames: FrameValidity,
}
impl DetectorScan {
    /// Loads `data` and the optional `mask` and `frames` arrays
    ///
    /// A missing mask leaves every voxel valid, missing frames are all used.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::info!("loading detector scan from {:?}", path);
        let mut archive = NpzArchive::open(path)?;
        let data = read_volume(&mut archive, path, "data")?;
        let mask = match read::<u8>(&mut archive, "mask")? {
            Some((shape, values)) => into_array3("mask", shape, values)?.mapv(|m| m != 0),
            None => Array3::from_elem(data.dim(), false),
        };
        let frames = match read::<i8>(&mut archive, "frames")? {
            Some((_, codes)) => FrameValidity::from_codes(&codes)?,
            None => FrameValidity::all_used(dims(&data)[0]),
        };
        Ok(Self { data, mask, frames })
    }
}

/// Modulus and phase of a reconstructed object on an orthonormal grid
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub modulus: Array3<f64>,
    pub phase: Array3<f64>,
    pub q: QAxes,
}
impl Reconstruction {
    /// Loads the `modulus`, `phase`, `qx`, `qz` and `qy` arrays
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::info!("loading reconstruction from {:?}", path);
        let mut archive = NpzArchive::open(path)?;
        let modulus = read_volume(&mut archive, path, "modulus")?;
        let phase = read_volume(&mut archive, path, "phase")?;
        let q = QAxes::new(
            read_axis(&mut archive, path, "qx")?,
            read_axis(&mut archive, path, "qz")?,
            read_axis(&mut archive, path, "qy")?,
        );
        q.check_shape(dims(&modulus))?;
        Ok(Self { modulus, phase, q })
    }
}

/// NPZ archive being written
pub struct NpzOutput {
    npz: NpzWriter<BufWriter<File>>,
}
impl NpzOutput {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        log::info!("writing {:?}", path.as_ref());
        Ok(Self {
            npz: NpzWriter::create(path)?,
        })
    }
    /// Adds the array `name` of `shape`, values in C order
    pub fn array<T, I>(&mut self, name: &str, shape: &[u64], values: I) -> Result<&mut Self>
    where
        T: npyz::AutoSerialize,
        I: IntoIterator<Item = T>,
    {
        let mut writer = self
            .npz
            .array(name, Default::default())
            .map_err(io::Error::from)?
            .default_dtype()
            .shape(shape)
            .begin_nd()?;
        for value in values {
            writer.push(&value)?;
        }
        writer.finish()?;
        Ok(self)
    }
    pub fn volume(&mut self, name: &str, volume: &Array3<f64>) -> Result<&mut Self> {
        let shape = dims(volume).map(|n| n as u64);
        self.array(name, &shape, volume.iter().copied())
    }
    pub fn mask(&mut self, name: &str, mask: &Array3<bool>) -> Result<&mut Self> {
        let shape = dims(mask).map(|n| n as u64);
        self.array(name, &shape, mask.iter().map(|&m| m as u8))
    }
    pub fn frames(&mut self, frames: &FrameValidity) -> Result<&mut Self> {
        let codes = frames.codes();
        self.array("frames", &[codes.len() as u64], codes)
    }
    pub fn q_axes(&mut self, q: &QAxes) -> Result<&mut Self> {
        for (axis, name) in ["qx", "qz", "qy"].into_iter().enumerate() {
            let values = q.axis(axis);
            self.array(name, &[values.len() as u64], values.iter().copied())?;
        }
        Ok(self)
    }
    pub fn pad_width(&mut self, pad_width: &PadWidth) -> Result<&mut Self> {
        self.array("pad_width", &[6], pad_width.iter().map(|&w| w as u64))
    }
    pub fn vector(&mut self, name: &str, vector: &[f64]) -> Result<&mut Self> {
        self.array(name, &[vector.len() as u64], vector.iter().copied())
    }
    /// 3×3 matrix in row major order
    pub fn matrix(&mut self, name: &str, matrix: &na::Matrix3<f64>) -> Result<&mut Self> {
        let rows = (0..3).flat_map(|i| (0..3).map(move |j| matrix[(i, j)]));
        self.array(name, &[3, 3], rows)
    }
}

/// Pickles `summary` into `path`
pub fn save_summary<T: Serialize, P: AsRef<Path>>(summary: &T, path: P) -> Result<()> {
    let mut file = File::create(path)?;
    serde_pickle::to_writer(&mut file, summary, Default::default())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("bragg-cdi-{}-{}", std::process::id(), name))
    }

    #[test]
    fn detector_scan() {
        let path = scratch("scan.npz");
        let data = Array3::from_shape_fn((3, 4, 5), |(i, j, k)| (i * 100 + j * 10 + k) as f64);
        let mut mask = Array3::from_elem((3, 4, 5), false);
        mask[[1, 2, 3]] = true;
        NpzOutput::create(&path)
            .unwrap()
            .volume("data", &data)
            .unwrap()
            .mask("mask", &mask)
            .unwrap()
            .frames(&FrameValidity::from_codes(&[0, 1, 1, 1, 0]).unwrap())
            .unwrap();
        let scan = DetectorScan::load(&path).unwrap();
        assert_eq!(scan.data, data);
        assert_eq!(scan.mask, mask);
        assert_eq!(scan.frames.codes(), vec![0, 1, 1, 1, 0]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_arrays() {
        let path = scratch("partial.npz");
        let data = Array3::<f64>::zeros((2, 2, 2));
        NpzOutput::create(&path)
            .unwrap()
            .volume("modulus", &data)
            .unwrap();
        assert!(matches!(
            Reconstruction::load(&path),
            Err(Error::MissingArray(name, _)) if name == "phase"
        ));
        let scan = DetectorScan::load(&path);
        assert!(matches!(scan, Err(Error::MissingArray(name, _)) if name == "data"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn pickled_summary() {
        let path = scratch("summary.pkl");
        save_summary(&vec![1f64, 2.], &path).unwrap();
        let file = File::open(&path).unwrap();
        let values: Vec<f64> = serde_pickle::from_reader(file, Default::default()).unwrap();
        assert_eq!(values, vec![1., 2.]);
        std::fs::remove_file(path).ok();
    }
}

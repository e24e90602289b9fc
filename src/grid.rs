//! Regridding of detector frame data onto an orthonormal reciprocal space grid
//!
//! Two [Gridder]s are available: [LinearizedGridder] works in the laboratory
//! frame with the tangent of the pixel to q mapping at the center of the
//! volume, [ExactGridder] maps every pixel of every frame into the crystal
//! frame and resamples the scattered points.

use std::fmt;

use nalgebra as na;
use ndarray::Array3;
use serde::Serialize;
use strum_macros::{EnumString, VariantNames};

use crate::context::ScanContext;
use crate::detector::DetectorSampling;
use crate::error::Result;
use crate::geometry::{Geometry, ReferenceAxis};
use crate::volume::{check_mask, dims, FrameValidity, QAxes};

mod exact;
mod linearized;
pub use exact::ExactGridder;
pub use linearized::LinearizedGridder;

/// Regridding strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString, VariantNames)]
pub enum InterpolationMethod {
    /// linearized transform in the laboratory frame
    #[strum(serialize = "linearized", serialize = "lab")]
    Linearized,
    /// exact per-pixel mapping in the crystal frame
    #[strum(serialize = "exact", serialize = "crystal")]
    Exact,
}
impl fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpolationMethod::Linearized => write!(f, "linearized (laboratory frame)"),
            InterpolationMethod::Exact => write!(f, "exact (crystal frame)"),
        }
    }
}
impl InterpolationMethod {
    /// The gridder implementing the method
    pub fn gridder(&self, align_q: Option<ReferenceAxis>) -> Box<dyn Gridder> {
        match self {
            InterpolationMethod::Linearized => Box::new(LinearizedGridder::new(align_q)),
            InterpolationMethod::Exact => Box::new(ExactGridder::new(align_q)),
        }
    }
}

/// Volume sampled in the detector frame, one rocking angle per frame
#[derive(Debug)]
pub struct DetectorVolume<'a> {
    pub data: &'a Array3<f64>,
    pub mask: &'a Array3<bool>,
    /// rocking angle of each frame in degrees
    pub angles: Vec<f64>,
    pub sampling: DetectorSampling,
    /// detector pixel of the voxels `[.., 0, 0]` in the region of interest frame
    pub origin: [i64; 2],
}
impl<'a> DetectorVolume<'a> {
    /// Checks the companions of `data` and derives the rocking angles from `frames`
    pub fn new(
        data: &'a Array3<f64>,
        mask: &'a Array3<bool>,
        frames: &FrameValidity,
        geometry: &Geometry,
        sampling: DetectorSampling,
        origin: [i64; 2],
    ) -> Result<Self> {
        check_mask(data, mask)?;
        frames.check_extent(dims(data)[0])?;
        Ok(Self {
            data,
            mask,
            angles: frames.frame_angles(geometry.rocking_start, geometry.rocking_step),
            sampling,
            origin,
        })
    }
    pub fn shape(&self) -> [usize; 3] {
        dims(self.data)
    }
    /// Index of the central voxel
    pub fn center(&self) -> [usize; 3] {
        self.shape().map(|n| n / 2)
    }
    /// Scattering vector of voxel `index` in the frame of the sample rotated
    /// by `angle - reference` degrees
    pub fn q(
        &self,
        geometry: &Geometry,
        index: [usize; 3],
        reference: f64,
    ) -> Result<na::Vector3<f64>> {
        let [row, column] = self.sampling.pixel_center(
            (index[1] as i64 + self.origin[0]) as f64,
            (index[2] as i64 + self.origin[1]) as f64,
        );
        Ok(geometry.q_sample(row, column, self.angles[index[0]], reference)?)
    }
}

/// Volume regridded on an orthonormal reciprocal space grid
#[derive(Debug, Clone)]
pub struct Orthogonalized {
    pub data: Array3<f64>,
    pub mask: Array3<bool>,
    pub q: QAxes,
    /// transformation from detector voxel index offsets to q (laboratory frame only)
    pub transform: Option<na::Matrix3<f64>>,
    /// scattering vector at the center of the detector volume
    pub q_bragg: na::Vector3<f64>,
}

/// Reciprocal space regridding
pub trait Gridder {
    fn method(&self) -> InterpolationMethod;
    fn grid(
        &self,
        volume: &DetectorVolume,
        geometry: &Geometry,
        ctx: &ScanContext,
    ) -> Result<Orthogonalized>;
}

/// Values of `n` evenly spaced grid points from `min` to `max` included
pub(crate) fn axis_values(min: f64, max: f64, n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![min; n];
    }
    let step = (max - min) / (n - 1) as f64;
    (0..n).map(|i| min + i as f64 * step).collect()
}

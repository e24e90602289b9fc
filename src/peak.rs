//! Bragg peak localization
//!
//! The peak is searched in the cropped and binned array with three
//! estimators, the positions are reported in the full, unbinned detector
//! frame.

use std::fmt;

use ndarray::{Array3, Axis};
use serde::Serialize;
use strum_macros::{EnumString, VariantNames};

use crate::context::ScanContext;
use crate::detector::{DetectorFrame, DetectorSampling, PeakPosition};
use crate::error::{self, ConfigurationError, DataShapeError, GeometryError};
use crate::volume::{center_of_mass, dims, integrated_intensity, FrameStatus, FrameValidity};

pub mod rocking_curve;
pub use rocking_curve::{FitError, NaturalSpline, RockingCurveFit};

/// Bragg peak localization methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, EnumString, VariantNames)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PeakMethod {
    /// maximum of the modulus
    Max,
    /// center of mass of the modulus
    Com,
    /// maximum along the rocking axis, center of mass in the detector plane
    MaxCom,
    /// position given by the user
    User,
    /// no peak search
    Skip,
}
impl fmt::Display for PeakMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeakMethod::Max => write!(f, "max"),
            PeakMethod::Com => write!(f, "com"),
            PeakMethod::MaxCom => write!(f, "max_com"),
            PeakMethod::User => write!(f, "user"),
            PeakMethod::Skip => write!(f, "skip"),
        }
    }
}

/// Peak positions in the full detector frame given by the three estimators
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeakEstimates {
    pub max: PeakPosition,
    pub com: PeakPosition,
    pub max_com: PeakPosition,
}
impl PeakEstimates {
    pub fn get(&self, method: PeakMethod) -> Option<PeakPosition> {
        match method {
            PeakMethod::Max => Some(self.max),
            PeakMethod::Com => Some(self.com),
            PeakMethod::MaxCom => Some(self.max_com),
            PeakMethod::User | PeakMethod::Skip => None,
        }
    }
}

/// Voxel of the largest finite absolute value, the first one on ties
fn argmax(array: &Array3<f64>) -> Option<[usize; 3]> {
    array
        .indexed_iter()
        .filter(|(_, v)| v.is_finite())
        .fold(None, |best: Option<((usize, usize, usize), f64)>, (idx, &v)| match best {
            Some((_, b)) if b >= v.abs() => best,
            _ => Some((idx, v.abs())),
        })
        .map(|((i, j, k), _)| [i, j, k])
}

fn round(position: [f64; 3]) -> [i64; 3] {
    position.map(|p| p.round() as i64)
}

/// Peak positions `[max, com, max_com]` in the array frame
fn estimators(
    intensity: &Array3<f64>,
    ctx: &ScanContext,
) -> Result<[[i64; 3]; 3], DataShapeError> {
    let max = argmax(intensity).ok_or(DataShapeError::Empty)?;
    ctx.info(format_args!("max at: {:?}, value = {:.0}", max, intensity[max]));
    let com = center_of_mass(&intensity.mapv(f64::abs))
        .map(round)
        .ok_or(DataShapeError::Empty)?;
    ctx.info(format_args!("center of mass at: {:?}", com));
    let frame = intensity.index_axis(Axis(0), max[0]).mapv(f64::abs);
    let max_com = center_of_mass(&frame.insert_axis(Axis(0)))
        .map(|[_, y, x]| [max[0] as i64, y.round() as i64, x.round() as i64])
        .ok_or(DataShapeError::Empty)?;
    ctx.info(format_args!("max_com at (z, y, x): {:?}", max_com));
    Ok([max.map(|i| i as i64), com, max_com])
}

/// Peak position in the array frame given by one of the estimators
pub fn locate(
    intensity: &Array3<f64>,
    method: PeakMethod,
    ctx: &ScanContext,
) -> error::Result<[i64; 3]> {
    let [max, com, max_com] = match method {
        PeakMethod::User | PeakMethod::Skip => {
            return Err(GeometryError::UndefinedPeak(method.to_string()).into())
        }
        _ => estimators(intensity, ctx)?,
    };
    Ok(match method {
        PeakMethod::Com => com,
        PeakMethod::MaxCom => max_com,
        _ => max,
    })
}

/// Bragg peak finder
///
/// # Example
/// ```
/// use bragg_cdi::{DetectorSampling, PeakFinder, Roi, Binning, ScanContext};
/// use ndarray::Array3;
///
/// let mut intensity = Array3::<f64>::zeros((8, 16, 16));
/// intensity[[4, 6, 9]] = 10.;
/// let sampling = DetectorSampling::new(Roi::full(16, 16), Binning::default());
/// let finder = PeakFinder::new("max", sampling)
///     .unwrap()
///     .search(&intensity, &ScanContext::default())
///     .unwrap();
/// assert_eq!(finder.bragg_peak().unwrap().index, [4, 6, 9]);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct PeakFinder {
    method: PeakMethod,
    sampling: DetectorSampling,
    user_peak: Option<[i64; 3]>,
    estimates: Option<PeakEstimates>,
}
impl PeakFinder {
    /// Creates a peak finder, `method` is one of `max`, `com`, `max_com`, `user` or `skip`
    pub fn new(method: &str, sampling: DetectorSampling) -> Result<Self, ConfigurationError> {
        Ok(Self::from_method(
            ConfigurationError::parse("peak method", method)?,
            sampling,
        ))
    }
    pub fn from_method(method: PeakMethod, sampling: DetectorSampling) -> Self {
        Self {
            method,
            sampling,
            user_peak: None,
            estimates: None,
        }
    }
    /// Sets the peak position in the full detector frame for the `user` method
    pub fn user_peak(self, position: [i64; 3]) -> Self {
        Self {
            user_peak: Some(position),
            ..self
        }
    }
    pub fn method(&self) -> PeakMethod {
        self.method
    }
    pub fn sampling(&self) -> &DetectorSampling {
        &self.sampling
    }
    pub fn estimates(&self) -> Option<&PeakEstimates> {
        self.estimates.as_ref()
    }
    /// Searches the peak of `intensity` with the three estimators
    ///
    /// The `user` and `skip` methods bypass the search.
    pub fn search(self, intensity: &Array3<f64>, ctx: &ScanContext) -> Result<Self, DataShapeError> {
        if matches!(self.method, PeakMethod::User | PeakMethod::Skip) {
            ctx.info(format_args!("peak search bypassed with method {}", self.method));
            return Ok(self);
        }
        let [max, com, max_com] = estimators(intensity, ctx)?;
        Ok(Self {
            estimates: Some(PeakEstimates {
                max: self.sampling.to_full_detector(max),
                com: self.sampling.to_full_detector(com),
                max_com: self.sampling.to_full_detector(max_com),
            }),
            ..self
        })
    }
    /// Bragg peak in the full detector frame according to the selected method
    pub fn bragg_peak(&self) -> Result<PeakPosition, GeometryError> {
        let undefined = || GeometryError::UndefinedPeak(self.method.to_string());
        match self.method {
            PeakMethod::Skip => Err(undefined()),
            PeakMethod::User => self
                .user_peak
                .map(|index| PeakPosition {
                    index,
                    frame: DetectorFrame::FullDetector,
                })
                .ok_or_else(undefined),
            method => self
                .estimates
                .and_then(|e| e.get(method))
                .ok_or_else(undefined),
        }
    }
    /// Bragg peak in the cropped and binned array
    pub fn roi_center(&self) -> Result<[i64; 3], GeometryError> {
        let peak = self.bragg_peak()?;
        Ok(self
            .sampling
            .convert(peak, DetectorFrame::RegionOfInterest)
            .index)
    }
    /// Interpolates the rocking curve of `intensity` and computes its width
    ///
    /// `tilt` holds the rocking angles of the measured frames, restricted to
    /// the used ones if `frames` is given, the frame numbers are used
    /// otherwise. Failures are logged and return `None`.
    pub fn fit_rocking_curve(
        &self,
        intensity: &Array3<f64>,
        tilt: Option<&[f64]>,
        frames: Option<&FrameValidity>,
        ctx: &ScanContext,
    ) -> Option<RockingCurveFit> {
        let curve = integrated_intensity(intensity).to_vec();
        let tilt_axis: Vec<f64> = match tilt {
            Some(tilt) => tilt.to_vec(),
            None => (0..curve.len()).map(|i| i as f64).collect(),
        };
        let mut x_axis = tilt_axis.clone();
        if let Some(frames) = frames {
            let measured: Vec<FrameStatus> = frames
                .statuses()
                .iter()
                .copied()
                .filter(|s| *s != FrameStatus::Synthetic)
                .collect();
            if measured.len() == x_axis.len() {
                x_axis = x_axis
                    .into_iter()
                    .zip(measured)
                    .filter_map(|(x, s)| (s == FrameStatus::Used).then_some(x))
                    .collect();
            }
        }
        let n_frames = dims(intensity)[0];
        match rocking_curve::fit(&x_axis, &curve, 5 * n_frames) {
            Ok(mut fit) => {
                fit.tilt_value_at_peak = self
                    .roi_center()
                    .ok()
                    .and_then(|[z, _, _]| usize::try_from(z).ok())
                    .and_then(|z| tilt_axis.get(z).copied());
                ctx.info(format_args!("FWHM by interpolation: {:.3}", fit.fwhm));
                Some(fit)
            }
            Err(e) => {
                ctx.warn(format_args!("rocking curve fit skipped: {}", e));
                None
            }
        }
    }
}

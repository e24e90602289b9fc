//! FFT size adapter
//!
//! Crops or pads the volume, its mask, the frame validity and the q axes to
//! FFT-compatible sizes around the Bragg peak or around the middle of the
//! volume. Every size is validated before any array is touched.

use ndarray::Array3;
use serde::Serialize;

use crate::context::ScanContext;
use crate::detector::{DetectorFrame, DetectorSampling, PeakPosition};
use crate::error::{ConfigurationError, GeometryError, Result};
use crate::fft_size::{higher_fft_size, is_fft_compatible, smaller_fft_size};
use crate::peak::{locate, PeakMethod};
use crate::volume::{check_mask, crop, dims, pad, FrameValidity, PadWidth, QAxes};

mod policy;
pub use policy::{AxisRule, FftPolicy};

/// How the center voxel of the adapter is found
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Centering {
    /// one of the peak estimators applied to the volume
    Estimator(PeakMethod),
    /// a voxel of the full, unbinned detector
    Fixed([i64; 3]),
}
impl Default for Centering {
    fn default() -> Self {
        Centering::Estimator(PeakMethod::Max)
    }
}

/// Resizing of one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisPlan {
    Keep,
    Crop { start: usize, stop: usize },
    Pad { before: usize, after: usize },
}
impl AxisPlan {
    fn range(&self, n: usize) -> (usize, usize) {
        match *self {
            AxisPlan::Crop { start, stop } => (start, stop),
            _ => (0, n),
        }
    }
    fn pad_width(&self) -> [usize; 2] {
        match *self {
            AxisPlan::Pad { before, after } => [before, after],
            _ => [0, 0],
        }
    }
    fn origin(&self) -> i64 {
        match *self {
            AxisPlan::Keep => 0,
            AxisPlan::Crop { start, .. } => start as i64,
            AxisPlan::Pad { before, .. } => -(before as i64),
        }
    }
}

/// Resized volume
#[derive(Debug, Clone)]
pub struct FftResult {
    pub data: Array3<f64>,
    pub mask: Array3<bool>,
    pub pad_width: PadWidth,
    pub frames: FrameValidity,
    pub q: Option<QAxes>,
    /// index in the input volume of the first voxel of the output volume
    pub origin: [i64; 3],
    /// the policy that was applied, `skip` if the symmetric box was degenerate
    pub policy: FftPolicy,
}

/// Crops and pads volumes to FFT-compatible sizes
#[derive(Debug, Clone)]
pub struct FftSizeAdapter {
    policy: FftPolicy,
    centering: Centering,
    pad_size: Option<[usize; 3]>,
    sampling: Option<DetectorSampling>,
}
impl FftSizeAdapter {
    /// Creates an adapter from a policy name, see [FftPolicy]
    pub fn new(policy: &str) -> std::result::Result<Self, ConfigurationError> {
        Ok(Self::from_policy(ConfigurationError::parse(
            "FFT policy",
            policy,
        )?))
    }
    pub fn from_policy(policy: FftPolicy) -> Self {
        Self {
            policy,
            centering: Centering::default(),
            pad_size: None,
            sampling: None,
        }
    }
    pub fn centering(self, centering: Centering) -> Self {
        Self { centering, ..self }
    }
    /// Output shape of the padded axes
    pub fn pad_size(self, pad_size: [usize; 3]) -> Self {
        Self {
            pad_size: Some(pad_size),
            ..self
        }
    }
    /// Region of interest and binning used to map a fixed peak into the volume
    pub fn sampling(self, sampling: DetectorSampling) -> Self {
        Self {
            sampling: Some(sampling),
            ..self
        }
    }
    pub fn policy(&self) -> FftPolicy {
        self.policy
    }
    /// Checks the requested pad sizes against the FFT requirements
    fn validate_pad_size(&self) -> std::result::Result<Option<[usize; 3]>, ConfigurationError> {
        if !self.policy.needs_pad_size() {
            return Ok(None);
        }
        let pad_size = self
            .pad_size
            .ok_or_else(|| ConfigurationError::MissingPadSize(self.policy.to_string()))?;
        for (axis, rule) in self.policy.rules().iter().enumerate() {
            let size = pad_size[axis];
            if *rule == AxisRule::PadPeak && !is_fft_compatible(size) {
                return Err(ConfigurationError::PadSizeNotFftCompatible {
                    axis,
                    size,
                    next: higher_fft_size(size),
                });
            }
        }
        Ok(Some(pad_size))
    }
    /// Center voxel in the volume frame
    fn center(&self, data: &Array3<f64>, ctx: &ScanContext) -> Result<[i64; 3]> {
        let center = match self.centering {
            Centering::Estimator(method) => locate(data, method, ctx)?,
            Centering::Fixed(index) => {
                ctx.info(format_args!(
                    "peak position defined by user on the full detector: {:?}",
                    index
                ));
                let position = PeakPosition {
                    index,
                    frame: DetectorFrame::FullDetector,
                };
                self.sampling
                    .map_or(position, |s| {
                        s.convert(position, DetectorFrame::RegionOfInterest)
                    })
                    .index
            }
        };
        let shape = dims(data);
        if center
            .iter()
            .zip(shape.iter())
            .any(|(&c, &n)| c < 0 || c >= n as i64)
        {
            return Err(GeometryError::PeakOutOfBounds {
                position: center,
                shape,
            }
            .into());
        }
        Ok(center)
    }
    /// Computes the resizing of every axis
    fn plan(
        &self,
        shape: [usize; 3],
        center: [i64; 3],
        symmetric_box: [usize; 3],
        pad_size: Option<[usize; 3]>,
    ) -> Result<[AxisPlan; 3]> {
        let mut plan = [AxisPlan::Keep; 3];
        for (axis, rule) in self.policy.rules().into_iter().enumerate() {
            let n = shape[axis];
            let c = center[axis];
            plan[axis] = match rule {
                AxisRule::Keep => AxisPlan::Keep,
                AxisRule::CropPeak => {
                    let n1 = smaller_fft_size(symmetric_box[axis])
                        .ok_or(GeometryError::DegenerateBox(symmetric_box))?;
                    let half = (n1 / 2) as i64;
                    AxisPlan::Crop {
                        start: (c - half) as usize,
                        stop: (c + half) as usize,
                    }
                }
                AxisRule::CropCenter => match smaller_fft_size(n) {
                    Some(n1) => {
                        let start = n / 2 - n1 / 2;
                        let stop = start + n1;
                        if c < start as i64 || c >= stop as i64 {
                            return Err(GeometryError::PeakDiscarded {
                                axis,
                                start: start as i64,
                                stop: stop as i64,
                                peak: c,
                            }
                            .into());
                        }
                        AxisPlan::Crop { start, stop }
                    }
                    None => AxisPlan::Keep,
                },
                AxisRule::PadPeak => {
                    let target = pad_size
                        .map(|p| p[axis])
                        .ok_or_else(|| ConfigurationError::MissingPadSize(self.policy.to_string()))?;
                    if target < n {
                        return Err(ConfigurationError::PadSizeTooSmall {
                            axis,
                            size: target,
                            extent: n,
                        }
                        .into());
                    }
                    let room = (target - n) as i64;
                    let before = (target as i64 / 2 - c).clamp(0, room) as usize;
                    AxisPlan::Pad {
                        before,
                        after: target - n - before,
                    }
                }
                AxisRule::PadCenter => {
                    let d = higher_fft_size(n) - n;
                    AxisPlan::Pad {
                        before: d - d / 2,
                        after: d / 2,
                    }
                }
            };
        }
        Ok(plan)
    }
    /// Crops or pads the volume and its companions
    ///
    /// `frames` must have as many active frames as the first axis of `data`,
    /// `q` must match the shape of `data`.
    pub fn apply(
        &self,
        data: &Array3<f64>,
        mask: &Array3<bool>,
        frames: &FrameValidity,
        q: Option<&QAxes>,
        ctx: &ScanContext,
    ) -> Result<FftResult> {
        let shape = dims(data);
        check_mask(data, mask)?;
        frames.check_extent(shape[0])?;
        if let Some(q) = q {
            q.check_shape(shape)?;
        }
        let pad_size = self.validate_pad_size()?;
        let identity = || FftResult {
            data: data.clone(),
            mask: mask.clone(),
            pad_width: [0; 6],
            frames: frames.clone(),
            q: q.cloned(),
            origin: [0; 3],
            policy: FftPolicy::Skip,
        };
        if self.policy == FftPolicy::Skip {
            return Ok(identity());
        }

        let center = self.center(data, ctx)?;
        ctx.info(format_args!("FFT center (z, y, x): {:?}", center));
        let symmetric_box: [usize; 3] =
            [0, 1, 2].map(|i| 2 * (center[i] as usize).min(shape[i] - center[i] as usize));
        ctx.info(format_args!(
            "max symmetrical box (qx, qz, qy): {:?}",
            symmetric_box
        ));
        if symmetric_box.contains(&0) {
            ctx.info(format_args!(
                "empty images or hot pixel at the border, defaulting FFT policy to skip"
            ));
            return Ok(identity());
        }
        let plan = self.plan(shape, center, symmetric_box, pad_size)?;

        let ranges = [0, 1, 2].map(|i| plan[i].range(shape[i]));
        let [[b0, a0], [b1, a1], [b2, a2]] = plan.map(|p| p.pad_width());
        let pad_width = [b0, a0, b1, a1, b2, a2];
        let data = pad(&crop(data, &ranges), &pad_width, 0.);
        let mask = pad(&crop(mask, &ranges), &pad_width, true);

        let mut frames = frames.clone();
        match plan[0] {
            AxisPlan::Crop { start, stop } => frames.crop(start, stop),
            AxisPlan::Pad { before, after } => frames.pad(before, after),
            AxisPlan::Keep => (),
        }
        let q = match q {
            Some(q) => {
                let mut q = q.clone();
                for (axis, p) in plan.iter().enumerate() {
                    match *p {
                        AxisPlan::Crop { start, stop } => q.crop(axis, start, stop),
                        AxisPlan::Pad { before, after } => q.extend(axis, before, after)?,
                        AxisPlan::Keep => (),
                    }
                }
                Some(q)
            }
            None => None,
        };
        ctx.info(format_args!("FFT box (qx, qz, qy): {:?}", dims(&data)));
        Ok(FftResult {
            origin: plan.map(|p| p.origin()),
            data,
            mask,
            pad_width,
            frames,
            q,
            policy: self.policy,
        })
    }
}

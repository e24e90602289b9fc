//! Volumes, masks, frame validity and reciprocal space axes
//!
//! Volumes are `(rocking, vertical, horizontal)` arrays. A mask has the shape
//! of its volume and flags invalid voxels with `true`.

use std::f64::consts::PI;

use itertools::{Itertools, MinMaxResult};
use ndarray::{s, Array1, Array3, ArrayView1, Axis, Zip};
use serde::Serialize;

use crate::error::{ConfigurationError, DataShapeError};

/// Pad widths `[before_0, after_0, before_1, after_1, before_2, after_2]`
pub type PadWidth = [usize; 6];

/// Shape of a 3D array as an array
pub fn dims<T>(a: &Array3<T>) -> [usize; 3] {
    let (n0, n1, n2) = a.dim();
    [n0, n1, n2]
}

/// Checks that `mask` has the shape of `volume`
pub fn check_mask<T>(volume: &Array3<T>, mask: &Array3<bool>) -> Result<(), DataShapeError> {
    if volume.dim() != mask.dim() {
        return Err(DataShapeError::Mask {
            volume: dims(volume),
            mask: dims(mask),
        });
    }
    Ok(())
}

/// Pads `a` with `value`
pub fn pad<T: Clone>(a: &Array3<T>, pad_width: &PadWidth, value: T) -> Array3<T> {
    let [n0, n1, n2] = dims(a);
    let [b0, a0, b1, a1, b2, a2] = *pad_width;
    let mut padded = Array3::from_elem((b0 + n0 + a0, b1 + n1 + a1, b2 + n2 + a2), value);
    padded
        .slice_mut(s![b0..b0 + n0, b1..b1 + n1, b2..b2 + n2])
        .assign(a);
    padded
}

/// Crops `a` to the half-open index ranges `[start, stop)` of each axis
pub fn crop<T: Clone>(a: &Array3<T>, ranges: &[(usize, usize); 3]) -> Array3<T> {
    let [(i0, i1), (j0, j1), (k0, k1)] = *ranges;
    a.slice(s![i0..i1, j0..j1, k0..k1]).to_owned()
}

/// Circular shift of `a` by `shift` voxels along each axis
pub fn roll<T: Clone>(a: &Array3<T>, shift: [isize; 3]) -> Array3<T> {
    let [n0, n1, n2] = dims(a);
    let source = |i: usize, s: isize, n: usize| (i as isize - s).rem_euclid(n as isize) as usize;
    Array3::from_shape_fn(a.dim(), |(i, j, k)| {
        a[[
            source(i, shift[0], n0),
            source(j, shift[1], n1),
            source(k, shift[2], n2),
        ]]
        .clone()
    })
}

/// Weighted center of mass, `None` if the weights sum to zero
pub fn center_of_mass(weights: &Array3<f64>) -> Option<[f64; 3]> {
    let total = weights.sum();
    if total == 0. || !total.is_finite() {
        return None;
    }
    let mut com = [0f64; 3];
    for ((i, j, k), &w) in weights.indexed_iter() {
        com[0] += i as f64 * w;
        com[1] += j as f64 * w;
        com[2] += k as f64 * w;
    }
    Some(com.map(|c| c / total))
}

/// Rolls `modulus` and `phase` so that the modulus center of mass lands at the center of the array
///
/// Returns the rolled arrays and the applied shift
pub fn center_com(
    modulus: &Array3<f64>,
    phase: &Array3<f64>,
) -> Result<(Array3<f64>, Array3<f64>, [isize; 3]), DataShapeError> {
    if modulus.dim() != phase.dim() {
        return Err(DataShapeError::Array {
            name: "phase".into(),
            shape: dims(phase).iter().map(|&n| n as u64).collect(),
            expected: "the shape of the modulus",
        });
    }
    let com = center_of_mass(modulus).ok_or(DataShapeError::Empty)?;
    let n = dims(modulus);
    let shift = [0, 1, 2].map(|i| (n[i] / 2) as isize - com[i].round() as isize);
    Ok((roll(modulus, shift), roll(phase, shift), shift))
}

/// Sums `a` over blocks of `factors` voxels, the remainder of each axis is dropped
pub fn bin(a: &Array3<f64>, factors: [usize; 3]) -> Array3<f64> {
    let [n0, n1, n2] = dims(a);
    let [f0, f1, f2] = factors.map(|f| f.max(1));
    Array3::from_shape_fn((n0 / f0, n1 / f1, n2 / f2), |(i, j, k)| {
        a.slice(s![i * f0..(i + 1) * f0, j * f1..(j + 1) * f1, k * f2..(k + 1) * f2])
            .sum()
    })
}

/// Combines `mask` over blocks of `factors` voxels, a block is invalid if any of its voxels is
pub fn bin_mask(mask: &Array3<bool>, factors: [usize; 3]) -> Array3<bool> {
    let [n0, n1, n2] = dims(mask);
    let [f0, f1, f2] = factors.map(|f| f.max(1));
    Array3::from_shape_fn((n0 / f0, n1 / f1, n2 / f2), |(i, j, k)| {
        mask.slice(s![i * f0..(i + 1) * f0, j * f1..(j + 1) * f1, k * f2..(k + 1) * f2])
            .iter()
            .any(|&m| m)
    })
}

/// Folds NaNs into `mask` then zeroes every masked voxel of `data`
pub fn fold_invalid(data: &mut Array3<f64>, mask: &mut Array3<bool>) {
    Zip::from(data).and(mask).for_each(|d, m| {
        if d.is_nan() {
            *m = true;
        }
        if *m {
            *d = 0.;
        }
    });
}

/// Status of a frame of the rocking scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameStatus {
    /// measured and kept
    Used,
    /// measured and excluded
    Unused,
    /// added by padding
    Synthetic,
}
impl FrameStatus {
    /// Used or synthetic frames are part of the volume
    pub fn is_active(&self) -> bool {
        !matches!(self, FrameStatus::Unused)
    }
    pub fn code(&self) -> i8 {
        match self {
            FrameStatus::Used => 1,
            FrameStatus::Unused => 0,
            FrameStatus::Synthetic => -1,
        }
    }
}
impl TryFrom<i8> for FrameStatus {
    type Error = DataShapeError;
    fn try_from(code: i8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(FrameStatus::Used),
            0 => Ok(FrameStatus::Unused),
            -1 => Ok(FrameStatus::Synthetic),
            _ => Err(DataShapeError::FrameCode(code)),
        }
    }
}

/// Acquisition timeline of the rocking scan
///
/// Frames cropped away stay in the timeline as [FrameStatus::Unused], so the
/// number of active frames is the extent of the volume first axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameValidity(Vec<FrameStatus>);
impl FrameValidity {
    /// `n` measured frames, all used
    pub fn all_used(n: usize) -> Self {
        Self(vec![FrameStatus::Used; n])
    }
    pub fn new(frames: Vec<FrameStatus>) -> Self {
        Self(frames)
    }
    /// Decodes the `1 / 0 / -1` persistence encoding
    pub fn from_codes(codes: &[i8]) -> Result<Self, DataShapeError> {
        codes
            .iter()
            .map(|&c| FrameStatus::try_from(c))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
    pub fn codes(&self) -> Vec<i8> {
        self.0.iter().map(FrameStatus::code).collect()
    }
    pub fn statuses(&self) -> &[FrameStatus] {
        &self.0
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    /// Timeline positions of the frames that are part of the volume
    pub fn active_indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.is_active().then_some(i))
            .collect()
    }
    pub fn active_count(&self) -> usize {
        self.0.iter().filter(|s| s.is_active()).count()
    }
    /// Checks that the active frames match the extent of the volume first axis
    pub fn check_extent(&self, extent: usize) -> Result<(), DataShapeError> {
        let active = self.active_count();
        if active != extent {
            return Err(DataShapeError::Frames { active, extent });
        }
        Ok(())
    }
    /// Keeps the volume frames `[start, stop)`
    ///
    /// Measured frames cropped away become unused, cropped synthetic frames are removed.
    pub fn crop(&mut self, start: usize, stop: usize) {
        let mut rank = 0usize;
        let mut cropped = Vec::with_capacity(self.0.len());
        for status in self.0.drain(..) {
            if !status.is_active() {
                cropped.push(status);
                continue;
            }
            let kept = (start..stop).contains(&rank);
            rank += 1;
            match (status, kept) {
                (_, true) => cropped.push(status),
                (FrameStatus::Synthetic, false) => (),
                (_, false) => cropped.push(FrameStatus::Unused),
            }
        }
        self.0 = cropped;
    }
    /// Adds `before` and `after` synthetic frames around the volume frames
    pub fn pad(&mut self, before: usize, after: usize) {
        let active = self.active_indices();
        let first = active.first().copied().unwrap_or(0);
        let last = active.last().map_or(self.0.len(), |&i| i + 1);
        let mut padded = Vec::with_capacity(self.0.len() + before + after);
        padded.extend_from_slice(&self.0[..first]);
        padded.extend(std::iter::repeat(FrameStatus::Synthetic).take(before));
        padded.extend_from_slice(&self.0[first..last]);
        padded.extend(std::iter::repeat(FrameStatus::Synthetic).take(after));
        padded.extend_from_slice(&self.0[last..]);
        self.0 = padded;
    }
    /// Merges groups of `factor` frames, only allowed if every frame is used
    pub fn bin(&mut self, factor: usize) -> Result<(), ConfigurationError> {
        if factor <= 1 {
            return Ok(());
        }
        if self.0.iter().any(|s| *s != FrameStatus::Used) {
            return Err(ConfigurationError::RockingBinning(factor));
        }
        self.0.truncate(self.0.len() / factor);
        Ok(())
    }
    /// Rocking angles of the volume frames
    ///
    /// Measured frames follow `start + i * step` along the timeline, synthetic
    /// frames extrapolate the step from their measured neighbours.
    pub fn frame_angles(&self, start: f64, step: f64) -> Vec<f64> {
        let mut measured = 0usize;
        let angles: Vec<Option<f64>> = self
            .0
            .iter()
            .filter_map(|status| {
                let angle = match status {
                    FrameStatus::Synthetic => None,
                    _ => {
                        let angle = start + measured as f64 * step;
                        measured += 1;
                        Some(angle)
                    }
                };
                status.is_active().then_some(angle)
            })
            .collect();
        let Some(first) = angles.iter().position(Option::is_some) else {
            return (0..angles.len()).map(|i| start + i as f64 * step).collect();
        };
        let first_angle = angles[first].unwrap_or(start);
        let mut previous = first_angle;
        angles
            .iter()
            .enumerate()
            .map(|(i, angle)| {
                let value = match angle {
                    Some(a) => *a,
                    None if i < first => first_angle - (first - i) as f64 * step,
                    None => previous + step,
                };
                previous = value;
                value
            })
            .collect()
    }
}

/// Reciprocal space axes `(qx, qz, qy)` of the array axes `(0, 1, 2)` in 1/nm
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QAxes {
    /// along the beam, downstream
    pub qx: Array1<f64>,
    /// vertical, up
    pub qz: Array1<f64>,
    /// horizontal, outboard
    pub qy: Array1<f64>,
}
impl QAxes {
    pub fn new(qx: Array1<f64>, qz: Array1<f64>, qy: Array1<f64>) -> Self {
        Self { qx, qz, qy }
    }
    /// Axis values along the array axis `axis`
    pub fn axis(&self, axis: usize) -> ArrayView1<'_, f64> {
        match axis {
            0 => self.qx.view(),
            1 => self.qz.view(),
            _ => self.qy.view(),
        }
    }
    fn axis_mut(&mut self, axis: usize) -> &mut Array1<f64> {
        match axis {
            0 => &mut self.qx,
            1 => &mut self.qz,
            _ => &mut self.qy,
        }
    }
    /// Checks the axes lengths against the volume shape
    pub fn check_shape(&self, shape: [usize; 3]) -> Result<(), DataShapeError> {
        for (axis, &extent) in shape.iter().enumerate() {
            let len = self.axis(axis).len();
            if len != extent {
                return Err(DataShapeError::QAxis { axis, len, extent });
            }
        }
        Ok(())
    }
    /// Keeps the values `[start, stop)` of `axis`
    pub fn crop(&mut self, axis: usize, start: usize, stop: usize) {
        let cropped = self.axis(axis).slice(s![start..stop]).to_owned();
        *self.axis_mut(axis) = cropped;
    }
    /// Extends `axis` linearly with its existing step
    pub fn extend(&mut self, axis: usize, before: usize, after: usize) -> Result<(), DataShapeError> {
        let q = self.axis(axis);
        let n = q.len();
        if n < 2 {
            return Err(DataShapeError::QAxisTooShort(axis));
        }
        let dq = q[1] - q[0];
        let q0 = q[0] - before as f64 * dq;
        let extended = Array1::from_shape_fn(before + n + after, |i| {
            if (before..before + n).contains(&i) {
                q[i - before]
            } else {
                q0 + i as f64 * dq
            }
        });
        *self.axis_mut(axis) = extended;
        Ok(())
    }
    /// Range `|q_max - q_min|` of each axis
    pub fn ranges(&self) -> [f64; 3] {
        [0, 1, 2].map(|axis| {
            match self.axis(axis).iter().copied().minmax_by(f64::total_cmp) {
                MinMaxResult::MinMax(min, max) => max - min,
                _ => 0.,
            }
        })
    }
    /// Direct space voxel size `2π / |q_max - q_min|` of each axis in nm
    pub fn voxel_sizes(&self) -> [f64; 3] {
        self.ranges().map(|r| 2. * PI / r)
    }
    /// q values at the center voxel of the grid
    pub fn center(&self) -> [f64; 3] {
        [0, 1, 2].map(|axis| {
            let q = self.axis(axis);
            q[q.len() / 2]
        })
    }
}

/// Sum of a volume over the detector axes
pub fn integrated_intensity(intensity: &Array3<f64>) -> Array1<f64> {
    intensity.sum_axis(Axis(2)).sum_axis(Axis(1))
}

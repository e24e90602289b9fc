use nalgebra as na;
use ndarray::{Array1, Array3};

use super::{DetectorVolume, Gridder, InterpolationMethod, Orthogonalized};
use crate::context::ScanContext;
use crate::error::{DataShapeError, Result};
use crate::fft_size::smaller_fft_size;
use crate::geometry::{alignment_rotation, Geometry, ReferenceAxis};
use crate::volume::{fold_invalid, QAxes};

/// Crystal frame regridding of the exact q of every pixel
///
/// Each sample is spread over the neighbouring bins with a tent weight whose
/// width is the bin size, the grid values are the weighted averages.
#[derive(Debug, Clone, Default)]
pub struct ExactGridder {
    align_q: Option<ReferenceAxis>,
}
impl ExactGridder {
    pub fn new(align_q: Option<ReferenceAxis>) -> Self {
        Self { align_q }
    }
}

/// Accumulates weighted samples on a regular grid
struct Accumulator {
    origin: [f64; 3],
    width: [f64; 3],
    bins: [usize; 3],
    value: Array3<f64>,
    masked: Array3<f64>,
    weight: Array3<f64>,
}
impl Accumulator {
    fn new(q_min: [f64; 3], q_max: [f64; 3], bins: [usize; 3]) -> Self {
        let shape = (bins[0], bins[1], bins[2]);
        Self {
            origin: q_min,
            width: [0, 1, 2].map(|a| (q_max[a] - q_min[a]) / bins[a] as f64),
            bins,
            value: Array3::zeros(shape),
            masked: Array3::zeros(shape),
            weight: Array3::zeros(shape),
        }
    }
    /// Bin center along `axis`
    fn center(&self, axis: usize, bin: usize) -> f64 {
        self.origin[axis] + (bin as f64 + 0.5) * self.width[axis]
    }
    fn add(&mut self, q: &na::Vector3<f64>, value: f64, masked: bool) {
        let mut lower = [0i64; 3];
        let mut frac = [0f64; 3];
        for axis in 0..3 {
            let u = if self.width[axis] > 0. {
                (q[axis] - self.origin[axis]) / self.width[axis] - 0.5
            } else {
                0.
            };
            lower[axis] = u.floor() as i64;
            frac[axis] = u - u.floor();
        }
        for corner in 0..8 {
            let mut index = [0usize; 3];
            let mut weight = 1f64;
            for axis in 0..3 {
                let (bin, w) = if (corner >> axis) & 1 == 1 {
                    (lower[axis] + 1, frac[axis])
                } else {
                    (lower[axis], 1. - frac[axis])
                };
                if bin < 0 || bin >= self.bins[axis] as i64 {
                    weight = 0.;
                    break;
                }
                index[axis] = bin as usize;
                weight *= w;
            }
            if weight == 0. {
                continue;
            }
            self.weight[index] += weight;
            self.value[index] += weight * value;
            if masked {
                self.masked[index] += weight;
            }
        }
    }
    /// Weighted averages, NaN where no sample contributed
    fn finish(self) -> (Array3<f64>, Array3<bool>, QAxes) {
        let axes = [0, 1, 2].map(|axis| {
            Array1::from_iter((0..self.bins[axis]).map(|b| self.center(axis, b)))
        });
        let mut data = Array3::zeros(self.value.dim());
        let mut mask = Array3::from_elem(self.value.dim(), false);
        for ((index, &w), v) in self.weight.indexed_iter().zip(data.iter_mut()) {
            *v = if w > 0. {
                self.value[index] / w
            } else {
                f64::NAN
            };
            // only bins fed by masked samples alone
            if w > 0. && self.masked[index] >= w * (1. - 1e-9) {
                mask[index] = true;
            }
        }
        let [qx, qz, qy] = axes;
        (data, mask, QAxes::new(qx, qz, qy))
    }
}

impl Gridder for ExactGridder {
    fn method(&self) -> InterpolationMethod {
        InterpolationMethod::Exact
    }
    fn grid(
        &self,
        volume: &DetectorVolume,
        geometry: &Geometry,
        ctx: &ScanContext,
    ) -> Result<Orthogonalized> {
        let shape = volume.shape();
        if shape.contains(&0) {
            return Err(DataShapeError::Empty.into());
        }
        let center = volume.center();
        let q_center = volume.q(geometry, center, 0.)?;
        let rotation = match self.align_q {
            Some(axis) => alignment_rotation(&q_center, axis)?,
            None => na::Rotation3::identity(),
        };
        let q_bragg = rotation * q_center;

        let (n0, n1, n2) = (shape[0], shape[1], shape[2]);
        let mut q = Array3::from_elem((n0, n1, n2), na::Vector3::zeros());
        for ((i, j, k), value) in q.indexed_iter_mut() {
            *value = rotation * volume.q(geometry, [i, j, k], 0.)?;
        }

        // coarsest sampling step of each q component
        let mut max_step = [0f64; 3];
        for ((i, j, k), qi) in q.indexed_iter() {
            for next in [[i + 1, j, k], [i, j + 1, k], [i, j, k + 1]] {
                if let Some(qn) = q.get(next) {
                    let step = (qn - qi).abs();
                    for a in 0..3 {
                        max_step[a] = max_step[a].max(step[a]);
                    }
                }
            }
        }
        let mut q_min = [f64::INFINITY; 3];
        let mut q_max = [f64::NEG_INFINITY; 3];
        for qi in q.iter() {
            for a in 0..3 {
                q_min[a] = q_min[a].min(qi[a]);
                q_max[a] = q_max[a].max(qi[a]);
            }
        }
        let max_bins = [0, 1, 2].map(|a| {
            if max_step[a] > 0. {
                ((q_max[a] - q_min[a]) / max_step[a]).floor() as usize
            } else {
                2
            }
        });
        ctx.info(format_args!(
            "maximum number of bins based on the sampling in q: {:?}",
            max_bins
        ));
        let bins = max_bins.map(|n| smaller_fft_size(n).unwrap_or(2));
        ctx.info(format_args!(
            "maximum number of bins based on the shape requirements for FFT: {:?}",
            bins
        ));

        let mut accumulator = Accumulator::new(q_min, q_max, bins);
        for (qi, (&value, &masked)) in q.iter().zip(volume.data.iter().zip(volume.mask.iter())) {
            accumulator.add(qi, value, masked);
        }
        let (mut data, mut mask, q) = accumulator.finish();
        fold_invalid(&mut data, &mut mask);
        ctx.info(format_args!(
            "{} voxels out of {} are invalid after regridding",
            mask.iter().filter(|&&m| m).count(),
            mask.len()
        ));
        Ok(Orthogonalized {
            data,
            mask,
            q,
            transform: None,
            q_bragg,
        })
    }
}

use nalgebra as na;
use ndarray::{Array1, Array3};

use super::{axis_values, DetectorVolume, Gridder, InterpolationMethod, Orthogonalized};
use crate::context::ScanContext;
use crate::error::{GeometryError, Result};
use crate::geometry::{alignment_rotation, Geometry, ReferenceAxis};
use crate::volume::{fold_invalid, QAxes};

/// Laboratory frame regridding with a single linear transformation
///
/// The transformation is the tangent of the exact pixel to q mapping at the
/// central voxel, valid for small angular ranges.
#[derive(Debug, Clone, Default)]
pub struct LinearizedGridder {
    align_q: Option<ReferenceAxis>,
}
impl LinearizedGridder {
    pub fn new(align_q: Option<ReferenceAxis>) -> Self {
        Self { align_q }
    }
    /// q at the central voxel and the transformation matrix whose columns are
    /// the q increments of one voxel along each array axis
    pub fn tangent(
        &self,
        volume: &DetectorVolume,
        geometry: &Geometry,
    ) -> Result<(na::Vector3<f64>, na::Matrix3<f64>)> {
        let shape = volume.shape();
        let center = volume.center();
        let reference = volume.angles[center[0]];
        let q0 = volume.q(geometry, center, reference)?;
        let mut columns = [na::Vector3::zeros(); 3];
        for axis in 0..3 {
            let mut next = center;
            columns[axis] = if center[axis] + 1 < shape[axis] {
                next[axis] += 1;
                volume.q(geometry, next, reference)? - q0
            } else if center[axis] > 0 {
                next[axis] -= 1;
                q0 - volume.q(geometry, next, reference)?
            } else {
                return Err(GeometryError::SingularTransform.into());
            };
        }
        let transform = na::Matrix3::from_columns(&columns);
        match self.align_q {
            Some(axis) => {
                let rotation = alignment_rotation(&q0, axis)?;
                Ok((rotation * q0, rotation.matrix() * transform))
            }
            None => Ok((q0, transform)),
        }
    }
}

/// Trilinear interpolation at the fractional index `p`
///
/// Returns the interpolated value and the weight of the masked neighbours,
/// `None` outside of the volume.
fn trilinear(data: &Array3<f64>, mask: &Array3<bool>, p: [f64; 3]) -> Option<(f64, f64)> {
    let (n0, n1, n2) = data.dim();
    let mut lower = [0usize; 3];
    let mut upper = [0usize; 3];
    let mut frac = [0f64; 3];
    for (axis, &n) in [n0, n1, n2].iter().enumerate() {
        let x = p[axis];
        if !(x >= 0. && x <= (n - 1) as f64) {
            return None;
        }
        let i = x.floor() as usize;
        if i + 1 >= n {
            lower[axis] = n - 1;
            upper[axis] = n - 1;
        } else {
            lower[axis] = i;
            upper[axis] = i + 1;
            frac[axis] = x - i as f64;
        }
    }
    let mut value = 0f64;
    let mut masked = 0f64;
    for corner in 0..8 {
        let mut index = [0usize; 3];
        let mut weight = 1f64;
        for axis in 0..3 {
            if (corner >> axis) & 1 == 1 {
                index[axis] = upper[axis];
                weight *= frac[axis];
            } else {
                index[axis] = lower[axis];
                weight *= 1. - frac[axis];
            }
        }
        if weight == 0. {
            continue;
        }
        value += weight * data[index];
        if mask[index] {
            masked += weight;
        }
    }
    Some((value, masked))
}

impl Gridder for LinearizedGridder {
    fn method(&self) -> InterpolationMethod {
        InterpolationMethod::Linearized
    }
    fn grid(
        &self,
        volume: &DetectorVolume,
        geometry: &Geometry,
        ctx: &ScanContext,
    ) -> Result<Orthogonalized> {
        let shape = volume.shape();
        let (q0, transform) = self.tangent(volume, geometry)?;
        ctx.info(format_args!("transformation matrix: {:.6}", transform));
        let inverse = transform
            .try_inverse()
            .ok_or(GeometryError::SingularTransform)?;
        let center = na::Vector3::from_iterator(volume.center().iter().map(|&c| c as f64));

        // extent of the transformed volume
        let mut q_min = na::Vector3::repeat(f64::INFINITY);
        let mut q_max = na::Vector3::repeat(f64::NEG_INFINITY);
        for corner in 0..8 {
            let index = na::Vector3::from_fn(|axis, _| {
                if (corner >> axis) & 1 == 1 {
                    (shape[axis] - 1) as f64
                } else {
                    0.
                }
            });
            let q = q0 + transform * (index - center);
            q_min = q_min.inf(&q);
            q_max = q_max.sup(&q);
        }
        let axes: Vec<Vec<f64>> = (0..3)
            .map(|axis| axis_values(q_min[axis], q_max[axis], shape[axis]))
            .collect();

        let (n0, n1, n2) = (shape[0], shape[1], shape[2]);
        let mut data = Array3::<f64>::zeros((n0, n1, n2));
        let mut mask = Array3::from_elem((n0, n1, n2), false);
        for ((i, j, k), value) in data.indexed_iter_mut() {
            let q = na::Vector3::new(axes[0][i], axes[1][j], axes[2][k]);
            let p = center + inverse * (q - q0);
            match trilinear(volume.data, volume.mask, [p.x, p.y, p.z]) {
                Some((v, masked)) => {
                    *value = v;
                    mask[[i, j, k]] = masked > 0.;
                }
                None => *value = f64::NAN,
            }
        }
        fold_invalid(&mut data, &mut mask);
        ctx.info(format_args!(
            "{} voxels out of {} are invalid after regridding",
            mask.iter().filter(|&&m| m).count(),
            mask.len()
        ));

        let [qx, qz, qy] = [0, 1, 2].map(|axis| Array1::from(axes[axis].clone()));
        Ok(Orthogonalized {
            data,
            mask,
            q: QAxes::new(qx, qz, qy),
            transform: Some(transform),
            q_bragg: q0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::tests::{blob, geometry, sampling};
    use crate::volume::FrameValidity;
    use approx::assert_abs_diff_eq;

    #[test]
    fn interpolation_is_exact_for_linear_data() {
        let shape = (12, 20, 20);
        let data = Array3::from_shape_fn(shape, |(i, j, k)| 2. * i as f64 - j as f64 + 0.5 * k as f64);
        let mask = Array3::from_elem(shape, false);
        let g = geometry();
        let volume = DetectorVolume::new(
            &data,
            &mask,
            &FrameValidity::all_used(12),
            &g,
            sampling(),
            [0, 0],
        )
        .unwrap();
        let gridder = LinearizedGridder::default();
        let (q0, transform) = gridder.tangent(&volume, &g).unwrap();
        let inverse = transform.try_inverse().unwrap();
        let result = gridder.grid(&volume, &g, &ScanContext::default()).unwrap();
        let center = na::Vector3::new(6., 10., 10.);
        let mut checked = 0;
        for ((i, j, k), &m) in result.mask.indexed_iter() {
            if m {
                continue;
            }
            let q = na::Vector3::new(result.q.qx[i], result.q.qz[j], result.q.qy[k]);
            let p = center + inverse * (q - q0);
            assert_abs_diff_eq!(
                result.data[[i, j, k]],
                2. * p.x - p.y + 0.5 * p.z,
                epsilon = 1e-6
            );
            checked += 1;
        }
        assert!(checked > 0);
        assert!(result.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn aligned_bragg_vector() {
        let shape = (10, 16, 16);
        let data = blob(shape);
        let mask = Array3::from_elem(shape, false);
        let g = geometry();
        let volume = DetectorVolume::new(
            &data,
            &mask,
            &FrameValidity::all_used(10),
            &g,
            sampling(),
            [2, 2],
        )
        .unwrap();
        let result = LinearizedGridder::new(Some(ReferenceAxis::Y))
            .grid(&volume, &g, &ScanContext::default())
            .unwrap();
        assert_abs_diff_eq!(result.q_bragg.x, 0., epsilon = 1e-9);
        assert_abs_diff_eq!(result.q_bragg.z, 0., epsilon = 1e-9);
        assert!(result.q_bragg.y > 0.);
        assert_eq!(result.data.dim(), (10, 16, 16));
        assert_eq!(result.mask.dim(), (10, 16, 16));
        assert!(result.data.iter().all(|v| !v.is_nan()));
        assert!(result
            .data
            .iter()
            .zip(result.mask.iter())
            .all(|(&v, &m)| !m || v == 0.));
    }

    #[test]
    fn masked_neighbours_propagate() {
        let shape = (8, 12, 12);
        let data = blob(shape);
        let mut mask = Array3::from_elem(shape, false);
        mask.slice_mut(ndarray::s![.., 6, ..]).fill(true);
        let g = geometry();
        let volume = DetectorVolume::new(
            &data,
            &mask,
            &FrameValidity::all_used(8),
            &g,
            sampling(),
            [0, 0],
        )
        .unwrap();
        let result = LinearizedGridder::default()
            .grid(&volume, &g, &ScanContext::default())
            .unwrap();
        assert!(result.mask.iter().any(|&m| m));
        assert!(result.data.iter().all(|v| v.is_finite()));
    }
}

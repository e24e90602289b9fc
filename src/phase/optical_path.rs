use nalgebra as na;
use ndarray::Array3;
use serde::Serialize;

use crate::volume::dims;

/// Refraction and absorption correction settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpticalPathCorrection {
    /// δ of the refractive index `n = 1 - δ + iβ`
    pub dispersion: f64,
    /// β of the refractive index, the amplitude is left uncorrected if `None`
    pub absorption: Option<f64>,
    /// bulk support threshold relative to the maximum modulus
    pub threshold: f64,
}
impl Default for OpticalPathCorrection {
    fn default() -> Self {
        Self {
            dispersion: 4.1184e-05,
            absorption: None,
            threshold: 0.25,
        }
    }
}

/// Voxels whose modulus is above `threshold` times the maximum
pub fn bulk_support(modulus: &Array3<f64>, threshold: f64) -> Array3<bool> {
    let max = modulus.iter().cloned().fold(0., f64::max);
    modulus.mapv(|m| max > 0. && m > threshold * max)
}

/// Path length in nm travelled inside `bulk` by rays reaching each bulk voxel
/// along `direction`
///
/// `direction` is in array order, `voxel_size` in nm. Rays are marched back
/// from the voxel towards the source with a step equal to the smallest voxel
/// size; the voxel itself is not counted. Voxels outside of the bulk get 0.
pub fn optical_path(
    bulk: &Array3<bool>,
    direction: &na::Vector3<f64>,
    voxel_size: [f64; 3],
) -> Array3<f64> {
    let shape = dims(bulk);
    let step = voxel_size.iter().cloned().fold(f64::INFINITY, f64::min);
    let u = direction.normalize();
    // index increment of one step towards the source
    let delta = [0, 1, 2].map(|a| -u[a] * step / voxel_size[a]);
    let inside = |p: &[f64; 3]| {
        (0..3).all(|a| p[a] > -0.5 && p[a] < shape[a] as f64 - 0.5)
    };
    Array3::from_shape_fn(bulk.dim(), |(i, j, k)| {
        if !bulk[[i, j, k]] {
            return 0.;
        }
        let mut p = [i as f64, j as f64, k as f64];
        let mut count = 0usize;
        loop {
            for a in 0..3 {
                p[a] += delta[a];
            }
            if !inside(&p) {
                break;
            }
            let index = p.map(|x| x.round() as usize);
            if bulk[index] {
                count += 1;
            }
        }
        count as f64 * step
    })
}

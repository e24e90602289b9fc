use std::f64::consts::PI;

use ndarray::{Array3, Axis};
use serde::Serialize;
use strum_macros::{Display, EnumString, VariantNames};

use super::unwrap::wrap;
use crate::geometry::ReferenceAxis;

/// Finite difference schemes of the phase gradient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString, VariantNames)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StrainMethod {
    Forward,
    Backward,
    Central,
    /// smallest of the forward and backward differences, robust to phase jumps at defects
    Defect,
}

/// Strain `d/2π · ∂φ/∂r` along the reference axis
///
/// Phase differences are wrapped into `[-extent/2, extent/2)` before being
/// divided by the voxel size (nm) and scaled by the planar distance (nm).
pub fn strain(
    phase: &Array3<f64>,
    reference: ReferenceAxis,
    voxel_size: [f64; 3],
    planar_distance: f64,
    extent: f64,
    method: StrainMethod,
) -> Array3<f64> {
    let axis = reference.array_axis();
    let n = phase.len_of(Axis(axis));
    let scale = planar_distance / (2. * PI * voxel_size[axis]);
    let mut strain = Array3::zeros(phase.dim());
    if n < 2 {
        return strain;
    }
    let d = |a: f64, b: f64| wrap(b - a, -extent / 2., extent);
    for (lane, mut out) in phase
        .lanes(Axis(axis))
        .into_iter()
        .zip(strain.lanes_mut(Axis(axis)))
    {
        for i in 0..n {
            let forward = (i + 1 < n).then(|| d(lane[i], lane[i + 1]));
            let backward = (i > 0).then(|| d(lane[i - 1], lane[i]));
            let gradient = match (method, forward, backward) {
                (_, Some(f), None) => f,
                (_, None, Some(b)) => b,
                (StrainMethod::Forward, Some(f), _) => f,
                (StrainMethod::Backward, _, Some(b)) => b,
                (StrainMethod::Central, Some(f), Some(b)) => 0.5 * (f + b),
                (StrainMethod::Defect, Some(f), Some(b)) => {
                    if f.abs() <= b.abs() {
                        f
                    } else {
                        b
                    }
                }
                (_, None, None) => 0.,
            };
            out[i] = gradient * scale;
        }
    }
    strain
}

/// Displacement `φ / |q|` in nm
pub fn displacement(phase: &Array3<f64>, planar_distance: f64) -> Array3<f64> {
    phase * (planar_distance / (2. * PI))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn uniform_strain() {
        // 0.1 % strain along y with a 0.25 nm planar distance and 2 nm voxels
        let slope = 2. * PI * 1e-3 * 2. / 0.25;
        let phase = Array3::from_shape_fn((4, 8, 5), |(_, j, _)| {
            wrap(slope * j as f64, -PI, 2. * PI)
        });
        for method in [
            StrainMethod::Forward,
            StrainMethod::Backward,
            StrainMethod::Central,
            StrainMethod::Defect,
        ] {
            let s = strain(&phase, ReferenceAxis::Y, [1., 2., 3.], 0.25, 2. * PI, method);
            for v in s.iter() {
                assert_abs_diff_eq!(*v, 1e-3, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn wrapped_jumps() {
        let phase = Array3::from_shape_fn((1, 1, 6), |(_, _, k)| {
            wrap(1.2 * k as f64, -PI, 2. * PI)
        });
        let s = strain(&phase, ReferenceAxis::X, [1.; 3], 2. * PI, 2. * PI, StrainMethod::Forward);
        for v in s.iter() {
            assert_abs_diff_eq!(*v, 1.2, epsilon = 1e-12);
        }
    }

    #[test]
    fn defect_keeps_the_smaller_difference() {
        let phase = Array3::from_shape_fn((5, 1, 1), |(i, _, _)| if i < 3 { 0. } else { 1. });
        let s = strain(&phase, ReferenceAxis::Z, [1.; 3], 2. * PI, 2. * PI, StrainMethod::Defect);
        assert_eq!(s[[2, 0, 0]], 0.);
        assert_eq!(s[[3, 0, 0]], 0.);
        let f = strain(&phase, ReferenceAxis::Z, [1.; 3], 2. * PI, 2. * PI, StrainMethod::Forward);
        assert_abs_diff_eq!(f[[2, 0, 0]], 1., epsilon = 1e-12);
    }

    #[test]
    fn names() {
        assert_eq!("defect".parse::<StrainMethod>().unwrap(), StrainMethod::Defect);
        assert_eq!(StrainMethod::Central.to_string(), "central");
    }

    #[test]
    fn displacement_scaling() {
        let phase = Array3::from_elem((2, 2, 2), PI);
        let u = displacement(&phase, 0.2);
        assert_abs_diff_eq!(u[[1, 1, 1]], 0.1, epsilon = 1e-12);
    }
}

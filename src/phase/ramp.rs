use std::fmt;

use nalgebra as na;
use ndarray::{Array3, Zip};
use serde::Serialize;
use strum_macros::{EnumString, VariantNames};

use crate::error::{DataShapeError, GeometryError, Result};
use crate::volume::dims;

/// Phase ramp fitting methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString, VariantNames)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RampMethod {
    /// mean of the phase differences between neighbouring support voxels
    Gradient,
    /// least squares plane through the support phase
    LeastSquares,
}
impl fmt::Display for RampMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RampMethod::Gradient => write!(f, "gradient"),
            RampMethod::LeastSquares => write!(f, "least squares"),
        }
    }
}

/// Linear phase `offset + Σ slope[a] (index[a] - center[a])`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Ramp {
    /// phase increment per voxel along each array axis
    pub slopes: [f64; 3],
    pub offset: f64,
    pub center: [f64; 3],
}
impl Ramp {
    pub fn value(&self, index: [usize; 3]) -> f64 {
        self.offset
            + (0..3)
                .map(|a| self.slopes[a] * (index[a] as f64 - self.center[a]))
                .sum::<f64>()
    }
    /// Adds `sign` times the ramp to `phase`
    pub fn apply(&self, phase: &mut Array3<f64>, sign: f64) {
        Zip::indexed(phase).for_each(|(i, j, k), p| *p += sign * self.value([i, j, k]));
    }
    /// Fits the ramp of `phase` over `support`
    ///
    /// With [RampMethod::Gradient], differences whose magnitude exceeds
    /// `threshold_gradient` are ignored.
    pub fn fit(
        phase: &Array3<f64>,
        support: &Array3<bool>,
        method: RampMethod,
        threshold_gradient: f64,
    ) -> Result<Self> {
        let shape = dims(phase);
        let center = shape.map(|n| (n / 2) as f64);
        match method {
            RampMethod::Gradient => {
                let mut slopes = [0f64; 3];
                for (axis, slope) in slopes.iter_mut().enumerate() {
                    let (sum, count) = phase
                        .indexed_iter()
                        .filter(|&((i, j, k), _)| {
                            let mut next = [i, j, k];
                            next[axis] += 1;
                            next[axis] < shape[axis] && support[[i, j, k]] && support[next]
                        })
                        .filter_map(|((i, j, k), &p)| {
                            let mut next = [i, j, k];
                            next[axis] += 1;
                            let d = phase[next] - p;
                            (d.abs() < threshold_gradient).then_some(d)
                        })
                        .fold((0f64, 0usize), |(s, n), d| (s + d, n + 1));
                    if count > 0 {
                        *slope = sum / count as f64;
                    }
                }
                Ok(Self {
                    slopes,
                    offset: 0.,
                    center,
                })
            }
            RampMethod::LeastSquares => {
                let mut normal = na::Matrix4::<f64>::zeros();
                let mut rhs = na::Vector4::<f64>::zeros();
                for ((i, j, k), &p) in phase.indexed_iter() {
                    if !support[[i, j, k]] {
                        continue;
                    }
                    let row = na::Vector4::new(
                        1.,
                        i as f64 - center[0],
                        j as f64 - center[1],
                        k as f64 - center[2],
                    );
                    normal += row * row.transpose();
                    rhs += row * p;
                }
                if normal[(0, 0)] == 0. {
                    return Err(DataShapeError::Empty.into());
                }
                let c = normal
                    .lu()
                    .solve(&rhs)
                    .ok_or(GeometryError::SingularFit)?;
                Ok(Self {
                    slopes: [c[1], c[2], c[3]],
                    offset: c[0],
                    center,
                })
            }
        }
    }
}

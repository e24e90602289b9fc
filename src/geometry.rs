//! Diffractometer geometry and reciprocal space mapping of detector pixels
//!
//! Vectors are expressed in array order: `[downstream, vertical up, outboard]`.
//! Wavevectors and q are in 1/nm, lengths in metres, angles in degrees.

use std::f64::consts::PI;

use nalgebra as na;
use serde::{Deserialize, Serialize};
use strum_macros::{EnumString, VariantNames};

use crate::error::{ConfigurationError, GeometryError};

/// Axis the sample rotates around during the rocking scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, VariantNames)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RockingAxis {
    /// rotation around the vertical axis
    Inplane,
    /// rotation around the outboard axis
    Outofplane,
}
impl RockingAxis {
    pub fn unit_vector(&self) -> na::Vector3<f64> {
        match self {
            RockingAxis::Inplane => na::Vector3::y(),
            RockingAxis::Outofplane => na::Vector3::z(),
        }
    }
}

/// Laboratory axis the Bragg vector is aligned with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, VariantNames)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReferenceAxis {
    /// outboard
    X,
    /// vertical up
    Y,
    /// downstream
    Z,
}
impl ReferenceAxis {
    pub fn unit_vector(&self) -> na::Vector3<f64> {
        na::Vector3::ith(self.array_axis(), 1.)
    }
    /// Index of the array axis along this direction
    pub fn array_axis(&self) -> usize {
        match self {
            ReferenceAxis::X => 2,
            ReferenceAxis::Y => 1,
            ReferenceAxis::Z => 0,
        }
    }
}

/// Read-only description of the diffraction geometry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Geometry {
    /// X-ray wavelength in m
    pub wavelength: Option<f64>,
    /// sample to detector distance in m
    pub distance: f64,
    /// unbinned pixel size `[vertical, horizontal]` in m
    pub pixel_size: [f64; 2],
    /// detector out-of-plane angle in degrees
    pub outofplane_angle: f64,
    /// detector in-plane angle in degrees
    pub inplane_angle: f64,
    /// full detector pixel `[row, column]` hit by the direct beam at the detector angles
    pub beam_center: [f64; 2],
    pub rocking_axis: RockingAxis,
    /// rocking angle of the first measured frame in degrees
    pub rocking_start: f64,
    /// rocking angle increment between measured frames in degrees
    pub rocking_step: f64,
}
impl Default for Geometry {
    fn default() -> Self {
        Self {
            wavelength: None,
            distance: 1.,
            pixel_size: [55e-6; 2],
            outofplane_angle: 0.,
            inplane_angle: 0.,
            beam_center: [0.; 2],
            rocking_axis: RockingAxis::Outofplane,
            rocking_start: 0.,
            rocking_step: 0.01,
        }
    }
}
impl Geometry {
    /// Wavelength in nm
    pub fn wavelength_nm(&self) -> Option<f64> {
        self.wavelength.map(|w| w * 1e9)
    }
    /// Wavenumber `2π/λ` in 1/nm
    pub fn wavenumber(&self) -> Result<f64, ConfigurationError> {
        self.wavelength_nm()
            .filter(|w| *w > 0.)
            .map(|w| 2. * PI / w)
            .ok_or(ConfigurationError::MissingParameter("wavelength"))
    }
    /// Geometry of frames merged by groups of `factor` along the rocking axis
    pub fn rocking_binning(self, factor: usize) -> Self {
        let factor = factor.max(1) as f64;
        Self {
            rocking_start: self.rocking_start + 0.5 * (factor - 1.) * self.rocking_step,
            rocking_step: self.rocking_step * factor,
            ..self
        }
    }
    /// Unit vector from the sample to the detector at the detector angles
    pub fn exit_direction(&self) -> na::Vector3<f64> {
        let (sd, cd) = self.outofplane_angle.to_radians().sin_cos();
        let (sg, cg) = self.inplane_angle.to_radians().sin_cos();
        na::Vector3::new(cd * cg, sd, cd * sg)
    }
    /// Detector unit vectors along increasing rows (down) and columns (outboard)
    pub fn detector_axes(&self) -> (na::Vector3<f64>, na::Vector3<f64>) {
        let (sd, cd) = self.outofplane_angle.to_radians().sin_cos();
        let (sg, cg) = self.inplane_angle.to_radians().sin_cos();
        (
            na::Vector3::new(sd * cg, -cd, sd * sg),
            na::Vector3::new(-sg, 0., cg),
        )
    }
    /// Incident wavevector
    pub fn kin(&self) -> Result<na::Vector3<f64>, ConfigurationError> {
        Ok(na::Vector3::x() * self.wavenumber()?)
    }
    /// Exit wavevector at the detector angles
    pub fn kout(&self) -> Result<na::Vector3<f64>, ConfigurationError> {
        Ok(self.exit_direction() * self.wavenumber()?)
    }
    /// Bragg vector `kout - kin` in the laboratory frame
    pub fn q_lab(&self) -> Result<na::Vector3<f64>, ConfigurationError> {
        Ok(self.kout()? - self.kin()?)
    }
    /// Unit vector from the sample to the full detector pixel `(row, column)`
    pub fn pixel_direction(&self, row: f64, column: f64) -> na::Vector3<f64> {
        let (ev, eh) = self.detector_axes();
        let [v0, h0] = self.beam_center;
        let [pv, ph] = self.pixel_size;
        let p = self.exit_direction() * self.distance
            + ev * ((row - v0) * pv)
            + eh * ((column - h0) * ph);
        p.normalize()
    }
    /// Rotation of the sample by `angle` degrees around the rocking axis
    pub fn sample_rotation(&self, angle: f64) -> na::Rotation3<f64> {
        let axis = na::Unit::new_normalize(self.rocking_axis.unit_vector());
        na::Rotation3::from_axis_angle(&axis, angle.to_radians())
    }
    /// Scattering vector of the full detector pixel `(row, column)` in the frame
    /// of a sample rotated by `angle - reference` degrees
    pub fn q_sample(
        &self,
        row: f64,
        column: f64,
        angle: f64,
        reference: f64,
    ) -> Result<na::Vector3<f64>, ConfigurationError> {
        let k = self.wavenumber()?;
        let q = self.pixel_direction(row, column) * k - self.kin()?;
        Ok(self.sample_rotation(reference - angle) * q)
    }
}

/// Rotation bringing `q` onto the reference axis
pub fn alignment_rotation(
    q: &na::Vector3<f64>,
    reference: ReferenceAxis,
) -> Result<na::Rotation3<f64>, GeometryError> {
    rotation_onto(q, &reference.unit_vector())
}

/// Rotation bringing the direction of `from` onto the direction of `to`
pub fn rotation_onto(
    from: &na::Vector3<f64>,
    to: &na::Vector3<f64>,
) -> Result<na::Rotation3<f64>, GeometryError> {
    if from.norm() == 0. || to.norm() == 0. {
        return Err(GeometryError::NullQ);
    }
    let (u, v) = (from.normalize(), to.normalize());
    if (u + v).norm() < 1e-12 {
        // antiparallel vectors: half turn around an orthogonal axis
        let orthogonal = u.cross(&na::Vector3::ith(u.iamin(), 1.));
        return Ok(na::Rotation3::from_axis_angle(
            &na::Unit::new_normalize(orthogonal),
            PI,
        ));
    }
    na::Rotation3::rotation_between(&u, &v)
        .ok_or(GeometryError::Alignment([from.x, from.y, from.z]))
}

/// Interplanar distance `2π/|q|` in nm
pub fn planar_distance(q: &na::Vector3<f64>) -> Result<f64, GeometryError> {
    let norm = q.norm();
    if norm == 0. {
        return Err(GeometryError::NullQ);
    }
    Ok(2. * PI / norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn geometry() -> Geometry {
        Geometry {
            wavelength: Some(12.398 / 9. * 1e-10),
            distance: 1.,
            pixel_size: [55e-6; 2],
            outofplane_angle: 35.,
            inplane_angle: 2.,
            beam_center: [256., 256.],
            ..Default::default()
        }
    }

    #[test]
    fn parse_axes() {
        let axis: RockingAxis = "inplane".parse().unwrap();
        assert_eq!(axis, RockingAxis::Inplane);
        assert!(ConfigurationError::parse::<ReferenceAxis>("reference axis", "w").is_err());
        assert_eq!(
            ConfigurationError::parse::<ReferenceAxis>("reference axis", "y").unwrap(),
            ReferenceAxis::Y
        );
    }

    #[test]
    fn orthonormal_detector() {
        let g = geometry();
        let kf = g.exit_direction();
        let (ev, eh) = g.detector_axes();
        assert_abs_diff_eq!(kf.norm(), 1., epsilon = 1e-12);
        assert_abs_diff_eq!(ev.norm(), 1., epsilon = 1e-12);
        assert_abs_diff_eq!(eh.norm(), 1., epsilon = 1e-12);
        assert_abs_diff_eq!(kf.dot(&ev), 0., epsilon = 1e-12);
        assert_abs_diff_eq!(kf.dot(&eh), 0., epsilon = 1e-12);
        assert_abs_diff_eq!(ev.dot(&eh), 0., epsilon = 1e-12);
    }

    #[test]
    fn beam_center_is_bragg_peak() {
        let g = geometry();
        let [v0, h0] = g.beam_center;
        let q = g.q_sample(v0, h0, 3., 3.).unwrap();
        assert_abs_diff_eq!((q - g.q_lab().unwrap()).norm(), 0., epsilon = 1e-9);
        assert!(g.pixel_direction(v0 + 10., h0).y < g.exit_direction().y);
    }

    #[test]
    fn missing_wavelength() {
        let g = Geometry::default();
        assert!(g.wavenumber().is_err());
    }

    #[test]
    fn alignment() {
        let q = na::Vector3::new(0.3, 2., -0.1);
        let r = alignment_rotation(&q, ReferenceAxis::Y).unwrap();
        let aligned = r * q;
        assert_abs_diff_eq!(aligned.x, 0., epsilon = 1e-12);
        assert_abs_diff_eq!(aligned.z, 0., epsilon = 1e-12);
        assert_abs_diff_eq!(aligned.y, q.norm(), epsilon = 1e-12);
        let r = alignment_rotation(&-na::Vector3::y(), ReferenceAxis::Y).unwrap();
        assert_abs_diff_eq!((r * -na::Vector3::y()).y, 1., epsilon = 1e-12);
    }

    #[test]
    fn half_turn_between_opposite_vectors() {
        let from = na::Vector3::new(1., -2., 0.5);
        let to = -2. * from;
        let r = rotation_onto(&from, &to).unwrap();
        let rotated = r * from;
        for a in 0..3 {
            assert_abs_diff_eq!(rotated[a], -from[a], epsilon = 1e-12);
        }
        assert!(matches!(
            rotation_onto(&na::Vector3::zeros(), &to),
            Err(GeometryError::NullQ)
        ));
    }

    #[test]
    fn binned_rocking_axis() {
        let g = Geometry {
            rocking_start: 1.,
            rocking_step: 0.1,
            ..Default::default()
        }
        .rocking_binning(2);
        assert_abs_diff_eq!(g.rocking_start, 1.05, epsilon = 1e-12);
        assert_abs_diff_eq!(g.rocking_step, 0.2, epsilon = 1e-12);
    }
}

//! Phase of a reconstructed object: unwrapping, detrending, corrections and strain
//!
//! [PhaseManipulator] holds the modulus and the phase of a centered object
//! and applies the phase transformations in place. The last removed phase ramp
//! is remembered so that it can be restored around reciprocal space operations.

use std::f64::consts::PI;
use std::fmt;

use nalgebra as na;
use ndarray::{s, Array3, Zip};
use serde::Serialize;
use strum_macros::{EnumString, VariantNames};

use crate::context::ScanContext;
use crate::error::{DataShapeError, Result};
use crate::geometry::ReferenceAxis;
use crate::volume::{center_of_mass, dims};

mod apodize;
mod optical_path;
mod ramp;
mod strain;
mod unwrap;
pub use apodize::ApodizationWindow;
pub use optical_path::{bulk_support, optical_path, OpticalPathCorrection};
pub use ramp::{Ramp, RampMethod};
pub use strain::{displacement, strain, StrainMethod};
pub use unwrap::{unwrap, wrap, Unwrapped};

/// Reference of the phase offset removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString, VariantNames)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OffsetMethod {
    /// mean phase of the support
    Mean,
    /// phase at the center of mass of the support
    Com,
}
impl fmt::Display for OffsetMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffsetMethod::Mean => write!(f, "support mean"),
            OffsetMethod::Com => write!(f, "support center of mass"),
        }
    }
}

/// Modulus and phase of a reconstructed object
#[derive(Debug, Clone)]
pub struct PhaseManipulator {
    modulus: Array3<f64>,
    phase: Array3<f64>,
    extent: f64,
    ramp: Option<Ramp>,
}
impl PhaseManipulator {
    pub fn new(modulus: Array3<f64>, phase: Array3<f64>) -> std::result::Result<Self, DataShapeError> {
        if modulus.dim() != phase.dim() {
            return Err(DataShapeError::Array {
                name: "phase".into(),
                shape: dims(&phase).iter().map(|&n| n as u64).collect(),
                expected: "the shape of the modulus",
            });
        }
        if modulus.is_empty() {
            return Err(DataShapeError::Empty);
        }
        Ok(Self {
            modulus,
            phase,
            extent: 2. * PI,
            ramp: None,
        })
    }
    pub fn modulus(&self) -> &Array3<f64> {
        &self.modulus
    }
    pub fn phase(&self) -> &Array3<f64> {
        &self.phase
    }
    /// Periodic extent of the phase
    pub fn extent(&self) -> f64 {
        self.extent
    }
    /// Last removed phase ramp
    pub fn ramp(&self) -> Option<&Ramp> {
        self.ramp.as_ref()
    }
    pub fn into_parts(self) -> (Array3<f64>, Array3<f64>) {
        (self.modulus, self.phase)
    }
    /// Voxels whose modulus is above `threshold` times the maximum
    pub fn support(&self, threshold: f64) -> Array3<bool> {
        bulk_support(&self.modulus, threshold)
    }
    /// Unwraps the phase of the voxels above the support `threshold`
    pub fn unwrap(&mut self, threshold: f64, ctx: &ScanContext) {
        let support = self.support(threshold);
        let Unwrapped { phase, extent } = unwrap(&self.phase, &self.modulus, &support);
        ctx.info(format_args!("phase extent after unwrapping: {:.3} rad", extent));
        self.phase = phase;
        self.extent = extent;
    }
    /// Mean phase over `support`
    fn support_mean(&self, support: &Array3<bool>) -> f64 {
        let (sum, count) = self
            .phase
            .iter()
            .zip(support.iter())
            .filter(|(_, &s)| s)
            .fold((0f64, 0usize), |(sum, n), (&p, _)| (sum + p, n + 1));
        if count > 0 {
            sum / count as f64
        } else {
            0.
        }
    }
    /// Wraps the phase into `[-extent/2, extent/2)`
    pub fn wrap(&mut self) {
        let extent = self.extent;
        self.phase.mapv_inplace(|p| wrap(p, -extent / 2., extent));
    }
    /// Subtracts the mean phase of the support then wraps the phase
    pub fn center(&mut self, threshold: f64) {
        let mean = self.support_mean(&self.support(threshold));
        self.phase -= mean;
        self.wrap();
    }
    /// Fits and subtracts a linear phase ramp over the support
    pub fn remove_ramp(
        &mut self,
        method: RampMethod,
        threshold: f64,
        threshold_gradient: f64,
        ctx: &ScanContext,
    ) -> Result<Ramp> {
        let support = self.support(threshold);
        let ramp = Ramp::fit(&self.phase, &support, method, threshold_gradient)?;
        ctx.info(format_args!(
            "{} phase ramp: {:.6?} rad/voxel, offset {:.4} rad",
            method, ramp.slopes, ramp.offset
        ));
        ramp.apply(&mut self.phase, -1.);
        self.ramp = Some(ramp);
        Ok(ramp)
    }
    /// Adds `sign` times the last removed ramp to the phase
    pub fn add_ramp(&mut self, sign: f64) {
        if let Some(ramp) = self.ramp {
            ramp.apply(&mut self.phase, sign);
        }
    }
    /// Runs `f` on the object with the last removed ramp restored, the ramp is
    /// removed again afterwards with the same coefficients
    pub fn with_ramp_restored<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut Self) -> R,
    {
        self.add_ramp(1.);
        let output = f(self);
        self.add_ramp(-1.);
        output
    }
    /// Subtracts the phase of a reference and adds `phase_offset`
    ///
    /// The reference is the voxel `origin` if given, otherwise it is computed
    /// from the support with `method`.
    pub fn remove_offset(
        &mut self,
        method: OffsetMethod,
        origin: Option<[usize; 3]>,
        phase_offset: f64,
        threshold: f64,
        ctx: &ScanContext,
    ) -> std::result::Result<(), DataShapeError> {
        let shape = dims(&self.phase);
        let support = self.support(threshold);
        let reference = match origin {
            Some(voxel) => {
                if voxel.iter().zip(shape.iter()).any(|(i, n)| i >= n) {
                    return Err(DataShapeError::Array {
                        name: "phase offset origin".into(),
                        shape: voxel.iter().map(|&i| i as u64).collect(),
                        expected: "a voxel inside of the volume",
                    });
                }
                self.phase[voxel]
            }
            None => match method {
                OffsetMethod::Mean => self.support_mean(&support),
                OffsetMethod::Com => {
                    let weights = support.mapv(|s| if s { 1. } else { 0. });
                    let com = center_of_mass(&weights).ok_or(DataShapeError::Empty)?;
                    self.phase[com.map(|c| c.round() as usize)]
                }
            },
        };
        ctx.info(format_args!(
            "phase offset removal: reference {:.4} rad, offset {:.4} rad",
            reference, phase_offset
        ));
        self.phase -= reference - phase_offset;
        Ok(())
    }
    /// Averages the phase over a `(2h+1)^3` window, only support voxels are
    /// averaged and contribute
    pub fn average(&mut self, half_width: usize, threshold: f64) {
        if half_width == 0 {
            return;
        }
        let support = self.support(threshold);
        let [n0, n1, n2] = dims(&self.phase);
        let h = half_width;
        let window = |i: usize, n: usize| i.saturating_sub(h)..(i + h + 1).min(n);
        let mut averaged = self.phase.clone();
        Zip::indexed(&mut averaged).for_each(|(i, j, k), value| {
            if !support[[i, j, k]] {
                return;
            }
            let (r0, r1, r2) = (window(i, n0), window(j, n1), window(k, n2));
            let (sum, count) = self
                .phase
                .slice(s![r0.clone(), r1.clone(), r2.clone()])
                .iter()
                .zip(support.slice(s![r0, r1, r2]).iter())
                .filter(|(_, &s)| s)
                .fold((0f64, 0usize), |(sum, n), (&p, _)| (sum + p, n + 1));
            *value = sum / count as f64;
        });
        self.phase = averaged;
    }
    /// Apodizes the diffraction pattern of the object
    pub fn apodize(&mut self, window: &ApodizationWindow, ctx: &ScanContext) {
        ctx.info(format_args!("apodization with a {:?} window", window));
        let (modulus, phase) = apodize::apodize(&self.modulus, &self.phase, window);
        self.modulus = modulus;
        self.phase = phase;
    }
    /// Flips the sign of the phase
    pub fn invert(&mut self) {
        self.phase.mapv_inplace(|p| -p);
    }
    /// Refraction and absorption correction along the incident and exit
    /// wavevectors `kin` and `kout` (array order, working frame)
    ///
    /// The correction is skipped with a warning if the wavelength is unknown.
    /// Returns the bulk support used for the ray marching.
    pub fn correct_optical_path(
        &mut self,
        correction: &OpticalPathCorrection,
        kin: &na::Vector3<f64>,
        kout: &na::Vector3<f64>,
        voxel_size: [f64; 3],
        wavelength_nm: Option<f64>,
        ctx: &ScanContext,
    ) -> Option<Array3<bool>> {
        let Some(wavelength) = wavelength_nm.filter(|w| *w > 0.) else {
            ctx.warn(format_args!(
                "X-ray wavelength undefined, skipping the optical path correction"
            ));
            return None;
        };
        let bulk = bulk_support(&self.modulus, correction.threshold);
        // incoming rays are marched back towards the source, outgoing rays towards the detector
        let path_in = optical_path(&bulk, kin, voxel_size);
        let path_out = optical_path(&bulk, &(-kout), voxel_size);
        let path = path_in + path_out;
        let k = 2. * PI / wavelength;
        let phase_correction = path.mapv(|p| k * correction.dispersion * p);
        ctx.info(format_args!(
            "refraction correction up to {:.4} rad",
            phase_correction.iter().cloned().fold(0., f64::max)
        ));
        self.phase += &phase_correction;
        if let Some(absorption) = correction.absorption {
            let amplitude = path.mapv(|p| (k * absorption * p).exp());
            self.modulus *= &amplitude;
        }
        Some(bulk)
    }
    /// Strain along `reference`, see [strain]
    pub fn strain(
        &self,
        reference: ReferenceAxis,
        voxel_size: [f64; 3],
        planar_distance: f64,
        method: StrainMethod,
    ) -> Array3<f64> {
        strain(
            &self.phase,
            reference,
            voxel_size,
            planar_distance,
            self.extent,
            method,
        )
    }
    /// Displacement field in nm
    pub fn displacement(&self, planar_distance: f64) -> Array3<f64> {
        displacement(&self.phase, planar_distance)
    }
    /// Crystal volume in nm³: voxels whose normalized modulus reaches
    /// `threshold` times the voxel volume
    pub fn volume(&self, threshold: f64, voxel_size: [f64; 3]) -> f64 {
        let max = self.modulus.iter().cloned().fold(0., f64::max);
        if max <= 0. {
            return 0.;
        }
        let count = self.modulus.iter().filter(|&&m| m / max >= threshold).count();
        count as f64 * voxel_size.iter().product::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn gaussian(shape: (usize, usize, usize), width: f64) -> Array3<f64> {
        let c = [shape.0 / 2, shape.1 / 2, shape.2 / 2].map(|c| c as f64);
        Array3::from_shape_fn(shape, |(i, j, k)| {
            let r2 = (i as f64 - c[0]).powi(2) + (j as f64 - c[1]).powi(2) + (k as f64 - c[2]).powi(2);
            (-r2 / (2. * width * width)).exp()
        })
    }

    #[test]
    fn shape_mismatch() {
        assert!(PhaseManipulator::new(Array3::zeros((2, 2, 2)), Array3::zeros((2, 2, 3))).is_err());
        assert!(PhaseManipulator::new(Array3::zeros((0, 2, 2)), Array3::zeros((0, 2, 2))).is_err());
    }

    #[test]
    fn ramp_restored_around_a_step() {
        let shape = (10, 12, 14);
        let modulus = gaussian(shape, 3.);
        let phase = Array3::from_shape_fn(shape, |(i, j, k)| {
            0.3 * i as f64 - 0.2 * j as f64 + 0.1 * k as f64
        });
        let ctx = ScanContext::default();
        let mut manipulator = PhaseManipulator::new(modulus, phase.clone()).unwrap();
        manipulator
            .remove_ramp(RampMethod::Gradient, 0.1, 1., &ctx)
            .unwrap();
        let detrended = manipulator.phase().clone();
        let restored = manipulator.with_ramp_restored(|m| m.phase().clone());
        for (a, b) in restored.iter().zip(phase.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
        for (a, b) in manipulator.phase().iter().zip(detrended.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
        let flat = detrended[[0, 0, 0]];
        assert!(detrended.iter().all(|p| (p - flat).abs() < 1e-9));
    }

    #[test]
    fn offsets() {
        let shape = (5, 5, 5);
        let modulus = gaussian(shape, 1.);
        let phase = Array3::from_shape_fn(shape, |(i, _, _)| i as f64);
        let ctx = ScanContext::default();
        let mut m = PhaseManipulator::new(modulus.clone(), phase.clone()).unwrap();
        m.remove_offset(OffsetMethod::Com, None, 0.5, 0.5, &ctx).unwrap();
        assert_abs_diff_eq!(m.phase()[[2, 0, 0]], 0.5, epsilon = 1e-12);
        let mut m = PhaseManipulator::new(modulus.clone(), phase.clone()).unwrap();
        m.remove_offset(OffsetMethod::Mean, Some([4, 0, 0]), 0., 0.5, &ctx)
            .unwrap();
        assert_eq!(m.phase()[[4, 3, 3]], 0.);
        let mut m = PhaseManipulator::new(modulus, phase).unwrap();
        assert!(m
            .remove_offset(OffsetMethod::Mean, Some([5, 0, 0]), 0., 0.5, &ctx)
            .is_err());
    }

    #[test]
    fn centering_wraps_around_zero() {
        let shape = (4, 4, 4);
        let modulus = Array3::from_elem(shape, 1.);
        let phase = Array3::from_shape_fn(shape, |(_, _, k)| 10. + 0.1 * k as f64);
        let mut m = PhaseManipulator::new(modulus, phase).unwrap();
        m.center(0.5);
        assert_abs_diff_eq!(m.phase().sum(), 0., epsilon = 1e-9);
        assert!(m.phase().iter().all(|p| p.abs() < PI));
    }

    #[test]
    fn averaging_within_the_support() {
        let shape = (5, 5, 5);
        let modulus = Array3::from_shape_fn(shape, |(i, _, _)| if i < 4 { 1. } else { 0. });
        let phase = Array3::from_shape_fn(shape, |(i, _, _)| if i < 4 { i as f64 } else { 100. });
        let mut m = PhaseManipulator::new(modulus, phase).unwrap();
        m.average(1, 0.5);
        assert_abs_diff_eq!(m.phase()[[1, 2, 2]], 1., epsilon = 1e-12);
        assert_abs_diff_eq!(m.phase()[[3, 2, 2]], 2.5, epsilon = 1e-12);
        assert_eq!(m.phase()[[4, 2, 2]], 100.);
    }

    #[test]
    fn missing_wavelength_skips_the_correction() {
        let modulus = gaussian((6, 6, 6), 2.);
        let phase = Array3::zeros((6, 6, 6));
        let mut m = PhaseManipulator::new(modulus, phase).unwrap();
        let bulk = m.correct_optical_path(
            &OpticalPathCorrection::default(),
            &na::Vector3::x(),
            &na::Vector3::new(0.8, 0.6, 0.),
            [5.; 3],
            None,
            &ScanContext::default(),
        );
        assert!(bulk.is_none());
        assert!(m.phase().iter().all(|&p| p == 0.));
    }

    #[test]
    fn refraction_increases_along_the_beam() {
        let modulus = Array3::from_elem((8, 3, 3), 1.);
        let phase = Array3::zeros((8, 3, 3));
        let mut m = PhaseManipulator::new(modulus, phase).unwrap();
        let correction = OpticalPathCorrection {
            dispersion: 1e-5,
            absorption: Some(1e-6),
            threshold: 0.5,
        };
        let bulk = m
            .correct_optical_path(
                &correction,
                &na::Vector3::x(),
                &na::Vector3::x(),
                [2.; 3],
                Some(0.1),
                &ScanContext::default(),
            )
            .unwrap();
        assert!(bulk.iter().all(|&b| b));
        // 7 voxels of 2 nm in total whatever the depth
        let expected = 2. * PI / 0.1 * 1e-5 * 14.;
        assert_abs_diff_eq!(m.phase()[[0, 1, 1]], expected, epsilon = 1e-12);
        assert_abs_diff_eq!(m.phase()[[5, 1, 1]], expected, epsilon = 1e-12);
        assert!(m.modulus()[[3, 1, 1]] > 1.);
    }

    #[test]
    fn crystal_volume() {
        let modulus = Array3::from_shape_fn((4, 4, 4), |(i, _, _)| i as f64);
        let m = PhaseManipulator::new(modulus, Array3::zeros((4, 4, 4))).unwrap();
        assert_abs_diff_eq!(m.volume(0.5, [2.; 3]), 32. * 8.);
    }
}

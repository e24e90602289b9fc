//! YAML configuration
//!
//! The file is deserialized into [Config] where every option name is a plain
//! string, [Config::validate] then checks the values and turns them into typed
//! settings.
//!
//! ```yaml
//! sample: PtNP
//! scans: [128, 129]
//! geometry:
//!   energy: 9000.0
//!   distance: 0.83
//!   outofplane_angle: 35.2
//!   inplane_angle: -1.4
//!   beam_center: [1104, 1250]
//!   rocking_angle: outofplane
//!   rocking_start: 17.5
//!   rocking_step: 0.01
//! preprocessing:
//!   roi: [1000, 1200, 1150, 1350]
//!   binning: [1, 2, 2]
//!   centering_method: max_com
//!   center_fft: crop_sym_ZYX
//! postprocessing:
//!   strain_method: central
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::center_fft::{Centering, FftPolicy, FftSizeAdapter};
use crate::detector::{Binning, Roi};
use crate::error::{ConfigurationError, Result};
use crate::geometry::{Geometry, ReferenceAxis, RockingAxis};
use crate::grid::InterpolationMethod;
use crate::peak::PeakMethod;
use crate::phase::{
    ApodizationWindow, OffsetMethod, OpticalPathCorrection, RampMethod, StrainMethod,
};

/// `h·c` in eV·m
const HC: f64 = 1.239_841_98e-6;

/// Diffractometer geometry as written in the configuration file
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// X-ray energy in eV
    pub energy: Option<f64>,
    /// sample to detector distance in m
    pub distance: f64,
    /// vertical and horizontal pixel size in m
    pub pixel_size: [f64; 2],
    pub outofplane_angle: f64,
    pub inplane_angle: f64,
    /// full detector pixel `[row, column]` of the direct beam at zero detector angles
    pub beam_center: [f64; 2],
    pub rocking_angle: String,
    pub rocking_start: f64,
    pub rocking_step: f64,
}
impl Default for GeometryConfig {
    fn default() -> Self {
        let geometry = Geometry::default();
        Self {
            energy: None,
            distance: geometry.distance,
            pixel_size: geometry.pixel_size,
            outofplane_angle: geometry.outofplane_angle,
            inplane_angle: geometry.inplane_angle,
            beam_center: geometry.beam_center,
            rocking_angle: "outofplane".into(),
            rocking_start: geometry.rocking_start,
            rocking_step: geometry.rocking_step,
        }
    }
}

/// Preprocessing options as written in the configuration file
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// `[y0, y1, x0, x1]` in the full detector frame, the whole frame if missing
    pub roi: Option<[i64; 4]>,
    pub binning: [i64; 3],
    pub centering_method: String,
    /// Bragg peak in the full detector frame for the `user` centering method
    pub bragg_peak: Option<[i64; 3]>,
    pub center_fft: String,
    pub pad_size: Option<[usize; 3]>,
    /// keeps the Bragg peak at the center of the FFT window even if the
    /// centering method differs
    pub fix_bragg: Option<[i64; 3]>,
    pub interpolation_method: String,
    /// reference axis the Bragg vector is aligned with after regridding
    pub align_q: Option<String>,
    pub fit_rocking_curve: bool,
}
impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            roi: None,
            binning: [1, 1, 1],
            centering_method: "max".into(),
            bragg_peak: None,
            center_fft: "crop_sym_ZYX".into(),
            pad_size: None,
            fix_bragg: None,
            interpolation_method: "linearized".into(),
            align_q: None,
            fit_rocking_curve: true,
        }
    }
}

/// Postprocessing options as written in the configuration file
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PostprocessingConfig {
    pub skip_unwrap: bool,
    pub threshold_unwrap_refraction: f64,
    pub phase_ramp_removal: String,
    pub threshold_gradient: f64,
    pub isosurface_strain: f64,
    pub offset_method: String,
    pub phase_offset: f64,
    pub phase_offset_origin: Option<[usize; 3]>,
    pub half_width_avg_phase: usize,
    pub apodize: bool,
    pub apodization_window: String,
    pub apodization_alpha: [f64; 3],
    pub apodization_mu: [f64; 3],
    pub apodization_sigma: [f64; 3],
    pub invert_phase: bool,
    pub correct_refraction: bool,
    pub correct_absorption: bool,
    pub dispersion: f64,
    pub absorption: f64,
    pub ref_axis_q: String,
    pub strain_method: String,
}
impl Default for PostprocessingConfig {
    fn default() -> Self {
        Self {
            skip_unwrap: false,
            threshold_unwrap_refraction: 0.05,
            phase_ramp_removal: "gradient".into(),
            threshold_gradient: 1.,
            isosurface_strain: 0.3,
            offset_method: "mean".into(),
            phase_offset: 0.,
            phase_offset_origin: None,
            half_width_avg_phase: 0,
            apodize: false,
            apodization_window: "blackman".into(),
            apodization_alpha: [1.; 3],
            apodization_mu: [0.; 3],
            apodization_sigma: [0.3; 3],
            invert_phase: true,
            correct_refraction: false,
            correct_absorption: false,
            dispersion: 4.1184e-05,
            absorption: 3.4298e-06,
            ref_axis_q: "y".into(),
            strain_method: "forward".into(),
        }
    }
}

/// Raw configuration file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub sample: String,
    pub scans: Vec<u32>,
    pub geometry: GeometryConfig,
    pub preprocessing: PreprocessingConfig,
    pub postprocessing: PostprocessingConfig,
}

/// Validated preprocessing settings
#[derive(Debug, Clone, Serialize)]
pub struct PreprocessingSettings {
    pub roi: Option<Roi>,
    pub binning: Binning,
    pub peak_method: PeakMethod,
    pub user_peak: Option<[i64; 3]>,
    pub policy: FftPolicy,
    pub pad_size: Option<[usize; 3]>,
    pub centering: Centering,
    pub interpolation: InterpolationMethod,
    pub align_q: Option<ReferenceAxis>,
    pub fit_rocking_curve: bool,
}
impl PreprocessingSettings {
    /// The FFT size adapter of the settings
    pub fn fft_size_adapter(&self) -> FftSizeAdapter {
        let adapter = FftSizeAdapter::from_policy(self.policy).centering(self.centering);
        match self.pad_size {
            Some(pad_size) => adapter.pad_size(pad_size),
            None => adapter,
        }
    }
}

/// Validated postprocessing settings
#[derive(Debug, Clone, Serialize)]
pub struct PostprocessingSettings {
    pub skip_unwrap: bool,
    pub threshold_unwrap: f64,
    pub ramp_method: RampMethod,
    pub threshold_gradient: f64,
    pub isosurface_strain: f64,
    pub offset_method: OffsetMethod,
    pub phase_offset: f64,
    pub phase_offset_origin: Option<[usize; 3]>,
    pub half_width_avg_phase: usize,
    pub apodization: Option<ApodizationWindow>,
    pub invert_phase: bool,
    pub optical_path: Option<OpticalPathCorrection>,
    pub ref_axis_q: ReferenceAxis,
    pub strain_method: StrainMethod,
}

fn fraction(name: &'static str, value: f64) -> std::result::Result<f64, ConfigurationError> {
    if (0. ..=1.).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigurationError::OutOfRange {
            name,
            value,
            range: "[0, 1]",
        })
    }
}

fn positive(name: &'static str, value: f64) -> std::result::Result<f64, ConfigurationError> {
    if value > 0. {
        Ok(value)
    } else {
        Err(ConfigurationError::OutOfRange {
            name,
            value,
            range: "> 0",
        })
    }
}

impl GeometryConfig {
    pub fn validate(&self) -> std::result::Result<Geometry, ConfigurationError> {
        let wavelength = self
            .energy
            .map(|e| positive("energy", e).map(|e| HC / e))
            .transpose()?;
        positive("distance", self.distance)?;
        positive("pixel_size", self.pixel_size[0])?;
        positive("pixel_size", self.pixel_size[1])?;
        Ok(Geometry {
            wavelength,
            distance: self.distance,
            pixel_size: self.pixel_size,
            outofplane_angle: self.outofplane_angle,
            inplane_angle: self.inplane_angle,
            beam_center: self.beam_center,
            rocking_axis: ConfigurationError::parse::<RockingAxis>(
                "rocking angle",
                &self.rocking_angle,
            )?,
            rocking_start: self.rocking_start,
            rocking_step: self.rocking_step,
        })
    }
}

impl PreprocessingConfig {
    pub fn validate(&self) -> std::result::Result<PreprocessingSettings, ConfigurationError> {
        let peak_method: PeakMethod =
            ConfigurationError::parse("peak method", &self.centering_method)?;
        if peak_method == PeakMethod::User && self.bragg_peak.is_none() {
            return Err(ConfigurationError::MissingParameter("bragg_peak"));
        }
        let policy: FftPolicy = ConfigurationError::parse("FFT policy", &self.center_fft)?;
        if policy.needs_pad_size() && self.pad_size.is_none() {
            return Err(ConfigurationError::MissingPadSize(policy.to_string()));
        }
        let centering = match (self.fix_bragg, peak_method) {
            (Some(peak), _) => Centering::Fixed(peak),
            (None, PeakMethod::User) => Centering::Fixed(self.bragg_peak.unwrap_or_default()),
            (None, PeakMethod::Skip) => Centering::default(),
            (None, method) => Centering::Estimator(method),
        };
        Ok(PreprocessingSettings {
            roi: self.roi.map(Roi::new).transpose()?,
            binning: Binning::new(self.binning)?,
            peak_method,
            user_peak: self.bragg_peak,
            policy,
            pad_size: self.pad_size,
            centering,
            interpolation: ConfigurationError::parse(
                "interpolation method",
                &self.interpolation_method,
            )?,
            align_q: self
                .align_q
                .as_deref()
                .map(|axis| ConfigurationError::parse("reference axis", axis))
                .transpose()?,
            fit_rocking_curve: self.fit_rocking_curve,
        })
    }
}

impl PostprocessingConfig {
    pub fn validate(&self) -> std::result::Result<PostprocessingSettings, ConfigurationError> {
        let apodization = if self.apodize {
            Some(ApodizationWindow::new(
                &self.apodization_window,
                self.apodization_alpha,
                self.apodization_mu,
                self.apodization_sigma,
            )?)
        } else {
            None
        };
        let threshold_unwrap =
            fraction("threshold_unwrap_refraction", self.threshold_unwrap_refraction)?;
        let optical_path = (self.correct_refraction || self.correct_absorption).then(|| {
            OpticalPathCorrection {
                dispersion: if self.correct_refraction {
                    self.dispersion
                } else {
                    0.
                },
                absorption: self.correct_absorption.then_some(self.absorption),
                threshold: threshold_unwrap,
            }
        });
        Ok(PostprocessingSettings {
            skip_unwrap: self.skip_unwrap,
            threshold_unwrap,
            ramp_method: ConfigurationError::parse("phase ramp method", &self.phase_ramp_removal)?,
            threshold_gradient: positive("threshold_gradient", self.threshold_gradient)?,
            isosurface_strain: fraction("isosurface_strain", self.isosurface_strain)?,
            offset_method: ConfigurationError::parse("offset method", &self.offset_method)?,
            phase_offset: self.phase_offset,
            phase_offset_origin: self.phase_offset_origin,
            half_width_avg_phase: self.half_width_avg_phase,
            apodization,
            invert_phase: self.invert_phase,
            optical_path,
            ref_axis_q: ConfigurationError::parse("reference axis", &self.ref_axis_q)?,
            strain_method: ConfigurationError::parse("strain method", &self.strain_method)?,
        })
    }
}

impl Config {
    /// Loads the configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_yml::from_reader(BufReader::new(file))?)
    }
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yml::from_str(yaml)?)
    }
    /// Checks every option and returns the typed settings
    pub fn validate(
        &self,
    ) -> std::result::Result<(Geometry, PreprocessingSettings, PostprocessingSettings), ConfigurationError>
    {
        Ok((
            self.geometry.validate()?,
            self.preprocessing.validate()?,
            self.postprocessing.validate()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_yaml("sample: PtNP\nscans: [1, 2]\n").unwrap();
        assert_eq!(config.scans, vec![1, 2]);
        let (geometry, pre, post) = config.validate().unwrap();
        assert!(geometry.wavelength.is_none());
        assert_eq!(pre.policy, FftPolicy::CropSymZYX);
        assert_eq!(pre.centering, Centering::Estimator(PeakMethod::Max));
        assert_eq!(post.strain_method, StrainMethod::Forward);
        assert!(post.apodization.is_none());
        assert!(post.optical_path.is_none());
    }

    #[test]
    fn typed_settings() {
        let yaml = r#"
geometry:
  energy: 9000.0
  rocking_angle: inplane
preprocessing:
  roi: [0, 64, 10, 74]
  binning: [1, 2, 2]
  centering_method: user
  bragg_peak: [10, 32, 40]
  center_fft: pad_sym_Z
  pad_size: [64, 0, 0]
  interpolation_method: crystal
  align_q: y
postprocessing:
  apodize: true
  apodization_window: tukey
  apodization_alpha: [0.5, 0.5, 0.5]
  correct_refraction: true
  ref_axis_q: z
  strain_method: defect
"#;
        let (geometry, pre, post) = Config::from_yaml(yaml).unwrap().validate().unwrap();
        approx::assert_abs_diff_eq!(geometry.wavelength.unwrap(), 1.3776e-10, epsilon = 1e-13);
        assert_eq!(geometry.rocking_axis, RockingAxis::Inplane);
        assert_eq!(pre.centering, Centering::Fixed([10, 32, 40]));
        assert_eq!(pre.interpolation, InterpolationMethod::Exact);
        assert_eq!(pre.align_q, Some(ReferenceAxis::Y));
        assert_eq!(pre.fft_size_adapter().policy(), FftPolicy::PadSymZ);
        assert_eq!(
            post.apodization,
            Some(ApodizationWindow::Tukey { alpha: [0.5; 3] })
        );
        let optical_path = post.optical_path.unwrap();
        assert!(optical_path.absorption.is_none());
        assert_eq!(post.ref_axis_q, ReferenceAxis::Z);
    }

    #[test]
    fn invalid_options() {
        let mut config = Config::default();
        config.preprocessing.center_fft = "crop_everything".into();
        assert!(matches!(
            config.preprocessing.validate(),
            Err(ConfigurationError::UnknownOption { .. })
        ));
        let mut config = Config::default();
        config.preprocessing.center_fft = "pad_sym_ZYX".into();
        assert!(matches!(
            config.preprocessing.validate(),
            Err(ConfigurationError::MissingPadSize(_))
        ));
        let mut config = Config::default();
        config.preprocessing.roi = Some([10, 5, 0, 4]);
        assert!(matches!(
            config.preprocessing.validate(),
            Err(ConfigurationError::Roi(_))
        ));
        let mut config = Config::default();
        config.postprocessing.isosurface_strain = 1.5;
        assert!(config.postprocessing.validate().is_err());
        let mut config = Config::default();
        config.preprocessing.centering_method = "user".into();
        assert!(matches!(
            config.preprocessing.validate(),
            Err(ConfigurationError::MissingParameter("bragg_peak"))
        ));
    }
}

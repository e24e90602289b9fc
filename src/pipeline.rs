//! Scan processing pipelines
//!
//! [preprocess_scan] takes the detector frames of a rocking scan to an
//! orthonormal reciprocal space grid, [postprocess_scan] takes a reconstructed
//! object to its displacement and strain fields.

use std::path::Path;

use nalgebra as na;
use ndarray::Array3;
use serde::Serialize;

use crate::center_fft::FftPolicy;
use crate::config::{PostprocessingSettings, PreprocessingSettings};
use crate::context::ScanContext;
use crate::detector::{DetectorSampling, PeakPosition, Roi};
use crate::error::{DataShapeError, Result};
use crate::geometry::{planar_distance, rotation_onto, Geometry};
use crate::grid::{DetectorVolume, InterpolationMethod};
use crate::io::{save_summary, DetectorScan, NpzOutput, Reconstruction};
use crate::peak::{PeakEstimates, PeakFinder, PeakMethod, RockingCurveFit};
use crate::phase::{PhaseManipulator, Ramp};
use crate::volume::{
    bin, bin_mask, center_com, check_mask, crop, dims, fold_invalid, FrameValidity, PadWidth,
    QAxes,
};

/// Scalar results of the preprocessing of a scan
#[derive(Debug, Clone, Serialize)]
pub struct PreprocessingSummary {
    pub sample: String,
    pub scan: u32,
    pub peak_method: PeakMethod,
    pub bragg_peak: Option<PeakPosition>,
    pub estimates: Option<PeakEstimates>,
    pub rocking_curve: Option<RockingCurveFit>,
    /// policy applied by the FFT size adapter
    pub policy: FftPolicy,
    pub pad_width: PadWidth,
    pub interpolation: InterpolationMethod,
    pub shape: [usize; 3],
    /// Bragg vector at the center of the detector volume in 1/nm
    pub q_bragg: [f64; 3],
    pub voxel_size: [f64; 3],
}

/// Orthogonalized diffraction pattern
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub data: Array3<f64>,
    pub mask: Array3<bool>,
    pub q: QAxes,
    pub frames: FrameValidity,
    pub transform: Option<na::Matrix3<f64>>,
    pub summary: PreprocessingSummary,
}
impl Preprocessed {
    /// Writes the arrays into the NPZ archive `path` and the pickled summary next to it
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut npz = NpzOutput::create(path)?;
        npz.volume("data", &self.data)?
            .mask("mask", &self.mask)?
            .q_axes(&self.q)?
            .frames(&self.frames)?
            .pad_width(&self.summary.pad_width)?;
        if let Some(transform) = &self.transform {
            npz.matrix("transform", transform)?;
        }
        save_summary(&self.summary, path.with_extension("pkl"))
    }
}

/// Crops the detector frames to the region of interest
fn crop_to_roi(
    data: &Array3<f64>,
    mask: &Array3<bool>,
    roi: &Roi,
) -> std::result::Result<(Array3<f64>, Array3<bool>), DataShapeError> {
    let [n0, n1, n2] = dims(data);
    let [y0, y1, x0, x1] = roi.as_array();
    if y0 < 0 || x0 < 0 || y1 > n1 as i64 || x1 > n2 as i64 {
        return Err(DataShapeError::Array {
            name: "data".into(),
            shape: vec![n0 as u64, n1 as u64, n2 as u64],
            expected: "frames containing the region of interest",
        });
    }
    let ranges = [
        (0, n0),
        (y0 as usize, y1 as usize),
        (x0 as usize, x1 as usize),
    ];
    Ok((crop(data, &ranges), crop(mask, &ranges)))
}

/// Detector frames to orthonormal reciprocal space grid
///
/// The frames are cropped to the region of interest and binned, the Bragg
/// peak is located, the volume is resized to FFT-compatible sizes and finally
/// regridded.
pub fn preprocess_scan(
    scan: DetectorScan,
    geometry: &Geometry,
    settings: &PreprocessingSettings,
    ctx: &ScanContext,
) -> Result<Preprocessed> {
    let DetectorScan {
        data,
        mask,
        mut frames,
    } = scan;
    check_mask(&data, &mask)?;
    frames.check_extent(dims(&data)[0])?;
    let [_, ny, nx] = dims(&data);
    let roi = settings.roi.unwrap_or_else(|| Roi::full(ny, nx));
    let (data, mask) = crop_to_roi(&data, &mask, &roi)?;

    let factors = settings.binning.factors();
    let geometry = if factors[0] > 1 {
        frames.bin(factors[0] as usize)?;
        geometry.clone().rocking_binning(factors[0] as usize)
    } else {
        geometry.clone()
    };
    let factors = factors.map(|f| f as usize);
    let mut data = bin(&data, factors);
    let mut mask = bin_mask(&mask, factors);
    fold_invalid(&mut data, &mut mask);
    ctx.info(format_args!("data shape after cropping and binning: {:?}", dims(&data)));

    let sampling = DetectorSampling::new(roi, settings.binning);
    let mut finder = PeakFinder::from_method(settings.peak_method, sampling);
    if let Some(peak) = settings.user_peak {
        finder = finder.user_peak(peak);
    }
    let finder = finder.search(&data, ctx)?;
    let bragg_peak = finder.bragg_peak().ok();
    match &bragg_peak {
        Some(peak) => ctx.info(format_args!("Bragg peak: {}", peak)),
        None => ctx.info(format_args!("Bragg peak undefined with method {}", finder.method())),
    }
    let rocking_curve = if settings.fit_rocking_curve {
        let tilt = frames.frame_angles(geometry.rocking_start, geometry.rocking_step);
        finder.fit_rocking_curve(&data, Some(tilt.as_slice()), None, ctx)
    } else {
        None
    };

    let fft = settings
        .fft_size_adapter()
        .sampling(sampling)
        .apply(&data, &mask, &frames, None, ctx)?;
    ctx.info(format_args!(
        "shape after the FFT size adapter ({}): {:?}",
        fft.policy,
        dims(&fft.data)
    ));

    let volume = DetectorVolume::new(
        &fft.data,
        &fft.mask,
        &fft.frames,
        &geometry,
        sampling,
        [fft.origin[1], fft.origin[2]],
    )?;
    let gridder = settings.interpolation.gridder(settings.align_q);
    ctx.info(format_args!("regridding with the {} method", gridder.method()));
    let grid = gridder.grid(&volume, &geometry, ctx)?;

    let summary = PreprocessingSummary {
        sample: ctx.sample().to_string(),
        scan: ctx.scan(),
        peak_method: finder.method(),
        bragg_peak,
        estimates: finder.estimates().copied(),
        rocking_curve,
        policy: fft.policy,
        pad_width: fft.pad_width,
        interpolation: gridder.method(),
        shape: dims(&grid.data),
        q_bragg: [grid.q_bragg.x, grid.q_bragg.y, grid.q_bragg.z],
        voxel_size: grid.q.voxel_sizes(),
    };
    Ok(Preprocessed {
        data: grid.data,
        mask: grid.mask,
        q: grid.q,
        frames: fft.frames,
        transform: grid.transform,
        summary,
    })
}

/// Scalar results of the postprocessing of a scan
#[derive(Debug, Clone, Serialize)]
pub struct PostprocessingSummary {
    pub sample: String,
    pub scan: u32,
    /// interplanar distance in nm
    pub planar_distance: f64,
    /// |q| in 1/nm
    pub q_norm: f64,
    /// Bragg vector in the frame of the reconstruction
    pub q_bragg: [f64; 3],
    /// nm
    pub voxel_size: [f64; 3],
    /// nm³
    pub crystal_volume: f64,
    pub phase_extent: f64,
    /// shift applied to center the modulus
    pub com_shift: [isize; 3],
    pub ramp: Option<Ramp>,
    pub optical_path_corrected: bool,
}

/// Displacement and strain of a reconstructed object
#[derive(Debug, Clone)]
pub struct Postprocessed {
    pub amp: Array3<f64>,
    pub phase: Array3<f64>,
    pub displacement: Array3<f64>,
    pub strain: Array3<f64>,
    pub bulk: Array3<bool>,
    pub summary: PostprocessingSummary,
}
impl Postprocessed {
    /// Writes the arrays into the NPZ archive `path` and the pickled summary next to it
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        NpzOutput::create(path)?
            .volume("amp", &self.amp)?
            .volume("phase", &self.phase)?
            .volume("displacement", &self.displacement)?
            .volume("strain", &self.strain)?
            .mask("bulk", &self.bulk)?
            .vector("q_bragg", &self.summary.q_bragg)?
            .vector("voxel_size", &self.summary.voxel_size)?;
        save_summary(&self.summary, path.with_extension("pkl"))
    }
}

/// Incident and exit wavevectors in the frame of the reconstruction, where
/// the Bragg vector is `q_bragg`
fn working_frame_wavevectors(
    geometry: &Geometry,
    q_bragg: &na::Vector3<f64>,
) -> Result<(na::Vector3<f64>, na::Vector3<f64>)> {
    let q_lab = geometry.q_lab()?;
    let rotation = rotation_onto(&q_lab, q_bragg)?;
    Ok((rotation * geometry.kin()?, rotation * geometry.kout()?))
}

/// Reconstructed object to displacement and strain
///
/// The object is centered on its modulus, the phase is unwrapped, detrended
/// and optionally averaged, apodized and corrected for refraction before the
/// strain is computed along the reference axis.
pub fn postprocess_scan(
    reconstruction: Reconstruction,
    geometry: &Geometry,
    settings: &PostprocessingSettings,
    ctx: &ScanContext,
) -> Result<Postprocessed> {
    let Reconstruction { modulus, phase, q } = reconstruction;
    q.check_shape(dims(&modulus))?;
    let voxel_size = q.voxel_sizes();
    let q_bragg = na::Vector3::from(q.center());
    let d = planar_distance(&q_bragg)?;
    ctx.info(format_args!(
        "q = {:.4} 1/nm, planar distance = {:.5} nm, voxel size = {:.2?} nm",
        q_bragg.norm(),
        d,
        voxel_size
    ));
    let angle = q_bragg.angle(&settings.ref_axis_q.unit_vector()).to_degrees();
    ctx.info(format_args!(
        "angle between q and the reference axis: {:.2} deg",
        angle
    ));

    let (modulus, phase, com_shift) = center_com(&modulus, &phase)?;
    let mut object = PhaseManipulator::new(modulus, phase)?;
    if settings.skip_unwrap {
        ctx.info(format_args!("phase unwrapping skipped"));
    } else {
        object.unwrap(settings.threshold_unwrap, ctx);
        object.center(settings.threshold_unwrap);
    }
    object.remove_ramp(
        settings.ramp_method,
        settings.isosurface_strain,
        settings.threshold_gradient,
        ctx,
    )?;
    object.remove_offset(
        settings.offset_method,
        settings.phase_offset_origin,
        settings.phase_offset,
        settings.isosurface_strain,
        ctx,
    )?;
    object.wrap();
    if settings.half_width_avg_phase > 0 {
        ctx.info(format_args!(
            "phase averaging over {0}x{0}x{0} voxels",
            2 * settings.half_width_avg_phase + 1
        ));
        object.average(settings.half_width_avg_phase, settings.isosurface_strain);
    }
    if let Some(window) = &settings.apodization {
        object.with_ramp_restored(|object| object.apodize(window, ctx));
        // the apodized phase is wrapped around the restored ramp
        if !settings.skip_unwrap {
            ctx.debug(format_args!("unwrapping the apodized phase"));
            object.unwrap(settings.threshold_unwrap, ctx);
            object.center(settings.threshold_unwrap);
        }
        object.wrap();
    }
    if settings.invert_phase {
        object.invert();
    }
    let mut optical_path_corrected = false;
    if let Some(correction) = &settings.optical_path {
        match working_frame_wavevectors(geometry, &q_bragg) {
            Ok((kin, kout)) => {
                optical_path_corrected = object
                    .correct_optical_path(
                        correction,
                        &kin,
                        &kout,
                        voxel_size,
                        geometry.wavelength_nm(),
                        ctx,
                    )
                    .is_some();
            }
            Err(e) => ctx.warn(format_args!("optical path correction skipped: {}", e)),
        }
        object.remove_offset(
            settings.offset_method,
            settings.phase_offset_origin,
            settings.phase_offset,
            settings.isosurface_strain,
            ctx,
        )?;
        object.wrap();
    }

    let strain = object.strain(settings.ref_axis_q, voxel_size, d, settings.strain_method);
    let displacement = object.displacement(d);
    let bulk = object.support(settings.isosurface_strain);
    let crystal_volume = object.volume(settings.isosurface_strain, voxel_size);
    ctx.info(format_args!("estimated crystal volume: {:.0} nm3", crystal_volume));

    let summary = PostprocessingSummary {
        sample: ctx.sample().to_string(),
        scan: ctx.scan(),
        planar_distance: d,
        q_norm: q_bragg.norm(),
        q_bragg: [q_bragg.x, q_bragg.y, q_bragg.z],
        voxel_size,
        crystal_volume,
        phase_extent: object.extent(),
        com_shift,
        ramp: object.ramp().copied(),
        optical_path_corrected,
    };
    let (amp, phase) = object.into_parts();
    Ok(Postprocessed {
        amp,
        phase,
        displacement,
        strain,
        bulk,
        summary,
    })
}

/// Loads, preprocesses and saves one scan
pub fn preprocess_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    geometry: &Geometry,
    settings: &PreprocessingSettings,
    ctx: &ScanContext,
) -> Result<PreprocessingSummary> {
    let scan = DetectorScan::load(input)?;
    let preprocessed = preprocess_scan(scan, geometry, settings, ctx)?;
    preprocessed.save(output)?;
    Ok(preprocessed.summary)
}

/// Loads, postprocesses and saves one scan
pub fn postprocess_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    geometry: &Geometry,
    settings: &PostprocessingSettings,
    ctx: &ScanContext,
) -> Result<PostprocessingSummary> {
    let reconstruction = Reconstruction::load(input)?;
    let postprocessed = postprocess_scan(reconstruction, geometry, settings, ctx)?;
    postprocessed.save(output)?;
    Ok(postprocessed.summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fft_size::is_fft_compatible;
    use crate::grid::tests::geometry;

    fn detector_scan(shape: (usize, usize, usize), peak: [f64; 3]) -> DetectorScan {
        let data = Array3::from_shape_fn(shape, |(i, j, k)| {
            let r2 = (i as f64 - peak[0]).powi(2)
                + ((j as f64 - peak[1]) / 2.).powi(2)
                + ((k as f64 - peak[2]) / 2.).powi(2);
            1e4 * (-r2 / 8.).exp() + 1.
        });
        DetectorScan {
            mask: Array3::from_elem(shape, false),
            frames: FrameValidity::all_used(shape.0),
            data,
        }
    }

    #[test]
    fn roi_outside_of_the_frames() {
        let data = Array3::zeros((2, 4, 4));
        let mask = Array3::from_elem((2, 4, 4), false);
        let roi = Roi::new([0, 5, 0, 4]).unwrap();
        assert!(crop_to_roi(&data, &mask, &roi).is_err());
    }

    #[test]
    fn preprocessing() {
        let yaml = r#"
preprocessing:
  roi: [100, 164, 120, 184]
  binning: [1, 2, 2]
  centering_method: max
  center_fft: crop_sym_ZYX
"#;
        let (_, settings, _) = Config::from_yaml(yaml).unwrap().validate().unwrap();
        let scan = detector_scan((24, 200, 200), [12., 132., 150.]);
        let ctx = ScanContext::new("test", 1);
        let result = preprocess_scan(scan, &geometry(), &settings, &ctx).unwrap();
        let shape = dims(&result.data);
        assert!(shape.iter().all(|&n| is_fft_compatible(n)));
        assert_eq!(shape, dims(&result.mask));
        assert!(result.data.iter().all(|v| v.is_finite()));
        result.q.check_shape(shape).unwrap();
        result.frames.check_extent(shape[0]).unwrap();
        assert_eq!(result.summary.bragg_peak.unwrap().index, [12, 132, 150]);
        assert!(result.summary.rocking_curve.is_some());
        assert!(result.transform.is_some());
    }

    #[test]
    fn postprocessing() {
        let shape = (16, 16, 16);
        let modulus = Array3::from_shape_fn(shape, |(i, j, k)| {
            let r2 = (i as f64 - 8.).powi(2) + (j as f64 - 8.).powi(2) + (k as f64 - 8.).powi(2);
            if r2 < 25. {
                1.
            } else {
                0.
            }
        });
        // uniform 0.1 % strain along y
        let phase = Array3::from_shape_fn(shape, |(_, j, _)| {
            crate::phase::wrap(0.05 * j as f64, -std::f64::consts::PI, 2. * std::f64::consts::PI)
        });
        let axis = |center: f64| {
            ndarray::Array1::from_shape_fn(16, |i| center + (i as f64 - 8.) * 0.02)
        };
        let q = QAxes::new(axis(0.), axis(25.), axis(0.));
        let yaml = "postprocessing:\n  invert_phase: false\n  phase_ramp_removal: least_squares\n";
        let (geometry, _, settings) = Config::from_yaml(yaml).unwrap().validate().unwrap();
        let result = postprocess_scan(
            Reconstruction { modulus, phase, q },
            &geometry,
            &settings,
            &ScanContext::default(),
        )
        .unwrap();
        // the ramp removal takes away the uniform strain
        for (s, &b) in result.strain.iter().zip(result.bulk.iter()) {
            if b {
                approx::assert_abs_diff_eq!(*s, 0., epsilon = 1e-9);
            }
        }
        approx::assert_abs_diff_eq!(result.summary.q_norm, 25., epsilon = 1e-12);
        assert!(result.summary.crystal_volume > 0.);
        assert!(result.summary.ramp.is_some());
        assert!(!result.summary.optical_path_corrected);
    }

    #[test]
    fn apodization_keeps_the_bulk_unstrained() {
        let shape = (16, 16, 16);
        let modulus = Array3::from_shape_fn(shape, |(i, j, k)| {
            let r2 = (i as f64 - 8.).powi(2) + (j as f64 - 8.).powi(2) + (k as f64 - 8.).powi(2);
            if r2 < 36. {
                1.
            } else {
                0.
            }
        });
        // the ramp wraps several times across the crystal
        let phase = Array3::from_shape_fn(shape, |(_, j, _)| {
            crate::phase::wrap(0.8 * j as f64, -std::f64::consts::PI, 2. * std::f64::consts::PI)
        });
        let axis = |center: f64| {
            ndarray::Array1::from_shape_fn(16, |i| center + (i as f64 - 8.) * 0.02)
        };
        let q = QAxes::new(axis(0.), axis(25.), axis(0.));
        let yaml = "postprocessing:
  invert_phase: false
  phase_ramp_removal: least_squares
  apodize: true
  apodization_window: tukey
  apodization_alpha: [0.0, 0.0, 0.0]
";
        let (geometry, _, settings) = Config::from_yaml(yaml).unwrap().validate().unwrap();
        assert!(settings.apodization.is_some());
        let result = postprocess_scan(
            Reconstruction { modulus, phase, q },
            &geometry,
            &settings,
            &ScanContext::default(),
        )
        .unwrap();
        approx::assert_abs_diff_eq!(
            result.summary.phase_extent,
            2. * std::f64::consts::PI,
            epsilon = 1e-9
        );
        let bulk = &result.bulk;
        let mut interior = 0;
        for ((i, j, k), s) in result.strain.indexed_iter() {
            if j == 0 || j + 1 == shape.1 {
                continue;
            }
            if bulk[[i, j - 1, k]] && bulk[[i, j, k]] && bulk[[i, j + 1, k]] {
                approx::assert_abs_diff_eq!(*s, 0., epsilon = 1e-6);
                interior += 1;
            }
        }
        assert!(interior > 0);
    }
}

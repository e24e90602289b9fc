use std::f64::consts::PI;

use approx::assert_abs_diff_eq;
use bragg_cdi::{
    fft_size::is_fft_compatible,
    grid::{ExactGridder, LinearizedGridder},
    phase::{wrap, RampMethod},
    volume::dims,
    Binning, ConfigurationError, DetectorSampling, DetectorVolume, Error, FftSizeAdapter,
    FrameValidity, Geometry, Gridder, PeakFinder, PhaseManipulator, RockingAxis, Roi,
    ScanContext,
};
use ndarray::Array3;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn gaussian(shape: (usize, usize, usize), center: [f64; 3], sigma: f64) -> Array3<f64> {
    Array3::from_shape_fn(shape, |(i, j, k)| {
        let r2 = (i as f64 - center[0]).powi(2)
            + (j as f64 - center[1]).powi(2)
            + (k as f64 - center[2]).powi(2);
        1e3 * (-r2 / (2. * sigma * sigma)).exp()
    })
}

fn full_detector(shape: (usize, usize, usize)) -> DetectorSampling {
    DetectorSampling::new(Roi::full(shape.1, shape.2), Binning::default())
}

#[test]
fn estimators_on_a_clean_gaussian() {
    let shape = (64, 128, 128);
    let data = gaussian(shape, [32., 60., 70.], 2.);
    let ctx = ScanContext::new("gaussian", 1);
    for method in ["max", "com", "max_com"] {
        let finder = PeakFinder::new(method, full_detector(shape))
            .unwrap()
            .search(&data, &ctx)
            .unwrap();
        assert_eq!(finder.bragg_peak().unwrap().index, [32, 60, 70], "{method}");
    }
}

#[test]
fn maximum_under_noise() {
    let shape = (32, 48, 48);
    let mut rng = StdRng::seed_from_u64(42);
    let data = gaussian(shape, [12., 30., 20.], 2.).mapv(|v| v + rng.gen_range(0. ..5.));
    let finder = PeakFinder::new("max", full_detector(shape))
        .unwrap()
        .search(&data, &ScanContext::default())
        .unwrap();
    assert_eq!(finder.bragg_peak().unwrap().index, [12, 30, 20]);
}

#[test]
fn peak_centered_symmetric_crop() {
    let shape = (64, 128, 128);
    let data = gaussian(shape, [32., 60., 70.], 2.);
    let mask = Array3::from_elem(shape, false);
    let frames = FrameValidity::all_used(shape.0);
    let result = FftSizeAdapter::new("crop_sym_ZYX")
        .unwrap()
        .sampling(full_detector(shape))
        .apply(&data, &mask, &frames, None, &ScanContext::default())
        .unwrap();
    let out = dims(&result.data);
    assert_eq!(out, dims(&result.mask));
    for (axis, n) in out.into_iter().enumerate() {
        assert!(is_fft_compatible(n));
        assert!(n <= dims(&data)[axis]);
    }
    let center = out.map(|n| n / 2);
    assert_eq!(result.data[center], data[[32, 60, 70]]);
    assert_eq!(result.pad_width, [0; 6]);
}

#[test]
fn pad_sizes_are_checked_before_any_array_is_touched() {
    let shape = (80, 16, 16);
    let data = gaussian(shape, [40., 8., 8.], 2.);
    let mask = Array3::from_elem(shape, false);
    let frames = FrameValidity::all_used(shape.0);
    let ctx = ScanContext::default();
    let adapter = FftSizeAdapter::new("pad_sym_Z").unwrap();
    let too_small = adapter
        .clone()
        .pad_size([70, 16, 16])
        .apply(&data, &mask, &frames, None, &ctx);
    assert!(matches!(
        too_small,
        Err(Error::Configuration(ConfigurationError::PadSizeTooSmall { .. }))
    ));
    let incompatible = adapter
        .pad_size([66, 16, 16])
        .apply(&data, &mask, &frames, None, &ctx);
    assert!(matches!(
        incompatible,
        Err(Error::Configuration(ConfigurationError::PadSizeNotFftCompatible { .. }))
    ));
}

#[test]
fn skip_leaves_everything_untouched() {
    let shape = (9, 11, 13);
    let data = gaussian(shape, [4., 5., 6.], 1.5);
    let mut mask = Array3::from_elem(shape, false);
    mask[[0, 0, 0]] = true;
    let frames = FrameValidity::from_codes(&[1, 1, 1, 1, 1, 1, 1, 1, 1, 0]).unwrap();
    let result = FftSizeAdapter::new("skip")
        .unwrap()
        .apply(&data, &mask, &frames, None, &ScanContext::default())
        .unwrap();
    assert_eq!(result.data, data);
    assert_eq!(result.mask, mask);
    assert_eq!(result.frames, frames);
    assert_eq!(result.pad_width, [0; 6]);
}

fn geometry() -> Geometry {
    Geometry {
        wavelength: Some(1.3776e-10),
        distance: 0.83,
        pixel_size: [55e-6; 2],
        outofplane_angle: 35.2,
        inplane_angle: -1.4,
        beam_center: [10., 12.],
        rocking_axis: RockingAxis::Outofplane,
        rocking_start: 17.5,
        rocking_step: 0.01,
    }
}

#[test]
fn regridded_volumes_have_no_nan() {
    let shape = (16, 24, 24);
    let data = gaussian(shape, [8., 12., 12.], 3.);
    let mut mask = Array3::from_elem(shape, false);
    mask[[8, 3, 4]] = true;
    let frames = FrameValidity::all_used(shape.0);
    let geometry = geometry();
    let sampling = DetectorSampling::new(
        Roi::new([200, 248, 300, 348]).unwrap(),
        Binning::new([1, 2, 2]).unwrap(),
    );
    let volume =
        DetectorVolume::new(&data, &mask, &frames, &geometry, sampling, [0, 0]).unwrap();
    let gridders: [Box<dyn Gridder>; 2] = [
        Box::new(LinearizedGridder::new(None)),
        Box::new(ExactGridder::new(None)),
    ];
    for gridder in gridders {
        let grid = gridder
            .grid(&volume, &geometry, &ScanContext::default())
            .unwrap();
        assert!(grid.data.iter().all(|v| v.is_finite()), "{}", gridder.method());
        assert_eq!(dims(&grid.data), dims(&grid.mask));
        grid.q.check_shape(dims(&grid.data)).unwrap();
        let populated = grid.mask.iter().filter(|m| !**m).count();
        assert!(populated > 0);
    }
}

#[test]
fn unwrap_and_ramp_round_trip() {
    let shape = (8, 10, 12);
    let ramp = |i: usize, j: usize, k: usize| 0.3 * i as f64 + 0.2 * j as f64 - 0.4 * k as f64;
    let phase = Array3::from_shape_fn(shape, |(i, j, k)| wrap(ramp(i, j, k), -PI, 2. * PI));
    let modulus = Array3::from_elem(shape, 1.);
    let ctx = ScanContext::default();
    let mut object = PhaseManipulator::new(modulus, phase).unwrap();
    object.unwrap(0.05, &ctx);
    let unwrapped = object.phase().clone();
    let offset = unwrapped[[0, 0, 0]] - ramp(0, 0, 0);
    for ((i, j, k), p) in unwrapped.indexed_iter() {
        assert_abs_diff_eq!(*p, ramp(i, j, k) + offset, epsilon = 1e-9);
    }
    object
        .remove_ramp(RampMethod::LeastSquares, 0.05, 1., &ctx)
        .unwrap();
    let detrended = object.phase();
    for p in detrended.iter() {
        assert_abs_diff_eq!(*p, detrended[[0, 0, 0]], epsilon = 1e-9);
    }
    object.add_ramp(1.);
    for (p, q) in object.phase().iter().zip(unwrapped.iter()) {
        assert_abs_diff_eq!(*p, *q, epsilon = 1e-9);
    }
}

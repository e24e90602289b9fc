//! Bragg coherent X-ray diffraction imaging
//!
//! Preprocessing of rocking scans ([pipeline::preprocess_scan]): region of
//! interest and binning, Bragg peak localization ([PeakFinder]), resizing to
//! FFT-compatible shapes ([FftSizeAdapter]) and regridding onto an orthonormal
//! reciprocal space grid ([grid]).
//!
//! Postprocessing of phase retrieval results ([pipeline::postprocess_scan]):
//! phase unwrapping, ramp and offset removal, apodization, refraction
//! correction, displacement and strain ([phase]).

pub mod center_fft;
pub mod config;
pub mod context;
pub mod detector;
pub mod error;
pub mod fft_size;
pub mod geometry;
pub mod grid;
pub mod io;
pub mod peak;
pub mod phase;
pub mod pipeline;
pub mod volume;

pub use center_fft::{Centering, FftPolicy, FftResult, FftSizeAdapter};
pub use config::{Config, PostprocessingSettings, PreprocessingSettings};
pub use context::ScanContext;
pub use detector::{Binning, DetectorFrame, DetectorSampling, PeakPosition, Roi};
pub use error::{ConfigurationError, DataShapeError, Error, GeometryError, Result};
pub use geometry::{Geometry, ReferenceAxis, RockingAxis};
pub use grid::{DetectorVolume, Gridder, InterpolationMethod, Orthogonalized};
pub use io::{DetectorScan, Reconstruction};
pub use peak::{PeakFinder, PeakMethod};
pub use phase::PhaseManipulator;
pub use pipeline::{
    postprocess_file, postprocess_scan, preprocess_file, preprocess_scan, Postprocessed,
    Preprocessed,
};
pub use volume::{FrameStatus, FrameValidity, QAxes};

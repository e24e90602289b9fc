/// Invalid or unsupported configuration, detected before any array is touched
#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error(r#"{kind} "{name}" is not recognized, expected one of {expected}"#)]
    UnknownOption {
        kind: &'static str,
        name: String,
        expected: String,
    },
    #[error("region of interest {0:?} is malformed, expected [y0, y1, x0, x1] with y0 < y1 and x0 < x1")]
    Roi([i64; 4]),
    #[error("binning factors {0:?} must be strictly positive")]
    Binning([i64; 3]),
    #[error("pad size {size} along axis {axis} does not meet FFT requirements (next valid size: {next})")]
    PadSizeNotFftCompatible { axis: usize, size: usize, next: usize },
    #[error("pad size {size} along axis {axis} is smaller than the current extent {extent}")]
    PadSizeTooSmall {
        axis: usize,
        size: usize,
        extent: usize,
    },
    #[error("policy {0} requires a pad size")]
    MissingPadSize(String),
    #[error("binning the rocking axis by {0} requires every frame to be used")]
    RockingBinning(usize),
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),
    #[error("parameter {name} = {value} is out of range ({range})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        range: &'static str,
    },
}

impl ConfigurationError {
    /// Parses an option name into one of the variants of `T`
    pub fn parse<T>(kind: &'static str, name: &str) -> std::result::Result<T, Self>
    where
        T: std::str::FromStr + strum::VariantNames,
    {
        name.parse().map_err(|_| Self::UnknownOption {
            kind,
            name: name.to_string(),
            expected: T::VARIANTS.join(", "),
        })
    }
}

/// Geometric inconsistency found while processing a scan
#[derive(thiserror::Error, Debug)]
pub enum GeometryError {
    #[error("the position of the Bragg peak is undefined with method {0}")]
    UndefinedPeak(String),
    #[error("peak position {position:?} is outside of the volume {shape:?}")]
    PeakOutOfBounds {
        position: [i64; 3],
        shape: [usize; 3],
    },
    #[error("degenerate symmetric box {0:?} around the peak")]
    DegenerateBox([usize; 3]),
    #[error("cropping axis {axis} to [{start}, {stop}) would discard the Bragg peak at {peak}")]
    PeakDiscarded {
        axis: usize,
        start: i64,
        stop: i64,
        peak: i64,
    },
    #[error("singular transformation matrix")]
    SingularTransform,
    #[error("cannot align {0:?} with the reference axis")]
    Alignment([f64; 3]),
    #[error("q vector is null")]
    NullQ,
    #[error("the phase ramp fit is singular")]
    SingularFit,
}

/// Arrays whose shapes disagree at a stage boundary
#[derive(thiserror::Error, Debug)]
pub enum DataShapeError {
    #[error("mask shape {mask:?} does not match volume shape {volume:?}")]
    Mask {
        volume: [usize; 3],
        mask: [usize; 3],
    },
    #[error("q axis {axis} has {len} values for a volume axis of {extent} voxels")]
    QAxis {
        axis: usize,
        len: usize,
        extent: usize,
    },
    #[error("q axis {0} needs at least 2 values to be extended")]
    QAxisTooShort(usize),
    #[error("{active} active frames for a volume with {extent} frames")]
    Frames { active: usize, extent: usize },
    #[error("frame status code {0} is not one of 1 (used), 0 (unused), -1 (padded)")]
    FrameCode(i8),
    #[error("array {name} has shape {shape:?}, expected {expected}")]
    Array {
        name: String,
        shape: Vec<u64>,
        expected: &'static str,
    },
    #[error("empty volume")]
    Empty,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration error")]
    Configuration(#[from] ConfigurationError),
    #[error("geometry error")]
    Geometry(#[from] GeometryError),
    #[error("data shape error")]
    DataShape(#[from] DataShapeError),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("array {0} is missing from {1}")]
    MissingArray(String, String),
    #[error("failed to parse the YAML configuration")]
    Yaml(#[from] serde_yml::Error),
    #[error("failed to pickle the scan summary")]
    Pickle(#[from] serde_pickle::Error),
}
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peak::PeakMethod;

    #[test]
    fn unknown_option_lists_the_names() {
        let method: PeakMethod = ConfigurationError::parse("peak method", "max_com").unwrap();
        assert_eq!(method, PeakMethod::MaxCom);
        match ConfigurationError::parse::<PeakMethod>("peak method", "maxx") {
            Err(ConfigurationError::UnknownOption {
                kind,
                name,
                expected,
            }) => {
                assert_eq!(kind, "peak method");
                assert_eq!(name, "maxx");
                assert!(expected.contains("max_com"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let err: Error = ConfigurationError::parse::<PeakMethod>("peak method", "")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Configuration(_)));
    }
}

//! Detector region of interest, binning and coordinate frames

use std::fmt;

use serde::Serialize;

use crate::error::ConfigurationError;

/// Detector region of interest `[y0, y1, x0, x1]` in unbinned pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Roi {
    pub y0: i64,
    pub y1: i64,
    pub x0: i64,
    pub x1: i64,
}
impl Roi {
    pub fn new(roi: [i64; 4]) -> Result<Self, ConfigurationError> {
        let [y0, y1, x0, x1] = roi;
        if y0 >= y1 || x0 >= x1 {
            return Err(ConfigurationError::Roi(roi));
        }
        Ok(Self { y0, y1, x0, x1 })
    }
    /// The whole frame of a `(ny, nx)` detector
    pub fn full(ny: usize, nx: usize) -> Self {
        Self {
            y0: 0,
            y1: ny as i64,
            x0: 0,
            x1: nx as i64,
        }
    }
    pub fn origin(&self) -> [i64; 2] {
        [self.y0, self.x0]
    }
    pub fn as_array(&self) -> [i64; 4] {
        [self.y0, self.y1, self.x0, self.x1]
    }
}

/// Binning factors of the array relative to the unbinned detector, one per axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Binning([i64; 3]);
impl Binning {
    pub fn new(binning: [i64; 3]) -> Result<Self, ConfigurationError> {
        if binning.iter().any(|&b| b < 1) {
            return Err(ConfigurationError::Binning(binning));
        }
        Ok(Self(binning))
    }
    pub fn factors(&self) -> [i64; 3] {
        self.0
    }
}
impl Default for Binning {
    fn default() -> Self {
        Self([1; 3])
    }
}

/// Frame a voxel index refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DetectorFrame {
    /// the full, unbinned detector
    FullDetector,
    /// the detector cropped to the region of interest and binned
    RegionOfInterest,
}

/// Voxel index of the Bragg peak in a given detector frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeakPosition {
    pub index: [i64; 3],
    pub frame: DetectorFrame,
}
impl fmt::Display for PeakPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [z, y, x] = self.index;
        write!(f, "({z}, {y}, {x}) [{:?}]", self.frame)
    }
}

/// Mapping between the full detector and the region of interest frames
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectorSampling {
    pub roi: Roi,
    pub binning: Binning,
}
impl DetectorSampling {
    pub fn new(roi: Roi, binning: Binning) -> Self {
        Self { roi, binning }
    }
    /// Position of a ROI-frame voxel in the full, unbinned detector
    pub fn to_full_detector(&self, index: [i64; 3]) -> PeakPosition {
        let b = self.binning.factors();
        let unbinned = [index[0] * b[0], index[1] * b[1], index[2] * b[2]];
        PeakPosition {
            index: self.offset(unbinned, 1),
            frame: DetectorFrame::FullDetector,
        }
    }
    /// Position of a full detector voxel in the cropped and binned frame
    pub fn to_region_of_interest(&self, index: [i64; 3]) -> PeakPosition {
        let b = self.binning.factors();
        let cropped = self.offset(index, -1);
        PeakPosition {
            index: [
                cropped[0].div_euclid(b[0]),
                cropped[1].div_euclid(b[1]),
                cropped[2].div_euclid(b[2]),
            ],
            frame: DetectorFrame::RegionOfInterest,
        }
    }
    /// Converts `position` into `frame`
    pub fn convert(&self, position: PeakPosition, frame: DetectorFrame) -> PeakPosition {
        match (position.frame, frame) {
            (DetectorFrame::FullDetector, DetectorFrame::RegionOfInterest) => {
                self.to_region_of_interest(position.index)
            }
            (DetectorFrame::RegionOfInterest, DetectorFrame::FullDetector) => {
                self.to_full_detector(position.index)
            }
            _ => position,
        }
    }
    /// Unbinned full detector coordinates of the center of a binned ROI pixel
    pub fn pixel_center(&self, row: f64, col: f64) -> [f64; 2] {
        let [_, by, bx] = self.binning.factors();
        [
            self.roi.y0 as f64 + row * by as f64 + 0.5 * (by - 1) as f64,
            self.roi.x0 as f64 + col * bx as f64 + 0.5 * (bx - 1) as f64,
        ]
    }
    fn offset(&self, index: [i64; 3], sign: i64) -> [i64; 3] {
        let [y0, x0] = self.roi.origin();
        [index[0], index[1] + sign * y0, index[2] + sign * x0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_roi() {
        assert!(Roi::new([10, 5, 0, 100]).is_err());
        assert!(Roi::new([0, 100, 0, 100]).is_ok());
    }

    #[test]
    fn malformed_binning() {
        assert!(Binning::new([1, 0, 2]).is_err());
    }

    #[test]
    fn frame_round_trip() {
        let sampling = DetectorSampling::new(
            Roi::new([100, 356, 200, 456]).unwrap(),
            Binning::new([1, 2, 2]).unwrap(),
        );
        let full = sampling.to_full_detector([10, 20, 30]);
        assert_eq!(full.index, [10, 140, 260]);
        assert_eq!(full.frame, DetectorFrame::FullDetector);
        let roi = sampling.convert(full, DetectorFrame::RegionOfInterest);
        assert_eq!(roi.index, [10, 20, 30]);
        assert_eq!(roi.frame, DetectorFrame::RegionOfInterest);
    }

    #[test]
    fn binned_pixel_center() {
        let sampling = DetectorSampling::new(
            Roi::new([100, 356, 200, 456]).unwrap(),
            Binning::new([1, 2, 2]).unwrap(),
        );
        assert_eq!(sampling.pixel_center(0., 1.), [100.5, 202.5]);
    }
}

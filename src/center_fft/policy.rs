use std::fmt;

use serde::Serialize;
use strum_macros::{EnumIter, EnumString, VariantNames};

/// What happens to one axis of the volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisRule {
    /// left unchanged
    Keep,
    /// cropped to the largest FFT size fitting the symmetric box around the peak
    CropPeak,
    /// cropped to the largest FFT size fitting the axis, around the middle of the axis
    CropCenter,
    /// padded to the requested size, the peak as close as possible to the middle
    PadPeak,
    /// padded to the next FFT size, evenly on both sides
    PadCenter,
}

/// Cropping and padding policies of the FFT size adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString, EnumIter, VariantNames)]
pub enum FftPolicy {
    #[strum(serialize = "crop_sym_ZYX")]
    CropSymZYX,
    #[strum(serialize = "crop_asym_ZYX")]
    CropAsymZYX,
    #[strum(serialize = "crop_sym_Z_crop_asym_YX")]
    CropSymZCropAsymYX,
    #[strum(serialize = "pad_sym_Z_crop_sym_YX")]
    PadSymZCropSymYX,
    #[strum(serialize = "pad_sym_Z_crop_asym_YX")]
    PadSymZCropAsymYX,
    #[strum(serialize = "pad_asym_Z_crop_sym_YX")]
    PadAsymZCropSymYX,
    #[strum(serialize = "pad_asym_Z_crop_asym_YX")]
    PadAsymZCropAsymYX,
    #[strum(serialize = "pad_sym_Z")]
    PadSymZ,
    #[strum(serialize = "pad_asym_Z")]
    PadAsymZ,
    #[strum(serialize = "pad_sym_ZYX")]
    PadSymZYX,
    #[strum(serialize = "pad_asym_ZYX")]
    PadAsymZYX,
    #[strum(serialize = "skip")]
    Skip,
}
impl FftPolicy {
    /// Rules of the rocking axis and of the two detector axes
    pub fn rules(&self) -> [AxisRule; 3] {
        use AxisRule::*;
        match self {
            FftPolicy::CropSymZYX => [CropPeak; 3],
            FftPolicy::CropAsymZYX => [CropCenter; 3],
            FftPolicy::CropSymZCropAsymYX => [CropPeak, CropCenter, CropCenter],
            FftPolicy::PadSymZCropSymYX => [PadPeak, CropPeak, CropPeak],
            FftPolicy::PadSymZCropAsymYX => [PadPeak, CropCenter, CropCenter],
            FftPolicy::PadAsymZCropSymYX => [PadCenter, CropPeak, CropPeak],
            FftPolicy::PadAsymZCropAsymYX => [PadCenter, CropCenter, CropCenter],
            FftPolicy::PadSymZ => [PadPeak, Keep, Keep],
            FftPolicy::PadAsymZ => [PadCenter, Keep, Keep],
            FftPolicy::PadSymZYX => [PadPeak; 3],
            FftPolicy::PadAsymZYX => [PadCenter; 3],
            FftPolicy::Skip => [Keep; 3],
        }
    }
    /// Checks if the policy pads to a size given by the caller
    pub fn needs_pad_size(&self) -> bool {
        self.rules().contains(&AxisRule::PadPeak)
    }
}
impl fmt::Display for FftPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FftPolicy::CropSymZYX => "crop_sym_ZYX",
            FftPolicy::CropAsymZYX => "crop_asym_ZYX",
            FftPolicy::CropSymZCropAsymYX => "crop_sym_Z_crop_asym_YX",
            FftPolicy::PadSymZCropSymYX => "pad_sym_Z_crop_sym_YX",
            FftPolicy::PadSymZCropAsymYX => "pad_sym_Z_crop_asym_YX",
            FftPolicy::PadAsymZCropSymYX => "pad_asym_Z_crop_sym_YX",
            FftPolicy::PadAsymZCropAsymYX => "pad_asym_Z_crop_asym_YX",
            FftPolicy::PadSymZ => "pad_sym_Z",
            FftPolicy::PadAsymZ => "pad_asym_Z",
            FftPolicy::PadSymZYX => "pad_sym_ZYX",
            FftPolicy::PadAsymZYX => "pad_asym_ZYX",
            FftPolicy::Skip => "skip",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn twelve_policies() {
        assert_eq!(FftPolicy::iter().count(), 12);
        for policy in FftPolicy::iter() {
            let parsed: FftPolicy = policy.to_string().parse().unwrap();
            assert_eq!(parsed, policy);
        }
    }

    #[test]
    fn pad_size_requirement() {
        assert!(FftPolicy::PadSymZ.needs_pad_size());
        assert!(FftPolicy::PadSymZYX.needs_pad_size());
        assert!(!FftPolicy::PadAsymZYX.needs_pad_size());
        assert!(!FftPolicy::Skip.needs_pad_size());
    }
}

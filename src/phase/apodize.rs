use std::f64::consts::PI;

use ndarray::{Array1, Array3, Axis, Zip};
use num_complex::Complex64;
use rustfft::{FftDirection, FftPlanner};
use serde::Serialize;

use crate::error::ConfigurationError;
use crate::volume::{dims, roll};

/// Windows applied to the diffraction pattern of the object
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApodizationWindow {
    Blackman,
    /// tapered cosine, `alpha` is the tapered fraction of each axis
    Tukey { alpha: [f64; 3] },
    /// gaussian over the normalized coordinates `[-1, 1]` of each axis
    Normal { mu: [f64; 3], sigma: [f64; 3] },
}
impl ApodizationWindow {
    pub const NAMES: [&'static str; 3] = ["blackman", "tukey", "normal"];
    /// Window `name` with its parameters
    pub fn new(
        name: &str,
        alpha: [f64; 3],
        mu: [f64; 3],
        sigma: [f64; 3],
    ) -> Result<Self, ConfigurationError> {
        match name {
            "blackman" => Ok(Self::Blackman),
            "tukey" => {
                if let Some(&a) = alpha.iter().find(|a| !(0. ..=1.).contains(*a)) {
                    return Err(ConfigurationError::OutOfRange {
                        name: "tukey_alpha",
                        value: a,
                        range: "[0, 1]",
                    });
                }
                Ok(Self::Tukey { alpha })
            }
            "normal" => {
                if let Some(&s) = sigma.iter().find(|s| **s <= 0.) {
                    return Err(ConfigurationError::OutOfRange {
                        name: "normal_sigma",
                        value: s,
                        range: "> 0",
                    });
                }
                Ok(Self::Normal { mu, sigma })
            }
            _ => Err(ConfigurationError::UnknownOption {
                kind: "apodization window",
                name: name.to_string(),
                expected: Self::NAMES.join(", "),
            }),
        }
    }
    /// 1D window of `n` samples along `axis`
    fn profile(&self, axis: usize, n: usize) -> Array1<f64> {
        if n < 2 {
            return Array1::ones(n);
        }
        let x = Array1::from_shape_fn(n, |i| i as f64 / (n - 1) as f64);
        match *self {
            ApodizationWindow::Blackman => x.mapv(|x| {
                0.42 - 0.5 * (2. * PI * x).cos() + 0.08 * (4. * PI * x).cos()
            }),
            ApodizationWindow::Tukey { alpha } => {
                let alpha = alpha[axis];
                x.mapv(|x| {
                    if alpha <= 0. {
                        1.
                    } else if x < alpha / 2. {
                        0.5 * (1. + (PI * (2. * x / alpha - 1.)).cos())
                    } else if x > 1. - alpha / 2. {
                        0.5 * (1. + (PI * (2. * x / alpha - 2. / alpha + 1.)).cos())
                    } else {
                        1.
                    }
                })
            }
            ApodizationWindow::Normal { mu, sigma } => {
                let w = x.mapv(|x| {
                    let u = 2. * x - 1. - mu[axis];
                    (-u * u / (2. * sigma[axis] * sigma[axis])).exp()
                });
                let max = w.iter().cloned().fold(0., f64::max);
                if max > 0. {
                    w / max
                } else {
                    w
                }
            }
        }
    }
    /// 3D window, product of the profiles of each axis
    pub fn window(&self, shape: [usize; 3]) -> Array3<f64> {
        let [w0, w1, w2] = [0, 1, 2].map(|axis| self.profile(axis, shape[axis]));
        Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(i, j, k)| {
            w0[i] * w1[j] * w2[k]
        })
    }
}

/// In place 3D FFT, normalized by the number of samples when inverse
pub(crate) fn fft3(a: &mut Array3<Complex64>, direction: FftDirection) {
    let mut planner = FftPlanner::new();
    for axis in 0..3 {
        let n = a.len_of(Axis(axis));
        let fft = planner.plan_fft(n, direction);
        let mut buffer = Vec::with_capacity(n);
        for mut lane in a.lanes_mut(Axis(axis)) {
            buffer.clear();
            buffer.extend(lane.iter().copied());
            fft.process(&mut buffer);
            lane.iter_mut().zip(&buffer).for_each(|(l, b)| *l = *b);
        }
    }
    if direction == FftDirection::Inverse {
        let scale = 1. / a.len() as f64;
        a.mapv_inplace(|c| c * scale);
    }
}

/// Multiplies the centered diffraction pattern of `modulus·exp(i·phase)` by `window`
///
/// The modulus is rescaled so that its sum is unchanged.
pub fn apodize(
    modulus: &Array3<f64>,
    phase: &Array3<f64>,
    window: &ApodizationWindow,
) -> (Array3<f64>, Array3<f64>) {
    let shape = dims(modulus);
    let mut object = Zip::from(modulus)
        .and(phase)
        .map_collect(|&m, &p| Complex64::from_polar(m, p));
    fft3(&mut object, FftDirection::Forward);
    // window of the centered pattern moved back to the FFT layout
    let unshift = shape.map(|n| -((n / 2) as isize));
    let window = roll(&window.window(shape), unshift);
    Zip::from(&mut object)
        .and(&window)
        .for_each(|c, &w| *c *= w);
    fft3(&mut object, FftDirection::Inverse);

    let mut apodized = object.mapv(|c| c.norm());
    let before = modulus.sum();
    let after = apodized.sum();
    if after > 0. {
        apodized *= before / after;
    }
    (apodized, object.mapv(|c| c.arg()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn object(shape: (usize, usize, usize)) -> (Array3<f64>, Array3<f64>) {
        let modulus = Array3::from_shape_fn(shape, |(i, j, k)| {
            let r2 = (i as f64 - 4.).powi(2) + (j as f64 - 5.).powi(2) + (k as f64 - 6.).powi(2);
            (-r2 / 6.).exp()
        });
        let phase = Array3::from_shape_fn(shape, |(i, j, k)| 0.1 * i as f64 - 0.05 * (j + k) as f64);
        (modulus, phase)
    }

    #[test]
    fn unknown_window() {
        assert!(ApodizationWindow::new("hann", [0.5; 3], [0.; 3], [0.3; 3]).is_err());
        assert!(ApodizationWindow::new("tukey", [1.5; 3], [0.; 3], [0.3; 3]).is_err());
        assert!(ApodizationWindow::new("normal", [0.5; 3], [0.; 3], [0.; 3]).is_err());
    }

    #[test]
    fn window_profiles() {
        let blackman = ApodizationWindow::Blackman.profile(0, 9);
        assert_abs_diff_eq!(blackman[0], 0., epsilon = 1e-12);
        assert_abs_diff_eq!(blackman[4], 1., epsilon = 1e-12);
        assert_abs_diff_eq!(blackman[2], blackman[6], epsilon = 1e-12);
        let normal = ApodizationWindow::Normal {
            mu: [0.; 3],
            sigma: [0.3; 3],
        }
        .window([5, 7, 9]);
        assert_abs_diff_eq!(normal[[2, 3, 4]], 1., epsilon = 1e-12);
        assert!(normal[[0, 0, 0]] < 1e-3);
    }

    #[test]
    fn flat_window_is_identity() {
        let (modulus, phase) = object((8, 10, 12));
        let (m, p) = apodize(&modulus, &phase, &ApodizationWindow::Tukey { alpha: [0.; 3] });
        for (a, b) in m.iter().zip(modulus.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
        for ((a, b), &w) in p.iter().zip(phase.iter()).zip(modulus.iter()) {
            if w > 1e-3 {
                assert_abs_diff_eq!(a, b, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn modulus_sum_is_preserved() {
        let (modulus, phase) = object((8, 10, 12));
        let (m, _) = apodize(&modulus, &phase, &ApodizationWindow::Blackman);
        assert_abs_diff_eq!(m.sum(), modulus.sum(), epsilon = 1e-9);
        assert!(m.iter().all(|v| v.is_finite()));
    }
}

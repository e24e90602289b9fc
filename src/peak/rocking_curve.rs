//! Rocking curve interpolation and width

use serde::Serialize;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum FitError {
    #[error("tilt values and rocking curve don't have the same length ({tilt} vs {curve}), was the data reloaded after cropping?")]
    Length { tilt: usize, curve: usize },
    #[error("{0} points are not enough for a cubic interpolation")]
    TooFewPoints(usize),
    #[error("tilt values must be distinct")]
    DuplicateTilt,
}

/// Natural cubic spline through a set of points
#[derive(Debug, Clone)]
pub struct NaturalSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// second derivatives at the knots
    m: Vec<f64>,
}
impl NaturalSpline {
    /// Builds the spline from unordered samples
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self, FitError> {
        if x.len() != y.len() {
            return Err(FitError::Length {
                tilt: x.len(),
                curve: y.len(),
            });
        }
        let mut xy: Vec<(f64, f64)> = x.iter().copied().zip(y.iter().copied()).collect();
        xy.sort_by(|a, b| a.0.total_cmp(&b.0));
        if xy.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(FitError::DuplicateTilt);
        }
        let (x, y): (Vec<f64>, Vec<f64>) = xy.into_iter().unzip();
        let n = x.len();
        let mut m = vec![0f64; n];
        if n > 2 {
            let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
            // Thomas algorithm on the interior knots
            let mut diag = vec![0f64; n];
            let mut rhs = vec![0f64; n];
            for i in 1..n - 1 {
                diag[i] = 2. * (h[i - 1] + h[i]);
                rhs[i] = 6. * ((y[i + 1] - y[i]) / h[i] - (y[i] - y[i - 1]) / h[i - 1]);
                if i > 1 {
                    let w = h[i - 1] / diag[i - 1];
                    diag[i] -= w * h[i - 1];
                    rhs[i] -= w * rhs[i - 1];
                }
            }
            for i in (1..n - 1).rev() {
                let next = if i + 1 < n - 1 { h[i] * m[i + 1] } else { 0. };
                m[i] = (rhs[i] - next) / diag[i];
            }
        }
        Ok(Self { x, y, m })
    }
    pub fn eval(&self, t: f64) -> f64 {
        let n = self.x.len();
        let i = self
            .x
            .partition_point(|&v| v <= t)
            .saturating_sub(1)
            .min(n.saturating_sub(2));
        let h = self.x[i + 1] - self.x[i];
        let a = (self.x[i + 1] - t) / h;
        let b = (t - self.x[i]) / h;
        a * self.y[i]
            + b * self.y[i + 1]
            + ((a * a * a - a) * self.m[i] + (b * b * b - b) * self.m[i + 1]) * h * h / 6.
    }
    pub fn x_range(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }
}

/// Interpolated rocking curve
#[derive(Debug, Clone, Serialize)]
pub struct RockingCurveFit {
    pub tilt_values: Vec<f64>,
    pub rocking_curve: Vec<f64>,
    pub interp_tilt_values: Vec<f64>,
    pub interp_rocking_curve: Vec<f64>,
    /// full width at half maximum of the interpolated curve
    pub fwhm: f64,
    pub tilt_value_at_peak: Option<f64>,
}

/// Interpolates the rocking curve on `points` samples and computes its width
pub fn fit(tilt: &[f64], curve: &[f64], points: usize) -> Result<RockingCurveFit, FitError> {
    if tilt.len() != curve.len() {
        return Err(FitError::Length {
            tilt: tilt.len(),
            curve: curve.len(),
        });
    }
    if tilt.len() < 4 {
        return Err(FitError::TooFewPoints(tilt.len()));
    }
    let spline = NaturalSpline::new(tilt, curve)?;
    let (lo, hi) = spline.x_range();
    let points = points.max(2);
    let step = (hi - lo) / (points - 1) as f64;
    let interp_tilt_values: Vec<f64> = (0..points).map(|i| lo + i as f64 * step).collect();
    let interp_rocking_curve: Vec<f64> =
        interp_tilt_values.iter().map(|&t| spline.eval(t)).collect();
    let half = interp_rocking_curve
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max)
        / 2.;
    let fwhm = interp_rocking_curve.iter().filter(|&&v| v >= half).count() as f64 * step;
    Ok(RockingCurveFit {
        tilt_values: tilt.to_vec(),
        rocking_curve: curve.to_vec(),
        interp_tilt_values,
        interp_rocking_curve,
        fwhm,
        tilt_value_at_peak: None,
    })
}

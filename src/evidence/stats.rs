//! Moment and rank statistics with pandas/scipy default conventions.

/// Central moments of a sample, computed in one pass over the mean.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub n: usize,
    pub mean: f64,
    /// Population moments (divided by `n`).
    pub m2: f64,
    pub m3: f64,
    pub m4: f64,
}

impl Moments {
    pub fn of(values: &[f64]) -> Self {
        let n = values.len();
        if n == 0 {
            return Self { n, mean: f64::NAN, m2: f64::NAN, m3: f64::NAN, m4: f64::NAN };
        }
        let nf = n as f64;
        let mean = values.iter().sum::<f64>() / nf;
        let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
        for &v in values {
            let d = v - mean;
            let d2 = d * d;
            m2 += d2;
            m3 += d2 * d;
            m4 += d2 * d2;
        }
        Self { n, mean, m2: m2 / nf, m3: m3 / nf, m4: m4 / nf }
    }

    /// ddof = 1; undefined below two observations.
    pub fn sample_std(&self) -> Option<f64> {
        if self.n < 2 {
            return None;
        }
        let nf = self.n as f64;
        Some((self.m2 * nf / (nf - 1.0)).sqrt())
    }

    /// ddof = 0.
    pub fn population_std(&self) -> f64 {
        self.m2.sqrt()
    }

    /// Biased Fisher-Pearson skewness; undefined for zero variance.
    pub fn skew(&self) -> Option<f64> {
        if self.n == 0 || self.m2 <= 0.0 {
            return None;
        }
        Some(self.m3 / self.m2.powf(1.5))
    }

    /// Biased excess kurtosis (normal = 0); undefined for zero variance.
    pub fn excess_kurtosis(&self) -> Option<f64> {
        if self.n == 0 || self.m2 <= 0.0 {
            return None;
        }
        Some(self.m4 / (self.m2 * self.m2) - 3.0)
    }

    /// Count of values whose population z-score magnitude exceeds `z`.
    pub fn outliers_beyond(&self, values: &[f64], z: f64) -> usize {
        let sd = self.population_std();
        if sd.is_nan() || sd <= 0.0 {
            return 0;
        }
        values.iter().filter(|&&v| ((v - self.mean) / sd).abs() > z).count()
    }
}

/// Linear-interpolation quantile over an ascending slice.
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Pearson correlation over rows where both sides are present.
/// `None` for fewer than two such rows or a zero-variance side.
pub fn pearson(xs: &[Option<f64>], ys: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let (dx, dy) = (x - mx, y - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    let r = (sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0);
    r.is_finite().then_some(r)
}

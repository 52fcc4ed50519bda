/// Maps the number of distinct competing candidates to a confidence in
/// `[0, 1]`.
///
/// Implementations must return 1.0 for a single candidate and must be
/// non-increasing in `candidates`.
pub trait ConfidencePolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, candidates: usize) -> f64;
}

/// `1 / n`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReciprocalDecay;

impl ConfidencePolicy for ReciprocalDecay {
    fn name(&self) -> &'static str {
        "reciprocal"
    }

    fn score(&self, candidates: usize) -> f64 {
        if candidates <= 1 {
            1.0
        } else {
            1.0 / candidates as f64
        }
    }
}

/// `ratio ^ (n - 1)`
#[derive(Debug, Clone, Copy)]
pub struct GeometricDecay {
    pub ratio: f64,
}

impl ConfidencePolicy for GeometricDecay {
    fn name(&self) -> &'static str {
        "geometric"
    }

    fn score(&self, candidates: usize) -> f64 {
        if candidates <= 1 {
            return 1.0;
        }
        let exponent = i32::try_from(candidates - 1).unwrap_or(i32::MAX);
        self.ratio.clamp(0.0, 1.0).powi(exponent)
    }
}

/// Round to six decimals so floats render identically on every platform
pub fn round_score(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

//! Statistical functions: mean, standard deviation, median and iterative
//! sigma clipping.

/// Arithmetic mean. Returns NaN for an empty slice.
#[inline]
pub fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (ddof = 0) around a precomputed mean.
#[inline]
pub fn std_f64(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Calculate the median of f32 values in-place.
///
/// Mutates the input buffer (partial sort via quickselect).
#[inline]
pub fn median_f32_mut(data: &mut [f32]) -> f32 {
    debug_assert!(!data.is_empty());

    let len = data.len();
    let mid = len / 2;

    if len & 1 == 1 {
        let (_, median, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
        *median
    } else {
        let (left_part, right_median, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
        let right = *right_median;
        let left = left_part.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (left + right) * 0.5
    }
}

/// Iterative mean/std sigma clipping.
///
/// Each iteration recomputes the mean and population standard deviation of
/// the values that are still unmasked and masks every value farther than
/// `sigma × std` from the mean. Iteration stops once an iteration masks
/// nothing new or `max_iterations` is reached. Non-finite values are masked
/// before the first iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SigmaClip {
    pub sigma: f64,
    pub max_iterations: u32,
}

impl Default for SigmaClip {
    fn default() -> Self {
        Self {
            sigma: 4.0,
            max_iterations: 5,
        }
    }
}

/// Mask produced by [`SigmaClip::clip`]; `rejected[i]` is true for clipped values.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipOutcome {
    pub rejected: Vec<bool>,
    pub iterations: u32,
    pub converged: bool,
}

impl ClipOutcome {
    pub fn rejected_count(&self) -> usize {
        self.rejected.iter().filter(|&&r| r).count()
    }

    pub fn kept_count(&self) -> usize {
        self.rejected.len() - self.rejected_count()
    }
}

impl SigmaClip {
    pub fn new(sigma: f64, max_iterations: u32) -> Self {
        assert!(sigma > 0.0, "Sigma must be positive");
        assert!(max_iterations > 0, "Max iterations must be at least 1");
        Self {
            sigma,
            max_iterations,
        }
    }

    pub fn clip(&self, values: &[f64]) -> ClipOutcome {
        let mut rejected: Vec<bool> = values.iter().map(|v| !v.is_finite()).collect();
        let mut kept = Vec::with_capacity(values.len());
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            iterations += 1;

            kept.clear();
            kept.extend(
                values
                    .iter()
                    .zip(&rejected)
                    .filter(|(_, r)| !**r)
                    .map(|(v, _)| *v),
            );
            if kept.is_empty() {
                converged = true;
                break;
            }

            let mean = mean_f64(&kept);
            let limit = self.sigma * std_f64(&kept, mean);
            // Identical survivors: nothing left to clip.
            if limit <= f64::EPSILON * mean.abs() {
                converged = true;
                break;
            }

            let mut newly_rejected = 0;
            for (v, r) in values.iter().zip(rejected.iter_mut()) {
                if !*r && (v - mean).abs() > limit {
                    *r = true;
                    newly_rejected += 1;
                }
            }

            if newly_rejected == 0 {
                converged = true;
                break;
            }
        }

        ClipOutcome {
            rejected,
            iterations,
            converged,
        }
    }
}

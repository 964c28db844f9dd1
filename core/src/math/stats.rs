pub struct StatsHelper;

impl StatsHelper {
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|&v| v * v).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    /// Largest absolute value, used as the dynamic range of an image.
    pub fn peak_magnitude(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0_f32, |acc, &v| acc.max(v.abs()))
    }

    /// Index and value of the maximum sample, ignoring NaN.
    pub fn argmax(samples: &[f32]) -> Option<(usize, f32)> {
        samples
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, v)| !v.is_nan())
            .fold(None, |best, (idx, v)| match best {
                Some((_, current)) if current >= v => best,
                _ => Some((idx, v)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_zero_sequence_yields_zero() {
        assert_eq!(StatsHelper::rms(&[]), 0.0);
        assert_eq!(StatsHelper::rms(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn rms_handles_single_value() {
        assert_eq!(StatsHelper::rms(&[4.0]), 4.0);
    }

    #[test]
    fn peak_and_argmax_track_extremes() {
        let samples = [0.5, -3.0, 2.0, f32::NAN, 2.0];
        assert_eq!(StatsHelper::peak_magnitude(&samples[..3]), 3.0);
        assert_eq!(StatsHelper::argmax(&samples), Some((2, 2.0)));
        assert_eq!(StatsHelper::argmax(&[]), None);
    }
}

use std::f32::consts::PI;

/// Gaussian-windowed cosine burst sampled at `sampling_hz`, peak at the centre tap.
///
/// A non-positive centre frequency or cycle count yields a single unit tap.
pub fn gaussian_burst(centre_hz: f32, sampling_hz: f32, cycles: f32) -> Vec<f32> {
    if centre_hz <= 0.0 || cycles <= 0.0 || sampling_hz <= 0.0 {
        return vec![1.0];
    }
    let duration = cycles / centre_hz;
    let half = (duration * sampling_hz * 0.5).ceil() as usize;
    let sigma = duration / 4.0;

    (0..=2 * half)
        .map(|i| {
            let t = (i as f32 - half as f32) / sampling_hz;
            let envelope = (-(t * t) / (2.0 * sigma * sigma)).exp();
            envelope * (2.0 * PI * centre_hz * t).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_centred_and_symmetric() {
        let burst = gaussian_burst(5.0e6, 50.0e6, 2.0);
        assert_eq!(burst.len() % 2, 1);
        let half = burst.len() / 2;
        assert_eq!(burst[half], 1.0);
        for k in 1..=half {
            assert!((burst[half - k] - burst[half + k]).abs() < 1e-6);
        }
    }

    #[test]
    fn degenerate_parameters_give_an_impulse() {
        assert_eq!(gaussian_burst(0.0, 50.0e6, 2.0), vec![1.0]);
        assert_eq!(gaussian_burst(5.0e6, 50.0e6, 0.0), vec![1.0]);
    }
}

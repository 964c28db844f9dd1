use crate::settings::ApodizationScheme;
use std::f64::consts::PI;

/// Builds the apodization window for `length` aperture elements.
///
/// Coefficients are evaluated on the first half and mirrored, so the window
/// is exactly symmetric. A length of zero is treated as one.
pub fn generate_window(scheme: ApodizationScheme, length: usize) -> Vec<f32> {
    let length = length.max(1);
    match scheme {
        ApodizationScheme::Box => vec![1.0; length],
        ApodizationScheme::Hann => raised_cosine(length, 0.5, 0.5),
        ApodizationScheme::Hamming => raised_cosine(length, 0.54, 0.46),
    }
}

fn raised_cosine(length: usize, a0: f64, a1: f64) -> Vec<f32> {
    if length == 1 {
        return vec![1.0];
    }
    let span = (length - 1) as f64;
    (0..length)
        .map(|i| {
            let k = i.min(length - 1 - i) as f64;
            (a0 - a1 * (2.0 * PI * k / span).cos()) as f32
        })
        .collect()
}

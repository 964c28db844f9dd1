use crate::settings::{AcquisitionMode, DelayCalculation, Settings};

/// Per-configuration constants for time-of-flight evaluation.
///
/// The compute shader mirrors these formulas; any change here must be
/// reflected in `beamform.wgsl`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayGeometry {
    /// Sampling frequency divided by the speed of sound (samples per metre).
    pub samples_per_metre: f32,
    pub quad_approx: bool,
    pub two_way: bool,
    pub angle_limited: bool,
    pub tan_angle: f32,
}

impl DelayGeometry {
    pub fn from_settings(settings: &Settings) -> Self {
        let angle_limited = settings.angle_deg < 90.0;
        Self {
            samples_per_metre: settings.sampling_frequency_hz / settings.speed_of_sound,
            quad_approx: settings.delay_calculation == DelayCalculation::QuadApprox,
            two_way: settings.acquisition == AcquisitionMode::Ultrasound,
            angle_limited,
            tan_angle: if angle_limited {
                settings.angle_deg.to_radians().tan()
            } else {
                0.0
            },
        }
    }

    /// Whether an element at lateral offset `dx` sees a pixel at depth `z`.
    pub fn within_opening(&self, dx: f32, z: f32) -> bool {
        !self.angle_limited || dx.abs() <= z * self.tan_angle
    }

    /// Fractional raw-sample index of the echo from lateral offset `dx` and depth `z`.
    pub fn delay_samples(&self, dx: f32, z: f32) -> f32 {
        let receive = if self.quad_approx {
            if z > 0.0 {
                z + dx * dx / (2.0 * z)
            } else {
                dx.abs()
            }
        } else {
            (dx * dx + z * z).sqrt()
        };
        let path = if self.two_way { receive + z } else { receive };
        path * self.samples_per_metre
    }
}

/// Half-open element range `[first, last)` contributing to a lateral position,
/// together with the window index of element `first`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aperture {
    pub first: usize,
    pub last: usize,
    pub window_offset: usize,
}

impl Aperture {
    /// Centres `aperture_size` elements on the element nearest to `x`,
    /// clipping at the array edges without renormalising the window.
    pub fn around(settings: &Settings, x: f32) -> Self {
        let elements = settings.transducer_elements as i64;
        let size = settings.aperture_size as i64;
        let center = ((x / settings.pitch_m) + (elements as f32 - 1.0) * 0.5 + 0.5).floor() as i64;
        let center = center.clamp(0, elements - 1);
        let start = center - size / 2;
        let first = start.max(0);
        let last = (start + size).min(elements);
        Self {
            first: first as usize,
            last: last as usize,
            window_offset: (first - start) as usize,
        }
    }
}

/// Linearly interpolated channel value; indices outside the record yield zero.
pub fn sample_at(channel: &[f32], index: f32) -> f32 {
    let last = channel.len() as f32 - 1.0;
    if !(index >= 0.0 && index <= last) {
        return 0.0;
    }
    let lower = index.floor();
    let i0 = lower as usize;
    let i1 = (i0 + 1).min(channel.len() - 1);
    let frac = index - lower;
    channel[i0] * (1.0 - frac) + channel[i1] * frac
}

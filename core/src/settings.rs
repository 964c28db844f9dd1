use log::warn;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Reconstruction algorithm applied to the delayed, apodized channel samples.
///
/// Deserialized through [`FromStr`], so configuration files accept the same
/// case-insensitive tags as the command line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String")]
pub enum Algorithm {
    DelayAndSum,
    DelayMultiplyAndSum,
    SignCoherentDMAS,
}

impl Algorithm {
    /// Tag handed to the compute shader.
    pub(crate) fn shader_code(self) -> u32 {
        match self {
            Algorithm::DelayAndSum => 0,
            Algorithm::DelayMultiplyAndSum => 1,
            Algorithm::SignCoherentDMAS => 2,
        }
    }
}

impl FromStr for Algorithm {
    type Err = ConfigurationError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.to_ascii_lowercase().as_str() {
            "das" | "delayandsum" => Ok(Algorithm::DelayAndSum),
            "dmas" | "delaymultiplyandsum" => Ok(Algorithm::DelayMultiplyAndSum),
            "sdmas" | "scdmas" | "signcoherentdmas" => Ok(Algorithm::SignCoherentDMAS),
            _ => Err(ConfigurationError::UnknownTag {
                field: "algorithm",
                tag: tag.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Algorithm {
    type Error = ConfigurationError;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        tag.parse()
    }
}

/// Weighting window applied across the receive aperture.
///
/// Deserializing an unknown tag yields [`ApodizationScheme::Box`] instead of
/// an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String")]
pub enum ApodizationScheme {
    Hann,
    Hamming,
    Box,
}

impl ApodizationScheme {
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "hann" | "vonhann" => ApodizationScheme::Hann,
            "hamming" | "hamm" => ApodizationScheme::Hamming,
            "box" => ApodizationScheme::Box,
            other => {
                warn!("unknown apodization scheme `{}`, using Box", other);
                ApodizationScheme::Box
            }
        }
    }
}

impl From<String> for ApodizationScheme {
    fn from(tag: String) -> Self {
        Self::from_tag(&tag)
    }
}

/// How the element-to-pixel distance is evaluated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DelayCalculation {
    Spherical,
    QuadApprox,
}

impl DelayCalculation {
    pub(crate) fn shader_code(self) -> u32 {
        match self {
            DelayCalculation::Spherical => 0,
            DelayCalculation::QuadApprox => 1,
        }
    }
}

/// Acoustic travel model of the raw data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AcquisitionMode {
    /// One-way travel from the absorber to the element.
    Photoacoustic,
    /// Plane-wave transmit followed by the receive path.
    Ultrasound,
}

impl AcquisitionMode {
    pub(crate) fn shader_code(self) -> u32 {
        match self {
            AcquisitionMode::Photoacoustic => 0,
            AcquisitionMode::Ultrasound => 1,
        }
    }
}

/// Invalid configuration, naming the offending field.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("`{field}` must be greater than zero")]
    NotPositive { field: &'static str },
    #[error("`{field}` must be a finite number")]
    NotFinite { field: &'static str },
    #[error("`{field}` out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
    #[error("`aperture_size` ({aperture}) exceeds `transducer_elements` ({elements})")]
    ApertureExceedsElements { aperture: usize, elements: usize },
    #[error("unknown `{field}` tag `{tag}`")]
    UnknownTag { field: &'static str, tag: String },
}

impl ConfigurationError {
    pub fn field(&self) -> &'static str {
        match self {
            ConfigurationError::NotPositive { field }
            | ConfigurationError::NotFinite { field }
            | ConfigurationError::OutOfRange { field, .. }
            | ConfigurationError::UnknownTag { field, .. } => field,
            ConfigurationError::ApertureExceedsElements { .. } => "aperture_size",
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Complete beamforming configuration.
///
/// A value is only handed to a backend after [`Settings::validate`] accepted
/// it as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub transducer_elements: usize,
    pub pitch_m: f32,
    /// Raw samples recorded per element.
    pub samples_per_channel: usize,
    pub speed_of_sound: f32,
    pub sampling_frequency_hz: f32,
    pub reconstruction_lines: usize,
    pub samples_per_line: usize,
    pub reconstruction_depth_m: f32,
    /// Number of elements contributing to one output location.
    pub aperture_size: usize,
    /// Receive opening angle in degrees, measured from the element normal.
    pub angle_deg: f32,
    pub algorithm: Algorithm,
    pub apodization: ApodizationScheme,
    pub delay_calculation: DelayCalculation,
    pub acquisition: AcquisitionMode,
    pub use_gpu: bool,
    pub envelope_detection: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            transducer_elements: 128,
            pitch_m: 0.3e-3,
            samples_per_channel: 2048,
            speed_of_sound: 1540.0,
            sampling_frequency_hz: 50.0e6,
            reconstruction_lines: 128,
            samples_per_line: 512,
            reconstruction_depth_m: 0.03,
            aperture_size: 64,
            angle_deg: 45.0,
            algorithm: Algorithm::DelayAndSum,
            apodization: ApodizationScheme::Hann,
            delay_calculation: DelayCalculation::Spherical,
            acquisition: AcquisitionMode::Photoacoustic,
            use_gpu: false,
            envelope_detection: false,
        }
    }
}

fn positive_count(value: usize, field: &'static str) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigurationError::NotPositive { field });
    }
    Ok(())
}

/// Buffers are indexed with 32-bit integers on the device.
fn bounded_product(a: usize, b: usize, field: &'static str) -> ConfigResult<()> {
    match a.checked_mul(b) {
        Some(total) if total <= u32::MAX as usize => Ok(()),
        _ => Err(ConfigurationError::OutOfRange {
            field,
            reason: format!("{} x {} values exceed the 32-bit buffer index range", a, b),
        }),
    }
}

fn positive_scalar(value: f32, field: &'static str) -> ConfigResult<()> {
    if !value.is_finite() {
        return Err(ConfigurationError::NotFinite { field });
    }
    if value <= 0.0 {
        return Err(ConfigurationError::NotPositive { field });
    }
    Ok(())
}

impl Settings {
    /// Checks every field; the first violation is reported.
    pub fn validate(&self) -> ConfigResult<()> {
        positive_count(self.transducer_elements, "transducer_elements")?;
        positive_count(self.samples_per_channel, "samples_per_channel")?;
        positive_scalar(self.speed_of_sound, "speed_of_sound")?;
        positive_scalar(self.sampling_frequency_hz, "sampling_frequency_hz")?;
        positive_scalar(self.pitch_m, "pitch_m")?;
        positive_count(self.reconstruction_lines, "reconstruction_lines")?;
        positive_count(self.samples_per_line, "samples_per_line")?;
        positive_scalar(self.reconstruction_depth_m, "reconstruction_depth_m")?;
        bounded_product(
            self.transducer_elements,
            self.samples_per_channel,
            "samples_per_channel",
        )?;
        bounded_product(
            self.reconstruction_lines,
            self.samples_per_line,
            "samples_per_line",
        )?;
        positive_count(self.aperture_size, "aperture_size")?;
        if self.aperture_size > self.transducer_elements {
            return Err(ConfigurationError::ApertureExceedsElements {
                aperture: self.aperture_size,
                elements: self.transducer_elements,
            });
        }
        positive_scalar(self.angle_deg, "angle_deg")?;
        if self.angle_deg > 90.0 {
            return Err(ConfigurationError::OutOfRange {
                field: "angle_deg",
                reason: format!("{} exceeds 90 degrees", self.angle_deg),
            });
        }
        Ok(())
    }

    /// Lateral extent covered by the element centres.
    pub fn array_width_m(&self) -> f32 {
        self.transducer_elements.saturating_sub(1) as f32 * self.pitch_m
    }

    pub fn element_position_m(&self, element: usize) -> f32 {
        let center = (self.transducer_elements as f32 - 1.0) * 0.5;
        (element as f32 - center) * self.pitch_m
    }

    pub fn line_spacing_m(&self) -> f32 {
        let width = self.array_width_m();
        if self.reconstruction_lines > 1 && width > 0.0 {
            width / (self.reconstruction_lines - 1) as f32
        } else {
            self.pitch_m
        }
    }

    pub fn line_position_m(&self, line: usize) -> f32 {
        let center = (self.reconstruction_lines as f32 - 1.0) * 0.5;
        (line as f32 - center) * self.line_spacing_m()
    }

    pub fn depth_spacing_m(&self) -> f32 {
        self.reconstruction_depth_m / self.samples_per_line as f32
    }

    pub fn time_spacing_s(&self) -> f32 {
        1.0 / self.sampling_frequency_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn zero_elements_are_rejected_by_name() {
        let settings = Settings {
            transducer_elements: 0,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert_eq!(err.field(), "transducer_elements");
    }

    #[test]
    fn non_positive_physics_are_rejected() {
        let cases = [
            (
                Settings {
                    speed_of_sound: 0.0,
                    ..Default::default()
                },
                "speed_of_sound",
            ),
            (
                Settings {
                    sampling_frequency_hz: -1.0,
                    ..Default::default()
                },
                "sampling_frequency_hz",
            ),
            (
                Settings {
                    samples_per_channel: 0,
                    ..Default::default()
                },
                "samples_per_channel",
            ),
            (
                Settings {
                    pitch_m: f32::NAN,
                    ..Default::default()
                },
                "pitch_m",
            ),
        ];
        for (settings, field) in cases {
            assert_eq!(settings.validate().unwrap_err().field(), field);
        }
    }

    #[test]
    fn aperture_larger_than_array_is_rejected() {
        let settings = Settings {
            transducer_elements: 32,
            aperture_size: 33,
            ..Default::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigurationError::ApertureExceedsElements {
                aperture: 33,
                elements: 32
            })
        );
    }

    #[test]
    fn opening_angle_is_bounded() {
        let settings = Settings {
            angle_deg: 91.0,
            ..Default::default()
        };
        assert_eq!(settings.validate().unwrap_err().field(), "angle_deg");
    }

    #[test]
    fn unknown_apodization_tag_falls_back_to_box() {
        assert_eq!(ApodizationScheme::from_tag("Hamm"), ApodizationScheme::Hamming);
        assert_eq!(ApodizationScheme::from_tag("tukey"), ApodizationScheme::Box);

        let parsed: Settings =
            serde_json::from_str(r#"{"apodization": "kaiser", "algorithm": "DMAS"}"#).unwrap();
        assert_eq!(parsed.apodization, ApodizationScheme::Box);
        assert_eq!(parsed.algorithm, Algorithm::DelayMultiplyAndSum);
    }

    #[test]
    fn oversized_grids_are_rejected() {
        let settings = Settings {
            reconstruction_lines: 65_536,
            samples_per_line: 65_536,
            ..Default::default()
        };
        assert_eq!(settings.validate().unwrap_err().field(), "samples_per_line");

        let settings = Settings {
            transducer_elements: 1 << 20,
            samples_per_channel: 1 << 12,
            ..Default::default()
        };
        assert_eq!(settings.validate().unwrap_err().field(), "samples_per_channel");
    }

    #[test]
    fn algorithm_tags_parse_alike_from_files_and_flags() {
        for (tag, expected) in [
            ("das", Algorithm::DelayAndSum),
            ("DMAS", Algorithm::DelayMultiplyAndSum),
            ("SignCoherentDMAS", Algorithm::SignCoherentDMAS),
            ("scdmas", Algorithm::SignCoherentDMAS),
        ] {
            let parsed: Settings =
                serde_json::from_str(&format!(r#"{{"algorithm": "{}"}}"#, tag)).unwrap();
            assert_eq!(parsed.algorithm, expected, "{tag}");
            assert_eq!(tag.parse::<Algorithm>(), Ok(expected));
        }
        assert!(serde_json::from_str::<Settings>(r#"{"algorithm": "mv"}"#).is_err());

        let round_trip: Settings =
            serde_json::from_str(&serde_json::to_string(&Settings::default()).unwrap()).unwrap();
        assert_eq!(round_trip.algorithm, Algorithm::DelayAndSum);
    }

    #[test]
    fn unknown_algorithm_tag_is_an_error() {
        assert_eq!("sdmas".parse::<Algorithm>(), Ok(Algorithm::SignCoherentDMAS));
        let err = "mv".parse::<Algorithm>().unwrap_err();
        assert_eq!(err.field(), "algorithm");
    }

    #[test]
    fn geometry_is_centred_on_the_array() {
        let settings = Settings {
            transducer_elements: 4,
            pitch_m: 1.0,
            reconstruction_lines: 7,
            ..Default::default()
        };
        assert_eq!(settings.array_width_m(), 3.0);
        assert_eq!(settings.element_position_m(0), -1.5);
        assert_eq!(settings.element_position_m(3), 1.5);
        assert_eq!(settings.line_position_m(0), -1.5);
        assert_eq!(settings.line_position_m(3), 0.0);
        assert_eq!(settings.line_position_m(6), 1.5);
    }
}

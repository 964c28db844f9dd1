use anyhow::Context;
use beamcore::settings::{Algorithm, ApodizationScheme, Settings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::generator::phantom::GeneratorConfig;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub settings: Settings,
    pub generator: GeneratorConfig,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    /// Default geometry resized to `elements`, with one line per element.
    pub fn from_args(
        elements: usize,
        algorithm: Algorithm,
        apodization: ApodizationScheme,
        use_gpu: bool,
    ) -> Self {
        let defaults = Settings::default();
        Self {
            settings: Settings {
                transducer_elements: elements,
                reconstruction_lines: elements,
                aperture_size: defaults.aperture_size.min(elements),
                algorithm,
                apodization,
                use_gpu,
                ..defaults
            },
            generator: GeneratorConfig::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.settings
            .validate()
            .context("validating beamforming settings")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_from_args_keeps_aperture_within_array() {
        let cfg = WorkflowConfig::from_args(32, Algorithm::DelayAndSum, ApodizationScheme::Hann, false);
        assert_eq!(cfg.settings.aperture_size, 32);
        assert_eq!(cfg.settings.reconstruction_lines, 32);
        cfg.validate().unwrap();
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"settings:\n  transducer_elements: 64\n  aperture_size: 32\n  algorithm: DMAS\n  apodization: gaussian\ngenerator:\n  seed: 7\n  targets:\n    - lateral_m: 0.001\n      depth_m: 0.01\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = WorkflowConfig::load(&path).unwrap();
        assert_eq!(cfg.settings.transducer_elements, 64);
        assert_eq!(cfg.settings.algorithm, Algorithm::DelayMultiplyAndSum);
        assert_eq!(cfg.settings.apodization, ApodizationScheme::Box);
        assert_eq!(cfg.settings.samples_per_line, Settings::default().samples_per_line);
        assert_eq!(cfg.generator.seed, 7);
        assert_eq!(cfg.generator.targets[0].amplitude, 1.0);
    }

    #[test]
    fn config_validate_reports_bad_settings() {
        let mut cfg = WorkflowConfig::default();
        cfg.settings.speed_of_sound = 0.0;
        assert!(cfg.validate().is_err());
    }
}

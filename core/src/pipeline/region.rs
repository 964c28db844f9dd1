use serde::{Deserialize, Serialize};

use crate::settings::Settings;

/// Extent of raw data, in elements and time samples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputRegion {
    pub elements: usize,
    pub samples: usize,
}

/// Output geometry declared to the pipeline before buffers are allocated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OutputInformation {
    pub lines: usize,
    pub samples_per_line: usize,
    /// Lateral and axial pixel spacing in metres.
    pub spacing_m: [f32; 2],
    /// Position of pixel (0, 0): lateral offset from the array centre and depth.
    pub origin_m: [f32; 2],
}

impl OutputInformation {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lines: settings.reconstruction_lines,
            samples_per_line: settings.samples_per_line,
            spacing_m: [settings.line_spacing_m(), settings.depth_spacing_m()],
            origin_m: [settings.line_position_m(0), 0.0],
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.lines * self.samples_per_line
    }

    /// Lateral and axial size covered by the pixel centres.
    pub fn extent_m(&self) -> [f32; 2] {
        [
            self.lines.saturating_sub(1) as f32 * self.spacing_m[0],
            self.samples_per_line.saturating_sub(1) as f32 * self.spacing_m[1],
        ]
    }
}

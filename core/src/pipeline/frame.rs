use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::pipeline::InputRegion;
use crate::prelude::{ReconstructionError, ReconstructionResult};

/// Raw channel data as delivered by the acquisition side of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFrame {
    pub elements: usize,
    pub samples_per_channel: usize,
    /// Element-major samples.
    pub samples: Vec<f32>,
}

impl RawFrame {
    pub fn zeros(elements: usize, samples_per_channel: usize) -> Self {
        Self {
            elements,
            samples_per_channel,
            samples: vec![0.0; elements * samples_per_channel],
        }
    }

    pub fn region(&self) -> InputRegion {
        InputRegion {
            elements: self.elements,
            samples: self.samples_per_channel,
        }
    }

    pub fn set(&mut self, element: usize, sample: usize, value: f32) {
        if element < self.elements && sample < self.samples_per_channel {
            self.samples[element * self.samples_per_channel + sample] = value;
        }
    }

    pub fn view(&self) -> ReconstructionResult<ArrayView2<'_, f32>> {
        ArrayView2::from_shape((self.elements, self.samples_per_channel), &self.samples).map_err(
            |err| {
                ReconstructionError::InvalidInput(format!(
                    "frame of {} samples does not match {}x{}: {}",
                    self.samples.len(),
                    self.elements,
                    self.samples_per_channel,
                    err
                ))
            },
        )
    }
}

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::pipeline::OutputInformation;
use crate::settings::Settings;
use crate::telemetry::ProgressReporter;

pub use crate::settings::{ConfigResult, ConfigurationError};

/// Which execution path produced an image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendKind {
    Cpu,
    Gpu,
}

/// Borrowed inputs of one reconstruction.
///
/// `samples` is element-major: channel `e` occupies
/// `samples[e * settings.samples_per_channel..][..settings.samples_per_channel]`.
#[derive(Debug, Clone, Copy)]
pub struct ReconstructionJob<'a> {
    pub samples: &'a [f32],
    pub settings: &'a Settings,
    pub window: &'a [f32],
}

impl<'a> ReconstructionJob<'a> {
    pub fn channel(&self, element: usize) -> &'a [f32] {
        let len = self.settings.samples_per_channel;
        &self.samples[element * len..(element + 1) * len]
    }
}

/// Reconstructed image handed back to the caller.
#[derive(Debug, Clone)]
pub struct BeamformedImage {
    /// Indexed by (reconstruction line, depth sample).
    pub data: Array2<f32>,
    pub info: OutputInformation,
    pub backend: BackendKind,
}

/// Failure of a reconstruction call.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReconstructionError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("allocation failure: {0}")]
    AllocationFailure(String),
    #[error("algorithm failure: {0}")]
    AlgorithmFailure(String),
    #[error("beamformer is not configured")]
    NotConfigured,
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type ReconstructionResult<T> = Result<T, ReconstructionError>;

/// Capability shared by the CPU and GPU execution paths.
pub trait ReconstructionBackend: Send {
    fn kind(&self) -> BackendKind;
    fn reconstruct(
        &mut self,
        job: &ReconstructionJob<'_>,
        progress: &ProgressReporter,
    ) -> ReconstructionResult<Array2<f32>>;

    /// Frees cached resources; the backend must stay usable afterwards.
    fn release(&mut self) {}
}

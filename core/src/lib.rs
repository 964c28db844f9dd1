//! Beamforming reconstruction core.
//!
//! Raw channel data from a linear array is turned into a 2-D image with
//! delay-based algorithms (DAS, DMAS, sign-coherent DMAS) and apodization,
//! on a rayon-parallel CPU path or a wgpu compute path with CPU fallback.

pub mod math;
pub mod pipeline;
pub mod prelude;
pub mod processing;
pub mod settings;
pub mod telemetry;

pub use prelude::{BeamformedImage, ReconstructionBackend, ReconstructionError};
pub use processing::Beamformer;
pub use settings::{Algorithm, ApodizationScheme, ConfigurationError, Settings};

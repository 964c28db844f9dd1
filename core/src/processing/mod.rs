pub mod beamformer;
pub mod cpu;
pub mod gpu;
pub mod staging;

pub use beamformer::{Beamformer, BeamformerState};
pub use cpu::{CpuBackend, PixelAccumulator};
pub use gpu::GpuBackend;
pub use staging::StagingBuffer;

pub mod apodization;
pub mod fft;
pub mod geometry;
pub mod stats;

pub use apodization::generate_window;
pub use fft::FftHelper;
pub use geometry::DelayGeometry;
pub use stats::StatsHelper;

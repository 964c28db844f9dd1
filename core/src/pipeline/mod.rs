pub mod frame;
pub mod region;

pub use frame::RawFrame;
pub use region::{InputRegion, OutputInformation};

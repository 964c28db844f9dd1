pub mod log;
pub mod metrics;
pub mod progress;

pub use self::log::{LogManager, NO_MESSAGE};
pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use progress::{progress_channel, ProgressEvent, ProgressHandle, ProgressReporter};

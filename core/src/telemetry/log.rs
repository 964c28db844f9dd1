use log::{info, warn};

/// Sentinel returned while no diagnostic has been recorded.
pub const NO_MESSAGE: &str = "noMessage";

/// Keeps the latest diagnostic message and mirrors events to the `log` facade.
pub struct LogManager {
    message: String,
}

impl LogManager {
    pub fn new() -> Self {
        Self {
            message: NO_MESSAGE.to_string(),
        }
    }

    pub fn record(&self, message: &str) {
        info!("{}", message);
    }

    /// Overwrites the diagnostic message.
    pub fn report(&mut self, message: impl Into<String>) {
        self.message = message.into();
        warn!("{}", self.message);
    }

    pub fn clear(&mut self) {
        self.message = NO_MESSAGE.to_string();
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_starts_and_resets_to_sentinel() {
        let mut logger = LogManager::new();
        assert_eq!(logger.message(), NO_MESSAGE);
        logger.report("fell back");
        logger.report("fell back again");
        assert_eq!(logger.message(), "fell back again");
        logger.clear();
        assert_eq!(logger.message(), NO_MESSAGE);
    }
}

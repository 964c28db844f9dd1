use std::sync::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Caller-supplied progress callback: percentage in `[0, 100]` and a stage label.
pub type ProgressHandle = Box<dyn FnMut(u8, &str) + Send>;

/// Progress notification delivered through [`progress_channel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub percent: u8,
    pub stage: String,
}

/// Builds a handle that forwards every report into an unbounded channel.
pub fn progress_channel() -> (ProgressHandle, UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = unbounded_channel();
    let handle: ProgressHandle = Box::new(move |percent, stage| {
        // A dropped receiver only means nobody is listening any more.
        let _ = tx.send(ProgressEvent {
            percent,
            stage: stage.to_string(),
        });
    });
    (handle, rx)
}

struct ReporterState {
    last: Option<u8>,
    handle: Option<ProgressHandle>,
}

/// Serialises progress reports of one reconstruction call.
///
/// Reports may arrive from worker threads; a percentage lower than the last
/// delivered one is dropped, so the callback only ever sees a non-decreasing
/// sequence.
pub struct ProgressReporter {
    state: Mutex<ReporterState>,
}

impl ProgressReporter {
    pub fn new(handle: Option<ProgressHandle>) -> Self {
        Self {
            state: Mutex::new(ReporterState { last: None, handle }),
        }
    }

    pub fn silent() -> Self {
        Self::new(None)
    }

    pub fn report(&self, percent: u8, stage: &str) {
        let percent = percent.min(100);
        if let Ok(mut state) = self.state.lock() {
            if state.last.is_some_and(|last| percent < last) {
                return;
            }
            state.last = Some(percent);
            if let Some(handle) = state.handle.as_mut() {
                handle(percent, stage);
            }
        }
    }

    /// Reports `done / total` of the range `[start, end]`.
    pub fn report_fraction(&self, start: u8, end: u8, done: usize, total: usize, stage: &str) {
        let span = end.saturating_sub(start) as usize;
        let step = if total == 0 { span } else { span * done.min(total) / total };
        self.report(start + step as u8, stage);
    }

    pub fn last(&self) -> Option<u8> {
        self.state.lock().ok().and_then(|state| state.last)
    }

    /// Gives the callback back once the call is over.
    pub fn into_handle(self) -> Option<ProgressHandle> {
        self.state
            .into_inner()
            .ok()
            .and_then(|state| state.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regressions_are_dropped() {
        let (handle, mut rx) = progress_channel();
        let reporter = ProgressReporter::new(Some(handle));
        reporter.report(10, "beamforming");
        reporter.report(5, "beamforming");
        reporter.report(10, "envelope detection");
        reporter.report(250, "finished");
        drop(reporter);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push((event.percent, event.stage));
        }
        assert_eq!(
            seen,
            vec![
                (10, "beamforming".to_string()),
                (10, "envelope detection".to_string()),
                (100, "finished".to_string()),
            ]
        );
    }

    #[test]
    fn fractions_scale_into_the_range() {
        let reporter = ProgressReporter::silent();
        reporter.report_fraction(10, 90, 1, 4, "beamforming");
        assert_eq!(reporter.last(), Some(30));
        reporter.report_fraction(10, 90, 4, 4, "beamforming");
        assert_eq!(reporter.last(), Some(90));
    }

    #[test]
    fn handle_survives_the_reporter() {
        let reporter = ProgressReporter::new(Some(Box::new(|_, _| {})));
        assert!(reporter.into_handle().is_some());
    }
}

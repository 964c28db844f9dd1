use log::debug;
use ndarray::ArrayView2;

use crate::math::{generate_window, FftHelper};
use crate::pipeline::{InputRegion, OutputInformation, RawFrame};
use crate::prelude::{
    BackendKind, BeamformedImage, ConfigResult, ReconstructionBackend, ReconstructionError,
    ReconstructionJob, ReconstructionResult,
};
use crate::processing::cpu::{CpuBackend, BEAMFORMING_END};
use crate::processing::gpu::GpuBackend;
use crate::processing::staging::StagingBuffer;
use crate::settings::{ApodizationScheme, Settings};
use crate::telemetry::{
    LogManager, MetricsRecorder, MetricsSnapshot, ProgressHandle, ProgressReporter,
};

/// Lifecycle of a [`Beamformer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeamformerState {
    Unconfigured,
    Configured,
    /// Held only while `configure` replaces an existing configuration.
    Reconfiguring,
    Computing,
}

/// Orchestrates configuration, backend selection and progress reporting.
///
/// One call at a time: `configure` and `reconstruct` take `&mut self`, so a
/// shared instance needs an external lock.
pub struct Beamformer {
    state: BeamformerState,
    settings: Option<Settings>,
    window: Vec<f32>,
    /// Aperture size the current window was generated for (0 before the first).
    last_apodization_size: usize,
    last_apodization_scheme: Option<ApodizationScheme>,
    staging: StagingBuffer,
    cpu: CpuBackend,
    gpu: Option<Box<dyn ReconstructionBackend>>,
    envelope: Option<FftHelper>,
    progress: Option<ProgressHandle>,
    logger: LogManager,
    metrics: MetricsRecorder,
}

impl Beamformer {
    /// Beamformer with the wgpu backend; the device is opened on first use.
    pub fn new() -> Self {
        Self::cpu_only().with_gpu_backend(Box::new(GpuBackend::new()))
    }

    pub fn cpu_only() -> Self {
        Self {
            state: BeamformerState::Unconfigured,
            settings: None,
            window: Vec::new(),
            last_apodization_size: 0,
            last_apodization_scheme: None,
            staging: StagingBuffer::new(),
            cpu: CpuBackend::new(),
            gpu: None,
            envelope: None,
            progress: None,
            logger: LogManager::new(),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Replaces the accelerated backend used when `Settings::use_gpu` is set.
    pub fn with_gpu_backend(mut self, backend: Box<dyn ReconstructionBackend>) -> Self {
        self.gpu = Some(backend);
        self
    }

    pub fn set_progress_handle<F>(&mut self, handle: F)
    where
        F: FnMut(u8, &str) + Send + 'static,
    {
        self.progress = Some(Box::new(handle));
    }

    /// Validates and applies `settings` as a whole.
    ///
    /// A rejected configuration leaves the previous one in effect. The
    /// apodization window is regenerated only when its length or scheme
    /// differs from the one currently cached.
    pub fn configure(&mut self, settings: Settings) -> ConfigResult<()> {
        self.logger.record("Configuring beamforming settings");
        if let Err(err) = settings.validate() {
            self.logger.report(format!("rejected configuration: {}", err));
            return Err(err);
        }

        if self.state == BeamformerState::Configured {
            self.state = BeamformerState::Reconfiguring;
        }

        if self.last_apodization_size != settings.aperture_size
            || self.last_apodization_scheme != Some(settings.apodization)
        {
            self.window = generate_window(settings.apodization, settings.aperture_size);
            self.last_apodization_size = settings.aperture_size;
            self.last_apodization_scheme = Some(settings.apodization);
            self.metrics.record_window_generation();
            self.logger.record(&format!(
                "generated {:?} apodization window of {} coefficients",
                settings.apodization, settings.aperture_size
            ));
        } else {
            debug!("reusing apodization window of {}", settings.aperture_size);
        }

        self.envelope = if settings.envelope_detection {
            match self.envelope.take() {
                Some(helper) if helper.size() == settings.samples_per_line => Some(helper),
                _ => Some(FftHelper::new(settings.samples_per_line)),
            }
        } else {
            None
        };

        self.settings = Some(settings);
        self.state = BeamformerState::Configured;
        self.logger.clear();
        Ok(())
    }

    /// Reconstructs one frame of raw samples indexed by (element, time sample).
    pub fn reconstruct(
        &mut self,
        samples: ArrayView2<'_, f32>,
    ) -> ReconstructionResult<BeamformedImage> {
        let settings = match (self.state, self.settings.as_ref()) {
            (BeamformerState::Configured, Some(settings)) => settings.clone(),
            _ => {
                self.logger.report("reconstruction requested before configuration");
                return Err(ReconstructionError::NotConfigured);
            }
        };

        let expected = (settings.transducer_elements, settings.samples_per_channel);
        if samples.dim() != expected {
            let err = ReconstructionError::InvalidInput(format!(
                "raw samples are {}x{}, configuration expects {}x{}",
                samples.nrows(),
                samples.ncols(),
                expected.0,
                expected.1
            ));
            self.metrics.record_error();
            self.logger.report(err.to_string());
            return Err(err);
        }

        self.state = BeamformerState::Computing;
        let reporter = ProgressReporter::new(self.progress.take());
        let result = self.compute(&settings, samples, &reporter);
        self.progress = reporter.into_handle();
        self.state = BeamformerState::Configured;

        match &result {
            Ok(image) => {
                self.metrics.record_processed();
                self.logger
                    .record(&format!("beamforming finished on {:?}", image.backend));
            }
            Err(err) => {
                self.metrics.record_error();
                self.logger.report(format!("beamforming failed: {}", err));
            }
        }
        result
    }

    fn compute(
        &mut self,
        settings: &Settings,
        samples: ArrayView2<'_, f32>,
        progress: &ProgressReporter,
    ) -> ReconstructionResult<BeamformedImage> {
        progress.report(0, "loading data");
        let job = ReconstructionJob {
            samples: self.staging.load(samples),
            settings,
            window: &self.window,
        };

        let (mut data, backend) = match self.gpu.as_mut().filter(|_| settings.use_gpu) {
            Some(gpu) => match gpu.reconstruct(&job, progress) {
                Ok(data) => (data, gpu.kind()),
                Err(err) => {
                    self.logger.report(format!(
                        "GPU beamforming failed ({}); falling back to CPU",
                        err
                    ));
                    self.metrics.record_fallback();
                    (self.cpu.reconstruct(&job, progress)?, BackendKind::Cpu)
                }
            },
            None => {
                if settings.use_gpu {
                    self.logger
                        .report("no GPU backend installed; falling back to CPU");
                    self.metrics.record_fallback();
                }
                (self.cpu.reconstruct(&job, progress)?, BackendKind::Cpu)
            }
        };

        if let Some(pixel) = data.iter().position(|value| !value.is_finite()) {
            return Err(ReconstructionError::AlgorithmFailure(format!(
                "non-finite intensity at pixel {}",
                pixel
            )));
        }

        if let Some(helper) = self.envelope.as_mut() {
            progress.report(BEAMFORMING_END, "envelope detection");
            let flat = data.as_slice_mut().ok_or_else(|| {
                ReconstructionError::AlgorithmFailure("image buffer is not contiguous".into())
            })?;
            for line in flat.chunks_mut(settings.samples_per_line) {
                helper.envelope_in_place(line);
            }
        }

        progress.report(100, "finished");
        Ok(BeamformedImage {
            data,
            info: OutputInformation::from_settings(settings),
            backend,
        })
    }

    /// Raw extent needed to compute the output: the full record, unchanged.
    pub fn request_input_region(&self, available: InputRegion) -> InputRegion {
        available
    }

    pub fn declare_output_information(&self) -> ReconstructionResult<OutputInformation> {
        self.settings
            .as_ref()
            .map(OutputInformation::from_settings)
            .ok_or(ReconstructionError::NotConfigured)
    }

    pub fn produce_output(&mut self, frame: &RawFrame) -> ReconstructionResult<BeamformedImage> {
        let samples = frame.view()?;
        self.reconstruct(samples)
    }

    /// Drops settings, cached window and scratch buffers.
    pub fn teardown(&mut self) {
        self.state = BeamformerState::Unconfigured;
        self.settings = None;
        self.window = Vec::new();
        self.last_apodization_size = 0;
        self.last_apodization_scheme = None;
        self.envelope = None;
        self.staging.reset();
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.release();
        }
    }

    /// Latest diagnostic, or [`crate::telemetry::NO_MESSAGE`].
    pub fn message(&self) -> &str {
        self.logger.message()
    }

    pub fn state(&self) -> BeamformerState {
        self.state
    }

    pub fn settings(&self) -> Option<&Settings> {
        self.settings.as_ref()
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn staging_resizes(&self) -> usize {
        self.staging.resize_count()
    }
}

impl Default for Beamformer {
    fn default() -> Self {
        Self::new()
    }
}

use crate::generator::phantom::build_frame;
use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use beamcore::math::StatsHelper;
use beamcore::pipeline::{OutputInformation, RawFrame};
use beamcore::prelude::BackendKind;
use beamcore::processing::Beamformer;
use beamcore::telemetry::{MetricsSnapshot, NO_MESSAGE};
use log::{info, warn};
use serde::Serialize;

/// Summary of one reconstructed frame, written out as the run report.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub backend: BackendKind,
    pub output: OutputInformation,
    pub peak_line: usize,
    pub peak_depth_index: usize,
    /// Lateral and axial position of the brightest pixel.
    pub peak_position_m: [f32; 2],
    pub peak_value: f32,
    pub rms: f32,
    pub message: Option<String>,
    pub metrics: MetricsSnapshot,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    /// Synthesises a frame from the generator section and reconstructs it.
    pub fn run_generated(&self) -> anyhow::Result<WorkflowResult> {
        let frame = build_frame(&self.config.generator, &self.config.settings)
            .context("synthesising raw frame")?;
        self.execute(&frame)
    }

    pub fn execute(&self, frame: &RawFrame) -> anyhow::Result<WorkflowResult> {
        let settings = self.config.settings.clone();
        let mut beamformer = if settings.use_gpu {
            Beamformer::new()
        } else {
            Beamformer::cpu_only()
        };
        beamformer.set_progress_handle(|percent, stage| info!("[{:>3}%] {}", percent, stage));
        beamformer
            .configure(settings)
            .context("configuring beamformer")?;

        let available = frame.region();
        if beamformer.request_input_region(available) != available {
            warn!("beamformer requested a partial input region");
        }
        let output = beamformer
            .declare_output_information()
            .context("declaring output geometry")?;
        let image = beamformer
            .produce_output(frame)
            .context("reconstructing frame")?;

        let values: Vec<f32> = image.data.iter().copied().collect();
        let (index, peak_value) = StatsHelper::argmax(&values).unwrap_or((0, 0.0));
        let rows = output.samples_per_line.max(1);
        let (peak_line, peak_depth_index) = (index / rows, index % rows);
        let peak_position_m = [
            output.origin_m[0] + peak_line as f32 * output.spacing_m[0],
            output.origin_m[1] + peak_depth_index as f32 * output.spacing_m[1],
        ];

        let message = match beamformer.message() {
            NO_MESSAGE => None,
            text => Some(text.to_string()),
        };
        let metrics = beamformer.metrics();
        beamformer.teardown();

        Ok(WorkflowResult {
            backend: image.backend,
            output,
            peak_line,
            peak_depth_index,
            peak_position_m,
            peak_value,
            rms: StatsHelper::rms(&values),
            message,
            metrics,
            description: self.config.generator.description.clone(),
        })
    }
}

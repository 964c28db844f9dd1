use ndarray::Array2;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::math::geometry::{sample_at, Aperture, DelayGeometry};
use crate::prelude::{
    BackendKind, ReconstructionBackend, ReconstructionError, ReconstructionJob,
    ReconstructionResult,
};
use crate::settings::Algorithm;
use crate::telemetry::ProgressReporter;

pub(crate) const BEAMFORMING_START: u8 = 10;
pub(crate) const BEAMFORMING_END: u8 = 90;

/// Running combination of the apodized, delayed samples of one pixel.
#[derive(Debug, Default, Clone, Copy)]
pub struct PixelAccumulator {
    sum: f32,
    /// Sum of products over all unique element pairs seen so far.
    cross: f32,
    positive: u64,
    negative: u64,
}

impl PixelAccumulator {
    pub fn push(&mut self, value: f32) {
        self.cross += value * self.sum;
        self.sum += value;
        if value > 0.0 {
            self.positive += 1;
        } else if value < 0.0 {
            self.negative += 1;
        }
    }

    /// Strict majority of contributing pairs share a sign.
    pub fn sign_coherent(&self) -> bool {
        let (p, n) = (self.positive, self.negative);
        let agreeing = p * p.saturating_sub(1) / 2 + n * n.saturating_sub(1) / 2;
        agreeing > p * n
    }

    pub fn finish(&self, algorithm: Algorithm) -> f32 {
        match algorithm {
            Algorithm::DelayAndSum => self.sum,
            Algorithm::DelayMultiplyAndSum => signed_root(self.cross),
            Algorithm::SignCoherentDMAS => {
                if self.sign_coherent() {
                    signed_root(self.cross)
                } else {
                    0.0
                }
            }
        }
    }
}

fn signed_root(value: f32) -> f32 {
    if value == 0.0 {
        0.0
    } else {
        value.signum() * value.abs().sqrt()
    }
}

/// Host reference implementation; output lines are spread over the rayon pool.
#[derive(Debug, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

fn beamform_line(job: &ReconstructionJob<'_>, geometry: &DelayGeometry, line: usize) -> Vec<f32> {
    let settings = job.settings;
    let x = settings.line_position_m(line);
    let dz = settings.depth_spacing_m();
    let aperture = Aperture::around(settings, x);

    (0..settings.samples_per_line)
        .map(|depth_index| {
            let z = depth_index as f32 * dz;
            let mut pixel = PixelAccumulator::default();
            for element in aperture.first..aperture.last {
                let dx = x - settings.element_position_m(element);
                if !geometry.within_opening(dx, z) {
                    continue;
                }
                let weight = job.window[aperture.window_offset + element - aperture.first];
                let delay = geometry.delay_samples(dx, z);
                pixel.push(weight * sample_at(job.channel(element), delay));
            }
            pixel.finish(settings.algorithm)
        })
        .collect()
}

impl ReconstructionBackend for CpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn reconstruct(
        &mut self,
        job: &ReconstructionJob<'_>,
        progress: &ProgressReporter,
    ) -> ReconstructionResult<Array2<f32>> {
        let settings = job.settings;
        let expected = settings.transducer_elements * settings.samples_per_channel;
        if job.samples.len() != expected {
            return Err(ReconstructionError::InvalidInput(format!(
                "expected {} raw samples, got {}",
                expected,
                job.samples.len()
            )));
        }
        if job.window.len() != settings.aperture_size {
            return Err(ReconstructionError::AlgorithmFailure(format!(
                "apodization window has {} coefficients for an aperture of {}",
                job.window.len(),
                settings.aperture_size
            )));
        }

        let geometry = DelayGeometry::from_settings(settings);
        let lines = settings.reconstruction_lines;
        let finished = AtomicUsize::new(0);
        progress.report(BEAMFORMING_START, "beamforming");

        let rows: Vec<Vec<f32>> = (0..lines)
            .into_par_iter()
            .map(|line| {
                let row = beamform_line(job, &geometry, line);
                let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                progress.report_fraction(
                    BEAMFORMING_START,
                    BEAMFORMING_END,
                    done,
                    lines,
                    "beamforming",
                );
                row
            })
            .collect();

        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((lines, settings.samples_per_line), flat)
            .map_err(|err| ReconstructionError::AlgorithmFailure(err.to_string()))
    }
}

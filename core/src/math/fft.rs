use num_complex::Complex32;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Helper that wraps the `rustfft` planner for reuse across image lines.
pub struct FftHelper {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex32>,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        Self {
            forward,
            inverse,
            buffer: vec![Complex32::zero(); size],
        }
    }

    /// Planned transform size; never zero.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Replaces `line` with the magnitude of its analytic signal.
    ///
    /// Lines shorter than the planned size are zero-padded; only the first
    /// `line.len()` values are written back.
    pub fn envelope_in_place(&mut self, line: &mut [f32]) {
        let n = self.buffer.len();
        self.load(line);
        self.forward.process(&mut self.buffer);

        // One-sided spectrum: keep DC (and Nyquist for even n), double the
        // positive frequencies, drop the negative ones.
        let positive_end = (n + 1) / 2;
        for (k, bin) in self.buffer.iter_mut().enumerate() {
            if k == 0 || (n % 2 == 0 && k == n / 2) {
                continue;
            }
            if k < positive_end {
                *bin *= 2.0;
            } else {
                *bin = Complex32::zero();
            }
        }

        self.inverse.process(&mut self.buffer);
        let scale = 1.0 / n as f32;
        for (value, analytic) in line.iter_mut().zip(self.buffer.iter()) {
            *value = analytic.norm() * scale;
        }
    }

    fn load(&mut self, input: &[f32]) {
        for (slot, value) in self
            .buffer
            .iter_mut()
            .zip(input.iter().copied().chain(std::iter::repeat(0.0)))
        {
            *slot = Complex32::new(value, 0.0);
        }
    }
}

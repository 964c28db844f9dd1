use log::debug;
use ndarray::ArrayView2;

/// Contiguous host copy of the raw samples, reused across calls.
///
/// The backing vector is only resized when the input dimensions change.
#[derive(Debug, Default)]
pub struct StagingBuffer {
    buffer: Vec<f32>,
    shape: (usize, usize),
    resizes: usize,
}

impl StagingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies `samples` (any memory layout) into element-major order.
    pub fn load(&mut self, samples: ArrayView2<'_, f32>) -> &[f32] {
        let shape = samples.dim();
        if shape != self.shape || self.buffer.len() != shape.0 * shape.1 {
            debug!("resizing staging buffer to {}x{}", shape.0, shape.1);
            self.buffer.resize(shape.0 * shape.1, 0.0);
            self.shape = shape;
            self.resizes += 1;
        }
        for (slot, &value) in self.buffer.iter_mut().zip(samples.iter()) {
            *slot = value;
        }
        &self.buffer
    }

    pub fn resize_count(&self) -> usize {
        self.resizes
    }

    pub fn reset(&mut self) {
        self.buffer = Vec::new();
        self.shape = (0, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn staging_reuses_storage_for_equal_shapes() {
        let mut staging = StagingBuffer::new();
        let first = Array2::from_elem((2, 3), 1.0_f32);
        let second = Array2::from_elem((2, 3), 2.0_f32);
        staging.load(first.view());
        let copied = staging.load(second.view()).to_vec();
        assert_eq!(copied, vec![2.0; 6]);
        assert_eq!(staging.resize_count(), 1);

        staging.load(Array2::zeros((3, 3)).view());
        assert_eq!(staging.resize_count(), 2);
    }

    #[test]
    fn staging_linearises_transposed_views() {
        let mut staging = StagingBuffer::new();
        let source = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let copied = staging.load(source.t()).to_vec();
        assert_eq!(copied, vec![1.0, 3.0, 2.0, 4.0]);
    }
}

use bytemuck::{bytes_of, cast_slice};
use log::{debug, info, warn};
use ndarray::Array2;
use std::mem::size_of;

use crate::math::geometry::DelayGeometry;
use crate::prelude::{
    BackendKind, ReconstructionBackend, ReconstructionError, ReconstructionJob,
    ReconstructionResult,
};
use crate::telemetry::ProgressReporter;

pub const BEAMFORM_WGSL: &str = include_str!("shaders/beamform.wgsl");

const WORKGROUP_SIZE: u32 = 64;
const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;

/// Uniform block matching `Params` in `beamform.wgsl` (80 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct KernelParams {
    elements: u32,
    samples_per_channel: u32,
    lines: u32,
    samples_per_line: u32,
    aperture_size: u32,
    algorithm: u32,
    quad_approx: u32,
    two_way: u32,
    angle_limited: u32,
    _pad0: [u32; 3],
    pitch: f32,
    line_spacing: f32,
    depth_spacing: f32,
    samples_per_metre: f32,
    tan_angle: f32,
    element_center: f32,
    line_center: f32,
    _pad1: f32,
}

const _: () = assert!(size_of::<KernelParams>() == 80);

impl KernelParams {
    /// Fails when a dimension or the pixel count does not fit the shader's `u32` indices.
    fn from_job(job: &ReconstructionJob<'_>) -> ReconstructionResult<Self> {
        let settings = job.settings;
        let geometry = DelayGeometry::from_settings(settings);
        let index = |value: usize, what: &str| {
            u32::try_from(value).map_err(|_| {
                ReconstructionError::AllocationFailure(format!(
                    "{} of {} exceeds the device index range",
                    what, value
                ))
            })
        };
        let lines = index(settings.reconstruction_lines, "reconstruction_lines")?;
        let samples_per_line = index(settings.samples_per_line, "samples_per_line")?;
        if lines.checked_mul(samples_per_line).is_none() {
            return Err(ReconstructionError::AllocationFailure(format!(
                "{} x {} pixels exceed the device index range",
                lines, samples_per_line
            )));
        }
        Ok(Self {
            elements: index(settings.transducer_elements, "transducer_elements")?,
            samples_per_channel: index(settings.samples_per_channel, "samples_per_channel")?,
            lines,
            samples_per_line,
            aperture_size: index(settings.aperture_size, "aperture_size")?,
            algorithm: settings.algorithm.shader_code(),
            quad_approx: settings.delay_calculation.shader_code(),
            two_way: settings.acquisition.shader_code(),
            angle_limited: u32::from(geometry.angle_limited),
            _pad0: [0; 3],
            pitch: settings.pitch_m,
            line_spacing: settings.line_spacing_m(),
            depth_spacing: settings.depth_spacing_m(),
            samples_per_metre: geometry.samples_per_metre,
            tan_angle: geometry.tan_angle,
            element_center: (settings.transducer_elements as f32 - 1.0) * 0.5,
            line_center: (settings.reconstruction_lines as f32 - 1.0) * 0.5,
            _pad1: 0.0,
        })
    }

    fn pixel_count(&self) -> u32 {
        self.lines * self.samples_per_line
    }
}

/// Device, queue and compiled pipeline; created once per backend.
struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
}

impl GpuContext {
    async fn create() -> ReconstructionResult<Self> {
        let instance = wgpu::Instance::default();
        let options = |force_fallback_adapter| wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter,
            compatible_surface: None,
        };
        // Headless machines may only expose a software adapter.
        let adapter = match instance.request_adapter(&options(false)).await {
            Ok(adapter) => adapter,
            Err(err) => {
                debug!("no hardware adapter ({}), trying a fallback adapter", err);
                instance.request_adapter(&options(true)).await.map_err(|err| {
                    ReconstructionError::BackendUnavailable(format!("no compute adapter: {}", err))
                })?
            }
        };
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("beamforming_device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                ..Default::default()
            })
            .await
            .map_err(|err| {
                ReconstructionError::BackendUnavailable(format!("device request failed: {}", err))
            })?;
        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            warn!("uncaptured wgpu error: {}", err);
        }));

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("BeamformBindGroupLayout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("BeamformPipelineLayout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("BeamformShader"),
            source: wgpu::ShaderSource::Wgsl(BEAMFORM_WGSL.into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("BeamformPipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("beamform"),
            compilation_options: Default::default(),
            cache: None,
        });

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("BeamformParams"),
            size: size_of::<KernelParams>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        info!("GPU beamforming backend on {}", adapter.get_info().name);
        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            params,
        })
    }

    fn allocate(
        &self,
        label: &str,
        len: usize,
        usage: wgpu::BufferUsages,
    ) -> ReconstructionResult<wgpu::Buffer> {
        let size = (len.max(1) * size_of::<f32>()) as wgpu::BufferAddress;
        let limits = self.device.limits();
        let binding_limit = limits.max_storage_buffer_binding_size as wgpu::BufferAddress;
        if size > limits.max_buffer_size || size > binding_limit {
            return Err(ReconstructionError::AllocationFailure(format!(
                "{} needs {} bytes, device limit is {}",
                label,
                size,
                limits.max_buffer_size.min(binding_limit)
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ReconstructionError::AllocationFailure(format!(
                "{} ({} bytes): {}",
                label, size, err
            )));
        }
        Ok(buffer)
    }
}

/// Device-resident buffers, each reallocated only when its length changes.
#[derive(Default)]
struct DeviceBuffers {
    samples: Option<(wgpu::Buffer, usize)>,
    window: Option<(wgpu::Buffer, usize)>,
    image: Option<(wgpu::Buffer, usize)>,
    staging: Option<(wgpu::Buffer, usize)>,
    bind_group: Option<wgpu::BindGroup>,
}

/// Reallocates `slot` when its length differs from `len`.
///
/// Replacing a buffer the bind group refers to (`bound`) drops the bind
/// group before allocating, so a failed allocation cannot leave it pointing
/// at buffers that are no longer in the cache.
fn ensure_slot<T, B>(
    slot: &mut Option<(T, usize)>,
    bind_group: &mut Option<B>,
    bound: bool,
    len: usize,
    allocations: &mut usize,
    allocate: impl FnOnce() -> ReconstructionResult<T>,
) -> ReconstructionResult<()> {
    if matches!(slot, Some((_, current)) if *current == len) {
        return Ok(());
    }
    if bound {
        *bind_group = None;
    }
    *slot = None;
    *slot = Some((allocate()?, len));
    *allocations += 1;
    Ok(())
}

enum DeviceState {
    Uninitialized,
    Ready(Box<GpuContext>),
    Unavailable(String),
}

/// wgpu compute backend producing the same images as the CPU reference.
pub struct GpuBackend {
    state: DeviceState,
    buffers: DeviceBuffers,
    allocations: usize,
}

impl GpuBackend {
    /// The device is opened lazily on the first reconstruction.
    pub fn new() -> Self {
        Self {
            state: DeviceState::Uninitialized,
            buffers: DeviceBuffers::default(),
            allocations: 0,
        }
    }

    /// Backend whose device initialisation has already failed.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: DeviceState::Unavailable(reason.into()),
            ..Self::new()
        }
    }

    /// Opens the device now; returns whether the backend can be used.
    pub fn initialize(&mut self) -> bool {
        self.context().is_ok()
    }

    /// Number of device buffer (re)allocations performed so far.
    pub fn allocation_count(&self) -> usize {
        self.allocations
    }

    /// Drops the device-resident buffers; they are recreated on next use.
    pub fn release_buffers(&mut self) {
        self.buffers = DeviceBuffers::default();
    }

    fn context(&mut self) -> ReconstructionResult<&GpuContext> {
        if matches!(self.state, DeviceState::Uninitialized) {
            self.state = match pollster::block_on(GpuContext::create()) {
                Ok(context) => DeviceState::Ready(Box::new(context)),
                Err(err) => DeviceState::Unavailable(err.to_string()),
            };
        }
        match &self.state {
            DeviceState::Ready(context) => Ok(context.as_ref()),
            DeviceState::Unavailable(reason) => {
                Err(ReconstructionError::BackendUnavailable(reason.clone()))
            }
            DeviceState::Uninitialized => Err(ReconstructionError::BackendUnavailable(
                "device not initialised".into(),
            )),
        }
    }
}

impl Default for GpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconstructionBackend for GpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn release(&mut self) {
        self.release_buffers();
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
        let params = KernelParams::from_job(job)?;
        let pixels = params.pixel_count() as usize;

        // Split borrows: the context lives in `state`, the cache in `buffers`.
        self.context()?;
        let context = match &self.state {
            DeviceState::Ready(context) => context,
            _ => {
                return Err(ReconstructionError::BackendUnavailable(
                    "device not ready".into(),
                ))
            }
        };
        let buffers = &mut self.buffers;
        let allocations = &mut self.allocations;
        let storage_in = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;

        let slots = [
            (&mut buffers.samples, true, "BeamformSamples", job.samples.len(), storage_in),
            (&mut buffers.window, true, "BeamformWindow", job.window.len(), storage_in),
            (
                &mut buffers.image,
                true,
                "BeamformImage",
                pixels,
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            ),
            (
                &mut buffers.staging,
                false,
                "BeamformStaging",
                pixels,
                wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            ),
        ];
        for (slot, bound, label, len, usage) in slots {
            ensure_slot(slot, &mut buffers.bind_group, bound, len, allocations, || {
                debug!("allocating {} for {} values", label, len);
                context.allocate(label, len, usage)
            })?;
        }

        let (samples_buffer, window_buffer, image_buffer, staging_buffer) = match (
            &buffers.samples,
            &buffers.window,
            &buffers.image,
            &buffers.staging,
        ) {
            (Some((s, _)), Some((w, _)), Some((i, _)), Some((st, _))) => (s, w, i, st),
            _ => {
                return Err(ReconstructionError::AllocationFailure(
                    "device buffers missing after allocation".into(),
                ))
            }
        };

        if buffers.bind_group.is_none() {
            buffers.bind_group = Some(context.device.create_bind_group(
                &wgpu::BindGroupDescriptor {
                    label: Some("BeamformBindGroup"),
                    layout: &context.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: samples_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: window_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: image_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: context.params.as_entire_binding(),
                        },
                    ],
                },
            ));
        }
        let bind_group = buffers.bind_group.as_ref().ok_or_else(|| {
            ReconstructionError::AllocationFailure("bind group missing".into())
        })?;

        context
            .queue
            .write_buffer(samples_buffer, 0, cast_slice(job.samples));
        context
            .queue
            .write_buffer(window_buffer, 0, cast_slice(job.window));
        context.queue.write_buffer(&context.params, 0, bytes_of(&params));
        progress.report(30, "uploading to device");

        let groups = params.pixel_count().div_ceil(WORKGROUP_SIZE);
        let groups_x = groups.clamp(1, MAX_WORKGROUPS_PER_DIMENSION);
        let groups_y = groups.div_ceil(groups_x).max(1);
        let byte_len = (pixels * size_of::<f32>()) as wgpu::BufferAddress;

        context.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("BeamformEncoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Beamform"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&context.pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        encoder.copy_buffer_to_buffer(image_buffer, 0, staging_buffer, 0, byte_len);
        context.queue.submit(Some(encoder.finish()));
        if let Some(err) = pollster::block_on(context.device.pop_error_scope()) {
            return Err(ReconstructionError::AlgorithmFailure(format!(
                "compute dispatch rejected: {}",
                err
            )));
        }
        progress.report(60, "beamforming");

        let slice = staging_buffer.slice(..byte_len);
        let (tx, rx) = tokio::sync::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        context
            .device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| ReconstructionError::BackendUnavailable(err.to_string()))?;
        match rx.blocking_recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(ReconstructionError::AllocationFailure(format!(
                    "mapping result buffer: {}",
                    err
                )))
            }
            Err(_) => {
                return Err(ReconstructionError::BackendUnavailable(
                    "device dropped the readback".into(),
                ))
            }
        }

        let data = slice.get_mapped_range();
        let values: Vec<f32> = cast_slice::<u8, f32>(&data).to_vec();
        drop(data);
        staging_buffer.unmap();
        progress.report(crate::processing::cpu::BEAMFORMING_END, "reading back");

        Array2::from_shape_vec((settings.reconstruction_lines, settings.samples_per_line), values)
            .map_err(|err| ReconstructionError::AlgorithmFailure(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::generate_window;
    use crate::settings::Settings;
    use naga::valid::{Capabilities, ValidationFlags, Validator};

    #[test]
    fn beamform_shader_validates() {
        let module = naga::front::wgsl::parse_str(BEAMFORM_WGSL)
            .unwrap_or_else(|err| panic!("beamform.wgsl: {err:?}"));
        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        validator
            .validate(&module)
            .unwrap_or_else(|err| panic!("beamform.wgsl: {err:?}"));
    }

    #[test]
    fn kernel_params_follow_settings() {
        let settings = Settings {
            transducer_elements: 64,
            reconstruction_lines: 32,
            samples_per_line: 100,
            angle_deg: 90.0,
            ..Default::default()
        };
        let window = generate_window(settings.apodization, settings.aperture_size);
        let samples = vec![0.0; 64 * settings.samples_per_channel];
        let job = ReconstructionJob {
            samples: &samples,
            settings: &settings,
            window: &window,
        };
        let params = KernelParams::from_job(&job).unwrap();
        assert_eq!(params.pixel_count(), 3200);
        assert_eq!(params.angle_limited, 0);
        assert_eq!(params.element_center, 31.5);
        assert_eq!(params.line_center, 15.5);
    }

    #[test]
    fn oversized_grid_is_an_allocation_failure() {
        let settings = Settings {
            reconstruction_lines: 65_536,
            samples_per_line: 65_536,
            ..Default::default()
        };
        let job = ReconstructionJob {
            samples: &[],
            settings: &settings,
            window: &[],
        };
        let err = KernelParams::from_job(&job).unwrap_err();
        assert!(matches!(err, ReconstructionError::AllocationFailure(_)));
    }

    #[test]
    fn short_window_is_rejected_before_touching_the_device() {
        let settings = Settings::default();
        let window = generate_window(settings.apodization, settings.aperture_size - 1);
        let samples = vec![0.0; settings.transducer_elements * settings.samples_per_channel];
        let job = ReconstructionJob {
            samples: &samples,
            settings: &settings,
            window: &window,
        };
        let mut backend = GpuBackend::unavailable("no device");
        let err = backend
            .reconstruct(&job, &ProgressReporter::silent())
            .unwrap_err();
        assert!(matches!(err, ReconstructionError::AlgorithmFailure(_)));
    }

    #[test]
    fn failed_reallocation_drops_the_bind_group() {
        let mut slot: Option<(Vec<f32>, usize)> = Some((vec![0.0; 4], 4));
        let mut bind_group = Some("old");
        let mut allocations = 0;

        let unchanged = ensure_slot(&mut slot, &mut bind_group, true, 4, &mut allocations, || {
            Ok(vec![0.0; 4])
        });
        assert!(unchanged.is_ok());
        assert_eq!((bind_group, allocations), (Some("old"), 0));

        let failed = ensure_slot(&mut slot, &mut bind_group, true, 8, &mut allocations, || {
            Err(ReconstructionError::AllocationFailure("out of memory".into()))
        });
        assert!(failed.is_err());
        assert!(slot.is_none());
        assert!(bind_group.is_none());

        // A retry with the same size must allocate again rather than reuse.
        bind_group = Some("rebuilt");
        ensure_slot(&mut slot, &mut bind_group, true, 8, &mut allocations, || {
            Ok(vec![0.0; 8])
        })
        .unwrap();
        assert_eq!(slot.as_ref().map(|(_, len)| *len), Some(8));
        assert_eq!((bind_group, allocations), (None, 1));
    }

    #[test]
    fn unbound_slots_keep_the_bind_group() {
        let mut slot: Option<(Vec<f32>, usize)> = None;
        let mut bind_group = Some("current");
        let mut allocations = 0;
        ensure_slot(&mut slot, &mut bind_group, false, 16, &mut allocations, || {
            Ok(vec![0.0; 16])
        })
        .unwrap();
        assert_eq!((bind_group, allocations), (Some("current"), 1));
    }

    #[test]
    fn unavailable_backend_reports_reason() {
        let settings = Settings::default();
        let window = generate_window(settings.apodization, settings.aperture_size);
        let samples = vec![0.0; settings.transducer_elements * settings.samples_per_channel];
        let job = ReconstructionJob {
            samples: &samples,
            settings: &settings,
            window: &window,
        };
        let mut backend = GpuBackend::unavailable("simulated init failure");
        let err = backend
            .reconstruct(&job, &ProgressReporter::silent())
            .unwrap_err();
        assert_eq!(
            err,
            ReconstructionError::BackendUnavailable("simulated init failure".into())
        );
        assert_eq!(backend.allocation_count(), 0);
    }
}

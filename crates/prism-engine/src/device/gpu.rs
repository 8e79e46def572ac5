use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;

use anyhow::{Context, Result};
use wgpu::util::DeviceExt;

use super::{
    BufferUsage, Device, DeviceError, DeviceStats, GpuHandle, GpuInit, ImageData, ResourceKind,
};

enum Resource {
    Buffer { buffer: wgpu::Buffer, usage: BufferUsage, label: String },
    Texture(wgpu::Texture),
    Program { _vertex: wgpu::ShaderModule, _fragment: wgpu::ShaderModule },
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    live: HashMap<GpuHandle, Resource>,
    created: u64,
    released: u64,
}

/// Device backed by a wgpu adapter, without a presentation surface.
///
/// Roots render into offscreen targets; swapchain handling belongs to the
/// windowing layer that owns the surface.
pub struct WgpuDevice {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    texture_format: wgpu::TextureFormat,
    label: String,
    registry: RefCell<Registry>,
}

impl WgpuDevice {
    /// Acquires an adapter and logical device.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(init: GpuInit) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: init.force_fallback_adapter,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(&init.label),
                required_features: init.required_features,
                required_limits: init.required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        log::info!("wgpu device ready: {:?}", adapter.get_info().name);

        Ok(Self {
            adapter,
            device,
            queue,
            texture_format: init.texture_format,
            label: init.label,
            registry: RefCell::new(Registry::default()),
        })
    }

    /// Blocking variant of [`WgpuDevice::new`] for synchronous callers.
    pub fn new_blocking(init: GpuInit) -> Result<Self> {
        pollster::block_on(Self::new(init))
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn insert(&self, kind: ResourceKind, resource: Resource) -> GpuHandle {
        let mut reg = self.registry.borrow_mut();
        reg.next_id += 1;
        reg.created += 1;
        let handle = GpuHandle { kind, id: reg.next_id };
        reg.live.insert(handle, resource);
        handle
    }

    fn make_buffer(&self, label: &str, contents: &[u8], usage: BufferUsage) -> wgpu::Buffer {
        let usage = match usage {
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
            BufferUsage::Index => wgpu::BufferUsages::INDEX,
        } | wgpu::BufferUsages::COPY_DST;

        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        })
    }
}

/// Pads to `COPY_BUFFER_ALIGNMENT` as required by `Queue::write_buffer`.
fn aligned(contents: &[u8]) -> Cow<'_, [u8]> {
    let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
    let rem = contents.len() % align;
    if rem == 0 {
        Cow::Borrowed(contents)
    } else {
        let mut padded = contents.to_vec();
        padded.resize(contents.len() + align - rem, 0);
        Cow::Owned(padded)
    }
}

impl Device for WgpuDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn create_buffer(
        &self,
        label: &str,
        contents: &[u8],
        usage: BufferUsage,
    ) -> Result<GpuHandle, DeviceError> {
        if contents.is_empty() {
            return Err(DeviceError::InvalidData {
                label: label.to_string(),
                reason: "empty buffer".to_string(),
            });
        }
        let buffer = self.make_buffer(label, contents, usage);
        Ok(self.insert(
            ResourceKind::Buffer,
            Resource::Buffer { buffer, usage, label: label.to_string() },
        ))
    }

    fn write_buffer(&self, handle: GpuHandle, contents: &[u8]) -> Result<(), DeviceError> {
        let mut reg = self.registry.borrow_mut();
        let Some(Resource::Buffer { buffer, usage, label }) = reg.live.get_mut(&handle) else {
            return Err(DeviceError::UnknownHandle(handle));
        };

        let data = aligned(contents);
        if data.len() as u64 > buffer.size() {
            // grow: replace the allocation behind the same handle
            let replacement = self.make_buffer(label, &data, *usage);
            let old = std::mem::replace(buffer, replacement);
            old.destroy();
        } else {
            self.queue.write_buffer(buffer, 0, &data);
        }
        Ok(())
    }

    fn create_texture(&self, label: &str, image: &ImageData) -> Result<GpuHandle, DeviceError> {
        if !image.is_consistent() {
            return Err(DeviceError::InvalidData {
                label: label.to_string(),
                reason: format!("{}x{} image with {} bytes", image.width, image.height, image.pixels.len()),
            });
        }

        let limit = self.device.limits().max_texture_dimension_2d;
        if image.width > limit || image.height > limit {
            return Err(DeviceError::Backend(format!(
                "texture `{label}` exceeds max dimension {limit}"
            )));
        }

        let texture = self.device.create_texture_with_data(
            &self.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: image.width,
                    height: image.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: self.texture_format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &image.pixels,
        );
        Ok(self.insert(ResourceKind::Texture, Resource::Texture(texture)))
    }

    fn create_program(
        &self,
        label: &str,
        vertex: &str,
        fragment: &str,
    ) -> Result<GpuHandle, DeviceError> {
        if vertex.trim().is_empty() || fragment.trim().is_empty() {
            return Err(DeviceError::InvalidData {
                label: label.to_string(),
                reason: "missing shader source".to_string(),
            });
        }

        let module = |stage: &str, source: &str| {
            self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("{label} {stage}")),
                source: wgpu::ShaderSource::Wgsl(Cow::Owned(source.to_string())),
            })
        };
        let program = Resource::Program {
            _vertex: module("vertex", vertex),
            _fragment: module("fragment", fragment),
        };
        Ok(self.insert(ResourceKind::Program, program))
    }

    fn release(&self, handle: GpuHandle) {
        let removed = {
            let mut reg = self.registry.borrow_mut();
            let removed = reg.live.remove(&handle);
            if removed.is_some() {
                reg.released += 1;
            }
            removed
        };

        match removed {
            Some(Resource::Buffer { buffer, .. }) => buffer.destroy(),
            Some(Resource::Texture(texture)) => texture.destroy(),
            Some(Resource::Program { .. }) => {}
            None => log::warn!("{}: release of unknown handle {handle:?}", self.label),
        }
    }

    fn stats(&self) -> DeviceStats {
        let reg = self.registry.borrow();
        let mut stats = DeviceStats { created: reg.created, released: reg.released, ..Default::default() };
        for resource in reg.live.values() {
            match resource {
                Resource::Buffer { .. } => stats.live_buffers += 1,
                Resource::Texture(_) => stats.live_textures += 1,
                Resource::Program { .. } => stats.live_programs += 1,
            }
        }
        stats
    }
}

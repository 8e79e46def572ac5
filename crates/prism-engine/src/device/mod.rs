//! GPU device layer.
//!
//! This module is responsible for:
//! - the `Device` contract native objects allocate their GPU resources through
//! - a headless bookkeeping backend and a wgpu backend
//! - reference-counted sharing of programs and textures (`ResourcePool`)

mod error;
mod gpu;
mod headless;
mod image;
mod init;
mod pool;

pub use error::DeviceError;
pub use gpu::WgpuDevice;
pub use headless::HeadlessDevice;
pub use image::ImageData;
pub use init::GpuInit;
pub use pool::ResourcePool;

/// Kind of GPU-resident resource behind a [`GpuHandle`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Program,
}

/// Opaque handle to a resource owned by a [`Device`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct GpuHandle {
    pub kind: ResourceKind,
    pub id: u64,
}

/// Intended use of a buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BufferUsage {
    Vertex,
    Index,
}

/// Live-resource counters reported by a device.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct DeviceStats {
    pub live_buffers: usize,
    pub live_textures: usize,
    pub live_programs: usize,
    pub created: u64,
    pub released: u64,
}

impl DeviceStats {
    pub fn live(&self) -> usize {
        self.live_buffers + self.live_textures + self.live_programs
    }
}

/// Graphics device consumed by the scene graph.
///
/// All methods take `&self`; backends use interior mutability so one device can
/// be shared (`Rc<dyn Device>`) by a root's pool and its environment.
pub trait Device {
    /// Human-readable backend name, for diagnostics.
    fn label(&self) -> &str;

    fn create_buffer(
        &self,
        label: &str,
        contents: &[u8],
        usage: BufferUsage,
    ) -> Result<GpuHandle, DeviceError>;

    /// Replaces the contents of a buffer, growing it when needed.
    fn write_buffer(&self, handle: GpuHandle, contents: &[u8]) -> Result<(), DeviceError>;

    fn create_texture(&self, label: &str, image: &ImageData) -> Result<GpuHandle, DeviceError>;

    fn create_program(
        &self,
        label: &str,
        vertex: &str,
        fragment: &str,
    ) -> Result<GpuHandle, DeviceError>;

    /// Frees a resource. Unknown handles are ignored.
    fn release(&self, handle: GpuHandle);

    fn stats(&self) -> DeviceStats;
}

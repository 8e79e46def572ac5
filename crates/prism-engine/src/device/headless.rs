use std::cell::RefCell;
use std::collections::HashMap;

use super::{BufferUsage, Device, DeviceError, DeviceStats, GpuHandle, ImageData, ResourceKind};

#[derive(Debug)]
enum Record {
    Buffer { len: usize },
    Texture,
    Program,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    live: HashMap<GpuHandle, Record>,
    created: u64,
    released: u64,
}

/// Device that keeps bookkeeping only.
///
/// Used for offscreen roots and tests: every allocation is tracked so leaks and
/// double frees are observable through [`Device::stats`].
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    state: RefCell<State>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if `handle` has been created and not released.
    pub fn is_live(&self, handle: GpuHandle) -> bool {
        self.state.borrow().live.contains_key(&handle)
    }

    /// Byte length of a live buffer.
    pub fn buffer_len(&self, handle: GpuHandle) -> Option<usize> {
        match self.state.borrow().live.get(&handle) {
            Some(Record::Buffer { len }) => Some(*len),
            _ => None,
        }
    }

    fn alloc(&self, kind: ResourceKind, record: Record) -> GpuHandle {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        state.created += 1;
        let handle = GpuHandle { kind, id: state.next_id };
        state.live.insert(handle, record);
        handle
    }
}

impl Device for HeadlessDevice {
    fn label(&self) -> &str {
        "headless"
    }

    fn create_buffer(
        &self,
        label: &str,
        contents: &[u8],
        _usage: BufferUsage,
    ) -> Result<GpuHandle, DeviceError> {
        if contents.is_empty() {
            return Err(DeviceError::InvalidData {
                label: label.to_string(),
                reason: "empty buffer".to_string(),
            });
        }
        Ok(self.alloc(ResourceKind::Buffer, Record::Buffer { len: contents.len() }))
    }

    fn write_buffer(&self, handle: GpuHandle, contents: &[u8]) -> Result<(), DeviceError> {
        match self.state.borrow_mut().live.get_mut(&handle) {
            Some(Record::Buffer { len }) => {
                *len = contents.len();
                Ok(())
            }
            _ => Err(DeviceError::UnknownHandle(handle)),
        }
    }

    fn create_texture(&self, label: &str, image: &ImageData) -> Result<GpuHandle, DeviceError> {
        if !image.is_consistent() {
            return Err(DeviceError::InvalidData {
                label: label.to_string(),
                reason: format!(
                    "{}x{} image with {} bytes",
                    image.width,
                    image.height,
                    image.pixels.len()
                ),
            });
        }
        Ok(self.alloc(ResourceKind::Texture, Record::Texture))
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
        Ok(self.alloc(ResourceKind::Program, Record::Program))
    }

    fn release(&self, handle: GpuHandle) {
        let mut state = self.state.borrow_mut();
        if state.live.remove(&handle).is_some() {
            state.released += 1;
        } else {
            log::warn!("headless device: release of unknown handle {handle:?}");
        }
    }

    fn stats(&self) -> DeviceStats {
        let state = self.state.borrow();
        let mut stats = DeviceStats { created: state.created, released: state.released, ..Default::default() };
        for record in state.live.values() {
            match record {
                Record::Buffer { .. } => stats.live_buffers += 1,
                Record::Texture => stats.live_textures += 1,
                Record::Program => stats.live_programs += 1,
            }
        }
        stats
    }
}

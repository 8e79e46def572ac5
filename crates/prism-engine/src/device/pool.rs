use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::{BufferUsage, Device, DeviceError, DeviceStats, GpuHandle, ImageData, ResourceKind};

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
enum ShareKey {
    Program { vertex: String, fragment: String },
    /// Pointer identity of the image; the entry keeps the `Rc` alive so the
    /// address cannot be reused while the texture is live.
    Texture(usize),
}

struct Shared {
    handle: GpuHandle,
    refs: usize,
    _image: Option<Rc<ImageData>>,
}

#[derive(Default)]
struct Tables {
    shared: HashMap<ShareKey, Shared>,
    by_handle: HashMap<GpuHandle, ShareKey>,
}

/// Reference-counted front for a [`Device`].
///
/// Programs are shared per (vertex, fragment) source pair and textures per
/// image identity. Buffers are always exclusive to their owner.
#[derive(Clone)]
pub struct ResourcePool {
    device: Rc<dyn Device>,
    tables: Rc<RefCell<Tables>>,
}

impl ResourcePool {
    pub fn new(device: Rc<dyn Device>) -> Self {
        Self { device, tables: Rc::new(RefCell::new(Tables::default())) }
    }

    pub fn device(&self) -> &Rc<dyn Device> {
        &self.device
    }

    pub fn stats(&self) -> DeviceStats {
        self.device.stats()
    }

    pub fn create_buffer(
        &self,
        label: &str,
        contents: &[u8],
        usage: BufferUsage,
    ) -> Result<GpuHandle, DeviceError> {
        self.device.create_buffer(label, contents, usage)
    }

    pub fn write_buffer(&self, handle: GpuHandle, contents: &[u8]) -> Result<(), DeviceError> {
        self.device.write_buffer(handle, contents)
    }

    pub fn acquire_program(
        &self,
        label: &str,
        vertex: &str,
        fragment: &str,
    ) -> Result<GpuHandle, DeviceError> {
        let key = ShareKey::Program { vertex: vertex.to_string(), fragment: fragment.to_string() };
        self.acquire(key, None, || self.device.create_program(label, vertex, fragment))
    }

    pub fn acquire_texture(
        &self,
        label: &str,
        image: &Rc<ImageData>,
    ) -> Result<GpuHandle, DeviceError> {
        let key = ShareKey::Texture(Rc::as_ptr(image) as usize);
        self.acquire(key, Some(image.clone()), || self.device.create_texture(label, image))
    }

    fn acquire(
        &self,
        key: ShareKey,
        image: Option<Rc<ImageData>>,
        create: impl FnOnce() -> Result<GpuHandle, DeviceError>,
    ) -> Result<GpuHandle, DeviceError> {
        if let Some(entry) = self.tables.borrow_mut().shared.get_mut(&key) {
            entry.refs += 1;
            return Ok(entry.handle);
        }

        let handle = create()?;
        let mut tables = self.tables.borrow_mut();
        tables.by_handle.insert(handle, key.clone());
        tables.shared.insert(key, Shared { handle, refs: 1, _image: image });
        Ok(handle)
    }

    /// Drops one reference. The device resource is freed when the count hits zero.
    pub fn release(&self, handle: GpuHandle) {
        let free = {
            let mut tables = self.tables.borrow_mut();
            match tables.by_handle.get(&handle).cloned() {
                None => true,
                Some(key) => {
                    let last = match tables.shared.get_mut(&key) {
                        Some(entry) => {
                            entry.refs -= 1;
                            entry.refs == 0
                        }
                        None => true,
                    };
                    if last {
                        tables.shared.remove(&key);
                        tables.by_handle.remove(&handle);
                    }
                    last
                }
            }
        };
        if free {
            self.device.release(handle);
        }
    }

    /// Current share count; exclusive or unknown handles report 0.
    pub fn refcount(&self, handle: GpuHandle) -> usize {
        if handle.kind == ResourceKind::Buffer {
            return 0;
        }
        let tables = self.tables.borrow();
        tables
            .by_handle
            .get(&handle)
            .and_then(|key| tables.shared.get(key))
            .map_or(0, |entry| entry.refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    fn pool() -> ResourcePool {
        ResourcePool::new(Rc::new(HeadlessDevice::new()))
    }

    #[test]
    fn identical_programs_share_one_device_program() {
        let pool = pool();
        let a = pool.acquire_program("a", "vs", "fs").unwrap();
        let b = pool.acquire_program("b", "vs", "fs").unwrap();
        let c = pool.acquire_program("c", "vs", "other").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.refcount(a), 2);
        assert_eq!(pool.stats().live_programs, 2);

        pool.release(a);
        assert_eq!(pool.stats().live_programs, 2);
        pool.release(b);
        assert_eq!(pool.stats().live_programs, 1);
    }

    #[test]
    fn textures_are_shared_by_image_identity() {
        let pool = pool();
        let img = Rc::new(ImageData::solid(1, 1, [0, 0, 0, 255]));
        let same_pixels = Rc::new(ImageData::solid(1, 1, [0, 0, 0, 255]));

        let a = pool.acquire_texture("a", &img).unwrap();
        let b = pool.acquire_texture("b", &img).unwrap();
        let c = pool.acquire_texture("c", &same_pixels).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        pool.release(a);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.stats().live(), 0);
    }

    #[test]
    fn buffers_are_released_immediately() {
        let pool = pool();
        let b = pool.create_buffer("b", &[0; 4], BufferUsage::Vertex).unwrap();
        assert_eq!(pool.refcount(b), 0);
        pool.release(b);
        assert_eq!(pool.stats().live_buffers, 0);
    }

    #[test]
    fn failed_creation_leaves_no_entry() {
        let pool = pool();
        assert!(pool.acquire_program("bad", "", "fs").is_err());
        let ok = pool.acquire_program("ok", "vs", "fs").unwrap();
        assert_eq!(pool.refcount(ok), 1);
    }
}

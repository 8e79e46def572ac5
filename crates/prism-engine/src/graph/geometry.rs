use std::collections::BTreeMap;

use crate::coords::Vec3;
use crate::device::{BufferUsage, DeviceError, GpuHandle, ResourcePool};

use super::object::expect_count;
use super::{PropError, Value};

/// Named vertex attribute: `size` floats per vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub size: u32,
    pub data: Vec<f32>,
    buffer: Option<GpuHandle>,
    dirty: bool,
}

impl Attribute {
    pub fn new(size: u32, data: Vec<f32>) -> Self {
        Self { size, data, buffer: None, dirty: true }
    }

    /// Number of vertices described by this attribute.
    pub fn count(&self) -> usize {
        if self.size == 0 { 0 } else { self.data.len() / self.size as usize }
    }

    pub fn buffer(&self) -> Option<GpuHandle> {
        self.buffer
    }

    fn from_value(path: &[&str], value: &Value) -> Result<Self, PropError> {
        let size = match value.get("size") {
            Some(v) => expect_count(path, v)?,
            None => 3,
        };
        let data = value
            .get("data")
            .and_then(Value::to_f32_vec)
            .ok_or_else(|| PropError::ty(path, "{ size, data } attribute", value))?;
        check_len(path, size, &data, value)?;
        Ok(Self::new(size, data))
    }
}

fn check_len(path: &[&str], size: u32, data: &[f32], value: &Value) -> Result<(), PropError> {
    if data.len() % size as usize != 0 {
        return Err(PropError::ty(path, "data length divisible by attribute size", value));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
struct Index {
    data: Vec<u32>,
    buffer: Option<GpuHandle>,
    dirty: bool,
}

/// Vertex attributes plus an optional index, uploaded as exclusive GPU buffers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    attributes: BTreeMap<String, Attribute>,
    index: Option<Index>,
    released: Vec<GpuHandle>,
}

impl Geometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: &str, size: u32, data: Vec<f32>) -> Self {
        self.set_attribute(name, Attribute::new(size, data));
        self
    }

    pub fn with_index(mut self, index: Vec<u32>) -> Self {
        self.set_index(Some(index));
        self
    }

    pub fn set_attribute(&mut self, name: &str, attribute: Attribute) {
        let buffer = self.attributes.get(name).and_then(|a| a.buffer);
        self.attributes.insert(name.to_string(), Attribute { buffer, dirty: true, ..attribute });
    }

    pub fn set_index(&mut self, index: Option<Vec<u32>>) {
        let buffer = self.index.as_ref().and_then(|i| i.buffer);
        match index {
            Some(data) => self.index = Some(Index { data, buffer, dirty: true }),
            None => {
                self.released.extend(buffer);
                self.index = None;
            }
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Attribute)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn index(&self) -> Option<&[u32]> {
        self.index.as_ref().map(|i| i.data.as_slice())
    }

    /// Vertex count from `position`, or the first attribute when absent.
    pub fn vertex_count(&self) -> usize {
        self.attributes
            .get("position")
            .or_else(|| self.attributes.values().next())
            .map_or(0, Attribute::count)
    }

    pub fn index_count(&self) -> usize {
        self.index.as_ref().map_or(0, |i| i.data.len())
    }

    /// Center and radius enclosing the 3D positions.
    pub fn bounding_sphere(&self) -> Option<(Vec3, f32)> {
        let pos = self.attributes.get("position").filter(|a| a.size == 3)?;
        let points = pos.data.chunks_exact(3).map(|p| Vec3::new(p[0], p[1], p[2]));

        let (mut min, mut max) = (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY));
        for p in points.clone() {
            for i in 0..3 {
                min.set_axis(i, min.axis(i).min(p.axis(i)));
                max.set_axis(i, max.axis(i).max(p.axis(i)));
            }
        }
        if !min.is_finite() || !max.is_finite() {
            return None;
        }

        let center = (min + max) * 0.5;
        let radius = points.map(|p| (p - center).length()).fold(0.0f32, f32::max);
        Some((center, radius))
    }

    pub fn gpu_handles(&self) -> Vec<GpuHandle> {
        self.attributes
            .values()
            .filter_map(|a| a.buffer)
            .chain(self.index.as_ref().and_then(|i| i.buffer))
            .collect()
    }

    pub fn set_path(&mut self, path: &[&str], value: &Value) -> Result<(), PropError> {
        match path {
            ["index"] => {
                if value.is_null() {
                    self.set_index(None);
                    return Ok(());
                }
                let data = value
                    .to_f32_vec()
                    .ok_or_else(|| PropError::ty(path, "list of indices", value))?;
                self.set_index(Some(data.into_iter().map(|n| n as u32).collect()));
                Ok(())
            }
            ["attributes", name] | [name] => {
                let attribute = Attribute::from_value(path, value)?;
                self.set_attribute(name, attribute);
                Ok(())
            }
            ["attributes", name, field] | [name, field] => {
                let Some(attribute) = self.attributes.get_mut(*name) else {
                    return Err(PropError::unknown(path));
                };
                match *field {
                    "data" => {
                        let data = value
                            .to_f32_vec()
                            .ok_or_else(|| PropError::ty(path, "list of numbers", value))?;
                        check_len(path, attribute.size, &data, value)?;
                        attribute.data = data;
                    }
                    "size" => {
                        let size = expect_count(path, value)?;
                        check_len(path, size, &attribute.data, value)?;
                        attribute.size = size;
                    }
                    _ => return Err(PropError::unknown(path)),
                }
                attribute.dirty = true;
                Ok(())
            }
            _ => Err(PropError::unknown(path)),
        }
    }

    pub(crate) fn sync_gpu(&mut self, pool: &ResourcePool) -> Result<(), DeviceError> {
        for handle in self.released.drain(..) {
            pool.release(handle);
        }
        for (name, attribute) in self.attributes.iter_mut().filter(|(_, a)| a.dirty) {
            if attribute.data.is_empty() {
                continue;
            }
            let bytes: &[u8] = bytemuck::cast_slice(&attribute.data);
            match attribute.buffer {
                Some(handle) => pool.write_buffer(handle, bytes)?,
                None => attribute.buffer = Some(pool.create_buffer(name, bytes, BufferUsage::Vertex)?),
            }
            attribute.dirty = false;
        }
        if let Some(index) = self.index.as_mut().filter(|i| i.dirty && !i.data.is_empty()) {
            let bytes: &[u8] = bytemuck::cast_slice(&index.data);
            match index.buffer {
                Some(handle) => pool.write_buffer(handle, bytes)?,
                None => index.buffer = Some(pool.create_buffer("index", bytes, BufferUsage::Index)?),
            }
            index.dirty = false;
        }
        Ok(())
    }

    pub(crate) fn release_gpu(&mut self, pool: &ResourcePool) {
        for handle in self.gpu_handles().into_iter().chain(self.released.drain(..)) {
            pool.release(handle);
        }
        for attribute in self.attributes.values_mut() {
            attribute.buffer = None;
            attribute.dirty = true;
        }
        if let Some(index) = self.index.as_mut() {
            index.buffer = None;
            index.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::device::HeadlessDevice;

    fn tri() -> Geometry {
        Geometry::new()
            .with_attribute("position", 3, vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0])
            .with_index(vec![0, 1, 2])
    }

    #[test]
    fn counts_vertices_and_indices() {
        let g = tri();
        assert_eq!(g.vertex_count(), 3);
        assert_eq!(g.index_count(), 3);
    }

    #[test]
    fn uploads_one_buffer_per_attribute_and_index() {
        let pool = ResourcePool::new(Rc::new(HeadlessDevice::new()));
        let mut g = tri().with_attribute("uv", 2, vec![0.0; 6]);
        g.sync_gpu(&pool).unwrap();
        assert_eq!(pool.stats().live_buffers, 3);

        // rewriting data reuses the buffer
        g.set_path(&["uv", "data"], &Value::from([1.0f32; 6])).unwrap();
        g.sync_gpu(&pool).unwrap();
        assert_eq!(pool.stats().live_buffers, 3);

        g.release_gpu(&pool);
        assert_eq!(pool.stats().live_buffers, 0);
    }

    #[test]
    fn attribute_data_must_match_size() {
        let mut g = tri();
        let err = g.set_path(&["position", "data"], &Value::from([1.0f32; 4])).unwrap_err();
        assert!(matches!(err, PropError::Type { .. }));
    }

    #[test]
    fn bounding_sphere_encloses_positions() {
        let (center, radius) = tri().bounding_sphere().unwrap();
        assert_eq!(center, Vec3::new(0.5, 0.5, 0.0));
        assert!((radius - 0.5f32.sqrt()).abs() < 1e-5);
    }
}

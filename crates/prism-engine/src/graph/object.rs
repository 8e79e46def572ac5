use crate::coords::Vec3;
use crate::device::{GpuHandle, ResourcePool};

use super::{
    Camera, Geometry, GraphError, Mesh, NativeId, Orbit, Program, PropError, Texture, Transform,
    Value,
};
use crate::device::DeviceError;

/// Native object held by a scene-graph node.
#[derive(Debug, Clone)]
pub enum NativeObject {
    Transform(Transform),
    Mesh(Mesh),
    Camera(Camera),
    Geometry(Geometry),
    Program(Program),
    Texture(Texture),
    Orbit(Orbit),
}

impl NativeObject {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NativeObject::Transform(_) => "transform",
            NativeObject::Mesh(_) => "mesh",
            NativeObject::Camera(_) => "camera",
            NativeObject::Geometry(_) => "geometry",
            NativeObject::Program(_) => "program",
            NativeObject::Texture(_) => "texture",
            NativeObject::Orbit(_) => "orbit",
        }
    }

    /// Transform of objects that take part in the hierarchy.
    pub fn transform(&self) -> Option<&Transform> {
        match self {
            NativeObject::Transform(t) => Some(t),
            NativeObject::Mesh(m) => Some(&m.transform),
            NativeObject::Camera(c) => Some(&c.transform),
            _ => None,
        }
    }

    pub fn transform_mut(&mut self) -> Option<&mut Transform> {
        match self {
            NativeObject::Transform(t) => Some(t),
            NativeObject::Mesh(m) => Some(&mut m.transform),
            NativeObject::Camera(c) => Some(&mut c.transform),
            _ => None,
        }
    }

    /// Assigns `value` through a nested property path.
    pub fn set_path(&mut self, path: &[&str], value: &Value) -> Result<(), PropError> {
        if path.is_empty() {
            return Err(PropError::unknown(path));
        }
        match self {
            NativeObject::Transform(t) => t.set_path(path, value),
            NativeObject::Mesh(m) => m.set_path(path, value),
            NativeObject::Camera(c) => c.set_path(path, value),
            NativeObject::Geometry(g) => g.set_path(path, value),
            NativeObject::Program(p) => p.set_path(path, value),
            NativeObject::Texture(t) => t.set_path(path, value),
            NativeObject::Orbit(o) => o.set_path(path, value),
        }
    }

    /// Kind of child a slot accepts.
    pub fn slot_kind(&self, slot: &str) -> Result<&'static str, GraphError> {
        let accepted = match (self, slot.split_once('.')) {
            (NativeObject::Mesh(_), None) if slot == "geometry" => Some("geometry"),
            (NativeObject::Mesh(_), None) if slot == "program" => Some("program"),
            (NativeObject::Program(_), Some(("uniforms", name))) if !name.is_empty() => Some("texture"),
            _ => None,
        };
        accepted.ok_or_else(|| GraphError::NoSuchSlot { kind: self.kind_name(), slot: slot.to_string() })
    }

    pub fn slot(&self, slot: &str) -> Option<NativeId> {
        match (self, slot.split_once('.')) {
            (NativeObject::Mesh(m), None) if slot == "geometry" => m.geometry,
            (NativeObject::Mesh(m), None) if slot == "program" => m.program,
            (NativeObject::Program(p), Some(("uniforms", name))) => p.texture_slot(name),
            _ => None,
        }
    }

    /// Writes a slot; callers validate with [`NativeObject::slot_kind`] first.
    pub(crate) fn write_slot(&mut self, slot: &str, child: Option<NativeId>) {
        match (self, slot.split_once('.')) {
            (NativeObject::Mesh(m), None) if slot == "geometry" => m.geometry = child,
            (NativeObject::Mesh(m), None) if slot == "program" => m.program = child,
            (NativeObject::Program(p), Some(("uniforms", name))) => p.set_texture_slot(name, child),
            _ => {}
        }
    }

    pub fn gpu_handles(&self) -> Vec<GpuHandle> {
        match self {
            NativeObject::Geometry(g) => g.gpu_handles(),
            NativeObject::Program(p) => p.gpu_handles(),
            NativeObject::Texture(t) => t.gpu_handles(),
            _ => Vec::new(),
        }
    }

    /// Creates or refreshes GPU resources after construction or a prop change.
    pub(crate) fn sync_gpu(&mut self, pool: &ResourcePool) -> Result<(), DeviceError> {
        match self {
            NativeObject::Geometry(g) => g.sync_gpu(pool),
            NativeObject::Program(p) => p.sync_gpu(pool),
            NativeObject::Texture(t) => t.sync_gpu(pool),
            _ => Ok(()),
        }
    }

    pub(crate) fn release_gpu(&mut self, pool: &ResourcePool) {
        match self {
            NativeObject::Geometry(g) => g.release_gpu(pool),
            NativeObject::Program(p) => p.release_gpu(pool),
            NativeObject::Texture(t) => t.release_gpu(pool),
            _ => {}
        }
    }
}

pub(crate) fn expect_f32(path: &[&str], value: &Value) -> Result<f32, PropError> {
    value.as_f32().ok_or_else(|| PropError::ty(path, "number", value))
}

pub(crate) fn expect_bool(path: &[&str], value: &Value) -> Result<bool, PropError> {
    value.as_bool().ok_or_else(|| PropError::ty(path, "bool", value))
}

pub(crate) fn expect_str<'v>(path: &[&str], value: &'v Value) -> Result<&'v str, PropError> {
    value.as_str().ok_or_else(|| PropError::ty(path, "string", value))
}

pub(crate) fn expect_vec3(path: &[&str], value: &Value) -> Result<Vec3, PropError> {
    value.as_vec3().ok_or_else(|| PropError::ty(path, "list of 3 numbers", value))
}

pub(crate) fn expect_count(path: &[&str], value: &Value) -> Result<u32, PropError> {
    match value.as_f32() {
        Some(n) if n >= 1.0 && n.fract() == 0.0 => Ok(n as u32),
        _ => Err(PropError::ty(path, "positive integer", value)),
    }
}

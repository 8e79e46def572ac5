use std::collections::BTreeMap;
use std::rc::Rc;

use crate::device::{DeviceError, GpuHandle, ImageData, ResourcePool};

use super::object::{expect_bool, expect_str};
use super::{NativeId, PropError, Value};

/// Uniform value bound on a program.
#[derive(Debug, Clone)]
pub enum Uniform {
    Float(f32),
    /// Vectors and matrices, flattened.
    Vec(Vec<f32>),
    Bool(bool),
    /// Image uploaded as a pooled texture owned by the program.
    Image(Rc<ImageData>),
    /// Texture object attached through a `uniforms.<name>` slot.
    Texture(Option<NativeId>),
}

impl PartialEq for Uniform {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Uniform::Float(a), Uniform::Float(b)) => a == b,
            (Uniform::Vec(a), Uniform::Vec(b)) => a == b,
            (Uniform::Bool(a), Uniform::Bool(b)) => a == b,
            (Uniform::Image(a), Uniform::Image(b)) => Rc::ptr_eq(a, b),
            (Uniform::Texture(a), Uniform::Texture(b)) => a == b,
            _ => false,
        }
    }
}

impl Uniform {
    fn from_value(path: &[&str], value: &Value) -> Result<Self, PropError> {
        match value {
            Value::Number(n) => Ok(Uniform::Float(*n as f32)),
            Value::Bool(b) => Ok(Uniform::Bool(*b)),
            Value::Image(img) => Ok(Uniform::Image(img.clone())),
            Value::List(_) => value
                .to_f32_vec()
                .map(Uniform::Vec)
                .ok_or_else(|| PropError::ty(path, "list of numbers", value)),
            // `{ value: .. }` wrapper
            Value::Map(map) => match map.get("value") {
                Some(inner) => Uniform::from_value(path, inner),
                None => Err(PropError::ty(path, "uniform value", value)),
            },
            _ => Err(PropError::ty(path, "uniform value", value)),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum CullFace {
    None,
    #[default]
    Back,
    Front,
    FrontAndBack,
}

/// Shader program with its uniforms and fixed-function state.
#[derive(Debug, Clone)]
pub struct Program {
    vertex: String,
    fragment: String,
    uniforms: BTreeMap<String, Uniform>,
    pub cull_face: CullFace,
    pub transparent: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    handle: Option<GpuHandle>,
    stale: bool,
    images: BTreeMap<String, (Rc<ImageData>, GpuHandle)>,
}

impl Program {
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
            uniforms: BTreeMap::new(),
            cull_face: CullFace::Back,
            transparent: false,
            depth_test: true,
            depth_write: true,
            handle: None,
            stale: true,
            images: BTreeMap::new(),
        }
    }

    pub fn vertex(&self) -> &str {
        &self.vertex
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn uniform(&self, name: &str) -> Option<&Uniform> {
        self.uniforms.get(name)
    }

    pub fn uniforms(&self) -> impl Iterator<Item = (&str, &Uniform)> {
        self.uniforms.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn set_uniform(&mut self, name: &str, uniform: Uniform) {
        self.uniforms.insert(name.to_string(), uniform);
    }

    /// Compiled device program, once synced.
    pub fn handle(&self) -> Option<GpuHandle> {
        self.handle
    }

    pub(crate) fn texture_slot(&self, name: &str) -> Option<NativeId> {
        match self.uniforms.get(name) {
            Some(Uniform::Texture(id)) => *id,
            _ => None,
        }
    }

    pub(crate) fn set_texture_slot(&mut self, name: &str, texture: Option<NativeId>) {
        self.set_uniform(name, Uniform::Texture(texture));
    }

    pub fn gpu_handles(&self) -> Vec<GpuHandle> {
        self.handle.into_iter().chain(self.images.values().map(|(_, h)| *h)).collect()
    }

    pub fn set_path(&mut self, path: &[&str], value: &Value) -> Result<(), PropError> {
        match path {
            ["uniforms", name] | ["uniforms", name, "value"] => {
                let uniform = Uniform::from_value(path, value)?;
                self.set_uniform(name, uniform);
            }
            ["vertex"] => {
                self.vertex = expect_str(path, value)?.to_string();
                self.stale = true;
            }
            ["fragment"] => {
                self.fragment = expect_str(path, value)?.to_string();
                self.stale = true;
            }
            ["cullFace" | "cull_face"] => {
                self.cull_face = match value {
                    Value::Null | Value::Bool(false) => CullFace::None,
                    Value::Str(s) => match s.as_str() {
                        "none" => CullFace::None,
                        "back" | "BACK" => CullFace::Back,
                        "front" | "FRONT" => CullFace::Front,
                        "front_and_back" | "FRONT_AND_BACK" => CullFace::FrontAndBack,
                        _ => return Err(PropError::ty(path, "cull face", value)),
                    },
                    _ => return Err(PropError::ty(path, "cull face", value)),
                };
            }
            ["transparent"] => self.transparent = expect_bool(path, value)?,
            ["depthTest" | "depth_test"] => self.depth_test = expect_bool(path, value)?,
            ["depthWrite" | "depth_write"] => self.depth_write = expect_bool(path, value)?,
            _ => return Err(PropError::unknown(path)),
        }
        Ok(())
    }

    pub(crate) fn sync_gpu(&mut self, pool: &ResourcePool) -> Result<(), DeviceError> {
        if self.stale || self.handle.is_none() {
            let fresh = pool.acquire_program("program", &self.vertex, &self.fragment)?;
            if let Some(old) = self.handle.replace(fresh) {
                pool.release(old);
            }
            self.stale = false;
        }

        // drop uploads whose uniform changed or went away
        let uniforms = &self.uniforms;
        let outdated: Vec<String> = self
            .images
            .iter()
            .filter(|(name, (img, _))| {
                !matches!(uniforms.get(name.as_str()), Some(Uniform::Image(cur)) if Rc::ptr_eq(cur, img))
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in outdated {
            if let Some((_, handle)) = self.images.remove(&name) {
                pool.release(handle);
            }
        }

        for (name, uniform) in &self.uniforms {
            if let Uniform::Image(img) = uniform {
                if !self.images.contains_key(name) {
                    let handle = pool.acquire_texture(name, img)?;
                    self.images.insert(name.clone(), (img.clone(), handle));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn release_gpu(&mut self, pool: &ResourcePool) {
        for handle in self.gpu_handles() {
            pool.release(handle);
        }
        self.handle = None;
        self.images.clear();
        self.stale = true;
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
    fn uniforms_accept_plain_and_wrapped_values() {
        let mut p = Program::new("vs", "fs");
        p.set_path(&["uniforms", "uTime"], &Value::from(1.5f32)).unwrap();
        p.set_path(&["uniforms", "uColor", "value"], &Value::from([1.0f32, 0.0, 0.0])).unwrap();
        assert_eq!(p.uniform("uTime"), Some(&Uniform::Float(1.5)));
        assert_eq!(p.uniform("uColor"), Some(&Uniform::Vec(vec![1.0, 0.0, 0.0])));
        assert!(p.set_path(&["uniforms", "u"], &Value::from("nope")).is_err());
    }

    #[test]
    fn changing_a_uniform_keeps_the_compiled_program() {
        let pool = pool();
        let mut p = Program::new("vs", "fs");
        p.sync_gpu(&pool).unwrap();
        let handle = p.handle();

        p.set_path(&["uniforms", "uColor"], &Value::from([0.0f32, 1.0, 0.0])).unwrap();
        p.sync_gpu(&pool).unwrap();
        assert_eq!(p.handle(), handle);
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn new_source_recompiles_and_releases_the_old_program() {
        let pool = pool();
        let mut p = Program::new("vs", "fs");
        p.sync_gpu(&pool).unwrap();
        p.set_path(&["fragment"], &Value::from("fs2")).unwrap();
        p.sync_gpu(&pool).unwrap();
        assert_eq!(pool.stats().live_programs, 1);
        assert_eq!(pool.stats().created, 2);
    }

    #[test]
    fn image_uniforms_upload_and_release_textures() {
        let pool = pool();
        let img = Rc::new(ImageData::solid(2, 2, [9; 4]));
        let mut p = Program::new("vs", "fs");
        p.set_path(&["uniforms", "tMap"], &Value::Image(img)).unwrap();
        p.sync_gpu(&pool).unwrap();
        assert_eq!(pool.stats().live_textures, 1);

        p.set_path(&["uniforms", "tMap"], &Value::from(0.0f32)).unwrap();
        p.sync_gpu(&pool).unwrap();
        assert_eq!(pool.stats().live_textures, 0);
    }
}

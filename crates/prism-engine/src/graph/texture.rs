use std::rc::Rc;

use crate::device::{DeviceError, GpuHandle, ImageData, ResourcePool};

use super::object::{expect_bool, expect_str};
use super::{PropError, Value};

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum Wrap {
    #[default]
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Filter {
    Nearest,
    Linear,
    LinearMipmapLinear,
}

fn parse_wrap(path: &[&str], value: &Value) -> Result<Wrap, PropError> {
    Ok(match expect_str(path, value)? {
        "clamp" | "clamp_to_edge" | "CLAMP_TO_EDGE" => Wrap::ClampToEdge,
        "repeat" | "REPEAT" => Wrap::Repeat,
        "mirror" | "mirrored_repeat" | "MIRRORED_REPEAT" => Wrap::MirroredRepeat,
        _ => return Err(PropError::ty(path, "wrap mode", value)),
    })
}

fn parse_filter(path: &[&str], value: &Value) -> Result<Filter, PropError> {
    Ok(match expect_str(path, value)? {
        "nearest" | "NEAREST" => Filter::Nearest,
        "linear" | "LINEAR" => Filter::Linear,
        "linear_mipmap_linear" | "LINEAR_MIPMAP_LINEAR" => Filter::LinearMipmapLinear,
        _ => return Err(PropError::ty(path, "filter", value)),
    })
}

/// Sampled image. Uploads are pooled per image identity.
#[derive(Debug, Clone)]
pub struct Texture {
    image: Option<Rc<ImageData>>,
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub flip_y: bool,
    pub generate_mipmaps: bool,
    upload: Option<(Rc<ImageData>, GpuHandle)>,
}

impl Default for Texture {
    fn default() -> Self {
        Self {
            image: None,
            wrap_s: Wrap::ClampToEdge,
            wrap_t: Wrap::ClampToEdge,
            min_filter: Filter::LinearMipmapLinear,
            mag_filter: Filter::Linear,
            flip_y: true,
            generate_mipmaps: true,
            upload: None,
        }
    }
}

impl Texture {
    pub fn new(image: Option<Rc<ImageData>>) -> Self {
        Self { image, ..Self::default() }
    }

    pub fn image(&self) -> Option<&Rc<ImageData>> {
        self.image.as_ref()
    }

    pub fn gpu_handles(&self) -> Vec<GpuHandle> {
        self.upload.iter().map(|(_, h)| *h).collect()
    }

    pub fn set_path(&mut self, path: &[&str], value: &Value) -> Result<(), PropError> {
        match path {
            ["image"] => {
                self.image = match value {
                    Value::Null => None,
                    Value::Image(img) => Some(img.clone()),
                    _ => return Err(PropError::ty(path, "image", value)),
                };
            }
            ["wrapS" | "wrap_s"] => self.wrap_s = parse_wrap(path, value)?,
            ["wrapT" | "wrap_t"] => self.wrap_t = parse_wrap(path, value)?,
            ["minFilter" | "min_filter"] => self.min_filter = parse_filter(path, value)?,
            ["magFilter" | "mag_filter"] => self.mag_filter = parse_filter(path, value)?,
            ["flipY" | "flip_y"] => self.flip_y = expect_bool(path, value)?,
            ["generateMipmaps" | "generate_mipmaps"] => {
                self.generate_mipmaps = expect_bool(path, value)?;
            }
            _ => return Err(PropError::unknown(path)),
        }
        Ok(())
    }

    pub(crate) fn sync_gpu(&mut self, pool: &ResourcePool) -> Result<(), DeviceError> {
        let current = self.upload.as_ref().map(|(img, _)| img);
        let unchanged = match (&self.image, current) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return Ok(());
        }

        let fresh = match &self.image {
            Some(img) => Some((img.clone(), pool.acquire_texture("texture", img)?)),
            None => None,
        };
        if let Some((_, old)) = std::mem::replace(&mut self.upload, fresh) {
            pool.release(old);
        }
        Ok(())
    }

    pub(crate) fn release_gpu(&mut self, pool: &ResourcePool) {
        if let Some((_, handle)) = self.upload.take() {
            pool.release(handle);
        }
    }
}

use crate::coords::Mat4;

use super::object::{expect_f32, expect_str};
use super::{PropError, Transform, Value};

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum Projection {
    #[default]
    Perspective,
    Orthographic,
}

/// Perspective or orthographic camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub transform: Transform,
    pub projection: Projection,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub zoom: f32,
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            transform: Transform::default(),
            projection: Projection::Perspective,
            fov: 45.0,
            aspect: 1.0,
            near: 0.1,
            far: 100.0,
            zoom: 1.0,
            left: -1.0,
            right: 1.0,
            bottom: -1.0,
            top: 1.0,
        }
    }
}

impl Camera {
    pub fn projection_matrix(&self) -> Mat4 {
        match self.projection {
            Projection::Perspective => Mat4::perspective(self.fov, self.aspect, self.near, self.far),
            Projection::Orthographic => {
                let zoom = if self.zoom > 0.0 { self.zoom } else { 1.0 };
                Mat4::orthographic(
                    self.left / zoom,
                    self.right / zoom,
                    self.bottom / zoom,
                    self.top / zoom,
                    self.near,
                    self.far,
                )
            }
        }
    }

    /// View matrix for a camera whose world matrix is `world`.
    pub fn view_matrix(world: &Mat4) -> Mat4 {
        world.inverse().unwrap_or_default()
    }

    pub fn set_path(&mut self, path: &[&str], value: &Value) -> Result<(), PropError> {
        let field = match path {
            ["type" | "projection"] => {
                self.projection = match expect_str(path, value)? {
                    "perspective" => Projection::Perspective,
                    "orthographic" => Projection::Orthographic,
                    _ => return Err(PropError::ty(path, "`perspective` or `orthographic`", value)),
                };
                return Ok(());
            }
            ["fov"] => &mut self.fov,
            ["aspect"] => &mut self.aspect,
            ["near"] => &mut self.near,
            ["far"] => &mut self.far,
            ["zoom"] => &mut self.zoom,
            ["left"] => &mut self.left,
            ["right"] => &mut self.right,
            ["bottom"] => &mut self.bottom,
            ["top"] => &mut self.top,
            _ => return self.transform.set_path(path, value),
        };
        *field = expect_f32(path, value)?;
        Ok(())
    }
}

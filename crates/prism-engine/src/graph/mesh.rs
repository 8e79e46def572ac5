use super::object::{expect_bool, expect_f32, expect_str};
use super::{NativeId, PropError, Transform, Value};

/// Primitive topology used to draw a mesh.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum DrawMode {
    #[default]
    Triangles,
    TriangleStrip,
    Lines,
    LineStrip,
    Points,
}

impl DrawMode {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "triangles" | "TRIANGLES" => DrawMode::Triangles,
            "triangle_strip" | "triangleStrip" | "TRIANGLE_STRIP" => DrawMode::TriangleStrip,
            "lines" | "LINES" => DrawMode::Lines,
            "line_strip" | "lineStrip" | "LINE_STRIP" => DrawMode::LineStrip,
            "points" | "POINTS" => DrawMode::Points,
            _ => return None,
        })
    }
}

/// Drawable pairing of a geometry and a program.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub transform: Transform,
    pub geometry: Option<NativeId>,
    pub program: Option<NativeId>,
    pub mode: DrawMode,
    /// Lower values draw first.
    pub render_order: i32,
    pub frustum_culled: bool,
}

impl Default for Mesh {
    fn default() -> Self {
        Self {
            transform: Transform::default(),
            geometry: None,
            program: None,
            mode: DrawMode::Triangles,
            render_order: 0,
            frustum_culled: true,
        }
    }
}

impl Mesh {
    pub fn set_path(&mut self, path: &[&str], value: &Value) -> Result<(), PropError> {
        match path {
            ["mode"] => {
                let s = expect_str(path, value)?;
                self.mode = DrawMode::parse(s).ok_or_else(|| PropError::ty(path, "draw mode", value))?;
            }
            ["renderOrder" | "render_order"] => {
                self.render_order = expect_f32(path, value)? as i32;
            }
            ["frustumCulled" | "frustum_culled"] => {
                self.frustum_culled = expect_bool(path, value)?;
            }
            _ => return self.transform.set_path(path, value),
        }
        Ok(())
    }
}

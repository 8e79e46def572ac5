//! Procedural geometry generators.
//!
//! Vertex layouts, winding and UVs follow the usual WebGL primitive
//! conventions so programs written for them render unchanged.

use std::f32::consts::PI;

use crate::coords::Vec3;

use super::object::{expect_count, expect_f32};
use super::{Geometry, PropError, Value};

/// Parametric shape; `build` produces position/normal/uv/index data.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Box {
        width: f32,
        height: f32,
        depth: f32,
        width_segments: u32,
        height_segments: u32,
        depth_segments: u32,
    },
    Plane {
        width: f32,
        height: f32,
        width_segments: u32,
        height_segments: u32,
    },
    Sphere {
        radius: f32,
        width_segments: u32,
        /// Defaults to half the width segments.
        height_segments: Option<u32>,
    },
    Cylinder {
        radius_top: f32,
        radius_bottom: f32,
        height: f32,
        radial_segments: u32,
        height_segments: u32,
    },
    Torus {
        radius: f32,
        tube: f32,
        radial_segments: u32,
        tubular_segments: u32,
        arc: f32,
    },
    /// Full-screen triangle in clip space.
    Triangle,
}

enum Param<'a> {
    Float(&'a mut f32),
    Count(&'a mut u32),
    OptCount(&'a mut Option<u32>),
}

impl Shape {
    /// Shape with default parameters for a generator tag.
    pub fn from_tag(tag: &str) -> Option<Shape> {
        Some(match tag {
            "box" => Shape::Box {
                width: 1.0,
                height: 1.0,
                depth: 1.0,
                width_segments: 1,
                height_segments: 1,
                depth_segments: 1,
            },
            "plane" => Shape::Plane { width: 1.0, height: 1.0, width_segments: 1, height_segments: 1 },
            "sphere" => Shape::Sphere { radius: 0.5, width_segments: 16, height_segments: None },
            "cylinder" => Shape::Cylinder {
                radius_top: 0.5,
                radius_bottom: 0.5,
                height: 1.0,
                radial_segments: 8,
                height_segments: 1,
            },
            "torus" => Shape::Torus {
                radius: 0.5,
                tube: 0.2,
                radial_segments: 8,
                tubular_segments: 6,
                arc: 2.0 * PI,
            },
            "triangle" => Shape::Triangle,
            _ => return None,
        })
    }

    /// Parameter names in positional-argument order.
    pub fn param_names(&self) -> &'static [&'static str] {
        match self {
            Shape::Box { .. } => &["width", "height", "depth", "widthSegments", "heightSegments", "depthSegments"],
            Shape::Plane { .. } => &["width", "height", "widthSegments", "heightSegments"],
            Shape::Sphere { .. } => &["radius", "widthSegments", "heightSegments"],
            Shape::Cylinder { .. } => &["radiusTop", "radiusBottom", "height", "radialSegments", "heightSegments"],
            Shape::Torus { .. } => &["radius", "tube", "radialSegments", "tubularSegments", "arc"],
            Shape::Triangle => &[],
        }
    }

    /// `true` if `name` (camelCase or snake_case) is a parameter of this shape.
    pub fn has_param(&self, name: &str) -> bool {
        let name = camel(name);
        self.param_names().iter().any(|p| *p == name)
    }

    fn param(&mut self, name: &str) -> Option<Param<'_>> {
        let name = camel(name);
        Some(match (self, name.as_str()) {
            (Shape::Box { width, .. } | Shape::Plane { width, .. }, "width") => Param::Float(width),
            (Shape::Box { height, .. } | Shape::Plane { height, .. }, "height") => Param::Float(height),
            (Shape::Cylinder { height, .. }, "height") => Param::Float(height),
            (Shape::Box { depth, .. }, "depth") => Param::Float(depth),
            (
                Shape::Box { width_segments, .. }
                | Shape::Plane { width_segments, .. }
                | Shape::Sphere { width_segments, .. },
                "widthSegments",
            ) => Param::Count(width_segments),
            (
                Shape::Box { height_segments, .. }
                | Shape::Plane { height_segments, .. }
                | Shape::Cylinder { height_segments, .. },
                "heightSegments",
            ) => Param::Count(height_segments),
            (Shape::Sphere { height_segments, .. }, "heightSegments") => Param::OptCount(height_segments),
            (Shape::Box { depth_segments, .. }, "depthSegments") => Param::Count(depth_segments),
            (Shape::Sphere { radius, .. } | Shape::Torus { radius, .. }, "radius") => Param::Float(radius),
            (Shape::Cylinder { radius_top, .. }, "radiusTop") => Param::Float(radius_top),
            (Shape::Cylinder { radius_bottom, .. }, "radiusBottom") => Param::Float(radius_bottom),
            (
                Shape::Cylinder { radial_segments, .. } | Shape::Torus { radial_segments, .. },
                "radialSegments",
            ) => Param::Count(radial_segments),
            (Shape::Torus { tubular_segments, .. }, "tubularSegments") => Param::Count(tubular_segments),
            (Shape::Torus { tube, .. }, "tube") => Param::Float(tube),
            (Shape::Torus { arc, .. }, "arc") => Param::Float(arc),
            _ => return None,
        })
    }

    pub fn set_param(&mut self, name: &str, value: &Value) -> Result<(), PropError> {
        let path = [name];
        match self.param(name) {
            Some(Param::Float(f)) => *f = expect_f32(&path, value)?,
            Some(Param::Count(c)) => *c = expect_count(&path, value)?,
            Some(Param::OptCount(c)) => {
                *c = if value.is_null() { None } else { Some(expect_count(&path, value)?) };
            }
            None => return Err(PropError::unknown(&path)),
        }
        Ok(())
    }

    /// Applies constructor arguments: a positional number list, a map of
    /// named parameters, or a list holding one such map.
    pub fn apply_args(&mut self, args: &Value) -> Result<(), PropError> {
        match args {
            Value::Map(map) => {
                for (name, value) in map {
                    self.set_param(name, value)?;
                }
                Ok(())
            }
            Value::List(items) => match items.as_slice() {
                [single @ Value::Map(_)] => self.apply_args(single),
                _ => {
                    let names = self.param_names();
                    if items.len() > names.len() {
                        return Err(PropError::ty(&["args"], "fewer arguments", args));
                    }
                    for (name, value) in names.iter().zip(items) {
                        self.set_param(name, value)?;
                    }
                    Ok(())
                }
            },
            Value::Null => Ok(()),
            _ => Err(PropError::ty(&["args"], "list or map", args)),
        }
    }

    pub fn build(&self) -> Geometry {
        match *self {
            Shape::Box { width, height, depth, width_segments, height_segments, depth_segments } => {
                build_box(width, height, depth, width_segments, height_segments, depth_segments)
            }
            Shape::Plane { width, height, width_segments, height_segments } => {
                let mut b = Builder::default();
                b.plane(Axes { u: 0, v: 1, w: 2 }, 1.0, -1.0, width, height, 0.0, width_segments, height_segments);
                b.finish()
            }
            Shape::Sphere { radius, width_segments, height_segments } => {
                let hs = height_segments.unwrap_or(width_segments.div_ceil(2)).max(1);
                build_sphere(radius, width_segments.max(3), hs)
            }
            Shape::Cylinder { radius_top, radius_bottom, height, radial_segments, height_segments } => {
                build_cylinder(radius_top, radius_bottom, height, radial_segments.max(3), height_segments.max(1))
            }
            Shape::Torus { radius, tube, radial_segments, tubular_segments, arc } => {
                build_torus(radius, tube, radial_segments.max(2), tubular_segments.max(3), arc)
            }
            Shape::Triangle => Geometry::new()
                .with_attribute("position", 2, vec![-1.0, -1.0, 3.0, -1.0, -1.0, 3.0])
                .with_attribute("uv", 2, vec![0.0, 0.0, 2.0, 0.0, 0.0, 2.0]),
        }
    }
}

/// `width_segments` -> `widthSegments`.
fn camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Default)]
struct Builder {
    position: Vec<f32>,
    normal: Vec<f32>,
    uv: Vec<f32>,
    index: Vec<u32>,
}

#[derive(Copy, Clone)]
struct Axes {
    u: usize,
    v: usize,
    w: usize,
}

impl Builder {
    fn vertex_count(&self) -> u32 {
        (self.position.len() / 3) as u32
    }

    fn push(&mut self, p: Vec3, n: Vec3, uv: [f32; 2]) {
        self.position.extend(p.to_array());
        self.normal.extend(n.to_array());
        self.uv.extend(uv);
    }

    fn quad(&mut self, a: u32, b: u32, c: u32, d: u32) {
        self.index.extend([a, b, d, b, c, d]);
    }

    /// Grid facing `axes.w` at distance `depth / 2`.
    #[allow(clippy::too_many_arguments)]
    fn plane(
        &mut self,
        axes: Axes,
        udir: f32,
        vdir: f32,
        width: f32,
        height: f32,
        depth: f32,
        grid_x: u32,
        grid_y: u32,
    ) {
        let (grid_x, grid_y) = (grid_x.max(1), grid_y.max(1));
        let start = self.vertex_count();
        let seg_w = width / grid_x as f32;
        let seg_h = height / grid_y as f32;
        let normal_w = if depth >= 0.0 { 1.0 } else { -1.0 };

        for iy in 0..=grid_y {
            let y = iy as f32 * seg_h - height / 2.0;
            for ix in 0..=grid_x {
                let x = ix as f32 * seg_w - width / 2.0;
                let mut p = Vec3::zero();
                p.set_axis(axes.u, x * udir);
                p.set_axis(axes.v, y * vdir);
                p.set_axis(axes.w, depth / 2.0);
                let mut n = Vec3::zero();
                n.set_axis(axes.w, normal_w);
                self.push(p, n, [ix as f32 / grid_x as f32, 1.0 - iy as f32 / grid_y as f32]);
            }
        }

        let row = grid_x + 1;
        for iy in 0..grid_y {
            for ix in 0..grid_x {
                let a = start + ix + row * iy;
                let b = start + ix + row * (iy + 1);
                let c = start + ix + 1 + row * (iy + 1);
                let d = start + ix + 1 + row * iy;
                self.quad(a, b, c, d);
            }
        }
    }

    fn finish(self) -> Geometry {
        Geometry::new()
            .with_attribute("position", 3, self.position)
            .with_attribute("normal", 3, self.normal)
            .with_attribute("uv", 2, self.uv)
            .with_index(self.index)
    }
}

fn build_box(w: f32, h: f32, d: f32, ws: u32, hs: u32, ds: u32) -> Geometry {
    let (x, y, z) = (0, 1, 2);
    let mut b = Builder::default();
    b.plane(Axes { u: z, v: y, w: x }, -1.0, -1.0, d, h, w, ds, hs);
    b.plane(Axes { u: z, v: y, w: x }, 1.0, -1.0, d, h, -w, ds, hs);
    b.plane(Axes { u: x, v: z, w: y }, 1.0, 1.0, w, d, h, ws, ds);
    b.plane(Axes { u: x, v: z, w: y }, 1.0, -1.0, w, d, -h, ws, ds);
    b.plane(Axes { u: x, v: y, w: z }, 1.0, -1.0, w, h, d, ws, hs);
    b.plane(Axes { u: x, v: y, w: z }, -1.0, -1.0, w, h, -d, ws, hs);
    b.finish()
}

fn build_sphere(radius: f32, ws: u32, hs: u32) -> Geometry {
    let mut b = Builder::default();
    let mut grid = Vec::with_capacity(hs as usize + 1);

    for iy in 0..=hs {
        let v = iy as f32 / hs as f32;
        let u_offset = match iy {
            0 => 0.5 / ws as f32,
            _ if iy == hs => -0.5 / ws as f32,
            _ => 0.0,
        };
        let mut row = Vec::with_capacity(ws as usize + 1);
        for ix in 0..=ws {
            let u = ix as f32 / ws as f32;
            let p = Vec3::new(
                -radius * (u * 2.0 * PI).cos() * (v * PI).sin(),
                radius * (v * PI).cos(),
                radius * (u * 2.0 * PI).sin() * (v * PI).sin(),
            );
            row.push(b.vertex_count());
            b.push(p, p.normalize(), [u + u_offset, 1.0 - v]);
        }
        grid.push(row);
    }

    for iy in 0..hs as usize {
        for ix in 0..ws as usize {
            let a = grid[iy][ix + 1];
            let bb = grid[iy][ix];
            let c = grid[iy + 1][ix];
            let d = grid[iy + 1][ix + 1];
            // poles collapse to single triangles
            if iy != 0 {
                b.index.extend([a, bb, d]);
            }
            if iy != hs as usize - 1 {
                b.index.extend([bb, c, d]);
            }
        }
    }
    b.finish()
}

fn build_cylinder(rt: f32, rb: f32, height: f32, radial: u32, hs: u32) -> Geometry {
    let mut b = Builder::default();
    let half = height / 2.0;
    let slope = if height != 0.0 { (rb - rt) / height } else { 0.0 };

    let mut rows = Vec::with_capacity(hs as usize + 1);
    for y in 0..=hs {
        let v = y as f32 / hs as f32;
        let radius = v * (rb - rt) + rt;
        let mut row = Vec::with_capacity(radial as usize + 1);
        for x in 0..=radial {
            let theta = x as f32 / radial as f32 * 2.0 * PI;
            let (sin, cos) = theta.sin_cos();
            row.push(b.vertex_count());
            b.push(
                Vec3::new(radius * sin, -v * height + half, radius * cos),
                Vec3::new(sin, slope, cos).normalize(),
                [x as f32 / radial as f32, 1.0 - v],
            );
        }
        rows.push(row);
    }
    for x in 0..radial as usize {
        for y in 0..hs as usize {
            b.quad(rows[y][x], rows[y + 1][x], rows[y + 1][x + 1], rows[y][x + 1]);
        }
    }

    for (top, radius) in [(true, rt), (false, rb)] {
        let sign = if top { 1.0 } else { -1.0 };
        let normal = Vec3::new(0.0, sign, 0.0);
        let center_start = b.vertex_count();
        for _ in 0..radial {
            b.push(Vec3::new(0.0, half * sign, 0.0), normal, [0.5, 0.5]);
        }
        let ring_start = b.vertex_count();
        for x in 0..=radial {
            let theta = x as f32 / radial as f32 * 2.0 * PI;
            let (sin, cos) = theta.sin_cos();
            b.push(
                Vec3::new(radius * sin, half * sign, radius * cos),
                normal,
                [cos * 0.5 + 0.5, sin * 0.5 * sign + 0.5],
            );
        }
        for x in 0..radial {
            let (c, i) = (center_start + x, ring_start + x);
            if top {
                b.index.extend([i, i + 1, c]);
            } else {
                b.index.extend([i + 1, i, c]);
            }
        }
    }
    b.finish()
}

fn build_torus(radius: f32, tube: f32, radial: u32, tubular: u32, arc: f32) -> Geometry {
    let mut b = Builder::default();
    for j in 0..=radial {
        for i in 0..=tubular {
            let u = i as f32 / tubular as f32 * arc;
            let v = j as f32 / radial as f32 * 2.0 * PI;
            let p = Vec3::new(
                (radius + tube * v.cos()) * u.cos(),
                (radius + tube * v.cos()) * u.sin(),
                tube * v.sin(),
            );
            let center = Vec3::new(radius * u.cos(), radius * u.sin(), 0.0);
            b.push(p, (p - center).normalize(), [i as f32 / tubular as f32, j as f32 / radial as f32]);
        }
    }
    let row = tubular + 1;
    for j in 1..=radial {
        for i in 1..=tubular {
            let a = row * j + i - 1;
            let bb = row * (j - 1) + i - 1;
            let c = row * (j - 1) + i;
            let d = row * j + i;
            b.quad(a, bb, c, d);
        }
    }
    b.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(shape: &Shape) -> (usize, usize) {
        let g = shape.build();
        (g.vertex_count(), g.index_count())
    }

    #[test]
    fn default_shapes_have_expected_topology() {
        assert_eq!(counts(&Shape::from_tag("box").unwrap()), (24, 36));
        assert_eq!(counts(&Shape::from_tag("plane").unwrap()), (4, 6));
        // 17 * 9 vertices; pole rows emit one triangle per segment
        assert_eq!(counts(&Shape::from_tag("sphere").unwrap()), (153, (16 * 8 * 2 - 32) * 3));
        assert_eq!(counts(&Shape::from_tag("torus").unwrap()), (9 * 7, 8 * 6 * 6));
        assert_eq!(counts(&Shape::from_tag("triangle").unwrap()), (3, 0));
    }

    #[test]
    fn cylinder_has_side_and_caps() {
        let (v, i) = counts(&Shape::from_tag("cylinder").unwrap());
        // side 9 * 2, each cap 8 centers + 9 ring
        assert_eq!(v, 18 + 2 * 17);
        assert_eq!(i, 8 * 6 + 2 * 8 * 3);
    }

    #[test]
    fn positional_args_follow_parameter_order() {
        let mut shape = Shape::from_tag("box").unwrap();
        shape.apply_args(&Value::from([2.0f32, 3.0, 4.0])).unwrap();
        let (center, radius) = shape.build().bounding_sphere().unwrap();
        assert_eq!(center, Vec3::zero());
        assert!((radius - Vec3::new(1.0, 1.5, 2.0).length()).abs() < 1e-5);
    }

    #[test]
    fn named_args_accept_both_spellings() {
        let mut shape = Shape::from_tag("sphere").unwrap();
        let mut map = std::collections::BTreeMap::new();
        map.insert("width_segments".to_string(), Value::from(8.0f32));
        shape.apply_args(&Value::Map(map)).unwrap();
        assert!(shape.has_param("heightSegments"));
        assert_eq!(counts(&shape).0, 9 * 5);
        assert!(shape.set_param("depth", &Value::from(1.0f32)).is_err());
        assert!(shape.set_param("widthSegments", &Value::from(0.5f32)).is_err());
    }

    #[test]
    fn box_normals_point_outward() {
        let g = Shape::from_tag("box").unwrap().build();
        let pos = &g.attribute("position").unwrap().data;
        let nrm = &g.attribute("normal").unwrap().data;
        for (p, n) in pos.chunks_exact(3).zip(nrm.chunks_exact(3)) {
            let dot = p[0] * n[0] + p[1] * n[1] + p[2] * n[2];
            assert!(dot > 0.0);
        }
    }
}

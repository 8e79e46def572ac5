//! Math and coordinate types shared by the scene graph and its callers.
//!
//! Canonical 3D space:
//! - right-handed, +Y up, cameras look down -Z
//! - matrices are column-major (`m[col * 4 + row]`)
//! - Euler rotations are radians applied in XYZ order

mod color;
mod mat4;
mod vec3;

pub use color::ColorRgba;
pub use mat4::Mat4;
pub use vec3::Vec3;

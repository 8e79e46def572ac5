use core::cmp::Ordering;

use crate::coords::{Mat4, Vec3};

use super::{DrawMode, NativeId};

/// Stable sort key for draw calls.
///
/// Ordering rules:
/// 1) opaque before transparent
/// 2) `render_order` ascending
/// 3) `order`: traversal order for equal keys
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SortKey {
    pub transparent: bool,
    pub render_order: i32,
    pub order: u32,
}

impl Ord for SortKey {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.transparent
            .cmp(&other.transparent)
            .then(self.render_order.cmp(&other.render_order))
            .then(self.order.cmp(&other.order))
    }
}

impl PartialOrd for SortKey {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One mesh ready to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub key: SortKey,
    pub mesh: NativeId,
    pub geometry: NativeId,
    pub program: NativeId,
    pub world: Mat4,
    pub mode: DrawMode,
    pub vertex_count: usize,
    pub index_count: usize,
}

/// Six clip planes `(normal, d)`; a point is inside when `n·p + d >= 0`.
pub(crate) struct Frustum {
    planes: [(Vec3, f32); 6],
}

impl Frustum {
    /// Extracts the planes of a view-projection matrix.
    pub(crate) fn from_matrix(m: &Mat4) -> Self {
        let row = |r: usize| [m.at(r, 0), m.at(r, 1), m.at(r, 2), m.at(r, 3)];
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));
        let plane = |sign: f32, r: [f32; 4]| {
            let p = [r3[0] + sign * r[0], r3[1] + sign * r[1], r3[2] + sign * r[2], r3[3] + sign * r[3]];
            let n = Vec3::new(p[0], p[1], p[2]);
            let len = n.length();
            if len > 0.0 { (n * (1.0 / len), p[3] / len) } else { (n, p[3]) }
        };
        Self {
            planes: [
                plane(1.0, r0),
                plane(-1.0, r0),
                plane(1.0, r1),
                plane(-1.0, r1),
                plane(1.0, r2),
                plane(-1.0, r2),
            ],
        }
    }

    pub(crate) fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes.iter().all(|(n, d)| n.dot(center) + d >= -radius)
    }
}

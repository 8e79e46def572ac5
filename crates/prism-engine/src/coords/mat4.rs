use core::ops::Mul;

use super::Vec3;

/// 4x4 column-major matrix.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Mat4(pub [f32; 16]);

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// Element at `row`, `col`.
    #[inline]
    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.0[col * 4 + row]
    }

    /// Rotation matrix for Euler angles applied in XYZ order.
    pub fn from_euler_xyz(r: Vec3) -> Mat4 {
        let (a, b) = (r.x.cos(), r.x.sin());
        let (c, d) = (r.y.cos(), r.y.sin());
        let (e, f) = (r.z.cos(), r.z.sin());
        let (ae, af, be, bf) = (a * e, a * f, b * e, b * f);

        let mut m = Mat4::IDENTITY;
        m.0[0] = c * e;
        m.0[4] = -c * f;
        m.0[8] = d;
        m.0[1] = af + be * d;
        m.0[5] = ae - bf * d;
        m.0[9] = -b * c;
        m.0[2] = bf - ae * d;
        m.0[6] = be + af * d;
        m.0[10] = a * c;
        m
    }

    /// Composes translation, XYZ Euler rotation and scale.
    pub fn from_trs(translation: Vec3, rotation: Vec3, scale: Vec3) -> Mat4 {
        let mut m = Mat4::from_euler_xyz(rotation);
        for row in 0..3 {
            m.0[row] *= scale.x;
            m.0[4 + row] *= scale.y;
            m.0[8 + row] *= scale.z;
        }
        m.0[12] = translation.x;
        m.0[13] = translation.y;
        m.0[14] = translation.z;
        m
    }

    /// Rotation that points the local -Z axis from `eye` toward `target`.
    pub fn look_at_rotation(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        let mut z = eye - target;
        if z.length() == 0.0 {
            z.z = 1.0;
        }
        let z = z.normalize();

        let mut x = up.cross(z);
        if x.length() == 0.0 {
            // up and view direction are parallel; nudge the view direction
            let nudged = if up.z.abs() == 1.0 {
                Vec3::new(z.x + 0.0001, z.y, z.z)
            } else {
                Vec3::new(z.x, z.y, z.z + 0.0001)
            };
            x = up.cross(nudged.normalize());
        }
        let x = x.normalize();
        let y = z.cross(x);

        let mut m = Mat4::IDENTITY;
        m.0[0] = x.x;
        m.0[4] = y.x;
        m.0[8] = z.x;
        m.0[1] = x.y;
        m.0[5] = y.y;
        m.0[9] = z.y;
        m.0[2] = x.z;
        m.0[6] = y.z;
        m.0[10] = z.z;
        m
    }

    /// Extracts XYZ Euler angles from the (unscaled) rotation part.
    pub fn to_euler_xyz(&self) -> Vec3 {
        let m13 = self.at(0, 2).clamp(-1.0, 1.0);
        let y = m13.asin();
        if m13.abs() < 0.999_999_9 {
            Vec3::new(
                (-self.at(1, 2)).atan2(self.at(2, 2)),
                y,
                (-self.at(0, 1)).atan2(self.at(0, 0)),
            )
        } else {
            Vec3::new(self.at(2, 1).atan2(self.at(1, 1)), y, 0.0)
        }
    }

    /// OpenGL-style perspective projection. `fov_deg` is the vertical field of view.
    pub fn perspective(fov_deg: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        let f = 1.0 / (fov_deg.to_radians() * 0.5).tan();
        let nf = 1.0 / (near - far);
        Mat4([
            f / aspect, 0.0, 0.0, 0.0, //
            0.0, f, 0.0, 0.0, //
            0.0, 0.0, (far + near) * nf, -1.0, //
            0.0, 0.0, 2.0 * far * near * nf, 0.0,
        ])
    }

    pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
        let lr = 1.0 / (left - right);
        let bt = 1.0 / (bottom - top);
        let nf = 1.0 / (near - far);
        Mat4([
            -2.0 * lr, 0.0, 0.0, 0.0, //
            0.0, -2.0 * bt, 0.0, 0.0, //
            0.0, 0.0, 2.0 * nf, 0.0, //
            (left + right) * lr, (top + bottom) * bt, (far + near) * nf, 1.0,
        ])
    }

    /// Translation column.
    #[inline]
    pub fn translation(&self) -> Vec3 {
        Vec3::new(self.0[12], self.0[13], self.0[14])
    }

    /// General inverse; `None` for singular matrices.
    pub fn inverse(&self) -> Option<Mat4> {
        let m = &self.0;
        let (a00, a01, a02, a03) = (m[0], m[1], m[2], m[3]);
        let (a10, a11, a12, a13) = (m[4], m[5], m[6], m[7]);
        let (a20, a21, a22, a23) = (m[8], m[9], m[10], m[11]);
        let (a30, a31, a32, a33) = (m[12], m[13], m[14], m[15]);

        let b00 = a00 * a11 - a01 * a10;
        let b01 = a00 * a12 - a02 * a10;
        let b02 = a00 * a13 - a03 * a10;
        let b03 = a01 * a12 - a02 * a11;
        let b04 = a01 * a13 - a03 * a11;
        let b05 = a02 * a13 - a03 * a12;
        let b06 = a20 * a31 - a21 * a30;
        let b07 = a20 * a32 - a22 * a30;
        let b08 = a20 * a33 - a23 * a30;
        let b09 = a21 * a32 - a22 * a31;
        let b10 = a21 * a33 - a23 * a31;
        let b11 = a22 * a33 - a23 * a32;

        let det = b00 * b11 - b01 * b10 + b02 * b09 + b03 * b08 - b04 * b07 + b05 * b06;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;

        Some(Mat4([
            (a11 * b11 - a12 * b10 + a13 * b09) * inv,
            (a02 * b10 - a01 * b11 - a03 * b09) * inv,
            (a31 * b05 - a32 * b04 + a33 * b03) * inv,
            (a22 * b04 - a21 * b05 - a23 * b03) * inv,
            (a12 * b08 - a10 * b11 - a13 * b07) * inv,
            (a00 * b11 - a02 * b08 + a03 * b07) * inv,
            (a32 * b02 - a30 * b05 - a33 * b01) * inv,
            (a20 * b05 - a22 * b02 + a23 * b01) * inv,
            (a10 * b10 - a11 * b08 + a13 * b06) * inv,
            (a01 * b08 - a00 * b10 - a03 * b06) * inv,
            (a30 * b04 - a31 * b02 + a33 * b00) * inv,
            (a21 * b02 - a20 * b04 - a23 * b00) * inv,
            (a11 * b07 - a10 * b09 - a12 * b06) * inv,
            (a00 * b09 - a01 * b07 + a02 * b06) * inv,
            (a31 * b01 - a30 * b03 - a32 * b00) * inv,
            (a20 * b03 - a21 * b01 + a22 * b00) * inv,
        ]))
    }

    /// Largest axis scale, used to grow bounding spheres.
    pub fn max_scale_on_axis(&self) -> f32 {
        let m = &self.0;
        let x = m[0] * m[0] + m[1] * m[1] + m[2] * m[2];
        let y = m[4] * m[4] + m[5] * m[5] + m[6] * m[6];
        let z = m[8] * m[8] + m[9] * m[9] + m[10] * m[10];
        x.max(y).max(z).sqrt()
    }

    /// Transforms a point (w = 1).
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let m = &self.0;
        Vec3::new(
            m[0] * p.x + m[4] * p.y + m[8] * p.z + m[12],
            m[1] * p.x + m[5] * p.y + m[9] * p.z + m[13],
            m[2] * p.x + m[6] * p.y + m[10] * p.z + m[14],
        )
    }
}

impl Default for Mat4 {
    fn default() -> Self {
        Mat4::IDENTITY
    }
}

impl Mul for Mat4 {
    type Output = Mat4;

    fn mul(self, rhs: Mat4) -> Mat4 {
        let (a, b) = (&self.0, &rhs.0);
        let mut out = [0.0f32; 16];
        for col in 0..4 {
            for row in 0..4 {
                out[col * 4 + row] = (0..4).map(|k| a[k * 4 + row] * b[col * 4 + k]).sum();
            }
        }
        Mat4(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn trs_places_translation_in_last_column() {
        let m = Mat4::from_trs(Vec3::new(1.0, 2.0, 3.0), Vec3::zero(), Vec3::one());
        assert_eq!(m.translation(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(m.transform_point(Vec3::zero()), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn identity_is_neutral_for_mul() {
        let m = Mat4::from_trs(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.3, 0.2, 0.1), Vec3::splat(2.0));
        assert_eq!(Mat4::IDENTITY * m, m);
        assert_eq!(m * Mat4::IDENTITY, m);
    }

    #[test]
    fn euler_round_trips_through_matrix() {
        let r = Vec3::new(0.4, -0.3, 1.1);
        let back = Mat4::from_euler_xyz(r).to_euler_xyz();
        assert!(approx(back.x, r.x) && approx(back.y, r.y) && approx(back.z, r.z));
    }

    #[test]
    fn look_at_points_negative_z_at_target() {
        let eye = Vec3::new(0.0, 0.0, 5.0);
        let m = Mat4::look_at_rotation(eye, Vec3::zero(), Vec3::new(0.0, 1.0, 0.0));
        // forward is the negated third column
        let forward = Vec3::new(-m.at(0, 2), -m.at(1, 2), -m.at(2, 2));
        assert!(approx(forward.z, -1.0));
    }

    #[test]
    fn inverse_undoes_trs() {
        let m = Mat4::from_trs(Vec3::new(1.0, -2.0, 3.0), Vec3::new(0.3, 0.2, 0.1), Vec3::splat(2.0));
        let inv = m.inverse().unwrap();
        let p = Vec3::new(0.5, 0.25, -1.0);
        let back = inv.transform_point(m.transform_point(p));
        assert!(approx(back.x, p.x) && approx(back.y, p.y) && approx(back.z, p.z));
        assert!(Mat4([0.0; 16]).inverse().is_none());
    }

    #[test]
    fn rotation_about_y_moves_x_axis() {
        let m = Mat4::from_euler_xyz(Vec3::new(0.0, core::f32::consts::FRAC_PI_2, 0.0));
        let p = m.transform_point(Vec3::new(1.0, 0.0, 0.0));
        assert!(approx(p.x, 0.0) && approx(p.z, -1.0));
    }
}

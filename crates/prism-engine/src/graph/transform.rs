use crate::coords::{Mat4, Vec3};

use super::object::{expect_bool, expect_f32, expect_vec3};
use super::{PropError, Value};

/// Local transform shared by every object that lives in the child hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    /// XYZ Euler angles in radians.
    pub rotation: Vec3,
    pub scale: Vec3,
    /// Invisible objects are skipped together with their descendants.
    pub visible: bool,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zero(),
            rotation: Vec3::zero(),
            scale: Vec3::one(),
            visible: true,
        }
    }
}

impl Transform {
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_trs(self.position, self.rotation, self.scale)
    }

    /// Rotates so the local -Z axis points at `target`.
    pub fn look_at(&mut self, target: Vec3) {
        let m = Mat4::look_at_rotation(self.position, target, Vec3::new(0.0, 1.0, 0.0));
        self.rotation = m.to_euler_xyz();
    }

    pub fn set_path(&mut self, path: &[&str], value: &Value) -> Result<(), PropError> {
        match path {
            ["position", rest @ ..] => set_vec3(&mut self.position, path, rest, value, false),
            ["rotation", rest @ ..] => set_vec3(&mut self.rotation, path, rest, value, false),
            ["scale", rest @ ..] => set_vec3(&mut self.scale, path, rest, value, true),
            ["visible"] => {
                self.visible = expect_bool(path, value)?;
                Ok(())
            }
            ["lookAt" | "look_at"] => {
                let target = expect_vec3(path, value)?;
                self.look_at(target);
                Ok(())
            }
            _ => Err(PropError::unknown(path)),
        }
    }
}

/// Assigns a whole vector or one of its components (`position.y`).
///
/// With `splat`, a single number sets all three components.
pub(crate) fn set_vec3(
    target: &mut Vec3,
    path: &[&str],
    rest: &[&str],
    value: &Value,
    splat: bool,
) -> Result<(), PropError> {
    match rest {
        [] => {
            if splat {
                if let Some(n) = value.as_f32() {
                    *target = Vec3::splat(n);
                    return Ok(());
                }
            }
            *target = expect_vec3(path, value)?;
            Ok(())
        }
        [axis] => {
            let i = match *axis {
                "x" | "0" => 0,
                "y" | "1" => 1,
                "z" | "2" => 2,
                _ => return Err(PropError::unknown(path)),
            };
            target.set_axis(i, expect_f32(path, value)?);
            Ok(())
        }
        _ => Err(PropError::unknown(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_paths_assign_single_components() {
        let mut t = Transform::default();
        t.set_path(&["rotation", "y"], &Value::from(0.5f32)).unwrap();
        t.set_path(&["position"], &Value::from([1.0f32, 2.0, 3.0])).unwrap();
        assert_eq!(t.rotation, Vec3::new(0.0, 0.5, 0.0));
        assert_eq!(t.position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn scale_accepts_a_single_number() {
        let mut t = Transform::default();
        t.set_path(&["scale"], &Value::from(2.0f32)).unwrap();
        assert_eq!(t.scale, Vec3::splat(2.0));
    }

    #[test]
    fn rejects_unknown_components_and_wrong_types() {
        let mut t = Transform::default();
        assert_eq!(
            t.set_path(&["position", "w"], &Value::from(1.0f32)),
            Err(PropError::UnknownPath("position.w".into()))
        );
        assert!(matches!(
            t.set_path(&["visible"], &Value::from(1.0f32)),
            Err(PropError::Type { .. })
        ));
    }
}

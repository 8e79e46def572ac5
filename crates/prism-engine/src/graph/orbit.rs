use std::f32::consts::PI;

use crate::coords::Vec3;

use super::object::{expect_bool, expect_f32};
use super::transform::set_vec3;
use super::{NativeId, PropError, Value};

const EPS: f32 = 1e-6;

#[derive(Debug, Copy, Clone, PartialEq)]
struct Spherical {
    radius: f32,
    /// Azimuth around +Y.
    theta: f32,
    /// Polar angle from +Y.
    phi: f32,
}

impl Spherical {
    fn from_offset(offset: Vec3) -> Self {
        let radius = offset.length();
        if radius == 0.0 {
            return Self { radius, theta: 0.0, phi: 0.0 };
        }
        Self {
            radius,
            theta: offset.x.atan2(offset.z),
            phi: (offset.y / radius).clamp(-1.0, 1.0).acos(),
        }
    }

    fn to_offset(self) -> Vec3 {
        let sin_phi_radius = self.phi.max(EPS).sin() * self.radius;
        Vec3::new(
            sin_phi_radius * self.theta.sin(),
            self.phi.cos() * self.radius,
            sin_phi_radius * self.theta.cos(),
        )
    }
}

/// Orbit controls steering a camera around `target`.
///
/// Input (`rotate`, `zoom`) accumulates into a velocity; [`Orbit::advance`]
/// applies it, eases the camera toward the goal and decays the velocity by
/// `inertia`.
#[derive(Debug, Clone, PartialEq)]
pub struct Orbit {
    pub camera: Option<NativeId>,
    pub target: Vec3,
    pub enabled: bool,
    pub enable_rotate: bool,
    pub enable_zoom: bool,
    pub ease: f32,
    pub inertia: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub auto_rotate: bool,
    pub auto_rotate_speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub min_polar_angle: f32,
    pub max_polar_angle: f32,
    velocity: Spherical,
    goal: Option<Spherical>,
}

impl Default for Orbit {
    fn default() -> Self {
        Self {
            camera: None,
            target: Vec3::zero(),
            enabled: true,
            enable_rotate: true,
            enable_zoom: true,
            ease: 0.25,
            inertia: 0.85,
            rotate_speed: 0.1,
            zoom_speed: 1.0,
            auto_rotate: false,
            auto_rotate_speed: 1.0,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
            min_polar_angle: 0.0,
            max_polar_angle: PI,
            velocity: Spherical { radius: 1.0, theta: 0.0, phi: 0.0 },
            goal: None,
        }
    }
}

impl Orbit {
    pub fn new(camera: Option<NativeId>) -> Self {
        Self { camera, ..Self::default() }
    }

    /// Queues a rotation in radians, scaled by `rotate_speed`.
    pub fn rotate(&mut self, d_theta: f32, d_phi: f32) {
        if !self.enabled || !self.enable_rotate {
            return;
        }
        self.velocity.theta -= d_theta * self.rotate_speed;
        self.velocity.phi -= d_phi * self.rotate_speed;
    }

    /// Queues a distance change; factors below 1 move closer.
    pub fn zoom(&mut self, factor: f32) {
        if !self.enabled || !self.enable_zoom || factor <= 0.0 {
            return;
        }
        self.velocity.radius *= factor.powf(self.zoom_speed);
    }

    /// Next camera position given the current one.
    pub fn advance(&mut self, camera_position: Vec3) -> Vec3 {
        if !self.enabled {
            return camera_position;
        }
        if self.auto_rotate {
            self.velocity.theta -= 2.0 * PI / 3600.0 * self.auto_rotate_speed;
        }

        let current = Spherical::from_offset(camera_position - self.target);
        let mut goal = self.goal.unwrap_or(current);
        goal.radius = (goal.radius * self.velocity.radius).clamp(self.min_distance, self.max_distance);
        goal.theta += self.velocity.theta;
        goal.phi = (goal.phi + self.velocity.phi)
            .clamp(self.min_polar_angle, self.max_polar_angle)
            .clamp(EPS, PI - EPS);
        self.goal = Some(goal);

        let ease = self.ease.clamp(0.0, 1.0);
        let eased = Spherical {
            radius: current.radius + (goal.radius - current.radius) * ease,
            theta: current.theta + (goal.theta - current.theta) * ease,
            phi: current.phi + (goal.phi - current.phi) * ease,
        };

        self.velocity.theta *= self.inertia;
        self.velocity.phi *= self.inertia;
        self.velocity.radius = 1.0;

        self.target + eased.to_offset()
    }

    pub fn set_path(&mut self, path: &[&str], value: &Value) -> Result<(), PropError> {
        let field = match path {
            ["target", rest @ ..] => return set_vec3(&mut self.target, path, rest, value, false),
            ["enabled"] => return self.set_flag(path, value, |o| &mut o.enabled),
            ["enableRotate" | "enable_rotate"] => return self.set_flag(path, value, |o| &mut o.enable_rotate),
            ["enableZoom" | "enable_zoom"] => return self.set_flag(path, value, |o| &mut o.enable_zoom),
            ["autoRotate" | "auto_rotate"] => return self.set_flag(path, value, |o| &mut o.auto_rotate),
            ["ease"] => &mut self.ease,
            ["inertia"] => &mut self.inertia,
            ["rotateSpeed" | "rotate_speed"] => &mut self.rotate_speed,
            ["zoomSpeed" | "zoom_speed"] => &mut self.zoom_speed,
            ["autoRotateSpeed" | "auto_rotate_speed"] => &mut self.auto_rotate_speed,
            ["minDistance" | "min_distance"] => &mut self.min_distance,
            ["maxDistance" | "max_distance"] => &mut self.max_distance,
            ["minPolarAngle" | "min_polar_angle"] => &mut self.min_polar_angle,
            ["maxPolarAngle" | "max_polar_angle"] => &mut self.max_polar_angle,
            _ => return Err(PropError::unknown(path)),
        };
        *field = expect_f32(path, value)?;
        // explicit props invalidate the eased goal
        self.goal = None;
        Ok(())
    }

    fn set_flag(
        &mut self,
        path: &[&str],
        value: &Value,
        field: impl FnOnce(&mut Self) -> &mut bool,
    ) -> Result<(), PropError> {
        *field(self) = expect_bool(path, value)?;
        Ok(())
    }

    /// Points the orbit at `target` without moving the camera.
    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
        self.goal = None;
    }
}

//! Root configuration.
//!
//! Every field is optional so configs can be layered: a root starts from
//! defaults and each `render` call shallow-merges what it passes, field by
//! field. Configs also load from TOML:
//!
//! ```toml
//! mode = "concurrent"
//! frameloop = "demand"
//! dpr = 2.0
//! size = [800, 600]
//! clear_color = [0.05, 0.05, 0.08, 1.0]
//!
//! [camera]
//! fov = 35.0
//! position = [0.0, 1.0, 6.0]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use prism_engine::device::GpuInit;
use prism_engine::graph::{Camera, Projection, Value};
use serde::{Deserialize, Serialize};

use crate::context::Viewport;
use crate::error::PrismError;

/// When committed work becomes visible.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// `render` commits before returning.
    #[default]
    Blocking,
    /// `render` queues the tree; the next tick or `flush` commits it.
    Concurrent,
}

/// When frame subscribers run.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frameloop {
    /// Every tick.
    #[default]
    Always,
    /// Only on ticks after the root was invalidated or committed.
    Demand,
    /// Never; the root still commits.
    Never,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Headless,
    Wgpu,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerPreference {
    #[default]
    HighPerformance,
    LowPower,
}

/// Default camera of a root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fov: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub near: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub far: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoom: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<[f32; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub look_at: Option<[f32; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orthographic: Option<bool>,
}

impl CameraConfig {
    /// Camera for a viewport of the given aspect ratio.
    pub fn build(&self, aspect: f32) -> Result<Camera, PrismError> {
        let mut camera = Camera::default();
        camera.aspect = aspect;
        if let Some(fov) = self.fov {
            camera.fov = fov;
        }
        if let Some(near) = self.near {
            camera.near = near;
        }
        if let Some(far) = self.far {
            camera.far = far;
        }
        if let Some(zoom) = self.zoom {
            camera.zoom = zoom;
        }
        if self.orthographic == Some(true) {
            camera.projection = Projection::Orthographic;
        }
        // position first: look_at aims from wherever the camera ends up
        let placement = [("position", self.position), ("lookAt", self.look_at)];
        for (path, value) in placement.into_iter().filter_map(|(p, v)| Some((p, v?))) {
            camera
                .transform
                .set_path(&[path], &Value::from(value))
                .map_err(|e| PrismError::Config(format!("camera.{path}: {e}")))?;
        }
        Ok(camera)
    }
}

/// Options of one root. Unset fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<RenderMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frameloop: Option<Frameloop>,
    /// Device pixel ratio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dpr: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clear_color: Option<[f32; 4]>,
    /// Logical width and height.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<[f32; 2]>,
    /// Replaced as a whole on merge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<CameraConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_preference: Option<PowerPreference>,
    /// Device label, for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Keys this version does not know. Kept so merged configs round-trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl RootConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_frameloop(mut self, frameloop: Frameloop) -> Self {
        self.frameloop = Some(frameloop);
        self
    }

    pub fn with_dpr(mut self, dpr: f32) -> Self {
        self.dpr = Some(dpr);
        self
    }

    pub fn with_size(mut self, width: f32, height: f32) -> Self {
        self.size = Some([width, height]);
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = Some(color);
        self
    }

    pub fn with_camera(mut self, camera: CameraConfig) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Overlays the fields `other` sets.
    pub fn merge(&mut self, other: RootConfig) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        take!(mode, frameloop, dpr, clear_color, size, camera, backend, power_preference, label);
        self.extra.extend(other.extra);
    }

    pub fn from_toml_str(source: &str) -> Result<Self, PrismError> {
        let config: RootConfig = toml::from_str(source).map_err(|e| PrismError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PrismError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|source| PrismError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> Result<String, PrismError> {
        toml::to_string_pretty(self).map_err(|e| PrismError::Config(e.to_string()))
    }

    /// Rejects values no root can run with.
    pub fn validate(&self) -> Result<(), PrismError> {
        if let Some(dpr) = self.dpr.filter(|d| !(d.is_finite() && *d > 0.0)) {
            return Err(PrismError::Config(format!("dpr must be positive, got {dpr}")));
        }
        if let Some([w, h]) = self.size.filter(|[w, h]| !(*w >= 0.0 && *h >= 0.0)) {
            return Err(PrismError::Config(format!("size must not be negative, got {w}x{h}")));
        }
        Ok(())
    }

    pub fn mode(&self) -> RenderMode {
        self.mode.unwrap_or_default()
    }

    pub fn frameloop(&self) -> Frameloop {
        self.frameloop.unwrap_or_default()
    }

    pub fn backend(&self) -> Backend {
        self.backend.unwrap_or_default()
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color.unwrap_or([0.0, 0.0, 0.0, 1.0])
    }

    pub fn viewport(&self) -> Viewport {
        let base = match self.size {
            Some([w, h]) => Viewport::new(w, h),
            None => Viewport::default(),
        };
        base.with_dpr(self.dpr.unwrap_or(1.0))
    }

    pub fn camera(&self) -> CameraConfig {
        self.camera.clone().unwrap_or_default()
    }

    /// Backend options for a wgpu device.
    pub fn gpu_init(&self) -> GpuInit {
        let init = GpuInit::default().with_label(self.label.as_deref().unwrap_or("prism root"));
        match self.power_preference.unwrap_or_default() {
            PowerPreference::LowPower => init.low_power(),
            PowerPreference::HighPerformance => init,
        }
    }
}

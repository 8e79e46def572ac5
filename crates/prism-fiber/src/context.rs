//! Per-root environment.
//!
//! Every root owns one [`Environment`]. It is handed down the commit as an
//! `Rc` so lookups are O(1), and it is never mutated in place: resizing or
//! reconfiguring a root builds a new one that the next commit sees.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use prism_engine::device::Device;
use prism_engine::graph::{NativeId, SceneGraph};
use prism_engine::time::FrameTime;

/// Logical surface size plus device pixel ratio.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub dpr: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height, dpr: 1.0 }
    }

    pub fn with_dpr(mut self, dpr: f32) -> Self {
        self.dpr = dpr;
        self
    }

    /// Width over height; 1 for degenerate sizes.
    pub fn aspect(&self) -> f32 {
        if self.width > 0.0 && self.height > 0.0 { self.width / self.height } else { 1.0 }
    }

    /// Size in physical pixels.
    pub fn physical(&self) -> (u32, u32) {
        ((self.width * self.dpr).round() as u32, (self.height * self.dpr).round() as u32)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280.0, 720.0)
    }
}

/// Read-only view of a root's frame clock. Updated once per tick.
#[derive(Clone)]
pub struct Clock(Rc<Cell<FrameTime>>);

impl Clock {
    pub(crate) fn starting_at(start: Instant) -> Self {
        Self(Rc::new(Cell::new(FrameTime::at_start(start))))
    }

    /// Time of the most recent tick.
    pub fn now(&self) -> FrameTime {
        self.0.get()
    }

    pub(crate) fn set(&self, time: FrameTime) {
        self.0.set(time);
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Clock").field(&self.now()).finish()
    }
}

/// What every element and component of a root can see.
#[derive(Clone)]
pub struct Environment {
    pub device: Rc<dyn Device>,
    /// The root's native graph. Frame callbacks get it through `FrameCtx`
    /// instead; borrowing it here during a tick fails.
    pub graph: Rc<RefCell<SceneGraph>>,
    /// Native object of the root's scene container.
    pub scene: NativeId,
    /// Camera used for draw lists and by `orbit` elements.
    pub camera: NativeId,
    pub viewport: Viewport,
    pub clock: Clock,
    pub clear_color: [f32; 4],
}

impl Environment {
    /// Copy with a different viewport, for resizes.
    pub fn with_viewport(&self, viewport: Viewport) -> Environment {
        Environment { viewport, ..self.clone() }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("device", &self.device.label())
            .field("scene", &self.scene)
            .field("camera", &self.camera)
            .field("viewport", &self.viewport)
            .field("clock", &self.clock)
            .finish()
    }
}

/// Headless environment with an empty scene and a default camera.
#[cfg(test)]
pub(crate) fn test_env() -> Environment {
    use prism_engine::device::{HeadlessDevice, ResourcePool};
    use prism_engine::graph::{Camera, NativeObject, Transform};

    let device = Rc::new(HeadlessDevice::new());
    let mut graph = SceneGraph::new(ResourcePool::new(device.clone()));
    let scene = graph.insert(NativeObject::Transform(Transform::default())).expect("headless insert");
    let camera = graph.insert(NativeObject::Camera(Camera::default())).expect("headless insert");
    Environment {
        device,
        graph: Rc::new(RefCell::new(graph)),
        scene,
        camera,
        viewport: Viewport::new(400.0, 200.0),
        clock: Clock::starting_at(Instant::now()),
        clear_color: [0.0; 4],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_guards_degenerate_sizes() {
        assert_eq!(Viewport::new(200.0, 100.0).aspect(), 2.0);
        assert_eq!(Viewport::new(200.0, 0.0).aspect(), 1.0);
        assert_eq!(Viewport::new(100.0, 50.0).with_dpr(2.0).physical(), (200, 100));
    }

    #[test]
    fn clock_handles_share_time() {
        let start = Instant::now();
        let clock = Clock::starting_at(start);
        let view = clock.clone();
        clock.set(FrameTime { elapsed: 1.5, delta: 0.016, now: start, frame_index: 3 });
        assert_eq!(view.now().frame_index, 3);
    }
}

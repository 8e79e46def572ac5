//! Time subsystem.
//!
//! Frame timing without coupling to any event loop:
//! - one `FrameClock` per scheduler
//! - `tick()` (or `tick_at` with an explicit instant) once per frame

mod frame_clock;

pub use frame_clock::{FrameClock, FrameTime};

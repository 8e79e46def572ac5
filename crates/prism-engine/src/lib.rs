//! Prism engine crate.
//!
//! This crate owns the native side of prism: the imperative scene graph that
//! declarative trees are projected onto, the GPU device backends that hold
//! the resources those objects own, and frame timing.

pub mod coords;
pub mod device;
pub mod graph;
pub mod logging;
pub mod time;

//! Prism Fiber: declarative element trees reconciled onto the `prism-engine`
//! scene graph.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use prism_fiber::prelude::*;
//!
//! let tree = element("mesh")
//!     .prop("position", [0.0, 1.3, 0.0])
//!     .child(element("box").prop("args", [1.0, 1.0, 1.0]))
//!     .child(element("program").prop("vertex", VS).prop("fragment", FS).prop("uniforms.uColor", [1.0, 0.0, 0.0]));
//!
//! prism_fiber::render(tree, "main", None)?;
//!
//! // In your event loop:
//! prism_fiber::registry().tick()?;
//! ```
//!
//! Rendering the same target again diffs the new tree against the committed
//! one and applies only the difference to the native graph.
//!
//! # Components
//!
//! Implement [`Component`] for any type, or pass a closure to
//! [`Node::render_fn`]:
//!
//! ```rust,ignore
//! use prism_fiber::prelude::*;
//!
//! let spinner = Node::render_fn(|scope| {
//!     let mesh = scope.use_ref();
//!     let target = mesh.clone();
//!     scope.use_frame(0, move |ctx| {
//!         if let Some(t) = target.get().and_then(|id| ctx.graph.transform_mut(id)) {
//!             t.rotation.y += ctx.time.delta;
//!         }
//!         Ok(())
//!     });
//!     Ok(element("mesh").node_ref(mesh).child(element("torus")).into())
//! });
//! ```

pub mod adapter;
pub mod config;
pub mod context;
pub mod element;
pub mod error;
pub mod hooks;
pub mod host;
pub mod kind;
pub mod loaders;
pub mod markup;
pub mod reconciler;
pub mod resource;
pub mod root;
pub mod scheduler;

// Top-level re-exports for the common entry points.
pub use error::{PrismError, RenderError};
pub use root::{RootHandle, RootRegistry, RootState, TargetId, create_root, registry, render, unmount};

/// Everything needed to build trees and components. Import this in your scene files.
pub mod prelude {
    pub use crate::config::{Backend, CameraConfig, Frameloop, RenderMode, RootConfig};
    pub use crate::context::{Environment, Viewport};
    pub use crate::element::{Component, HostElement, Node, NodeRef, Props, element};
    pub use crate::error::{PrismError, RenderError};
    pub use crate::hooks::{Scope, StateSetter};
    pub use crate::loaders::{BytesLoader, FnLoader, ImageLoader};
    pub use crate::markup::MarkupLoader;
    pub use crate::reconciler::CommitSummary;
    pub use crate::resource::{Loader, ResourceCache};
    pub use crate::root::{RootHandle, RootRegistry, RootState, TargetId, TickReport};
    pub use crate::scheduler::{FrameCtx, Subscription};

    // Re-export the engine primitives frame callbacks need.
    pub use prism_engine::graph::{NativeId, NativeObject, SceneGraph, Value};
    pub use prism_engine::time::FrameTime;
}

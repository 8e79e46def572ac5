use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;

use prism_engine::graph::NativeId;

use crate::context::Environment;
use crate::element::Props;
use crate::error::PrismError;

/// Operations the reconciler drives on the native side.
///
/// The reconciler calls the fallible methods during its render phase, before
/// anything visible changes, and the infallible ones during commit. When a
/// render phase fails, everything it produced is handed back through
/// [`HostConfig::discard_instance`] and [`HostConfig::discard_update`].
pub trait HostConfig {
    type Instance: Copy + Eq + Hash + Debug;
    type Payload;

    /// Creates a detached instance for `tag`.
    fn create_instance(&mut self, tag: &str, props: &Props, env: &Rc<Environment>) -> Result<Self::Instance, PrismError>;

    /// Called once the new instance's initial props are in place. Returning
    /// `true` schedules [`HostConfig::commit_mount`] after placement.
    fn finalize_initial_children(&mut self, instance: Self::Instance, props: &Props) -> bool;

    /// Diffs `old` against `new`. `Ok(None)` means nothing to do.
    fn prepare_update(
        &mut self,
        instance: Self::Instance,
        tag: &str,
        old: &Props,
        new: &Props,
        env: &Rc<Environment>,
    ) -> Result<Option<Self::Payload>, PrismError>;

    fn commit_update(&mut self, instance: Self::Instance, payload: Self::Payload);

    fn commit_mount(&mut self, instance: Self::Instance);

    fn append_child(&mut self, parent: Self::Instance, child: Self::Instance);

    /// Inserts before `before`; appends when `before` is not a child of `parent`.
    fn insert_before(&mut self, parent: Self::Instance, child: Self::Instance, before: Self::Instance);

    /// Detaches `child` and disposes its whole subtree.
    fn remove_child(&mut self, parent: Self::Instance, child: Self::Instance);

    /// Disposes an instance created by an abandoned render phase.
    fn discard_instance(&mut self, instance: Self::Instance);

    /// Releases a payload prepared by an abandoned render phase.
    fn discard_update(&mut self, payload: Self::Payload);

    /// The native object refs should point at.
    fn public_instance(&self, instance: Self::Instance) -> Option<NativeId>;
}

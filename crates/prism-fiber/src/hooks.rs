//! Component hooks.
//!
//! Hook state lives with the component's position in the tree and is matched
//! by call order, so a component must call the same hooks in the same order
//! on every render. Anything a render wants to change outside the component
//! (frame subscriptions, resource references) is staged and only applied
//! when the commit that rendered it goes through.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::context::Environment;
use crate::element::NodeRef;
use crate::error::{PrismError, RenderError};
use crate::resource::{Loader, Resolution, ResourceCache};
use crate::scheduler::{FrameCallback, FrameCtx, FrameScheduler, Subscription};

type CacheOp = Box<dyn FnOnce(&mut ResourceCache)>;

struct FrameSlot {
    priority: i32,
    callback: Option<Rc<RefCell<FrameCallback>>>,
    subscription: Option<Subscription>,
    pending: Option<(i32, FrameCallback)>,
}

struct ResourceChange {
    key: Box<dyn Any>,
    acquire: CacheOp,
    release: CacheOp,
}

struct ResourceSlot {
    key: Option<Box<dyn Any>>,
    release: Option<CacheOp>,
    pending: Option<ResourceChange>,
}

enum HookSlot {
    State(Rc<dyn Any>),
    Ref(NodeRef),
    Frame(FrameSlot),
    Resource(ResourceSlot),
}

impl HookSlot {
    fn name(&self) -> &'static str {
        match self {
            HookSlot::State(_) => "use_state",
            HookSlot::Ref(_) => "use_ref",
            HookSlot::Frame(_) => "use_frame",
            HookSlot::Resource(_) => "use_resource",
        }
    }
}

/// Where commits apply staged hook effects.
pub(crate) struct EffectCtx<'a> {
    pub scheduler: &'a FrameScheduler,
    pub cache: &'a mut ResourceCache,
}

/// Hook state of one mounted component.
#[derive(Default)]
pub(crate) struct Hooks {
    slots: RefCell<Vec<HookSlot>>,
    committed: Cell<usize>,
}

impl Hooks {
    pub(crate) fn new() -> Rc<Hooks> {
        Rc::new(Hooks::default())
    }

    /// Applies what the last render staged.
    pub(crate) fn commit(&self, ctx: &mut EffectCtx<'_>) {
        let mut slots = self.slots.borrow_mut();
        for slot in slots.iter_mut() {
            match slot {
                HookSlot::Frame(frame) => commit_frame(frame, ctx.scheduler),
                HookSlot::Resource(res) => {
                    if let Some(change) = res.pending.take() {
                        (change.acquire)(ctx.cache);
                        if let Some(release) = res.release.take() {
                            release(ctx.cache);
                        }
                        res.key = Some(change.key);
                        res.release = Some(change.release);
                    }
                }
                HookSlot::State(_) | HookSlot::Ref(_) => {}
            }
        }
        self.committed.set(slots.len());
    }

    /// Forgets what the last render staged.
    pub(crate) fn rollback(&self) {
        let mut slots = self.slots.borrow_mut();
        slots.truncate(self.committed.get());
        for slot in slots.iter_mut() {
            match slot {
                HookSlot::Frame(frame) => frame.pending = None,
                HookSlot::Resource(res) => res.pending = None,
                HookSlot::State(_) | HookSlot::Ref(_) => {}
            }
        }
    }

    /// Tears down subscriptions and resource references.
    pub(crate) fn unmount(&self, ctx: &mut EffectCtx<'_>) {
        for slot in self.slots.borrow_mut().drain(..) {
            match slot {
                HookSlot::Frame(frame) => {
                    if let Some(sub) = frame.subscription {
                        sub.unsubscribe();
                    }
                }
                HookSlot::Resource(res) => {
                    if let Some(release) = res.release {
                        release(ctx.cache);
                    }
                }
                HookSlot::State(_) | HookSlot::Ref(_) => {}
            }
        }
        self.committed.set(0);
    }
}

fn commit_frame(frame: &mut FrameSlot, scheduler: &FrameScheduler) {
    let Some((priority, callback)) = frame.pending.take() else { return };
    let callback = if priority == frame.priority && frame.subscription.is_some() {
        match frame.callback.as_ref().map(|cell| cell.try_borrow_mut()) {
            Some(Ok(mut current)) => {
                *current = callback;
                return;
            }
            // replaced from inside its own callback: subscribe a fresh cell
            _ => callback,
        }
    } else {
        callback
    };
    resubscribe(frame, scheduler, priority, callback);
}

fn resubscribe(frame: &mut FrameSlot, scheduler: &FrameScheduler, priority: i32, callback: FrameCallback) {
    if let Some(old) = frame.subscription.take() {
        old.unsubscribe();
    }
    let cell = Rc::new(RefCell::new(callback));
    frame.subscription = Some(scheduler.subscribe_shared(priority, cell.clone()));
    frame.callback = Some(cell);
    frame.priority = priority;
}

fn stage_resource<L: Loader>(key: &L::Key) -> ResourceChange {
    let (acquire_key, release_key) = (key.clone(), key.clone());
    ResourceChange {
        key: Box::new(key.clone()),
        acquire: Box::new(move |cache: &mut ResourceCache| cache.retain::<L>(&acquire_key)),
        release: Box::new(move |cache: &mut ResourceCache| cache.release::<L>(&release_key)),
    }
}

// ── StateSetter ───────────────────────────────────────────────────────────

/// Updates a `use_state` value and schedules a re-render of the root.
pub struct StateSetter<T> {
    cell: Rc<RefCell<T>>,
    dirty: Rc<Cell<bool>>,
}

impl<T> Clone for StateSetter<T> {
    fn clone(&self) -> Self {
        Self { cell: self.cell.clone(), dirty: self.dirty.clone() }
    }
}

impl<T> StateSetter<T> {
    pub fn set(&self, value: T) {
        *self.cell.borrow_mut() = value;
        self.dirty.set(true);
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.cell.borrow_mut());
        self.dirty.set(true);
    }
}

impl<T: Clone> StateSetter<T> {
    /// Current value, which may be newer than the one the last render saw.
    pub fn get(&self) -> T {
        self.cell.borrow().clone()
    }
}

impl<T> fmt::Debug for StateSetter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StateSetter")
    }
}

// ── Scope ─────────────────────────────────────────────────────────────────

/// Passed to [`crate::Component::render`]; the entry point for hooks.
pub struct Scope<'a> {
    env: &'a Rc<Environment>,
    hooks: &'a Hooks,
    cache: &'a mut ResourceCache,
    dirty: &'a Rc<Cell<bool>>,
    cursor: usize,
    error: Option<PrismError>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(
        env: &'a Rc<Environment>,
        hooks: &'a Hooks,
        cache: &'a mut ResourceCache,
        dirty: &'a Rc<Cell<bool>>,
    ) -> Self {
        Self { env, hooks, cache, dirty, cursor: 0, error: None }
    }

    /// Hook-order violation found during the render, if any.
    pub(crate) fn finish(self) -> Option<PrismError> {
        self.error
    }

    /// The root's environment as of this commit.
    pub fn environment(&self) -> Rc<Environment> {
        self.env.clone()
    }

    fn next_index(&mut self) -> usize {
        self.cursor += 1;
        self.cursor - 1
    }

    fn mismatch(&mut self, index: usize, found: &'static str, wanted: &'static str) {
        log::error!("hook {index} was {found} on the previous render, now {wanted}");
        if self.error.is_none() {
            self.error = Some(PrismError::HookOrder { index, expected: found });
        }
    }

    /// Stable handle for attaching to an element with `HostElement::node_ref`.
    pub fn use_ref(&mut self) -> NodeRef {
        let index = self.next_index();
        let hooks = self.hooks;
        let mut slots = hooks.slots.borrow_mut();
        if index == slots.len() {
            slots.push(HookSlot::Ref(NodeRef::new()));
        }
        let found = match &slots[index] {
            HookSlot::Ref(r) => return r.clone(),
            other => other.name(),
        };
        drop(slots);
        self.mismatch(index, found, "use_ref");
        NodeRef::new()
    }

    /// Local state. Setting it re-renders the root: on the next tick for
    /// concurrent roots, at the end of the current tick for blocking ones.
    pub fn use_state<T: Clone + 'static>(&mut self, init: impl FnOnce() -> T) -> (T, StateSetter<T>) {
        let index = self.next_index();
        let dirty = self.dirty.clone();
        let hooks = self.hooks;
        let mut slots = hooks.slots.borrow_mut();
        if index == slots.len() {
            let cell = Rc::new(RefCell::new(init()));
            slots.push(HookSlot::State(cell.clone()));
            let value = cell.borrow().clone();
            return (value, StateSetter { cell, dirty });
        }
        let found = match &slots[index] {
            HookSlot::State(any) => match any.clone().downcast::<RefCell<T>>() {
                Ok(cell) => {
                    let value = cell.borrow().clone();
                    return (value, StateSetter { cell, dirty });
                }
                Err(_) => "use_state of another type",
            },
            other => other.name(),
        };
        drop(slots);
        self.mismatch(index, found, "use_state");
        // detached so the render can finish before the commit is abandoned
        let value = init();
        (value.clone(), StateSetter { cell: Rc::new(RefCell::new(value)), dirty })
    }

    /// Runs `callback` once per tick in `priority` order. The callback from
    /// the latest committed render is the one that runs.
    pub fn use_frame(
        &mut self,
        priority: i32,
        callback: impl FnMut(&mut FrameCtx<'_>) -> anyhow::Result<()> + 'static,
    ) {
        let index = self.next_index();
        let hooks = self.hooks;
        let mut slots = hooks.slots.borrow_mut();
        if index == slots.len() {
            slots.push(HookSlot::Frame(FrameSlot { priority, callback: None, subscription: None, pending: None }));
        }
        let found = match &mut slots[index] {
            HookSlot::Frame(frame) => {
                frame.pending = Some((priority, Box::new(callback)));
                return;
            }
            other => other.name(),
        };
        drop(slots);
        self.mismatch(index, found, "use_frame");
    }

    /// Value of `key` from `loader`, memoized per root.
    ///
    /// Suspends the component (`Err(RenderError::Suspended)`) until the load
    /// settles; use `?` so the render stops there.
    pub fn use_resource<L: Loader>(&mut self, loader: &L, key: L::Key) -> Result<Rc<L::Output>, RenderError> {
        let index = self.next_index();
        let hooks = self.hooks;
        let mut slots = hooks.slots.borrow_mut();
        if index == slots.len() {
            slots.push(HookSlot::Resource(ResourceSlot { key: None, release: None, pending: None }));
        }
        let found = match &mut slots[index] {
            HookSlot::Resource(res) => {
                let same = res.key.as_ref().and_then(|k| k.downcast_ref::<L::Key>()) == Some(&key);
                res.pending = (!same).then(|| stage_resource::<L>(&key));
                None
            }
            other => Some(other.name()),
        };
        drop(slots);
        if let Some(found) = found {
            self.mismatch(index, found, "use_resource");
            return Err(RenderError::Suspended);
        }

        match self.cache.claim(loader, &key) {
            Resolution::Ready(value) => Ok(value),
            Resolution::Pending => Err(RenderError::Suspended),
            Resolution::Failed(err) => Err(RenderError::Failed(err)),
        }
    }

    /// Resolution state of a resource without subscribing to it.
    pub fn peek_resource<L: Loader>(&self, key: &L::Key) -> Option<Rc<L::Output>> {
        self.cache.get::<L>(key)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::context::test_env;

    #[derive(Clone)]
    struct Upper;

    impl Loader for Upper {
        type Key = String;
        type Output = String;

        fn load(&self, key: &String) -> anyhow::Result<String> {
            Ok(key.to_uppercase())
        }
    }

    struct Harness {
        env: Rc<Environment>,
        hooks: Rc<Hooks>,
        cache: ResourceCache,
        dirty: Rc<Cell<bool>>,
        scheduler: FrameScheduler,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                env: Rc::new(test_env()),
                hooks: Hooks::new(),
                cache: ResourceCache::new(),
                dirty: Rc::default(),
                scheduler: FrameScheduler::new(),
            }
        }

        fn render<R>(&mut self, f: impl FnOnce(&mut Scope<'_>) -> R) -> (R, Option<PrismError>) {
            let mut scope = Scope::new(&self.env, &self.hooks, &mut self.cache, &self.dirty);
            let out = f(&mut scope);
            (out, scope.finish())
        }

        fn commit(&mut self) {
            self.hooks.commit(&mut EffectCtx { scheduler: &self.scheduler, cache: &mut self.cache });
        }
    }

    #[test]
    fn state_survives_renders_and_marks_the_root_dirty() {
        let mut h = Harness::new();
        let ((value, setter), err) = h.render(|s| s.use_state(|| 1));
        assert_eq!(value, 1);
        assert!(err.is_none());
        h.commit();

        setter.set(5);
        assert!(h.dirty.get());
        let ((value, _), _) = h.render(|s| s.use_state(|| 1));
        assert_eq!(value, 5);
    }

    #[test]
    fn refs_are_stable_across_renders() {
        let mut h = Harness::new();
        let (first, _) = h.render(|s| s.use_ref());
        h.commit();
        let (second, _) = h.render(|s| s.use_ref());
        assert!(first.ptr_eq(&second));
    }

    #[test]
    fn changing_hook_order_is_reported() {
        let mut h = Harness::new();
        h.render(|s| {
            s.use_state(|| 0u8);
            s.use_ref();
        });
        h.commit();

        let (_, err) = h.render(|s| {
            s.use_ref();
            s.use_state(|| 0u8);
        });
        assert!(matches!(err, Some(PrismError::HookOrder { index: 0, expected: "use_state" })));
    }

    #[test]
    fn frame_callbacks_subscribe_on_commit_only() {
        let mut h = Harness::new();
        h.render(|s| s.use_frame(0, |_| Ok(())));
        assert!(h.scheduler.is_empty());
        h.hooks.rollback();
        h.commit();
        assert!(h.scheduler.is_empty());

        h.render(|s| s.use_frame(0, |_| Ok(())));
        h.commit();
        assert_eq!(h.scheduler.len(), 1);

        // same priority swaps the callback in place; a new one resubscribes
        h.render(|s| s.use_frame(0, |_| Ok(())));
        h.commit();
        assert_eq!(h.scheduler.len(), 1);
        h.render(|s| s.use_frame(3, |_| Ok(())));
        h.commit();
        assert_eq!(h.scheduler.len(), 1);

        h.hooks.unmount(&mut EffectCtx { scheduler: &h.scheduler, cache: &mut h.cache });
        assert!(h.scheduler.is_empty());
    }

    #[test]
    fn resources_suspend_then_hold_a_reference() {
        let mut h = Harness::new();
        let key = "hull".to_string();
        let (first, _) = h.render(|s| s.use_resource(&Upper, key.clone()));
        assert!(matches!(first, Err(RenderError::Suspended)));
        h.hooks.rollback();
        assert!(h.cache.wait_settled(Duration::from_secs(5)));

        let (second, _) = h.render(|s| s.use_resource(&Upper, key.clone()));
        assert_eq!(*second.unwrap(), "HULL");
        assert_eq!(h.cache.refcount::<Upper>(&key), 0);
        h.commit();
        assert_eq!(h.cache.refcount::<Upper>(&key), 1);

        h.hooks.unmount(&mut EffectCtx { scheduler: &h.scheduler, cache: &mut h.cache });
        assert!(h.cache.peek::<Upper>(&key).is_none());
    }
}

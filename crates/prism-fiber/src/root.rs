//! Render targets and their roots.
//!
//! A [`RootRegistry`] maps each [`TargetId`] to an independent root: its own
//! device, native graph, frame loop, resource cache and committed tree. Roots
//! share nothing but the map. The free functions [`render`], [`unmount`] and
//! [`create_root`] go through a thread-local default registry.
//!
//! ```rust,ignore
//! let tree = element("mesh")
//!     .child(element("box"))
//!     .child(element("program").prop("vertex", VS).prop("fragment", FS));
//! prism_fiber::render(tree, "main", None)?;
//!
//! // once per frame, from the event loop
//! prism_fiber::registry().tick()?;
//! ```

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use prism_engine::device::{Device, DeviceError, DeviceStats, HeadlessDevice, ResourcePool, WgpuDevice};
use prism_engine::graph::{DrawCall, GraphStats, NativeObject, SceneGraph};
use winit::window::WindowId;

use crate::adapter::{InstanceId, SceneHost, scene_root};
use crate::config::{Backend, Frameloop, RenderMode, RootConfig};
use crate::context::{Clock, Environment, Viewport};
use crate::element::Node;
use crate::error::PrismError;
use crate::hooks::EffectCtx;
use crate::reconciler::{CommitSummary, Reconciler, RenderCtx};
use crate::resource::ResourceCache;
use crate::scheduler::FrameScheduler;

// ── TargetId ──────────────────────────────────────────────────────────────

/// Names the surface a root renders into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetId {
    Id(u64),
    Name(String),
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetId::Id(id) => write!(f, "#{id}"),
            TargetId::Name(name) => f.write_str(name),
        }
    }
}

impl From<u64> for TargetId {
    fn from(id: u64) -> Self {
        TargetId::Id(id)
    }
}

impl From<&str> for TargetId {
    fn from(name: &str) -> Self {
        TargetId::Name(name.to_string())
    }
}

impl From<String> for TargetId {
    fn from(name: String) -> Self {
        TargetId::Name(name)
    }
}

impl From<WindowId> for TargetId {
    fn from(id: WindowId) -> Self {
        TargetId::Id(u64::from(id))
    }
}

// ── Reports ───────────────────────────────────────────────────────────────

/// Snapshot of one root.
#[derive(Debug, Clone, PartialEq)]
pub struct RootState {
    pub target: TargetId,
    pub mode: RenderMode,
    pub frameloop: Frameloop,
    pub viewport: Viewport,
    /// Mounted host instances, the scene container excluded.
    pub instances: usize,
    /// Objects in the native graph, scene root and camera included.
    pub native_objects: usize,
    pub subscriptions: usize,
    /// A concurrent `render` is waiting for the next tick or flush.
    pub pending: bool,
    pub commits: u64,
    pub last_commit: CommitSummary,
    pub graph: GraphStats,
    pub device: DeviceStats,
}

/// What one [`RootRegistry::tick`] did across all roots.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub roots: usize,
    /// Frame callbacks run.
    pub callbacks: usize,
    pub commits: usize,
    /// Errors handed to the error reporter.
    pub errors: usize,
}

/// Borrowed view of a root, for [`RootRegistry::with_root`].
pub struct RootView<'a> {
    pub target: &'a TargetId,
    pub config: &'a RootConfig,
    pub env: &'a Rc<Environment>,
    pub host: &'a SceneHost,
    pub container: InstanceId,
    pub scheduler: &'a FrameScheduler,
    pub cache: &'a mut ResourceCache,
}

impl RootView<'_> {
    /// Draw calls of the scene as seen by the root's camera.
    pub fn draw_list(&self) -> Vec<DrawCall> {
        self.env.graph.borrow().draw_list(self.env.scene, Some(self.env.camera))
    }
}

// ── Root ──────────────────────────────────────────────────────────────────

struct Root {
    target: TargetId,
    config: RootConfig,
    env: Rc<Environment>,
    host: SceneHost,
    container: InstanceId,
    reconciler: Reconciler<SceneHost>,
    scheduler: FrameScheduler,
    cache: ResourceCache,
    /// Last tree that committed; re-rendered when hook state changes.
    element: Option<Node>,
    /// Tree queued by a concurrent `render`.
    pending: Option<Node>,
    dirty: Rc<Cell<bool>>,
    /// Lets a `Demand` frame loop run on the next tick.
    invalidated: bool,
    commits: u64,
    last_commit: CommitSummary,
}

impl Root {
    fn new(target: TargetId, config: RootConfig, device: Rc<dyn Device>) -> Result<Self, PrismError> {
        let viewport = config.viewport();
        let mut graph = SceneGraph::new(ResourcePool::new(device.clone()));
        let scene = graph.insert(scene_root())?;
        let camera = graph.insert(NativeObject::Camera(config.camera().build(viewport.aspect())?))?;
        let graph = Rc::new(RefCell::new(graph));

        let start = Instant::now();
        let env = Rc::new(Environment {
            device,
            graph: graph.clone(),
            scene,
            camera,
            viewport,
            clock: Clock::starting_at(start),
            clear_color: config.clear_color(),
        });
        let mut host = SceneHost::new(graph);
        let container = host.create_container(scene);
        log::debug!(
            "root {target}: created on {} device, {}x{} @{}",
            env.device.label(),
            viewport.width,
            viewport.height,
            viewport.dpr
        );

        Ok(Self {
            target,
            config,
            env,
            host,
            container,
            reconciler: Reconciler::new(container),
            scheduler: FrameScheduler::starting_at(start),
            cache: ResourceCache::new(),
            element: None,
            pending: None,
            dirty: Rc::default(),
            invalidated: true,
            commits: 0,
            last_commit: CommitSummary::default(),
        })
    }

    fn commit(&mut self, node: Node) -> Result<CommitSummary, PrismError> {
        self.dirty.set(false);
        let mut ctx = RenderCtx { env: &self.env, cache: &mut self.cache, scheduler: &self.scheduler, dirty: &self.dirty };
        let summary = self.reconciler.render(&mut self.host, node.clone(), &mut ctx)?;
        self.element = Some(node);
        self.commits += 1;
        self.last_commit = summary;
        if !summary.is_noop() {
            self.invalidated = true;
        }
        Ok(summary)
    }

    /// Commits the queued tree, or re-renders the current one when hook
    /// state or a resource settlement asked for it.
    fn flush(&mut self) -> Result<Option<CommitSummary>, PrismError> {
        if let Some(node) = self.pending.take() {
            return self.commit(node).map(Some);
        }
        if !self.dirty.get() {
            return Ok(None);
        }
        match self.element.clone() {
            Some(node) => self.commit(node).map(Some),
            None => {
                self.dirty.set(false);
                Ok(None)
            }
        }
    }

    fn tick(&mut self, now: Instant, report: &mut TickReport) -> Vec<PrismError> {
        let mut errors = Vec::new();
        if self.cache.poll_settled() > 0 {
            self.dirty.set(true);
        }
        self.flush_into(report, &mut errors);

        let Some(time) = self.scheduler.advance(now) else {
            return errors;
        };
        self.env.clock.set(time);
        let run = match self.config.frameloop() {
            Frameloop::Always => true,
            Frameloop::Demand => std::mem::take(&mut self.invalidated),
            Frameloop::Never => false,
        };
        if run {
            match self.env.graph.try_borrow_mut() {
                Ok(mut graph) => {
                    let outcome = self.scheduler.run(time, &mut graph, &self.env);
                    report.callbacks += outcome.ran;
                    errors.extend(outcome.errors);
                }
                Err(_) => errors.push(PrismError::Busy),
            }
        }

        // concurrent roots pick this up at the start of the next tick
        if self.config.mode() == RenderMode::Blocking && self.dirty.get() {
            self.flush_into(report, &mut errors);
        }
        errors
    }

    fn flush_into(&mut self, report: &mut TickReport, errors: &mut Vec<PrismError>) {
        match self.flush() {
            Ok(Some(_)) => report.commits += 1,
            Ok(None) => {}
            Err(err) => errors.push(err),
        }
    }

    /// Merges `update` into the config and rebuilds the environment.
    fn reconfigure(&mut self, update: RootConfig) -> Result<(), PrismError> {
        let mut next = self.config.clone();
        next.merge(update);
        if next == self.config {
            return Ok(());
        }
        next.validate()?;
        if next.backend() != self.config.backend()
            || next.power_preference != self.config.power_preference
            || next.label != self.config.label
        {
            log::warn!("root {}: device options only apply when the root is created", self.target);
        }

        let viewport = next.viewport();
        {
            let mut graph = self.env.graph.try_borrow_mut().map_err(|_| PrismError::Busy)?;
            if next.camera != self.config.camera {
                let camera = next.camera().build(viewport.aspect())?;
                graph.replace_object(self.env.camera, NativeObject::Camera(camera))?;
            } else if viewport.aspect() != self.env.viewport.aspect() {
                let aspect = viewport.aspect();
                graph.update(self.env.camera, |object| {
                    if let NativeObject::Camera(camera) = object {
                        camera.aspect = aspect;
                    }
                })?;
            }
        }

        self.env = Rc::new(Environment { viewport, clear_color: next.clear_color(), ..(*self.env).clone() });
        self.config = next;
        self.dirty.set(true);
        self.invalidated = true;
        log::debug!("root {}: reconfigured", self.target);
        Ok(())
    }

    fn wait_settled(&mut self, timeout: Duration) -> bool {
        let settled = self.cache.wait_settled(timeout);
        if settled {
            self.dirty.set(true);
        }
        settled
    }

    fn view(&mut self) -> RootView<'_> {
        RootView {
            target: &self.target,
            config: &self.config,
            env: &self.env,
            host: &self.host,
            container: self.container,
            scheduler: &self.scheduler,
            cache: &mut self.cache,
        }
    }

    fn state(&self) -> RootState {
        let graph = self.env.graph.borrow();
        RootState {
            target: self.target.clone(),
            mode: self.config.mode(),
            frameloop: self.config.frameloop(),
            viewport: self.env.viewport,
            instances: self.host.len().saturating_sub(1),
            native_objects: graph.len(),
            subscriptions: self.scheduler.len(),
            pending: self.pending.is_some(),
            commits: self.commits,
            last_commit: self.last_commit,
            graph: graph.stats(),
            device: self.env.device.stats(),
        }
    }

    /// Unmounts the tree bottom-up, then releases the scene root and camera.
    fn teardown(mut self) {
        let mut effects = EffectCtx { scheduler: &self.scheduler, cache: &mut self.cache };
        self.reconciler.unmount(&mut self.host, &mut effects);
        let released = self.host.dispose_container(self.container);
        match self.env.graph.try_borrow_mut() {
            Ok(mut graph) => {
                graph.dispose(self.env.camera);
            }
            Err(_) => log::warn!("root {}: graph borrowed during unmount; camera leaked", self.target),
        }
        self.scheduler.stop();
        self.cache.clear();
        log::debug!("root {}: unmounted, {released} native objects released", self.target);
    }
}

// ── RootRegistry ──────────────────────────────────────────────────────────

pub type ErrorReporter = Box<dyn FnMut(&TargetId, &PrismError)>;
pub type DeviceFactory = Box<dyn Fn(&RootConfig) -> Result<Rc<dyn Device>, PrismError>>;

struct Registry {
    roots: BTreeMap<TargetId, Root>,
    reporter: ErrorReporter,
    device_factory: DeviceFactory,
}

impl Registry {
    fn ensure(&mut self, target: TargetId, config: Option<RootConfig>) -> Result<&mut Root, PrismError> {
        match self.roots.entry(target) {
            Entry::Occupied(entry) => {
                let root = entry.into_mut();
                if let Some(config) = config {
                    root.reconfigure(config)?;
                }
                Ok(root)
            }
            Entry::Vacant(entry) => {
                let mut merged = RootConfig::default();
                if let Some(config) = config {
                    merged.merge(config);
                }
                merged.validate()?;
                let device = (self.device_factory)(&merged)?;
                let root = Root::new(entry.key().clone(), merged, device)?;
                Ok(entry.insert(root))
            }
        }
    }

    fn render(&mut self, node: Node, target: TargetId, config: Option<RootConfig>) -> Result<RootState, PrismError> {
        let root = self.ensure(target, config)?;
        match root.config.mode() {
            RenderMode::Blocking => {
                root.pending = None;
                root.commit(node)?;
            }
            RenderMode::Concurrent => root.pending = Some(node),
        }
        Ok(root.state())
    }

    fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        for (target, root) in self.roots.iter_mut() {
            report.roots += 1;
            for err in root.tick(now, &mut report) {
                report.errors += 1;
                (self.reporter)(target, &err);
            }
        }
        report
    }
}

fn default_device(config: &RootConfig) -> Result<Rc<dyn Device>, PrismError> {
    match config.backend() {
        Backend::Headless => Ok(Rc::new(HeadlessDevice::new())),
        Backend::Wgpu => {
            let device = WgpuDevice::new_blocking(config.gpu_init())
                .map_err(|e| PrismError::Device(DeviceError::Backend(format!("{e:#}"))))?;
            Ok(Rc::new(device))
        }
    }
}

/// Target → root map. Clones share the same roots.
///
/// Every method borrows the registry for its whole duration; calling back
/// into it from a frame callback or the error reporter fails with
/// [`PrismError::Busy`].
#[derive(Clone)]
pub struct RootRegistry {
    inner: Rc<RefCell<Registry>>,
}

impl RootRegistry {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Registry {
                roots: BTreeMap::new(),
                reporter: Box::new(|target, err| log::error!("root {target}: {err}")),
                device_factory: Box::new(default_device),
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> Result<R, PrismError> {
        let mut registry = self.inner.try_borrow_mut().map_err(|_| PrismError::Busy)?;
        Ok(f(&mut registry))
    }

    /// Renders `tree` into `target`, creating the root on first use.
    ///
    /// `config` is shallow-merged into the root's config. A blocking root
    /// commits before returning and a failed commit leaves the previous tree
    /// in place; a concurrent root queues the tree for the next tick.
    pub fn render(
        &self,
        tree: impl Into<Node>,
        target: impl Into<TargetId>,
        config: Option<RootConfig>,
    ) -> Result<RootState, PrismError> {
        let (tree, target) = (tree.into(), target.into());
        self.with(|registry| registry.render(tree, target, config))?
    }

    /// Tears down the root of `target`. Returns `false` if there was none.
    pub fn unmount(&self, target: impl Into<TargetId>) -> Result<bool, PrismError> {
        let target = target.into();
        match self.with(|registry| registry.roots.remove(&target))? {
            Some(root) => {
                root.teardown();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Creates (or reconfigures) the root of `target` without rendering.
    pub fn create_root(&self, target: impl Into<TargetId>, config: Option<RootConfig>) -> Result<RootHandle, PrismError> {
        let target = target.into();
        self.with(|registry| registry.ensure(target.clone(), config).map(drop))??;
        Ok(RootHandle { registry: self.clone(), target })
    }

    pub fn tick(&self) -> Result<TickReport, PrismError> {
        self.tick_at(Instant::now())
    }

    /// Ticks every root: applies resource settlements, commits queued work,
    /// runs frame callbacks, then commits what the callbacks queued on
    /// blocking roots. Errors go to the error reporter.
    pub fn tick_at(&self, now: Instant) -> Result<TickReport, PrismError> {
        self.with(|registry| registry.tick(now))
    }

    /// Commits pending work of `target` now.
    pub fn flush(&self, target: impl Into<TargetId>) -> Result<Option<CommitSummary>, PrismError> {
        let target = target.into();
        self.with(|registry| registry.roots.get_mut(&target).map_or(Ok(None), Root::flush))?
    }

    /// Changes the logical size of `target`. The camera follows at once;
    /// components see the new viewport from the next commit.
    pub fn resize(&self, target: impl Into<TargetId>, width: f32, height: f32) -> Result<bool, PrismError> {
        let target = target.into();
        self.with(|registry| match registry.roots.get_mut(&target) {
            Some(root) => root.reconfigure(RootConfig::new().with_size(width, height)).map(|()| true),
            None => Ok(false),
        })?
    }

    /// Requests a frame on a `Demand` frame loop.
    pub fn invalidate(&self, target: impl Into<TargetId>) -> Result<bool, PrismError> {
        let target = target.into();
        self.with(|registry| registry.roots.get_mut(&target).map(|root| root.invalidated = true).is_some())
    }

    pub fn with_root<R>(&self, target: impl Into<TargetId>, f: impl FnOnce(RootView<'_>) -> R) -> Result<Option<R>, PrismError> {
        let target = target.into();
        self.with(|registry| registry.roots.get_mut(&target).map(|root| f(root.view())))
    }

    pub fn state(&self, target: impl Into<TargetId>) -> Result<Option<RootState>, PrismError> {
        let target = target.into();
        self.with(|registry| registry.roots.get(&target).map(Root::state))
    }

    /// Blocks until a resource load of `target` settles or `timeout` passes.
    /// Settled values are committed on the next tick or flush.
    pub fn wait_settled(&self, target: impl Into<TargetId>, timeout: Duration) -> Result<bool, PrismError> {
        let target = target.into();
        self.with(|registry| registry.roots.get_mut(&target).is_some_and(|root| root.wait_settled(timeout)))
    }

    pub fn targets(&self) -> Result<Vec<TargetId>, PrismError> {
        self.with(|registry| registry.roots.keys().cloned().collect())
    }

    /// Whether any root still runs its frame loop.
    pub fn is_running(&self) -> bool {
        match self.inner.try_borrow() {
            Ok(registry) => registry.roots.values().any(|root| root.scheduler.is_running()),
            // mid-tick
            Err(_) => true,
        }
    }

    /// Replaces the sink for tick errors. The default logs them.
    pub fn set_error_reporter(&self, reporter: impl FnMut(&TargetId, &PrismError) + 'static) -> Result<(), PrismError> {
        self.with(|registry| registry.reporter = Box::new(reporter))
    }

    /// Replaces how new roots get their device. Existing roots keep theirs.
    pub fn set_device_factory(
        &self,
        factory: impl Fn(&RootConfig) -> Result<Rc<dyn Device>, PrismError> + 'static,
    ) -> Result<(), PrismError> {
        self.with(|registry| registry.device_factory = Box::new(factory))
    }
}

impl Default for RootRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── RootHandle ────────────────────────────────────────────────────────────

/// One target of a registry, from [`RootRegistry::create_root`].
#[derive(Clone)]
pub struct RootHandle {
    registry: RootRegistry,
    target: TargetId,
}

impl RootHandle {
    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn render(&self, tree: impl Into<Node>) -> Result<RootState, PrismError> {
        self.registry.render(tree, self.target.clone(), None)
    }

    pub fn unmount(&self) -> Result<bool, PrismError> {
        self.registry.unmount(self.target.clone())
    }

    pub fn state(&self) -> Result<Option<RootState>, PrismError> {
        self.registry.state(self.target.clone())
    }

    pub fn flush(&self) -> Result<Option<CommitSummary>, PrismError> {
        self.registry.flush(self.target.clone())
    }

    pub fn resize(&self, width: f32, height: f32) -> Result<bool, PrismError> {
        self.registry.resize(self.target.clone(), width, height)
    }

    pub fn invalidate(&self) -> Result<bool, PrismError> {
        self.registry.invalidate(self.target.clone())
    }

    pub fn wait_settled(&self, timeout: Duration) -> Result<bool, PrismError> {
        self.registry.wait_settled(self.target.clone(), timeout)
    }

    pub fn with<R>(&self, f: impl FnOnce(RootView<'_>) -> R) -> Result<Option<R>, PrismError> {
        self.registry.with_root(self.target.clone(), f)
    }
}

impl fmt::Debug for RootHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RootHandle").field(&self.target).finish()
    }
}

// ── Default registry ──────────────────────────────────────────────────────

thread_local! {
    static DEFAULT_REGISTRY: RootRegistry = RootRegistry::new();
}

/// This thread's default registry.
pub fn registry() -> RootRegistry {
    DEFAULT_REGISTRY.with(RootRegistry::clone)
}

/// [`RootRegistry::render`] on the default registry.
pub fn render(tree: impl Into<Node>, target: impl Into<TargetId>, config: Option<RootConfig>) -> Result<RootState, PrismError> {
    registry().render(tree, target, config)
}

/// [`RootRegistry::unmount`] on the default registry.
pub fn unmount(target: impl Into<TargetId>) -> Result<bool, PrismError> {
    registry().unmount(target)
}

/// [`RootRegistry::create_root`] on the default registry.
pub fn create_root(target: impl Into<TargetId>, config: Option<RootConfig>) -> Result<RootHandle, PrismError> {
    registry().create_root(target, config)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    use prism_engine::graph::{NativeId, Uniform};
    use prism_engine::logging::{LoggingConfig, init_logging};

    use super::*;
    use crate::element::{NodeRef, element};
    use crate::resource::Loader;

    const VS: &str = "void main() {}";
    const FS: &str = "void main() { gl_FragColor = vec4(1.0); }";

    fn registry_for_test() -> RootRegistry {
        init_logging(LoggingConfig::for_tests());
        RootRegistry::new()
    }

    fn ship(color: [f32; 3]) -> Node {
        element("group")
            .child(
                element("mesh")
                    .key("ship")
                    .child(element("box").prop("args", [1.0, 1.0, 1.0]))
                    .child(element("program").prop("vertex", VS).prop("fragment", FS).prop("uniforms.uColor", color)),
            )
            .into()
    }

    fn scene_children(registry: &RootRegistry, target: &str) -> Vec<NativeId> {
        registry.with_root(target, |root| root.env.graph.borrow().children(root.env.scene).to_vec()).unwrap().unwrap()
    }

    fn first_mesh(registry: &RootRegistry, target: &str) -> NativeId {
        let group = scene_children(registry, target)[0];
        registry.with_root(target, |root| root.env.graph.borrow().children(group)[0]).unwrap().unwrap()
    }

    fn position_x(registry: &RootRegistry, target: &str, id: NativeId) -> f32 {
        registry
            .with_root(target, |root| {
                root.env.graph.borrow().object(id).and_then(NativeObject::transform).map(|t| t.position.x)
            })
            .unwrap()
            .flatten()
            .unwrap()
    }

    #[derive(Clone)]
    struct Counting(Arc<AtomicUsize>);

    impl Loader for Counting {
        type Key = String;
        type Output = String;

        fn load(&self, key: &String) -> anyhow::Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(key.to_uppercase())
        }
    }

    #[test]
    fn rendering_the_same_tree_twice_mutates_nothing() {
        let registry = registry_for_test();
        let first = registry.render(ship([1.0, 0.0, 0.0]), "main", None).unwrap();
        assert_eq!(first.instances, 4);
        assert_eq!(first.native_objects, 6);

        let second = registry.render(ship([1.0, 0.0, 0.0]), "main", None).unwrap();
        assert!(second.last_commit.is_noop());
        assert_eq!(second.graph, first.graph);
        assert_eq!(second.device, first.device);
        assert_eq!(second.commits, 2);
    }

    #[test]
    fn native_graph_follows_the_latest_tree() {
        let registry = registry_for_test();
        let row = |keys: &[&str]| -> Node {
            element("group")
                .children(keys.iter().map(|&k| {
                    let x = "abcd".find(k).unwrap() as f32;
                    element("transform").key(k).prop("position.x", x)
                }))
                .into()
        };

        registry.render(row(&["a", "b", "c"]), "main", None).unwrap();
        registry.render(row(&["c", "a", "d"]), "main", None).unwrap();
        let state = registry.render(row(&["d", "c"]), "main", None).unwrap();

        assert_eq!(state.instances, 3);
        assert_eq!(state.native_objects, 5);
        let group = scene_children(&registry, "main")[0];
        let children = registry.with_root("main", |root| root.env.graph.borrow().children(group).to_vec()).unwrap().unwrap();
        let xs: Vec<f32> = children.iter().map(|&id| position_x(&registry, "main", id)).collect();
        assert_eq!(xs, [3.0, 2.0]);
    }

    #[test]
    fn the_latest_geometry_claimant_holds_the_slot() {
        let registry = registry_for_test();
        let (first, second) = (NodeRef::new(), NodeRef::new());
        let tree = element("mesh")
            .child(element("box").node_ref(first.clone()))
            .child(element("sphere").node_ref(second.clone()))
            .child(element("program").prop("vertex", VS).prop("fragment", FS));
        registry.render(tree, "main", None).unwrap();

        let mesh = scene_children(&registry, "main")[0];
        let (geometry, draws) = registry
            .with_root("main", |root| {
                let geometry = match root.env.graph.borrow().object(mesh) {
                    Some(NativeObject::Mesh(m)) => m.geometry,
                    other => panic!("expected a mesh, got {other:?}"),
                };
                (geometry, root.draw_list())
            })
            .unwrap()
            .unwrap();
        assert_eq!(geometry, second.get());
        assert_ne!(geometry, first.get());
        assert_eq!(draws.len(), 1);
        assert_eq!(Some(draws[0].geometry), second.get());
    }

    #[test]
    fn concurrent_resolves_of_one_key_load_once() {
        let registry = registry_for_test();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen: Rc<RefCell<Vec<Rc<String>>>> = Rc::default();
        let reader = |loader: Counting, seen: Rc<RefCell<Vec<Rc<String>>>>| {
            Node::render_fn(move |scope| {
                let value = scope.use_resource(&loader, "hull".to_string())?;
                seen.borrow_mut().push(value);
                Ok(element("transform").into())
            })
        };
        let tree = element("group")
            .child(reader(Counting(calls.clone()), seen.clone()))
            .child(reader(Counting(calls.clone()), seen.clone()));

        let state = registry.render(tree, "main", None).unwrap();
        assert_eq!(state.last_commit.suspended, 2);
        assert_eq!(state.instances, 1);

        assert!(registry.wait_settled("main", Duration::from_secs(5)).unwrap());
        let report = registry.tick().unwrap();
        assert_eq!(report.commits, 1);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(*seen[0], "HULL");
        assert!(Rc::ptr_eq(&seen[0], &seen[1]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.with_root("main", |root| root.cache.loads_started()).unwrap(), Some(1));
        assert_eq!(registry.state("main").unwrap().unwrap().instances, 3);
    }

    /// Sleeps before answering, so a load is still in flight while the test
    /// renders again.
    #[derive(Clone)]
    struct Slow;

    impl Loader for Slow {
        type Key = String;
        type Output = String;

        fn load(&self, key: &String) -> anyhow::Result<String> {
            thread::sleep(Duration::from_millis(150));
            Ok(key.clone())
        }
    }

    /// Rejects keys starting with `bad` until it is made healthy.
    #[derive(Clone, Default)]
    struct Flaky {
        healthy: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    impl Loader for Flaky {
        type Key = String;
        type Output = String;

        fn load(&self, key: &String) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if key.starts_with("bad") && !self.healthy.load(Ordering::SeqCst) {
                anyhow::bail!("cannot decode {key}");
            }
            Ok(key.to_uppercase())
        }
    }

    fn reading<L: Loader<Key = String>>(loader: L, key: &str) -> Node {
        let key = key.to_string();
        Node::render_fn(move |scope| {
            scope.use_resource(&loader, key.clone())?;
            Ok(element("transform").into())
        })
    }

    fn cache_len(registry: &RootRegistry) -> usize {
        registry.with_root("main", |root| root.cache.len()).unwrap().unwrap()
    }

    #[test]
    fn loads_nobody_committed_with_are_dropped() {
        let registry = registry_for_test();
        assert_eq!(registry.render(reading(Slow, "a"), "main", None).unwrap().last_commit.suspended, 1);
        assert_eq!(registry.render(reading(Slow, "b"), "main", None).unwrap().last_commit.suspended, 1);
        assert_eq!(cache_len(&registry), 1);

        let state = registry.render(Node::Empty, "main", None).unwrap();
        assert_eq!(state.instances, 0);
        assert_eq!(cache_len(&registry), 0);

        // both loads finish after their entries are gone
        thread::sleep(Duration::from_millis(400));
        for _ in 0..2 {
            assert_eq!(registry.tick().unwrap().commits, 0);
        }
        assert_eq!(cache_len(&registry), 0);
        assert_eq!(registry.with_root("main", |root| root.cache.refcount::<Slow>(&"a".to_string())).unwrap(), Some(0));
    }

    #[test]
    fn changing_the_resource_key_releases_the_old_entry() {
        let registry = registry_for_test();
        let loader = Counting(Arc::default());
        let (hull, sail) = ("hull".to_string(), "sail".to_string());

        registry.render(reading(loader.clone(), "hull"), "main", None).unwrap();
        assert!(registry.wait_settled("main", Duration::from_secs(5)).unwrap());
        assert_eq!(registry.tick().unwrap().commits, 1);
        assert_eq!(registry.with_root("main", |root| root.cache.refcount::<Counting>(&hull)).unwrap(), Some(1));

        // the old value stays committed while the new key loads
        let state = registry.render(reading(loader.clone(), "sail"), "main", None).unwrap();
        assert_eq!(state.last_commit.suspended, 1);
        assert_eq!(state.instances, 1);
        assert_eq!(registry.with_root("main", |root| root.cache.refcount::<Counting>(&hull)).unwrap(), Some(1));

        assert!(registry.wait_settled("main", Duration::from_secs(5)).unwrap());
        assert_eq!(registry.tick().unwrap().commits, 1);
        let (sail_refs, hull_state) = registry
            .with_root("main", |root| (root.cache.refcount::<Counting>(&sail), root.cache.peek::<Counting>(&hull)))
            .unwrap()
            .unwrap();
        assert_eq!(sail_refs, 1);
        assert_eq!(hull_state, None);
        assert_eq!(cache_len(&registry), 1);
    }

    #[test]
    fn rejected_resources_fail_the_commit_until_the_key_changes() {
        let registry = registry_for_test();
        let reported: Rc<RefCell<Vec<String>>> = Rc::default();
        let sink = reported.clone();
        registry
            .set_error_reporter(move |_, err| {
                assert!(matches!(err, PrismError::ResourceLoad { .. }), "{err}");
                sink.borrow_mut().push(err.to_string());
            })
            .unwrap();
        let loader = Flaky::default();

        registry.render(reading(loader.clone(), "bad-hull"), "main", None).unwrap();
        assert!(registry.wait_settled("main", Duration::from_secs(5)).unwrap());
        let report = registry.tick().unwrap();
        assert_eq!((report.errors, report.commits), (1, 0));
        assert!(reported.borrow()[0].contains("bad-hull"), "{}", reported.borrow()[0]);

        for _ in 0..2 {
            match registry.render(reading(loader.clone(), "bad-hull"), "main", None) {
                Err(PrismError::ResourceLoad { key, message }) => {
                    assert!(key.contains("bad-hull"));
                    assert!(message.contains("cannot decode"));
                }
                other => panic!("expected a rejection, got {other:?}"),
            }
        }
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.state("main").unwrap().unwrap().instances, 0);

        registry.render(reading(loader.clone(), "hull"), "main", None).unwrap();
        let bad = registry.with_root("main", |root| root.cache.peek::<Flaky>(&"bad-hull".to_string())).unwrap();
        assert_eq!(bad, Some(None));
        assert!(registry.wait_settled("main", Duration::from_secs(5)).unwrap());
        let report = registry.tick().unwrap();
        assert_eq!((report.errors, report.commits), (0, 1));
        assert_eq!(registry.state("main").unwrap().unwrap().instances, 1);
        assert_eq!(reported.borrow().len(), 1);
    }

    #[test]
    fn rejected_resources_recover_after_a_retry() {
        let registry = registry_for_test();
        let loader = Flaky::default();
        let key = "bad-hull".to_string();

        registry.render(reading(loader.clone(), &key), "main", None).unwrap();
        assert!(registry.wait_settled("main", Duration::from_secs(5)).unwrap());
        assert_eq!(registry.tick().unwrap().errors, 1);

        loader.healthy.store(true, Ordering::SeqCst);
        assert_eq!(registry.with_root("main", |root| root.cache.retry(&loader, &key)).unwrap(), Some(true));
        assert!(registry.wait_settled("main", Duration::from_secs(5)).unwrap());
        let report = registry.tick().unwrap();
        assert_eq!((report.errors, report.commits), (0, 1));
        assert_eq!(registry.state("main").unwrap().unwrap().instances, 1);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.with_root("main", |root| root.cache.refcount::<Flaky>(&key)).unwrap(), Some(1));
    }

    #[test]
    fn frame_callbacks_run_in_priority_order_every_tick() {
        let registry = registry_for_test();
        let log: Rc<RefCell<Vec<i32>>> = Rc::default();
        let order = log.clone();
        let tree = Node::render_fn(move |scope| {
            for priority in [2, -1, 0] {
                let log = order.clone();
                scope.use_frame(priority, move |_| {
                    log.borrow_mut().push(priority);
                    Ok(())
                });
            }
            Ok(Node::Empty)
        });
        registry.render(tree, "main", None).unwrap();

        let start = Instant::now();
        registry.tick_at(start).unwrap();
        registry.tick_at(start + Duration::from_millis(16)).unwrap();
        assert_eq!(*log.borrow(), [-1, 0, 2, -1, 0, 2]);
    }

    #[test]
    fn unmounting_one_root_leaves_the_other_alone() {
        let registry = registry_for_test();
        registry.render(ship([1.0, 0.0, 0.0]), "a", None).unwrap();
        let before = registry.render(ship([0.0, 0.0, 1.0]), "b", None).unwrap();

        assert!(registry.unmount("a").unwrap());
        let after = registry.state("b").unwrap().unwrap();
        assert_eq!(after, before);
        assert_eq!(registry.with_root("b", |root| root.draw_list().len()).unwrap(), Some(1));
        assert_eq!(registry.targets().unwrap(), [TargetId::from("b")]);
    }

    #[test]
    fn uniform_changes_touch_only_the_uniform() {
        let registry = registry_for_test();
        let before = registry.render(ship([1.0, 0.0, 0.0]), "main", None).unwrap();

        let mesh = first_mesh(&registry, "main");
        let draws = registry.with_root("main", |root| root.draw_list()).unwrap().unwrap();
        assert_eq!(draws.len(), 1);
        let (geometry, program) = (draws[0].geometry, draws[0].program);
        registry
            .with_root("main", |root| match root.env.graph.borrow().object(mesh) {
                Some(NativeObject::Mesh(m)) => {
                    assert_eq!((m.geometry, m.program), (Some(geometry), Some(program)));
                }
                other => panic!("expected a mesh, got {other:?}"),
            })
            .unwrap();

        let after = registry.render(ship([0.0, 1.0, 0.0]), "main", None).unwrap();
        assert_eq!(after.last_commit.updated, 1);
        assert_eq!(after.graph.recreated, before.graph.recreated);
        assert_eq!(after.graph.created, before.graph.created);
        assert_eq!(after.graph.mutations, before.graph.mutations + 1);
        assert_eq!(after.device.created, before.device.created);
        registry
            .with_root("main", |root| match root.env.graph.borrow().object(program) {
                Some(NativeObject::Program(p)) => {
                    assert_eq!(p.uniform("uColor"), Some(&Uniform::Vec(vec![0.0, 1.0, 0.0])));
                }
                other => panic!("expected a program, got {other:?}"),
            })
            .unwrap();
    }

    #[test]
    fn unmount_releases_every_native_object() {
        let registry = registry_for_test();
        registry.render(ship([1.0, 0.0, 0.0]), "main", None).unwrap();
        let (device, graph) =
            registry.with_root("main", |root| (root.env.device.clone(), root.env.graph.clone())).unwrap().unwrap();
        assert!(device.stats().live() > 0);

        assert!(registry.unmount("main").unwrap());
        assert_eq!(device.stats().live(), 0);
        assert!(graph.borrow().is_empty());
        assert_eq!(registry.state("main").unwrap(), None);
        assert!(!registry.unmount("main").unwrap());
        assert!(!registry.is_running());
    }

    #[test]
    fn failed_renders_keep_the_previous_tree() {
        let registry = registry_for_test();
        let before = registry.render(ship([1.0, 0.0, 0.0]), "main", None).unwrap();
        let broken = element("group").child(element("mesh").key("ship").child(element("div")));

        let err = registry.render(broken, "main", None).unwrap_err();
        assert!(matches!(err, PrismError::UnknownElement(tag) if tag == "div"));
        let after = registry.state("main").unwrap().unwrap();
        assert_eq!(after.instances, before.instances);
        assert_eq!(after.device.live(), before.device.live());
        assert_eq!(registry.with_root("main", |root| root.draw_list().len()).unwrap(), Some(1));
    }

    #[test]
    fn concurrent_roots_commit_on_the_next_tick() {
        let registry = registry_for_test();
        let config = RootConfig::new().with_mode(RenderMode::Concurrent);
        let state = registry.render(ship([1.0, 0.0, 0.0]), "main", Some(config)).unwrap();
        assert!(state.pending);
        assert_eq!(state.instances, 0);

        let report = registry.tick().unwrap();
        assert_eq!(report.commits, 1);
        let state = registry.state("main").unwrap().unwrap();
        assert!(!state.pending);
        assert_eq!(state.instances, 4);

        registry.render(ship([0.0, 1.0, 0.0]), "main", None).unwrap();
        let summary = registry.flush("main").unwrap().unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(registry.flush("main").unwrap(), None);
    }

    /// Counter bumped from a frame callback, rendered as the mesh's x.
    fn counter() -> Node {
        Node::render_fn(|scope| {
            let (count, set) = scope.use_state(|| 0.0f32);
            scope.use_frame(0, move |_| {
                set.set(count + 1.0);
                Ok(())
            });
            Ok(element("group").child(element("mesh").prop("position.x", count)).into())
        })
    }

    #[test]
    fn state_set_during_a_tick_commits_in_the_lane_of_the_root() {
        let registry = registry_for_test();
        registry.render(counter(), "blocking", None).unwrap();
        registry.render(counter(), "concurrent", Some(RootConfig::new().with_mode(RenderMode::Concurrent))).unwrap();

        let start = Instant::now();
        registry.tick_at(start).unwrap();
        let blocking = first_mesh(&registry, "blocking");
        let concurrent = first_mesh(&registry, "concurrent");
        assert_eq!(position_x(&registry, "blocking", blocking), 1.0);
        assert_eq!(position_x(&registry, "concurrent", concurrent), 0.0);

        registry.tick_at(start + Duration::from_millis(16)).unwrap();
        assert_eq!(position_x(&registry, "blocking", blocking), 2.0);
        assert_eq!(position_x(&registry, "concurrent", concurrent), 1.0);
    }

    #[test]
    fn frame_callbacks_animate_through_refs() {
        let registry = registry_for_test();
        let tree = Node::render_fn(|scope| {
            let mesh = scope.use_ref();
            let target = mesh.clone();
            scope.use_frame(0, move |ctx| {
                if let Some(t) = target.get().and_then(|id| ctx.graph.transform_mut(id)) {
                    t.rotation.y += 0.5;
                }
                Ok(())
            });
            Ok(element("mesh").node_ref(mesh).into())
        });
        registry.render(tree, "main", None).unwrap();
        registry.tick().unwrap();
        registry.tick().unwrap();

        let mesh = scene_children(&registry, "main")[0];
        let rotation = registry
            .with_root("main", |root| root.env.graph.borrow().object(mesh).and_then(NativeObject::transform).map(|t| t.rotation.y))
            .unwrap()
            .flatten();
        assert_eq!(rotation, Some(1.0));
    }

    #[test]
    fn callback_errors_reach_the_reporter_and_the_tick_goes_on() {
        let registry = registry_for_test();
        let reported: Rc<RefCell<Vec<String>>> = Rc::default();
        let sink = reported.clone();
        registry.set_error_reporter(move |target, err| sink.borrow_mut().push(format!("{target}: {err}"))).unwrap();

        let ran = Rc::new(Cell::new(0));
        let counter = ran.clone();
        let tree = Node::render_fn(move |scope| {
            scope.use_frame(0, |_| Err(anyhow::anyhow!("boom")));
            let counter = counter.clone();
            scope.use_frame(1, move |_| {
                counter.set(counter.get() + 1);
                Ok(())
            });
            Ok(Node::Empty)
        });
        registry.render(tree, "main", None).unwrap();

        let report = registry.tick().unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.callbacks, 2);
        assert_eq!(ran.get(), 1);
        let reported = reported.borrow();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].starts_with("main: ") && reported[0].contains("boom"), "{}", reported[0]);
    }

    #[test]
    fn re_entering_the_registry_from_a_callback_is_busy() {
        let registry = registry_for_test();
        let outcome: Rc<RefCell<Option<Result<RootState, PrismError>>>> = Rc::default();
        let (inner, slot) = (registry.clone(), outcome.clone());
        let tree = Node::render_fn(move |scope| {
            let (registry, slot) = (inner.clone(), slot.clone());
            scope.use_frame(0, move |_| {
                *slot.borrow_mut() = Some(registry.render(element("group"), "other", None));
                Ok(())
            });
            Ok(Node::Empty)
        });
        registry.render(tree, "main", None).unwrap();
        registry.tick().unwrap();

        assert!(matches!(outcome.borrow().as_ref(), Some(Err(PrismError::Busy))));
        assert!(registry.is_running());
        assert_eq!(registry.state("other").unwrap(), None);
    }

    #[test]
    fn demand_frameloop_runs_only_when_invalidated() {
        let registry = registry_for_test();
        let ran = Rc::new(Cell::new(0));
        let counter = ran.clone();
        let tree = Node::render_fn(move |scope| {
            let counter = counter.clone();
            scope.use_frame(0, move |_| {
                counter.set(counter.get() + 1);
                Ok(())
            });
            Ok(Node::Empty)
        });
        let config = RootConfig::new().with_frameloop(Frameloop::Demand);
        registry.render(tree, "main", Some(config)).unwrap();

        registry.tick().unwrap();
        registry.tick().unwrap();
        assert_eq!(ran.get(), 1);
        assert!(registry.invalidate("main").unwrap());
        registry.tick().unwrap();
        assert_eq!(ran.get(), 2);

        registry.render(Node::Empty, "main", Some(RootConfig::new().with_frameloop(Frameloop::Never))).unwrap();
        registry.invalidate("main").unwrap();
        registry.tick().unwrap();
        assert_eq!(ran.get(), 2);
    }

    #[test]
    fn resize_reaches_the_camera_now_and_components_next_commit() {
        let registry = registry_for_test();
        let seen = Rc::new(Cell::new(0.0f32));
        let width = seen.clone();
        let tree = Node::render_fn(move |scope| {
            width.set(scope.environment().viewport.width);
            Ok(Node::Empty)
        });
        registry.render(tree, "main", Some(RootConfig::new().with_size(400.0, 200.0))).unwrap();
        assert_eq!(seen.get(), 400.0);

        assert!(registry.resize("main", 800.0, 200.0).unwrap());
        let aspect = registry
            .with_root("main", |root| match root.env.graph.borrow().object(root.env.camera) {
                Some(NativeObject::Camera(camera)) => camera.aspect,
                other => panic!("expected a camera, got {other:?}"),
            })
            .unwrap();
        assert_eq!(aspect, Some(4.0));
        assert_eq!(seen.get(), 400.0);

        registry.tick().unwrap();
        assert_eq!(seen.get(), 800.0);
        assert!(!registry.resize("missing", 1.0, 1.0).unwrap());
    }

    #[test]
    fn device_factory_runs_once_per_root() {
        let registry = registry_for_test();
        let made = Rc::new(Cell::new(0));
        let counter = made.clone();
        registry
            .set_device_factory(move |_| {
                counter.set(counter.get() + 1);
                Ok(Rc::new(HeadlessDevice::new()) as Rc<dyn Device>)
            })
            .unwrap();

        registry.render(ship([1.0, 0.0, 0.0]), 1u64, None).unwrap();
        registry.render(ship([1.0, 0.0, 0.0]), 1u64, None).unwrap();
        registry.render(ship([1.0, 0.0, 0.0]), 2u64, None).unwrap();
        assert_eq!(made.get(), 2);
    }

    #[test]
    fn handles_and_free_functions_share_the_default_registry() {
        let root = create_root("handle", Some(RootConfig::new().with_size(640.0, 480.0))).unwrap();
        assert_eq!(root.state().unwrap().unwrap().instances, 0);
        root.render(ship([1.0, 0.0, 0.0])).unwrap();
        let state = render(ship([1.0, 0.0, 0.0]), "handle", None).unwrap();
        assert!(state.last_commit.is_noop());
        assert_eq!(state.viewport, Viewport::new(640.0, 480.0));

        assert!(root.unmount().unwrap());
        assert!(!unmount("handle").unwrap());
    }

    #[test]
    fn targets_convert_from_ids_names_and_windows() {
        assert_eq!(TargetId::from(7u64), TargetId::Id(7));
        assert_eq!(TargetId::from("main"), TargetId::Name("main".into()));
        assert_eq!(TargetId::from(WindowId::from(7u64)), TargetId::Id(7));
        assert_eq!(TargetId::from(7u64).to_string(), "#7");
    }

    #[test]
    fn bad_configs_are_rejected_before_a_root_exists() {
        let registry = registry_for_test();
        let err = registry.render(Node::Empty, "main", Some(RootConfig::new().with_dpr(0.0))).unwrap_err();
        assert!(matches!(err, PrismError::Config(_)));
        assert_eq!(registry.state("main").unwrap(), None);
    }
}

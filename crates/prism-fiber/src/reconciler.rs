//! Tree diffing.
//!
//! A render runs in two phases. The render phase walks the new [`Node`] tree
//! against the committed fibers, calls components, creates detached
//! instances and prepares update payloads; nothing visible changes. If it
//! fails, everything it produced is handed back to the host and the committed
//! tree stays as it was. The commit phase then applies, in order: deletions,
//! updates, placements, mounts, refs and hook effects.
//!
//! Children match by key when they have one, otherwise by position among
//! their siblings (empty nodes keep their position). A match also needs the
//! same element tag, component type or fragment-ness.

use std::any::TypeId;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::context::Environment;
use crate::element::{ComponentElement, HostElement, Node, NodeRef, Props};
use crate::error::{PrismError, RenderError};
use crate::hooks::{EffectCtx, Hooks, Scope};
use crate::host::HostConfig;
use crate::resource::ResourceCache;
use crate::scheduler::FrameScheduler;

/// What a commit did, in host operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    pub created: usize,
    pub updated: usize,
    pub placed: usize,
    /// Top-level host instances removed from their parent.
    pub deleted: usize,
    /// Components that suspended and kept their previous output.
    pub suspended: usize,
}

impl CommitSummary {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.placed == 0 && self.deleted == 0
    }
}

/// Per-root state a render needs besides the host.
pub(crate) struct RenderCtx<'a> {
    pub env: &'a Rc<Environment>,
    pub cache: &'a mut ResourceCache,
    pub scheduler: &'a FrameScheduler,
    pub dirty: &'a Rc<Cell<bool>>,
}

// ── Fibers ────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum FiberKind<I> {
    Host { tag: String, instance: I, props: Props, node_ref: Option<NodeRef> },
    Component { type_id: TypeId, name: &'static str, hooks: Rc<Hooks> },
    Fragment,
}

/// Committed counterpart of a non-empty [`Node`].
#[derive(Clone)]
struct Fiber<I> {
    key: Option<String>,
    /// Position among siblings, empty nodes included.
    index: usize,
    kind: FiberKind<I>,
    children: Vec<Fiber<I>>,
}

impl<I: Copy> Fiber<I> {
    fn matches(&self, node: &Node) -> bool {
        match (&self.kind, node) {
            (FiberKind::Host { tag, .. }, Node::Host(el)) => *tag == el.tag,
            (FiberKind::Component { type_id, .. }, Node::Component(c)) => *type_id == c.type_id,
            (FiberKind::Fragment, Node::Fragment(_)) => true,
            _ => false,
        }
    }
}

/// Outermost host instances of `fibers`, looking through components and fragments.
fn host_instances<I: Copy>(fibers: &[Fiber<I>], out: &mut Vec<I>) {
    for fiber in fibers {
        match &fiber.kind {
            FiberKind::Host { instance, .. } => out.push(*instance),
            FiberKind::Component { .. } | FiberKind::Fragment => host_instances(&fiber.children, out),
        }
    }
}

// ── Render phase ──────────────────────────────────────────────────────────

enum Placement<I> {
    Append { parent: I, child: I },
    Before { parent: I, child: I, before: I },
}

struct Work<I, P> {
    created: Vec<I>,
    updates: Vec<(I, P)>,
    deletions: Vec<(I, Fiber<I>)>,
    placements: Vec<Placement<I>>,
    mounts: Vec<I>,
    ref_clears: Vec<NodeRef>,
    ref_sets: Vec<(NodeRef, I)>,
    rendered: Vec<Rc<Hooks>>,
    suspended: usize,
}

impl<I, P> Work<I, P> {
    fn new() -> Self {
        Self {
            created: Vec::new(),
            updates: Vec::new(),
            deletions: Vec::new(),
            placements: Vec::new(),
            mounts: Vec::new(),
            ref_clears: Vec::new(),
            ref_sets: Vec::new(),
            rendered: Vec::new(),
            suspended: 0,
        }
    }
}

struct Pass<'p, 'c, H: HostConfig> {
    host: &'p mut H,
    ctx: &'p mut RenderCtx<'c>,
    work: Work<H::Instance, H::Payload>,
}

impl<H: HostConfig> Pass<'_, '_, H> {
    /// Children of a host instance, with their placements.
    fn host_children(
        &mut self,
        parent: H::Instance,
        old: &[Fiber<H::Instance>],
        new: Vec<Node>,
    ) -> Result<Vec<Fiber<H::Instance>>, PrismError> {
        let fibers = self.children(parent, old, new)?;
        self.place(parent, old, &fibers);
        Ok(fibers)
    }

    fn children(
        &mut self,
        parent: H::Instance,
        old: &[Fiber<H::Instance>],
        new: Vec<Node>,
    ) -> Result<Vec<Fiber<H::Instance>>, PrismError> {
        let mut keyed: HashMap<&str, usize> = HashMap::new();
        let mut unkeyed: HashMap<usize, usize> = HashMap::new();
        for (i, fiber) in old.iter().enumerate() {
            match fiber.key.as_deref() {
                Some(key) => {
                    keyed.entry(key).or_insert(i);
                }
                None => {
                    unkeyed.insert(fiber.index, i);
                }
            }
        }

        let mut used = vec![false; old.len()];
        let mut seen_keys = HashSet::new();
        let mut fibers = Vec::with_capacity(new.len());
        for (index, node) in new.into_iter().enumerate() {
            if matches!(node, Node::Empty) {
                continue;
            }
            if let Some(key) = node.key() {
                if !seen_keys.insert(key.to_string()) {
                    log::warn!("duplicate key `{key}` among siblings; only the first is matched");
                }
            }
            let candidate = match node.key() {
                Some(key) => keyed.get(key),
                None => unkeyed.get(&index),
            }
            .copied()
            .filter(|&i| !used[i] && old[i].matches(&node));
            if let Some(i) = candidate {
                used[i] = true;
            }
            fibers.push(self.node(parent, candidate.map(|i| &old[i]), node, index)?);
        }

        for (i, fiber) in old.iter().enumerate() {
            if !used[i] {
                self.work.deletions.push((parent, fiber.clone()));
            }
        }
        Ok(fibers)
    }

    fn node(
        &mut self,
        parent: H::Instance,
        old: Option<&Fiber<H::Instance>>,
        node: Node,
        index: usize,
    ) -> Result<Fiber<H::Instance>, PrismError> {
        match node {
            Node::Host(el) => self.host(old, el, index),
            Node::Component(el) => self.component(parent, old, el, index),
            Node::Fragment(children) => {
                let old_children = old.map_or(&[][..], |f| &f.children[..]);
                let children = self.children(parent, old_children, children)?;
                Ok(Fiber { key: None, index, kind: FiberKind::Fragment, children })
            }
            Node::Empty => unreachable!("empty nodes are skipped before matching"),
        }
    }

    fn host(
        &mut self,
        old: Option<&Fiber<H::Instance>>,
        el: HostElement,
        index: usize,
    ) -> Result<Fiber<H::Instance>, PrismError> {
        let HostElement { tag, key, props, children, node_ref } = el;

        if let Some(Fiber { kind: FiberKind::Host { instance, props: old_props, node_ref: old_ref, .. }, children: old_children, .. }) =
            old
        {
            let instance = *instance;
            if let Some(payload) = self.host.prepare_update(instance, &tag, old_props, &props, self.ctx.env)? {
                self.work.updates.push((instance, payload));
            }
            let children = self.host_children(instance, old_children, children)?;
            match (old_ref, &node_ref) {
                (Some(a), Some(b)) if a.ptr_eq(b) => {}
                (a, b) => {
                    self.work.ref_clears.extend(a.iter().cloned());
                    self.work.ref_sets.extend(b.iter().map(|r| (r.clone(), instance)));
                }
            }
            let kind = FiberKind::Host { tag, instance, props, node_ref };
            return Ok(Fiber { key, index, kind, children });
        }

        let instance = self.host.create_instance(&tag, &props, self.ctx.env)?;
        self.work.created.push(instance);
        let children = self.host_children(instance, &[], children)?;
        if self.host.finalize_initial_children(instance, &props) {
            self.work.mounts.push(instance);
        }
        if let Some(r) = &node_ref {
            self.work.ref_sets.push((r.clone(), instance));
        }
        let kind = FiberKind::Host { tag, instance, props, node_ref };
        Ok(Fiber { key, index, kind, children })
    }

    fn component(
        &mut self,
        parent: H::Instance,
        old: Option<&Fiber<H::Instance>>,
        el: ComponentElement,
        index: usize,
    ) -> Result<Fiber<H::Instance>, PrismError> {
        let hooks = match old {
            Some(Fiber { kind: FiberKind::Component { hooks, .. }, .. }) => hooks.clone(),
            _ => Hooks::new(),
        };

        let (output, order_error) = {
            let mut scope = Scope::new(self.ctx.env, &hooks, &mut *self.ctx.cache, self.ctx.dirty);
            let output = el.component.render(&mut scope);
            (output, scope.finish())
        };

        let kind = FiberKind::Component { type_id: el.type_id, name: el.name, hooks: hooks.clone() };
        match (output, order_error) {
            (_, Some(err)) | (Err(RenderError::Failed(err)), None) => {
                hooks.rollback();
                Err(err)
            }
            (Err(RenderError::Suspended), None) => {
                hooks.rollback();
                self.work.suspended += 1;
                log::debug!("{} suspended", el.name);
                let children = old.map(|f| f.children.clone()).unwrap_or_default();
                Ok(Fiber { key: el.key, index, kind, children })
            }
            (Ok(node), None) => {
                self.work.rendered.push(hooks);
                let old_children = old.map_or(&[][..], |f| &f.children[..]);
                let children = self.children(parent, old_children, vec![node])?;
                Ok(Fiber { key: el.key, index, kind, children })
            }
        }
    }

    /// Moves and inserts for `parent`'s host children.
    ///
    /// Walking the new order, an instance that sits at or after the last
    /// stable one in the old order stays where it is; every other instance
    /// goes before the next stable one, or to the end.
    fn place(&mut self, parent: H::Instance, old: &[Fiber<H::Instance>], new: &[Fiber<H::Instance>]) {
        let mut before = Vec::new();
        host_instances(old, &mut before);
        let old_pos: HashMap<H::Instance, usize> = before.iter().enumerate().map(|(i, inst)| (*inst, i)).collect();

        let mut after = Vec::new();
        host_instances(new, &mut after);
        let mut last = 0;
        let stable: Vec<bool> = after
            .iter()
            .map(|inst| match old_pos.get(inst) {
                Some(&pos) if pos >= last => {
                    last = pos;
                    true
                }
                _ => false,
            })
            .collect();

        let mut anchor = vec![None; after.len()];
        let mut next = None;
        for i in (0..after.len()).rev() {
            anchor[i] = next;
            if stable[i] {
                next = Some(after[i]);
            }
        }

        for (i, &child) in after.iter().enumerate() {
            if stable[i] {
                continue;
            }
            self.work.placements.push(match anchor[i] {
                Some(before) => Placement::Before { parent, child, before },
                None => Placement::Append { parent, child },
            });
        }
    }

    /// Hands back everything this pass produced.
    fn abandon(self) {
        let Pass { host, work, .. } = self;
        for (_, payload) in work.updates {
            host.discard_update(payload);
        }
        for instance in work.created.into_iter().rev() {
            host.discard_instance(instance);
        }
        for hooks in work.rendered {
            hooks.rollback();
        }
    }
}

// ── Commit phase ──────────────────────────────────────────────────────────

fn commit<H: HostConfig>(host: &mut H, work: Work<H::Instance, H::Payload>, effects: &mut EffectCtx<'_>) -> CommitSummary {
    let mut summary = CommitSummary {
        created: work.created.len(),
        updated: work.updates.len(),
        placed: work.placements.len(),
        deleted: 0,
        suspended: work.suspended,
    };

    for (parent, fiber) in &work.deletions {
        summary.deleted += delete(host, *parent, fiber, effects);
    }
    for (instance, payload) in work.updates {
        host.commit_update(instance, payload);
    }
    for placement in work.placements {
        match placement {
            Placement::Append { parent, child } => host.append_child(parent, child),
            Placement::Before { parent, child, before } => host.insert_before(parent, child, before),
        }
    }
    for instance in work.mounts {
        host.commit_mount(instance);
    }
    for node_ref in work.ref_clears {
        node_ref.set(None);
    }
    for (node_ref, instance) in work.ref_sets {
        node_ref.set(host.public_instance(instance));
    }
    for hooks in work.rendered {
        hooks.commit(effects);
    }
    summary
}

/// Unmounts `fiber`'s hooks and refs, then detaches its outermost host instances.
fn delete<H: HostConfig>(host: &mut H, parent: H::Instance, fiber: &Fiber<H::Instance>, effects: &mut EffectCtx<'_>) -> usize {
    release(fiber, effects);
    let mut instances = Vec::new();
    host_instances(std::slice::from_ref(fiber), &mut instances);
    for &instance in &instances {
        host.remove_child(parent, instance);
    }
    instances.len()
}

fn release<I: Copy>(fiber: &Fiber<I>, effects: &mut EffectCtx<'_>) {
    match &fiber.kind {
        FiberKind::Host { node_ref: Some(r), .. } => r.set(None),
        FiberKind::Component { hooks, name, .. } => {
            log::trace!("unmounting {name}");
            hooks.unmount(effects);
        }
        FiberKind::Host { .. } | FiberKind::Fragment => {}
    }
    for child in &fiber.children {
        release(child, effects);
    }
}

// ── Reconciler ────────────────────────────────────────────────────────────

/// Committed tree of one root.
pub(crate) struct Reconciler<H: HostConfig> {
    container: H::Instance,
    tree: Vec<Fiber<H::Instance>>,
}

impl<H: HostConfig> Reconciler<H> {
    pub(crate) fn new(container: H::Instance) -> Self {
        Self { container, tree: Vec::new() }
    }

    pub(crate) fn container(&self) -> H::Instance {
        self.container
    }

    /// Diffs `node` against the committed tree and commits the difference.
    pub(crate) fn render(&mut self, host: &mut H, node: Node, ctx: &mut RenderCtx<'_>) -> Result<CommitSummary, PrismError> {
        ctx.cache.begin_pass();
        let mut pass = Pass { host, ctx, work: Work::new() };
        match pass.host_children(self.container, &self.tree, vec![node]) {
            Ok(tree) => {
                let Pass { host, ctx, work } = pass;
                let summary = commit(host, work, &mut EffectCtx { scheduler: ctx.scheduler, cache: &mut *ctx.cache });
                ctx.cache.sweep();
                self.tree = tree;
                log::trace!("commit: {summary:?}");
                Ok(summary)
            }
            Err(err) => {
                pass.abandon();
                Err(err)
            }
        }
    }

    /// Tears down the whole committed tree. Returns how many top-level
    /// instances were removed from the container.
    pub(crate) fn unmount(&mut self, host: &mut H, effects: &mut EffectCtx<'_>) -> usize {
        let tree = std::mem::take(&mut self.tree);
        tree.iter().map(|fiber| delete(host, self.container, fiber, effects)).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

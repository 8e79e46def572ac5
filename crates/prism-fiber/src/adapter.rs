//! Host adapter over the native scene graph.
//!
//! Instances mirror the element tree one to one. Each owns one native
//! object; children either link into the parent's native child list or, when
//! they carry an attach slot, claim that slot on the parent. Several children
//! may claim the same slot: the most recent claim wins and removing it hands
//! the slot back to the previous claimant.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use prism_engine::graph::{NativeId, NativeObject, PreparedObject, SceneGraph, Transform, Value};
use slotmap::SlotMap;

use crate::context::Environment;
use crate::element::Props;
use crate::error::PrismError;
use crate::host::HostConfig;
use crate::kind::{self, ElementKind};

slotmap::new_key_type! {
    /// Handle to an [`Instance`] inside a [`SceneHost`].
    pub struct InstanceId;
}

/// Adapter-side record of one host element.
#[derive(Debug)]
pub struct Instance {
    pub kind: ElementKind,
    pub tag: String,
    pub props: Props,
    pub native: NativeId,
    pub parent: Option<InstanceId>,
    pub children: Vec<InstanceId>,
    /// Slot claimed on the parent instead of joining its child list.
    pub attach: Option<String>,
    claims: BTreeMap<String, Vec<InstanceId>>,
}

impl Instance {
    /// Children currently claiming `slot`, oldest first.
    pub fn claimants(&self, slot: &str) -> &[InstanceId] {
        self.claims.get(slot).map_or(&[], Vec::as_slice)
    }
}

/// Validated change for one instance.
pub enum UpdatePayload {
    /// Assign `changes` in place; `props` becomes the new prop set.
    Assign { props: Props, changes: Vec<(String, Value)> },
    /// Swap in a freshly built native object.
    Recreate { props: Props, object: PreparedObject, attach: Option<String> },
}

/// [`HostConfig`] that builds and edits a [`SceneGraph`].
pub struct SceneHost {
    graph: Rc<RefCell<SceneGraph>>,
    instances: SlotMap<InstanceId, Instance>,
}

impl SceneHost {
    pub fn new(graph: Rc<RefCell<SceneGraph>>) -> Self {
        Self { graph, instances: SlotMap::with_key() }
    }

    /// Wraps an existing native object as the root of an instance tree.
    pub fn create_container(&mut self, native: NativeId) -> InstanceId {
        self.instances.insert(Instance {
            kind: ElementKind::Transform,
            tag: "scene".to_string(),
            props: Props::new(),
            native,
            parent: None,
            children: Vec::new(),
            attach: None,
            claims: BTreeMap::new(),
        })
    }

    /// Disposes a container and everything below it. Returns the number of
    /// native objects released.
    pub fn dispose_container(&mut self, container: InstanceId) -> usize {
        self.dispose(container)
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn graph(&self) -> &Rc<RefCell<SceneGraph>> {
        &self.graph
    }

    fn native(&self, id: InstanceId) -> Option<NativeId> {
        self.instances.get(id).map(|i| i.native)
    }

    // ── Linking ───────────────────────────────────────────────────────────

    fn link(&mut self, parent: InstanceId, child: InstanceId, before: Option<InstanceId>) {
        if !self.instances.contains_key(parent) || !self.instances.contains_key(child) {
            log::error!("link of a disposed instance ignored");
            return;
        }
        if let Some(previous) = self.instances[child].parent.filter(|&p| p != parent) {
            self.detach(previous, child);
        }

        let siblings = &mut self.instances[parent].children;
        siblings.retain(|&c| c != child);
        let at = before.and_then(|b| siblings.iter().position(|&c| c == b)).unwrap_or(siblings.len());
        siblings.insert(at, child);
        self.instances[child].parent = Some(parent);

        match self.instances[child].attach.clone() {
            Some(slot) => self.claim(parent, child, &slot),
            None => self.link_native(parent, child),
        }
    }

    /// Links `child`'s native object before the next list-linked sibling.
    fn link_native(&mut self, parent: InstanceId, child: InstanceId) {
        let siblings = &self.instances[parent].children;
        let at = siblings.iter().position(|&c| c == child).unwrap_or(siblings.len());
        let anchor = siblings
            .iter()
            .skip(at + 1)
            .find(|&&s| self.instances.get(s).is_some_and(|i| i.attach.is_none()))
            .and_then(|&s| self.native(s));

        let (parent_native, child_native) = (self.instances[parent].native, self.instances[child].native);
        let mut graph = self.graph.borrow_mut();
        let result = match anchor {
            Some(before) => graph.insert_before(parent_native, child_native, before),
            None => graph.add_child(parent_native, child_native),
        };
        if let Err(err) = result {
            log::error!("linking `{}` under `{}` failed: {err}", self.instances[child].tag, self.instances[parent].tag);
        }
    }

    fn claim(&mut self, parent: InstanceId, child: InstanceId, slot: &str) {
        let (parent_native, child_native) = (self.instances[parent].native, self.instances[child].native);
        let result = self.graph.borrow_mut().set_slot(parent_native, slot, Some(child_native));
        match result {
            Ok(()) => {
                let stack = self.instances[parent].claims.entry(slot.to_string()).or_default();
                stack.retain(|&c| c != child);
                stack.push(child);
            }
            Err(err) => {
                let err = PrismError::InvalidAttach {
                    parent: self.instances[parent].tag.clone(),
                    child: self.instances[child].tag.clone(),
                    slot: slot.to_string(),
                    reason: err.to_string(),
                };
                log::warn!("{err}");
            }
        }
    }

    /// Drops `child`'s claim on `slot`. When it held the slot, the previous
    /// claimant takes it back.
    fn unclaim(&mut self, parent: InstanceId, child: InstanceId, slot: &str) {
        let Some(stack) = self.instances.get_mut(parent).and_then(|p| p.claims.get_mut(slot)) else {
            return;
        };
        let held = stack.last() == Some(&child);
        stack.retain(|&c| c != child);
        let next = stack.last().copied();
        if stack.is_empty() {
            self.instances[parent].claims.remove(slot);
        }
        if !held {
            return;
        }

        let parent_native = self.instances[parent].native;
        let next_native = next.and_then(|n| self.native(n));
        if let Err(err) = self.graph.borrow_mut().set_slot(parent_native, slot, next_native) {
            log::warn!("restoring slot `{slot}` on `{}` failed: {err}", self.instances[parent].tag);
        }
    }

    /// Undoes [`SceneHost::link`] without disposing anything.
    fn detach(&mut self, parent: InstanceId, child: InstanceId) {
        let Some(p) = self.instances.get_mut(parent) else { return };
        p.children.retain(|&c| c != child);
        let Some(c) = self.instances.get_mut(child) else { return };
        c.parent = None;

        match c.attach.clone() {
            Some(slot) => self.unclaim(parent, child, &slot),
            None => {
                let (parent_native, child_native) = (self.instances[parent].native, self.instances[child].native);
                if let Err(err) = self.graph.borrow_mut().remove_child(parent_native, child_native) {
                    log::error!("unlinking `{}` failed: {err}", self.instances[child].tag);
                }
            }
        }
    }

    /// Disposes `id` and its descendants, leaves first.
    fn dispose(&mut self, id: InstanceId) -> usize {
        let Some(children) = self.instances.get(id).map(|i| i.children.clone()) else {
            return 0;
        };
        let mut released: usize = children.into_iter().map(|c| self.dispose(c)).sum();
        if let Some(instance) = self.instances.remove(id) {
            if self.graph.borrow_mut().dispose(instance.native).is_some() {
                released += 1;
            }
        }
        released
    }

    /// Re-fills slots on a freshly installed object from the current claims.
    fn restore_claims(&mut self, id: InstanceId) {
        let instance = &self.instances[id];
        let tops: Vec<(String, NativeId)> = instance
            .claims
            .iter()
            .filter_map(|(slot, stack)| Some((slot.clone(), self.native(*stack.last()?)?)))
            .collect();
        let mut graph = self.graph.borrow_mut();
        for (slot, native) in tops {
            if let Err(err) = graph.set_slot(instance.native, &slot, Some(native)) {
                log::warn!("slot `{slot}` lost on re-created `{}`: {err}", instance.tag);
            }
        }
    }
}

impl HostConfig for SceneHost {
    type Instance = InstanceId;
    type Payload = UpdatePayload;

    fn create_instance(&mut self, tag: &str, props: &Props, env: &Rc<Environment>) -> Result<InstanceId, PrismError> {
        let kind = ElementKind::parse(tag);
        if kind == ElementKind::Unknown {
            return Err(PrismError::UnknownElement(tag.to_string()));
        }
        let attach = kind::attach_slot(kind, tag, props)?;
        let object = kind::construct(kind, tag, props, env)?;
        let native = self.graph.borrow_mut().insert(object)?;
        log::trace!("created `{tag}` as {native:?}");
        Ok(self.instances.insert(Instance {
            kind,
            tag: tag.to_string(),
            props: props.clone(),
            native,
            parent: None,
            children: Vec::new(),
            attach,
            claims: BTreeMap::new(),
        }))
    }

    fn finalize_initial_children(&mut self, instance: InstanceId, _props: &Props) -> bool {
        self.instances.get(instance).is_some_and(|i| i.kind == ElementKind::Orbit)
    }

    fn prepare_update(
        &mut self,
        instance: InstanceId,
        tag: &str,
        old: &Props,
        new: &Props,
        env: &Rc<Environment>,
    ) -> Result<Option<UpdatePayload>, PrismError> {
        if old == new {
            return Ok(None);
        }
        let Some(current) = self.instances.get(instance) else {
            log::error!("update of a disposed `{tag}` ignored");
            return Ok(None);
        };
        let kind = current.kind;

        // a removed prop has no "unset" value, so it takes a fresh object too
        let removed = old.keys().any(|k| !new.contains_key(k));
        let structural = new.iter().any(|(k, v)| kind.is_structural(k) && old.get(k) != Some(v));
        if removed || structural {
            let attach = kind::attach_slot(kind, tag, new)?;
            let object = kind::construct(kind, tag, new, env)?;
            let object = self.graph.borrow().prepare(object)?;
            return Ok(Some(UpdatePayload::Recreate { props: new.clone(), object, attach }));
        }

        let graph = self.graph.borrow();
        let Some(mut probe) = graph.object(current.native).cloned() else {
            return Ok(None);
        };
        let mut changes = Vec::new();
        for (key, value) in new.iter().filter(|(k, v)| old.get(k) != Some(*v)) {
            if kind::assign(&mut probe, tag, key, value)? {
                changes.push((key.to_string(), value.clone()));
            }
        }
        Ok(Some(UpdatePayload::Assign { props: new.clone(), changes }))
    }

    fn commit_update(&mut self, instance: InstanceId, payload: UpdatePayload) {
        let Some(current) = self.instances.get_mut(instance) else {
            self.discard_update(payload);
            return;
        };
        let native = current.native;
        match payload {
            UpdatePayload::Assign { props, changes } => {
                current.props = props;
                if changes.is_empty() {
                    return;
                }
                let tag = current.tag.clone();
                let result = self.graph.borrow_mut().update(native, |object| {
                    changes.iter().try_for_each(|(key, value)| kind::assign(object, &tag, key, value).map(drop))
                });
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => log::error!("{err}"),
                    Err(err) => log::error!("updating `{tag}` failed: {err}"),
                }
            }
            UpdatePayload::Recreate { props, object, attach } => {
                current.props = props;
                let previous_attach = std::mem::replace(&mut current.attach, attach.clone());
                let parent = current.parent;
                if let Err(err) = self.graph.borrow_mut().install(native, object) {
                    log::error!("re-creating `{}` failed: {err}", self.instances[instance].tag);
                    return;
                }
                self.restore_claims(instance);

                if let Some(parent) = parent.filter(|_| previous_attach != attach) {
                    // move the claim or list link over to the new attach
                    self.instances[instance].attach = previous_attach;
                    let next = {
                        let siblings = &self.instances[parent].children;
                        siblings.iter().position(|&c| c == instance).and_then(|i| siblings.get(i + 1).copied())
                    };
                    self.detach(parent, instance);
                    self.instances[instance].attach = attach;
                    self.link(parent, instance, next);
                }
            }
        }
    }

    fn commit_mount(&mut self, instance: InstanceId) {
        if let Some(native) = self.native(instance) {
            self.graph.borrow_mut().update_orbit(native);
        }
    }

    fn append_child(&mut self, parent: InstanceId, child: InstanceId) {
        self.link(parent, child, None);
    }

    fn insert_before(&mut self, parent: InstanceId, child: InstanceId, before: InstanceId) {
        self.link(parent, child, Some(before));
    }

    fn remove_child(&mut self, parent: InstanceId, child: InstanceId) {
        self.detach(parent, child);
        let released = self.dispose(child);
        log::trace!("released {released} native objects");
    }

    fn discard_instance(&mut self, instance: InstanceId) {
        if let Some(instance) = self.instances.remove(instance) {
            self.graph.borrow_mut().dispose(instance.native);
        }
    }

    fn discard_update(&mut self, payload: UpdatePayload) {
        if let UpdatePayload::Recreate { object, .. } = payload {
            self.graph.borrow().discard(object);
        }
    }

    fn public_instance(&self, instance: InstanceId) -> Option<NativeId> {
        self.native(instance)
    }
}

/// Native scene root for a new container.
pub(crate) fn scene_root() -> NativeObject {
    NativeObject::Transform(Transform::default())
}

#[cfg(test)]
mod tests {
    use prism_engine::graph::{Mesh, Uniform};

    use super::*;
    use crate::context::test_env;

    struct Fixture {
        env: Rc<Environment>,
        host: SceneHost,
        root: InstanceId,
    }

    impl Fixture {
        fn new() -> Self {
            let env = Rc::new(test_env());
            let mut host = SceneHost::new(env.graph.clone());
            let root = host.create_container(env.scene);
            Self { env, host, root }
        }

        fn create(&mut self, tag: &str, props: Props) -> InstanceId {
            self.host.create_instance(tag, &props, &self.env).unwrap()
        }

        fn mesh(&self, id: InstanceId) -> Mesh {
            match self.env.graph.borrow().object(self.host.instance(id).unwrap().native) {
                Some(NativeObject::Mesh(mesh)) => mesh.clone(),
                other => panic!("expected a mesh, got {other:?}"),
            }
        }

        fn native(&self, id: InstanceId) -> NativeId {
            self.host.instance(id).unwrap().native
        }
    }

    const VS: &str = "void main() {}";
    const FS: &str = "void main() { gl_FragColor = vec4(1.0); }";

    fn program_props() -> Props {
        Props::new().with("vertex", VS).with("fragment", FS).with("uniforms.uColor", [1.0, 0.0, 0.0])
    }

    #[test]
    fn unknown_tags_are_rejected() {
        let mut fx = Fixture::new();
        let err = fx.host.create_instance("div", &Props::new(), &fx.env).unwrap_err();
        assert!(matches!(err, PrismError::UnknownElement(tag) if tag == "div"));
    }

    #[test]
    fn geometry_and_program_fill_mesh_slots() {
        let mut fx = Fixture::new();
        let mesh = fx.create("mesh", Props::new());
        let shape = fx.create("box", Props::new().with("args", [1.0, 1.0, 1.0]));
        let program = fx.create("program", program_props());
        fx.host.append_child(mesh, shape);
        fx.host.append_child(mesh, program);
        fx.host.append_child(fx.root, mesh);

        let native = fx.mesh(mesh);
        assert_eq!(native.geometry, Some(fx.native(shape)));
        assert_eq!(native.program, Some(fx.native(program)));
        // slot claimants stay out of the native child list
        assert!(fx.env.graph.borrow().children(fx.native(mesh)).is_empty());

        let draws = fx.env.graph.borrow().draw_list(fx.env.scene, None);
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].geometry, fx.native(shape));
        assert_eq!(draws[0].program, fx.native(program));
    }

    #[test]
    fn latest_claimant_wins_and_removal_restores_the_previous() {
        let mut fx = Fixture::new();
        let mesh = fx.create("mesh", Props::new());
        let first = fx.create("box", Props::new());
        let second = fx.create("sphere", Props::new());
        fx.host.append_child(mesh, first);
        fx.host.append_child(mesh, second);
        assert_eq!(fx.mesh(mesh).geometry, Some(fx.native(second)));
        assert_eq!(fx.host.instance(mesh).unwrap().claimants("geometry"), [first, second]);

        let second_native = fx.native(second);
        fx.host.remove_child(mesh, second);
        assert_eq!(fx.mesh(mesh).geometry, Some(fx.native(first)));
        assert!(!fx.env.graph.borrow().contains(second_native));

        fx.host.remove_child(mesh, first);
        assert_eq!(fx.mesh(mesh).geometry, None);
    }

    #[test]
    fn invalid_attach_leaves_the_slot_unset() {
        let mut fx = Fixture::new();
        let group = fx.create("group", Props::new());
        let shape = fx.create("box", Props::new());
        fx.host.append_child(group, shape);
        assert!(fx.host.instance(group).unwrap().claimants("geometry").is_empty());

        let mesh = fx.create("mesh", Props::new());
        let wrong = fx.create("mesh", Props::new().with("attach", "geometry"));
        fx.host.append_child(mesh, wrong);
        assert_eq!(fx.mesh(mesh).geometry, None);
    }

    #[test]
    fn list_children_keep_declaration_order() {
        let mut fx = Fixture::new();
        let [a, b, c] = ["a", "b", "c"].map(|name| fx.create("transform", Props::new().with("name", name)));
        let shape = fx.create("box", Props::new());
        fx.host.append_child(fx.root, a);
        fx.host.append_child(fx.root, shape);
        fx.host.append_child(fx.root, c);
        fx.host.insert_before(fx.root, b, shape);

        let expected = vec![fx.native(a), fx.native(b), fx.native(c)];
        assert_eq!(fx.env.graph.borrow().children(fx.env.scene), expected);
        assert_eq!(fx.host.instance(fx.root).unwrap().children, [a, b, shape, c]);
    }

    #[test]
    fn uniform_changes_assign_in_place() {
        let mut fx = Fixture::new();
        let program = fx.create("program", program_props());
        let device_before = fx.env.device.stats();
        let graph_before = fx.env.graph.borrow().stats();

        let new = program_props().with("uniforms.uColor", [0.0, 1.0, 0.0]);
        let payload = fx.host.prepare_update(program, "program", &program_props(), &new, &fx.env).unwrap().unwrap();
        assert!(matches!(&payload, UpdatePayload::Assign { changes, .. } if changes.len() == 1));
        fx.host.commit_update(program, payload);

        let graph = fx.env.graph.borrow();
        let stats = graph.stats();
        assert_eq!(stats.recreated, graph_before.recreated);
        assert_eq!(stats.mutations, graph_before.mutations + 1);
        assert_eq!(fx.env.device.stats().created, device_before.created);
        match graph.object(fx.native(program)) {
            Some(NativeObject::Program(p)) => assert_eq!(p.uniform("uColor"), Some(&Uniform::Vec(vec![0.0, 1.0, 0.0]))),
            other => panic!("expected a program, got {other:?}"),
        }
    }

    #[test]
    fn constructor_props_recreate_and_keep_the_slot() {
        let mut fx = Fixture::new();
        let mesh = fx.create("mesh", Props::new());
        let old = Props::new().with("args", [1.0, 1.0, 1.0]);
        let shape = fx.create("box", old.clone());
        fx.host.append_child(mesh, shape);

        let new = Props::new().with("args", [2.0, 2.0, 2.0]);
        let payload = fx.host.prepare_update(shape, "box", &old, &new, &fx.env).unwrap().unwrap();
        assert!(matches!(payload, UpdatePayload::Recreate { .. }));
        fx.host.commit_update(shape, payload);

        assert_eq!(fx.env.graph.borrow().stats().recreated, 1);
        assert_eq!(fx.mesh(mesh).geometry, Some(fx.native(shape)));
    }

    #[test]
    fn type_errors_fail_the_update() {
        let mut fx = Fixture::new();
        let group = fx.create("group", Props::new());
        let bad = Props::new().with("visible", "yes");
        let err = fx.host.prepare_update(group, "group", &Props::new().with("visible", true), &bad, &fx.env);
        assert!(matches!(err, Err(PrismError::InvalidProp { .. })));
    }

    #[test]
    fn removing_a_subtree_releases_its_gpu_resources() {
        let mut fx = Fixture::new();
        let group = fx.create("group", Props::new());
        let mesh = fx.create("mesh", Props::new());
        let shape = fx.create("box", Props::new());
        let program = fx.create("program", program_props());
        fx.host.append_child(mesh, shape);
        fx.host.append_child(mesh, program);
        fx.host.append_child(group, mesh);
        fx.host.append_child(fx.root, group);
        assert!(fx.env.device.stats().live() > 0);

        fx.host.remove_child(fx.root, group);
        assert_eq!(fx.host.len(), 1);
        assert_eq!(fx.env.device.stats().live(), 0);
        assert_eq!(fx.env.graph.borrow().len(), 2);
    }
}

//! Native scene graph.
//!
//! Responsibilities:
//! - own native objects in an arena addressed by stable [`NativeId`]s
//! - maintain the ordered child hierarchy and named attach slots
//! - tie object lifetimes to their GPU resources through a [`ResourcePool`]
//! - count creations, re-creations, disposals and mutations for diagnostics
//! - produce the ordered draw list for a camera

mod camera;
mod draw;
mod error;
mod geometry;
mod mesh;
mod object;
mod orbit;
mod program;
mod texture;
mod transform;
mod value;

pub mod shapes;

pub use camera::{Camera, Projection};
pub use draw::{DrawCall, SortKey};
pub use error::{GraphError, PropError};
pub use geometry::{Attribute, Geometry};
pub use mesh::{DrawMode, Mesh};
pub use object::NativeObject;
pub use orbit::Orbit;
pub use program::{CullFace, Program, Uniform};
pub use texture::{Filter, Texture, Wrap};
pub use transform::Transform;
pub use value::Value;

use slotmap::SlotMap;

use crate::coords::Mat4;
use crate::device::ResourcePool;
use draw::Frustum;

slotmap::new_key_type! {
    /// Stable handle to a node of a [`SceneGraph`].
    pub struct NativeId;
}

/// Arena entry: the object plus its place in the hierarchy.
#[derive(Debug, Clone)]
pub struct NativeNode {
    pub object: NativeObject,
    parent: Option<NativeId>,
    children: Vec<NativeId>,
}

impl NativeNode {
    pub fn parent(&self) -> Option<NativeId> {
        self.parent
    }

    pub fn children(&self) -> &[NativeId] {
        &self.children
    }
}

/// Lifetime counters. `mutations` counts every structural change and every
/// property or slot assignment.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct GraphStats {
    pub created: u64,
    pub recreated: u64,
    pub disposed: u64,
    pub mutations: u64,
}

/// Object with live GPU resources, waiting to be inserted or installed.
///
/// Hand it back through [`SceneGraph::insert_prepared`],
/// [`SceneGraph::install`] or [`SceneGraph::discard`].
#[derive(Debug)]
pub struct PreparedObject(NativeObject);

impl PreparedObject {
    pub fn object(&self) -> &NativeObject {
        &self.0
    }
}

pub struct SceneGraph {
    nodes: SlotMap<NativeId, NativeNode>,
    pool: ResourcePool,
    stats: GraphStats,
}

impl SceneGraph {
    pub fn new(pool: ResourcePool) -> Self {
        Self { nodes: SlotMap::with_key(), pool, stats: GraphStats::default() }
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn stats(&self) -> GraphStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NativeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = NativeId> + '_ {
        self.nodes.keys()
    }

    pub fn get(&self, id: NativeId) -> Option<&NativeNode> {
        self.nodes.get(id)
    }

    pub fn object(&self, id: NativeId) -> Option<&NativeObject> {
        self.nodes.get(id).map(|n| &n.object)
    }

    /// Mutable access; counted as one mutation.
    pub fn object_mut(&mut self, id: NativeId) -> Option<&mut NativeObject> {
        let node = self.nodes.get_mut(id)?;
        self.stats.mutations += 1;
        Some(&mut node.object)
    }

    /// Mutable transform access for frame-driven animation; counted as one mutation.
    pub fn transform_mut(&mut self, id: NativeId) -> Option<&mut crate::graph::Transform> {
        let transform = self.nodes.get_mut(id)?.object.transform_mut()?;
        self.stats.mutations += 1;
        Some(transform)
    }

    pub fn parent(&self, id: NativeId) -> Option<NativeId> {
        self.nodes.get(id)?.parent
    }

    pub fn children(&self, id: NativeId) -> &[NativeId] {
        self.nodes.get(id).map_or(&[], |n| &n.children)
    }

    /// Creates GPU resources for an object that is not in the graph yet.
    pub fn prepare(&self, mut object: NativeObject) -> Result<PreparedObject, GraphError> {
        if let Err(err) = object.sync_gpu(&self.pool) {
            object.release_gpu(&self.pool);
            return Err(err.into());
        }
        Ok(PreparedObject(object))
    }

    /// Releases a prepared object that will never be installed.
    pub fn discard(&self, prepared: PreparedObject) {
        let mut object = prepared.0;
        object.release_gpu(&self.pool);
    }

    /// Adds a detached object, creating its GPU resources.
    pub fn insert(&mut self, object: NativeObject) -> Result<NativeId, GraphError> {
        let prepared = self.prepare(object)?;
        Ok(self.insert_prepared(prepared))
    }

    pub fn insert_prepared(&mut self, prepared: PreparedObject) -> NativeId {
        self.stats.created += 1;
        self.nodes.insert(NativeNode { object: prepared.0, parent: None, children: Vec::new() })
    }

    /// Swaps the object behind `id`, keeping its hierarchy links.
    ///
    /// GPU resources of the new object are created before the old ones are
    /// released, so shared resources survive the swap.
    pub fn replace_object(&mut self, id: NativeId, object: NativeObject) -> Result<(), GraphError> {
        if !self.nodes.contains_key(id) {
            return Err(GraphError::Missing(id));
        }
        let prepared = self.prepare(object)?;
        self.install(id, prepared)
    }

    /// Installs a prepared object behind `id`, releasing the previous one.
    pub fn install(&mut self, id: NativeId, prepared: PreparedObject) -> Result<(), GraphError> {
        let Some(node) = self.nodes.get_mut(id) else {
            self.discard(prepared);
            return Err(GraphError::Missing(id));
        };
        let mut old = std::mem::replace(&mut node.object, prepared.0);
        old.release_gpu(&self.pool);
        self.stats.recreated += 1;
        self.stats.mutations += 1;
        Ok(())
    }

    /// Assigns one property and refreshes GPU state.
    pub fn set_prop(&mut self, id: NativeId, path: &[&str], value: &crate::graph::Value) -> Result<(), GraphError> {
        let node = self.nodes.get_mut(id).ok_or(GraphError::Missing(id))?;
        node.object.set_path(path, value)?;
        self.stats.mutations += 1;
        node.object.sync_gpu(&self.pool)?;
        Ok(())
    }

    /// Runs `f` against the object, then refreshes its GPU state. Counted as
    /// one mutation however many fields `f` touches.
    pub fn update<R>(&mut self, id: NativeId, f: impl FnOnce(&mut NativeObject) -> R) -> Result<R, GraphError> {
        let node = self.nodes.get_mut(id).ok_or(GraphError::Missing(id))?;
        let out = f(&mut node.object);
        self.stats.mutations += 1;
        node.object.sync_gpu(&self.pool)?;
        Ok(out)
    }

    /// Fills (or clears, with `None`) a named slot on `parent`.
    pub fn set_slot(&mut self, parent: NativeId, slot: &str, child: Option<NativeId>) -> Result<(), GraphError> {
        let accepted = self.object(parent).ok_or(GraphError::Missing(parent))?.slot_kind(slot)?;
        if let Some(child) = child {
            let kind = self.object(child).ok_or(GraphError::Missing(child))?.kind_name();
            if kind != accepted {
                return Err(GraphError::Incompatible { slot: slot.to_string(), child: kind });
            }
        }
        self.nodes[parent].object.write_slot(slot, child);
        self.stats.mutations += 1;
        Ok(())
    }

    pub fn slot(&self, parent: NativeId, slot: &str) -> Option<NativeId> {
        self.object(parent)?.slot(slot)
    }

    /// Appends `child` to `parent`, detaching it from any previous parent.
    pub fn add_child(&mut self, parent: NativeId, child: NativeId) -> Result<(), GraphError> {
        self.link(parent, child, None)
    }

    /// Inserts `child` before `before`; appends when `before` is not a child of `parent`.
    pub fn insert_before(&mut self, parent: NativeId, child: NativeId, before: NativeId) -> Result<(), GraphError> {
        self.link(parent, child, Some(before))
    }

    fn link(&mut self, parent: NativeId, child: NativeId, before: Option<NativeId>) -> Result<(), GraphError> {
        for id in [parent, child] {
            if !self.nodes.contains_key(id) {
                return Err(GraphError::Missing(id));
            }
        }
        if self.is_ancestor_or_self(child, parent) {
            return Err(GraphError::Cycle { parent, child });
        }

        self.unlink(child);
        let children = &mut self.nodes[parent].children;
        let at = before.and_then(|b| children.iter().position(|&c| c == b));
        match at {
            Some(i) => children.insert(i, child),
            None => children.push(child),
        }
        self.nodes[child].parent = Some(parent);
        self.stats.mutations += 1;
        Ok(())
    }

    /// Detaches `child` from `parent`. No-op when it is not linked there.
    pub fn remove_child(&mut self, parent: NativeId, child: NativeId) -> Result<(), GraphError> {
        if !self.nodes.contains_key(parent) {
            return Err(GraphError::Missing(parent));
        }
        if self.parent(child) == Some(parent) {
            self.unlink(child);
            self.stats.mutations += 1;
        }
        Ok(())
    }

    fn unlink(&mut self, child: NativeId) {
        let Some(old) = self.nodes.get_mut(child).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(node) = self.nodes.get_mut(old) {
            node.children.retain(|&c| c != child);
        }
    }

    fn is_ancestor_or_self(&self, ancestor: NativeId, mut id: NativeId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.parent(id) {
                Some(p) => id = p,
                None => return false,
            }
        }
    }

    /// Removes one node and releases its GPU resources.
    ///
    /// Children are orphaned, not disposed; see [`SceneGraph::dispose_subtree`].
    pub fn dispose(&mut self, id: NativeId) -> Option<NativeObject> {
        self.unlink(id);
        let mut node = self.nodes.remove(id)?;
        for child in node.children.drain(..) {
            if let Some(c) = self.nodes.get_mut(child) {
                c.parent = None;
            }
        }
        node.object.release_gpu(&self.pool);
        self.stats.disposed += 1;
        self.stats.mutations += 1;
        Some(node.object)
    }

    /// Disposes `id` and all its descendants, leaves first. Returns the count.
    pub fn dispose_subtree(&mut self, id: NativeId) -> usize {
        let mut order = Vec::new();
        self.traverse(id, |n, _| order.push(n));
        order.iter().rev().filter(|&&n| self.dispose(n).is_some()).count()
    }

    /// Pre-order walk over the child hierarchy.
    pub fn traverse(&self, root: NativeId, mut f: impl FnMut(NativeId, &NativeNode)) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else { continue };
            f(id, node);
            stack.extend(node.children.iter().rev());
        }
    }

    pub fn world_matrix(&self, id: NativeId) -> Mat4 {
        let mut chain = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur.and_then(|i| self.nodes.get(i)) {
            chain.push(n.object.transform().map(|t| t.local_matrix()).unwrap_or_default());
            cur = n.parent;
        }
        chain.into_iter().rev().fold(Mat4::IDENTITY, |acc, m| acc * m)
    }

    /// Visible, complete meshes under `root` in draw order.
    ///
    /// With a camera, meshes marked `frustum_culled` outside its frustum are skipped.
    pub fn draw_list(&self, root: NativeId, camera: Option<NativeId>) -> Vec<DrawCall> {
        let frustum = camera.and_then(|cam| match self.object(cam) {
            Some(NativeObject::Camera(c)) => {
                let view = Camera::view_matrix(&self.world_matrix(cam));
                Some(Frustum::from_matrix(&(c.projection_matrix() * view)))
            }
            _ => None,
        });

        let mut calls = Vec::new();
        let base = self.parent(root).map(|p| self.world_matrix(p)).unwrap_or_default();
        self.collect_draws(root, base, frustum.as_ref(), &mut calls);
        calls.sort_by(|a, b| a.key.cmp(&b.key));
        calls
    }

    fn collect_draws(&self, id: NativeId, parent: Mat4, frustum: Option<&Frustum>, out: &mut Vec<DrawCall>) {
        let Some(node) = self.nodes.get(id) else { return };
        let transform = node.object.transform();
        if transform.is_some_and(|t| !t.visible) {
            return;
        }
        let world = match transform {
            Some(t) => parent * t.local_matrix(),
            None => parent,
        };

        if let NativeObject::Mesh(mesh) = &node.object {
            if let Some(call) = self.draw_call(id, mesh, world, frustum, out.len() as u32) {
                out.push(call);
            }
        }
        for &child in &node.children {
            self.collect_draws(child, world, frustum, out);
        }
    }

    fn draw_call(&self, id: NativeId, mesh: &Mesh, world: Mat4, frustum: Option<&Frustum>, order: u32) -> Option<DrawCall> {
        let (geometry_id, program_id) = (mesh.geometry?, mesh.program?);
        let NativeObject::Geometry(geometry) = self.object(geometry_id)? else { return None };
        let NativeObject::Program(program) = self.object(program_id)? else { return None };

        if let (true, Some(frustum), Some((center, radius))) =
            (mesh.frustum_culled, frustum, geometry.bounding_sphere())
        {
            let center = world.transform_point(center);
            if !frustum.intersects_sphere(center, radius * world.max_scale_on_axis()) {
                return None;
            }
        }

        Some(DrawCall {
            key: SortKey { transparent: program.transparent, render_order: mesh.render_order, order },
            mesh: id,
            geometry: geometry_id,
            program: program_id,
            world,
            mode: mesh.mode,
            vertex_count: geometry.vertex_count(),
            index_count: geometry.index_count(),
        })
    }

    /// Steps an orbit control and moves its camera. Returns `false` when the
    /// orbit or its camera is missing.
    pub fn update_orbit(&mut self, id: NativeId) -> bool {
        let Some(NativeObject::Orbit(orbit)) = self.object(id) else { return false };
        let Some(camera) = orbit.camera else { return false };
        let Some(position) = self.object(camera).and_then(|o| o.transform()).map(|t| t.position) else {
            return false;
        };

        let (next, target) = match &mut self.nodes[id].object {
            NativeObject::Orbit(orbit) => (orbit.advance(position), orbit.target),
            _ => return false,
        };
        match self.transform_mut(camera) {
            Some(t) => {
                t.position = next;
                t.look_at(target);
                true
            }
            None => false,
        }
    }

    /// Disposes every node.
    pub fn clear(&mut self) {
        let ids: Vec<_> = self.nodes.keys().collect();
        for id in ids {
            self.dispose(id);
        }
    }
}

impl Drop for SceneGraph {
    fn drop(&mut self) {
        for (_, node) in self.nodes.iter_mut() {
            node.object.release_gpu(&self.pool);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::coords::Vec3;
    use crate::device::HeadlessDevice;

    fn graph() -> SceneGraph {
        SceneGraph::new(ResourcePool::new(Rc::new(HeadlessDevice::new())))
    }

    fn textured_mesh(g: &mut SceneGraph) -> (NativeId, NativeId, NativeId) {
        let mesh = g.insert(NativeObject::Mesh(Mesh::default())).unwrap();
        let geo = g.insert(NativeObject::Geometry(shapes::Shape::from_tag("box").unwrap().build())).unwrap();
        let prog = g.insert(NativeObject::Program(Program::new("vs", "fs"))).unwrap();
        g.set_slot(mesh, "geometry", Some(geo)).unwrap();
        g.set_slot(mesh, "program", Some(prog)).unwrap();
        (mesh, geo, prog)
    }

    #[test]
    fn hierarchy_links_and_reorders() {
        let mut g = graph();
        let root = g.insert(NativeObject::Transform(Transform::default())).unwrap();
        let a = g.insert(NativeObject::Transform(Transform::default())).unwrap();
        let b = g.insert(NativeObject::Transform(Transform::default())).unwrap();
        g.add_child(root, a).unwrap();
        g.insert_before(root, b, a).unwrap();
        assert_eq!(g.children(root), &[b, a]);

        // re-adding moves rather than duplicates
        g.add_child(root, b).unwrap();
        assert_eq!(g.children(root), &[a, b]);
        assert!(matches!(g.add_child(a, root), Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn slots_validate_child_kind() {
        let mut g = graph();
        let (mesh, geo, prog) = textured_mesh(&mut g);
        assert_eq!(g.slot(mesh, "geometry"), Some(geo));
        assert!(matches!(g.set_slot(mesh, "geometry", Some(prog)), Err(GraphError::Incompatible { .. })));
        assert!(matches!(g.set_slot(mesh, "material", Some(prog)), Err(GraphError::NoSuchSlot { .. })));
    }

    #[test]
    fn dispose_subtree_releases_exclusive_buffers() {
        let mut g = graph();
        let root = g.insert(NativeObject::Transform(Transform::default())).unwrap();
        let (mesh, geo, prog) = textured_mesh(&mut g);
        g.add_child(root, mesh).unwrap();
        assert_eq!(g.pool().stats().live_buffers, 4);

        g.dispose(geo);
        g.dispose(prog);
        assert_eq!(g.dispose_subtree(root), 2);
        assert!(g.is_empty());
        assert_eq!(g.pool().stats().live(), 0);
        assert_eq!(g.stats().disposed, 4);
    }

    #[test]
    fn replace_object_keeps_links_and_counts() {
        let mut g = graph();
        let root = g.insert(NativeObject::Transform(Transform::default())).unwrap();
        let (mesh, _, prog) = textured_mesh(&mut g);
        g.add_child(root, mesh).unwrap();
        g.replace_object(prog, NativeObject::Program(Program::new("vs", "fs2"))).unwrap();
        assert_eq!(g.stats().recreated, 1);
        assert_eq!(g.pool().stats().live_programs, 1);
        assert_eq!(g.parent(mesh), Some(root));
    }

    #[test]
    fn prepared_objects_hold_gpu_until_discarded() {
        let mut g = graph();
        let prepared = g.prepare(NativeObject::Program(Program::new("vs", "fs"))).unwrap();
        assert_eq!(prepared.object().kind_name(), "program");
        assert_eq!(g.pool().stats().live_programs, 1);
        g.discard(prepared);
        assert_eq!(g.pool().stats().live_programs, 0);

        let prepared = g.prepare(NativeObject::Transform(Transform::default())).unwrap();
        let stale = g.insert(NativeObject::Transform(Transform::default())).unwrap();
        g.dispose(stale);
        assert!(matches!(g.install(stale, prepared), Err(GraphError::Missing(_))));
        assert_eq!(g.stats().recreated, 0);
    }

    #[test]
    fn update_batches_assignments_into_one_mutation() {
        let mut g = graph();
        let (_, _, prog) = textured_mesh(&mut g);
        let before = g.stats().mutations;
        let applied = g
            .update(prog, |object| {
                object.set_path(&["uniforms", "uColor"], &Value::from([1.0f32, 0.0, 0.0])).is_ok()
                    && object.set_path(&["transparent"], &Value::from(true)).is_ok()
            })
            .unwrap();
        assert!(applied);
        assert_eq!(g.stats().mutations, before + 1);
        assert_eq!(g.pool().stats().live_programs, 1);
    }

    #[test]
    fn world_matrix_composes_parents() {
        let mut g = graph();
        let outer = g.insert(NativeObject::Transform(Transform::default())).unwrap();
        let inner = g.insert(NativeObject::Transform(Transform::default())).unwrap();
        g.add_child(outer, inner).unwrap();
        g.set_prop(outer, &["position"], &Value::from([1.0f32, 0.0, 0.0])).unwrap();
        g.set_prop(inner, &["position", "y"], &Value::from(2.0f32)).unwrap();
        assert_eq!(g.world_matrix(inner).translation(), Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn draw_list_orders_and_culls() {
        let mut g = graph();
        let root = g.insert(NativeObject::Transform(Transform::default())).unwrap();
        let (a, _, _) = textured_mesh(&mut g);
        let (b, _, _) = textured_mesh(&mut g);
        let (hidden, _, _) = textured_mesh(&mut g);
        for m in [a, b, hidden] {
            g.add_child(root, m).unwrap();
            g.set_prop(m, &["position", "z"], &Value::from(-5.0f32)).unwrap();
        }
        g.set_prop(a, &["renderOrder"], &Value::from(1.0f32)).unwrap();
        g.set_prop(hidden, &["visible"], &Value::from(false)).unwrap();

        let calls = g.draw_list(root, None);
        assert_eq!(calls.iter().map(|c| c.mesh).collect::<Vec<_>>(), vec![b, a]);
        assert_eq!(calls[0].index_count, 36);

        let cam = g.insert(NativeObject::Camera(Camera::default())).unwrap();
        g.set_prop(b, &["position", "z"], &Value::from(50.0f32)).unwrap();
        let culled = g.draw_list(root, Some(cam));
        assert_eq!(culled.iter().map(|c| c.mesh).collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn unchanged_reads_do_not_count_as_mutations() {
        let mut g = graph();
        let (mesh, _, _) = textured_mesh(&mut g);
        let before = g.stats().mutations;
        let _ = g.object(mesh);
        let _ = g.draw_list(mesh, None);
        assert_eq!(g.stats().mutations, before);
    }

    #[test]
    fn orbit_moves_its_camera() {
        let mut g = graph();
        let cam = g.insert(NativeObject::Camera(Camera::default())).unwrap();
        g.set_prop(cam, &["position"], &Value::from([0.0f32, 0.0, 5.0])).unwrap();
        let orbit = g.insert(NativeObject::Orbit(Orbit::new(Some(cam)))).unwrap();
        g.set_prop(orbit, &["ease"], &Value::from(1.0f32)).unwrap();
        if let Some(NativeObject::Orbit(o)) = g.object_mut(orbit) {
            o.zoom(0.5);
        }
        assert!(g.update_orbit(orbit));
        let pos = g.object(cam).unwrap().transform().unwrap().position;
        assert!((pos.z - 2.5).abs() < 1e-3);
    }
}

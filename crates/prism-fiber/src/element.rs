//! Declarative element tree.
//!
//! A [`Node`] is a cheap description of what the scene should look like. The
//! reconciler diffs successive trees and drives the host adapter with the
//! difference; nodes never own native objects themselves.

use std::any::TypeId;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use prism_engine::graph::{NativeId, Value};

use crate::error::RenderError;
use crate::hooks::Scope;

// ── Props ─────────────────────────────────────────────────────────────────

/// Ordered prop list. Later assignments to the same key replace earlier ones
/// but keep the original position, so props apply in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Props(Vec<(String, Value)>);

impl Props {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let (key, value) = (key.into(), value.into());
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.0.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let at = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(at).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Props {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Props::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

// ── NodeRef ───────────────────────────────────────────────────────────────

/// Handle filled with the native object of the element it is attached to.
///
/// Set after the element's instance is placed, cleared when it is removed.
/// Frame callbacks use it to reach the object through `FrameCtx::graph`.
#[derive(Clone, Default)]
pub struct NodeRef(Rc<Cell<Option<NativeId>>>);

impl NodeRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<NativeId> {
        self.0.get()
    }

    pub(crate) fn set(&self, id: Option<NativeId>) {
        self.0.set(id);
    }

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeRef").field(&self.get()).finish()
    }
}

// ── Component ─────────────────────────────────────────────────────────────

/// A reusable piece of tree with its own hook state.
///
/// Implement it on a struct holding the component's inputs, or use a closure
/// through [`Node::render_fn`]. Two component nodes match across renders when
/// their concrete types are equal.
///
/// ```rust,ignore
/// struct Spinner { speed: f32 }
///
/// impl Component for Spinner {
///     fn render(&self, scope: &mut Scope<'_>) -> Result<Node, RenderError> {
///         let mesh = scope.use_ref();
///         let speed = self.speed;
///         scope.use_frame(0, move |ctx| {
///             if let Some(t) = mesh.get().and_then(|id| ctx.graph.transform_mut(id)) {
///                 t.rotation.y += speed * ctx.time.delta;
///             }
///             Ok(())
///         });
///         Ok(element("mesh").node_ref(mesh.clone()).into())
///     }
/// }
/// ```
pub trait Component: 'static {
    fn render(&self, scope: &mut Scope<'_>) -> Result<Node, RenderError>;
}

impl<F> Component for F
where
    F: Fn(&mut Scope<'_>) -> Result<Node, RenderError> + 'static,
{
    fn render(&self, scope: &mut Scope<'_>) -> Result<Node, RenderError> {
        self(scope)
    }
}

#[derive(Clone)]
pub struct ComponentElement {
    pub(crate) key: Option<String>,
    pub(crate) type_id: TypeId,
    pub(crate) name: &'static str,
    pub(crate) component: Rc<dyn Component>,
}

impl fmt::Debug for ComponentElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentElement").field("name", &self.name).field("key", &self.key).finish()
    }
}

// ── HostElement ───────────────────────────────────────────────────────────

/// An element of the native vocabulary (`mesh`, `program`, `box`, ...).
#[derive(Debug, Clone)]
pub struct HostElement {
    pub tag: String,
    pub key: Option<String>,
    pub props: Props,
    pub children: Vec<Node>,
    pub node_ref: Option<NodeRef>,
}

/// Starts a host element.
///
/// ```rust,ignore
/// let tree = element("mesh")
///     .prop("position", [0.0, 1.0, 0.0])
///     .child(element("box").prop("args", [1.0, 1.0, 1.0]))
///     .child(element("program").prop("vertex", VS).prop("fragment", FS));
/// ```
pub fn element(tag: impl Into<String>) -> HostElement {
    HostElement {
        tag: tag.into(),
        key: None,
        props: Props::new(),
        children: Vec::new(),
        node_ref: None,
    }
}

impl HostElement {
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key, value);
        self
    }

    pub fn props(mut self, props: Props) -> Self {
        for (k, v) in props.0 {
            self.props.insert(k, v);
        }
        self
    }

    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I, N>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Node>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    pub fn node_ref(mut self, node_ref: NodeRef) -> Self {
        self.node_ref = Some(node_ref);
        self
    }
}

// ── Node ──────────────────────────────────────────────────────────────────

/// One position in a declarative tree.
#[derive(Debug, Clone, Default)]
pub enum Node {
    /// Renders nothing but still occupies its position among siblings.
    #[default]
    Empty,
    Host(HostElement),
    Component(ComponentElement),
    /// Unkeyed group of siblings.
    Fragment(Vec<Node>),
}

impl Node {
    pub fn component<C: Component>(component: C) -> Node {
        Node::Component(ComponentElement {
            key: None,
            type_id: TypeId::of::<C>(),
            name: std::any::type_name::<C>(),
            component: Rc::new(component),
        })
    }

    /// Closure component. Each closure expression is its own component type.
    pub fn render_fn<F>(f: F) -> Node
    where
        F: Fn(&mut Scope<'_>) -> Result<Node, RenderError> + 'static,
    {
        Node::component(f)
    }

    pub fn fragment<I, N>(children: I) -> Node
    where
        I: IntoIterator<Item = N>,
        N: Into<Node>,
    {
        Node::Fragment(children.into_iter().map(Into::into).collect())
    }

    /// Sets the reconciliation key of a host or component node.
    pub fn with_key(mut self, key: impl Into<String>) -> Node {
        match &mut self {
            Node::Host(h) => h.key = Some(key.into()),
            Node::Component(c) => c.key = Some(key.into()),
            Node::Empty | Node::Fragment(_) => log::warn!("key ignored on an empty or fragment node"),
        }
        self
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Node::Host(h) => h.key.as_deref(),
            Node::Component(c) => c.key.as_deref(),
            Node::Empty | Node::Fragment(_) => None,
        }
    }
}

impl From<HostElement> for Node {
    fn from(el: HostElement) -> Self {
        Node::Host(el)
    }
}

impl From<Vec<Node>> for Node {
    fn from(children: Vec<Node>) -> Self {
        Node::Fragment(children)
    }
}

impl<T: Into<Node>> From<Option<T>> for Node {
    fn from(node: Option<T>) -> Self {
        node.map_or(Node::Empty, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn props_keep_declaration_order_on_overwrite() {
        let mut props = Props::new().with("position", 1.0).with("rotation.y", 0.5);
        assert_eq!(props.insert("position", 2.0), Some(Value::Number(1.0)));
        assert_eq!(props.keys().collect::<Vec<_>>(), ["position", "rotation.y"]);
        assert_eq!(props.remove("position"), Some(Value::Number(2.0)));
        assert_eq!(props.len(), 1);
    }

    #[test]
    fn builder_collects_children_and_key() {
        let node: Node = element("mesh")
            .key("a")
            .child(element("box"))
            .child(None::<HostElement>)
            .children([element("program")])
            .into();
        let Node::Host(host) = &node else { panic!("expected host") };
        assert_eq!(node.key(), Some("a"));
        assert_eq!(host.children.len(), 3);
        assert!(matches!(host.children[1], Node::Empty));
    }

    #[test]
    fn closure_components_have_distinct_types() {
        let a = Node::render_fn(|_| Ok(Node::Empty));
        let b = Node::render_fn(|_| Ok(Node::Empty));
        let (Node::Component(a), Node::Component(b)) = (a, b) else { panic!("expected components") };
        assert_ne!(a.type_id, b.type_id);
    }

    #[test]
    fn node_refs_share_their_cell() {
        let r = NodeRef::new();
        let copy = r.clone();
        assert!(r.ptr_eq(&copy));
        assert!(!r.ptr_eq(&NodeRef::new()));
        assert_eq!(copy.get(), None);
    }
}

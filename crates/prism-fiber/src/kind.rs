//! Element vocabulary.
//!
//! Maps tags to native object kinds and knows how each kind is constructed:
//! which props are constructor inputs (changing them re-creates the object),
//! which slot a kind attaches to by default, and how `args` are read.

use prism_engine::graph::shapes::Shape;
use prism_engine::graph::{
    Camera, Geometry, Mesh, NativeObject, Orbit, Program, PropError, Texture, Transform, Value,
};

use crate::context::Environment;
use crate::element::Props;
use crate::error::PrismError;

/// Props the adapter interprets itself instead of assigning them.
pub const RESERVED_PROPS: [&str; 3] = ["args", "attach", "key"];

/// Closed set of element kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Transform,
    Mesh,
    Program,
    Geometry,
    /// Geometry produced by a generator; carries the generator tag.
    Shape(&'static str),
    Camera,
    Orbit,
    Texture,
    /// Anything else. Creating one fails with `UnknownElement`.
    Unknown,
}

impl ElementKind {
    pub fn parse(tag: &str) -> ElementKind {
        match tag {
            "transform" | "group" => ElementKind::Transform,
            "mesh" => ElementKind::Mesh,
            "program" => ElementKind::Program,
            "geometry" => ElementKind::Geometry,
            "box" => ElementKind::Shape("box"),
            "plane" => ElementKind::Shape("plane"),
            "sphere" => ElementKind::Shape("sphere"),
            "cylinder" => ElementKind::Shape("cylinder"),
            "torus" => ElementKind::Shape("torus"),
            "triangle" => ElementKind::Shape("triangle"),
            "camera" => ElementKind::Camera,
            "orbit" => ElementKind::Orbit,
            "texture" => ElementKind::Texture,
            _ => ElementKind::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Transform => "transform",
            ElementKind::Mesh => "mesh",
            ElementKind::Program => "program",
            ElementKind::Geometry => "geometry",
            ElementKind::Shape(tag) => tag,
            ElementKind::Camera => "camera",
            ElementKind::Orbit => "orbit",
            ElementKind::Texture => "texture",
            ElementKind::Unknown => "unknown",
        }
    }

    /// Slot filled on the parent when no explicit `attach` is given.
    pub fn default_attach(self) -> Option<&'static str> {
        match self {
            ElementKind::Geometry | ElementKind::Shape(_) => Some("geometry"),
            ElementKind::Program => Some("program"),
            _ => None,
        }
    }

    /// `true` for props that feed the constructor.
    pub fn is_constructor_key(self, key: &str) -> bool {
        match self {
            ElementKind::Program => matches!(key, "vertex" | "fragment"),
            ElementKind::Shape(tag) => Shape::from_tag(tag).is_some_and(|s| s.has_param(key)),
            _ => false,
        }
    }

    /// `true` when changing `key` requires a new native object.
    pub fn is_structural(self, key: &str) -> bool {
        RESERVED_PROPS.contains(&key) || self.is_constructor_key(key)
    }
}

/// Splits a prop name into a path. Both `rotation.y` and `rotation-y` work.
pub fn prop_path(key: &str) -> Vec<&str> {
    key.split(['.', '-']).filter(|s| !s.is_empty()).collect()
}

/// Normalizes an attach name to the dotted form slots use.
pub fn normalize_slot(name: &str) -> String {
    prop_path(name).join(".")
}

/// Slot an instance of `kind` claims on its parent, if any.
pub fn attach_slot(kind: ElementKind, tag: &str, props: &Props) -> Result<Option<String>, PrismError> {
    match props.get("attach") {
        None | Some(Value::Null) => Ok(kind.default_attach().map(str::to_string)),
        Some(Value::Str(name)) => Ok(Some(normalize_slot(name))),
        Some(other) => Err(PrismError::invalid_prop(
            tag,
            "attach",
            PropError::Type { path: "attach".to_string(), expected: "string", found: other.type_name() },
        )),
    }
}

/// Builds the native object for an element: constructor inputs first, then
/// `args`, then the remaining props in declaration order.
pub fn construct(kind: ElementKind, tag: &str, props: &Props, env: &Environment) -> Result<NativeObject, PrismError> {
    let args = props.get("args").filter(|a| !a.is_null());
    let mut object = match kind {
        ElementKind::Transform => NativeObject::Transform(Transform::default()),
        ElementKind::Mesh => NativeObject::Mesh(Mesh::default()),
        ElementKind::Geometry => NativeObject::Geometry(Geometry::new()),
        ElementKind::Texture => NativeObject::Texture(Texture::new(None)),
        ElementKind::Orbit => NativeObject::Orbit(Orbit::new(Some(env.camera))),
        ElementKind::Camera => {
            let mut camera = Camera::default();
            camera.aspect = env.viewport.aspect();
            NativeObject::Camera(camera)
        }
        ElementKind::Program => {
            let source = |name: &str| -> Result<String, PrismError> {
                let value = props.get(name).or_else(|| args.and_then(|a| args_map(a)?.get(name)));
                match value {
                    Some(Value::Str(s)) => Ok(s.clone()),
                    other => Err(PrismError::invalid_prop(
                        tag,
                        name,
                        PropError::Type {
                            path: name.to_string(),
                            expected: "shader source string",
                            found: other.map_or("nothing", Value::type_name),
                        },
                    )),
                }
            };
            NativeObject::Program(Program::new(source("vertex")?, source("fragment")?))
        }
        ElementKind::Shape(shape_tag) => {
            let mut shape = Shape::from_tag(shape_tag).ok_or_else(|| PrismError::UnknownElement(tag.to_string()))?;
            if let Some(args) = args {
                shape.apply_args(args).map_err(|e| PrismError::invalid_prop(tag, "args", e))?;
            }
            for (key, value) in props.iter().filter(|(k, _)| kind.is_constructor_key(k)) {
                shape.set_param(key, value).map_err(|e| PrismError::invalid_prop(tag, key, e))?;
            }
            NativeObject::Geometry(shape.build())
        }
        ElementKind::Unknown => return Err(PrismError::UnknownElement(tag.to_string())),
    };

    // shapes consumed their args above
    if let (Some(args), false) = (args, matches!(kind, ElementKind::Shape(_))) {
        let map = args_map(args).ok_or_else(|| {
            PrismError::invalid_prop(
                tag,
                "args",
                PropError::Type { path: "args".to_string(), expected: "map", found: args.type_name() },
            )
        })?;
        for (key, value) in map.iter().filter(|(k, _)| !kind.is_constructor_key(k)) {
            assign(&mut object, tag, key, value)?;
        }
    }

    for (key, value) in props.iter() {
        if kind.is_structural(key) {
            continue;
        }
        assign(&mut object, tag, key, value)?;
    }
    Ok(object)
}

/// `{..}` or `[{..}]`.
fn args_map(args: &Value) -> Option<&std::collections::BTreeMap<String, Value>> {
    match args {
        Value::Map(map) => Some(map),
        Value::List(items) => match items.as_slice() {
            [Value::Map(map)] => Some(map),
            _ => None,
        },
        _ => None,
    }
}

/// Assigns one prop. Returns `false` when the path does not exist, which is
/// logged and skipped; type mismatches are errors.
pub fn assign(object: &mut NativeObject, tag: &str, key: &str, value: &Value) -> Result<bool, PrismError> {
    let path = prop_path(key);
    assign_path(object, &path, value).map_err(|e| PrismError::invalid_prop(tag, key, e)).map(|applied| {
        if !applied {
            log::warn!("`{tag}` has no property `{key}`; ignored");
        }
        applied
    })
}

/// Tries the path as a whole, then descends into map values so nested maps
/// such as `uniforms: { uColor: .. }` assign field by field.
fn assign_path(object: &mut NativeObject, path: &[&str], value: &Value) -> Result<bool, PropError> {
    match object.set_path(path, value) {
        Ok(()) => Ok(true),
        Err(PropError::UnknownPath(_)) => match value {
            Value::Map(map) if !map.is_empty() => {
                let mut applied = false;
                for (field, inner) in map {
                    let mut nested = path.to_vec();
                    nested.push(field);
                    applied |= assign_path(object, &nested, inner)?;
                }
                Ok(applied)
            }
            _ => Ok(false),
        },
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use prism_engine::device::{HeadlessDevice, ResourcePool};
    use prism_engine::graph::SceneGraph;

    use super::*;
    use crate::context::{Clock, Viewport};

    fn env() -> Environment {
        let device = Rc::new(HeadlessDevice::new());
        let mut graph = SceneGraph::new(ResourcePool::new(device.clone()));
        let scene = graph.insert(NativeObject::Transform(Transform::default())).unwrap();
        let camera = graph.insert(NativeObject::Camera(Camera::default())).unwrap();
        Environment {
            device,
            graph: Rc::new(RefCell::new(graph)),
            scene,
            camera,
            viewport: Viewport::new(400.0, 200.0),
            clock: Clock::starting_at(std::time::Instant::now()),
            clear_color: [0.0; 4],
        }
    }

    #[test]
    fn parses_vocabulary_and_aliases() {
        assert_eq!(ElementKind::parse("group"), ElementKind::Transform);
        assert_eq!(ElementKind::parse("torus"), ElementKind::Shape("torus"));
        assert_eq!(ElementKind::parse("div"), ElementKind::Unknown);
        assert_eq!(ElementKind::parse("box").default_attach(), Some("geometry"));
        assert_eq!(ElementKind::Mesh.default_attach(), None);
    }

    #[test]
    fn constructor_keys_are_structural() {
        assert!(ElementKind::Program.is_structural("vertex"));
        assert!(ElementKind::Shape("sphere").is_structural("widthSegments"));
        assert!(ElementKind::Mesh.is_structural("args"));
        assert!(!ElementKind::Program.is_structural("uniforms.uColor"));
    }

    #[test]
    fn both_path_separators_are_accepted() {
        assert_eq!(prop_path("rotation-y"), ["rotation", "y"]);
        assert_eq!(normalize_slot("uniforms-tMap"), "uniforms.tMap");
    }

    #[test]
    fn shapes_read_positional_args_and_named_params() {
        let props = Props::new().with("args", vec![Value::from(2.0), Value::from(3.0)]).with("widthSegments", 2);
        let object = construct(ElementKind::Shape("plane"), "plane", &props, &env()).unwrap();
        let NativeObject::Geometry(geometry) = object else { panic!("expected geometry") };
        assert_eq!(geometry.vertex_count(), 6);
    }

    #[test]
    fn program_takes_sources_and_nested_uniforms() {
        let uniforms: Value = [("uColor".to_string(), Value::from([1.0f32, 0.0, 0.0]))]
            .into_iter()
            .collect::<std::collections::BTreeMap<_, _>>()
            .into();
        let props = Props::new().with("vertex", "vs").with("fragment", "fs").with("uniforms", uniforms);
        let NativeObject::Program(p) = construct(ElementKind::Program, "program", &props, &env()).unwrap() else {
            panic!("expected program")
        };
        assert_eq!(p.vertex(), "vs");
        assert!(p.uniform("uColor").is_some());

        let missing = construct(ElementKind::Program, "program", &Props::new(), &env());
        assert!(matches!(missing, Err(PrismError::InvalidProp { .. })));
    }

    #[test]
    fn unknown_paths_are_skipped_and_type_errors_abort() {
        let env = env();
        let ok = construct(ElementKind::Mesh, "mesh", &Props::new().with("wobble", 1.0), &env);
        assert!(ok.is_ok());
        let bad = construct(ElementKind::Mesh, "mesh", &Props::new().with("visible", "yes"), &env);
        assert!(matches!(bad, Err(PrismError::InvalidProp { .. })));
        assert!(matches!(construct(ElementKind::Unknown, "div", &Props::new(), &env), Err(PrismError::UnknownElement(_))));
    }

    #[test]
    fn cameras_and_orbits_pick_up_the_environment() {
        let env = env();
        let NativeObject::Camera(c) = construct(ElementKind::Camera, "camera", &Props::new(), &env).unwrap() else {
            panic!("expected camera")
        };
        assert_eq!(c.aspect, 2.0);
        let NativeObject::Orbit(o) = construct(ElementKind::Orbit, "orbit", &Props::new(), &env).unwrap() else {
            panic!("expected orbit")
        };
        assert_eq!(o.camera, Some(env.camera));
    }

    #[test]
    fn attach_defaults_and_overrides() {
        let props = Props::new().with("attach", "uniforms-tMap");
        assert_eq!(attach_slot(ElementKind::Texture, "texture", &props).unwrap().as_deref(), Some("uniforms.tMap"));
        assert_eq!(attach_slot(ElementKind::Program, "program", &Props::new()).unwrap().as_deref(), Some("program"));
        assert!(attach_slot(ElementKind::Texture, "texture", &Props::new().with("attach", 3.0)).is_err());
    }
}

// ── Value ─────────────────────────────────────────────────────────────────

/// A literal value in a property.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// Numeric literal: `16`, `-0.5`, `1e-3`
    Number(f64),
    /// Quoted string: `"hello"`
    Str(String),
    /// Unquoted identifier: enum-like values such as `triangles` or `repeat`
    Ident(String),
    /// Color literal `#rrggbb[aa]`, straight-alpha bytes
    Color([u8; 4]),
    /// `[a, b, c]`; commas are optional
    List(Vec<Value>),
    /// `{ key: value ... }`, in source order
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String content of a `Str` or `Ident`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Ident(s) => Some(s),
            _ => None,
        }
    }
}

// ── Prop ──────────────────────────────────────────────────────────────────

/// A single `key: value` property inside a node block.
///
/// Keys may be dotted paths: `rotation.y`, `uniforms.uColor`.
#[derive(Debug, Clone, PartialEq)]
pub struct Prop {
    pub key: String,
    pub value: Value,
    pub line: usize,
    pub col: usize,
}

// ── Node ──────────────────────────────────────────────────────────────────

/// An element instantiation in the tree.
///
/// ```psm
/// mesh {
///     position: [0, 1, 0]
///     box { args: [1, 1, 1] }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Element tag or imported alias: `"mesh"`, `"box"`, `"Ship"`.
    pub tag: String,
    pub props: Vec<Prop>,
    pub children: Vec<Node>,
    pub line: usize,
    pub col: usize,
}

impl Node {
    /// Look up a property value by key.
    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.props.iter().find(|p| p.key == key).map(|p| &p.value)
    }
}

// ── Import ────────────────────────────────────────────────────────────────

/// `use "path.psm" as Alias`
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub path: String,
    pub alias: String,
}

// ── Document ──────────────────────────────────────────────────────────────

/// A parsed `.psm` file: leading imports followed by one root node.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub imports: Vec<Import>,
    pub root: Node,
}

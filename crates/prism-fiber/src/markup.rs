//! Element trees from `.psm` scene markup.
//!
//! ```rust,ignore
//! let mut loader = MarkupLoader::new();
//! loader.parse_and_register("Ship", include_str!("../scenes/ship.psm"))?;
//! let doc = loader.parse(r#"transform { Ship { position.x: 2 } }"#)?;
//! prism_fiber::render(loader.build(&doc)?, "main", None)?;
//! ```
//!
//! A registered alias expands to its document's root. Props written on the
//! alias node override the root's props and its children are appended after
//! the root's own. A `key` prop becomes the element key.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use prism_engine::graph::Value;
use prism_markup::ast::{self, Document};
use prism_markup::{ParseError, parse_str};

use crate::element::{HostElement, Node, element};
use crate::error::PrismError;

/// Registry of markup documents, and the builder for their trees.
#[derive(Debug, Default)]
pub struct MarkupLoader {
    registry: HashMap<String, Document>,
}

impl MarkupLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&self, source: &str) -> Result<Document, PrismError> {
        Ok(parse_str(source)?)
    }

    /// Makes `doc` available under `alias`.
    pub fn register(&mut self, alias: impl Into<String>, doc: Document) {
        self.registry.insert(alias.into(), doc);
    }

    pub fn parse_and_register(&mut self, alias: impl Into<String>, source: &str) -> Result<(), PrismError> {
        let doc = parse_str(source)?;
        self.register(alias, doc);
        Ok(())
    }

    pub fn is_registered(&self, alias: &str) -> bool {
        self.registry.contains_key(alias)
    }

    /// Reads and parses `path`, registering its `use` imports (resolved
    /// relative to the file) along the way.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<Document, PrismError> {
        self.load_inner(path.as_ref(), &mut Vec::new())
    }

    fn load_inner(&mut self, path: &Path, loading: &mut Vec<PathBuf>) -> Result<Document, PrismError> {
        // `a/../a/x.psm` and `a/x.psm` are one file on the import stack
        let path = path.canonicalize().map_err(|source| PrismError::Io { path: path.to_path_buf(), source })?;
        if loading.contains(&path) {
            return Err(PrismError::Config(format!("import cycle through {}", path.display())));
        }
        let source =
            std::fs::read_to_string(&path).map_err(|source| PrismError::Io { path: path.clone(), source })?;
        let doc = parse_str(&source)?;

        let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        loading.push(path);
        for import in &doc.imports {
            if self.registry.contains_key(&import.alias) {
                continue;
            }
            let imported = self.load_inner(&base.join(&import.path), loading)?;
            log::debug!("registered `{}` from {}", import.alias, import.path);
            self.registry.insert(import.alias.clone(), imported);
        }
        loading.pop();
        Ok(doc)
    }

    /// Builds the element tree of `doc`. Aliases must be registered by now;
    /// unregistered tags are kept as element tags.
    pub fn build(&self, doc: &Document) -> Result<Node, PrismError> {
        Ok(self.build_node(&doc.root, &mut Vec::new())?.into())
    }

    fn build_node(&self, node: &ast::Node, expanding: &mut Vec<String>) -> Result<HostElement, PrismError> {
        let mut el = match self.registry.get(&node.tag) {
            Some(doc) => {
                if expanding.contains(&node.tag) {
                    return Err(ParseError {
                        message: format!("`{}` expands into itself", node.tag),
                        line: node.line,
                        col: node.col,
                    }
                    .into());
                }
                expanding.push(node.tag.clone());
                let base = self.build_node(&doc.root, expanding);
                expanding.pop();
                base?
            }
            None => element(node.tag.as_str()),
        };

        for prop in &node.props {
            if prop.key == "key" {
                el.key = Some(key_text(&prop.value));
            } else {
                el.props.insert(prop.key.as_str(), convert(&prop.value));
            }
        }
        for child in &node.children {
            el.children.push(self.build_node(child, expanding)?.into());
        }
        Ok(el)
    }
}

fn key_text(value: &ast::Value) -> String {
    match value {
        ast::Value::Str(s) | ast::Value::Ident(s) => s.clone(),
        ast::Value::Number(n) => n.to_string(),
        other => format!("{other:?}"),
    }
}

/// Markup literal to prop value. Colors become four floats in `0..=1`.
pub fn convert(value: &ast::Value) -> Value {
    match value {
        ast::Value::Null => Value::Null,
        ast::Value::Bool(b) => Value::Bool(*b),
        ast::Value::Number(n) => Value::Number(*n),
        ast::Value::Str(s) | ast::Value::Ident(s) => Value::Str(s.clone()),
        ast::Value::Color(rgba) => Value::List(rgba.iter().map(|&c| Value::Number(f64::from(c) / 255.0)).collect()),
        ast::Value::List(items) => Value::List(items.iter().map(convert).collect()),
        ast::Value::Map(entries) => {
            Value::Map(entries.iter().map(|(k, v)| (k.clone(), convert(v))).collect::<BTreeMap<_, _>>())
        }
    }
}

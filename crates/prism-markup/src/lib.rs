//! Lexer, parser, and AST for the **prism scene markup** (`.psm`).
//!
//! This crate is intentionally dependency-free so editors and linters can
//! read scene files without pulling in any engine or GPU code.
//!
//! # Structure
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`ast`] | `Document`, `Node`, `Prop`, `Value`, `Import` |
//! | [`error`] | `ParseError` |
//! | [`lexer`] | `Lexer`, `Token` |
//! | [`parser`] | `parse_str` entry point |
//!
//! # Quick start
//!
//! ```rust
//! use prism_markup::parse_str;
//!
//! let src = r#"
//!     mesh {
//!         rotation.y: 0.5
//!         box { args: [1, 1, 1] }
//!         program { uniforms.uColor: #ff0000 }
//!     }
//! "#;
//!
//! let doc = parse_str(src).unwrap();
//! assert_eq!(doc.root.tag, "mesh");
//! assert_eq!(doc.root.children.len(), 2);
//! ```

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;

pub use ast::Document;
pub use error::ParseError;
pub use parser::parse_str;

#[cfg(test)]
mod parse_tests {
    use super::ast::Value;
    use super::*;

    fn ok(src: &str) -> Document { parse_str(src).unwrap() }
    fn err(src: &str) -> ParseError { parse_str(src).unwrap_err() }

    #[test] fn bare_element() { assert!(ok("transform").root.children.is_empty()); }
    #[test] fn empty_block() { ok("transform { }"); }
    #[test] fn nested_elements() {
        let doc = ok("transform { mesh { box  program { vertex: \"v\" fragment: \"f\" } } }");
        assert_eq!(doc.root.children[0].children[1].tag, "program");
    }
    #[test] fn dotted_keys() {
        let doc = ok("mesh { rotation.y: 0.5  uniforms.uColor.value: [1, 0, 0] }");
        assert_eq!(doc.root.prop("rotation.y"), Some(&Value::Number(0.5)));
        assert!(doc.root.prop("uniforms.uColor.value").is_some());
    }
    #[test] fn lists_with_and_without_commas() {
        let a = ok("mesh { position: [0, 1.5, -2] }");
        let b = ok("mesh { position: [0 1.5 -2] }");
        assert_eq!(a.root.props[0].value, b.root.props[0].value);
    }
    #[test] fn maps_as_values() {
        let doc = ok("geometry { position: { size: 3, data: [0 0 0] } }");
        let Value::Map(entries) = &doc.root.props[0].value else { panic!("expected map") };
        assert_eq!(entries[0].0, "size");
    }
    #[test] fn keywords() {
        let doc = ok("program { transparent: true  depthWrite: false  cullFace: null }");
        assert_eq!(doc.root.props[2].value, Value::Null);
    }
    #[test] fn identifier_values() { ok("mesh { mode: lines }"); }
    #[test] fn colors() { ok("program { uniforms.uColor: #aabbcc  uniforms.uTint: #aabbccdd }"); }
    #[test] fn comments() { ok("// top\n/* header */ mesh { /* body */ visible: true // tail\n }"); }
    #[test] fn string_escape() { ok(r#"program { vertex: "say \"hi\"\n" }"#); }
    #[test] fn use_as() {
        let doc = ok(r#"use "ship.psm" as Ship  transform { Ship { position.x: 2 } }"#);
        assert_eq!(doc.imports[0].alias, "Ship");
        assert_eq!(doc.root.children[0].tag, "Ship");
    }
    #[test] fn prop_positions() {
        let doc = ok("mesh {\n  visible: false\n}");
        assert_eq!((doc.root.props[0].line, doc.root.props[0].col), (2, 3));
    }

    #[test] fn err_bad_color() { err("mesh { color: #xyz }"); }
    #[test] fn err_unclosed_string() { err(r#"program { vertex: "oops }"#); }
    #[test] fn err_double_colon() { err("mesh { visible: : true }"); }
    #[test] fn err_trailing_root() { err("mesh { } mesh { }"); }
    #[test] fn err_unclosed_block_points_at_open_brace() {
        let e = err("mesh\n{ visible: true");
        assert_eq!((e.line, e.col), (2, 1));
    }
}

use thiserror::Error;

use super::NativeId;
use crate::device::DeviceError;

/// Failure to assign a property on a native object.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PropError {
    #[error("unknown property path `{0}`")]
    UnknownPath(String),

    #[error("property `{path}` expects {expected}, got {found}")]
    Type {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl PropError {
    pub(crate) fn unknown(path: &[&str]) -> Self {
        PropError::UnknownPath(path.join("."))
    }

    pub(crate) fn ty(path: &[&str], expected: &'static str, found: &super::Value) -> Self {
        PropError::Type { path: path.join("."), expected, found: found.type_name() }
    }
}

/// Failure of a structural operation on the [`super::SceneGraph`].
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("native object {0:?} does not exist")]
    Missing(NativeId),

    #[error("cannot parent {child:?} under its own descendant {parent:?}")]
    Cycle { parent: NativeId, child: NativeId },

    #[error("`{kind}` has no slot `{slot}`")]
    NoSuchSlot { kind: &'static str, slot: String },

    #[error("slot `{slot}` cannot hold a `{child}`")]
    Incompatible { slot: String, child: &'static str },

    #[error(transparent)]
    Prop(#[from] PropError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

use thiserror::Error;

use super::GpuHandle;

/// Failure reported by a [`super::Device`] backend.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("unknown gpu handle {0:?}")]
    UnknownHandle(GpuHandle),

    #[error("invalid resource data for `{label}`: {reason}")]
    InvalidData { label: String, reason: String },

    #[error("gpu backend error: {0}")]
    Backend(String),
}

//! Executor errors.

use federate_compiler::ConfigError;
use federate_ir::{ErrorKind, Type};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed IR or a failed compiler pass.
    #[error(transparent)]
    Ir(#[from] federate_ir::Error),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: Type, found: Type },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("kernel '{kernel}' failed: {message}")]
    Kernel { kernel: String, message: String },

    /// A client value violated an externally imposed bound.
    #[error("{0}")]
    BoundExceeded(String),

    #[error("no value bound to data '{0}'")]
    UnboundData(String),

    #[error("reference '{0}' is not bound")]
    UnboundReference(String),

    #[error("worker thread unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("worker thread stopped before completing the operation")]
    WorkerStopped,

    #[error("value was created by a different executor")]
    ForeignValue,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Argument or value type errors, including those raised by the IR.
    pub fn is_type_error(&self) -> bool {
        match self {
            Error::TypeMismatch { .. } => true,
            Error::Ir(err) => err.kind() == ErrorKind::Type,
            _ => false,
        }
    }

    pub(crate) fn kernel(kernel: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Kernel {
            kernel: kernel.into(),
            message: message.into(),
        }
    }
}

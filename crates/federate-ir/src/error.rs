//! IR errors
//!
//! Every failure raised while building or rewriting a tree belongs to one of
//! three classes, reported by [`Error::kind`]:
//!
//! - **Type** - malformed types at a construction or call boundary
//! - **Value** - structurally invalid input to a specific pass
//! - **Structure** - invariant violations found by analysis utilities

use thiserror::Error;

use crate::types::{Placement, Type};

/// IR result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error classification, stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Type,
    Value,
    Structure,
}

impl ErrorKind {
    /// Human-readable name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Type => "TypeError",
            ErrorKind::Value => "ValueError",
            ErrorKind::Structure => "StructureError",
        }
    }
}

/// IR errors
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: Type, found: Type },

    #[error("cannot call a value of non-function type {0}")]
    NotAFunction(Type),

    #[error("function of type {function} takes no argument")]
    UnexpectedArgument { function: Type },

    #[error("function of type {function} requires an argument")]
    MissingArgument { function: Type },

    #[error("invalid selection {selector} from value of type {source_type}")]
    InvalidSelection { selector: String, source_type: Type },

    #[error("unknown intrinsic '{0}'")]
    UnknownIntrinsic(String),

    #[error("intrinsic '{uri}' cannot have type {ty}")]
    IntrinsicSignature { uri: String, ty: Type },

    #[error("found multiple different placements: {first} and {second}")]
    MultiplePlacements { first: Placement, second: Placement },

    #[error("intrinsic '{uri}' is not allowed here")]
    DisallowedIntrinsic { uri: String },

    #[error("invalid computation: {0}")]
    InvalidComputation(String),

    #[error("name '{name}' is bound more than once")]
    DuplicateBinding { name: String },

    #[error("reference '{name}' is not bound")]
    UnboundReference { name: String },
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TypeMismatch { .. }
            | Error::NotAFunction(_)
            | Error::UnexpectedArgument { .. }
            | Error::MissingArgument { .. }
            | Error::InvalidSelection { .. }
            | Error::UnknownIntrinsic(_)
            | Error::IntrinsicSignature { .. } => ErrorKind::Type,
            Error::MultiplePlacements { .. }
            | Error::DisallowedIntrinsic { .. }
            | Error::InvalidComputation(_) => ErrorKind::Value,
            Error::DuplicateBinding { .. } | Error::UnboundReference { .. } => {
                ErrorKind::Structure
            }
        }
    }

    pub(crate) fn signature(uri: &str, ty: &Type) -> Self {
        Error::IntrinsicSignature {
            uri: uri.to_string(),
            ty: ty.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_error_mentions_multiple_placements() {
        let err = Error::MultiplePlacements {
            first: Placement::Server,
            second: Placement::Clients,
        };
        assert_eq!(err.kind(), ErrorKind::Value);
        assert!(err.to_string().contains("multiple different placements"));
    }

    #[test]
    fn kind_names() {
        let err = Error::DuplicateBinding {
            name: "a".to_string(),
        };
        assert_eq!(err.kind().name(), "StructureError");
        assert_eq!(Error::NotAFunction(Type::int32()).kind().name(), "TypeError");
    }
}

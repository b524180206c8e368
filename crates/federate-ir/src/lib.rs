//! Federate IR
//!
//! Typed intermediate representation for federated computations.
//!
//! # Structure
//!
//! - [`types`] - type algebra (tensors, structs, sequences, functions,
//!   federated types) and its identity/equivalence/assignability relations
//! - [`building_block`] - immutable, typed tree nodes and their canonical
//!   renderings
//! - [`intrinsics`] - intrinsic catalog and signature templates
//! - [`factory`] - helpers assembling well-typed intrinsic calls
//! - [`names`] - fresh-name generation
//! - [`kernel`] - opaque compiled-kernel payloads
//!
//! Nothing in this crate rewrites trees; see `federate-compiler`.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod building_block;
pub mod error;
pub mod factory;
pub mod intrinsics;
pub mod kernel;
pub mod names;
pub mod types;

pub use building_block::{BlockKind, BuildingBlock, Comp, Selector};
pub use error::{Error, ErrorKind, Result};
pub use intrinsics::{
    uri, AggregationKind, IntrinsicDef, IntrinsicRegistry, PlacementBehavior, Signature,
};
pub use kernel::{KernelOp, KernelProto, Literal};
pub use names::NameGenerator;
pub use types::{Container, DType, FederatedType, FunctionType, Placement, StructType, TensorType, Type};

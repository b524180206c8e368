//! Federate Compiler
//!
//! Rewrites federate IR trees: analysis, generic rewriting machinery,
//! tree transformations, intrinsic body replacement and configurable
//! pipelines of passes.
//!
//! # Structure
//!
//! - [`analysis`] - read-only traversals and invariant checks
//! - [`transformation_utils`] - pre/post-order rewriting and scope tracking
//! - [`tree_transformations`] - identity removal, dead-local elimination,
//!   uniquification, placement stripping
//! - [`intrinsic_bodies`] - body table and intrinsic replacement
//! - [`config`] / [`pipeline`] - YAML-configured pass sequences
//!
//! Passes are synchronous and pure: each returns a new tree and a
//! `modified` flag, leaving its input untouched.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod analysis;
pub mod config;
pub mod intrinsic_bodies;
pub mod pipeline;
pub mod transformation_utils;
pub mod tree_transformations;

pub use config::{ConfigError, ConfigResult, Metadata, PassKind, PipelineConfig, API_VERSION};
pub use federate_ir::{Error, ErrorKind, Result};
pub use intrinsic_bodies::{
    replace_intrinsics_with_bodies, replace_secure_intrinsics_with_insecure_bodies, BodyTable,
    IntrinsicBody,
};
pub use pipeline::Pipeline;
pub use transformation_utils::{
    apply_transformation, transform_postorder, transform_preorder, ScopeStack, Transformation,
};
pub use tree_transformations::{
    remove_mapped_or_applied_identity, remove_unused_block_locals, strip_placement,
    uniquify_reference_names, uniquify_reference_names_with, RemoveUnusedBlockLocals,
};

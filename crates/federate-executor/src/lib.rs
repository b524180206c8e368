//! Federate Executor
//!
//! Runs compiled federate computations.
//!
//! # Structure
//!
//! - [`value`] - concrete runtime values and elementwise arithmetic
//! - [`executor`] - the asynchronous [`Executor`] contract
//! - [`engine`] - compute engines for compiled kernels
//! - [`local`] - executor for unplaced compiled kernels
//! - [`reference`] - interpreter for whole building-block trees
//! - [`delegating`] - runs a target executor on a dedicated worker thread
//! - [`config`] / [`context`] - YAML-configured compile-then-execute
//!
//! # Pipeline Position
//!
//! ```text
//! Build → Compile (federate-compiler) → Execute
//!                                       ^^^^^^^
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod context;
pub mod delegating;
pub mod engine;
pub mod error;
pub mod executor;
pub mod local;
pub mod reference;
pub mod value;

pub use config::{ExecutionConfig, ExecutorConfig};
pub use context::ExecutionContext;
pub use delegating::{DelegatedValue, ThreadDelegatingExecutor, WorkerState};
pub use engine::{ComputeEngine, ReferenceEngine};
pub use error::{Error, Result};
pub use executor::{Executor, ExecutorValue};
pub use local::{LocalExecutor, LocalValue};
pub use reference::{ReferenceExecutor, ReferenceValue};
pub use value::{ArithOp, Tensor, TensorData, Value};

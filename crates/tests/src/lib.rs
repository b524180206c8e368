//! Integration test harness for federate.
//!
//! This crate provides utilities for end-to-end testing of the full
//! pipeline: Build → Compile → Execute → Verify.

use std::path::PathBuf;

use federate_compiler::{PassKind, PipelineConfig};
use federate_executor::{ExecutionConfig, ExecutionContext, ReferenceExecutor, Result, Value};
use federate_ir::{factory, BuildingBlock, Comp, KernelOp, Literal, Type};
use tokio::runtime::Runtime;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Directives used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,federate_executor=debug,federate_compiler=info";

/// Install a test-friendly subscriber once; `RUST_LOG` overrides the defaults.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Test harness running computations through an [`ExecutionContext`].
pub struct TestHarness {
    runtime: Runtime,
    context: ExecutionContext,
}

impl TestHarness {
    /// Create a harness from an execution config.
    ///
    /// # Panics
    ///
    /// Panics if the config is invalid or the runtime cannot start.
    pub fn new(config: ExecutionConfig) -> Self {
        init_logging();
        let num_clients = config.executor.num_clients;
        Self::with_executor(config, ReferenceExecutor::new(num_clients))
    }

    /// # Panics
    ///
    /// Panics if the config is invalid or the runtime cannot start.
    pub fn with_executor(config: ExecutionConfig, executor: ReferenceExecutor) -> Self {
        init_logging();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to start test runtime");
        let num_clients = executor.num_clients();
        let context =
            ExecutionContext::with_executor(config, executor).expect("invalid execution config");
        debug!(num_clients, "test harness ready");
        Self { runtime, context }
    }

    /// # Panics
    ///
    /// Panics if the YAML does not describe a valid execution config.
    pub fn from_yaml(yaml: &str) -> Self {
        let config = ExecutionConfig::from_yaml(yaml).expect("invalid execution config YAML");
        Self::new(config)
    }

    /// Runs computations exactly as built.
    pub fn native(num_clients: usize) -> Self {
        Self::new(
            ExecutionConfig::new("native")
                .with_compiler(PipelineConfig::empty())
                .with_num_clients(num_clients),
        )
    }

    /// Lowers secure intrinsics and replaces every reducible intrinsic with
    /// its body before running.
    pub fn lowered(num_clients: usize) -> Self {
        let compiler = PipelineConfig::empty()
            .with_pass(PassKind::ReplaceSecureIntrinsicsWithInsecureBodies)
            .with_pass(PassKind::ReplaceIntrinsicsWithBodies)
            .with_pass(PassKind::RemoveMappedOrAppliedIdentity)
            .with_pass(PassKind::UniquifyReferenceNames)
            .with_pass(PassKind::RemoveUnusedBlockLocals);
        Self::new(
            ExecutionConfig::new("lowered")
                .with_compiler(compiler)
                .with_num_clients(num_clients),
        )
    }

    pub fn try_invoke(&self, comp: &Comp, argument: Option<Value>) -> Result<Value> {
        self.runtime.block_on(self.context.invoke(comp, argument))
    }

    /// # Panics
    ///
    /// Panics if compilation or execution fails.
    pub fn invoke(&self, comp: &Comp, argument: Value) -> Value {
        self.try_invoke(comp, Some(argument))
            .unwrap_or_else(|e| panic!("invocation of {comp} failed: {e}"))
    }

    pub fn close(&self) {
        self.runtime.block_on(self.context.close());
    }
}

// ============================================================================
// Builders
// ============================================================================

/// `(x -> build(x))` with `x` of type `ty`.
///
/// # Panics
///
/// Panics if `build` fails.
pub fn lambda(ty: Type, build: impl FnOnce(Comp) -> federate_ir::Result<Comp>) -> Comp {
    let body = build(BuildingBlock::reference("x", ty.clone())).expect("failed to build body");
    BuildingBlock::lambda("x", ty, body)
}

/// Compiled `int32 -> int32` kernel adding one.
pub fn add_one() -> Comp {
    factory::create_compiled_kernel(
        "add_one",
        KernelOp::AddScalar(Literal::Int(1)),
        Type::function(Some(Type::int32()), Type::int32()),
    )
}

/// Constant call producing `literal` at type `ty`.
///
/// # Panics
///
/// Panics if the constant cannot be built.
pub fn constant(literal: impl Into<Literal>, ty: Type) -> Comp {
    factory::create_constant(literal.into(), ty).expect("failed to build constant")
}

/// One int32 scalar per client.
pub fn int_clients(values: &[i64]) -> Value {
    Value::clients(values.iter().map(|&v| Value::int32(v)).collect())
}

/// One float32 scalar per client.
pub fn float_clients(values: &[f64]) -> Value {
    Value::clients(values.iter().map(|&v| Value::float32(v)).collect())
}

// ============================================================================
// Golden files
// ============================================================================

/// Path of `golden/<name>.expected`.
pub fn golden_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("golden")
        .join(format!("{name}.expected"))
}

/// Compare `actual` with a golden file. Set `FEDERATE_UPDATE_GOLDEN=1` to
/// rewrite the file instead.
///
/// # Panics
///
/// Panics on mismatch or if the file cannot be read or written.
pub fn check_golden(name: &str, actual: &str) {
    let path = golden_path(name);
    if std::env::var_os("FEDERATE_UPDATE_GOLDEN").is_some() {
        std::fs::write(&path, format!("{actual}\n")).expect("failed to write golden file");
        return;
    }
    let expected = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()));
    assert_eq!(
        expected.trim_end(),
        actual.trim_end(),
        "golden mismatch for {}",
        path.display()
    );
}

//! Compile-then-execute entry point.

use federate_compiler::Pipeline;
use federate_ir::Comp;
use tracing::{debug, info, instrument};

use crate::config::ExecutionConfig;
use crate::delegating::ThreadDelegatingExecutor;
use crate::error::{Error, Result};
use crate::executor::{Executor, ExecutorValue};
use crate::reference::ReferenceExecutor;
use crate::value::Value;

enum Backend {
    Direct(ReferenceExecutor),
    Delegated(ThreadDelegatingExecutor<ReferenceExecutor>),
}

/// Runs computations through the configured compiler pipeline and then on
/// a reference executor, optionally behind a worker thread.
pub struct ExecutionContext {
    config: ExecutionConfig,
    pipeline: Pipeline,
    backend: Backend,
}

impl ExecutionContext {
    pub fn new(config: ExecutionConfig) -> Result<Self> {
        let executor = ReferenceExecutor::new(config.executor.num_clients);
        Self::with_executor(config, executor)
    }

    /// Use a preconfigured reference executor, e.g. one with data bindings.
    pub fn with_executor(config: ExecutionConfig, executor: ReferenceExecutor) -> Result<Self> {
        config.validate()?;
        let pipeline = Pipeline::new(config.compiler.clone());
        let backend = if config.executor.delegate {
            Backend::Delegated(ThreadDelegatingExecutor::with_thread_name(
                executor,
                config.executor.thread_name.clone(),
            ))
        } else {
            Backend::Direct(executor)
        };
        info!(
            name = %config.metadata.name,
            delegate = config.executor.delegate,
            "execution context created"
        );
        Ok(Self {
            config,
            pipeline,
            backend,
        })
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Compile `comp`, then evaluate it: functions are applied to
    /// `argument`, anything else is computed as is.
    #[instrument(skip_all, fields(context = %self.config.metadata.name))]
    pub async fn invoke(&self, comp: &Comp, argument: Option<Value>) -> Result<Value> {
        let (compiled, modified) = self.pipeline.run(comp)?;
        debug!(modified, "compiled");
        match &self.backend {
            Backend::Direct(executor) => run(executor, compiled, argument).await,
            Backend::Delegated(executor) => run(executor, compiled, argument).await,
        }
    }

    pub async fn close(&self) {
        match &self.backend {
            Backend::Direct(executor) => executor.close().await,
            Backend::Delegated(executor) => executor.close().await,
        }
    }
}

async fn run<E: Executor>(executor: &E, comp: Comp, argument: Option<Value>) -> Result<Value> {
    let ty = comp.type_signature().clone();
    let value = executor.create_value(Value::Function(comp), None).await?;
    let Some(function) = ty.as_function() else {
        if argument.is_some() {
            return Err(Error::Unsupported(format!(
                "argument supplied to a non-function of type {ty}"
            )));
        }
        return value.compute().await;
    };
    let argument = match argument {
        Some(argument) => {
            let hint = function.parameter().cloned();
            Some(executor.create_value(argument, hint).await?)
        }
        None => None,
    };
    executor
        .create_call(&value, argument.as_ref())
        .await?
        .compute()
        .await
}

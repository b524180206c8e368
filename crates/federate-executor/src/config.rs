//! Execution configuration.
//!
//! An execution config combines the compiler pipeline applied before
//! execution with the executor stack it runs on:
//!
//! ```yaml
//! apiVersion: federate/v1
//! kind: ExecutionConfig
//!
//! metadata:
//!   name: local_simulation
//!   description: "Three simulated clients, secure sums lowered"
//!
//! compiler:
//!   passes:
//!     - replace_secure_intrinsics_with_insecure_bodies
//!     - replace_intrinsics_with_bodies
//!
//! executor:
//!   numClients: 3
//!   delegate: true
//!   threadName: federate-worker
//! ```

use std::path::Path;

use federate_compiler::config::validate_schema;
use federate_compiler::{ConfigError, ConfigResult, Metadata, PipelineConfig};
use serde::{Deserialize, Serialize};

use crate::delegating::DEFAULT_THREAD_NAME;

/// Executor stack options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Clients simulated for all-equal values and `federated_eval_at_clients`.
    #[serde(default = "default_num_clients")]
    pub num_clients: usize,

    /// Run the reference executor behind a thread-delegating executor.
    #[serde(default = "default_delegate")]
    pub delegate: bool,

    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

fn default_num_clients() -> usize {
    3
}

fn default_delegate() -> bool {
    true
}

fn default_thread_name() -> String {
    DEFAULT_THREAD_NAME.to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            num_clients: default_num_clients(),
            delegate: default_delegate(),
            thread_name: default_thread_name(),
        }
    }
}

/// Top-level `kind: ExecutionConfig` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,

    #[serde(default)]
    pub compiler: PipelineConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl ExecutionConfig {
    /// A valid config with default compiler and executor sections.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: federate_compiler::API_VERSION.to_string(),
            kind: "ExecutionConfig".to_string(),
            metadata: Metadata {
                name: name.into(),
                description: None,
            },
            compiler: PipelineConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: ExecutionConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        validate_schema(&self.api_version, &self.kind, "ExecutionConfig", &self.metadata)?;
        self.compiler.validate()?;
        if self.executor.num_clients == 0 {
            return Err(ConfigError::MissingField("executor.numClients".to_string()));
        }
        if self.executor.thread_name.is_empty() {
            return Err(ConfigError::MissingField("executor.threadName".to_string()));
        }
        Ok(())
    }

    /// Builder method: replace the compiler pipeline.
    pub fn with_compiler(mut self, compiler: PipelineConfig) -> Self {
        self.compiler = compiler;
        self
    }

    /// Builder method: set the number of simulated clients.
    pub fn with_num_clients(mut self, num_clients: usize) -> Self {
        self.executor.num_clients = num_clients;
        self
    }

    /// Builder method: enable or disable thread delegation.
    pub fn with_delegation(mut self, delegate: bool) -> Self {
        self.executor.delegate = delegate;
        self
    }
}

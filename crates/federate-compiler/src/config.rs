//! Pipeline configuration.
//!
//! A pipeline is an ordered list of named passes plus the prefix used for
//! generated names. It is usually embedded as the `compiler` section of an
//! execution config, but can also stand alone:
//!
//! ```yaml
//! apiVersion: federate/v1
//! kind: Pipeline
//!
//! metadata:
//!   name: lower_secure
//!   description: "Lower secure aggregation for local testing"
//!
//! namePrefix: _var
//! passes:
//!   - replace_secure_intrinsics_with_insecure_bodies
//!   - replace_intrinsics_with_bodies
//!   - remove_mapped_or_applied_identity
//!   - uniquify_reference_names
//!   - remove_unused_block_locals
//! ```

use std::fmt;
use std::path::Path;

use federate_ir::names::DEFAULT_PREFIX;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// API version accepted by every federate config document.
pub const API_VERSION: &str = "federate/v1";

/// Errors that can occur when loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("invalid apiVersion: expected 'federate/v1', got '{0}'")]
    InvalidApiVersion(String),

    #[error("invalid kind: expected '{expected}', got '{found}'")]
    InvalidKind { expected: String, found: String },

    #[error("missing required field: {0}")]
    MissingField(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Document metadata shared by every config kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Machine identifier (lowercase, no spaces).
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,
}

/// Check `apiVersion`, `kind` and `metadata.name` of a document.
pub fn validate_schema(
    api_version: &str,
    kind: &str,
    expected_kind: &str,
    metadata: &Metadata,
) -> ConfigResult<()> {
    if api_version != API_VERSION {
        return Err(ConfigError::InvalidApiVersion(api_version.to_string()));
    }
    if kind != expected_kind {
        return Err(ConfigError::InvalidKind {
            expected: expected_kind.to_string(),
            found: kind.to_string(),
        });
    }
    if metadata.name.is_empty() {
        return Err(ConfigError::MissingField("metadata.name".to_string()));
    }
    Ok(())
}

/// A named compiler pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    RemoveMappedOrAppliedIdentity,
    RemoveUnusedBlockLocals,
    UniquifyReferenceNames,
    StripPlacement,
    ReplaceIntrinsicsWithBodies,
    ReplaceSecureIntrinsicsWithInsecureBodies,
}

impl PassKind {
    pub fn name(self) -> &'static str {
        match self {
            PassKind::RemoveMappedOrAppliedIdentity => "remove_mapped_or_applied_identity",
            PassKind::RemoveUnusedBlockLocals => "remove_unused_block_locals",
            PassKind::UniquifyReferenceNames => "uniquify_reference_names",
            PassKind::StripPlacement => "strip_placement",
            PassKind::ReplaceIntrinsicsWithBodies => "replace_intrinsics_with_bodies",
            PassKind::ReplaceSecureIntrinsicsWithInsecureBodies => {
                "replace_secure_intrinsics_with_insecure_bodies"
            }
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered compiler passes and naming options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Prefix of names introduced by uniquification.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Passes, applied in order.
    #[serde(default = "default_passes")]
    pub passes: Vec<PassKind>,
}

fn default_name_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_passes() -> Vec<PassKind> {
    vec![
        PassKind::ReplaceIntrinsicsWithBodies,
        PassKind::RemoveMappedOrAppliedIdentity,
        PassKind::UniquifyReferenceNames,
        PassKind::RemoveUnusedBlockLocals,
    ]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            passes: default_passes(),
        }
    }
}

/// Standalone `kind: Pipeline` document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineDocument {
    api_version: String,
    kind: String,
    #[serde(default)]
    metadata: Metadata,
    #[serde(flatten)]
    pipeline: PipelineConfig,
}

impl PipelineConfig {
    /// A pipeline running no passes.
    pub fn empty() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            passes: Vec::new(),
        }
    }

    /// Load a `kind: Pipeline` document from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a `kind: Pipeline` document.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let document: PipelineDocument = serde_yaml::from_str(yaml)?;
        validate_schema(
            &document.api_version,
            &document.kind,
            "Pipeline",
            &document.metadata,
        )?;
        document.pipeline.validate()?;
        Ok(document.pipeline)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.name_prefix.is_empty() {
            return Err(ConfigError::MissingField("namePrefix".to_string()));
        }
        Ok(())
    }

    /// Builder method: append a pass.
    pub fn with_pass(mut self, pass: PassKind) -> Self {
        self.passes.push(pass);
        self
    }

    /// Builder method: set the generated-name prefix.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn pipeline_from_yaml() {
        let yaml = r#"
apiVersion: federate/v1
kind: Pipeline

metadata:
  name: lower_secure
  description: "Lower secure aggregation"

namePrefix: _tmp
passes:
  - replace_secure_intrinsics_with_insecure_bodies
  - strip_placement
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name_prefix, "_tmp");
        assert_eq!(
            config.passes,
            vec![
                PassKind::ReplaceSecureIntrinsicsWithInsecureBodies,
                PassKind::StripPlacement
            ]
        );
    }

    #[test]
    fn defaults_apply_to_missing_fields() {
        let yaml = "apiVersion: federate/v1\nkind: Pipeline\nmetadata:\n  name: defaults\n";
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.name_prefix, "_var");
    }

    #[test]
    fn rejects_wrong_api_version_and_kind() {
        let wrong_version = "apiVersion: federate/v2\nkind: Pipeline\nmetadata:\n  name: x\n";
        assert!(matches!(
            PipelineConfig::from_yaml(wrong_version),
            Err(ConfigError::InvalidApiVersion(v)) if v == "federate/v2"
        ));

        let wrong_kind = "apiVersion: federate/v1\nkind: Scenario\nmetadata:\n  name: x\n";
        assert!(matches!(
            PipelineConfig::from_yaml(wrong_kind),
            Err(ConfigError::InvalidKind { .. })
        ));

        let unnamed = "apiVersion: federate/v1\nkind: Pipeline\n";
        assert!(matches!(
            PipelineConfig::from_yaml(unnamed),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn rejects_unknown_pass() {
        let yaml = "apiVersion: federate/v1\nkind: Pipeline\nmetadata:\n  name: x\npasses: [inline_everything]\n";
        assert!(matches!(
            PipelineConfig::from_yaml(yaml),
            Err(ConfigError::YamlError(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "apiVersion: federate/v1\nkind: Pipeline\nmetadata:\n  name: file\npasses: [strip_placement]"
        )
        .unwrap();
        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.passes, vec![PassKind::StripPlacement]);
    }

    #[test]
    fn builder_appends_passes() {
        let config = PipelineConfig::empty()
            .with_pass(PassKind::StripPlacement)
            .with_name_prefix("_n");
        assert_eq!(config.passes, vec![PassKind::StripPlacement]);
        assert_eq!(config.name_prefix, "_n");
        assert_eq!(PassKind::StripPlacement.to_string(), "strip_placement");
    }
}

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::flow::FlowLogSchema;

/// Top-level configuration for a flowtag run.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Input file locations.
    #[serde(default)]
    pub input: InputConfig,

    /// Report output configuration.
    #[serde(default)]
    pub output: OutputConfig,

    /// Batching and worker pool configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Flow log record layout.
    #[serde(default)]
    pub schema: SchemaConfig,
}

/// Input file locations. Every path is optional.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct InputConfig {
    /// Flow log to analyze. Streaming is skipped when unset.
    #[serde(default)]
    pub flow_logs: Option<PathBuf>,

    /// CSV of `dstport,protocol,tag` rows. Empty mapping when unset.
    #[serde(default)]
    pub tag_mappings: Option<PathBuf>,

    /// CSV of protocol numbers to names. Built-in IANA table when unset.
    #[serde(default)]
    pub protocol_numbers: Option<PathBuf>,
}

/// Report output configuration.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct OutputConfig {
    /// Report file path. No report is written when unset.
    #[serde(default)]
    pub report: Option<PathBuf>,
}

/// Batching and worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Lines per batch. Default: 1000.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent batch workers. Default: 1.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Longest flow log line kept in memory, in bytes. Longer lines are
    /// skipped and counted as errors. Default: 65536.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

/// Flow log record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SchemaConfig {
    /// Known flow log version. Default: 2.
    #[serde(default = "default_flow_log_version")]
    pub version: u8,

    /// Explicit field positions for custom log formats. Overrides `version`.
    #[serde(default)]
    pub custom: Option<CustomSchemaConfig>,
}

/// Field positions of a custom flow log format (1-indexed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CustomSchemaConfig {
    pub min_fields: usize,
    pub dst_port_field: usize,
    pub protocol_field: usize,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_workers() -> usize {
    1
}

fn default_max_line_bytes() -> usize {
    64 * 1024
}

fn default_flow_log_version() -> u8 {
    2
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            input: InputConfig::default(),
            output: OutputConfig::default(),
            engine: EngineConfig::default(),
            schema: SchemaConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            version: default_flow_log_version(),
            custom: None,
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.engine.batch_size == 0 {
            bail!("engine.batch_size must be positive");
        }

        if self.engine.workers == 0 {
            bail!("engine.workers must be positive");
        }

        if self.engine.max_line_bytes == 0 {
            bail!("engine.max_line_bytes must be positive");
        }

        self.schema.resolve().context("invalid schema")?;

        Ok(())
    }
}

impl SchemaConfig {
    /// Returns the validated record layout.
    pub fn resolve(&self) -> Result<FlowLogSchema> {
        if let Some(custom) = self.custom {
            let schema = FlowLogSchema {
                min_fields: custom.min_fields,
                dst_port_field: custom.dst_port_field,
                protocol_field: custom.protocol_field,
            };
            schema.validate()?;
            return Ok(schema);
        }

        match FlowLogSchema::for_version(self.version) {
            Some(schema) => Ok(schema),
            None => bail!("unsupported flow log version: {}", self.version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.engine.batch_size, 1000);
        assert_eq!(cfg.engine.workers, 1);
        assert_eq!(cfg.engine.max_line_bytes, 65536);
        assert_eq!(cfg.schema.version, 2);
        assert!(cfg.schema.custom.is_none());
        assert!(cfg.input.flow_logs.is_none());
        assert!(cfg.input.tag_mappings.is_none());
        assert!(cfg.input.protocol_numbers.is_none());
        assert!(cfg.output.report.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_empty_yaml_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.engine.batch_size, 1000);
        assert_eq!(cfg.schema.resolve().unwrap(), FlowLogSchema::V2);
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
log_level: debug
input:
  flow_logs: /var/log/flow.log
  tag_mappings: lookup.csv
  protocol_numbers: protocol-numbers-1.csv
output:
  report: out/report.txt
engine:
  batch_size: 250
  workers: 4
  max_line_bytes: 4096
schema:
  version: 2
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(
            cfg.input.flow_logs.as_deref(),
            Some(Path::new("/var/log/flow.log"))
        );
        assert_eq!(
            cfg.input.tag_mappings.as_deref(),
            Some(Path::new("lookup.csv"))
        );
        assert_eq!(
            cfg.output.report.as_deref(),
            Some(Path::new("out/report.txt"))
        );
        assert_eq!(cfg.engine.batch_size, 250);
        assert_eq!(cfg.engine.workers, 4);
        assert_eq!(cfg.engine.max_line_bytes, 4096);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_custom_schema() {
        let yaml = r#"
schema:
  custom:
    min_fields: 5
    dst_port_field: 2
    protocol_field: 4
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let schema = cfg.schema.resolve().unwrap();
        assert_eq!(schema.min_fields, 5);
        assert_eq!(schema.dst_port_field, 2);
        assert_eq!(schema.protocol_field, 4);
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut cfg = Config::default();
        cfg.engine.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut cfg = Config::default();
        cfg.engine.workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_max_line_bytes() {
        let mut cfg = Config::default();
        cfg.engine.max_line_bytes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_version() {
        let cfg = Config {
            schema: SchemaConfig {
                version: 5,
                custom: None,
            },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_custom_schema() {
        let cfg = Config {
            schema: SchemaConfig {
                custom: Some(CustomSchemaConfig {
                    min_fields: 3,
                    dst_port_field: 4,
                    protocol_field: 1,
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}

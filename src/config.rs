// src/config.rs - Configuration structures and validation
use crate::error::{Result, VigilError};
use crate::history::HistoryConfig;
use crate::pipeline::StageKind;
use crate::point::PointConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

#[cfg(feature = "email")]
use crate::email::SmtpConfig;
#[cfg(feature = "mqtt")]
use crate::mqtt::MqttConfig;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Main VIGIL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Pipeline stage order
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Runtime timeout tuning
    #[serde(default)]
    pub runtime: RuntimeTuning,

    /// History batcher tuning
    #[serde(default)]
    pub history: HistoryConfig,

    /// Declared monitored points
    #[serde(default)]
    pub points: Vec<PointConfig>,

    #[cfg(feature = "mqtt")]
    /// MQTT publish sink configuration
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,

    #[cfg(feature = "email")]
    /// SMTP notification configuration
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

/// Ordered stage list for the processing pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Stages in execution order
    #[serde(default = "StageKind::default_order")]
    pub stages: Vec<StageKind>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: StageKind::default_order(),
        }
    }
}

/// Timeout bounds for external calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeTuning {
    /// Bound on repository calls in milliseconds
    #[serde(default = "default_repository_timeout_ms")]
    pub repository_timeout_ms: u64,

    /// Bound on action dispatch (alarm store, email) in milliseconds
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
}

fn default_repository_timeout_ms() -> u64 {
    5000
}

fn default_action_timeout_ms() -> u64 {
    10_000
}

impl Default for RuntimeTuning {
    fn default() -> Self {
        Self {
            repository_timeout_ms: default_repository_timeout_ms(),
            action_timeout_ms: default_action_timeout_ms(),
        }
    }
}

impl Config {
    /// Parse a configuration from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load and parse a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Validate cross-field invariants
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.stages.is_empty() {
            return Err(VigilError::Config("pipeline has no stages".into()));
        }

        let mut seen = HashSet::new();
        for stage in &self.pipeline.stages {
            if !seen.insert(stage) {
                return Err(VigilError::Config(format!(
                    "duplicate pipeline stage {:?}",
                    stage
                )));
            }
        }

        let persist_pos = self
            .pipeline
            .stages
            .iter()
            .position(|s| *s == StageKind::Persist);
        let detect_pos = self
            .pipeline
            .stages
            .iter()
            .position(|s| *s == StageKind::ChangeDetect);
        if let (Some(p), Some(d)) = (persist_pos, detect_pos) {
            if p < d {
                warn!(
                    "persist stage runs before change detection; every update \
                     will compare equal to the value it just wrote"
                );
            }
        }

        if self.history.batch_size == 0 {
            return Err(VigilError::Config("history batch_size must be >= 1".into()));
        }
        if self.history.max_buffered < self.history.batch_size {
            return Err(VigilError::Config(
                "history max_buffered must be >= batch_size".into(),
            ));
        }
        if self.history.flush_interval_secs == 0 {
            return Err(VigilError::Config(
                "history flush_interval_secs must be >= 1".into(),
            ));
        }

        if self.runtime.repository_timeout_ms == 0 || self.runtime.action_timeout_ms == 0 {
            return Err(VigilError::Config("timeouts must be >= 1ms".into()));
        }

        let mut point_ids = HashSet::new();
        for point in &self.points {
            if point.id.trim().is_empty() {
                return Err(VigilError::Config("point with empty id".into()));
            }
            if !point_ids.insert(point.id.as_str()) {
                return Err(VigilError::Config(format!(
                    "duplicate point id '{}'",
                    point.id
                )));
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            runtime: RuntimeTuning::default(),
            history: HistoryConfig::default(),
            points: Vec::new(),
            #[cfg(feature = "mqtt")]
            mqtt: None,
            #[cfg(feature = "email")]
            smtp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;

    #[test]
    fn minimal_yaml_uses_defaults() {
        let config = Config::from_yaml("points: []").unwrap();
        assert_eq!(config.pipeline.stages, StageKind::default_order());
        assert_eq!(config.history.batch_size, 50);
        assert_eq!(config.history.flush_interval_secs, 30);
        assert_eq!(config.runtime.repository_timeout_ms, 5000);
        config.validate().unwrap();
    }

    #[test]
    fn full_yaml_round_trip() {
        let yaml = r#"
pipeline:
  stages: [change_detect, persist, history]
runtime:
  repository_timeout_ms: 250
history:
  batch_size: 10
  flush_interval_secs: 5
points:
  - id: plc1.db1.temp
    name: "Reactor temperature"
    data_type: float
    publish_targets: [scada-north]
"#;
        let config = Config::from_yaml(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.pipeline.stages.len(), 3);
        assert_eq!(config.points.len(), 1);
        assert_eq!(config.points[0].data_type, ValueType::Float);
        assert_eq!(config.points[0].publish_targets, vec!["scada-north"]);
    }

    #[test]
    fn duplicate_stage_is_rejected() {
        let config = Config::from_yaml("pipeline:\n  stages: [persist, persist]\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_point_id_is_rejected() {
        let yaml = r#"
points:
  - id: p1
    name: one
    data_type: int
  - id: p1
    name: two
    data_type: int
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn undersized_history_buffer_is_rejected() {
        let config =
            Config::from_yaml("history:\n  batch_size: 100\n  max_buffered: 10\n").unwrap();
        assert!(config.validate().is_err());
    }
}

// src/point.rs - Monitored point metadata and incoming updates
use crate::value::{Value, ValueType};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Protocol a value update originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceProtocol {
    /// Siemens S7 PLC
    S7,
    /// OPC UA server subscription
    OpcUa,
    /// MQTT broker subscription
    Mqtt,
    /// Generated inside the process (tests, simulation)
    Internal,
}

/// A single value update produced by a device driver
///
/// Created once by the producer and consumed once by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueUpdate {
    /// Identifier of the monitored point
    pub point_id: String,
    /// The newly observed raw value
    pub value: Value,
    /// When the producer observed the value
    pub timestamp: DateTime<Utc>,
    /// Which protocol delivered the value
    pub source: SourceProtocol,
}

impl ValueUpdate {
    /// Build an update stamped with the current time
    pub fn new(point_id: impl Into<String>, value: Value, source: SourceProtocol) -> Self {
        Self {
            point_id: point_id.into(),
            value,
            timestamp: Utc::now(),
            source,
        }
    }
}

/// Declared configuration of a monitored point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointConfig {
    /// Unique point identifier, e.g. `plc1.db1.temp`
    pub id: String,

    /// Human-readable point name used in alarm and notification text
    pub name: String,

    /// Declared data type; incoming raw values are coerced to it
    pub data_type: ValueType,

    /// Downstream targets the point's accepted values are republished to
    #[serde(default)]
    pub publish_targets: Vec<String>,
}

/// Registry of declared points keyed by point id
///
/// Backed by a concurrent map so producers, the pipeline and the trigger
/// engine can resolve point metadata without coordination.
#[derive(Debug, Default)]
pub struct PointRegistry {
    points: DashMap<String, PointConfig>,
}

impl PointRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from declared point configs
    pub fn from_configs(configs: &[PointConfig]) -> Self {
        let registry = Self::new();
        for config in configs {
            registry.insert(config.clone());
        }
        registry
    }

    /// Register or replace a point declaration
    pub fn insert(&self, config: PointConfig) {
        self.points.insert(config.id.clone(), config);
    }

    /// Look up a point declaration
    pub fn get(&self, point_id: &str) -> Option<PointConfig> {
        self.points.get(point_id).map(|entry| entry.value().clone())
    }

    /// Display name for a point, falling back to the id for undeclared points
    pub fn display_name(&self, point_id: &str) -> String {
        self.get(point_id)
            .map(|p| p.name)
            .unwrap_or_else(|| point_id.to_string())
    }

    /// Number of declared points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether any points are declared
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_to_id() {
        let registry = PointRegistry::new();
        registry.insert(PointConfig {
            id: "p1".into(),
            name: "Reactor temperature".into(),
            data_type: ValueType::Float,
            publish_targets: vec![],
        });

        assert_eq!(registry.display_name("p1"), "Reactor temperature");
        assert_eq!(registry.display_name("p2"), "p2");
    }
}

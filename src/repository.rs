// src/repository.rs - External collaborator seams
//
// Every subsystem VIGIL talks to (variable store, trigger store, alarm log,
// history store, publish targets, email) sits behind one of these traits.
// The in-memory implementations below back the test suite and the default
// binary wiring; deployments substitute their own.
use crate::action::AlarmEvent;
use crate::error::{Result, VigilError};
use crate::history::HistoryRecord;
use crate::trigger::TriggerDefinition;
use crate::value::Value;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

/// Bound an external call with a timeout
///
/// No repository call or action dispatch may block indefinitely; an elapsed
/// timeout is reported as a failure of the call itself.
pub async fn with_timeout<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(VigilError::Timeout {
            operation,
            ms: limit.as_millis() as u64,
        }),
    }
}

/// Store of the last accepted value per point
#[async_trait]
pub trait VariableRepository: Send + Sync {
    /// Read the last known value for a point, if any
    async fn get_last_value(&self, point_id: &str) -> Result<Option<Value>>;

    /// Write the accepted value for a point
    async fn set_value(&self, point_id: &str, value: Value) -> Result<()>;
}

/// Durable store of trigger definitions
#[async_trait]
pub trait TriggerRepository: Send + Sync {
    /// Load every stored trigger definition
    async fn load_all(&self) -> Result<Vec<TriggerDefinition>>;

    /// Store a new trigger definition
    async fn insert(&self, trigger: TriggerDefinition) -> Result<()>;

    /// Replace an existing trigger definition
    async fn update(&self, trigger: TriggerDefinition) -> Result<()>;

    /// Delete a trigger definition
    async fn remove(&self, id: Uuid) -> Result<()>;

    /// All triggers referencing the given point
    async fn get_by_point(&self, point_id: &str) -> Result<Vec<TriggerDefinition>>;
}

/// Sink for raised alarm events
#[async_trait]
pub trait AlarmRepository: Send + Sync {
    /// Persist a raised alarm
    async fn add(&self, event: AlarmEvent) -> Result<()>;
}

/// Batched sink for history records
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Persist a batch of history records in one write
    async fn add_batch(&self, records: &[HistoryRecord]) -> Result<()>;
}

/// Resolves the per-target alias of a point
#[async_trait]
pub trait AliasResolver: Send + Sync {
    /// Alias of `point_id` on `target_id`, or `None` when unmapped
    async fn get_alias(&self, point_id: &str, target_id: &str) -> Result<Option<String>>;
}

/// Downstream publish target, e.g. an MQTT broker
#[async_trait]
pub trait PublishSink: Send + Sync {
    /// Publish a value to a target, tagged with the point's alias there
    async fn publish(&self, target_id: &str, alias: &str, value: &Value) -> Result<()>;
}

/// Outbound email service
#[async_trait]
pub trait EmailService: Send + Sync {
    /// Send one message to the given recipients
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()>;
}

// ============================================================================
// IN-MEMORY IMPLEMENTATIONS
// ============================================================================

/// Concurrent in-memory variable store
#[derive(Debug, Default)]
pub struct MemoryVariableStore {
    values: DashMap<String, Value>,
}

impl MemoryVariableStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VariableRepository for MemoryVariableStore {
    async fn get_last_value(&self, point_id: &str) -> Result<Option<Value>> {
        Ok(self.values.get(point_id).map(|entry| entry.value().clone()))
    }

    async fn set_value(&self, point_id: &str, value: Value) -> Result<()> {
        self.values.insert(point_id.to_string(), value);
        Ok(())
    }
}

/// In-memory trigger store
#[derive(Debug, Default)]
pub struct MemoryTriggerStore {
    triggers: RwLock<HashMap<Uuid, TriggerDefinition>>,
}

impl MemoryTriggerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct read access for assertions
    pub fn get(&self, id: Uuid) -> Option<TriggerDefinition> {
        self.triggers.read().get(&id).cloned()
    }
}

#[async_trait]
impl TriggerRepository for MemoryTriggerStore {
    async fn load_all(&self) -> Result<Vec<TriggerDefinition>> {
        Ok(self.triggers.read().values().cloned().collect())
    }

    async fn insert(&self, trigger: TriggerDefinition) -> Result<()> {
        self.triggers.write().insert(trigger.id, trigger);
        Ok(())
    }

    async fn update(&self, trigger: TriggerDefinition) -> Result<()> {
        let mut triggers = self.triggers.write();
        if !triggers.contains_key(&trigger.id) {
            return Err(VigilError::TriggerNotFound(trigger.id));
        }
        triggers.insert(trigger.id, trigger);
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        if self.triggers.write().remove(&id).is_none() {
            return Err(VigilError::TriggerNotFound(id));
        }
        Ok(())
    }

    async fn get_by_point(&self, point_id: &str) -> Result<Vec<TriggerDefinition>> {
        Ok(self
            .triggers
            .read()
            .values()
            .filter(|t| t.point_ids.iter().any(|p| p == point_id))
            .cloned()
            .collect())
    }
}

/// In-memory alarm log
#[derive(Debug, Default)]
pub struct MemoryAlarmLog {
    events: RwLock<Vec<AlarmEvent>>,
}

impl MemoryAlarmLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all raised alarms
    pub fn events(&self) -> Vec<AlarmEvent> {
        self.events.read().clone()
    }
}

#[async_trait]
impl AlarmRepository for MemoryAlarmLog {
    async fn add(&self, event: AlarmEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }
}

/// In-memory history store
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: RwLock<Vec<HistoryRecord>>,
}

impl MemoryHistoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all flushed records
    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl HistoryRepository for MemoryHistoryStore {
    async fn add_batch(&self, records: &[HistoryRecord]) -> Result<()> {
        self.records.write().extend_from_slice(records);
        Ok(())
    }
}

/// Static alias table keyed by `(point_id, target_id)`
#[derive(Debug, Default)]
pub struct StaticAliasResolver {
    aliases: DashMap<(String, String), String>,
}

impl StaticAliasResolver {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the alias of a point on a target
    pub fn insert(
        &self,
        point_id: impl Into<String>,
        target_id: impl Into<String>,
        alias: impl Into<String>,
    ) {
        self.aliases
            .insert((point_id.into(), target_id.into()), alias.into());
    }
}

#[async_trait]
impl AliasResolver for StaticAliasResolver {
    async fn get_alias(&self, point_id: &str, target_id: &str) -> Result<Option<String>> {
        Ok(self
            .aliases
            .get(&(point_id.to_string(), target_id.to_string()))
            .map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_maps_to_error() {
        let result: Result<()> = with_timeout("slow op", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(VigilError::Timeout { operation: "slow op", ms: 10 })
        ));
    }

    #[tokio::test]
    async fn variable_store_round_trip() {
        let store = MemoryVariableStore::new();
        assert_eq!(store.get_last_value("p1").await.unwrap(), None);

        store.set_value("p1", Value::Int(9)).await.unwrap();
        assert_eq!(store.get_last_value("p1").await.unwrap(), Some(Value::Int(9)));
    }
}

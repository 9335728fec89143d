// src/engine.rs - Trigger evaluation engine
//
// Keeps an in-memory index of trigger rules keyed by point id, rebuilt from
// the trigger repository on load and maintained incrementally on rule
// create/update/delete. Evaluation runs for every update, including updates
// the pipeline short-circuited as unchanged.
use crate::action::{ActionContext, ActionExecutor};
use crate::error::Result;
use crate::point::PointRegistry;
use crate::repository::{with_timeout, TriggerRepository};
use crate::trigger::TriggerDefinition;
use crate::value::Value;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const NEVER_FIRED: i64 = i64::MIN;

/// A trigger that fired during one evaluation
#[derive(Debug, Clone)]
pub struct FiredTrigger {
    /// Id of the fired trigger
    pub trigger_id: Uuid,
    /// Name of the fired trigger
    pub trigger_name: String,
    /// Point whose update caused the firing
    pub point_id: String,
    /// Numeric value that matched the condition
    pub value: f64,
    /// Timestamp of the firing update
    pub timestamp: DateTime<Utc>,
}

/// Shared runtime state of one trigger
///
/// `last_fired_micros` is the claim word: a firing is claimed by a
/// compare-and-set on it, so two concurrent evaluations of the same trigger
/// (two points feeding one multi-point rule) admit exactly one winner.
struct TriggerSlot {
    definition: RwLock<TriggerDefinition>,
    last_fired_micros: AtomicI64,
}

impl TriggerSlot {
    fn new(definition: TriggerDefinition) -> Self {
        let last_fired = definition
            .last_triggered_at
            .map(|t| t.timestamp_micros())
            .unwrap_or(NEVER_FIRED);
        Self {
            definition: RwLock::new(definition),
            last_fired_micros: AtomicI64::new(last_fired),
        }
    }

    /// Atomically claim a firing at `now_micros`
    ///
    /// Fails when the suppression window is still open or another evaluation
    /// already claimed this instant (or a later one).
    fn try_claim(&self, now_micros: i64, suppression_secs: Option<u64>) -> bool {
        loop {
            let prev = self.last_fired_micros.load(Ordering::Acquire);
            if prev != NEVER_FIRED {
                if now_micros <= prev {
                    return false;
                }
                if let Some(secs) = suppression_secs {
                    let window = (secs as i64).saturating_mul(1_000_000);
                    if now_micros < prev.saturating_add(window) {
                        return false;
                    }
                }
            }
            match self.last_fired_micros.compare_exchange(
                prev,
                now_micros,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }
}

/// Evaluates trigger rules against incoming point values
pub struct TriggerEngine {
    triggers: DashMap<Uuid, Arc<TriggerSlot>>,
    by_point: DashMap<String, Vec<Uuid>>,
    repository: Arc<dyn TriggerRepository>,
    registry: Arc<PointRegistry>,
    executor: ActionExecutor,
    timeout: Duration,
}

impl TriggerEngine {
    /// Build an engine over the trigger repository and action executor
    pub fn new(
        repository: Arc<dyn TriggerRepository>,
        registry: Arc<PointRegistry>,
        executor: ActionExecutor,
        timeout: Duration,
    ) -> Self {
        Self {
            triggers: DashMap::new(),
            by_point: DashMap::new(),
            repository,
            registry,
            executor,
            timeout,
        }
    }

    /// Rebuild the in-memory index from the trigger repository
    ///
    /// Stored rules that fail validation are skipped with a warning; an
    /// invalid rule never fires.
    pub async fn load(&self) -> Result<usize> {
        let definitions =
            with_timeout("trigger load", self.timeout, self.repository.load_all()).await?;

        self.triggers.clear();
        self.by_point.clear();

        let mut count = 0;
        for definition in definitions {
            if let Err(e) = definition.validate() {
                warn!(trigger = %definition.id, "skipping invalid stored trigger: {}", e);
                continue;
            }
            self.insert_slot(definition);
            count += 1;
        }
        info!("trigger engine loaded {} rules", count);
        Ok(count)
    }

    /// Validate, persist and index a new rule
    pub async fn create(&self, definition: TriggerDefinition) -> Result<Uuid> {
        definition.validate()?;
        with_timeout(
            "trigger insert",
            self.timeout,
            self.repository.insert(definition.clone()),
        )
        .await?;
        let id = definition.id;
        self.insert_slot(definition);
        Ok(id)
    }

    /// Validate, persist and re-index an updated rule
    ///
    /// Firing history survives the update: the newest of the stored and the
    /// in-memory `last_triggered_at` wins, so an edit cannot reopen a closed
    /// suppression window.
    pub async fn update(&self, definition: TriggerDefinition) -> Result<()> {
        definition.validate()?;
        with_timeout(
            "trigger update",
            self.timeout,
            self.repository.update(definition.clone()),
        )
        .await?;

        let existing = self.triggers.get(&definition.id).map(|e| Arc::clone(&e));
        match existing {
            Some(slot) => {
                let old_points = slot.definition.read().point_ids.clone();
                let stored_micros = definition
                    .last_triggered_at
                    .map(|t| t.timestamp_micros())
                    .unwrap_or(NEVER_FIRED);
                slot.last_fired_micros.fetch_max(stored_micros, Ordering::AcqRel);
                *slot.definition.write() = definition.clone();
                if old_points != definition.point_ids {
                    self.unindex(definition.id, &old_points);
                    self.index(definition.id, &definition.point_ids);
                }
            }
            None => self.insert_slot(definition),
        }
        Ok(())
    }

    /// Remove a rule from the repository and the index
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        with_timeout("trigger remove", self.timeout, self.repository.remove(id)).await?;
        if let Some((_, slot)) = self.triggers.remove(&id) {
            let points = slot.definition.read().point_ids.clone();
            self.unindex(id, &points);
        }
        Ok(())
    }

    /// Current definition of a rule, if indexed
    pub fn definition(&self, id: Uuid) -> Option<TriggerDefinition> {
        self.triggers.get(&id).map(|slot| slot.definition.read().clone())
    }

    /// Number of indexed rules
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    /// Whether no rules are indexed
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Evaluate every active rule watching `point_id` against the new value
    ///
    /// Fired rules have their `last_triggered_at` updated and persisted and
    /// their action dispatched before this returns. An action failure is
    /// logged but does not undo the firing.
    pub async fn evaluate(
        &self,
        point_id: &str,
        value: &Value,
        timestamp: DateTime<Utc>,
    ) -> Vec<FiredTrigger> {
        let candidates = match self.by_point.get(point_id) {
            Some(ids) => ids.value().clone(),
            None => return Vec::new(),
        };

        let numeric = value.to_numeric();
        let now_micros = timestamp.timestamp_micros();
        let mut fired = Vec::new();

        for id in candidates {
            let Some(slot) = self.triggers.get(&id).map(|e| Arc::clone(&e)) else {
                continue;
            };
            let definition = slot.definition.read().clone();
            if !definition.is_active {
                continue;
            }

            let Some(numeric) = numeric else {
                warn!(
                    trigger = %definition.id,
                    point = %point_id,
                    value = %value,
                    "non-numeric value on numeric condition, skipping rule"
                );
                continue;
            };

            if !definition.condition.matches(numeric) {
                continue;
            }

            if !slot.try_claim(now_micros, definition.suppression_secs) {
                debug!(
                    trigger = %definition.id,
                    point = %point_id,
                    "firing suppressed"
                );
                continue;
            }

            {
                let mut def = slot.definition.write();
                def.last_triggered_at = Some(timestamp);
            }
            let updated = slot.definition.read().clone();

            if let Err(e) = with_timeout(
                "trigger state persist",
                self.timeout,
                self.repository.update(updated.clone()),
            )
            .await
            {
                warn!(
                    trigger = %updated.id,
                    "failed to persist trigger firing state: {}", e
                );
            }

            let ctx = ActionContext {
                trigger_id: updated.id,
                trigger_name: updated.name.clone(),
                condition: updated.condition.clone(),
                action: updated.action.clone(),
                point_id: point_id.to_string(),
                point_name: self.registry.display_name(point_id),
                value: value.clone(),
                numeric,
                timestamp,
            };
            if let Err(e) = self.executor.execute(&ctx).await {
                error!(
                    trigger = %updated.id,
                    action = updated.action.kind(),
                    "action dispatch failed, firing stands: {}", e
                );
            }

            info!(
                trigger = %updated.id,
                point = %point_id,
                condition = updated.condition.kind(),
                value = numeric,
                "trigger fired"
            );
            fired.push(FiredTrigger {
                trigger_id: updated.id,
                trigger_name: updated.name,
                point_id: point_id.to_string(),
                value: numeric,
                timestamp,
            });
        }

        fired
    }

    fn insert_slot(&self, definition: TriggerDefinition) {
        let id = definition.id;
        self.index(id, &definition.point_ids);
        self.triggers.insert(id, Arc::new(TriggerSlot::new(definition)));
    }

    fn index(&self, id: Uuid, point_ids: &[String]) {
        for point_id in point_ids {
            let mut ids = self.by_point.entry(point_id.clone()).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }

    fn unindex(&self, id: Uuid, point_ids: &[String]) {
        for point_id in point_ids {
            if let Some(mut ids) = self.by_point.get_mut(point_id) {
                ids.retain(|existing| *existing != id);
            }
        }
        self.by_point.retain(|_, ids| !ids.is_empty());
    }
}

// src/runtime.rs - Update intake, per-point serialization and lifecycle
use crate::action::ActionExecutor;
use crate::config::Config;
use crate::engine::{FiredTrigger, TriggerEngine};
use crate::error::{Result, VigilError};
use crate::history::HistoryBatcher;
use crate::pipeline::{
    ChangeDetector, HistoryStage, Persister, ProcessingContext, ProcessingPipeline, Publisher,
    PipelineStage, StageKind,
};
use crate::point::{PointRegistry, ValueUpdate};
use crate::repository::{
    with_timeout, AlarmRepository, AliasResolver, EmailService, HistoryRepository, PublishSink,
    TriggerRepository, VariableRepository,
};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

/// External collaborators the runtime is wired against
///
/// Device drivers produce [`ValueUpdate`]s and call
/// [`Runtime::handle_update`]; everything downstream goes through these.
pub struct Collaborators {
    /// Last-value store
    pub variables: Arc<dyn VariableRepository>,
    /// Durable trigger store
    pub triggers: Arc<dyn TriggerRepository>,
    /// Alarm event sink
    pub alarms: Arc<dyn AlarmRepository>,
    /// Batched history sink
    pub history: Arc<dyn HistoryRepository>,
    /// Per-target alias lookup
    pub aliases: Arc<dyn AliasResolver>,
    /// Downstream publish sink; `None` disables republishing
    pub publish: Option<Arc<dyn PublishSink>>,
    /// Email service; `None` fails email actions
    pub email: Option<Arc<dyn EmailService>>,
}

/// Result of handling one update
#[derive(Debug)]
pub struct UpdateOutcome {
    /// Stage that short-circuited the pipeline, if any
    pub short_circuited_by: Option<&'static str>,
    /// Triggers that fired for this update
    pub fired: Vec<FiredTrigger>,
}

/// Snapshot of runtime counters
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStats {
    /// Updates fully handled (including short-circuited ones)
    pub updates_processed: u64,
    /// Updates dropped by change detection
    pub updates_unchanged: u64,
    /// Total trigger firings
    pub triggers_fired: u64,
    /// Declared points
    pub points: usize,
    /// Indexed trigger rules
    pub triggers: usize,
}

/// Owns the processing pipeline and the trigger engine
///
/// Updates for different points process concurrently; updates for the same
/// point are serialized through a per-point lock, so change detection never
/// races on the last known value.
pub struct Runtime {
    registry: Arc<PointRegistry>,
    variables: Arc<dyn VariableRepository>,
    pipeline: ProcessingPipeline,
    engine: TriggerEngine,
    batcher: Arc<HistoryBatcher>,
    point_locks: DashMap<String, Arc<Mutex<()>>>,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    repo_timeout: Duration,
    updates_processed: AtomicU64,
    updates_unchanged: AtomicU64,
    triggers_fired: AtomicU64,
}

struct InFlightGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.runtime.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            // notify_one stores a permit, so the drain loop cannot miss a
            // wakeup that lands between its counter check and its await
            self.runtime.idle.notify_one();
        }
    }
}

impl Runtime {
    /// Wire a runtime from a validated config and its collaborators
    ///
    /// Spawns the history flush timer; call [`Runtime::shutdown`] to stop it.
    pub fn new(config: &Config, collaborators: Collaborators) -> Result<Arc<Self>> {
        config.validate()?;

        let repo_timeout = Duration::from_millis(config.runtime.repository_timeout_ms);
        let action_timeout = Duration::from_millis(config.runtime.action_timeout_ms);

        let registry = Arc::new(PointRegistry::from_configs(&config.points));
        let batcher = HistoryBatcher::new(
            config.history.clone(),
            collaborators.history.clone(),
            repo_timeout,
        );
        batcher.spawn();

        let executor = ActionExecutor::new(
            collaborators.alarms.clone(),
            collaborators.email.clone(),
            action_timeout,
        );
        let engine = TriggerEngine::new(
            collaborators.triggers.clone(),
            registry.clone(),
            executor,
            repo_timeout,
        );

        let mut stages: Vec<Box<dyn PipelineStage>> = Vec::new();
        for kind in &config.pipeline.stages {
            stages.push(match kind {
                StageKind::ChangeDetect => Box::new(ChangeDetector),
                StageKind::Persist => Box::new(Persister::new(
                    collaborators.variables.clone(),
                    repo_timeout,
                )),
                StageKind::Publish => Box::new(Publisher::new(
                    registry.clone(),
                    collaborators.aliases.clone(),
                    collaborators.publish.clone(),
                    repo_timeout,
                )),
                StageKind::History => Box::new(HistoryStage::new(batcher.clone())),
            });
        }

        info!(
            points = registry.len(),
            stages = stages.len(),
            "runtime wired"
        );

        Ok(Arc::new(Self {
            registry,
            variables: collaborators.variables,
            pipeline: ProcessingPipeline::new(stages),
            engine,
            batcher,
            point_locks: DashMap::new(),
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            repo_timeout,
            updates_processed: AtomicU64::new(0),
            updates_unchanged: AtomicU64::new(0),
            triggers_fired: AtomicU64::new(0),
        }))
    }

    /// The trigger engine, for rule management and initial load
    pub fn triggers(&self) -> &TriggerEngine {
        &self.engine
    }

    /// The declared point registry
    pub fn registry(&self) -> &PointRegistry {
        &self.registry
    }

    /// Process one value update through the pipeline and the trigger engine
    ///
    /// Trigger evaluation runs for every update, including updates the
    /// pipeline short-circuited as unchanged; a held-steady value can still
    /// hold an alarm condition.
    pub async fn handle_update(&self, update: ValueUpdate) -> Result<UpdateOutcome> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let _in_flight = InFlightGuard { runtime: self };

        if !self.accepting.load(Ordering::Acquire) {
            return Err(VigilError::ShuttingDown);
        }

        let mut update = update;
        match self.registry.get(&update.point_id) {
            Some(point) => match update.value.coerce(point.data_type) {
                Some(coerced) => update.value = coerced,
                None => warn!(
                    point = %update.point_id,
                    declared = ?point.data_type,
                    actual = update.value.type_name(),
                    "value does not coerce to declared type, using raw value"
                ),
            },
            None => warn!(
                point = %update.point_id,
                "update for undeclared point, processing best-effort"
            ),
        }

        let lock = self
            .point_locks
            .entry(update.point_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _point_guard = lock.lock().await;

        let previous = match with_timeout(
            "last value read",
            self.repo_timeout,
            self.variables.get_last_value(&update.point_id),
        )
        .await
        {
            Ok(previous) => previous,
            Err(e) => {
                warn!(point = %update.point_id, "failed to read last value: {}", e);
                None
            }
        };

        let mut ctx = ProcessingContext::new(update, previous);
        let outcome = self.pipeline.execute(&mut ctx).await;

        let fired = self
            .engine
            .evaluate(&ctx.update.point_id, &ctx.update.value, ctx.update.timestamp)
            .await;

        self.updates_processed.fetch_add(1, Ordering::Relaxed);
        if outcome.short_circuited_by.is_some() {
            self.updates_unchanged.fetch_add(1, Ordering::Relaxed);
        }
        self.triggers_fired
            .fetch_add(fired.len() as u64, Ordering::Relaxed);

        Ok(UpdateOutcome {
            short_circuited_by: outcome.short_circuited_by,
            fired,
        })
    }

    /// Stop intake, drain in-flight executions, flush pending history
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("runtime shutting down, draining in-flight updates");

        while self.in_flight.load(Ordering::Acquire) != 0 {
            self.idle.notified().await;
        }

        self.batcher.shutdown().await;
        info!("runtime stopped");
    }

    /// Snapshot of the runtime counters
    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            updates_processed: self.updates_processed.load(Ordering::Relaxed),
            updates_unchanged: self.updates_unchanged.load(Ordering::Relaxed),
            triggers_fired: self.triggers_fired.load(Ordering::Relaxed),
            points: self.registry.len(),
            triggers: self.engine.len(),
        }
    }
}

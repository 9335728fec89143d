// src/pipeline.rs - Ordered stage execution over a single value update
use crate::error::Result;
use crate::history::{HistoryBatcher, HistoryRecord};
use crate::point::{PointRegistry, ValueUpdate};
use crate::repository::{with_timeout, AliasResolver, PublishSink, VariableRepository};
use crate::value::Value;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Mutable state shared by the stages of one pipeline execution
///
/// Owned exclusively by that execution; the per-point serialization in the
/// runtime guarantees no two executions for the same point share a context.
#[derive(Debug)]
pub struct ProcessingContext {
    /// The update being processed
    pub update: ValueUpdate,
    /// Last known value of the point before this update, if any
    pub previous: Option<Value>,
    handled: bool,
}

impl ProcessingContext {
    /// Wrap an update together with the point's previous value
    pub fn new(update: ValueUpdate, previous: Option<Value>) -> Self {
        Self {
            update,
            previous,
            handled: false,
        }
    }

    /// Signal that no further stage should run
    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    /// Whether a stage has short-circuited the execution
    pub fn is_handled(&self) -> bool {
        self.handled
    }
}

/// One step of the processing pipeline
///
/// Stages run in registration order. A stage may mark the context handled to
/// stop the stages after it; stages are never reordered or skipped otherwise.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Stable stage name used in logs and outcomes
    fn name(&self) -> &'static str;

    /// Process the update in the shared context
    async fn process(&self, ctx: &mut ProcessingContext) -> Result<()>;
}

/// Stage kinds available for the configurable pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Drop updates whose value equals the last known value
    ChangeDetect,
    /// Persist the accepted value to the variable store
    Persist,
    /// Republish the accepted value to downstream targets
    Publish,
    /// Buffer the accepted value for batched history writes
    History,
}

impl StageKind {
    /// The default stage order
    pub fn default_order() -> Vec<StageKind> {
        vec![
            StageKind::ChangeDetect,
            StageKind::Persist,
            StageKind::Publish,
            StageKind::History,
        ]
    }
}

/// Result of one pipeline execution
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    /// How many stages ran (including the short-circuiting one)
    pub stages_run: usize,
    /// Name of the stage that marked the update handled, if any
    pub short_circuited_by: Option<&'static str>,
}

/// Runs an ordered, fixed list of stages over one update
pub struct ProcessingPipeline {
    stages: Vec<Box<dyn PipelineStage>>,
}

impl ProcessingPipeline {
    /// Build a pipeline from an ordered stage list
    pub fn new(stages: Vec<Box<dyn PipelineStage>>) -> Self {
        Self { stages }
    }

    /// Execute all stages in order, honoring the handled flag
    ///
    /// A stage error is logged and does not abort the remaining stages; no
    /// failure in one update may take the processing loop down.
    pub async fn execute(&self, ctx: &mut ProcessingContext) -> PipelineOutcome {
        let mut stages_run = 0;
        let mut short_circuited_by = None;

        for stage in &self.stages {
            stages_run += 1;
            if let Err(e) = stage.process(ctx).await {
                warn!(
                    stage = stage.name(),
                    point = %ctx.update.point_id,
                    "pipeline stage failed: {}", e
                );
            }
            if ctx.is_handled() {
                short_circuited_by = Some(stage.name());
                debug!(
                    stage = stage.name(),
                    point = %ctx.update.point_id,
                    "update handled, stopping pipeline"
                );
                break;
            }
        }

        PipelineOutcome {
            stages_run,
            short_circuited_by,
        }
    }

    /// Number of registered stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

// ============================================================================
// STAGES
// ============================================================================

/// Drops updates that do not change the point's value
///
/// Comparison is exact on the stored representation. A held-steady value is
/// still evaluated by the trigger engine; that happens outside the pipeline.
pub struct ChangeDetector;

#[async_trait]
impl PipelineStage for ChangeDetector {
    fn name(&self) -> &'static str {
        "change_detect"
    }

    async fn process(&self, ctx: &mut ProcessingContext) -> Result<()> {
        if ctx.previous.as_ref() == Some(&ctx.update.value) {
            ctx.mark_handled();
        }
        Ok(())
    }
}

/// Writes the accepted value through the variable repository
pub struct Persister {
    variables: Arc<dyn VariableRepository>,
    timeout: Duration,
}

impl Persister {
    /// Build the stage over a variable repository
    pub fn new(variables: Arc<dyn VariableRepository>, timeout: Duration) -> Self {
        Self { variables, timeout }
    }
}

#[async_trait]
impl PipelineStage for Persister {
    fn name(&self) -> &'static str {
        "persist"
    }

    async fn process(&self, ctx: &mut ProcessingContext) -> Result<()> {
        with_timeout(
            "variable write",
            self.timeout,
            self.variables
                .set_value(&ctx.update.point_id, ctx.update.value.clone()),
        )
        .await
    }
}

/// Fans the accepted value out to the point's downstream targets
pub struct Publisher {
    registry: Arc<PointRegistry>,
    aliases: Arc<dyn AliasResolver>,
    sink: Option<Arc<dyn PublishSink>>,
    timeout: Duration,
}

impl Publisher {
    /// Build the stage; with no sink configured every publish is a no-op
    pub fn new(
        registry: Arc<PointRegistry>,
        aliases: Arc<dyn AliasResolver>,
        sink: Option<Arc<dyn PublishSink>>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            aliases,
            sink,
            timeout,
        }
    }
}

#[async_trait]
impl PipelineStage for Publisher {
    fn name(&self) -> &'static str {
        "publish"
    }

    async fn process(&self, ctx: &mut ProcessingContext) -> Result<()> {
        let Some(sink) = &self.sink else {
            return Ok(());
        };
        let Some(point) = self.registry.get(&ctx.update.point_id) else {
            return Ok(());
        };

        for target_id in &point.publish_targets {
            let alias = match with_timeout(
                "alias lookup",
                self.timeout,
                self.aliases.get_alias(&point.id, target_id),
            )
            .await
            {
                Ok(Some(alias)) => alias,
                Ok(None) => {
                    warn!(
                        point = %point.id,
                        target = %target_id,
                        "no alias mapped for target, skipping publish"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(
                        point = %point.id,
                        target = %target_id,
                        "alias lookup failed: {}", e
                    );
                    continue;
                }
            };

            if let Err(e) = with_timeout(
                "publish",
                self.timeout,
                sink.publish(target_id, &alias, &ctx.update.value),
            )
            .await
            {
                warn!(
                    point = %point.id,
                    target = %target_id,
                    "publish failed: {}", e
                );
            }
        }
        Ok(())
    }
}

/// Buffers the accepted value for the history batcher
pub struct HistoryStage {
    batcher: Arc<HistoryBatcher>,
}

impl HistoryStage {
    /// Build the stage over a running batcher
    pub fn new(batcher: Arc<HistoryBatcher>) -> Self {
        Self { batcher }
    }
}

#[async_trait]
impl PipelineStage for HistoryStage {
    fn name(&self) -> &'static str {
        "history"
    }

    async fn process(&self, ctx: &mut ProcessingContext) -> Result<()> {
        self.batcher
            .append(HistoryRecord {
                point_id: ctx.update.point_id.clone(),
                value: ctx.update.value.clone(),
                timestamp: ctx.update.timestamp,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VigilError;
    use crate::point::SourceProtocol;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStage {
        calls: Arc<AtomicUsize>,
        mark_handled: bool,
        fail: bool,
    }

    #[async_trait]
    impl PipelineStage for CountingStage {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn process(&self, ctx: &mut ProcessingContext) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.mark_handled {
                ctx.mark_handled();
            }
            if self.fail {
                return Err(VigilError::Repository("stage broke".into()));
            }
            Ok(())
        }
    }

    fn ctx(value: Value, previous: Option<Value>) -> ProcessingContext {
        ProcessingContext::new(
            ValueUpdate::new("p1", value, SourceProtocol::Internal),
            previous,
        )
    }

    #[tokio::test]
    async fn handled_flag_stops_later_stages() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let pipeline = ProcessingPipeline::new(vec![
            Box::new(CountingStage { calls: first.clone(), mark_handled: true, fail: false }),
            Box::new(CountingStage { calls: second.clone(), mark_handled: false, fail: false }),
        ]);

        let mut ctx = ctx(Value::Int(1), None);
        let outcome = pipeline.execute(&mut ctx).await;

        assert_eq!(outcome.stages_run, 1);
        assert_eq!(outcome.short_circuited_by, Some("counting"));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stage_failure_does_not_abort_the_rest() {
        let after_failure = Arc::new(AtomicUsize::new(0));
        let pipeline = ProcessingPipeline::new(vec![
            Box::new(CountingStage {
                calls: Arc::new(AtomicUsize::new(0)),
                mark_handled: false,
                fail: true,
            }),
            Box::new(CountingStage {
                calls: after_failure.clone(),
                mark_handled: false,
                fail: false,
            }),
        ]);

        let mut ctx = ctx(Value::Int(1), None);
        let outcome = pipeline.execute(&mut ctx).await;

        assert_eq!(outcome.stages_run, 2);
        assert_eq!(outcome.short_circuited_by, None);
        assert_eq!(after_failure.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn change_detector_marks_equal_values_handled() {
        let detector = ChangeDetector;

        let mut unchanged = ctx(Value::Int(5), Some(Value::Int(5)));
        detector.process(&mut unchanged).await.unwrap();
        assert!(unchanged.is_handled());

        let mut changed = ctx(Value::Int(12), Some(Value::Int(5)));
        detector.process(&mut changed).await.unwrap();
        assert!(!changed.is_handled());

        let mut first_value = ctx(Value::Int(5), None);
        detector.process(&mut first_value).await.unwrap();
        assert!(!first_value.is_handled());
    }
}

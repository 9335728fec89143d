use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use vigil::*;

fn at(secs: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap() + chrono::Duration::seconds(secs as i64)
}

fn update(point_id: &str, value: Value, ts: DateTime<Utc>) -> ValueUpdate {
    ValueUpdate {
        point_id: point_id.to_string(),
        value,
        timestamp: ts,
        source: SourceProtocol::Internal,
    }
}

fn test_config(batch_size: usize) -> Config {
    Config::from_yaml(&format!(
        r#"
runtime:
  repository_timeout_ms: 1000
  action_timeout_ms: 1000
history:
  batch_size: {}
  flush_interval_secs: 3600
  max_buffered: 1000
points:
  - id: p1
    name: "Boiler pressure"
    data_type: float
    publish_targets: [scada]
"#,
        batch_size
    ))
    .unwrap()
}

/// Records every published value
#[derive(Default)]
struct RecordingSink {
    published: parking_lot::Mutex<Vec<(String, String, Value)>>,
}

#[async_trait]
impl PublishSink for RecordingSink {
    async fn publish(&self, target_id: &str, alias: &str, value: &Value) -> Result<()> {
        self.published
            .lock()
            .push((target_id.to_string(), alias.to_string(), value.clone()));
        Ok(())
    }
}

/// Always fails, standing in for a flapping mail server
struct FailingEmail;

#[async_trait]
impl EmailService for FailingEmail {
    async fn send(&self, _recipients: &[String], _subject: &str, _body: &str) -> Result<()> {
        Err(VigilError::Email("mail server unreachable".into()))
    }
}

/// Counts writes and detects overlapping calls
#[derive(Default)]
struct GuardedVariableStore {
    inner: MemoryVariableStore,
    set_calls: AtomicUsize,
    busy: AtomicBool,
    overlaps: AtomicUsize,
}

#[async_trait]
impl VariableRepository for GuardedVariableStore {
    async fn get_last_value(&self, point_id: &str) -> Result<Option<Value>> {
        self.inner.get_last_value(point_id).await
    }

    async fn set_value(&self, point_id: &str, value: Value) -> Result<()> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        self.busy.store(false, Ordering::SeqCst);
        self.inner.set_value(point_id, value).await
    }
}

struct Harness {
    runtime: Arc<Runtime>,
    variables: Arc<MemoryVariableStore>,
    triggers: Arc<MemoryTriggerStore>,
    alarms: Arc<MemoryAlarmLog>,
    history: Arc<MemoryHistoryStore>,
    sink: Arc<RecordingSink>,
}

fn harness(batch_size: usize, email: Option<Arc<dyn EmailService>>) -> Harness {
    let variables = Arc::new(MemoryVariableStore::new());
    let triggers = Arc::new(MemoryTriggerStore::new());
    let alarms = Arc::new(MemoryAlarmLog::new());
    let history = Arc::new(MemoryHistoryStore::new());
    let sink = Arc::new(RecordingSink::default());

    let aliases = Arc::new(StaticAliasResolver::new());
    aliases.insert("p1", "scada", "north/boiler-pressure");

    let runtime = Runtime::new(
        &test_config(batch_size),
        Collaborators {
            variables: variables.clone(),
            triggers: triggers.clone(),
            alarms: alarms.clone(),
            history: history.clone(),
            aliases,
            publish: Some(sink.clone()),
            email,
        },
    )
    .unwrap();

    Harness {
        runtime,
        variables,
        triggers,
        alarms,
        history,
        sink,
    }
}

fn log_trigger(condition: TriggerCondition) -> TriggerDefinition {
    TriggerDefinition::new(
        "t1",
        vec!["p1".into()],
        condition,
        TriggerAction::WriteLog(LogActionConfig {
            level: LogActionLevel::Info,
            message_template: "{point} = {value}".into(),
        }),
    )
}

#[tokio::test]
async fn end_to_end_greater_than_firing() {
    let h = harness(1, None);
    h.variables.set_value("p1", Value::Float(5.0)).await.unwrap();
    let id = h
        .runtime
        .triggers()
        .create(log_trigger(TriggerCondition::GreaterThan { threshold: 10.0 }))
        .await
        .unwrap();

    let outcome = h
        .runtime
        .handle_update(update("p1", Value::Float(12.0), at(0)))
        .await
        .unwrap();

    // pipeline ran to completion
    assert_eq!(outcome.short_circuited_by, None);
    assert_eq!(
        h.variables.get_last_value("p1").await.unwrap(),
        Some(Value::Float(12.0))
    );
    assert_eq!(
        h.sink.published.lock().as_slice(),
        &[(
            "scada".to_string(),
            "north/boiler-pressure".to_string(),
            Value::Float(12.0)
        )]
    );
    let records = h.history.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value, Value::Float(12.0));

    // trigger fired and its state was persisted
    assert_eq!(outcome.fired.len(), 1);
    assert_eq!(outcome.fired[0].trigger_id, id);
    assert_eq!(h.triggers.get(id).unwrap().last_triggered_at, Some(at(0)));

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn repeated_value_short_circuits_after_change_detection() {
    let h = harness(1, None);

    let first = h
        .runtime
        .handle_update(update("p1", Value::Float(7.0), at(0)))
        .await
        .unwrap();
    assert_eq!(first.short_circuited_by, None);

    let second = h
        .runtime
        .handle_update(update("p1", Value::Float(7.0), at(1)))
        .await
        .unwrap();
    assert_eq!(second.short_circuited_by, Some("change_detect"));

    // the unchanged update reached neither publish nor history
    assert_eq!(h.sink.published.lock().len(), 1);
    assert_eq!(h.history.records().len(), 1);
    assert_eq!(h.runtime.stats().updates_unchanged, 1);

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn unchanged_value_still_evaluates_triggers() {
    let h = harness(1, None);
    h.variables.set_value("p1", Value::Float(42.0)).await.unwrap();
    h.runtime
        .triggers()
        .create(log_trigger(TriggerCondition::OutOfRange { lower: 0.0, upper: 10.0 }))
        .await
        .unwrap();

    let outcome = h
        .runtime
        .handle_update(update("p1", Value::Float(42.0), at(0)))
        .await
        .unwrap();

    assert_eq!(outcome.short_circuited_by, Some("change_detect"));
    assert_eq!(outcome.fired.len(), 1);

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn suppression_window_debounces_refires() {
    let h = harness(1, None);
    h.runtime
        .triggers()
        .create(
            log_trigger(TriggerCondition::GreaterThan { threshold: 10.0 }).with_suppression(30),
        )
        .await
        .unwrap();

    let first = h
        .runtime
        .handle_update(update("p1", Value::Float(12.0), at(0)))
        .await
        .unwrap();
    assert_eq!(first.fired.len(), 1);

    let inside_window = h
        .runtime
        .handle_update(update("p1", Value::Float(13.0), at(10)))
        .await
        .unwrap();
    assert_eq!(inside_window.fired.len(), 0);

    let after_window = h
        .runtime
        .handle_update(update("p1", Value::Float(14.0), at(31)))
        .await
        .unwrap();
    assert_eq!(after_window.fired.len(), 1);

    h.runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_point_updates_are_serialized() {
    let variables = Arc::new(GuardedVariableStore::default());
    let runtime = Runtime::new(
        &test_config(1000),
        Collaborators {
            variables: variables.clone(),
            triggers: Arc::new(MemoryTriggerStore::new()),
            alarms: Arc::new(MemoryAlarmLog::new()),
            history: Arc::new(MemoryHistoryStore::new()),
            aliases: Arc::new(StaticAliasResolver::new()),
            publish: None,
            email: None,
        },
    )
    .unwrap();

    let tasks: Vec<_> = (0u32..20)
        .map(|i| {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                runtime
                    .handle_update(update("p1", Value::Float(i as f64), at(i)))
                    .await
            })
        })
        .collect();
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    // every distinct value was persisted, with no interleaved executions
    assert_eq!(variables.set_calls.load(Ordering::SeqCst), 20);
    assert_eq!(variables.overlaps.load(Ordering::SeqCst), 0);

    runtime.shutdown().await;
}

#[tokio::test]
async fn failed_action_does_not_reopen_the_firing() {
    let h = harness(1, Some(Arc::new(FailingEmail)));
    let rule = TriggerDefinition::new(
        "mail on high",
        vec!["p1".into()],
        TriggerCondition::GreaterThan { threshold: 10.0 },
        TriggerAction::SendEmail(EmailActionConfig {
            recipients: vec!["ops@example.com".into()],
            subject_template: "{trigger}".into(),
            body_template: "{point} = {value}".into(),
        }),
    )
    .with_suppression(60);
    let id = h.runtime.triggers().create(rule).await.unwrap();

    let first = h
        .runtime
        .handle_update(update("p1", Value::Float(12.0), at(0)))
        .await
        .unwrap();
    assert_eq!(first.fired.len(), 1);
    // the firing stands even though the email never went out
    assert_eq!(h.triggers.get(id).unwrap().last_triggered_at, Some(at(0)));

    let second = h
        .runtime
        .handle_update(update("p1", Value::Float(13.0), at(5)))
        .await
        .unwrap();
    assert_eq!(second.fired.len(), 0);

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn alarm_action_persists_an_alarm_event() {
    let h = harness(1, None);
    h.runtime
        .triggers()
        .create(TriggerDefinition::new(
            "pressure band",
            vec!["p1".into()],
            TriggerCondition::OutOfRange { lower: 10.0, upper: 20.0 },
            TriggerAction::ActivateAlarm(AlarmActionConfig {
                kind: AlarmKind::OutOfBand,
                message_template: "{point} out of band at {value}".into(),
            }),
        ))
        .await
        .unwrap();

    h.runtime
        .handle_update(update("p1", Value::Float(25.0), at(0)))
        .await
        .unwrap();

    let events = h.alarms.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].point_name, "Boiler pressure");
    assert_eq!(events[0].threshold, 20.0);
    assert_eq!(events[0].message, "Boiler pressure out of band at 25");

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn shutdown_flushes_history_and_rejects_new_updates() {
    let h = harness(50, None);

    for i in 0u32..3 {
        h.runtime
            .handle_update(update("p1", Value::Float(f64::from(i)), at(i)))
            .await
            .unwrap();
    }
    assert!(h.history.records().is_empty());

    h.runtime.shutdown().await;
    assert_eq!(h.history.records().len(), 3);

    let rejected = h
        .runtime
        .handle_update(update("p1", Value::Float(99.0), at(10)))
        .await;
    assert!(matches!(rejected, Err(VigilError::ShuttingDown)));
}

#[tokio::test]
async fn text_update_on_float_point_is_coerced() {
    let h = harness(1, None);
    h.runtime
        .triggers()
        .create(log_trigger(TriggerCondition::GreaterThan { threshold: 10.0 }))
        .await
        .unwrap();

    let outcome = h
        .runtime
        .handle_update(update("p1", Value::Text("12.5".into()), at(0)))
        .await
        .unwrap();

    assert_eq!(outcome.fired.len(), 1);
    assert_eq!(
        h.variables.get_last_value("p1").await.unwrap(),
        Some(Value::Float(12.5))
    );

    h.runtime.shutdown().await;
}

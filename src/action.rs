// src/action.rs - Polymorphic action dispatch for fired triggers
use crate::error::{Result, VigilError};
use crate::repository::{with_timeout, AlarmRepository, EmailService};
use crate::trigger::{AlarmKind, TriggerAction, TriggerCondition};
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// An alarm raised by the activate-alarm action
///
/// Immutable once created; persisted through the alarm repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmEvent {
    /// Point that produced the alarming value
    pub point_id: String,
    /// Display name of the point
    pub point_name: String,
    /// The value that matched the trigger condition
    pub value: Value,
    /// The condition bound the value was measured against
    pub threshold: f64,
    /// Rendered alarm message
    pub message: String,
    /// Alarm classification
    pub kind: AlarmKind,
    /// When the firing update was observed
    pub timestamp: DateTime<Utc>,
}

/// Everything an action needs about the firing that caused it
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Id of the fired trigger
    pub trigger_id: Uuid,
    /// Name of the fired trigger
    pub trigger_name: String,
    /// The condition that matched
    pub condition: TriggerCondition,
    /// The action to dispatch
    pub action: TriggerAction,
    /// Point whose update fired the trigger
    pub point_id: String,
    /// Display name of the point
    pub point_name: String,
    /// The matching value, exact representation
    pub value: Value,
    /// The matching value coerced to a numeric
    pub numeric: f64,
    /// Timestamp of the firing update
    pub timestamp: DateTime<Utc>,
}

/// Substitute firing details into a message template
///
/// Recognized placeholders: `{point}`, `{point_id}`, `{value}`,
/// `{threshold}`, `{timestamp}`, `{trigger}`.
pub fn render_template(template: &str, ctx: &ActionContext) -> String {
    template
        .replace("{point}", &ctx.point_name)
        .replace("{point_id}", &ctx.point_id)
        .replace("{value}", &ctx.value.to_string())
        .replace(
            "{threshold}",
            &ctx.condition.reference_bound(ctx.numeric).to_string(),
        )
        .replace("{timestamp}", &ctx.timestamp.to_rfc3339())
        .replace("{trigger}", &ctx.trigger_name)
}

/// Executes the side effect of a fired trigger
///
/// Each action kind fails in isolation: an error here never rolls back the
/// firing that caused it.
pub struct ActionExecutor {
    alarms: Arc<dyn AlarmRepository>,
    email: Option<Arc<dyn EmailService>>,
    timeout: Duration,
}

impl ActionExecutor {
    /// Build an executor over the alarm repository and optional email service
    pub fn new(
        alarms: Arc<dyn AlarmRepository>,
        email: Option<Arc<dyn EmailService>>,
        timeout: Duration,
    ) -> Self {
        Self { alarms, email, timeout }
    }

    /// Dispatch the action carried by the context
    pub async fn execute(&self, ctx: &ActionContext) -> Result<()> {
        match &ctx.action {
            TriggerAction::ActivateAlarm(config) => {
                let event = AlarmEvent {
                    point_id: ctx.point_id.clone(),
                    point_name: ctx.point_name.clone(),
                    value: ctx.value.clone(),
                    threshold: ctx.condition.reference_bound(ctx.numeric),
                    message: render_template(&config.message_template, ctx),
                    kind: config.kind,
                    timestamp: ctx.timestamp,
                };
                with_timeout("alarm store", self.timeout, self.alarms.add(event)).await?;
                info!(
                    trigger = %ctx.trigger_id,
                    point = %ctx.point_id,
                    "alarm raised"
                );
                Ok(())
            }
            TriggerAction::SendEmail(config) => {
                let service = self.email.as_ref().ok_or_else(|| {
                    VigilError::Email(format!(
                        "trigger '{}' wants email but no email service is configured",
                        ctx.trigger_name
                    ))
                })?;
                let subject = render_template(&config.subject_template, ctx);
                let body = render_template(&config.body_template, ctx);
                with_timeout(
                    "email send",
                    self.timeout,
                    service.send(&config.recipients, &subject, &body),
                )
                .await?;
                info!(
                    trigger = %ctx.trigger_id,
                    recipients = config.recipients.len(),
                    "notification email sent"
                );
                Ok(())
            }
            TriggerAction::WriteLog(config) => {
                let message = render_template(&config.message_template, ctx);
                match config.level {
                    crate::trigger::LogActionLevel::Info => info!(
                        trigger = %ctx.trigger_id,
                        point = %ctx.point_id,
                        value = %ctx.value,
                        "{}", message
                    ),
                    crate::trigger::LogActionLevel::Warn => warn!(
                        trigger = %ctx.trigger_id,
                        point = %ctx.point_id,
                        value = %ctx.value,
                        "{}", message
                    ),
                    crate::trigger::LogActionLevel::Error => error!(
                        trigger = %ctx.trigger_id,
                        point = %ctx.point_id,
                        value = %ctx.value,
                        "{}", message
                    ),
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryAlarmLog;
    use crate::trigger::{AlarmActionConfig, LogActionConfig, LogActionLevel};
    use chrono::TimeZone;

    fn context(action: TriggerAction) -> ActionContext {
        ActionContext {
            trigger_id: Uuid::new_v4(),
            trigger_name: "high temp".into(),
            condition: TriggerCondition::GreaterThan { threshold: 10.0 },
            action,
            point_id: "p1".into(),
            point_name: "Reactor temperature".into(),
            value: Value::Float(12.0),
            numeric: 12.0,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 15, 8, 30, 0).unwrap(),
        }
    }

    #[test]
    fn template_substitution() {
        let ctx = context(TriggerAction::WriteLog(LogActionConfig {
            level: LogActionLevel::Info,
            message_template: "x".into(),
        }));
        let rendered = render_template("{trigger}: {point} = {value} (limit {threshold})", &ctx);
        assert_eq!(rendered, "high temp: Reactor temperature = 12 (limit 10)");
    }

    #[tokio::test]
    async fn activate_alarm_persists_an_event() {
        let alarms = Arc::new(MemoryAlarmLog::new());
        let executor = ActionExecutor::new(alarms.clone(), None, Duration::from_secs(1));

        let ctx = context(TriggerAction::ActivateAlarm(AlarmActionConfig {
            kind: AlarmKind::HighAlarm,
            message_template: "{point} above {threshold}".into(),
        }));
        executor.execute(&ctx).await.unwrap();

        let events = alarms.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].threshold, 10.0);
        assert_eq!(events[0].message, "Reactor temperature above 10");
        assert_eq!(events[0].kind, AlarmKind::HighAlarm);
    }

    #[tokio::test]
    async fn email_without_service_is_an_error() {
        let alarms = Arc::new(MemoryAlarmLog::new());
        let executor = ActionExecutor::new(alarms, None, Duration::from_secs(1));

        let ctx = context(TriggerAction::SendEmail(crate::trigger::EmailActionConfig {
            recipients: vec!["ops@example.com".into()],
            subject_template: "alarm".into(),
            body_template: "{value}".into(),
        }));
        assert!(matches!(executor.execute(&ctx).await, Err(VigilError::Email(_))));
    }
}

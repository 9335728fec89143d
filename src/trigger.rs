// src/trigger.rs - Trigger rule model
//
// A trigger associates one or more points with a condition and an action.
// Conditions and actions are tagged variants with structured payloads, so a
// definition that parses is structurally complete; validate() covers the
// remaining invariants (bound ordering, finite parameters, non-empty action
// payloads). Validation happens at creation time, never at evaluation time.
use crate::error::{Result, VigilError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Condition evaluated against a point's new value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TriggerCondition {
    /// value > threshold
    GreaterThan {
        /// Comparison threshold
        threshold: f64,
    },
    /// value < threshold
    LessThan {
        /// Comparison threshold
        threshold: f64,
    },
    /// value == threshold, optionally within a tolerance band
    EqualTo {
        /// Comparison threshold
        threshold: f64,
        /// Half-width of the acceptance band; `None` means exact equality
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tolerance: Option<f64>,
    },
    /// value != threshold, optionally outside a tolerance band
    NotEqualTo {
        /// Comparison threshold
        threshold: f64,
        /// Half-width of the rejection band; `None` means exact inequality
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tolerance: Option<f64>,
    },
    /// lower <= value <= upper (inclusive on both bounds)
    InRange {
        /// Lower bound, inclusive
        lower: f64,
        /// Upper bound, inclusive
        upper: f64,
    },
    /// value < lower or value > upper (strictly outside the band)
    OutOfRange {
        /// Lower bound of the band
        lower: f64,
        /// Upper bound of the band
        upper: f64,
    },
}

impl TriggerCondition {
    /// Evaluate the condition against a numeric value
    pub fn matches(&self, value: f64) -> bool {
        match self {
            TriggerCondition::GreaterThan { threshold } => value > *threshold,
            TriggerCondition::LessThan { threshold } => value < *threshold,
            TriggerCondition::EqualTo { threshold, tolerance } => match tolerance {
                Some(t) => (value - threshold).abs() <= *t,
                None => value == *threshold,
            },
            TriggerCondition::NotEqualTo { threshold, tolerance } => match tolerance {
                Some(t) => (value - threshold).abs() > *t,
                None => value != *threshold,
            },
            TriggerCondition::InRange { lower, upper } => *lower <= value && value <= *upper,
            TriggerCondition::OutOfRange { lower, upper } => value < *lower || value > *upper,
        }
    }

    /// The bound a matching value is measured against
    ///
    /// Used as the threshold recorded on alarm events. Range conditions
    /// report the bound nearest to (or crossed by) the value.
    pub fn reference_bound(&self, value: f64) -> f64 {
        match self {
            TriggerCondition::GreaterThan { threshold }
            | TriggerCondition::LessThan { threshold }
            | TriggerCondition::EqualTo { threshold, .. }
            | TriggerCondition::NotEqualTo { threshold, .. } => *threshold,
            TriggerCondition::InRange { lower, upper } => {
                if (value - lower).abs() <= (upper - value).abs() {
                    *lower
                } else {
                    *upper
                }
            }
            TriggerCondition::OutOfRange { lower, upper } => {
                if value < *lower {
                    *lower
                } else {
                    *upper
                }
            }
        }
    }

    /// Short kind name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerCondition::GreaterThan { .. } => "greater_than",
            TriggerCondition::LessThan { .. } => "less_than",
            TriggerCondition::EqualTo { .. } => "equal_to",
            TriggerCondition::NotEqualTo { .. } => "not_equal_to",
            TriggerCondition::InRange { .. } => "in_range",
            TriggerCondition::OutOfRange { .. } => "out_of_range",
        }
    }

    fn validate(&self) -> Result<()> {
        let check_finite = |name: &str, v: f64| {
            if v.is_finite() {
                Ok(())
            } else {
                Err(VigilError::InvalidTrigger(format!(
                    "{} must be finite, got {}",
                    name, v
                )))
            }
        };

        match self {
            TriggerCondition::GreaterThan { threshold }
            | TriggerCondition::LessThan { threshold } => check_finite("threshold", *threshold),
            TriggerCondition::EqualTo { threshold, tolerance }
            | TriggerCondition::NotEqualTo { threshold, tolerance } => {
                check_finite("threshold", *threshold)?;
                if let Some(t) = tolerance {
                    check_finite("tolerance", *t)?;
                    if *t < 0.0 {
                        return Err(VigilError::InvalidTrigger(format!(
                            "tolerance must be non-negative, got {}",
                            t
                        )));
                    }
                }
                Ok(())
            }
            TriggerCondition::InRange { lower, upper }
            | TriggerCondition::OutOfRange { lower, upper } => {
                check_finite("lower", *lower)?;
                check_finite("upper", *upper)?;
                if lower > upper {
                    return Err(VigilError::InvalidTrigger(format!(
                        "lower bound {} exceeds upper bound {}",
                        lower, upper
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Alarm classification recorded on raised alarm events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    /// Value exceeded a high limit
    HighAlarm,
    /// Value fell below a low limit
    LowAlarm,
    /// Value left its permitted band
    OutOfBand,
    /// Value deviates from an expected setpoint
    Deviation,
    /// Discrete status alarm
    Status,
}

/// Log level for the write-log action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogActionLevel {
    /// Informational entry
    Info,
    /// Warning entry
    Warn,
    /// Error entry
    Error,
}

/// Configuration of the raise-alarm action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmActionConfig {
    /// Classification stamped on the raised alarm
    pub kind: AlarmKind,
    /// Alarm message; supports `{point}`, `{value}`, `{threshold}`,
    /// `{timestamp}` and `{trigger}` placeholders
    pub message_template: String,
}

/// Configuration of the send-email action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailActionConfig {
    /// Recipient addresses
    pub recipients: Vec<String>,
    /// Subject line template
    pub subject_template: String,
    /// Body template
    pub body_template: String,
}

/// Configuration of the write-log action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogActionConfig {
    /// Level the entry is emitted at
    #[serde(default = "default_log_level")]
    pub level: LogActionLevel,
    /// Log message template
    pub message_template: String,
}

fn default_log_level() -> LogActionLevel {
    LogActionLevel::Info
}

/// Action dispatched when a trigger fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "config")]
pub enum TriggerAction {
    /// Raise and persist an alarm event
    ActivateAlarm(AlarmActionConfig),
    /// Send an email notification
    SendEmail(EmailActionConfig),
    /// Emit a structured log entry
    WriteLog(LogActionConfig),
}

impl TriggerAction {
    /// Short kind name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerAction::ActivateAlarm(_) => "activate_alarm",
            TriggerAction::SendEmail(_) => "send_email",
            TriggerAction::WriteLog(_) => "write_log",
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            TriggerAction::ActivateAlarm(config) => {
                if config.message_template.trim().is_empty() {
                    return Err(VigilError::InvalidTrigger(
                        "alarm message template is empty".into(),
                    ));
                }
            }
            TriggerAction::SendEmail(config) => {
                if config.recipients.is_empty()
                    || config.recipients.iter().any(|r| r.trim().is_empty())
                {
                    return Err(VigilError::InvalidTrigger(
                        "email action needs at least one non-empty recipient".into(),
                    ));
                }
                if config.subject_template.trim().is_empty() {
                    return Err(VigilError::InvalidTrigger(
                        "email subject template is empty".into(),
                    ));
                }
                if config.body_template.trim().is_empty() {
                    return Err(VigilError::InvalidTrigger(
                        "email body template is empty".into(),
                    ));
                }
            }
            TriggerAction::WriteLog(config) => {
                if config.message_template.trim().is_empty() {
                    return Err(VigilError::InvalidTrigger(
                        "log message template is empty".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A user-defined trigger rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDefinition {
    /// Unique trigger identifier
    pub id: Uuid,
    /// Human-readable rule name
    pub name: String,
    /// Points this rule watches
    pub point_ids: Vec<String>,
    /// Inactive rules are indexed but never evaluated
    pub is_active: bool,
    /// Condition evaluated on every update of a watched point
    pub condition: TriggerCondition,
    /// Action dispatched on a claimed firing
    pub action: TriggerAction,
    /// Re-fire suppression window; `None` disables suppression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppression_secs: Option<u64>,
    /// Timestamp of the last claimed firing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl TriggerDefinition {
    /// Build an active rule with a fresh id and no suppression
    pub fn new(
        name: impl Into<String>,
        point_ids: Vec<String>,
        condition: TriggerCondition,
        action: TriggerAction,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            point_ids,
            is_active: true,
            condition,
            action,
            suppression_secs: None,
            last_triggered_at: None,
        }
    }

    /// Set the suppression window
    pub fn with_suppression(mut self, secs: u64) -> Self {
        self.suppression_secs = Some(secs);
        self
    }

    /// Validate the definition; invalid rules are rejected at creation
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(VigilError::InvalidTrigger("trigger name is empty".into()));
        }
        if self.point_ids.is_empty() {
            return Err(VigilError::InvalidTrigger(format!(
                "trigger '{}' references no points",
                self.name
            )));
        }
        self.condition.validate()?;
        self.action.validate()
    }
}

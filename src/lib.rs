//! VIGIL - Value Ingestion, Guarding, and Industrial Logging
//!
//! A field-value processing engine. Device drivers (S7, OPC UA, MQTT) hand
//! live values to the [`Runtime`]; VIGIL detects meaningful changes, persists
//! and republishes accepted values, batches history writes, and evaluates
//! user-defined trigger rules that raise alarms, send notifications, or write
//! log entries with debounce/suppression semantics.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vigil::{
//!     Collaborators, Config, MemoryAlarmLog, MemoryHistoryStore, MemoryTriggerStore,
//!     MemoryVariableStore, Runtime, SourceProtocol, StaticAliasResolver, Value, ValueUpdate,
//! };
//!
//! # async fn run() -> vigil::Result<()> {
//! let config = Config::from_file("config.yaml")?;
//! let runtime = Runtime::new(&config, Collaborators {
//!     variables: Arc::new(MemoryVariableStore::new()),
//!     triggers: Arc::new(MemoryTriggerStore::new()),
//!     alarms: Arc::new(MemoryAlarmLog::new()),
//!     history: Arc::new(MemoryHistoryStore::new()),
//!     aliases: Arc::new(StaticAliasResolver::new()),
//!     publish: None,
//!     email: None,
//! })?;
//! runtime.triggers().load().await?;
//!
//! runtime
//!     .handle_update(ValueUpdate::new("plc1.db1.temp", Value::Float(21.5), SourceProtocol::S7))
//!     .await?;
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// ============================================================================
// CORE MODULES
// ============================================================================

/// Structured error types used throughout the crate
pub mod error;

/// Type-safe value system for monitored points
pub mod value;

/// Point metadata, incoming updates and the point registry
pub mod point;

/// Async trait seams for every external collaborator
pub mod repository;

/// Ordered, short-circuiting stage execution over one update
pub mod pipeline;

/// Time/size batched history writer
pub mod history;

/// Trigger rule model with creation-time validation
pub mod trigger;

/// Trigger evaluation engine with suppression and atomic firing claims
pub mod engine;

/// Polymorphic action dispatch for fired triggers
pub mod action;

/// Update intake, per-point serialization and lifecycle
pub mod runtime;

/// Configuration management with YAML support and validation
pub mod config;

// ============================================================================
// ADAPTER MODULES (feature-gated)
// ============================================================================

#[cfg(feature = "mqtt")]
/// MQTT publish sink backed by rumqttc
pub mod mqtt;

#[cfg(feature = "email")]
/// SMTP email service backed by lettre
pub mod email;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use action::{render_template, ActionContext, ActionExecutor, AlarmEvent};
pub use config::{Config, PipelineConfig, RuntimeTuning};
pub use engine::{FiredTrigger, TriggerEngine};
pub use error::{Result, VigilError};
pub use history::{HistoryBatcher, HistoryConfig, HistoryRecord};
pub use pipeline::{
    ChangeDetector, HistoryStage, Persister, PipelineOutcome, PipelineStage, ProcessingContext,
    ProcessingPipeline, Publisher, StageKind,
};
pub use point::{PointConfig, PointRegistry, SourceProtocol, ValueUpdate};
pub use repository::{
    AlarmRepository, AliasResolver, EmailService, HistoryRepository, MemoryAlarmLog,
    MemoryHistoryStore, MemoryTriggerStore, MemoryVariableStore, PublishSink,
    StaticAliasResolver, TriggerRepository, VariableRepository,
};
pub use runtime::{Collaborators, Runtime, RuntimeStats, UpdateOutcome};
pub use trigger::{
    AlarmActionConfig, AlarmKind, EmailActionConfig, LogActionConfig, LogActionLevel,
    TriggerAction, TriggerCondition, TriggerDefinition,
};
pub use value::{Value, ValueType};

#[cfg(feature = "email")]
pub use email::{SmtpConfig, SmtpEmailService};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttConfig, MqttPublisher};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Audit events and sinks.
//!
//! Recording is fire-and-forget: [`AuditRecorder::record`] logs a sink
//! failure and returns, so auditing never changes the outcome of the
//! operation being recorded.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// FHIR AuditEvent action codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "C")]
    Create,
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "U")]
    Update,
    #[serde(rename = "D")]
    Delete,
    #[serde(rename = "E")]
    Execute,
}

impl AuditAction {
    pub fn to_action_code(&self) -> &'static str {
        match self {
            Self::Create => "C",
            Self::Read => "R",
            Self::Update => "U",
            Self::Delete => "D",
            Self::Execute => "E",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_action_code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "code")]
pub enum AuditOutcome {
    Success,
    /// Failure with a short machine-readable code, e.g. `forbidden`.
    Failure(String),
}

impl AuditOutcome {
    pub fn failure(code: impl Into<String>) -> Self {
        Self::Failure(code.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failure(code) => write!(f, "failure:{code}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Dotted event name, e.g. `resource.read` or `access.grant`.
    pub event_type: String,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub user_id: String,
    pub tenant_id: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        action: AuditAction,
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            action,
            outcome: AuditOutcome::Success,
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            resource_type: None,
            resource_id: None,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: Option<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = resource_id;
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Audit sink error: {0}")]
pub struct AuditSinkError(pub String);

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditSinkError>;
}

/// Emits every event on the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        tracing::info!(
            target: "audit",
            event_type = %event.event_type,
            action = %event.action,
            outcome = %event.outcome,
            user_id = %event.user_id,
            tenant = %event.tenant_id,
            resource_type = event.resource_type.as_deref(),
            resource_id = event.resource_id.as_deref(),
            timestamp = %event.timestamp,
            "audit event"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _event: &AuditEvent) -> Result<(), AuditSinkError> {
        Ok(())
    }
}

/// Wraps a sink and swallows its failures.
#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    enabled: bool,
}

impl fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditRecorder")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            sink: Arc::new(NoopAuditSink),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn record(&self, event: AuditEvent) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.sink.record(&event).await {
            tracing::warn!(
                event_type = %event.event_type,
                tenant = %event.tenant_id,
                error = %e,
                "failed to record audit event"
            );
        }
    }
}

impl Default for AuditRecorder {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}

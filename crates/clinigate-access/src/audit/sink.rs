//! Audit trail emission.

use std::sync::Arc;
use std::time::Duration;

use crate::audit::record::{ACTION_EMERGENCY_ACCESS, AuditOptions, AuditRecord};
use crate::config::AuditConfig;
use crate::deadline::bounded;
use crate::storage::AuditStore;
use crate::{AccessError, AccessResult};

/// Writes audit records to an [`AuditStore`].
///
/// [`log`](Self::log) waits for the store and reports failures.
/// [`log_async`](Self::log_async) hands the write to a spawned task and only
/// reports failures to the operational log.
#[derive(Clone)]
pub struct AuditSink {
    store: Arc<dyn AuditStore>,
    timeout: Duration,
    config: AuditConfig,
}

impl AuditSink {
    /// Creates a sink whose writes are bounded by `timeout`.
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>, timeout: Duration, config: AuditConfig) -> Self {
        Self {
            store,
            timeout,
            config,
        }
    }

    /// Whether granted requests are recorded.
    #[must_use]
    pub fn logs_access_decisions(&self) -> bool {
        self.config.log_access_decisions
    }

    /// Whether rejected requests are recorded.
    #[must_use]
    pub fn logs_denials(&self) -> bool {
        self.config.log_denials
    }

    /// Records an action synchronously.
    ///
    /// # Errors
    ///
    /// Returns `AuditWrite` if the store rejects the record or times out.
    pub async fn log(
        &self,
        actor: &str,
        org_id: Option<&str>,
        action: &str,
        entity_type: Option<&str>,
        entity_id: Option<&str>,
        options: AuditOptions,
    ) -> AccessResult<()> {
        let record = build_record(actor, org_id, action, entity_type, entity_id, options);
        self.write(&record).await
    }

    /// Records an action without waiting for the store.
    ///
    /// Never fails the caller; a failed write is logged at `warn`.
    pub fn log_async(
        &self,
        actor: &str,
        org_id: Option<&str>,
        action: &str,
        entity_type: Option<&str>,
        entity_id: Option<&str>,
        options: AuditOptions,
    ) {
        let record = build_record(actor, org_id, action, entity_type, entity_id, options);
        let sink = self.clone();

        tokio::spawn(async move {
            if let Err(err) = sink.write(&record).await {
                tracing::warn!(
                    error = %err,
                    audit_id = %record.id(),
                    action = record.action(),
                    "Async audit write failed"
                );
            }
        });
    }

    /// Writes the break-glass record for an emergency access.
    ///
    /// The record carries the reason code and no organization or entity.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a blank reason and `AuditWrite` if the
    /// store fails.
    pub async fn log_emergency(
        &self,
        actor: &str,
        reason: &str,
        options: AuditOptions,
    ) -> AccessResult<AuditRecord> {
        if reason.trim().is_empty() {
            return Err(AccessError::invalid_request(
                "Emergency access requires a reason code",
            ));
        }

        let record = AuditRecord::builder(actor, ACTION_EMERGENCY_ACCESS)
            .emergency(reason.trim())
            .options(options)
            .build();
        self.write(&record).await?;

        tracing::warn!(
            actor,
            reason = record.reason_code(),
            request_id = record.request_id(),
            "Emergency access granted"
        );
        Ok(record)
    }

    async fn write(&self, record: &AuditRecord) -> AccessResult<()> {
        let result = bounded("audit_append", self.timeout, self.store.append(record))
            .await
            .map_err(|err| match err {
                AccessError::AuditWrite { .. } => err,
                other => AccessError::audit_write(other.to_string()),
            });

        match &result {
            Ok(()) => tracing::debug!(
                audit_id = %record.id(),
                action = record.action(),
                "Audit record written"
            ),
            Err(err) => tracing::error!(
                error = %err,
                audit_id = %record.id(),
                action = record.action(),
                "Failed to store audit record"
            ),
        }
        result
    }
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("timeout", &self.timeout)
            .field("config", &self.config)
            .finish()
    }
}

fn build_record(
    actor: &str,
    org_id: Option<&str>,
    action: &str,
    entity_type: Option<&str>,
    entity_id: Option<&str>,
    options: AuditOptions,
) -> AuditRecord {
    let mut builder = AuditRecord::builder(actor, action).options(options);
    if let Some(org_id) = org_id {
        builder = builder.organization(org_id);
    }
    if let Some(entity_type) = entity_type {
        builder = builder.entity(entity_type, entity_id.map(str::to_string));
    }
    builder.build()
}

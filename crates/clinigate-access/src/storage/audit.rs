//! Append-only audit storage trait.

use async_trait::async_trait;

use crate::AccessResult;
use crate::audit::AuditRecord;

/// Append-only store for audit records.
///
/// Records are never updated or deleted through this interface.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist a record.
    ///
    /// # Errors
    ///
    /// Returns `AuditWrite` if the record could not be stored.
    async fn append(&self, record: &AuditRecord) -> AccessResult<()>;
}

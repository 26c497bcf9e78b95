//! In-memory append-only audit log.

use async_trait::async_trait;
use clinigate_access::audit::AuditRecord;
use clinigate_access::storage::AuditStore;
use clinigate_access::AccessResult;
use parking_lot::RwLock;

/// Audit log held in memory, in append order.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.read().clone()
    }

    /// Records with the given action verb.
    #[must_use]
    pub fn by_action(&self, action: &str) -> Vec<AuditRecord> {
        self.records
            .read()
            .iter()
            .filter(|record| record.action() == action)
            .cloned()
            .collect()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: &AuditRecord) -> AccessResult<()> {
        self.records.write().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_keeps_order() {
        let store = MemoryAuditStore::new();
        for action in ["access.granted", "access.denied", "access.granted"] {
            store
                .append(&AuditRecord::builder("u-1", action).build())
                .await
                .unwrap();
        }

        assert_eq!(store.len(), 3);
        assert_eq!(store.records()[1].action(), "access.denied");
        assert_eq!(store.by_action("access.granted").len(), 2);
    }
}

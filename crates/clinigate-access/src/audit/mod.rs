//! Audit trail of access decisions and data-access events.
//!
//! - [`AuditRecord`]: the write-once entry
//! - [`AuditSink`]: synchronous and fire-and-forget emission
//!
//! No ordering is guaranteed between concurrent writes for the same entity.

pub mod record;
pub mod sink;

pub use record::{
    ACTION_ACCESS_DENIED, ACTION_ACCESS_GRANTED, ACTION_EMERGENCY_ACCESS, AuditOptions,
    AuditRecord, AuditRecordBuilder,
};
pub use sink::AuditSink;

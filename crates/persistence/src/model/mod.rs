//! Records persisted for the workflow engine
//!
//! Every record serializes to a camelCase JSON document. Timestamps are
//! stored as integer nanoseconds since the Unix epoch so that range filters
//! and sorts compare numerically, and exactly, in every backend.

mod event;
mod execution_error;
mod instance;
mod subscription;

use chrono::{DateTime, Utc};

pub use event::Event;
pub use execution_error::ExecutionError;
pub use instance::{WorkflowInstance, WorkflowStatus};
pub use subscription::EventSubscription;

pub(crate) mod fields {
    pub(crate) use super::event::fields as event;
    pub(crate) use super::instance::fields as instance;
    pub(crate) use super::subscription::fields as subscription;

    /// Document id, shared by every collection
    pub const ID: &str = "id";
}

/// Stored representation of a timestamp
///
/// Times outside the representable range (before 1677 or after 2262) clamp
/// to the nearest bound; records holding them fail to serialize instead.
pub(crate) fn nanos(time: DateTime<Utc>) -> i64 {
    time.timestamp_nanos_opt().unwrap_or(if time.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) mod fields {
    pub const WORKFLOW_DEFINITION_ID: &str = "workflowDefinitionId";
    pub const VERSION: &str = "version";
    pub const DESCRIPTION: &str = "description";
    pub const REFERENCE: &str = "reference";
    pub const EXECUTION_POINTERS: &str = "executionPointers";
    pub const NEXT_EXECUTION: &str = "nextExecution";
    pub const STATUS: &str = "status";
    pub const DATA: &str = "data";
    pub const CREATE_TIME: &str = "createTime";
    pub const COMPLETE_TIME: &str = "completeTime";

    /// Fields rewritten by every persist of an instance; anything else in the
    /// stored document is left alone
    pub const WRITABLE: [&str; 10] = [
        WORKFLOW_DEFINITION_ID,
        VERSION,
        DESCRIPTION,
        REFERENCE,
        EXECUTION_POINTERS,
        NEXT_EXECUTION,
        STATUS,
        DATA,
        CREATE_TIME,
        COMPLETE_TIME,
    ];
}

/// Lifecycle status of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Waiting for the scheduler to pick it up at `next_execution`
    Runnable,

    /// Held by an engine host executing a step
    Running,

    /// Paused until resumed
    Suspended,

    /// Finished every step
    Complete,

    /// Stopped before completion
    Terminated,
}

impl WorkflowStatus {
    /// Stored spelling of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Runnable => "runnable",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Complete => "complete",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one workflow run
///
/// `next_execution` is only set while the status is
/// [`WorkflowStatus::Runnable`]; the engine maintains this when it mutates
/// the instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    /// Empty until assigned by the caller or on create
    #[serde(default)]
    pub id: String,
    pub workflow_definition_id: String,
    pub version: i32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    /// Positions within the step graph, opaque to persistence
    #[serde(default)]
    pub execution_pointers: Vec<serde_json::Value>,
    #[serde(default, with = "chrono::serde::ts_nanoseconds_option")]
    pub next_execution: Option<DateTime<Utc>>,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    pub create_time: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_nanoseconds_option")]
    pub complete_time: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// A freshly started instance, runnable immediately
    pub fn new(workflow_definition_id: impl Into<String>, version: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            workflow_definition_id: workflow_definition_id.into(),
            version,
            description: None,
            reference: None,
            execution_pointers: vec![],
            next_execution: Some(now),
            status: WorkflowStatus::Runnable,
            data: serde_json::Value::Null,
            create_time: now,
            complete_time: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Whether the scheduler should run this instance at `as_of`
    pub fn is_runnable_at(&self, as_of: DateTime<Utc>) -> bool {
        self.status == WorkflowStatus::Runnable
            && self.next_execution.is_some_and(|next| next <= as_of)
    }
}

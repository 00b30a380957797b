//! ---
//! vnfm_section: "05-external-interfaces"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Typed wire entities of the orchestration and image-store APIs."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
//! Remote payloads are decoded eagerly into these types; anything that does
//! not fit (an unknown stack status, a missing id) is rejected here instead of
//! travelling inward as an untyped map.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DeserializeFromStr, SerializeDisplay};

/// Verb half of a stack or resource status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackAction {
    /// Initial creation.
    Create,
    /// In-place update.
    Update,
    /// Deletion.
    Delete,
    /// Rollback after a failed create or update.
    Rollback,
    /// Suspension.
    Suspend,
    /// Resumption.
    Resume,
    /// Consistency check.
    Check,
    /// Snapshot.
    Snapshot,
    /// Adoption of existing resources.
    Adopt,
    /// Not yet acted upon.
    Init,
    /// Signal delivered to a resource.
    Signal,
}

impl StackAction {
    fn as_str(&self) -> &'static str {
        match self {
            StackAction::Create => "CREATE",
            StackAction::Update => "UPDATE",
            StackAction::Delete => "DELETE",
            StackAction::Rollback => "ROLLBACK",
            StackAction::Suspend => "SUSPEND",
            StackAction::Resume => "RESUME",
            StackAction::Check => "CHECK",
            StackAction::Snapshot => "SNAPSHOT",
            StackAction::Adopt => "ADOPT",
            StackAction::Init => "INIT",
            StackAction::Signal => "SIGNAL",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "CREATE" => StackAction::Create,
            "UPDATE" => StackAction::Update,
            "DELETE" => StackAction::Delete,
            "ROLLBACK" => StackAction::Rollback,
            "SUSPEND" => StackAction::Suspend,
            "RESUME" => StackAction::Resume,
            "CHECK" => StackAction::Check,
            "SNAPSHOT" => StackAction::Snapshot,
            "ADOPT" => StackAction::Adopt,
            "INIT" => StackAction::Init,
            "SIGNAL" => StackAction::Signal,
            _ => return None,
        })
    }
}

/// Progress half of a stack or resource status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackState {
    /// Still running.
    InProgress,
    /// Finished successfully.
    Complete,
    /// Finished unsuccessfully.
    Failed,
}

impl StackState {
    fn as_str(&self) -> &'static str {
        match self {
            StackState::InProgress => "IN_PROGRESS",
            StackState::Complete => "COMPLETE",
            StackState::Failed => "FAILED",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "IN_PROGRESS" => StackState::InProgress,
            "COMPLETE" => StackState::Complete,
            "FAILED" => StackState::Failed,
            _ => return None,
        })
    }
}

/// Status such as `CREATE_COMPLETE`, or a bare `FAILED` with no action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct StackStatus {
    /// Action the status refers to; `None` only for a bare `FAILED`.
    pub action: Option<StackAction>,
    /// Progress of that action.
    pub state: StackState,
}

impl StackStatus {
    /// Build an `ACTION_STATE` status.
    pub const fn new(action: StackAction, state: StackState) -> Self {
        Self {
            action: Some(action),
            state,
        }
    }

    /// The bare `FAILED` status.
    pub const FAILED: StackStatus = StackStatus {
        action: None,
        state: StackState::Failed,
    };
    /// `CREATE_IN_PROGRESS`.
    pub const CREATE_IN_PROGRESS: StackStatus =
        StackStatus::new(StackAction::Create, StackState::InProgress);
    /// `CREATE_COMPLETE`.
    pub const CREATE_COMPLETE: StackStatus =
        StackStatus::new(StackAction::Create, StackState::Complete);
    /// `CREATE_FAILED`.
    pub const CREATE_FAILED: StackStatus =
        StackStatus::new(StackAction::Create, StackState::Failed);
    /// `UPDATE_IN_PROGRESS`.
    pub const UPDATE_IN_PROGRESS: StackStatus =
        StackStatus::new(StackAction::Update, StackState::InProgress);
    /// `UPDATE_COMPLETE`.
    pub const UPDATE_COMPLETE: StackStatus =
        StackStatus::new(StackAction::Update, StackState::Complete);
    /// `DELETE_IN_PROGRESS`.
    pub const DELETE_IN_PROGRESS: StackStatus =
        StackStatus::new(StackAction::Delete, StackState::InProgress);
    /// `DELETE_COMPLETE`.
    pub const DELETE_COMPLETE: StackStatus =
        StackStatus::new(StackAction::Delete, StackState::Complete);
    /// `SIGNAL_IN_PROGRESS`.
    pub const SIGNAL_IN_PROGRESS: StackStatus =
        StackStatus::new(StackAction::Signal, StackState::InProgress);
    /// `SIGNAL_COMPLETE`.
    pub const SIGNAL_COMPLETE: StackStatus =
        StackStatus::new(StackAction::Signal, StackState::Complete);

    /// COMPLETE or FAILED of any action.
    pub fn is_terminal(&self) -> bool {
        self.state != StackState::InProgress
    }

    /// `{action}_COMPLETE`.
    pub fn is_complete(&self, action: StackAction) -> bool {
        self.action == Some(action) && self.state == StackState::Complete
    }

    /// Any failed state, including the bare `FAILED`.
    pub fn is_failed(&self) -> bool {
        self.state == StackState::Failed
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            Some(action) => write!(f, "{}_{}", action.as_str(), self.state.as_str()),
            None => f.write_str(self.state.as_str()),
        }
    }
}

/// Error returned when a status string is outside the known vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stack status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for StackStatus {
    type Err = UnknownStatus;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw == "FAILED" {
            return Ok(StackStatus::FAILED);
        }
        let (action, state) = raw
            .split_once('_')
            .ok_or_else(|| UnknownStatus(raw.to_string()))?;
        match (StackAction::parse(action), StackState::parse(state)) {
            (Some(action), Some(state)) => Ok(StackStatus::new(action, state)),
            _ => Err(UnknownStatus(raw.to_string())),
        }
    }
}

/// One declared stack output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackOutput {
    /// Output name as declared in the template.
    pub output_key: String,
    /// Resolved value; may be any JSON value.
    #[serde(default)]
    pub output_value: Value,
}

/// Snapshot of a deployed stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    /// Stack id.
    pub id: String,
    /// Human readable stack name.
    #[serde(default)]
    pub stack_name: String,
    /// Current status.
    pub stack_status: StackStatus,
    /// Explanation attached to the status, mostly on failures.
    #[serde(default)]
    pub stack_status_reason: Option<String>,
    /// Outputs; absent until the stack finished creating.
    #[serde(default)]
    pub outputs: Vec<StackOutput>,
    /// Owning stack id for nested stacks.
    #[serde(default)]
    pub parent: Option<String>,
}

impl Stack {
    /// Look up an output value by key.
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs
            .iter()
            .find(|output| output.output_key == key)
            .map(|output| &output.output_value)
    }
}

/// One live resource of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackResource {
    /// Template-level resource name.
    pub resource_name: String,
    /// Resource type, e.g. `OS::Nova::Server`.
    pub resource_type: String,
    /// Id assigned by the underlying infrastructure; empty while unallocated.
    #[serde(default)]
    pub physical_resource_id: String,
}

/// Most recent event of a stack resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleEvent {
    /// Event id.
    pub id: String,
    /// Resource status recorded by the event.
    pub resource_status: StackStatus,
    /// When the event was recorded.
    #[serde(rename = "event_time")]
    pub timestamp: DateTime<Utc>,
}

/// Body of a stack create call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackRequest {
    /// Name given to the new stack.
    pub stack_name: String,
    /// Native template document.
    pub template: Value,
    /// Nested template files referenced by `template`, keyed by file name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub files: IndexMap<String, String>,
    /// Flat parameter mapping.
    #[serde(default)]
    pub parameters: IndexMap<String, Value>,
}

/// Body of a stack update call. The update is always applied on top of the
/// existing stack; omitted fields keep their current values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackUpdate {
    /// Replacement template, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Value>,
    /// Replacement nested templates.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub files: IndexMap<String, String>,
    /// Parameters to change.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, Value>,
}

/// Lifecycle status of an image record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// Metadata exists, no data yet.
    Queued,
    /// Data is being written.
    Saving,
    /// Data staged, awaiting import.
    Uploading,
    /// Import task running.
    Importing,
    /// Usable.
    Active,
    /// Upload failed.
    Killed,
    /// Deleted.
    Deleted,
    /// Deletion scheduled.
    PendingDelete,
    /// Hidden from non-admin users.
    Deactivated,
}

impl ImageStatus {
    /// States the image cannot leave without operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImageStatus::Active
                | ImageStatus::Killed
                | ImageStatus::Deleted
                | ImageStatus::PendingDelete
                | ImageStatus::Deactivated
        )
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ImageStatus::Queued => "queued",
            ImageStatus::Saving => "saving",
            ImageStatus::Uploading => "uploading",
            ImageStatus::Importing => "importing",
            ImageStatus::Active => "active",
            ImageStatus::Killed => "killed",
            ImageStatus::Deleted => "deleted",
            ImageStatus::PendingDelete => "pending_delete",
            ImageStatus::Deactivated => "deactivated",
        };
        f.write_str(label)
    }
}

/// Image record as reported by the image store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image id.
    pub id: String,
    /// Image name.
    #[serde(default)]
    pub name: String,
    /// Current status.
    pub status: ImageStatus,
    /// Digest algorithm used for `os_hash_value`, e.g. `sha512`.
    #[serde(default)]
    pub os_hash_algo: Option<String>,
    /// Hex digest of the stored data.
    #[serde(default)]
    pub os_hash_value: Option<String>,
}

/// Metadata for a new image record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewImage {
    /// Image name.
    pub name: String,
    /// Disk format, e.g. `qcow2`.
    pub disk_format: String,
    /// Container format, e.g. `bare`.
    pub container_format: String,
    /// Minimum disk size in GiB.
    #[serde(default)]
    pub min_disk: u64,
    /// Minimum RAM in MiB.
    #[serde(default)]
    pub min_ram: u64,
    /// Visibility, e.g. `private`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
}

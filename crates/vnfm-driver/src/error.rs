//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Failure taxonomy of lifecycle operations."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use vnfm_client::{DigestError, RemoteError};

/// Result alias used throughout the driver crate.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Which operation a bounded wait belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitKind {
    /// Stack creation.
    Create,
    /// Stack update.
    Update,
    /// Stack deletion.
    Delete,
    /// Heal update.
    Heal,
    /// Scaling signal.
    Scale,
    /// Image activation.
    Image,
}

impl WaitKind {
    /// Stable lowercase label, also used as a metrics label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitKind::Create => "create",
            WaitKind::Update => "update",
            WaitKind::Delete => "delete",
            WaitKind::Heal => "heal",
            WaitKind::Scale => "scale",
            WaitKind::Image => "image",
        }
    }
}

/// The waits that poll a stack's own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StackWait {
    Create,
    Update,
    Delete,
    Heal,
}

impl From<StackWait> for WaitKind {
    fn from(wait: StackWait) -> Self {
        match wait {
            StackWait::Create => WaitKind::Create,
            StackWait::Update => WaitKind::Update,
            StackWait::Delete => WaitKind::Delete,
            StackWait::Heal => WaitKind::Heal,
        }
    }
}

impl fmt::Display for WaitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a bounded wait ended without success.
#[derive(Debug, thiserror::Error)]
pub enum WaitCause {
    /// Every attempt observed a non-terminal status.
    #[error("no terminal status within the retry budget")]
    Exhausted,
    /// A terminal status other than success was observed.
    #[error("reached status {0}")]
    Failed(String),
    /// A status fetch itself failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Failure reported by the poller.
#[derive(Debug, thiserror::Error)]
#[error(
    "{kind} wait failed after {attempts} attempt(s) within {} seconds: {cause}",
    .budget.as_secs()
)]
pub struct WaitFailed {
    /// Operation the wait belonged to.
    pub kind: WaitKind,
    /// Number of status fetches made.
    pub attempts: u32,
    /// Nominal budget, `retries × interval`.
    pub budget: Duration,
    /// Why the wait failed.
    #[source]
    pub cause: WaitCause,
}

/// Why one software image could not be provisioned.
#[derive(Debug, thiserror::Error)]
pub enum ImageFailure {
    /// An image-store call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The image never became active.
    #[error(transparent)]
    Wait(#[from] WaitFailed),
    /// Reading or hashing the image source failed.
    #[error(transparent)]
    Digest(#[from] DigestError),
    /// The stored data does not match the source.
    #[error("checksum mismatch: store reports {algorithm}:{reported}, source hashes to {computed}")]
    ChecksumMismatch {
        /// Digest algorithm.
        algorithm: String,
        /// Digest reported by the image store.
        reported: String,
        /// Digest of the source.
        computed: String,
    },
    /// The store did not report a digest for an active image.
    #[error("image store reported no checksum")]
    MissingChecksum,
}

/// Failure of a lifecycle operation.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Stack creation did not complete.
    #[error("VNF Create action failed for vnf {vnf_instance_id} on stack {stack_id}: {source}")]
    VnfCreateWaitFailed {
        /// Owning VNF instance.
        vnf_instance_id: String,
        /// Stack being awaited.
        stack_id: String,
        /// Poller failure.
        #[source]
        source: WaitFailed,
    },
    /// Stack update did not complete.
    #[error("VNF Update action failed for vnf {vnf_instance_id} on stack {stack_id}: {source}")]
    VnfUpdateWaitFailed {
        /// Owning VNF instance.
        vnf_instance_id: String,
        /// Stack being awaited.
        stack_id: String,
        /// Poller failure.
        #[source]
        source: WaitFailed,
    },
    /// Stack deletion did not complete.
    #[error("VNF Delete action failed for vnf {vnf_instance_id} on stack {stack_id}: {source}")]
    VnfDeleteWaitFailed {
        /// Owning VNF instance.
        vnf_instance_id: String,
        /// Stack being awaited.
        stack_id: String,
        /// Poller failure.
        #[source]
        source: WaitFailed,
    },
    /// Heal update did not complete.
    #[error(
        "VNF Heal action is not completed within {} seconds on stack {stack_id} \
         for vnf {vnf_instance_id}: {source}",
        .source.budget.as_secs()
    )]
    VnfHealWaitFailed {
        /// Owning VNF instance.
        vnf_instance_id: String,
        /// Stack being awaited.
        stack_id: String,
        /// Poller failure.
        #[source]
        source: WaitFailed,
    },
    /// Scaling did not settle.
    #[error(
        "VNF Scale action failed for policy {policy} of vnf {vnf_instance_id} \
         on stack {stack_id}: {reason}"
    )]
    VnfScaleWaitFailed {
        /// Owning VNF instance.
        vnf_instance_id: String,
        /// Stack owning the policy.
        stack_id: String,
        /// Scaling policy name.
        policy: String,
        /// What went wrong.
        reason: String,
    },
    /// Image provisioning failed; earlier images of the batch were cleaned up.
    #[error("pre-instantiation of vnf {vnf_instance_id} failed on image {image}: {source}")]
    VnfPreInstantiationFailed {
        /// Owning VNF instance.
        vnf_instance_id: String,
        /// Image that failed.
        image: String,
        /// Original cause.
        #[source]
        source: ImageFailure,
    },
    /// Heal precondition, mark or lookup failure.
    #[error("{reason}")]
    VnfHealFailed {
        /// Owning VNF instance.
        vnf_instance_id: String,
        /// Complete human readable reason.
        reason: String,
    },
    /// Scaling signal could not be delivered.
    #[error("VNF Scale action for policy {policy} on stack {stack_id} failed: {source}")]
    VnfScaleFailed {
        /// Stack owning the policy.
        stack_id: String,
        /// Scaling policy name.
        policy: String,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
    /// The user-data hook could not be resolved or failed.
    #[error("LCM user data failed: {reason}")]
    LcmUserDataFailed {
        /// What went wrong.
        reason: String,
    },
    /// The request is inconsistent with the instance state.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A one-shot remote submission failed.
    #[error("{operation} failed: {source}")]
    Remote {
        /// Operation being submitted.
        operation: &'static str,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
}

impl DriverError {
    pub(crate) fn remote(operation: &'static str) -> impl FnOnce(RemoteError) -> DriverError {
        move |source| DriverError::Remote { operation, source }
    }

    pub(crate) fn user_data(reason: impl Into<String>) -> Self {
        DriverError::LcmUserDataFailed {
            reason: reason.into(),
        }
    }

    /// Map a failed stack wait onto the `*WaitFailed` variant of its kind.
    pub(crate) fn from_wait(
        wait: StackWait,
        vnf_instance_id: &str,
        stack_id: &str,
        failure: WaitFailed,
    ) -> Self {
        let vnf_instance_id = vnf_instance_id.to_string();
        let stack_id = stack_id.to_string();
        let source = failure;
        match wait {
            StackWait::Create => DriverError::VnfCreateWaitFailed {
                vnf_instance_id,
                stack_id,
                source,
            },
            StackWait::Update => DriverError::VnfUpdateWaitFailed {
                vnf_instance_id,
                stack_id,
                source,
            },
            StackWait::Delete => DriverError::VnfDeleteWaitFailed {
                vnf_instance_id,
                stack_id,
                source,
            },
            StackWait::Heal => DriverError::VnfHealWaitFailed {
                vnf_instance_id,
                stack_id,
                source,
            },
        }
    }

    /// Short label of the variant, used for lifecycle events.
    pub fn kind(&self) -> &'static str {
        match self {
            DriverError::VnfCreateWaitFailed { .. } => "VNFCreateWaitFailed",
            DriverError::VnfUpdateWaitFailed { .. } => "VNFUpdateWaitFailed",
            DriverError::VnfDeleteWaitFailed { .. } => "VNFDeleteWaitFailed",
            DriverError::VnfHealWaitFailed { .. } => "VNFHealWaitFailed",
            DriverError::VnfScaleWaitFailed { .. } => "VNFScaleWaitFailed",
            DriverError::VnfPreInstantiationFailed { .. } => "VnfPreInstantiationFailed",
            DriverError::VnfHealFailed { .. } => "VnfHealFailed",
            DriverError::VnfScaleFailed { .. } => "VnfScaleFailed",
            DriverError::LcmUserDataFailed { .. } => "LCMUserDataFailed",
            DriverError::InvalidRequest(_) => "InvalidRequest",
            DriverError::Remote { .. } => "Remote",
        }
    }
}

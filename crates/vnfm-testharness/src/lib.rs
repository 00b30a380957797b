//! ---
//! vnfm_section: "11-testing"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "In-memory fakes shared by driver tests."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
//! Recording fakes of the remote services the lifecycle driver consumes.
//!
//! Every fake counts calls per endpoint and replays scripted responses, so
//! tests can assert both the outcome of an operation and exactly which remote
//! calls it made.

pub mod image;
pub mod logs;
pub mod stack;

pub use image::{FakeDigest, FakeImageApi, DEFAULT_HASH, DEFAULT_HASH_ALGO};
pub use logs::LogCapture;
pub use stack::{FakeStackApi, StackStep};

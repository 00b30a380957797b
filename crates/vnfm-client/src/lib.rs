//! ---
//! vnfm_section: "05-external-interfaces"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Typed clients for the orchestration service and image store."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! The lifecycle driver talks to two remote services through the traits in
//! this crate: [`StackApi`] for the stack-orchestration service and
//! [`ImageApi`] for the image store. The `Http*` types bind them to REST
//! endpoints; tests substitute in-memory fakes.

mod http;

pub mod digest;
pub mod error;
pub mod image;
pub mod stack;
pub mod types;

pub use digest::{
    digest_bytes, DigestAlgorithm, DigestError, ImageSource, SourceDigest, StreamingDigest,
};
pub use error::{RemoteError, Result};
pub use image::{HttpImageClient, ImageApi};
pub use stack::{HttpStackClient, StackApi};
pub use types::{
    Image, ImageStatus, NewImage, ScaleEvent, Stack, StackAction, StackOutput, StackRequest,
    StackResource, StackState, StackStatus, StackUpdate, UnknownStatus,
};

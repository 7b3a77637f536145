//! Engine provisioning
//!
//! Guarantees the platform capture executable exists, is at least
//! `MIN_ENGINE_SIZE` bytes and is runnable before a capture session starts.

mod platform;
mod provisioner;
mod store;

pub use platform::Platform;
pub use provisioner::{
    partial_path, DownloadAttempt, DownloadProgress, ProvisionError, ProvisionOutcome,
    Provisioner, ReleaseSource, Unavailable, UnavailableReason,
};
pub use store::{AssetStatus, BinaryStore};

/// Files smaller than this are leftovers of a failed download
pub const MIN_ENGINE_SIZE: u64 = 1024;

/// Redirect hops followed before a download is abandoned
pub const MAX_REDIRECTS: usize = 5;

//! Repository synchronization: keep a local checkout in line with a remote
//! reached over SSH.
//!
//! A sync derives the key, takes a per-working-copy lock, inspects what is on
//! disk and then either clones into a staging directory or fetches and
//! fast-forwards the existing checkout.

mod error;
pub mod git;
mod key;
mod lock;
mod staging;
mod synchronizer;
mod transport;

#[cfg(test)]
pub(crate) mod fixtures;

pub use error::SyncError;
pub use git::WorkingCopy;
pub use key::{KeyError, SshKey};
pub use lock::{SyncLock, holder_pid, is_held};
pub use synchronizer::{SyncOutcome, Synchronizer};
pub use transport::{Git2Transport, SSH_USER, Transport};

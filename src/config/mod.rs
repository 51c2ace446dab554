//! Configuration file loading and per-user path layout.

mod load;
mod paths;

pub use load::{ConfigError, SyncConfig, load};
pub use paths::{AppPaths, PathsError, executable_name, lock_path_for};

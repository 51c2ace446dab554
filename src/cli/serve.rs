use std::path::Path;

use secrecy::ExposeSecret;

use super::exit::AppError;
use crate::config::SyncConfig;
use crate::server;
use crate::sync::{SyncOutcome, Synchronizer, Transport};

/// Sync before serving. Failures are logged and swallowed: the server
/// publishes whatever the working copy holds.
pub fn sync_before_serve<T: Transport>(
    sync: &Synchronizer<T>,
    config: &SyncConfig,
    working_copy: &Path,
) -> Option<SyncOutcome> {
    match sync.ensure_synced(
        config.remote(),
        config.ssh_key().expose_secret().as_bytes(),
        working_copy,
    ) {
        Ok(outcome) => {
            log::info!("{}", outcome);
            Some(outcome)
        }
        Err(e) => {
            log::warn!("sync of {} failed: {}", config.remote(), e);
            log::warn!("serving the existing content of {}", working_copy.display());
            None
        }
    }
}

/// Bind and serve `working_copy` until SIGINT or SIGTERM.
pub fn run_server(config: &SyncConfig, working_copy: &Path) -> Result<(), AppError> {
    if !working_copy.exists() {
        log::warn!(
            "{} does not exist; every request will return 404",
            working_copy.display()
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(AppError::Runtime)?;

    runtime.block_on(async {
        let listener = server::bind(config.listen_addr()).await?;
        server::serve(listener, working_copy, server::shutdown_signal()).await
    })?;
    Ok(())
}

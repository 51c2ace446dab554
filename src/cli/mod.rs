mod doctor;
mod exit;
mod serve;

pub use doctor::{Check, CheckStatus, run_checks};
pub use exit::{AppError, ExitStatus};
pub use serve::{run_server, sync_before_serve};

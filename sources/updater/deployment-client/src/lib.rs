//! HTTP client for reporting deployment status and uploading logs to the management service,
//! plus the shared exponential backoff schedule used across the engine's retry loops.

pub mod backoff;
mod client;
pub mod error;
mod status;

pub use client::build_client;
pub use status::{
    check_for_update, report_status, upload_log, Authenticator, DeploymentCheckResponse,
    StatusReport,
};

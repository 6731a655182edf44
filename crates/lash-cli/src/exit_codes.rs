//! Process exit codes
//!
//! Scripts wrapping `lash` rely on these; 64 comes from sysexits.h.

/// Command finished
pub const SUCCESS: i32 = 0;

/// Anything not covered below (catalog, chart or prompt failures)
pub const ERROR: i32 = 1;

/// The API server rejected a call or a readiness wait failed
pub const CLUSTER_ERROR: i32 = 3;

/// Kubeconfig unusable or context unknown
pub const CREDENTIALS_ERROR: i32 = 4;

/// A local file could not be read
pub const IO_ERROR: i32 = 5;

/// Bad arguments, flags or configuration file
pub const USAGE_ERROR: i32 = 64;

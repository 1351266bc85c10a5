//! Exit codes following sysexits.h conventions.
//!
//! These codes provide semantic meaning for different failure modes,
//! enabling schedulers and scripts to handle errors appropriately.

use imagetype_core::{ClassifyError, ConfigError, DistributeError};

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Input data format error (product JSON does not parse).
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: i32 = 65;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Upstream service failed (image host, Gemini, BigQuery, Cloud Tasks).
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const SERVICE_ERROR: i32 = 69;

/// Work queue still holds tasks; try again later.
/// Maps to EX_TEMPFAIL from sysexits.h.
pub const QUEUE_BUSY: i32 = 75;

/// Missing or invalid environment configuration.
/// Maps to EX_CONFIG from sysexits.h.
pub const CONFIG_ERROR: i32 = 78;

/// Help text appended to `--help`.
pub const HELP: &str = "Exit codes:
  0   success
  1   general error
  65  invalid input data
  66  input file not readable
  69  upstream service failure
  75  work queue not empty
  78  missing or invalid configuration";

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub const fn success() -> Self {
        Self {
            code: SUCCESS,
            message: None,
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        // Classify by the first typed error found in the chain
        let code = err
            .chain()
            .find_map(|cause| {
                if cause.is::<ConfigError>() {
                    Some(CONFIG_ERROR)
                } else if let Some(e) = cause.downcast_ref::<DistributeError>() {
                    Some(match e {
                        DistributeError::QueueNotEmpty => QUEUE_BUSY,
                        DistributeError::Filter(_) => DATA_ERROR,
                        DistributeError::SourceRead(_) | DistributeError::QueuePublish(_) => {
                            SERVICE_ERROR
                        }
                    })
                } else if cause.is::<ClassifyError>() {
                    Some(SERVICE_ERROR)
                } else if cause.is::<serde_json::Error>() {
                    Some(DATA_ERROR)
                } else if cause.is::<std::io::Error>() {
                    Some(INPUT_ERROR)
                } else {
                    None
                }
            })
            .unwrap_or(GENERAL_ERROR);

        Self {
            code,
            message: Some(message),
        }
    }
}

use std::path::PathBuf;

use reqwest::StatusCode;

use crate::outcome::OutcomeRecord;

/// Errors that abort a run or a phase of a run.
///
/// Failures of individual operations are never reported through this type. They are captured as
/// [`OutcomeRecord`]s instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The service's health endpoint could not be reached at all.
    #[error("service at `{url}` is unreachable")]
    Unreachable {
        /// The health endpoint that was queried.
        url: String,
        /// The transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The service's health endpoint answered, but not with a success status.
    #[error("service at `{url}` is unhealthy: {status}")]
    Unhealthy {
        /// The health endpoint that was queried.
        url: String,
        /// The status returned by the service.
        status: StatusCode,
    },
    /// The entity a phase depends on could not be created.
    #[error("setup of phase `{phase}` failed with status {}", record.status_code())]
    Setup {
        /// Name of the phase that had to be aborted.
        phase: &'static str,
        /// The failed setup call.
        record: OutcomeRecord,
    },
    /// The HTTP client could not be constructed.
    #[error(transparent)]
    Client(#[from] reqwest::Error),
    /// IO errors reading or writing artifacts.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Errors encoding or decoding artifacts.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// An artifact that decoded fine but contains values that cannot be measurements.
    #[error("invalid artifact `{}`: {reason}", path.display())]
    InvalidArtifact {
        /// Location of the artifact.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

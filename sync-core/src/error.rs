/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use error_support::{ErrorHandling, GetErrorHandling};

/// Errors internal to the crate. Never handed to a caller outside the crate;
/// see `SyncApiError` for what the orchestrator actually returns/reports.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("service config error: {0}")]
    Config(String),

    #[error("unknown service id: {0}")]
    UnknownService(String),

    #[error("service {0} is disabled")]
    ServiceDisabled(String),

    #[error("transport failed to initialize: {0}")]
    TransportInit(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to parse remote payload: {0}")]
    Parse(String),

    #[error("upload conflict: remote has advanced since the last observed revision")]
    UploadConflict,

    #[error("merge error: {0}")]
    Merge(String),

    #[error("operation aborted because the transport or orchestrator was destroyed")]
    Destroyed,

    #[error("the operation was interrupted")]
    Interrupted(#[from] interrupt_support::Interrupted),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::UploadConflict)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The error type exposed to hosts embedding this crate. Mirrors the §7
/// error-kind taxonomy (ConfigError, TransportInitError, NetworkError,
/// ParseError, UploadConflict, MergeError, DestroyedError) without leaking
/// internal detail enums.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncApiError {
    #[error("config error: {0}")]
    Config(String),
    #[error("transport init error: {0}")]
    TransportInit(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("upload conflict")]
    UploadConflict,
    #[error("merge error: {0}")]
    Merge(String),
    #[error("destroyed")]
    Destroyed,
    #[error("interrupted")]
    Interrupted,
    #[error("unexpected error: {0}")]
    Other(String),
}

impl GetErrorHandling for Error {
    type ExternalError = SyncApiError;

    fn get_error_handling(&self) -> ErrorHandling<Self::ExternalError> {
        match self {
            // Normal operation, not a bug: don't report.
            Self::Interrupted(_) => ErrorHandling::convert(SyncApiError::Interrupted),
            Self::UploadConflict => {
                ErrorHandling::convert(SyncApiError::UploadConflict).log_info()
            }
            Self::Config(msg) => {
                ErrorHandling::convert(SyncApiError::Config(msg.clone())).log_warning()
            }
            Self::UnknownService(id) => ErrorHandling::convert(SyncApiError::Config(format!(
                "unknown service id: {id}"
            )))
            .log_warning(),
            Self::ServiceDisabled(id) => ErrorHandling::convert(SyncApiError::Config(format!(
                "service {id} is disabled"
            )))
            .log_info(),
            Self::TransportInit(msg) => {
                ErrorHandling::convert(SyncApiError::TransportInit(msg.clone())).log_warning()
            }
            // Network errors happen in practice (offline, flaky remotes); log, don't report.
            Self::Network(msg) => {
                ErrorHandling::convert(SyncApiError::Network(msg.clone())).log_warning()
            }
            Self::Parse(msg) => ErrorHandling::convert(SyncApiError::Parse(msg.clone()))
                .report_error("sync-core-parse"),
            Self::Merge(msg) => ErrorHandling::convert(SyncApiError::Merge(msg.clone()))
                .report_error("sync-core-merge"),
            Self::Destroyed => ErrorHandling::convert(SyncApiError::Destroyed),
            Self::Json(e) => ErrorHandling::convert(SyncApiError::Parse(e.to_string()))
                .report_error("sync-core-json"),
        }
    }
}

/// Convert an internal error into the public error, applying the logging and
/// reporting decided by `GetErrorHandling`.
pub fn handle_error(e: Error) -> SyncApiError {
    error_support::convert_log_report_error(e)
}

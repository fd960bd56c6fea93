/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Helpers for components to "handle" errors: convert an internal error type
//! into the external error type callers see, while deciding, at a single
//! point per crate, whether the error deserves a log line and/or a report to
//! whatever error-reporting hook the host has registered.
//!
//! A component's `error.rs` typically looks like:
//!
//! ```ignore
//! impl GetErrorHandling for Error {
//!     type ExternalError = ApiError;
//!     fn get_error_handling(&self) -> ErrorHandling<Self::ExternalError> {
//!         match self {
//!             Self::Interrupted(_) => ErrorHandling::convert(ApiError::Interrupted),
//!             Self::Network(e) => ErrorHandling::convert(ApiError::Network(e.to_string())).log_warning(),
//!             other => ErrorHandling::convert(ApiError::Other(other.to_string())).report_error("unexpected"),
//!         }
//!     }
//! }
//! ```

mod handling;
mod reporting;

pub use handling::{convert_log_report_error, ErrorHandling, ErrorReporting, GetErrorHandling};
pub use reporting::{set_error_reporter, ErrorReporter};

/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

/// Describes what error reporting action should be taken.
#[derive(Debug, Default)]
pub struct ErrorReporting {
    /// If `Some(level)`, a log message is written at that level.
    log_level: Option<log::Level>,
    /// If `Some(report_class)`, the registered error reporter is called with
    /// this class as a tag.
    report_class: Option<String>,
}

/// Specifies how an "internal" error is converted to an "external" public
/// error, and any logging or reporting that should happen alongside it.
pub struct ErrorHandling<E> {
    pub err: E,
    pub reporting: ErrorReporting,
}

impl<E> ErrorHandling<E> {
    /// Convert the error without any special logging or reporting.
    pub fn convert(err: E) -> Self {
        Self {
            err,
            reporting: ErrorReporting::default(),
        }
    }

    pub fn log_info(mut self) -> Self {
        self.reporting.log_level = Some(log::Level::Info);
        self
    }

    pub fn log_warning(mut self) -> Self {
        self.reporting.log_level = Some(log::Level::Warn);
        self
    }

    pub fn log_error(mut self) -> Self {
        self.reporting.log_level = Some(log::Level::Error);
        self
    }

    pub fn report_error(mut self, report_class: impl Into<String>) -> Self {
        self.reporting.report_class = Some(report_class.into());
        self
    }
}

/// A trait to define how errors are converted and reported.
pub trait GetErrorHandling {
    type ExternalError;

    /// Return how to handle our internal errors.
    fn get_error_handling(&self) -> ErrorHandling<Self::ExternalError>;
}

/// Handle the specified "internal" error: take any logging/reporting action,
/// then convert the error to the public error. This is the single funnel
/// point every internal error should pass through before crossing the crate
/// boundary.
pub fn convert_log_report_error<IE, EE>(e: IE) -> EE
where
    IE: GetErrorHandling<ExternalError = EE> + std::error::Error,
{
    let handling = e.get_error_handling();
    let reporting = handling.reporting;
    if let Some(level) = reporting.log_level {
        log::log!(level, "{}", e);
    }
    if let Some(report_class) = reporting.report_class {
        crate::reporting::report_error(report_class, e.to_string());
    }
    handling.err
}

/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::sync::RwLock;

/// A hook the host application can register to receive "this is probably a
/// bug" reports (think: Sentry, Glean, or just a test spy). Errors that are
/// expected in normal operation (interrupted, network hiccups) are logged,
/// not reported; see `ErrorHandling`.
pub trait ErrorReporter: Send + Sync {
    fn report_error(&self, report_class: String, message: String);
}

static REPORTER: RwLock<Option<Box<dyn ErrorReporter>>> = RwLock::new(None);

/// Register the host's error reporter. Replaces any previously registered
/// reporter.
pub fn set_error_reporter(reporter: Box<dyn ErrorReporter>) {
    *REPORTER.write().unwrap() = Some(reporter);
}

pub(crate) fn report_error(report_class: impl Into<String>, message: impl Into<String>) {
    if let Some(reporter) = REPORTER.read().unwrap().as_ref() {
        reporter.report_error(report_class.into(), message.into());
    }
}

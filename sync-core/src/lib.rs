/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Synchronization core for a bookmark manager: a pure merge engine (see
//! [`merge`]) and a per-service sync orchestrator (see [`orchestrator`])
//! that drives one round against a pluggable [`transport::Transport`].
//!
//! The crate never embeds storage: hosts implement [`orchestrator::LocalStore`]
//! and [`registry::ConfigStore`] over whatever they already persist bookmarks
//! and service configuration in.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod merge;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod transport;

pub use error::{Error, Result, SyncApiError};
pub use merge::{merge, MergeOptions, MergeOutcome, MergeStrategy, MetaStrategy, SyncOption, TagStrategy};
pub use model::{BookmarkMap, Key, Meta, Record};
pub use orchestrator::{SyncEvent, SyncListener, SyncOrchestrator, SyncState};
pub use registry::{ServiceConfig, ServiceRegistry, ServiceType};
pub use transport::{AuthStatus, RemoteMeta, Transport};

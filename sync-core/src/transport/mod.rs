/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Transport abstraction (component D): the uniform capability set every
//! remote adapter exposes to the orchestrator. See spec §4.D.

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::registry::ServiceConfig;

/// Optimistic-locking witness for a remote resource. All fields optional;
/// a transport is free to populate only the ones meaningful to its backend
/// (an HTTP ETag-less endpoint might only ever set `timestamp`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Authenticated,
    Unauthenticated,
    Error,
    RequiresConfig,
    Unknown,
}

pub struct Downloaded {
    pub data: Option<String>,
    pub remote_meta: Option<RemoteMeta>,
}

/// Every remote adapter (GitHub, WebDAV, generic HTTP/JSON, message bridge)
/// implements this. Operations run to completion on the calling thread
/// (the core is synchronous, matching its single-threaded cooperative
/// scheduling model), and are polymorphic over a trait object, not an
/// inheritance hierarchy.
///
/// Methods take `&self`, not `&mut self`: implementations own their mutable
/// state behind interior mutability so a transport can be shared (typically
/// as `Arc<dyn Transport>`) between the orchestrator, which drives the
/// methods below, and whatever delivers inbound data to it out of band (the
/// message-bridge transport's `receive`, called from the host's own message
/// listener, possibly on another thread, while a call below is in flight).
pub trait Transport: Send + Sync {
    /// Establish a session for `config`; may perform a handshake.
    fn init(&self, config: ServiceConfig) -> Result<()>;

    /// The config passed to the most recent successful `init`.
    fn get_config(&self) -> Option<ServiceConfig>;

    fn get_remote_metadata(&self) -> Result<Option<RemoteMeta>>;

    fn download(&self) -> Result<Downloaded>;

    /// Honors `expected_remote_meta`: if provided and the remote has since
    /// advanced, fails with `Error::UploadConflict`.
    fn upload(&self, data: &str, expected_remote_meta: Option<&RemoteMeta>) -> Result<RemoteMeta>;

    fn get_auth_status(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::Unknown)
    }

    fn acquire_lock(&self) -> Result<bool> {
        Ok(false)
    }

    fn release_lock(&self) -> Result<()> {
        Ok(())
    }

    /// Release all pending operations. Idempotent; called on orchestrator
    /// teardown and config replacement.
    fn destroy(&self);
}

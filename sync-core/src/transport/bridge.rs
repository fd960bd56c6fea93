/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Message-bridge transport (component E): a concrete `Transport` over a
//! bidirectional, postMessage-style channel with request/response
//! correlation by id. See spec §4.E.
//!
//! Timeouts are enforced by blocking the caller's own thread on
//! `mpsc::Receiver::recv_timeout` rather than by a separate sweep thread:
//! each pending request already owns a deadline-bearing receiver, so a
//! second clock has nothing to add. `rc_log` is the corpus's example of a
//! background thread draining a channel; here the channel is drained
//! in-line by the blocked caller instead.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sync_guid::Guid;

use super::{AuthStatus, Downloaded, RemoteMeta, Transport};
use crate::error::{Error, Result};
use crate::registry::ServiceConfig;

const PING_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A conflict string from the remote always looks like `Conflict: <reason>`;
/// every other transport's error strings get this stable prefix instead.
const TRANSPORT_MARKER: &str = "message-bridge: ";
const CONFLICT_PREFIX: &str = "Conflict:";

#[derive(Debug, Clone, Serialize)]
pub struct OutboundEnvelope {
    pub source: &'static str,
    #[serde(rename = "requestId")]
    pub request_id: Guid,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    pub source: String,
    #[serde(rename = "requestId")]
    pub request_id: Guid,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The host's side of the channel: deliver `OutboundEnvelope`s to the paired
/// agent however the host likes (postMessage, a unix socket, an in-memory
/// loopback in tests).
pub trait MessageChannel: Send + Sync {
    fn send(&self, envelope: OutboundEnvelope) -> Result<()>;
}

struct PendingResponse {
    payload: Option<Value>,
    error: Option<String>,
}

pub struct BridgeTransport {
    channel: Box<dyn MessageChannel>,
    pending: Mutex<HashMap<Guid, mpsc::Sender<PendingResponse>>>,
    config: Mutex<Option<ServiceConfig>>,
    destroyed: std::sync::atomic::AtomicBool,
}

impl BridgeTransport {
    pub fn new(channel: Box<dyn MessageChannel>) -> Self {
        Self {
            channel,
            pending: Mutex::new(HashMap::new()),
            config: Mutex::new(None),
            destroyed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Feed an inbound message to the transport. Called by the host whenever
    /// a message arrives on the underlying channel. Messages whose `source`
    /// or `request_id` do not correspond to a known outstanding request are
    /// ignored.
    pub fn receive(&self, envelope: InboundEnvelope) {
        if envelope.source != "extension" {
            return;
        }
        let sender = {
            let mut pending = self.pending.lock().unwrap();
            pending.remove(&envelope.request_id)
        };
        if let Some(sender) = sender {
            let _ = sender.send(PendingResponse {
                payload: envelope.payload,
                error: envelope.error,
            });
        }
    }

    fn send_and_wait(&self, kind: &str, payload: Option<Value>, timeout: Duration) -> Result<Value> {
        if self.destroyed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Destroyed);
        }
        let request_id = Guid::random();
        let (tx, rx) = mpsc::channel();
        self.pending.lock().unwrap().insert(request_id.clone(), tx);

        self.channel.send(OutboundEnvelope {
            source: "webapp",
            request_id: request_id.clone(),
            kind: kind.to_string(),
            payload,
        })?;

        match rx.recv_timeout(timeout) {
            Ok(response) => Self::resolve(response),
            Err(RecvTimeoutError::Timeout) => {
                self.pending.lock().unwrap().remove(&request_id);
                Err(Error::Network(format!(
                    "{TRANSPORT_MARKER}request '{kind}' timed out after {timeout:?}"
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Destroyed),
        }
    }

    fn resolve(response: PendingResponse) -> Result<Value> {
        if let Some(err) = response.error {
            if let Some(reason) = err.strip_prefix(CONFLICT_PREFIX) {
                log::info!("message-bridge: upload conflict: {}", reason.trim());
                return Err(Error::UploadConflict);
            }
            return Err(Error::Network(format!("{TRANSPORT_MARKER}{err}")));
        }
        Ok(response.payload.unwrap_or(Value::Null))
    }
}

impl Transport for BridgeTransport {
    fn init(&self, config: ServiceConfig) -> Result<()> {
        let status = self.send_and_wait("PING", None, PING_TIMEOUT)?;
        let ok = status
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s == "PONG")
            .unwrap_or(false);
        if !ok {
            return Err(Error::TransportInit(
                "message bridge did not respond PONG to PING".to_string(),
            ));
        }
        *self.config.lock().unwrap() = Some(config);
        log::info!("message-bridge: initialized");
        Ok(())
    }

    fn get_config(&self) -> Option<ServiceConfig> {
        self.config.lock().unwrap().clone()
    }

    fn get_remote_metadata(&self) -> Result<Option<RemoteMeta>> {
        let value = self.send_and_wait("GET_REMOTE_METADATA", None, DEFAULT_TIMEOUT)?;
        let meta = value
            .get("metadata")
            .cloned()
            .filter(|v| !v.is_null())
            .map(serde_json::from_value)
            .transpose()?;
        Ok(meta)
    }

    fn download(&self) -> Result<Downloaded> {
        let value = self.send_and_wait("DOWNLOAD_DATA", None, DEFAULT_TIMEOUT)?;
        let data = value
            .get("data")
            .and_then(Value::as_str)
            .map(str::to_string);
        let remote_meta = value
            .get("remoteMeta")
            .cloned()
            .filter(|v| !v.is_null())
            .map(serde_json::from_value)
            .transpose()?;
        Ok(Downloaded { data, remote_meta })
    }

    fn upload(&self, data: &str, expected_remote_meta: Option<&RemoteMeta>) -> Result<RemoteMeta> {
        let payload = serde_json::json!({
            "data": data,
            "metadata": expected_remote_meta,
        });
        let value = self.send_and_wait("UPLOAD_DATA", Some(payload), DEFAULT_TIMEOUT)?;
        let metadata = value
            .get("metadata")
            .cloned()
            .ok_or_else(|| Error::Parse("upload response missing metadata".to_string()))?;
        Ok(serde_json::from_value(metadata)?)
    }

    fn get_auth_status(&self) -> Result<AuthStatus> {
        let value = self.send_and_wait("GET_AUTH_STATUS", None, DEFAULT_TIMEOUT)?;
        Ok(match value.as_str() {
            Some("Authenticated") => AuthStatus::Authenticated,
            Some("Unauthenticated") => AuthStatus::Unauthenticated,
            Some("Error") => AuthStatus::Error,
            Some("RequiresConfig") => AuthStatus::RequiresConfig,
            _ => AuthStatus::Unknown,
        })
    }

    fn destroy(&self) {
        self.destroyed.store(true, std::sync::atomic::Ordering::SeqCst);
        let mut pending = self.pending.lock().unwrap();
        for (_, sender) in pending.drain() {
            let _ = sender.send(PendingResponse {
                payload: None,
                error: Some("destroyed".to_string()),
            });
        }
        log::info!("message-bridge: destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct NullChannel;
    impl MessageChannel for NullChannel {
        fn send(&self, _envelope: OutboundEnvelope) -> Result<()> {
            Ok(())
        }
    }

    fn transport() -> BridgeTransport {
        BridgeTransport::new(Box::new(NullChannel))
    }

    #[test]
    fn test_conflict_prefix_maps_to_upload_conflict() {
        let response = PendingResponse {
            payload: None,
            error: Some("Conflict: remote advanced".to_string()),
        };
        assert!(matches!(
            BridgeTransport::resolve(response),
            Err(Error::UploadConflict)
        ));
    }

    #[test]
    fn test_non_conflict_error_gets_transport_marker() {
        let response = PendingResponse {
            payload: None,
            error: Some("boom".to_string()),
        };
        match BridgeTransport::resolve(response) {
            Err(Error::Network(msg)) => assert_eq!(msg, "message-bridge: boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_receive_ignores_unknown_source() {
        let transport = transport();
        // No pending requests exist, so this must be a no-op, not a panic.
        transport.receive(InboundEnvelope {
            source: "not-extension".to_string(),
            request_id: Guid::from("whatever"),
            payload: None,
            error: None,
        });
        assert!(transport.pending.lock().unwrap().is_empty());
    }

    #[test]
    fn test_request_times_out_and_purges_pending_entry() {
        let transport = transport();
        let result = transport.send_and_wait("PING", None, Duration::from_millis(20));
        assert!(matches!(result, Err(Error::Network(_))));
        assert!(transport.pending.lock().unwrap().is_empty());
    }

    #[test]
    fn test_destroy_resolves_in_flight_request() {
        let transport = transport();
        let result = thread::scope(|scope| {
            let handle = scope.spawn(|| transport.send_and_wait("PING", None, Duration::from_secs(5)));
            // Give the request a moment to register before destroying it.
            thread::sleep(Duration::from_millis(20));
            transport.destroy();
            handle.join().unwrap()
        });
        assert!(matches!(result, Err(Error::Network(_))));
    }
}

/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Sync Orchestrator (component F): a per-service state machine driving one
//! synchronization round against a pluggable transport. See spec §4.F.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{handle_error, Error, Result};
use crate::merge::{self, MergeOptions, MergeStrategy, SyncOption};
use crate::model::{BookmarkMap, EpochMs, Key, Record, CURRENT_DATABASE_VERSION};
use crate::registry::{ConfigStore, ServiceConfig, ServiceId, ServiceRegistry};
use crate::transport::{RemoteMeta, Transport};

/// For each [SyncState] variant, consumers of the orchestrator observe a
/// [SyncEvent::StatusChange]. Named and ordered the way the teacher names its
/// own state-machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Initializing,
    Checking,
    Downloading,
    Merging,
    Uploading,
    Success,
    Conflict,
    Error,
    Disabled,
}

impl SyncState {
    /// I5: `synchronize` may only start a round from one of these.
    fn accepts_new_round(self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Success | SyncState::Error | SyncState::Conflict | SyncState::Disabled
        )
    }
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    SyncStart,
    StatusChange(SyncState),
    BookmarksRemoved(Vec<Key>),
    SyncSuccess { last_sync_time: EpochMs },
    SyncConflict { message: String },
    Error { message: String },
    SyncEnd { status: SyncState },
    Info { message: String },
    Destroyed,
}

/// Observer interface for orchestrator lifecycle events. Modeled as a
/// callback trait rather than a closure registry, matching the corpus's own
/// callback-interface pattern (e.g. `context_id::ContextIdCallback`).
pub trait SyncListener: Send + Sync {
    fn on_event(&self, service_id: &str, event: &SyncEvent);
}

/// Minimal local-storage contract the orchestrator relies on (§6).
pub trait LocalStore: Send + Sync {
    fn get_data(&self) -> Result<BookmarkMap>;
    fn upsert(&self, entries: &[(Key, Record)]) -> Result<()>;
    fn delete(&self, keys: &[Key]) -> Result<()>;
    fn get_store_metadata(&self) -> Result<crate::model::StoreMetadata>;
}

struct CachedTransport {
    config: ServiceConfig,
    transport: Arc<dyn Transport>,
}

fn now_ms() -> EpochMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as EpochMs)
        .unwrap_or(0)
}

pub struct SyncOrchestrator<L: LocalStore, C: ConfigStore> {
    local_store: L,
    registry: Mutex<ServiceRegistry<C>>,
    transports: Mutex<HashMap<ServiceId, CachedTransport>>,
    states: Mutex<HashMap<ServiceId, SyncState>>,
    listeners: Mutex<Vec<Box<dyn SyncListener>>>,
    /// Builds a concrete transport for a config's `type`. Transport wire
    /// formats beyond the message bridge are out of scope for this crate
    /// (§1), so the host supplies adapters for GitHub/WebDAV/CustomApi; the
    /// crate's own `transport::bridge::BridgeTransport` covers `extensionBridge`.
    transport_factory: Box<dyn Fn(&ServiceConfig) -> Result<Arc<dyn Transport>> + Send + Sync>,
}

impl<L: LocalStore, C: ConfigStore> SyncOrchestrator<L, C> {
    pub fn new(
        local_store: L,
        registry: ServiceRegistry<C>,
        transport_factory: impl Fn(&ServiceConfig) -> Result<Arc<dyn Transport>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            local_store,
            registry: Mutex::new(registry),
            transports: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            transport_factory: Box::new(transport_factory),
        }
    }

    pub fn add_listener(&self, listener: Box<dyn SyncListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn check_auth_status(&self, service_id: &str) -> Result<crate::transport::AuthStatus> {
        let config = {
            let registry = self.registry.lock().unwrap();
            registry
                .get_by_id(service_id)
                .cloned()
                .ok_or_else(|| Error::UnknownService(service_id.to_string()))?
        };
        let transport = self.transport_for(service_id, &config)?;
        transport.get_auth_status()
    }

    /// Tear down every cached transport, clear state, emit `Destroyed`.
    pub fn destroy(&self) {
        let mut transports = self.transports.lock().unwrap();
        for (id, cached) in transports.drain() {
            cached.transport.destroy();
            self.emit(&id, SyncEvent::Destroyed);
        }
        self.states.lock().unwrap().clear();
    }

    fn emit(&self, service_id: &str, event: SyncEvent) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener.on_event(service_id, &event);
        }
    }

    fn set_state(&self, service_id: &str, state: SyncState) {
        self.states.lock().unwrap().insert(service_id.to_string(), state);
        self.emit(service_id, SyncEvent::StatusChange(state));
    }

    fn transport_for(&self, service_id: &str, config: &ServiceConfig) -> Result<Arc<dyn Transport>> {
        let mut transports = self.transports.lock().unwrap();
        if let Some(cached) = transports.get(service_id) {
            if &cached.config == config {
                return Ok(Arc::clone(&cached.transport));
            }
            log::info!("orchestrator: config for {service_id} changed, recreating transport");
            cached.transport.destroy();
        }
        let transport = (self.transport_factory)(config)?;
        transport.init(config.clone())?;
        transports.insert(
            service_id.to_string(),
            CachedTransport {
                config: config.clone(),
                transport: Arc::clone(&transport),
            },
        );
        Ok(transport)
    }

    /// Drive one synchronization round for `service_id`. Returns `false`
    /// without changing state if a round is already in flight (I5/P9), or if
    /// the round fails; returns `true` on success.
    pub fn synchronize(&self, service_id: &str) -> bool {
        let current = self
            .states
            .lock()
            .unwrap()
            .get(service_id)
            .copied()
            .unwrap_or(SyncState::Idle);
        if !current.accepts_new_round() {
            self.emit(
                service_id,
                SyncEvent::Info {
                    message: format!("sync already in progress for {service_id} ({current:?})"),
                },
            );
            return false;
        }

        self.emit(service_id, SyncEvent::SyncStart);
        match self.run_round(service_id) {
            Ok(RoundOutcome::Success { last_sync_time }) => {
                self.set_state(service_id, SyncState::Success);
                self.emit(service_id, SyncEvent::SyncSuccess { last_sync_time });
                self.emit(
                    service_id,
                    SyncEvent::SyncEnd {
                        status: SyncState::Success,
                    },
                );
                self.set_state(service_id, SyncState::Idle);
                true
            }
            Ok(RoundOutcome::Disabled) => {
                self.set_state(service_id, SyncState::Disabled);
                self.emit(
                    service_id,
                    SyncEvent::SyncEnd {
                        status: SyncState::Disabled,
                    },
                );
                false
            }
            Err(Error::UploadConflict) => {
                self.set_state(service_id, SyncState::Conflict);
                self.emit(
                    service_id,
                    SyncEvent::SyncConflict {
                        message: "remote has advanced since the last observed revision".to_string(),
                    },
                );
                self.emit(
                    service_id,
                    SyncEvent::SyncEnd {
                        status: SyncState::Conflict,
                    },
                );
                false
            }
            Err(e) => {
                let message = handle_error(e).to_string();
                self.set_state(service_id, SyncState::Error);
                self.emit(service_id, SyncEvent::Error { message });
                self.emit(
                    service_id,
                    SyncEvent::SyncEnd {
                        status: SyncState::Error,
                    },
                );
                false
            }
        }
    }

    fn run_round(&self, service_id: &str) -> Result<RoundOutcome> {
        self.set_state(service_id, SyncState::Initializing);
        let config = {
            let registry = self.registry.lock().unwrap();
            registry
                .get_by_id(service_id)
                .cloned()
                .ok_or_else(|| Error::UnknownService(service_id.to_string()))?
        };
        if !config.enabled {
            return Ok(RoundOutcome::Disabled);
        }
        let transport = self.transport_for(service_id, &config)?;

        self.set_state(service_id, SyncState::Checking);
        let initial_remote_meta = transport.get_remote_metadata()?;

        self.set_state(service_id, SyncState::Downloading);
        let downloaded = transport.download()?;
        // Absent/empty remote payload is "nothing uploaded yet", represented
        // as an empty map rather than `None`. A `None` side short-circuits
        // the merge engine entirely (§4.B), which would lose every local
        // record on a first sync instead of treating them as local-only.
        let remote_map: BookmarkMap = match &downloaded.data {
            Some(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(raw).map_err(|e| Error::Parse(e.to_string()))?
            }
            _ => BookmarkMap::new(),
        };

        self.set_state(service_id, SyncState::Merging);
        let store_metadata = self.local_store.get_store_metadata()?;
        if store_metadata.database_version > CURRENT_DATABASE_VERSION {
            return Err(Error::Config(format!(
                "local store database version {} is newer than this implementation supports ({})",
                store_metadata.database_version, CURRENT_DATABASE_VERSION
            )));
        }
        let local_map = self.local_store.get_data()?;
        let sync_timestamp = now_ms();
        let sync_option = SyncOption {
            current_time: sync_timestamp,
            last_sync_time: config.last_sync_timestamp.unwrap_or(0),
        };
        // Per-service override merged field-wise over the default (§4.F step 4).
        let strategy = match &config.merge_strategy {
            Some(over) => MergeStrategy::default().overlaid_with(over),
            None => MergeStrategy::default(),
        };
        let outcome = merge::merge(
            Some(&local_map),
            Some(&remote_map),
            &strategy,
            &sync_option,
            MergeOptions::default(),
        )?;

        if !outcome.deleted.is_empty() {
            self.local_store.delete(&outcome.deleted)?;
            self.emit(service_id, SyncEvent::BookmarksRemoved(outcome.deleted.clone()));
        }
        if !outcome.merged.is_empty() {
            let entries: Vec<(Key, Record)> = outcome
                .merged
                .iter()
                .map(|(k, r)| (k.clone(), r.clone()))
                .collect();
            self.local_store.upsert(&entries)?;
        }

        self.set_state(service_id, SyncState::Uploading);
        // "Produced changes" means at least one merged record was actually
        // touched this round (its `last_touch` falls within the validity
        // window), not merely that the merged map is non-empty. The merged
        // map is the whole reconciled store, most of which is usually
        // unchanged carry-through from prior rounds.
        let has_changes = outcome.merged.values().any(|r| {
            crate::model::last_touch(&r.meta) >= sync_option.last_sync_time
        }) || !outcome.deleted.is_empty();
        let should_upload = has_changes || (remote_map.is_empty() && !outcome.merged.is_empty());

        let witness = downloaded.remote_meta.as_ref().or(initial_remote_meta.as_ref());
        let new_remote_meta: Option<RemoteMeta> = if should_upload {
            let serialized = serde_json::to_string(&outcome.merged)?;
            Some(transport.upload(&serialized, witness)?)
        } else {
            None
        };

        let mut registry = self.registry.lock().unwrap();
        registry.record_sync_success(
            service_id,
            sync_timestamp,
            new_remote_meta.or_else(|| witness.cloned()),
        )?;

        Ok(RoundOutcome::Success {
            last_sync_time: sync_timestamp,
        })
    }
}

enum RoundOutcome {
    Success { last_sync_time: EpochMs },
    Disabled,
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// In-memory `LocalStore` fake (component J).
    #[derive(Default)]
    pub struct InMemoryLocalStore {
        data: StdMutex<BookmarkMap>,
        database_version: u32,
    }

    impl InMemoryLocalStore {
        pub fn new() -> Self {
            Self {
                data: StdMutex::new(BookmarkMap::new()),
                database_version: CURRENT_DATABASE_VERSION,
            }
        }

        pub fn seed(&self, map: BookmarkMap) {
            *self.data.lock().unwrap() = map;
        }

        pub fn snapshot(&self) -> BookmarkMap {
            self.data.lock().unwrap().clone()
        }
    }

    impl LocalStore for InMemoryLocalStore {
        fn get_data(&self) -> Result<BookmarkMap> {
            Ok(self.data.lock().unwrap().clone())
        }

        fn upsert(&self, entries: &[(Key, Record)]) -> Result<()> {
            let mut data = self.data.lock().unwrap();
            for (k, r) in entries {
                data.insert(k.clone(), r.clone());
            }
            Ok(())
        }

        fn delete(&self, keys: &[Key]) -> Result<()> {
            let mut data = self.data.lock().unwrap();
            for k in keys {
                data.remove(k);
            }
            Ok(())
        }

        fn get_store_metadata(&self) -> Result<crate::model::StoreMetadata> {
            Ok(crate::model::StoreMetadata {
                database_version: self.database_version,
                created: 0,
                updated: None,
                exported: None,
            })
        }
    }

    /// Scriptable fake `Transport` (component J): returns whatever the test
    /// preloaded, and records every call it received.
    pub struct FakeTransport {
        state: StdMutex<FakeTransportState>,
    }

    #[derive(Default)]
    struct FakeTransportState {
        config: Option<ServiceConfig>,
        remote_meta: Option<RemoteMeta>,
        remote_data: Option<String>,
        upload_result: Option<std::result::Result<RemoteMeta, String>>,
        destroyed: bool,
        uploads: Vec<String>,
    }

    impl Default for FakeTransport {
        fn default() -> Self {
            Self {
                state: StdMutex::new(FakeTransportState::default()),
            }
        }
    }

    impl FakeTransport {
        pub fn with_remote(remote_data: Option<String>, remote_meta: Option<RemoteMeta>) -> Self {
            let t = Self::default();
            {
                let mut state = t.state.lock().unwrap();
                state.remote_data = remote_data;
                state.remote_meta = remote_meta;
            }
            t
        }

        pub fn fail_upload_with_conflict(&self) {
            self.state.lock().unwrap().upload_result = Some(Err("Conflict: remote advanced".to_string()));
        }

        pub fn uploads(&self) -> Vec<String> {
            self.state.lock().unwrap().uploads.clone()
        }

        pub fn was_destroyed(&self) -> bool {
            self.state.lock().unwrap().destroyed
        }
    }

    impl Transport for FakeTransport {
        fn init(&self, config: ServiceConfig) -> Result<()> {
            self.state.lock().unwrap().config = Some(config);
            Ok(())
        }

        fn get_config(&self) -> Option<ServiceConfig> {
            self.state.lock().unwrap().config.clone()
        }

        fn get_remote_metadata(&self) -> Result<Option<RemoteMeta>> {
            Ok(self.state.lock().unwrap().remote_meta.clone())
        }

        fn download(&self) -> Result<crate::transport::Downloaded> {
            let state = self.state.lock().unwrap();
            Ok(crate::transport::Downloaded {
                data: state.remote_data.clone(),
                remote_meta: state.remote_meta.clone(),
            })
        }

        fn upload(&self, data: &str, _expected_remote_meta: Option<&RemoteMeta>) -> Result<RemoteMeta> {
            let mut state = self.state.lock().unwrap();
            state.uploads.push(data.to_string());
            match state.upload_result.clone() {
                Some(Ok(meta)) => Ok(meta),
                Some(Err(err)) => {
                    if let Some(reason) = err.strip_prefix("Conflict:") {
                        log::info!("fake transport: conflict: {}", reason.trim());
                        Err(Error::UploadConflict)
                    } else {
                        Err(Error::Network(err))
                    }
                }
                None => Ok(RemoteMeta::default()),
            }
        }

        fn destroy(&self) {
            self.state.lock().unwrap().destroyed = true;
        }
    }
}

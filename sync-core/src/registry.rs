/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Service-config registry (component G): a validated store of service
//! configurations and the notion of "active service". See spec §4.G.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::merge::MergeStrategyOverride;
use crate::transport::RemoteMeta;

pub type ServiceId = String;

/// Sentinel `scope` value meaning "sync every bookmark", as opposed to a
/// collection id scoping a service to one subtree.
pub const SCOPE_ALL: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceType {
    GitHub,
    WebDav,
    CustomApi,
    ExtensionBridge,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Service config (spec §4.G). `target` carries the material, type-specific
/// location of the remote resource: a URL for `WebDav`/`CustomApi`, a repo
/// path for `GitHub`. Other fields (`name`, `enabled`, `scope`) are cosmetic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub id: ServiceId,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub credentials: ServiceCredentials,
    /// `SCOPE_ALL` or a collection id this service is restricted to.
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_strategy: Option<MergeStrategyOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_local_data_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_meta: Option<RemoteMeta>,
}

fn default_scope() -> String {
    SCOPE_ALL.to_string()
}

impl ServiceConfig {
    fn material_fields(&self) -> (Option<&str>, Option<&str>) {
        (self.target.as_deref(), self.branch.as_deref())
    }

    /// Whether updating `self` to `other` touches a field the spec deems
    /// "material" to the remote resource identity, requiring a watermark
    /// reset (P8). `type`, `name`, and `enabled` are deliberately excluded.
    fn changes_material_fields(&self, other: &ServiceConfig) -> bool {
        self.material_fields() != other.material_fields()
            || self.credentials != other.credentials
    }

    fn reset_watermarks(&mut self) {
        self.last_sync_timestamp = None;
        self.last_sync_local_data_hash = None;
        self.last_sync_meta = None;
    }
}

fn validate(config: &ServiceConfig) -> Result<()> {
    match config.service_type {
        ServiceType::ExtensionBridge => {}
        ServiceType::WebDav => {
            if config.credentials.username.is_none() || config.credentials.password.is_none() {
                return Err(Error::Config(
                    "webdav services require a username and password".to_string(),
                ));
            }
            require_valid_url(config)?;
        }
        ServiceType::CustomApi => {
            require_valid_url(config)?;
        }
        ServiceType::GitHub => {
            if config.target.as_deref().unwrap_or("").trim().is_empty() {
                return Err(Error::Config(
                    "github services require a non-empty repo path".to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn require_valid_url(config: &ServiceConfig) -> Result<()> {
    let target = config
        .target
        .as_deref()
        .ok_or_else(|| Error::Config(format!("{:?} services require a target url", config.service_type)))?;
    Url::parse(target).map_err(|e| Error::Config(format!("invalid target url: {e}")))?;
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryState {
    services: BTreeMap<ServiceId, ServiceConfig>,
    active: Option<ServiceId>,
}

/// External persistence contract (§6): a single opaque JSON-compatible blob
/// stored under a stable key. On load/parse failure, callers fall back to an
/// empty configuration with no active service.
pub trait ConfigStore: Send {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, blob: &str) -> Result<()>;
}

pub struct ServiceRegistry<S: ConfigStore> {
    store: S,
    state: RegistryState,
}

impl<S: ConfigStore> ServiceRegistry<S> {
    pub fn load(store: S) -> Result<Self> {
        let mut state = match store.load() {
            Ok(Some(blob)) => serde_json::from_str(&blob).unwrap_or_default(),
            Ok(None) => RegistryState::default(),
            Err(e) => {
                log::warn!("service registry: failed to load persisted config: {e}");
                RegistryState::default()
            }
        };
        // Services that no longer validate are discarded rather than carried
        // forward broken; if the active id pointed at one, it is cleared too.
        let discarded: Vec<ServiceId> = state
            .services
            .iter()
            .filter(|(_, c)| validate(c).is_err())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &discarded {
            log::warn!("service registry: discarding invalid persisted service {id}");
            state.services.remove(id);
        }
        if let Some(active) = &state.active {
            if !state.services.contains_key(active) {
                state.active = None;
            }
        }
        Ok(Self { store, state })
    }

    pub fn list(&self) -> Vec<&ServiceConfig> {
        self.state.services.values().collect()
    }

    pub fn has(&self, id: &str) -> bool {
        self.state.services.contains_key(id)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&ServiceConfig> {
        self.state.services.get(id)
    }

    pub fn get_active(&self) -> Option<&ServiceConfig> {
        self.state.active.as_ref().and_then(|id| self.state.services.get(id))
    }

    pub fn add(&mut self, config: ServiceConfig) -> Result<()> {
        validate(&config)?;
        if self.state.services.contains_key(&config.id) {
            return Err(Error::Config(format!("service {} already exists", config.id)));
        }
        self.state.services.insert(config.id.clone(), config);
        self.persist()
    }

    /// `type` is immutable across updates (§4.G); any other material field
    /// change clears the watermark trio (P8).
    pub fn update(&mut self, mut config: ServiceConfig) -> Result<()> {
        validate(&config)?;
        let existing = self
            .state
            .services
            .get(&config.id)
            .ok_or_else(|| Error::UnknownService(config.id.clone()))?;
        if existing.service_type != config.service_type {
            return Err(Error::Config("service type is immutable".to_string()));
        }
        if existing.changes_material_fields(&config) {
            log::info!("service registry: material change to {}, resetting watermarks", config.id);
            config.reset_watermarks();
        } else {
            // Preserve watermarks the caller didn't intend to touch: callers
            // update by sending a full config, not a patch.
            config.last_sync_timestamp = existing.last_sync_timestamp;
            config.last_sync_local_data_hash = existing.last_sync_local_data_hash.clone();
            config.last_sync_meta = existing.last_sync_meta.clone();
        }
        self.state.services.insert(config.id.clone(), config);
        self.persist()
    }

    /// Record post-round watermarks without treating the write as a material
    /// update (the orchestrator calls this, not `update`).
    pub fn record_sync_success(
        &mut self,
        id: &str,
        last_sync_timestamp: i64,
        last_sync_meta: Option<RemoteMeta>,
    ) -> Result<()> {
        let config = self
            .state
            .services
            .get_mut(id)
            .ok_or_else(|| Error::UnknownService(id.to_string()))?;
        config.last_sync_timestamp = Some(last_sync_timestamp);
        config.last_sync_meta = last_sync_meta;
        self.persist()
    }

    pub fn remove(&mut self, id: &str) -> Result<()> {
        if self.state.services.remove(id).is_none() {
            return Err(Error::UnknownService(id.to_string()));
        }
        if self.state.active.as_deref() == Some(id) {
            self.state.active = None;
        }
        self.persist()
    }

    /// Succeeds only for ids that correspond to an existing and enabled
    /// service; any other id clears the active service instead of erroring,
    /// matching the §4.G "active-service consistency" rule.
    pub fn set_active(&mut self, id: Option<&str>) -> Result<()> {
        self.state.active = match id {
            Some(id) => match self.state.services.get(id) {
                Some(config) if config.enabled => Some(id.to_string()),
                _ => None,
            },
            None => None,
        };
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let blob = serde_json::to_string(&self.state)?;
        self.store.save(&blob)
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory `ConfigStore` fake (component J).
    #[derive(Default)]
    pub struct InMemoryConfigStore {
        blob: Mutex<Option<String>>,
    }

    impl ConfigStore for InMemoryConfigStore {
        fn load(&self) -> Result<Option<String>> {
            Ok(self.blob.lock().unwrap().clone())
        }

        fn save(&self, blob: &str) -> Result<()> {
            *self.blob.lock().unwrap() = Some(blob.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::InMemoryConfigStore;
    use super::*;

    fn webdav(id: &str, target: &str) -> ServiceConfig {
        ServiceConfig {
            id: id.to_string(),
            name: "My WebDAV".to_string(),
            service_type: ServiceType::WebDav,
            enabled: true,
            target: Some(target.to_string()),
            branch: None,
            credentials: ServiceCredentials {
                username: Some("u".to_string()),
                password: Some("p".to_string()),
                token: None,
            },
            scope: SCOPE_ALL.to_string(),
            merge_strategy: None,
            last_sync_timestamp: None,
            last_sync_local_data_hash: None,
            last_sync_meta: None,
        }
    }

    #[test]
    fn test_add_rejects_missing_webdav_credentials() {
        let mut registry = ServiceRegistry::load(InMemoryConfigStore::default()).unwrap();
        let mut bad = webdav("a", "https://example.com/dav");
        bad.credentials.password = None;
        assert!(registry.add(bad).is_err());
    }

    #[test]
    fn test_add_rejects_invalid_url() {
        let mut registry = ServiceRegistry::load(InMemoryConfigStore::default()).unwrap();
        let bad = webdav("a", "not a url");
        assert!(registry.add(bad).is_err());
    }

    #[test]
    fn test_update_rejects_type_change() {
        let mut registry = ServiceRegistry::load(InMemoryConfigStore::default()).unwrap();
        registry.add(webdav("a", "https://example.com/dav")).unwrap();
        let mut changed = registry.get_by_id("a").unwrap().clone();
        changed.service_type = ServiceType::CustomApi;
        assert!(registry.update(changed).is_err());
    }

    #[test]
    fn test_material_update_resets_watermarks() {
        let mut registry = ServiceRegistry::load(InMemoryConfigStore::default()).unwrap();
        registry.add(webdav("a", "https://example.com/dav")).unwrap();
        registry.record_sync_success("a", 1234, None).unwrap();
        assert_eq!(registry.get_by_id("a").unwrap().last_sync_timestamp, Some(1234));

        let mut moved = registry.get_by_id("a").unwrap().clone();
        moved.target = Some("https://example.com/other".to_string());
        registry.update(moved).unwrap();
        assert_eq!(registry.get_by_id("a").unwrap().last_sync_timestamp, None);
    }

    #[test]
    fn test_cosmetic_update_preserves_watermarks() {
        let mut registry = ServiceRegistry::load(InMemoryConfigStore::default()).unwrap();
        registry.add(webdav("a", "https://example.com/dav")).unwrap();
        registry.record_sync_success("a", 1234, None).unwrap();

        let mut renamed = registry.get_by_id("a").unwrap().clone();
        renamed.name = "Renamed".to_string();
        registry.update(renamed).unwrap();
        assert_eq!(registry.get_by_id("a").unwrap().last_sync_timestamp, Some(1234));
    }

    #[test]
    fn test_set_active_requires_enabled_existing_service() {
        let mut registry = ServiceRegistry::load(InMemoryConfigStore::default()).unwrap();
        let mut disabled = webdav("a", "https://example.com/dav");
        disabled.enabled = false;
        registry.add(disabled).unwrap();

        registry.set_active(Some("a")).unwrap();
        assert!(registry.get_active().is_none());

        registry.set_active(Some("missing")).unwrap();
        assert!(registry.get_active().is_none());
    }

    #[test]
    fn test_remove_clears_active() {
        let mut registry = ServiceRegistry::load(InMemoryConfigStore::default()).unwrap();
        registry.add(webdav("a", "https://example.com/dav")).unwrap();
        registry.set_active(Some("a")).unwrap();
        assert!(registry.get_active().is_some());

        registry.remove("a").unwrap();
        assert!(registry.get_active().is_none());
    }

    #[test]
    fn test_load_discards_invalid_persisted_service_and_active_id() {
        let store = InMemoryConfigStore::default();
        let state = RegistryState {
            services: {
                let mut m = BTreeMap::new();
                m.insert("a".to_string(), {
                    let mut c = webdav("a", "https://example.com/dav");
                    c.credentials.password = None;
                    c
                });
                m
            },
            active: Some("a".to_string()),
        };
        store.save(&serde_json::to_string(&state).unwrap()).unwrap();

        let registry = ServiceRegistry::load(store).unwrap();
        assert!(!registry.has("a"));
        assert!(registry.get_active().is_none());
    }
}

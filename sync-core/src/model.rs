/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Bookmark model & invariants (component A).
//!
//! Value types for a bookmark record, its metadata, and its deletion marker,
//! plus the normalization helpers the merge engine relies on to keep I1/I2
//! (see spec §3) holding after every operation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Map as JsonMap;

/// An opaque bookmark key; by convention a URL. Unique within a store.
pub type Key = String;

/// The reserved tag that marks a record as logically deleted.
pub const DELETED_TAG: &str = "DELETED";

/// Open-schema metadata value. `Meta` carries a handful of named fields plus
/// an arbitrary side map of these for fields the crate doesn't need to
/// understand to merge them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    String(String),
    Number(f64),
    Bool(bool),
}

/// Epoch-millisecond timestamp.
pub type EpochMs = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub created: EpochMs,
    pub updated: EpochMs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated2: Option<EpochMs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Additional open-schema fields, keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", flatten)]
    pub extra: BTreeMap<String, MetaValue>,
}

impl Meta {
    pub fn new(created: EpochMs, updated: EpochMs) -> Self {
        Self {
            created,
            updated,
            updated2: None,
            title: None,
            description: None,
            note: None,
            extra: BTreeMap::new(),
        }
    }
}

/// What caused a record to be tombstoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    Delete,
    Archive,
    Merge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedMeta {
    pub deleted: EpochMs,
    pub action_type: ActionType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub tags: Vec<String>,
    pub meta: Meta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_meta: Option<DeletedMeta>,
    /// Other optional sub-records (highlights, import provenance, …) that the
    /// merge engine doesn't understand and carries through untouched.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty", flatten)]
    pub extra: JsonMap<String, serde_json::Value>,
}

impl Record {
    pub fn new(tags: Vec<String>, meta: Meta) -> Self {
        Self {
            tags,
            meta,
            deleted_meta: None,
            extra: JsonMap::new(),
        }
    }

    /// I1: tag membership, not `deleted_meta` presence, is the source of
    /// truth for "is this a tombstone".
    pub fn is_deleted(&self) -> bool {
        self.tags.iter().any(|t| t == DELETED_TAG)
    }
}

/// `max(created, updated, updated2|0)`: how recently did this side change.
pub fn last_touch(meta: &Meta) -> EpochMs {
    meta.created.max(meta.updated).max(meta.updated2.unwrap_or(0))
}

/// Normalize tag input that may arrive as a single comma-separated string or
/// as a list: trim, drop empties, de-duplicate while preserving first-seen
/// order. Only the ASCII comma is treated as a separator (§9 open question).
pub fn normalize_tags(raw: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in raw {
        for piece in item.split(',') {
            let trimmed = piece.trim();
            if trimmed.is_empty() {
                continue;
            }
            if seen.insert(trimmed.to_string()) {
                out.push(trimmed.to_string());
            }
        }
    }
    out
}

/// Repair `created`/`updated` so I2 holds, given a configured fallback date
/// for invalid (non-finite or missing) timestamps.
///
/// This crate models timestamps as plain `i64` epoch-ms, so "invalid" means
/// "the caller passed a sentinel the host uses for 'unknown'". Callers that
/// parse external data should map their notion of "invalid" to `None` before
/// calling this, which is why the parameters are `Option<EpochMs>`.
pub fn normalize_meta(
    created: Option<EpochMs>,
    updated: Option<EpochMs>,
    default_date: EpochMs,
) -> (EpochMs, EpochMs) {
    match (created, updated) {
        (Some(c), Some(u)) => (c, u),
        (Some(c), None) => (c, c),
        (None, _) => (default_date, default_date),
    }
}

/// Normalize a record so I1 holds: a legacy record carrying the `DELETED` tag
/// without `deleted_meta` gets one synthesized at `default_date`; a record
/// with `deleted_meta` but no tag is left as-is (the tag, not the meta, is
/// authoritative; `deleted_meta` without the tag is simply inert history).
pub fn heal_tombstone_invariant(record: &mut Record, default_date: EpochMs) {
    let tagged_deleted = record.is_deleted();
    if tagged_deleted && record.deleted_meta.is_none() {
        record.deleted_meta = Some(DeletedMeta {
            deleted: default_date,
            action_type: ActionType::Delete,
        });
    }
}

/// Store-level metadata accompanying the bookmark map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub database_version: u32,
    pub created: EpochMs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<EpochMs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exported: Option<EpochMs>,
}

/// The current implementation's database version. I3: stores newer than this
/// are rejected; older stores are migrated in place by the host before this
/// crate touches them (see `LocalStore` in `orchestrator`).
pub const CURRENT_DATABASE_VERSION: u32 = 1;

pub type BookmarkMap = BTreeMap<Key, Record>;

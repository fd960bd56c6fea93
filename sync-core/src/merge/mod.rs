/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The merge engine (component B): a pure, deterministic three-way
//! reconciliation of two bookmark maps. See spec §4.B.

pub mod batch;

use std::collections::BTreeSet;

use crate::model::{
    heal_tombstone_invariant, last_touch, normalize_meta, normalize_tags, ActionType,
    BookmarkMap, DeletedMeta, EpochMs, Key, Meta, Record, DELETED_TAG,
};
use batch::{process_in_batches, BatchOptions, Progress};
use interrupt_support::Interruptee;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetaStrategy {
    Local,
    Remote,
    Newer,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TagStrategy {
    Local,
    Remote,
    Newer,
    Union,
}

/// `strategy` knobs from spec §4.B. `update_over_delete`, `overwrite_local_deleted`
/// and `overwrite_remote_deleted` are reserved extension points with no defined
/// effect yet (see DESIGN.md open-question #2): they are accepted and threaded
/// through so a future revision can wire them in without an API break.
#[derive(Debug, Clone, Copy)]
pub struct MergeStrategy {
    pub meta: MetaStrategy,
    pub tags: TagStrategy,
    pub default_date: EpochMs,
    pub skip_existing: Option<bool>,
    pub update_over_delete: Option<bool>,
    pub overwrite_local_deleted: Option<bool>,
    pub overwrite_remote_deleted: Option<bool>,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        Self {
            meta: MetaStrategy::Merge,
            tags: TagStrategy::Union,
            default_date: 0,
            skip_existing: None,
            update_over_delete: None,
            overwrite_local_deleted: None,
            overwrite_remote_deleted: None,
        }
    }
}

/// A per-service partial override of [`MergeStrategy`] (spec §3, `ServiceConfig.mergeStrategy`).
/// Fields left `None` fall back to the default; `MergeStrategy::overlaid_with`
/// applies this field-wise over `MergeStrategy::default()` (spec §4.F step 4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStrategyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_date: Option<EpochMs>,
}

impl MergeStrategy {
    /// Overlay `override_` onto `self` field-wise, leaving fields the override
    /// doesn't set untouched.
    pub fn overlaid_with(self, override_: &MergeStrategyOverride) -> Self {
        Self {
            meta: override_.meta.unwrap_or(self.meta),
            tags: override_.tags.unwrap_or(self.tags),
            default_date: override_.default_date.unwrap_or(self.default_date),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOption {
    pub current_time: EpochMs,
    pub last_sync_time: EpochMs,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub merged: BookmarkMap,
    pub deleted: Vec<Key>,
    /// Advisory only (spec §4.B "optionally a conflict report"): keys where
    /// both sides were valid and their tags or meta actually disagreed. The
    /// merge proceeds identically whether or not a key is reported here.
    pub conflicted: Vec<Key>,
}

pub struct MergeOptions<'a> {
    pub batch_size: usize,
    pub on_progress: Option<&'a mut dyn FnMut(Progress)>,
    pub interruptee: Option<&'a dyn Interruptee>,
}

impl Default for MergeOptions<'_> {
    fn default() -> Self {
        Self {
            batch_size: batch::DEFAULT_BATCH_SIZE,
            on_progress: None,
            interruptee: None,
        }
    }
}

/// `merge(local, remote, strategy, sync_option) -> MergeOutcome`. Pure; no I/O.
/// If either side is absent, returns an empty outcome (spec §4.B).
pub fn merge(
    local: Option<&BookmarkMap>,
    remote: Option<&BookmarkMap>,
    strategy: &MergeStrategy,
    sync_option: &SyncOption,
    opts: MergeOptions<'_>,
) -> Result<MergeOutcome, interrupt_support::Interrupted> {
    let (local, remote) = match (local, remote) {
        (Some(l), Some(r)) => (l, r),
        _ => return Ok(MergeOutcome::default()),
    };

    let mut keys: Vec<Key> = local
        .keys()
        .chain(remote.keys())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    keys.sort();

    let outcome = std::sync::Mutex::new(MergeOutcome::default());

    process_in_batches(
        &keys,
        |chunk| {
            let mut outcome = outcome.lock().unwrap();
            for key in chunk {
                merge_one_key(
                    key,
                    local.get(key),
                    remote.get(key),
                    strategy,
                    sync_option,
                    &mut outcome,
                );
            }
        },
        BatchOptions {
            batch_size: opts.batch_size,
            on_progress: opts.on_progress,
            interruptee: opts.interruptee,
        },
    )?;

    Ok(outcome.into_inner().unwrap())
}

fn valid(side: Option<&Record>, last_sync_time: EpochMs) -> bool {
    side.map(|r| last_touch(&r.meta) >= last_sync_time).unwrap_or(false)
}

fn merge_one_key(
    key: &Key,
    local: Option<&Record>,
    remote: Option<&Record>,
    strategy: &MergeStrategy,
    sync_option: &SyncOption,
    outcome: &mut MergeOutcome,
) {
    let local = local.map(|r| normalized(r, strategy.default_date));
    let remote = remote.map(|r| normalized(r, strategy.default_date));

    if let (Some(l), Some(r)) = (&local, &remote) {
        if l == r {
            // Already converged: both sides carry the identical record, so
            // there is nothing to reconcile and no new touch to record.
            // Grounded in webext-storage's merge(), which short-circuits on
            // `other == ours` before considering either side "newer" (P4).
            outcome.merged.insert(key.clone(), l.clone());
            return;
        }
    }

    let emitted = match (&local, &remote) {
        (Some(l), Some(r)) => merge_both_sources(key, l, r, strategy, sync_option, outcome),
        (Some(l), None) => {
            if valid(Some(l), sync_option.last_sync_time) {
                Some(l.clone())
            } else {
                outcome.deleted.push(key.clone());
                None
            }
        }
        (None, Some(r)) => {
            if valid(Some(r), sync_option.last_sync_time) {
                Some(r.clone())
            } else {
                outcome.deleted.push(key.clone());
                None
            }
        }
        (None, None) => unreachable!("key set is the union of both sides' keys"),
    };

    if let Some(mut record) = emitted {
        if let (Some(l), Some(r)) = (&local, &remote) {
            record.meta.created = l.meta.created.min(r.meta.created);
            record.meta.updated = l.meta.updated.max(r.meta.updated);
            record.meta.updated2 = Some(last_touch(&l.meta).max(last_touch(&r.meta)) + 1);
        } else {
            // Single-sided emission: the emitted side's own timestamps are
            // already normalized; updated2 still gets bumped so this sync
            // pass is itself observable as "touched" on the next round.
            let lt = last_touch(&record.meta);
            record.meta.updated2 = Some(lt + 1);
        }
        outcome.merged.insert(key.clone(), record);
    }
}

fn normalized(record: &Record, default_date: EpochMs) -> Record {
    let mut r = record.clone();
    let (created, updated) = normalize_meta(Some(r.meta.created), Some(r.meta.updated), default_date);
    r.meta.created = created;
    r.meta.updated = updated;
    r.tags = normalize_tags(&r.tags);
    heal_tombstone_invariant(&mut r, default_date);
    r
}

/// merge-both-sources: both sides present; reconcile per the validity window.
fn merge_both_sources(
    key: &Key,
    local: &Record,
    remote: &Record,
    strategy: &MergeStrategy,
    sync_option: &SyncOption,
    outcome: &mut MergeOutcome,
) -> Option<Record> {
    let local_valid = valid(Some(local), sync_option.last_sync_time);
    let remote_valid = valid(Some(remote), sync_option.last_sync_time);

    match (local_valid, remote_valid) {
        (false, false) => None, // converged; not tombstoned, not emitted.
        (true, false) => Some(local.clone()),
        (false, true) => Some(remote.clone()),
        (true, true) => {
            if local.tags != remote.tags || local.meta != remote.meta {
                outcome.conflicted.push(key.clone());
            }
            Some(merge_updates(local, remote, strategy))
        }
    }
}

fn newer_side<'a>(local: &'a Record, remote: &'a Record) -> &'a Record {
    // ties favor local.
    if last_touch(&remote.meta) > last_touch(&local.meta) {
        remote
    } else {
        local
    }
}

fn merge_tags(local: &Record, remote: &Record, strategy: TagStrategy) -> Vec<String> {
    match strategy {
        TagStrategy::Local => local.tags.clone(),
        TagStrategy::Remote => remote.tags.clone(),
        TagStrategy::Newer => newer_side(local, remote).tags.clone(),
        TagStrategy::Union => {
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            let mut out = Vec::new();
            for t in local.tags.iter().chain(remote.tags.iter()) {
                if seen.insert(t.as_str()) {
                    out.push(t.clone());
                }
            }
            out
        }
    }
}

fn merge_meta_values(local: &Meta, remote: &Meta, strategy: MetaStrategy, local_newer: bool) -> Meta {
    match strategy {
        MetaStrategy::Local => local.clone(),
        MetaStrategy::Remote => remote.clone(),
        MetaStrategy::Newer => {
            if local_newer {
                local.clone()
            } else {
                remote.clone()
            }
        }
        MetaStrategy::Merge => {
            let (older, newer) = if local_newer { (remote, local) } else { (local, remote) };
            let mut merged = older.clone();
            if newer.title.is_some() {
                merged.title = newer.title.clone();
            }
            if newer.description.is_some() {
                merged.description = newer.description.clone();
            }
            if newer.note.is_some() {
                merged.note = newer.note.clone();
            }
            for (k, v) in &newer.extra {
                merged.extra.insert(k.clone(), v.clone());
            }
            merged
        }
    }
}

fn merge_deleted_meta(
    local: &Record,
    remote: &Record,
    merged_tags: &[String],
    strategy: MetaStrategy,
    local_newer: bool,
) -> Option<DeletedMeta> {
    if !merged_tags.iter().any(|t| t == DELETED_TAG) {
        return None;
    }
    match (&local.deleted_meta, &remote.deleted_meta) {
        (None, None) => None,
        (Some(l), None) => Some(l.clone()),
        (None, Some(r)) => Some(r.clone()),
        (Some(l), Some(r)) => Some(match strategy {
            MetaStrategy::Local => l.clone(),
            MetaStrategy::Remote => r.clone(),
            MetaStrategy::Newer | MetaStrategy::Merge => {
                if local_newer {
                    l.clone()
                } else {
                    r.clone()
                }
            }
        }),
    }
}

/// merge-updates: both sides valid. Produces tags/meta/deleted_meta
/// orthogonally, one strategy axis at a time (spec §4.B).
fn merge_updates(local: &Record, remote: &Record, strategy: &MergeStrategy) -> Record {
    let local_newer = last_touch(&local.meta) >= last_touch(&remote.meta);
    let tags = merge_tags(local, remote, strategy.tags);
    let meta = merge_meta_values(&local.meta, &remote.meta, strategy.meta, local_newer);
    let deleted_meta = merge_deleted_meta(local, remote, &tags, strategy.meta, local_newer);

    Record {
        tags,
        meta,
        deleted_meta,
        extra: if local_newer {
            local.extra.clone()
        } else {
            remote.extra.clone()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionType;

    fn rec(tags: &[&str], created: EpochMs, updated: EpochMs) -> Record {
        Record::new(tags.iter().map(|s| s.to_string()).collect(), Meta::new(created, updated))
    }

    fn map(pairs: Vec<(&str, Record)>) -> BookmarkMap {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn strategy() -> MergeStrategy {
        MergeStrategy {
            meta: MetaStrategy::Newer,
            tags: TagStrategy::Union,
            default_date: 0,
            ..Default::default()
        }
    }

    fn sync_option() -> SyncOption {
        SyncOption {
            current_time: 5000,
            last_sync_time: 1000,
        }
    }

    #[test]
    fn test_absent_inputs_yield_empty_outcome() {
        let local = map(vec![("u1", rec(&["a"], 100, 2000))]);
        assert_eq!(
            merge(Some(&local), None, &strategy(), &sync_option(), MergeOptions::default()).unwrap(),
            MergeOutcome::default()
        );
        assert_eq!(
            merge(None, Some(&local), &strategy(), &sync_option(), MergeOptions::default()).unwrap(),
            MergeOutcome::default()
        );
    }

    // S1
    #[test]
    fn test_s1_local_only_newer_edit() {
        let local = map(vec![("u1", rec(&["a"], 100, 2000))]);
        let remote = map(vec![]);
        let out = merge(Some(&local), Some(&remote), &strategy(), &sync_option(), MergeOptions::default()).unwrap();
        assert_eq!(out.deleted, Vec::<Key>::new());
        let r = &out.merged["u1"];
        assert_eq!(r.tags, vec!["a"]);
        assert_eq!(r.meta.created, 100);
        assert_eq!(r.meta.updated, 2000);
        assert_eq!(r.meta.updated2, Some(2001));
    }

    // S2
    #[test]
    fn test_s2_local_only_stale_edit() {
        let local = map(vec![("u1", rec(&["a"], 100, 500))]);
        let remote = map(vec![]);
        let out = merge(Some(&local), Some(&remote), &strategy(), &sync_option(), MergeOptions::default()).unwrap();
        assert!(out.merged.is_empty());
        assert_eq!(out.deleted, vec!["u1".to_string()]);
    }

    // S3
    #[test]
    fn test_s3_conflicting_edits_union_plus_newer() {
        let local = map(vec![("u1", rec(&["a", "common"], 100, 2000))]);
        let remote = map(vec![("u1", rec(&["b", "common"], 100, 3000))]);
        let out = merge(Some(&local), Some(&remote), &strategy(), &sync_option(), MergeOptions::default()).unwrap();
        let r = &out.merged["u1"];
        assert_eq!(r.tags, vec!["a", "common", "b"]);
        assert_eq!(r.meta.created, 100);
        assert_eq!(r.meta.updated, 3000);
        assert_eq!(r.meta.updated2, Some(3001));
        assert_eq!(out.deleted, Vec::<Key>::new());
        assert_eq!(out.conflicted, vec!["u1".to_string()]);
    }

    // S4
    #[test]
    fn test_s4_local_delete_beats_remote_stale_active() {
        let mut local_rec = rec(&[DELETED_TAG], 100, 4000);
        local_rec.deleted_meta = Some(DeletedMeta {
            deleted: 4000,
            action_type: ActionType::Delete,
        });
        let local = map(vec![("u1", local_rec)]);
        let remote = map(vec![("u1", rec(&["x"], 100, 900))]);
        let out = merge(Some(&local), Some(&remote), &strategy(), &sync_option(), MergeOptions::default()).unwrap();
        let r = &out.merged["u1"];
        assert_eq!(r.tags, vec![DELETED_TAG]);
        assert_eq!(r.meta.created, 100);
        assert_eq!(r.meta.updated, 4000);
        assert_eq!(r.meta.updated2, Some(4001));
        assert_eq!(
            r.deleted_meta,
            Some(DeletedMeta {
                deleted: 4000,
                action_type: ActionType::Delete
            })
        );
        assert_eq!(out.deleted, Vec::<Key>::new());
    }

    // S5
    #[test]
    fn test_s5_undelete_via_tags_newer_with_remote_newer_and_active() {
        let mut local_rec = rec(&[DELETED_TAG, "old"], 100, 2000);
        local_rec.deleted_meta = Some(DeletedMeta {
            deleted: 2000,
            action_type: ActionType::Delete,
        });
        let local = map(vec![("u1", local_rec)]);
        let remote = map(vec![("u1", rec(&["fresh"], 100, 3000))]);
        let mut s = strategy();
        s.tags = TagStrategy::Newer;
        let out = merge(Some(&local), Some(&remote), &s, &sync_option(), MergeOptions::default()).unwrap();
        let r = &out.merged["u1"];
        assert_eq!(r.tags, vec!["fresh"]);
        assert_eq!(r.meta.updated2, Some(3001));
        assert_eq!(r.deleted_meta, None);
        assert_eq!(out.deleted, Vec::<Key>::new());
    }

    #[test]
    fn test_both_stale_drops_without_tombstoning() {
        let local = map(vec![("u1", rec(&["a"], 10, 20))]);
        let remote = map(vec![("u1", rec(&["b"], 10, 30))]);
        let out = merge(Some(&local), Some(&remote), &strategy(), &sync_option(), MergeOptions::default()).unwrap();
        assert!(out.merged.is_empty());
        assert!(out.deleted.is_empty());
    }

    #[test]
    fn test_p2_timestamps_monotone_across_scenarios() {
        for (local, remote) in [
            (map(vec![("u1", rec(&["a"], 100, 2000))]), map(vec![])),
            (
                map(vec![("u1", rec(&["a", "common"], 100, 2000))]),
                map(vec![("u1", rec(&["b", "common"], 100, 3000))]),
            ),
        ] {
            let out = merge(Some(&local), Some(&remote), &strategy(), &sync_option(), MergeOptions::default()).unwrap();
            for r in out.merged.values() {
                assert!(r.meta.created <= r.meta.updated);
                assert!(r.meta.updated <= r.meta.updated2.unwrap());
            }
        }
    }

    #[test]
    fn test_p3_tombstone_consistency() {
        let mut local_rec = rec(&[DELETED_TAG], 100, 4000);
        local_rec.deleted_meta = Some(DeletedMeta {
            deleted: 4000,
            action_type: ActionType::Delete,
        });
        let local = map(vec![("u1", local_rec), ("u2", rec(&["a"], 100, 2000))]);
        let remote = map(vec![]);
        let out = merge(Some(&local), Some(&remote), &strategy(), &sync_option(), MergeOptions::default()).unwrap();
        for r in out.merged.values() {
            assert_eq!(r.is_deleted(), r.deleted_meta.is_some());
        }
    }

    #[test]
    fn test_p4_idempotence_at_convergence() {
        let local = map(vec![("u1", rec(&["a", "common"], 100, 2000))]);
        let remote = map(vec![("u1", rec(&["b", "common"], 100, 3000))]);
        let w = sync_option();
        let out = merge(Some(&local), Some(&remote), &strategy(), &w, MergeOptions::default()).unwrap();

        let w2 = SyncOption {
            current_time: w.current_time,
            last_sync_time: w.current_time,
        };
        let out2 = merge(Some(&out.merged), Some(&out.merged), &strategy(), &w2, MergeOptions::default()).unwrap();
        assert_eq!(out2.merged, out.merged);
        assert!(out2.deleted.is_empty());
    }

    #[test]
    fn test_p5_commutativity_for_newer_union() {
        let local = map(vec![("u1", rec(&["a", "common"], 100, 2000))]);
        let remote = map(vec![("u1", rec(&["b", "common"], 100, 3000))]);
        let forward = merge(Some(&local), Some(&remote), &strategy(), &sync_option(), MergeOptions::default()).unwrap();
        let backward = merge(Some(&remote), Some(&local), &strategy(), &sync_option(), MergeOptions::default()).unwrap();
        // Same content, but tag order follows "left-first" for whichever side
        // is passed as local, so we compare as sets plus check the monotone fields match.
        let f = &forward.merged["u1"];
        let b = &backward.merged["u1"];
        assert_eq!(
            f.tags.iter().collect::<BTreeSet<_>>(),
            b.tags.iter().collect::<BTreeSet<_>>()
        );
        assert_eq!(f.meta.created, b.meta.created);
        assert_eq!(f.meta.updated, b.meta.updated);
    }

    #[test]
    fn test_large_input_batches_without_losing_keys() {
        let mut local = BookmarkMap::new();
        for i in 0..250 {
            local.insert(format!("u{i}"), rec(&["a"], 100, 2000));
        }
        let remote = BookmarkMap::new();
        let mut progress_calls = 0;
        let mut on_progress = |_p: Progress| progress_calls += 1;
        let out = merge(
            Some(&local),
            Some(&remote),
            &strategy(),
            &sync_option(),
            MergeOptions {
                batch_size: 100,
                on_progress: Some(&mut on_progress),
                interruptee: None,
            },
        )
        .unwrap();
        assert_eq!(out.merged.len(), 250);
        assert_eq!(progress_calls, 3);
    }
}

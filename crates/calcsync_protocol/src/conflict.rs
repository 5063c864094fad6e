//! Conflict detection and resolution.
//!
//! Both operations are pure: they look at two snapshots of one logical
//! record and return a verdict. Recording conflicts and applying
//! resolutions is the caller's job.
//!
//! ## Detection
//!
//! A local snapshot carries the server version it was based on in
//! `server_timestamp`. Against that base:
//!
//! - the local side has *edited* if its effective timestamp is later
//! - the remote side has *advanced* if its server timestamp is later
//!
//! Only when both hold have the two sides diverged. A local record that
//! never reached the server but meets a remote record with the same client
//! id from another device is a device mismatch.

use crate::snapshot::RecordSnapshot;
use calcsync_core::{ConflictKind, ConflictStrategy, EntityType, Timestamp};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Tuning for [`detect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectOptions {
    /// Two edits whose effective timestamps are closer than this are
    /// treated as concurrent rather than ordered.
    pub concurrent_window: Duration,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            concurrent_window: Duration::from_secs(5),
        }
    }
}

/// A detected divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedConflict {
    /// Divergence kind.
    pub kind: ConflictKind,
    /// Local effective timestamp.
    pub local_timestamp: Timestamp,
    /// Remote effective timestamp.
    pub remote_timestamp: Timestamp,
}

/// Compares a local and a remote snapshot of the same record.
///
/// Returns `None` when the snapshots are for different records, carry the
/// same content, or one side is a clean fast-forward of the other.
#[must_use]
pub fn detect(
    local: &RecordSnapshot,
    remote: &RecordSnapshot,
    options: &DetectOptions,
) -> Option<DetectedConflict> {
    if local.client_id != remote.client_id || local.entity_type != remote.entity_type {
        return None;
    }
    if local.same_content(remote) {
        return None;
    }

    let conflict = |kind| DetectedConflict {
        kind,
        local_timestamp: local.effective_timestamp(),
        remote_timestamp: remote.effective_timestamp(),
    };

    let Some(base) = local.server_timestamp else {
        if local.device_id != remote.device_id {
            return Some(conflict(ConflictKind::DeviceMismatch));
        }
        return None;
    };

    let local_edited = local.effective_timestamp() > base;
    let remote_advanced = remote.server_timestamp.is_some_and(|ts| ts > base);
    if !(local_edited && remote_advanced) {
        return None;
    }

    let (ours, theirs) = (local.effective_timestamp(), remote.effective_timestamp());
    let gap = ours
        .max(theirs)
        .signed_duration_since(ours.min(theirs))
        .to_std()
        .unwrap_or(Duration::MAX);
    if gap < options.concurrent_window {
        Some(conflict(ConflictKind::ConcurrentModification))
    } else {
        Some(conflict(ConflictKind::VersionMismatch))
    }
}

/// Which side a resolution kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// The local version.
    Local,
    /// The remote version.
    Remote,
    /// A field-level merge of both.
    Merged,
}

/// The outcome of [`resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The record to keep, based on the remote server version.
    pub record: RecordSnapshot,
    /// Which side it came from.
    pub winner: Winner,
}

impl Resolution {
    /// Returns true if the kept record differs from what the server holds
    /// and must be pushed back.
    #[must_use]
    pub fn needs_upload(&self) -> bool {
        self.winner != Winner::Remote
    }
}

/// How one field is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Keep the local value.
    PreferLocal,
    /// Keep the remote value.
    PreferRemote,
    /// Keep the value from the side with the later effective timestamp;
    /// ties keep local.
    PreferNewer,
    /// Set union of two arrays, local order first. Non-array values fall
    /// back to [`FieldRule::PreferNewer`].
    Union,
}

/// Field rules for [`ConflictStrategy::Merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePolicy {
    default_rule: FieldRule,
    overrides: BTreeMap<String, FieldRule>,
}

impl MergePolicy {
    /// A policy applying one rule to every field.
    #[must_use]
    pub fn uniform(rule: FieldRule) -> Self {
        Self {
            default_rule: rule,
            overrides: BTreeMap::new(),
        }
    }

    /// Overrides the rule for one field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        self.overrides.insert(field.into(), rule);
        self
    }

    /// The stock policy for an entity type.
    ///
    /// Calculations keep parameters and result from the same side.
    /// Parameter sets union their tags and never take the preset flag from
    /// the remote side.
    #[must_use]
    pub fn for_entity(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Calculation => Self::uniform(FieldRule::PreferNewer),
            EntityType::ParameterSet => Self::uniform(FieldRule::PreferNewer)
                .with_field("tags", FieldRule::Union)
                .with_field("is_preset", FieldRule::PreferLocal),
        }
    }

    /// Rule applied to `field`.
    #[must_use]
    pub fn rule_for(&self, field: &str) -> FieldRule {
        self.overrides
            .get(field)
            .copied()
            .unwrap_or(self.default_rule)
    }
}

/// Settles a conflict with `strategy`.
///
/// The returned record always takes the remote server id and server
/// timestamp, so a later upload of it is based on the version the server
/// holds.
#[must_use]
pub fn resolve(
    local: &RecordSnapshot,
    remote: &RecordSnapshot,
    strategy: ConflictStrategy,
    policy: &MergePolicy,
) -> Resolution {
    let local_is_newer = local.effective_timestamp() >= remote.effective_timestamp();
    let (mut record, winner) = match strategy {
        ConflictStrategy::KeepLocal => (local.clone(), Winner::Local),
        ConflictStrategy::KeepServer => (remote.clone(), Winner::Remote),
        ConflictStrategy::KeepNewest if local_is_newer => (local.clone(), Winner::Local),
        ConflictStrategy::KeepNewest => (remote.clone(), Winner::Remote),
        ConflictStrategy::Merge => (merge(local, remote, policy, local_is_newer), Winner::Merged),
    };
    record.server_id = remote.server_id.clone().or(record.server_id);
    record.server_timestamp = remote.server_timestamp.or(record.server_timestamp);
    Resolution { record, winner }
}

fn merge(
    local: &RecordSnapshot,
    remote: &RecordSnapshot,
    policy: &MergePolicy,
    local_is_newer: bool,
) -> RecordSnapshot {
    let mut data = Map::new();
    let keys: Vec<&String> = local
        .data
        .keys()
        .chain(remote.data.keys().filter(|k| !local.data.contains_key(*k)))
        .collect();

    for key in keys {
        let merged = merge_field(
            policy.rule_for(key),
            local.data.get(key),
            remote.data.get(key),
            local_is_newer,
        );
        if let Some(value) = merged {
            data.insert(key.clone(), value);
        }
    }

    let newer = if local_is_newer { local } else { remote };
    RecordSnapshot {
        entity_type: local.entity_type,
        client_id: local.client_id,
        server_id: local.server_id.clone(),
        device_id: local.device_id.clone(),
        user_id: local.user_id.clone().or_else(|| remote.user_id.clone()),
        created_at: local.created_at.min(remote.created_at),
        updated_at: Some(local.effective_timestamp().max(remote.effective_timestamp())),
        server_timestamp: local.server_timestamp,
        deleted: newer.deleted,
        data,
    }
}

fn merge_field(
    rule: FieldRule,
    local: Option<&Value>,
    remote: Option<&Value>,
    local_is_newer: bool,
) -> Option<Value> {
    let pick = |first: Option<&Value>, second: Option<&Value>| first.or(second).cloned();
    match rule {
        FieldRule::PreferLocal => pick(local, remote),
        FieldRule::PreferRemote => pick(remote, local),
        FieldRule::PreferNewer if local_is_newer => pick(local, remote),
        FieldRule::PreferNewer => pick(remote, local),
        FieldRule::Union => match (local, remote) {
            (Some(Value::Array(ours)), Some(Value::Array(theirs))) => {
                let mut union = ours.clone();
                for item in theirs {
                    if !union.contains(item) {
                        union.push(item.clone());
                    }
                }
                Some(Value::Array(union))
            }
            _ => merge_field(FieldRule::PreferNewer, local, remote, local_is_newer),
        },
    }
}

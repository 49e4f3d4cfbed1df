//! Status change notifications.
//!
//! Clients poll their requests; [`ChangeDetector`] turns consecutive
//! snapshots into at most one [`StatusChange`] per transition. A bounded
//! retention window suppresses repeats of the same transition, so overlapping
//! polls (or a stale read racing a fresh one) never notify twice. The event
//! processor uses the same [`TtlSet`] to de-duplicate server-side
//! notifications.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;

use crate::entities::enums::{RequestStatus, RequestType};

/// One request as a poll saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestSnapshot {
    pub request_type: RequestType,
    pub request_id: i64,
    pub status: RequestStatus,
}

/// A transition worth telling the user about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub request_type: RequestType,
    pub request_id: i64,
    pub old_status: RequestStatus,
    pub new_status: RequestStatus,
}

/// De-dup key: the full transition, not just the request.
pub type ChangeKey = (RequestType, i64, RequestStatus, RequestStatus);

/// Set with per-entry expiry. `insert` is insert-if-absent: it reports whether
/// the key was new (or stale enough to count as new) and records it. Entries
/// older than the retention window are pruned on every insert.
pub struct TtlSet {
    entries: DashMap<ChangeKey, DateTime<Utc>>,
    retention: Duration,
}

impl TtlSet {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
        }
    }

    /// Record `key` at `now`. Returns true when the key was absent or its
    /// previous entry had aged out.
    pub fn insert(&self, key: ChangeKey, now: DateTime<Utc>) -> bool {
        self.prune(now);
        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if now - *occupied.get() > self.retention {
                    occupied.insert(now);
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }

    /// Drop entries older than the retention window.
    pub fn prune(&self, now: DateTime<Utc>) {
        self.entries
            .retain(|_, inserted_at| now - *inserted_at <= self.retention);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Diffs snapshots against the last observed status per request and
/// de-duplicates through a [`TtlSet`]. One detector per polling client.
pub struct ChangeDetector {
    previous: HashMap<(RequestType, i64), RequestStatus>,
    seen: TtlSet,
}

impl ChangeDetector {
    pub fn new(retention: Duration) -> Self {
        Self {
            previous: HashMap::new(),
            seen: TtlSet::new(retention),
        }
    }

    /// Feed one snapshot. Returns a change when the status differs from the
    /// previously observed one and this exact transition has not been
    /// reported within the retention window. The first observation of a
    /// request never notifies.
    pub fn observe(&mut self, now: DateTime<Utc>, snapshot: &RequestSnapshot) -> Option<StatusChange> {
        let key = (snapshot.request_type, snapshot.request_id);
        let old_status = self.previous.insert(key, snapshot.status)?;
        if old_status == snapshot.status {
            return None;
        }

        let change_key = (
            snapshot.request_type,
            snapshot.request_id,
            old_status,
            snapshot.status,
        );
        if !self.seen.insert(change_key, now) {
            return None;
        }

        Some(StatusChange {
            request_type: snapshot.request_type,
            request_id: snapshot.request_id,
            old_status,
            new_status: snapshot.status,
        })
    }
}

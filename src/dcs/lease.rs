//! Leader lease record.
//!
//! The lease lives as string annotations on the cluster object.  Times are
//! Unix-epoch seconds, the TTL is a duration in seconds.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::{HaError, HaResult};

pub const LEADER_NAME: &str = "leader";
pub const ACQUIRE_TIME: &str = "acquire-time";
pub const RENEW_TIME: &str = "renew-time";
pub const TTL: &str = "ttl";

/// Decoded lease fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderRecord {
    pub leader: String,
    pub acquire_time: i64,
    pub renew_time: i64,
    pub ttl: i64,
}

impl LeaderRecord {
    /// A fresh lease held by `leader`, acquired and renewed at `now`.
    pub fn acquired(leader: impl Into<String>, now: i64, ttl: i64) -> Self {
        Self {
            leader: leader.into(),
            acquire_time: now,
            renew_time: now,
            ttl,
        }
    }

    /// The same lease renewed at `now`.
    pub fn renewed(&self, now: i64, ttl: i64) -> Self {
        Self {
            leader: self.leader.clone(),
            acquire_time: self.acquire_time,
            renew_time: now,
            ttl,
        }
    }

    /// A lease is expired strictly after `renew_time + ttl`.
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.renew_time.saturating_add(self.ttl)
    }

    /// Seconds until expiry, zero once expired.
    pub fn remaining(&self, now: i64) -> i64 {
        (self.renew_time.saturating_add(self.ttl) - now).max(0)
    }

    /// Decode from cluster-object annotations.
    ///
    /// Returns `Ok(None)` when no leader name is recorded (the lease was
    /// never written).  A present but malformed time field is an error.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> HaResult<Option<Self>> {
        let leader = match annotations.get(LEADER_NAME) {
            Some(name) if !name.is_empty() => name.clone(),
            _ => return Ok(None),
        };
        Ok(Some(Self {
            leader,
            acquire_time: parse_seconds(annotations, ACQUIRE_TIME)?,
            renew_time: parse_seconds(annotations, RENEW_TIME)?,
            ttl: parse_seconds(annotations, TTL)?,
        }))
    }

    /// Encode into annotations.
    pub fn to_annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LEADER_NAME.to_string(), self.leader.clone()),
            (ACQUIRE_TIME.to_string(), self.acquire_time.to_string()),
            (RENEW_TIME.to_string(), self.renew_time.to_string()),
            (TTL.to_string(), self.ttl.to_string()),
        ])
    }
}

/// Missing keys decode as zero; unparseable values are rejected.
pub(crate) fn parse_seconds(annotations: &BTreeMap<String, String>, key: &str) -> HaResult<i64> {
    match annotations.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(0),
        Some(raw) => raw.parse::<i64>().map_err(|e| {
            HaError::store_read(format!("malformed annotation {key}={raw:?}"), e)
        }),
    }
}

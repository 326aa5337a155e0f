//! Tracking of provisioned credential keys
//!
//! Every credential the engine provisions is recorded in the resource status
//! as an [`ActiveKey`] until its deletion at the provider is confirmed. The
//! [`ActiveKeys`] set drives both renewal scheduling (via the newest key) and
//! the cleanup pass (via [`ActiveKeys::drop_expired`]).

use chrono::{DateTime, TimeDelta, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum time before expiry at which renewal triggers.
///
/// Keys with a short validity use a dynamic threshold of 10% of the validity
/// period instead.
pub fn renewal_cap() -> TimeDelta {
    TimeDelta::days(7)
}

/// Renewal window for a key of the given validity: `min(validity / 10, 7d)`.
pub(crate) fn renewal_threshold(validity: TimeDelta) -> TimeDelta {
    (validity / 10).min(renewal_cap())
}

/// A provisioned credential key tracked by the operator
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveKey {
    /// Provider-specific identifier for this key
    pub key_id: String,

    /// When this key was provisioned
    pub created_at: DateTime<Utc>,

    /// When this key will expire
    pub expires_at: DateTime<Utc>,
}

impl ActiveKey {
    /// Reports whether the key is expired or within its renewal window at `now`.
    pub fn near_expiry(&self, now: DateTime<Utc>) -> bool {
        if self.expires_at <= now {
            return true;
        }
        let validity = self.expires_at - self.created_at;
        self.expires_at - now < renewal_threshold(validity)
    }
}

/// Ordered list of provisioned credential keys
///
/// Order is insertion order. Older entries exist only transiently between
/// rotations and cleanup passes.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(transparent)]
pub struct ActiveKeys(Vec<ActiveKey>);

impl ActiveKeys {
    /// Returns the most recently created key, or `None` if the list is empty.
    ///
    /// Ties on `created_at` are broken by insertion order: the key inserted
    /// later wins.
    pub fn newest(&self) -> Option<&ActiveKey> {
        self.0.iter().max_by_key(|k| k.created_at)
    }

    /// Removes expired keys in place and returns the dropped ones.
    ///
    /// The `keep` callback is invoked for each expired key; return `true` to
    /// retain it (e.g. when provider deletion failed), `false` to drop it.
    /// Insertion order of retained keys is preserved and the backing storage
    /// is reused.
    pub fn drop_expired(
        &mut self,
        now: DateTime<Utc>,
        mut keep: impl FnMut(&ActiveKey) -> bool,
    ) -> Vec<ActiveKey> {
        let mut dropped = Vec::new();
        self.0.retain(|k| {
            if k.expires_at >= now || keep(k) {
                true
            } else {
                dropped.push(k.clone());
                false
            }
        });
        dropped
    }

    /// Appends a key to the set.
    pub fn push(&mut self, key: ActiveKey) {
        self.0.push(key);
    }

    /// Iterates over the keys in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, ActiveKey> {
        self.0.iter()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Reports whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a ActiveKeys {
    type Item = &'a ActiveKey;
    type IntoIter = std::slice::Iter<'a, ActiveKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<ActiveKey> for ActiveKeys {
    fn from_iter<T: IntoIterator<Item = ActiveKey>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str, created: DateTime<Utc>, expires: DateTime<Utc>) -> ActiveKey {
        ActiveKey {
            key_id: id.to_string(),
            created_at: created,
            expires_at: expires,
        }
    }

    #[test]
    fn test_newest_empty() {
        let keys = ActiveKeys::default();
        assert!(keys.newest().is_none());
    }

    #[test]
    fn test_newest_picks_greatest_created_at() {
        let now = Utc::now();
        let keys: ActiveKeys = [
            key("old", now - TimeDelta::hours(2), now + TimeDelta::hours(1)),
            key("newest", now, now + TimeDelta::hours(1)),
            key("middle", now - TimeDelta::hours(1), now + TimeDelta::hours(1)),
        ]
        .into_iter()
        .collect();

        assert_eq!(keys.newest().unwrap().key_id, "newest");
    }

    #[test]
    fn test_newest_tie_goes_to_later_insertion() {
        let now = Utc::now();
        let keys: ActiveKeys = [
            key("first", now, now + TimeDelta::hours(1)),
            key("second", now, now + TimeDelta::hours(1)),
        ]
        .into_iter()
        .collect();

        assert_eq!(keys.newest().unwrap().key_id, "second");
    }

    #[test]
    fn test_drop_expired_removes_expired_keys() {
        let now = Utc::now();
        let mut keys: ActiveKeys = [
            key("expired", now - TimeDelta::hours(2), now - TimeDelta::hours(1)),
            key("valid", now - TimeDelta::hours(1), now + TimeDelta::hours(1)),
            key(
                "also-expired",
                now - TimeDelta::hours(3),
                now - TimeDelta::hours(2),
            ),
        ]
        .into_iter()
        .collect();

        // Don't keep any expired keys (successful deletion).
        let dropped = keys.drop_expired(now, |_| false);

        assert_eq!(dropped.len(), 2);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys.iter().next().unwrap().key_id, "valid");
    }

    #[test]
    fn test_drop_expired_none_expired() {
        let now = Utc::now();
        let mut keys: ActiveKeys =
            [key("valid", now, now + TimeDelta::hours(1))].into_iter().collect();

        let dropped = keys.drop_expired(now, |_| false);
        assert!(dropped.is_empty());
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_drop_expired_keeps_on_failure() {
        let now = Utc::now();
        let mut keys: ActiveKeys = [
            key(
                "fail-delete",
                now - TimeDelta::hours(2),
                now - TimeDelta::hours(1),
            ),
            key(
                "ok-delete",
                now - TimeDelta::hours(3),
                now - TimeDelta::hours(2),
            ),
            key("valid", now, now + TimeDelta::hours(1)),
        ]
        .into_iter()
        .collect();

        // Keep "fail-delete" (simulating provider deletion failure).
        let dropped = keys.drop_expired(now, |k| k.key_id == "fail-delete");

        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].key_id, "ok-delete");
        assert_eq!(keys.len(), 2);
        let remaining: Vec<_> = keys.iter().map(|k| k.key_id.as_str()).collect();
        assert_eq!(remaining, vec!["fail-delete", "valid"]);
    }

    #[test]
    fn test_near_expiry_fresh_key() {
        let now = Utc::now();
        let k = key("k", now, now + TimeDelta::hours(24));
        assert!(!k.near_expiry(now));
    }

    #[test]
    fn test_near_expiry_expired_key() {
        let now = Utc::now();
        let k = key("k", now - TimeDelta::hours(25), now - TimeDelta::hours(1));
        assert!(k.near_expiry(now));
    }

    #[test]
    fn test_near_expiry_within_threshold() {
        let now = Utc::now();
        // 24h validity, 10% threshold = 2.4h, key expires in 1h.
        let k = key("k", now - TimeDelta::hours(23), now + TimeDelta::hours(1));
        assert!(k.near_expiry(now));
    }

    #[test]
    fn test_near_expiry_threshold_capped_for_long_validity() {
        let now = Utc::now();
        // 1 year validity would give a 36.5d window at 10%; the cap keeps it
        // at 7d, so a key expiring in 10d is not yet near expiry.
        let k = key("k", now - TimeDelta::days(355), now + TimeDelta::days(10));
        assert!(!k.near_expiry(now));

        let k = key("k", now - TimeDelta::days(359), now + TimeDelta::days(6));
        assert!(k.near_expiry(now));
    }
}

//! Exclusive lease held as an object in storage
//!
//! Acquisition is a put-if-absent of the lease object. A lease past its
//! expiry is taken over with a conditional replace against the exact bytes
//! that were read, so of two callers that saw the same stale lease only one
//! wins. A live lease held by someone else fails with `Error::LeaseHeld`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use wastetrack_domain::repository::ObjectStore;
use wastetrack_types::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaseInfo {
    fn new(holder: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::minutes(5)),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

fn held(key: &str, holder: impl Into<String>) -> Error {
    Error::LeaseHeld {
        key: key.to_string(),
        holder: holder.into(),
    }
}

/// A held lease; released on [`Lease::release`] or, failing that, on drop
pub struct Lease<'a> {
    store: &'a dyn ObjectStore,
    key: String,
    /// Bytes we wrote; release only removes the object while it still holds them
    body: Vec<u8>,
    released: bool,
}

impl<'a> Lease<'a> {
    pub fn acquire(
        store: &'a dyn ObjectStore,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Self> {
        let body = serde_json::to_vec(&LeaseInfo::new(holder, ttl))?;
        if !store.put_if_absent(key, &body)? {
            let current = match store.get(key) {
                Ok(current) => current,
                // Released between the two calls
                Err(Error::ObjectNotFound(_)) => {
                    if store.put_if_absent(key, &body)? {
                        return Ok(Self::held_by(store, key, holder, body));
                    }
                    return Err(held(key, "unknown"));
                }
                Err(e) => return Err(e),
            };
            match serde_json::from_slice::<LeaseInfo>(&current).ok() {
                Some(info) if !info.is_expired() => return Err(held(key, info.holder)),
                Some(info) => warn!(key, stale_holder = %info.holder, "taking over expired lease"),
                None => warn!(key, "replacing unreadable lease"),
            }
            if !store.replace_if_matches(key, &current, Some(&body))? {
                let winner = read_lease(store, key)?
                    .map(|i| i.holder)
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(held(key, winner));
            }
        }
        Ok(Self::held_by(store, key, holder, body))
    }

    fn held_by(store: &'a dyn ObjectStore, key: &str, holder: &str, body: Vec<u8>) -> Self {
        debug!(key, holder, "lease acquired");
        Self {
            store,
            key: key.to_string(),
            body,
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Delete the lease object if it is still ours
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.release_inner()
    }

    fn release_inner(&self) -> Result<()> {
        if !self.store.replace_if_matches(&self.key, &self.body, None)? {
            warn!(key = %self.key, "lease was taken over, leaving it");
        }
        Ok(())
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release_inner() {
                warn!(key = %self.key, error = %e, "failed to release lease");
            }
        }
    }
}

/// Current lease at `key`; an unreadable lease object counts as expired
fn read_lease(store: &dyn ObjectStore, key: &str) -> Result<Option<LeaseInfo>> {
    match store.get(key) {
        Ok(data) => Ok(serde_json::from_slice(&data).ok()),
        Err(Error::ObjectNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

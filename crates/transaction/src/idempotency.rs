//! Idempotency keys and the record store that deduplicates side effects.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::watch;

/// Derives the idempotency key of a request.
///
/// SHA-256 over service, operation and the canonical payload, hex encoded.
/// Payloads that differ only in object key order produce the same key.
pub fn idempotency_key(service: &str, operation: &str, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(service.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(operation.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(canonical_json(payload).as_bytes());
    hex::encode(hasher.finalize())
}

/// Serializes `value` with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Outcome stored for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    Completed,
    Failed,
}

/// The remembered outcome of one idempotent request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    /// `service:operation` of the request.
    pub operation: String,
    pub result: Value,
    pub error: Option<String>,
    pub status: IdempotencyStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Records a successful execution.
    pub fn completed(
        key: impl Into<String>,
        operation: impl Into<String>,
        result: Value,
        ttl: Duration,
    ) -> Self {
        Self::new(key, operation, result, None, IdempotencyStatus::Completed, ttl)
    }

    /// Records an execution that failed for good.
    pub fn failed(
        key: impl Into<String>,
        operation: impl Into<String>,
        error: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self::new(
            key,
            operation,
            Value::Null,
            Some(error.into()),
            IdempotencyStatus::Failed,
            ttl,
        )
    }

    fn new(
        key: impl Into<String>,
        operation: impl Into<String>,
        result: Value,
        error: Option<String>,
        status: IdempotencyStatus,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            key: key.into(),
            operation: operation.into(),
            result,
            error,
            status,
            created_at,
            expires_at: created_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Returns true once the record no longer suppresses re-execution.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Result of claiming a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The caller owns the key and must [`settle`](KeyedStore::settle) or
    /// [`release`](KeyedStore::release) it.
    Acquired,
    /// The request already ran; here is what happened.
    Settled(IdempotencyRecord),
}

/// Store of idempotency records with an atomic claim.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Claims `key` for execution.
    ///
    /// Returns the live record if there is one. If another caller holds
    /// the claim, waits for it to settle or release first.
    async fn claim(&self, key: &str) -> Claim;

    /// Stores the outcome of a claimed key and wakes any waiters.
    async fn settle(&self, record: IdempotencyRecord);

    /// Gives up a claim without recording an outcome.
    async fn release(&self, key: &str);

    /// Forgets a settled record so the request may run again.
    async fn invalidate(&self, key: &str);

    /// Returns the live record for `key`.
    async fn get(&self, key: &str) -> Option<IdempotencyRecord>;

    /// Drops expired records and returns how many were removed.
    async fn purge_expired(&self) -> usize;
}

#[derive(Debug)]
enum Slot {
    /// Dropping the sender wakes every waiter.
    InFlight(watch::Sender<()>),
    Settled(IdempotencyRecord),
}

enum ClaimAction {
    Return(Claim),
    Wait(watch::Receiver<()>),
}

/// In-memory idempotency store.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    slots: DashMap<String, Slot>,
}

impl InMemoryIdempotencyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn try_claim(&self, key: &str) -> ClaimAction {
        match self.slots.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                let (tx, _) = watch::channel(());
                vacant.insert(Slot::InFlight(tx));
                ClaimAction::Return(Claim::Acquired)
            }
            Entry::Occupied(mut occupied) => {
                let action = match occupied.get() {
                    Slot::Settled(record) if !record.is_expired(Utc::now()) => {
                        Some(ClaimAction::Return(Claim::Settled(record.clone())))
                    }
                    Slot::Settled(_) => None,
                    Slot::InFlight(tx) => Some(ClaimAction::Wait(tx.subscribe())),
                };
                action.unwrap_or_else(|| {
                    let (tx, _) = watch::channel(());
                    occupied.insert(Slot::InFlight(tx));
                    ClaimAction::Return(Claim::Acquired)
                })
            }
        }
    }
}

#[async_trait]
impl KeyedStore for InMemoryIdempotencyStore {
    async fn claim(&self, key: &str) -> Claim {
        loop {
            match self.try_claim(key) {
                ClaimAction::Return(claim) => return claim,
                ClaimAction::Wait(mut rx) => {
                    tracing::debug!(key, "waiting for in-flight request");
                    // Err means the holder settled or released
                    let _ = rx.changed().await;
                }
            }
        }
    }

    async fn settle(&self, record: IdempotencyRecord) {
        self.slots
            .insert(record.key.clone(), Slot::Settled(record));
    }

    async fn release(&self, key: &str) {
        self.slots
            .remove_if(key, |_, slot| matches!(slot, Slot::InFlight(_)));
    }

    async fn invalidate(&self, key: &str) {
        self.slots
            .remove_if(key, |_, slot| matches!(slot, Slot::Settled(_)));
    }

    async fn get(&self, key: &str) -> Option<IdempotencyRecord> {
        let now = Utc::now();
        self.slots.get(key).and_then(|slot| match slot.value() {
            Slot::Settled(record) if !record.is_expired(now) => Some(record.clone()),
            _ => None,
        })
    }

    async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        self.slots.retain(|_, slot| match slot {
            Slot::Settled(record) if record.is_expired(now) => {
                removed += 1;
                false
            }
            _ => true,
        });
        if removed > 0 {
            tracing::debug!(removed, "purged expired idempotency records");
        }
        removed
    }
}

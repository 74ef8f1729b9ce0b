#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use collector_kernel_contracts::session::{LeaseId, TtlSeconds};
use collector_kernel_contracts::{ContractViolation, Validate};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseStoreError {
    #[error("lease store operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("lease store unavailable: {0}")]
    Unavailable(String),
    #[error("lease {0} not found")]
    LeaseNotFound(LeaseId),
}

impl LeaseStoreError {
    /// Errors worth another attempt against the same store.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LeaseStoreError::Timeout { .. } | LeaseStoreError::Unavailable(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub value: Vec<u8>,
    pub lease: LeaseId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    /// `LeaseId::NONE` mints a new lease of `ttl`.
    pub lease: LeaseId,
    pub ttl: TtlSeconds,
}

impl PutOptions {
    pub fn v1(lease: LeaseId, ttl: TtlSeconds) -> Self {
        Self { lease, ttl }
    }
}

/// Replicated key/value primitive with lease-bound expiry.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// `Ok(None)` when the key is absent.
    async fn get_with_lease(&self, key: &str) -> Result<Option<StoredValue>, LeaseStoreError>;

    async fn put_force_with_opts(
        &self,
        key: &str,
        value: Vec<u8>,
        opts: PutOptions,
    ) -> Result<(), LeaseStoreError>;

    async fn delete(&self, key: &str) -> Result<(), LeaseStoreError>;
}

#[async_trait]
impl<S: LeaseStore + ?Sized> LeaseStore for Arc<S> {
    async fn get_with_lease(&self, key: &str) -> Result<Option<StoredValue>, LeaseStoreError> {
        (**self).get_with_lease(key).await
    }

    async fn put_force_with_opts(
        &self,
        key: &str,
        value: Vec<u8>,
        opts: PutOptions,
    ) -> Result<(), LeaseStoreError> {
        (**self).put_force_with_opts(key, value, opts).await
    }

    async fn delete(&self, key: &str) -> Result<(), LeaseStoreError> {
        (**self).delete(key).await
    }
}

#[derive(Debug)]
struct LeaseSlot {
    ttl: Duration,
    deadline: Instant,
    keys: BTreeSet<String>,
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    lease: LeaseId,
}

#[derive(Debug, Default)]
struct MemState {
    entries: BTreeMap<String, Entry>,
    leases: BTreeMap<LeaseId, LeaseSlot>,
    last_lease: i64,
}

impl MemState {
    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, slot)| slot.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(slot) = self.leases.remove(&id) {
                for key in slot.keys {
                    self.entries.remove(&key);
                }
                debug!(lease = %id, "lease expired");
            }
        }
    }

    fn detach(&mut self, key: &str, lease: LeaseId) {
        let now_empty = match self.leases.get_mut(&lease) {
            Some(slot) => {
                slot.keys.remove(key);
                slot.keys.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.leases.remove(&lease);
        }
    }
}

/// In-process lease store. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseStore {
    state: Arc<Mutex<MemState>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_lease_count(&self) -> usize {
        self.with_state(|s| s.leases.len()).unwrap_or(0)
    }

    pub fn live_key_count(&self) -> usize {
        self.with_state(|s| s.entries.len()).unwrap_or(0)
    }

    /// Remaining lifetime of `lease`, `None` once it has expired or was
    /// never granted.
    pub fn time_to_live(&self, lease: LeaseId) -> Option<Duration> {
        self.with_state(|s| {
            s.leases
                .get(&lease)
                .map(|slot| slot.deadline.saturating_duration_since(Instant::now()))
        })
        .ok()
        .flatten()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemState) -> T) -> Result<T, LeaseStoreError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| LeaseStoreError::Unavailable("in-memory store lock poisoned".into()))?;
        guard.purge_expired(Instant::now());
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn get_with_lease(&self, key: &str) -> Result<Option<StoredValue>, LeaseStoreError> {
        self.with_state(|s| {
            s.entries.get(key).map(|e| StoredValue {
                value: e.value.clone(),
                lease: e.lease,
            })
        })
    }

    async fn put_force_with_opts(
        &self,
        key: &str,
        value: Vec<u8>,
        opts: PutOptions,
    ) -> Result<(), LeaseStoreError> {
        self.with_state(|s| -> Result<(), LeaseStoreError> {
            let now = Instant::now();
            let lease = if opts.lease.is_none() {
                s.last_lease += 1;
                let id = LeaseId(s.last_lease);
                let ttl = Duration::from_secs(u64::from(opts.ttl.seconds()));
                s.leases.insert(
                    id,
                    LeaseSlot {
                        ttl,
                        deadline: now + ttl,
                        keys: BTreeSet::new(),
                    },
                );
                id
            } else {
                let slot = s
                    .leases
                    .get_mut(&opts.lease)
                    .ok_or(LeaseStoreError::LeaseNotFound(opts.lease))?;
                slot.deadline = now + slot.ttl;
                opts.lease
            };

            if let Some(previous) = s.entries.get(key).map(|e| e.lease) {
                if previous != lease {
                    s.detach(key, previous);
                }
            }
            if let Some(slot) = s.leases.get_mut(&lease) {
                slot.keys.insert(key.to_string());
            }
            s.entries.insert(key.to_string(), Entry { value, lease });
            Ok(())
        })?
    }

    async fn delete(&self, key: &str) -> Result<(), LeaseStoreError> {
        self.with_state(|s| {
            if let Some(entry) = s.entries.remove(key) {
                s.detach(key, entry.lease);
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseStoreConfig {
    pub op_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl LeaseStoreConfig {
    pub const OP_TIMEOUT_MS_MAX: u64 = 60_000;
    pub const MAX_RETRIES_MAX: u32 = 10;
    pub const RETRY_BACKOFF_MS_MAX: u64 = 10_000;

    pub fn mvp_v1() -> Self {
        Self {
            op_timeout: Duration::from_millis(5_000),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }

    pub fn v1(
        op_timeout_ms: u64,
        max_retries: u32,
        retry_backoff_ms: u64,
    ) -> Result<Self, ContractViolation> {
        let cfg = Self {
            op_timeout: Duration::from_millis(op_timeout_ms),
            max_retries,
            retry_backoff: Duration::from_millis(retry_backoff_ms),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

impl Validate for LeaseStoreConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        let op_timeout_ms = self.op_timeout.as_millis();
        if op_timeout_ms == 0 || op_timeout_ms > u128::from(Self::OP_TIMEOUT_MS_MAX) {
            return Err(ContractViolation::InvalidRange {
                field: "lease_store_config.op_timeout_ms",
                min: 1,
                max: Self::OP_TIMEOUT_MS_MAX as i64,
                got: i64::try_from(op_timeout_ms).unwrap_or(i64::MAX),
            });
        }
        if self.max_retries > Self::MAX_RETRIES_MAX {
            return Err(ContractViolation::InvalidRange {
                field: "lease_store_config.max_retries",
                min: 0,
                max: i64::from(Self::MAX_RETRIES_MAX),
                got: i64::from(self.max_retries),
            });
        }
        let backoff_ms = self.retry_backoff.as_millis();
        if backoff_ms > u128::from(Self::RETRY_BACKOFF_MS_MAX) {
            return Err(ContractViolation::InvalidRange {
                field: "lease_store_config.retry_backoff_ms",
                min: 0,
                max: Self::RETRY_BACKOFF_MS_MAX as i64,
                got: i64::try_from(backoff_ms).unwrap_or(i64::MAX),
            });
        }
        Ok(())
    }
}

/// Bounds every attempt with `op_timeout` and retries transient failures.
#[derive(Debug, Clone)]
pub struct LeaseStoreClient<S> {
    inner: S,
    config: LeaseStoreConfig,
}

impl<S: LeaseStore> LeaseStoreClient<S> {
    pub fn new(inner: S, config: LeaseStoreConfig) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self { inner, config })
    }

    async fn run<T, F, Fut>(
        &self,
        op: &'static str,
        key: &str,
        mut attempt_fn: F,
    ) -> Result<T, LeaseStoreError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, LeaseStoreError>> + Send,
        T: Send,
    {
        let timeout_ms = u64::try_from(self.config.op_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut attempt: u32 = 0;
        loop {
            let outcome = match tokio::time::timeout(self.config.op_timeout, attempt_fn()).await {
                Ok(result) => result,
                Err(_) => Err(LeaseStoreError::Timeout { timeout_ms }),
            };
            match outcome {
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(op, key, attempt, error = %err, "lease store call failed, retrying");
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<S: LeaseStore> LeaseStore for LeaseStoreClient<S> {
    async fn get_with_lease(&self, key: &str) -> Result<Option<StoredValue>, LeaseStoreError> {
        self.run("get", key, || self.inner.get_with_lease(key)).await
    }

    async fn put_force_with_opts(
        &self,
        key: &str,
        value: Vec<u8>,
        opts: PutOptions,
    ) -> Result<(), LeaseStoreError> {
        self.run("put", key, || {
            self.inner.put_force_with_opts(key, value.clone(), opts)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), LeaseStoreError> {
        self.run("delete", key, || self.inner.delete(key)).await
    }
}

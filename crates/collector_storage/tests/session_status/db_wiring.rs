#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use collector_kernel_contracts::session::{AuthTag, LeaseId, RpcMethod, SessionId, TtlSeconds};
use collector_storage::lease_store::{
    InMemoryLeaseStore, LeaseStore, LeaseStoreClient, LeaseStoreConfig, LeaseStoreError,
    PutOptions, StoredValue,
};
use collector_storage::repo::{SessionStatusRepo, SessionWrite};
use collector_storage::session_repo::{
    session_key, CorruptReason, LeaseStoreSessionRepo, SessionRepoError,
};

fn sid(id: &str) -> SessionId {
    SessionId::new(id).unwrap()
}

fn ttl(seconds: u32) -> TtlSeconds {
    TtlSeconds::new(seconds).unwrap()
}

/// Fails the first `failures` calls with `Unavailable`, then delegates.
struct FlakyStore {
    inner: InMemoryLeaseStore,
    failures: AtomicU32,
    attempts: Arc<AtomicU32>,
}

impl FlakyStore {
    fn new(inner: InMemoryLeaseStore, failures: u32, attempts: Arc<AtomicU32>) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
            attempts,
        }
    }

    fn fail_now(&self) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LeaseStore for FlakyStore {
    async fn get_with_lease(&self, key: &str) -> Result<Option<StoredValue>, LeaseStoreError> {
        if self.fail_now() {
            return Err(LeaseStoreError::Unavailable("connection reset".into()));
        }
        self.inner.get_with_lease(key).await
    }

    async fn put_force_with_opts(
        &self,
        key: &str,
        value: Vec<u8>,
        opts: PutOptions,
    ) -> Result<(), LeaseStoreError> {
        if self.fail_now() {
            return Err(LeaseStoreError::Unavailable("connection reset".into()));
        }
        self.inner.put_force_with_opts(key, value, opts).await
    }

    async fn delete(&self, key: &str) -> Result<(), LeaseStoreError> {
        if self.fail_now() {
            return Err(LeaseStoreError::Unavailable("connection reset".into()));
        }
        self.inner.delete(key).await
    }
}

/// Never answers.
struct HangingStore {
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl LeaseStore for HangingStore {
    async fn get_with_lease(&self, _key: &str) -> Result<Option<StoredValue>, LeaseStoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn put_force_with_opts(
        &self,
        _key: &str,
        _value: Vec<u8>,
        _opts: PutOptions,
    ) -> Result<(), LeaseStoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn delete(&self, _key: &str) -> Result<(), LeaseStoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

fn repo_over(
    store: InMemoryLeaseStore,
) -> LeaseStoreSessionRepo<LeaseStoreClient<InMemoryLeaseStore>> {
    LeaseStoreSessionRepo::new(LeaseStoreClient::new(store, LeaseStoreConfig::mvp_v1()).unwrap())
}

#[tokio::test]
async fn at_session_db_01_absent_record_reads_as_empty() {
    let repo = repo_over(InMemoryLeaseStore::new());
    let record = repo.read_session(&sid("s1")).await.unwrap();
    assert!(record.is_empty());
    assert!(record.lease.is_none());
}

#[tokio::test]
async fn at_session_db_02_update_then_read_round_trips_with_lease() {
    let store = InMemoryLeaseStore::new();
    let repo = repo_over(store.clone());
    repo.update_session(
        &sid("s1"),
        SessionWrite::v1(RpcMethod::Authenticate, AuthTag::MobileId, LeaseId::NONE, ttl(300)),
    )
    .await
    .unwrap();

    let first = repo.read_session(&sid("s1")).await.unwrap();
    assert_eq!(first.caller, Some(RpcMethod::Authenticate));
    assert_eq!(first.auth, AuthTag::MobileId);
    assert!(!first.lease.is_none());

    repo.update_session(
        &sid("s1"),
        SessionWrite::v1(RpcMethod::AuthenticateStatus, AuthTag::MobileId, first.lease, ttl(300)),
    )
    .await
    .unwrap();
    let second = repo.read_session(&sid("s1")).await.unwrap();
    assert_eq!(second.caller, Some(RpcMethod::AuthenticateStatus));
    assert_eq!(second.lease, first.lease);
    assert_eq!(store.live_lease_count(), 1);
}

#[tokio::test]
async fn at_session_db_03_delete_removes_record() {
    let store = InMemoryLeaseStore::new();
    let repo = repo_over(store.clone());
    repo.update_session(
        &sid("s1"),
        SessionWrite::v1(RpcMethod::VoterChoices, AuthTag::IdCard, LeaseId::NONE, ttl(900)),
    )
    .await
    .unwrap();
    repo.delete_session(&sid("s1")).await.unwrap();
    assert!(repo.read_session(&sid("s1")).await.unwrap().is_empty());
    assert_eq!(store.live_key_count(), 0);
    repo.delete_session(&sid("s1")).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn at_session_db_04_lease_expiry_drops_record() {
    let repo = repo_over(InMemoryLeaseStore::new());
    repo.update_session(
        &sid("s1"),
        SessionWrite::v1(RpcMethod::Challenge, AuthTag::WebEid, LeaseId::NONE, ttl(60)),
    )
    .await
    .unwrap();
    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(!repo.read_session(&sid("s1")).await.unwrap().is_empty());
    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(repo.read_session(&sid("s1")).await.unwrap().is_empty());
}

#[tokio::test]
async fn at_session_db_05_corrupt_value_is_storage_error() {
    let store = InMemoryLeaseStore::new();
    let key = session_key(&sid("s1"));
    store
        .put_force_with_opts(
            &key,
            STANDARD.encode("RPC.Vote").into_bytes(),
            PutOptions::v1(LeaseId::NONE, ttl(60)),
        )
        .await
        .unwrap();
    let repo = repo_over(store);
    match repo.read_session(&sid("s1")).await {
        Err(SessionRepoError::CorruptRecord { key: got, reason }) => {
            assert_eq!(got, key);
            assert_eq!(reason, CorruptReason::FieldCount(1));
        }
        other => panic!("expected corrupt record, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn at_session_db_06_transient_failures_are_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let flaky = FlakyStore::new(InMemoryLeaseStore::new(), 2, attempts.clone());
    let client = LeaseStoreClient::new(flaky, LeaseStoreConfig::v1(1_000, 3, 50).unwrap()).unwrap();
    let repo = LeaseStoreSessionRepo::new(client);

    repo.update_session(
        &sid("s1"),
        SessionWrite::v1(RpcMethod::Authenticate, AuthTag::SmartId, LeaseId::NONE, ttl(300)),
    )
    .await
    .unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(
        repo.read_session(&sid("s1")).await.unwrap().auth,
        AuthTag::SmartId
    );
}

#[tokio::test(start_paused = true)]
async fn at_session_db_07_retries_are_bounded() {
    let attempts = Arc::new(AtomicU32::new(0));
    let flaky = FlakyStore::new(InMemoryLeaseStore::new(), 10, attempts.clone());
    let client = LeaseStoreClient::new(flaky, LeaseStoreConfig::v1(1_000, 2, 50).unwrap()).unwrap();
    let repo = LeaseStoreSessionRepo::new(client);

    let err = repo.read_session(&sid("s1")).await.unwrap_err();
    assert!(matches!(
        err,
        SessionRepoError::Store {
            source: LeaseStoreError::Unavailable(_),
            ..
        }
    ));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn at_session_db_08_hanging_store_times_out_after_all_attempts() {
    let attempts = Arc::new(AtomicU32::new(0));
    let client = LeaseStoreClient::new(
        HangingStore {
            attempts: attempts.clone(),
        },
        LeaseStoreConfig::v1(250, 2, 10).unwrap(),
    )
    .unwrap();

    let err = client.delete("/session/s1").await.unwrap_err();
    assert_eq!(err, LeaseStoreError::Timeout { timeout_ms: 250 });
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn at_session_db_09_unknown_lease_is_not_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let flaky = FlakyStore::new(InMemoryLeaseStore::new(), 0, attempts.clone());
    let client = LeaseStoreClient::new(flaky, LeaseStoreConfig::mvp_v1()).unwrap();
    let repo = LeaseStoreSessionRepo::new(client);

    let err = repo
        .update_session(
            &sid("s1"),
            SessionWrite::v1(RpcMethod::Token, AuthTag::WebEid, LeaseId(77), ttl(300)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionRepoError::Store {
            source: LeaseStoreError::LeaseNotFound(LeaseId(77)),
            ..
        }
    ));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

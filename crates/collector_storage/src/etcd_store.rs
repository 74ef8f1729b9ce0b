#![forbid(unsafe_code)]

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use collector_kernel_contracts::session::LeaseId;
use etcd_client::{
    Certificate, Client, ConnectOptions, Error as EtcdError, Identity,
    PutOptions as EtcdPutOptions, TlsOptions,
};
use tracing::{debug, info};

use crate::lease_store::{LeaseStore, LeaseStoreError, PutOptions, StoredValue};

/// PEM material for a mutually authenticated etcd connection.
#[derive(Clone)]
pub struct EtcdTlsPem {
    pub ca: Vec<u8>,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl fmt::Debug for EtcdTlsPem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtcdTlsPem")
            .field("ca_len", &self.ca.len())
            .field("cert_len", &self.cert.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Lease store backed by an etcd cluster. Session keys are attached to
/// etcd leases so expiry is enforced by the cluster itself.
#[derive(Clone)]
pub struct EtcdLeaseStore {
    client: Client,
}

impl fmt::Debug for EtcdLeaseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtcdLeaseStore").finish_non_exhaustive()
    }
}

impl EtcdLeaseStore {
    pub async fn connect(
        endpoints: &[String],
        connect_timeout: Duration,
        tls: Option<EtcdTlsPem>,
    ) -> Result<Self, LeaseStoreError> {
        let mut options = ConnectOptions::new().with_connect_timeout(connect_timeout);
        if let Some(pem) = &tls {
            options = options.with_tls(
                TlsOptions::new()
                    .ca_certificate(Certificate::from_pem(pem.ca.clone()))
                    .identity(Identity::from_pem(pem.cert.clone(), pem.key.clone())),
            );
        }
        let client = Client::connect(endpoints, Some(options))
            .await
            .map_err(store_error)?;
        info!(endpoints = ?endpoints, tls = tls.is_some(), "connected to etcd");
        Ok(Self { client })
    }

    /// Pushes the lease deadline out by its granted TTL.
    async fn refresh(&self, lease: LeaseId) -> Result<(), LeaseStoreError> {
        self.client
            .lease_client()
            .keep_alive(lease.0)
            .await
            .map(|_| debug!(lease = %lease, "lease refreshed"))
            .map_err(|err| lease_error(lease, err))
    }
}

fn store_error(err: EtcdError) -> LeaseStoreError {
    LeaseStoreError::Unavailable(err.to_string())
}

fn lease_error(lease: LeaseId, err: EtcdError) -> LeaseStoreError {
    if err.to_string().contains("lease not found") {
        LeaseStoreError::LeaseNotFound(lease)
    } else {
        store_error(err)
    }
}

#[async_trait]
impl LeaseStore for EtcdLeaseStore {
    async fn get_with_lease(&self, key: &str) -> Result<Option<StoredValue>, LeaseStoreError> {
        let resp = self
            .client
            .kv_client()
            .get(key, None)
            .await
            .map_err(store_error)?;
        Ok(resp.kvs().first().map(|kv| StoredValue {
            value: kv.value().to_vec(),
            lease: LeaseId(kv.lease()),
        }))
    }

    async fn put_force_with_opts(
        &self,
        key: &str,
        value: Vec<u8>,
        opts: PutOptions,
    ) -> Result<(), LeaseStoreError> {
        let lease = if opts.lease.is_none() {
            let granted = self
                .client
                .lease_client()
                .grant(i64::from(opts.ttl.seconds()), None)
                .await
                .map_err(store_error)?;
            LeaseId(granted.id())
        } else {
            self.refresh(opts.lease).await?;
            opts.lease
        };
        self.client
            .kv_client()
            .put(key, value, Some(EtcdPutOptions::new().with_lease(lease.0)))
            .await
            .map_err(|err| lease_error(lease, err))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), LeaseStoreError> {
        self.client
            .kv_client()
            .delete(key, None)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

#![forbid(unsafe_code)]

use std::env;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use collector_engines::workflow::{SessionTtlConfig, VoteCompletion};
use collector_kernel_contracts::session::TTL_SECONDS_MAX;
use collector_kernel_contracts::ContractViolation;
use collector_os::sessionstatus::ServiceWindow;
use collector_storage::etcd_store::{EtcdLeaseStore, EtcdTlsPem};
use collector_storage::lease_store::{
    InMemoryLeaseStore, LeaseStore, LeaseStoreConfig, LeaseStoreError,
};
use serde::Deserialize;
use thiserror::Error;
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig, Uri};
use tracing::warn;

pub const CONFIG_PATH_ENV: &str = "COLLECTOR_CONFIG_PATH";
pub const DEFAULT_BIND: &str = "127.0.0.1:50061";
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:50061";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_ETCD_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const TIMEOUT_MS_MAX: u64 = 60_000;

const BIND: &str = "COLLECTOR_SESSIONSTATUS_BIND";
const TLS_CERT: &str = "COLLECTOR_SESSIONSTATUS_TLS_CERT";
const TLS_KEY: &str = "COLLECTOR_SESSIONSTATUS_TLS_KEY";
const TLS_CLIENT_CA: &str = "COLLECTOR_SESSIONSTATUS_TLS_CLIENT_CA";
const INSECURE_PLAINTEXT: &str = "COLLECTOR_SESSIONSTATUS_INSECURE_PLAINTEXT";
const STORE_BACKEND: &str = "COLLECTOR_STORE_BACKEND";
const ETCD_ENDPOINTS: &str = "COLLECTOR_ETCD_ENDPOINTS";
const ETCD_CONNECT_TIMEOUT_MS: &str = "COLLECTOR_ETCD_CONNECT_TIMEOUT_MS";
const ETCD_CA: &str = "COLLECTOR_ETCD_CA";
const ETCD_CERT: &str = "COLLECTOR_ETCD_CERT";
const ETCD_KEY: &str = "COLLECTOR_ETCD_KEY";
const STORE_OP_TIMEOUT_MS: &str = "COLLECTOR_STORE_OP_TIMEOUT_MS";
const STORE_MAX_RETRIES: &str = "COLLECTOR_STORE_MAX_RETRIES";
const STORE_RETRY_BACKOFF_MS: &str = "COLLECTOR_STORE_RETRY_BACKOFF_MS";
const AUTH_TTL: &str = "COLLECTOR_SESSION_AUTH_TTL";
const CHOICE_TTL: &str = "COLLECTOR_SESSION_CHOICE_TTL";
const VOTE_TTL: &str = "COLLECTOR_SESSION_VOTE_TTL";
const VERIFY_TTL: &str = "COLLECTOR_SESSION_VERIFY_TTL";
const NOT_BEFORE: &str = "COLLECTOR_SESSIONSTATUS_NOT_BEFORE";
const NOT_AFTER: &str = "COLLECTOR_SESSIONSTATUS_NOT_AFTER";
const ENDPOINT: &str = "COLLECTOR_SESSIONSTATUS_ENDPOINT";
const SERVER_NAME: &str = "COLLECTOR_SESSIONSTATUS_SERVER_NAME";
const CLIENT_CA: &str = "COLLECTOR_SESSIONSTATUS_CA";
const CLIENT_CERT: &str = "COLLECTOR_SESSIONSTATUS_CLIENT_CERT";
const CLIENT_KEY: &str = "COLLECTOR_SESSIONSTATUS_CLIENT_KEY";
const REQUEST_TIMEOUT_MS: &str = "COLLECTOR_SESSIONSTATUS_REQUEST_TIMEOUT_MS";
const CONNECT_TIMEOUT_MS: &str = "COLLECTOR_SESSIONSTATUS_CONNECT_TIMEOUT_MS";
const VOTE_COMPLETION: &str = "COLLECTOR_VOTE_COMPLETION";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: {reason}")]
    InvalidVar { key: &'static str, reason: String },
    #[error("{0} must all be set or all be unset")]
    PartialTls(&'static str),
    #[error("mutual TLS is required: set {0}, or set COLLECTOR_SESSIONSTATUS_INSECURE_PLAINTEXT=1 for a loopback-only plaintext listener")]
    TlsRequired(&'static str),
    #[error("invalid configuration: {0}")]
    Contract(#[from] ContractViolation),
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid session status endpoint: {0}")]
    Endpoint(#[from] tonic::transport::Error),
    #[error("cannot open lease store: {0}")]
    Store(#[from] LeaseStoreError),
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidVar {
        key,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileTls {
    pub cert: Option<String>,
    pub key: Option<String>,
    pub client_ca: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileStore {
    pub backend: Option<String>,
    pub etcd_endpoints: Option<Vec<String>>,
    pub etcd_connect_timeout_ms: Option<u64>,
    pub etcd_ca: Option<String>,
    pub etcd_cert: Option<String>,
    pub etcd_key: Option<String>,
    pub op_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileSessionTtl {
    pub auth: Option<u32>,
    pub choice: Option<u32>,
    pub vote: Option<u32>,
    pub verify: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileWindow {
    pub not_before: Option<u64>,
    pub not_after: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileClient {
    pub endpoint: Option<String>,
    pub server_name: Option<String>,
    pub ca: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub vote_completion: Option<String>,
}

/// JSON config file layer. Every field is optional; environment variables
/// override whatever is set here.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub insecure_plaintext: Option<bool>,
    pub tls: FileTls,
    pub store: FileStore,
    pub session_ttl: FileSessionTtl,
    pub service_window: FileWindow,
    pub client: FileClient,
}

impl FileConfig {
    pub fn from_json_str(path: &Path, text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(path, &text)
    }

    /// File value for an environment key, rendered as the env text would be.
    pub fn lookup(&self, key: &str) -> Option<String> {
        fn num<T: ToString>(v: Option<T>) -> Option<String> {
            v.map(|v| v.to_string())
        }
        match key {
            BIND => self.bind.clone(),
            TLS_CERT => self.tls.cert.clone(),
            TLS_KEY => self.tls.key.clone(),
            TLS_CLIENT_CA => self.tls.client_ca.clone(),
            INSECURE_PLAINTEXT => num(self.insecure_plaintext),
            STORE_BACKEND => self.store.backend.clone(),
            ETCD_ENDPOINTS => self.store.etcd_endpoints.as_ref().map(|eps| eps.join(",")),
            ETCD_CONNECT_TIMEOUT_MS => num(self.store.etcd_connect_timeout_ms),
            ETCD_CA => self.store.etcd_ca.clone(),
            ETCD_CERT => self.store.etcd_cert.clone(),
            ETCD_KEY => self.store.etcd_key.clone(),
            STORE_OP_TIMEOUT_MS => num(self.store.op_timeout_ms),
            STORE_MAX_RETRIES => num(self.store.max_retries),
            STORE_RETRY_BACKOFF_MS => num(self.store.retry_backoff_ms),
            AUTH_TTL => num(self.session_ttl.auth),
            CHOICE_TTL => num(self.session_ttl.choice),
            VOTE_TTL => num(self.session_ttl.vote),
            VERIFY_TTL => num(self.session_ttl.verify),
            NOT_BEFORE => num(self.service_window.not_before),
            NOT_AFTER => num(self.service_window.not_after),
            ENDPOINT => self.client.endpoint.clone(),
            SERVER_NAME => self.client.server_name.clone(),
            CLIENT_CA => self.client.ca.clone(),
            CLIENT_CERT => self.client.cert.clone(),
            CLIENT_KEY => self.client.key.clone(),
            REQUEST_TIMEOUT_MS => num(self.client.request_timeout_ms),
            CONNECT_TIMEOUT_MS => num(self.client.connect_timeout_ms),
            VOTE_COMPLETION => self.client.vote_completion.clone(),
            _ => None,
        }
    }
}

/// Process environment over the optional config file.
fn layered_process_getter() -> Result<impl FnMut(&str) -> Option<String>, ConfigError> {
    let file = match env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => FileConfig::load(Path::new(path.trim()))?,
        _ => FileConfig::default(),
    };
    Ok(move |key: &str| env::var(key).ok().or_else(|| file.lookup(key)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub client_ca: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTlsPaths {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdTlsPaths {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdSettings {
    pub endpoints: Vec<String>,
    pub connect_timeout: Duration,
    pub tls: Option<EtcdTlsPaths>,
}

/// Where session records live. etcd is the default; the in-memory store is
/// an explicit opt-in for single-process development.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Etcd(EtcdSettings),
    InMemory,
}

impl StoreBackend {
    pub fn name(&self) -> &'static str {
        match self {
            StoreBackend::Etcd(_) => "etcd",
            StoreBackend::InMemory => "memory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerTransport {
    MutualTls(ServerTlsPaths),
    /// Only reachable through the insecure opt-in with a loopback bind.
    InsecurePlaintextLoopback,
}

impl ServerTransport {
    pub fn is_tls(&self) -> bool {
        matches!(self, ServerTransport::MutualTls(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientTransport {
    MutualTls(ClientTlsPaths),
    InsecurePlaintextLoopback,
}

impl ClientTransport {
    pub fn is_tls(&self) -> bool {
        matches!(self, ClientTransport::MutualTls(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatusServerConfig {
    pub bind: SocketAddr,
    pub transport: ServerTransport,
    pub backend: StoreBackend,
    pub store: LeaseStoreConfig,
    pub window: ServiceWindow,
}

impl SessionStatusServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        build_server_config_from_env_var_map(layered_process_getter()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatusClientConfig {
    pub endpoint: String,
    pub server_name: Option<String>,
    pub transport: ClientTransport,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub ttl: SessionTtlConfig,
    pub vote_completion: VoteCompletion,
}

impl SessionStatusClientConfig {
    /// Loopback plaintext profile for in-process wiring. `from_env` never
    /// yields plaintext without the explicit insecure opt-in.
    pub fn mvp_v1() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            server_name: None,
            transport: ClientTransport::InsecurePlaintextLoopback,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            ttl: SessionTtlConfig::mvp_v1(),
            vote_completion: VoteCompletion::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        build_client_config_from_env_var_map(layered_process_getter()?)
    }
}

pub fn build_server_config_from_env_var_map<F>(
    mut env_getter: F,
) -> Result<SessionStatusServerConfig, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let bind_text = non_empty(env_getter(BIND)).unwrap_or_else(|| DEFAULT_BIND.to_string());
    let bind = bind_text
        .trim()
        .parse::<SocketAddr>()
        .map_err(|_| invalid(BIND, format!("'{bind_text}' is not a socket address")))?;

    let tls = match (
        non_empty(env_getter(TLS_CERT)),
        non_empty(env_getter(TLS_KEY)),
        non_empty(env_getter(TLS_CLIENT_CA)),
    ) {
        (None, None, None) => None,
        (Some(cert), Some(key), Some(client_ca)) => Some(ServerTlsPaths {
            cert: cert.into(),
            key: key.into(),
            client_ca: client_ca.into(),
        }),
        _ => return Err(ConfigError::PartialTls("COLLECTOR_SESSIONSTATUS_TLS_*")),
    };
    let plaintext = parse_flag(INSECURE_PLAINTEXT, env_getter(INSECURE_PLAINTEXT))?;
    let transport = match (tls, plaintext) {
        (Some(paths), false) => ServerTransport::MutualTls(paths),
        (Some(_), true) => {
            return Err(invalid(
                INSECURE_PLAINTEXT,
                "cannot be combined with COLLECTOR_SESSIONSTATUS_TLS_*",
            ))
        }
        (None, true) if bind.ip().is_loopback() => ServerTransport::InsecurePlaintextLoopback,
        (None, true) => {
            return Err(invalid(
                BIND,
                format!("{bind} is not a loopback address; plaintext is loopback only"),
            ))
        }
        (None, false) => {
            return Err(ConfigError::TlsRequired(
                "COLLECTOR_SESSIONSTATUS_TLS_CERT, _TLS_KEY and _TLS_CLIENT_CA",
            ))
        }
    };

    let backend = match non_empty(env_getter(STORE_BACKEND))
        .map(|v| v.trim().to_ascii_lowercase())
        .as_deref()
    {
        None | Some("etcd") => StoreBackend::Etcd(etcd_settings(&mut env_getter)?),
        Some("memory") => StoreBackend::InMemory,
        Some(other) => {
            return Err(invalid(
                STORE_BACKEND,
                format!("'{other}' is not 'etcd' or 'memory'"),
            ))
        }
    };

    let defaults = LeaseStoreConfig::mvp_v1();
    let op_timeout_ms = match env_getter(STORE_OP_TIMEOUT_MS) {
        Some(v) => parse_in_range(STORE_OP_TIMEOUT_MS, &v, 1, LeaseStoreConfig::OP_TIMEOUT_MS_MAX)?,
        None => duration_ms(defaults.op_timeout),
    };
    let max_retries = match env_getter(STORE_MAX_RETRIES) {
        Some(v) => parse_in_range(
            STORE_MAX_RETRIES,
            &v,
            0,
            u64::from(LeaseStoreConfig::MAX_RETRIES_MAX),
        )? as u32,
        None => defaults.max_retries,
    };
    let retry_backoff_ms = match env_getter(STORE_RETRY_BACKOFF_MS) {
        Some(v) => parse_in_range(
            STORE_RETRY_BACKOFF_MS,
            &v,
            0,
            LeaseStoreConfig::RETRY_BACKOFF_MS_MAX,
        )?,
        None => duration_ms(defaults.retry_backoff),
    };
    let store = LeaseStoreConfig::v1(op_timeout_ms, max_retries, retry_backoff_ms)?;

    let not_before = env_getter(NOT_BEFORE)
        .map(|v| parse_in_range(NOT_BEFORE, &v, 0, u64::MAX))
        .transpose()?;
    let not_after = env_getter(NOT_AFTER)
        .map(|v| parse_in_range(NOT_AFTER, &v, 0, u64::MAX))
        .transpose()?;
    let window = ServiceWindow::v1(not_before, not_after)?;

    Ok(SessionStatusServerConfig {
        bind,
        transport,
        backend,
        store,
        window,
    })
}

fn etcd_settings<F>(env_getter: &mut F) -> Result<EtcdSettings, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let endpoints: Vec<String> = non_empty(env_getter(ETCD_ENDPOINTS))
        .map(|v| {
            v.split(',')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if endpoints.is_empty() {
        return Err(invalid(
            ETCD_ENDPOINTS,
            "required with the etcd store backend (or set COLLECTOR_STORE_BACKEND=memory)",
        ));
    }
    let connect_timeout_ms = match env_getter(ETCD_CONNECT_TIMEOUT_MS) {
        Some(v) => parse_in_range(ETCD_CONNECT_TIMEOUT_MS, &v, 1, TIMEOUT_MS_MAX)?,
        None => DEFAULT_ETCD_CONNECT_TIMEOUT_MS,
    };
    let tls = match (
        non_empty(env_getter(ETCD_CA)),
        non_empty(env_getter(ETCD_CERT)),
        non_empty(env_getter(ETCD_KEY)),
    ) {
        (None, None, None) => None,
        (Some(ca), Some(cert), Some(key)) => Some(EtcdTlsPaths {
            ca: ca.into(),
            cert: cert.into(),
            key: key.into(),
        }),
        _ => return Err(ConfigError::PartialTls("COLLECTOR_ETCD_CA, _CERT and _KEY")),
    };
    Ok(EtcdSettings {
        endpoints,
        connect_timeout: Duration::from_millis(connect_timeout_ms),
        tls,
    })
}

pub fn build_client_config_from_env_var_map<F>(
    mut env_getter: F,
) -> Result<SessionStatusClientConfig, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut cfg = SessionStatusClientConfig::mvp_v1();

    if let Some(endpoint) = non_empty(env_getter(ENDPOINT)) {
        let endpoint = endpoint.trim().to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(invalid(ENDPOINT, "must start with http:// or https://"));
        }
        cfg.endpoint = endpoint;
    }
    cfg.server_name = non_empty(env_getter(SERVER_NAME)).map(|v| v.trim().to_string());

    let tls = match (
        non_empty(env_getter(CLIENT_CA)),
        non_empty(env_getter(CLIENT_CERT)),
        non_empty(env_getter(CLIENT_KEY)),
    ) {
        (None, None, None) => None,
        (Some(ca), Some(cert), Some(key)) => Some(ClientTlsPaths {
            ca: ca.into(),
            cert: cert.into(),
            key: key.into(),
        }),
        _ => {
            return Err(ConfigError::PartialTls(
                "COLLECTOR_SESSIONSTATUS_CA, _CLIENT_CERT and _CLIENT_KEY",
            ))
        }
    };
    let plaintext = parse_flag(INSECURE_PLAINTEXT, env_getter(INSECURE_PLAINTEXT))?;
    cfg.transport = match (tls, plaintext) {
        (Some(paths), false) if cfg.endpoint.starts_with("https://") => {
            ClientTransport::MutualTls(paths)
        }
        (Some(_), false) => return Err(invalid(ENDPOINT, "must use https:// with TLS")),
        (Some(_), true) => {
            return Err(invalid(
                INSECURE_PLAINTEXT,
                "cannot be combined with client TLS paths",
            ))
        }
        (None, true) if endpoint_is_loopback(&cfg.endpoint) => {
            ClientTransport::InsecurePlaintextLoopback
        }
        (None, true) => {
            return Err(invalid(
                ENDPOINT,
                format!("{} is not a loopback endpoint; plaintext is loopback only", cfg.endpoint),
            ))
        }
        (None, false) => {
            return Err(ConfigError::TlsRequired(
                "COLLECTOR_SESSIONSTATUS_CA, _CLIENT_CERT and _CLIENT_KEY",
            ))
        }
    };

    if let Some(v) = env_getter(REQUEST_TIMEOUT_MS) {
        cfg.request_timeout =
            Duration::from_millis(parse_in_range(REQUEST_TIMEOUT_MS, &v, 1, TIMEOUT_MS_MAX)?);
    }
    if let Some(v) = env_getter(CONNECT_TIMEOUT_MS) {
        cfg.connect_timeout =
            Duration::from_millis(parse_in_range(CONNECT_TIMEOUT_MS, &v, 1, TIMEOUT_MS_MAX)?);
    }

    let mut ttl_secs = |key: &'static str, default: u32| -> Result<u32, ConfigError> {
        match env_getter(key) {
            Some(v) => Ok(parse_in_range(key, &v, 1, u64::from(TTL_SECONDS_MAX))? as u32),
            None => Ok(default),
        }
    };
    let auth = ttl_secs(AUTH_TTL, SessionTtlConfig::DEFAULT_AUTH.seconds())?;
    let choice = ttl_secs(CHOICE_TTL, SessionTtlConfig::DEFAULT_CHOICE.seconds())?;
    let vote = ttl_secs(VOTE_TTL, SessionTtlConfig::DEFAULT_VOTE.seconds())?;
    let verify = ttl_secs(VERIFY_TTL, SessionTtlConfig::DEFAULT_VERIFY.seconds())?;
    cfg.ttl = SessionTtlConfig::v1(auth, choice, vote, verify)?;

    if let Some(v) = env_getter(VOTE_COMPLETION) {
        cfg.vote_completion = VoteCompletion::parse(&v.to_ascii_lowercase())
            .ok_or_else(|| invalid(VOTE_COMPLETION, "must be 'delete' or 'handoff'"))?;
    }
    Ok(cfg)
}

fn endpoint_is_loopback(endpoint: &str) -> bool {
    let Ok(uri) = endpoint.parse::<Uri>() else {
        return false;
    };
    let Some(host) = uri.host() else {
        return false;
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

fn parse_flag(key: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" => Ok(false),
        "1" | "true" | "yes" => Ok(true),
        _ => Err(invalid(key, format!("'{value}' is not a boolean flag"))),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn parse_in_range(key: &'static str, value: &str, min: u64, max: u64) -> Result<u64, ConfigError> {
    let parsed = value
        .trim()
        .parse::<u64>()
        .map_err(|_| invalid(key, format!("'{value}' is not an unsigned integer")))?;
    if parsed < min || parsed > max {
        return Err(invalid(key, format!("{parsed} is outside {min}..={max}")));
    }
    Ok(parsed)
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Mutual TLS: the server presents its identity and only accepts clients
/// whose certificate chains to `client_ca`.
pub fn load_server_tls(paths: &ServerTlsPaths) -> Result<ServerTlsConfig, ConfigError> {
    let identity = Identity::from_pem(read_pem(&paths.cert)?, read_pem(&paths.key)?);
    let client_ca = Certificate::from_pem(read_pem(&paths.client_ca)?);
    Ok(ServerTlsConfig::new()
        .identity(identity)
        .client_ca_root(client_ca))
}

pub fn load_client_tls(
    paths: &ClientTlsPaths,
    server_name: Option<&str>,
) -> Result<ClientTlsConfig, ConfigError> {
    let mut tls = ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(read_pem(&paths.ca)?))
        .identity(Identity::from_pem(read_pem(&paths.cert)?, read_pem(&paths.key)?));
    if let Some(name) = server_name {
        tls = tls.domain_name(name);
    }
    Ok(tls)
}

/// Opens the configured backend. The etcd path reads its PEM material
/// before dialing so a bad path fails without touching the network.
pub async fn open_lease_store(backend: &StoreBackend) -> Result<Arc<dyn LeaseStore>, ConfigError> {
    match backend {
        StoreBackend::InMemory => {
            warn!("in-memory lease store: sessions are not shared between replicas and are lost on restart");
            Ok(Arc::new(InMemoryLeaseStore::new()))
        }
        StoreBackend::Etcd(settings) => {
            let tls = match &settings.tls {
                Some(paths) => Some(EtcdTlsPem {
                    ca: read_pem(&paths.ca)?,
                    cert: read_pem(&paths.cert)?,
                    key: read_pem(&paths.key)?,
                }),
                None => None,
            };
            let store =
                EtcdLeaseStore::connect(&settings.endpoints, settings.connect_timeout, tls).await?;
            Ok(Arc::new(store))
        }
    }
}

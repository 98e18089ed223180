// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{HumanDuration, StoreMode, TriggerKind};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// max_concurrent_jobs = 4
/// engine = "ferry-engine"
///
/// [endpoint.inbox]
/// kind = "local"
/// root = "/srv/inbox"
///
/// [endpoint.nas]
/// kind = "smb"
/// host = "nas.local"
/// share = "media"
/// username = "svc"
/// password_env = "NAS_PASSWORD"
/// max_concurrent_transfers = 2
///
/// [[template]]
/// name = "ingest"
/// trigger = "file_created"
/// source = { endpoint = "inbox", path = "incoming", pattern = "*.mp4" }
/// destination = { endpoint = "nas", path = "raw/{stem}" }
/// chain = [{ endpoint = "archive", path = "cold/{date}" }]
/// ```
///
/// This is the *unvalidated* form; see [`ConfigFile`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Endpoints from `[endpoint.<name>]`, keyed by name.
    #[serde(default)]
    pub endpoint: BTreeMap<String, EndpointConfig>,

    /// Templates from `[[template]]`, in file order (which is also their
    /// creation order).
    #[serde(default)]
    pub template: Vec<TemplateConfig>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub endpoint: BTreeMap<String, EndpointConfig>,
    pub template: Vec<TemplateConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        endpoint: BTreeMap<String, EndpointConfig>,
        template: Vec<TemplateConfig>,
    ) -> Self {
        Self {
            config,
            endpoint,
            template,
        }
    }

    pub fn endpoints(&self) -> &BTreeMap<String, EndpointConfig> {
        &self.endpoint
    }

    pub fn templates(&self) -> &[TemplateConfig] {
        &self.template
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Global ceiling on concurrently running Jobs.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Directory for the state snapshot and detector cursors.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub store: StoreMode,

    /// Copy engine executable (looked up on `PATH` if not absolute).
    #[serde(default = "default_engine")]
    pub engine: String,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub detect: DetectSection,
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".ferryman")
}

fn default_engine() -> String {
    "ferry-engine".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            state_dir: default_state_dir(),
            store: StoreMode::default(),
            engine: default_engine(),
            retry: RetrySection::default(),
            detect: DetectSection::default(),
        }
    }
}

/// `[config.retry]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay: HumanDuration,

    #[serde(default = "default_max_delay")]
    pub max_delay: HumanDuration,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> HumanDuration {
    HumanDuration(Duration::from_secs(5))
}

fn default_max_delay() -> HumanDuration {
    HumanDuration(Duration::from_secs(300))
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

/// `[config.detect]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectSection {
    /// How often object-store listings are taken.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: HumanDuration,

    /// Quiet window before a filesystem change is considered settled.
    #[serde(default = "default_debounce")]
    pub debounce: HumanDuration,

    /// Consecutive detector failures before an endpoint is marked degraded.
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,

    /// Whether objects already present on the very first listing trigger.
    #[serde(default)]
    pub trigger_existing: bool,

    /// Use a blake3 content hash (instead of size + mtime) as the change
    /// marker for watched local files.
    #[serde(default)]
    pub hash_content: bool,
}

fn default_poll_interval() -> HumanDuration {
    HumanDuration(Duration::from_secs(30))
}

fn default_debounce() -> HumanDuration {
    HumanDuration(Duration::from_secs(2))
}

fn default_degraded_after() -> u32 {
    3
}

impl Default for DetectSection {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            debounce: default_debounce(),
            degraded_after: default_degraded_after(),
            trigger_existing: false,
            hash_content: false,
        }
    }
}

/// `[endpoint.<name>]` section: the connection settings of one endpoint plus
/// settings common to every kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    #[serde(flatten)]
    pub kind: EndpointKind,

    /// Ceiling on running Jobs whose destination is this endpoint.
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,

    /// Bandwidth hint passed through to the copy engine (e.g. `"10M"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_limit: Option<String>,
}

fn default_max_concurrent_transfers() -> usize {
    2
}

impl EndpointConfig {
    pub fn new(kind: EndpointKind) -> Self {
        Self {
            kind,
            max_concurrent_transfers: default_max_concurrent_transfers(),
            bandwidth_limit: None,
        }
    }

    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::new(EndpointKind::Local(LocalEndpoint { root: root.into() }))
    }
}

/// Closed set of endpoint kinds. Secrets are never written inline; each kind
/// names the environment variable holding them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EndpointKind {
    Local(LocalEndpoint),
    Smb(SmbEndpoint),
    S3(S3Endpoint),
    Sftp(SftpEndpoint),
    Ftp(FtpEndpoint),
    Webdav(WebdavEndpoint),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalEndpoint {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmbEndpoint {
    pub host: String,
    pub share: String,
    pub username: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub password_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Endpoint {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_key_env: Option<String>,
    /// Take credentials from the engine's own environment / instance role.
    #[serde(default)]
    pub env_auth: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SftpEndpoint {
    pub host: String,
    #[serde(default = "default_sftp_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

fn default_sftp_port() -> u16 {
    22
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FtpEndpoint {
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    #[serde(default = "default_ftp_user")]
    pub username: String,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub tls: bool,
}

fn default_ftp_port() -> u16 {
    21
}

fn default_ftp_user() -> String {
    "anonymous".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebdavEndpoint {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
}

/// `[[template]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    pub name: String,

    pub trigger: TriggerKind,

    /// Interval for `trigger = "scheduled"`, e.g. `"15m"`.
    #[serde(default)]
    pub schedule: Option<String>,

    pub source: SourceConfig,

    pub destination: HopConfig,

    /// Further hops executed after `destination`, in order.
    #[serde(default)]
    pub chain: Vec<HopConfig>,

    #[serde(default)]
    pub delete_source_after_transfer: bool,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub endpoint: String,

    /// Directory (relative to the endpoint root / bucket) to take files from.
    #[serde(default)]
    pub path: String,

    /// Glob matched against paths relative to `path`.
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

fn default_pattern() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HopConfig {
    pub endpoint: String,

    /// Destination directory template, e.g. `"raw/{stem}"`.
    #[serde(default)]
    pub path: String,
}

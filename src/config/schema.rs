use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Path the config was loaded from - not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub sessions: SessionsConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,
}

// ── Gateway ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Control API port (default: 3000)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Control API host (default: 0.0.0.0)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Serve the synthetic `/qr-quick` and `/quick-pairing-code` endpoints.
    /// Their payloads cannot link a real device; keep off outside test rigs.
    #[serde(default)]
    pub demo_endpoints: bool,
    /// Upper bound for a single control request. Must exceed the QR wait.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Max request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_host() -> String {
    "0.0.0.0".into()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            demo_endpoints: false,
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

// ── Credential store ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// When false, credentials only live in the local workspace.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base URL of the backup service; `/session/...` is appended.
    #[serde(default = "default_store_base_url")]
    pub base_url: String,
    /// Per-attempt timeout for backup/restore/list calls.
    #[serde(default = "default_store_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_attempts")]
    pub backup_attempts: u32,
    /// Backoff after failed backup attempt `n` is `n * backup_backoff_ms`.
    #[serde(default = "default_backup_backoff_ms")]
    pub backup_backoff_ms: u64,
    #[serde(default = "default_attempts")]
    pub restore_attempts: u32,
    /// Backoff after failed restore attempt `n` is `n * restore_backoff_ms`.
    #[serde(default = "default_restore_backoff_ms")]
    pub restore_backoff_ms: u64,
    /// Reconnect every session the store knows about at startup.
    #[serde(default = "default_true")]
    pub restore_on_start: bool,
    #[serde(default = "default_restore_start_delay_ms")]
    pub restore_start_delay_ms: u64,
    /// Spacing between consecutive startup reconnects.
    #[serde(default = "default_restore_stagger_ms")]
    pub restore_stagger_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_store_base_url() -> String {
    "http://localhost:5000/api".into()
}

fn default_store_timeout_ms() -> u64 {
    10_000
}

fn default_attempts() -> u32 {
    3
}

fn default_backup_backoff_ms() -> u64 {
    2_000
}

fn default_restore_backoff_ms() -> u64 {
    1_000
}

fn default_restore_start_delay_ms() -> u64 {
    5_000
}

fn default_restore_stagger_ms() -> u64 {
    2_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_store_base_url(),
            request_timeout_ms: default_store_timeout_ms(),
            backup_attempts: default_attempts(),
            backup_backoff_ms: default_backup_backoff_ms(),
            restore_attempts: default_attempts(),
            restore_backoff_ms: default_restore_backoff_ms(),
            restore_on_start: true,
            restore_start_delay_ms: default_restore_start_delay_ms(),
            restore_stagger_ms: default_restore_stagger_ms(),
        }
    }
}

// ── Session lifecycle ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Directory holding one credential workspace per session.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,
    /// Workspace directory name is `<prefix><session_id>`.
    #[serde(default = "default_workspace_prefix")]
    pub workspace_prefix: String,
    /// Country calling code prepended to national phone numbers.
    #[serde(default = "default_country_code")]
    pub country_code: String,

    #[serde(default = "default_backup_throttle_ms")]
    pub backup_throttle_ms: u64,
    #[serde(default = "default_post_connect_backup_ms")]
    pub post_connect_backup_ms: u64,
    #[serde(default = "default_periodic_backup_ms")]
    pub periodic_backup_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_conflict_reconnect_delay_ms")]
    pub conflict_reconnect_delay_ms: u64,
    #[serde(default = "default_manual_reconnect_delay_ms")]
    pub manual_reconnect_delay_ms: u64,
    #[serde(default = "default_replace_grace_ms")]
    pub replace_grace_ms: u64,

    #[serde(default = "default_pairing_request_delay_ms")]
    pub pairing_request_delay_ms: u64,
    #[serde(default = "default_pairing_timeout_ms")]
    pub pairing_timeout_ms: u64,
    #[serde(default = "default_pairing_cooldown_ms")]
    pub pairing_cooldown_ms: u64,
    #[serde(default = "default_pairing_settle_ms")]
    pub pairing_settle_ms: u64,
    /// Advertised validity of a pairing code, returned to callers.
    #[serde(default = "default_pairing_code_ttl_secs")]
    pub pairing_code_ttl_secs: u64,

    #[serde(default = "default_qr_poll_interval_ms")]
    pub qr_poll_interval_ms: u64,
    #[serde(default = "default_qr_wait_ms")]
    pub qr_wait_ms: u64,
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_workspace_prefix() -> String {
    "auth_info_".into()
}

fn default_country_code() -> String {
    "55".into()
}

fn default_backup_throttle_ms() -> u64 {
    30_000
}

fn default_post_connect_backup_ms() -> u64 {
    10_000
}

fn default_periodic_backup_ms() -> u64 {
    300_000
}

fn default_reconnect_delay_ms() -> u64 {
    10_000
}

fn default_conflict_reconnect_delay_ms() -> u64 {
    30_000
}

fn default_manual_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_replace_grace_ms() -> u64 {
    2_000
}

fn default_pairing_request_delay_ms() -> u64 {
    1_000
}

fn default_pairing_timeout_ms() -> u64 {
    25_000
}

fn default_pairing_cooldown_ms() -> u64 {
    30_000
}

fn default_pairing_settle_ms() -> u64 {
    3_000
}

fn default_pairing_code_ttl_secs() -> u64 {
    300
}

fn default_qr_poll_interval_ms() -> u64 {
    500
}

fn default_qr_wait_ms() -> u64 {
    20_000
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            workspace_prefix: default_workspace_prefix(),
            country_code: default_country_code(),
            backup_throttle_ms: default_backup_throttle_ms(),
            post_connect_backup_ms: default_post_connect_backup_ms(),
            periodic_backup_ms: default_periodic_backup_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            conflict_reconnect_delay_ms: default_conflict_reconnect_delay_ms(),
            manual_reconnect_delay_ms: default_manual_reconnect_delay_ms(),
            replace_grace_ms: default_replace_grace_ms(),
            pairing_request_delay_ms: default_pairing_request_delay_ms(),
            pairing_timeout_ms: default_pairing_timeout_ms(),
            pairing_cooldown_ms: default_pairing_cooldown_ms(),
            pairing_settle_ms: default_pairing_settle_ms(),
            pairing_code_ttl_secs: default_pairing_code_ttl_secs(),
            qr_poll_interval_ms: default_qr_poll_interval_ms(),
            qr_wait_ms: default_qr_wait_ms(),
        }
    }
}

impl SessionsConfig {
    pub fn backup_throttle(&self) -> Duration {
        Duration::from_millis(self.backup_throttle_ms)
    }

    pub fn post_connect_backup(&self) -> Duration {
        Duration::from_millis(self.post_connect_backup_ms)
    }

    pub fn periodic_backup(&self) -> Duration {
        // A zero period would make tokio::time::interval panic.
        Duration::from_millis(self.periodic_backup_ms.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn conflict_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.conflict_reconnect_delay_ms)
    }

    pub fn manual_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.manual_reconnect_delay_ms)
    }

    pub fn replace_grace(&self) -> Duration {
        Duration::from_millis(self.replace_grace_ms)
    }

    pub fn pairing_request_delay(&self) -> Duration {
        Duration::from_millis(self.pairing_request_delay_ms)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_millis(self.pairing_timeout_ms)
    }

    pub fn pairing_cooldown(&self) -> Duration {
        Duration::from_millis(self.pairing_cooldown_ms)
    }

    pub fn pairing_settle(&self) -> Duration {
        Duration::from_millis(self.pairing_settle_ms)
    }

    pub fn qr_poll_interval(&self) -> Duration {
        Duration::from_millis(self.qr_poll_interval_ms.max(1))
    }

    pub fn qr_wait(&self) -> Duration {
        Duration::from_millis(self.qr_wait_ms)
    }
}

// ── Protocol backend ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Backend driving connections (currently: "simulated").
    #[serde(default = "default_protocol_backend")]
    pub backend: String,
    /// Identity domain the simulated backend reports on connect.
    #[serde(default = "default_identity_domain")]
    pub identity_domain: String,
}

fn default_protocol_backend() -> String {
    "simulated".into()
}

fn default_identity_domain() -> String {
    "s.whatsapp.net".into()
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            backend: default_protocol_backend(),
            identity_domain: default_identity_domain(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl Config {
    /// Load config from a TOML file with env var overrides.
    /// A missing file is not an error: defaults apply.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str::<Config>(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Config::default()
        };
        config.config_path = path.to_path_buf();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using an arbitrary key lookup (the process environment
    /// in production, a map in tests).
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| keys.iter().find_map(|k| lookup(*k).filter(|v| !v.is_empty()));

        // Host: WA_SESSIOND_HOST or HOST
        if let Some(host) = first(&["WA_SESSIOND_HOST", "HOST"]) {
            self.gateway.host = host;
        }

        // Port: WA_SESSIOND_PORT or PORT
        if let Some(port_str) = first(&["WA_SESSIOND_PORT", "PORT"]) {
            match port_str.parse::<u16>() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!("Ignoring invalid port override: {port_str}"),
            }
        }

        // Credential store: WA_SESSIOND_STORE_URL
        if let Some(url) = first(&["WA_SESSIOND_STORE_URL"]) {
            self.store.base_url = url;
        }

        // Workspace directory: WA_SESSIOND_WORKSPACE
        if let Some(dir) = first(&["WA_SESSIOND_WORKSPACE"]) {
            self.sessions.workspace_dir = PathBuf::from(dir);
        }

        // Country code: WA_SESSIOND_COUNTRY_CODE
        if let Some(cc) = first(&["WA_SESSIOND_COUNTRY_CODE"]) {
            if cc.chars().all(|c| c.is_ascii_digit()) {
                self.sessions.country_code = cc;
            } else {
                tracing::warn!("Ignoring non-numeric country code override: {cc}");
            }
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

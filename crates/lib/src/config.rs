//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.switchboard/config.json`) and environment.
//! Relative paths in the file resolve against the directory holding it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::{DispatchSettings, DEFAULT_FALLBACK_REPLY, DEFAULT_TRAINING_KEYWORD};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP front door and RPC listener.
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Package manifest load paths.
    #[serde(default)]
    pub packages: PackagesConfig,

    /// Outbound channels (e.g. SMS).
    #[serde(default)]
    pub channels: ChannelsConfig,

    #[serde(default)]
    pub transcript: TranscriptConfig,
}

/// Gateway bind, ports, and RPC auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the HTTP front door (default 15151).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address for both listeners (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Port for the RPC listener. Defaults to `port + 1`; must be set when `port` is 65535.
    #[serde(default)]
    pub rpc_port: Option<u16>,

    /// Bearer token for RPC calls. Overridden by SWITCHBOARD_RPC_TOKEN env.
    #[serde(default)]
    pub rpc_token: Option<String>,
}

fn default_gateway_port() -> u16 {
    15151
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            rpc_port: None,
            rpc_token: None,
        }
    }
}

impl GatewayConfig {
    /// Configured RPC port, else `port + 1`. None when `port + 1` overflows.
    pub fn rpc_port(&self) -> Option<u16> {
        self.rpc_port.or_else(|| self.port.checked_add(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierConfig {
    /// Confidence below which input is left unclassified (default 0.5).
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Where training examples are kept (default `data/training.json`).
    #[serde(default)]
    pub training_file: Option<PathBuf>,
}

fn default_min_confidence() -> f64 {
    crate::classifier::DEFAULT_MIN_CONFIDENCE
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            training_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextConfig {
    /// Inactivity window after which a user's context is discarded (default 300).
    #[serde(default = "default_context_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_context_ttl_secs() -> u64 {
    crate::context::DEFAULT_CONTEXT_TTL.as_secs()
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_context_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Upper bound on one skill invocation (default 3000).
    #[serde(default = "default_skill_timeout_ms")]
    pub skill_timeout_ms: u64,

    /// Reply sent when no package could answer.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,

    /// Leading word of the training pseudo-command (default "train").
    #[serde(default = "default_training_keyword")]
    pub training_keyword: String,
}

fn default_skill_timeout_ms() -> u64 {
    3000
}

fn default_fallback_reply() -> String {
    DEFAULT_FALLBACK_REPLY.to_string()
}

fn default_training_keyword() -> String {
    DEFAULT_TRAINING_KEYWORD.to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            skill_timeout_ms: default_skill_timeout_ms(),
            fallback_reply: default_fallback_reply(),
            training_keyword: default_training_keyword(),
        }
    }
}

impl DispatchConfig {
    pub fn settings(&self) -> DispatchSettings {
        DispatchSettings {
            skill_timeout: Duration::from_millis(self.skill_timeout_ms),
            fallback_reply: self.fallback_reply.clone(),
            training_keyword: self.training_keyword.clone(),
        }
    }
}

/// Package manifest load config (dirs, disabled list).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagesConfig {
    /// Override the default package root (the config directory's `packages` subdirectory).
    /// Relative paths are resolved against the config file's parent.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Extra package directories; later entries override earlier ones by name.
    #[serde(default)]
    pub extra_dirs: Vec<PathBuf>,
    /// Package names to skip even when a manifest is found.
    #[serde(default)]
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub sms: SmsChannelConfig,
}

/// Twilio credentials. Each field is overridden by its TWILIO_* env var when set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsChannelConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    /// Sender number in E.164 form.
    pub from_number: Option<String>,
    /// Alternate API base (tests, proxies). Defaults to the public Twilio API.
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptConfig {
    /// JSONL turn log (default `data/turns.jsonl`).
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Resolved Twilio credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsCredentials {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub api_base: Option<String>,
}

fn env_or(var: &str, fallback: Option<&String>) -> Option<String> {
    std::env::var(var)
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            fallback
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve the RPC token: env SWITCHBOARD_RPC_TOKEN overrides config.
pub fn resolve_rpc_token(config: &Config) -> Option<String> {
    env_or("SWITCHBOARD_RPC_TOKEN", config.gateway.rpc_token.as_ref())
}

/// Resolve Twilio credentials (env overrides config). `None` unless sid, token and sender
/// number are all present.
pub fn resolve_sms_credentials(config: &Config) -> Option<SmsCredentials> {
    let sms = &config.channels.sms;
    Some(SmsCredentials {
        account_sid: env_or("TWILIO_ACCOUNT_SID", sms.account_sid.as_ref())?,
        auth_token: env_or("TWILIO_AUTH_TOKEN", sms.auth_token.as_ref())?,
        from_number: env_or("TWILIO_FROM_NUMBER", sms.from_number.as_ref())?,
        api_base: sms
            .api_base
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    })
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SWITCHBOARD_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".switchboard").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, SWITCHBOARD_CONFIG_PATH, or the default. Missing file =>
/// default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Directory holding the config file.
pub fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn resolve_against(config_path: &Path, p: Option<&PathBuf>, default: &str) -> PathBuf {
    match p {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                config_dir(config_path).join(d)
            }
        }
        _ => config_dir(config_path).join(default),
    }
}

/// Default package root when no override is set: `packages` next to the config file.
pub fn packages_dir(config_path: &Path) -> PathBuf {
    config_dir(config_path).join("packages")
}

/// Data directory (training set, transcript) next to the config file.
pub fn data_dir(config_path: &Path) -> PathBuf {
    config_dir(config_path).join("data")
}

/// Resolve the primary package root: `config.packages.directory` if set, otherwise the
/// default `packages` subdirectory.
pub fn resolve_packages_dir(config: &Config, config_path: &Path) -> PathBuf {
    resolve_against(config_path, config.packages.directory.as_ref(), "packages")
}

/// Extra package roots, relative entries resolved against the config directory.
pub fn resolve_extra_package_dirs(config: &Config, config_path: &Path) -> Vec<PathBuf> {
    config
        .packages
        .extra_dirs
        .iter()
        .map(|d| resolve_against(config_path, Some(d), "packages"))
        .collect()
}

pub fn resolve_training_file(config: &Config, config_path: &Path) -> PathBuf {
    resolve_against(
        config_path,
        config.classifier.training_file.as_ref(),
        "data/training.json",
    )
}

pub fn resolve_transcript_path(config: &Config, config_path: &Path) -> PathBuf {
    resolve_against(config_path, config.transcript.path.as_ref(), "data/turns.jsonl")
}

//! Configuration schema and normalization
//!
//! Two document layouts are accepted. The current one:
//!
//! ```json
//! {
//!   "mcpProxy": {"baseURL": "...", "addr": ":9090", "name": "...", "version": "...",
//!                "options": {"authTokens": ["t1"], "panicIfInvalid": false, "logEnabled": true}},
//!   "mcpServers": {
//!     "fs":     {"command": "npx", "args": ["-y", "server-fs"], "env": {}},
//!     "remote": {"url": "https://host/sse", "headers": {}, "timeoutMillis": 5000,
//!                "transportType": "sse"}
//!   }
//! }
//! ```
//!
//! and the deprecated one, with a `server` section carrying global tokens
//! and a `clients` map whose entries name their transport explicitly:
//!
//! ```json
//! {
//!   "server": {"baseURL": "...", "addr": ":9090", "name": "...", "version": "...",
//!              "globalAuthTokens": ["t1"]},
//!   "clients": {"fs": {"type": "stdio", "config": {"command": "npx", "args": []}}}
//! }
//! ```
//!
//! [`RawConfig::normalize`] folds the deprecated layout into the current one
//! and copies proxy-level defaults into every backend that left them unset.
//! [`Config::backends`] then resolves each entry into a [`BackendSpec`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProxyError, ProxyResult};
use crate::models::Implementation;
use crate::mount::validate_name;

// =============================================================================
// Current schema
// =============================================================================

/// Options shared by the proxy defaults and each backend. Unset fields on a
/// backend inherit the proxy-level value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panic_if_invalid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_tokens: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_filter: Option<ToolFilterConfig>,
}

impl Options {
    /// Fill every unset inheritable field from `defaults`
    pub fn inherit(&mut self, defaults: &Options) {
        if self.auth_tokens.is_none() {
            self.auth_tokens = defaults.auth_tokens.clone();
        }
        if self.panic_if_invalid.is_none() {
            self.panic_if_invalid = defaults.panic_if_invalid;
        }
        if self.log_enabled.is_none() {
            self.log_enabled = defaults.log_enabled;
        }
    }
}

/// Tool allow/block list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFilterConfig {
    /// `allow` or `block`, case-insensitive
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub list: Vec<String>,
}

/// Front door settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Public URL clients reach the proxy at, used in SSE endpoint events
    #[serde(rename = "baseURL", default)]
    pub base_url: String,
    #[serde(default, alias = "listenAddr")]
    pub addr: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Options>,
}

impl ProxyConfig {
    /// Socket address to bind. A bare `:port` binds all interfaces.
    pub fn listen_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }

    /// Identity the proxy presents to backends and clients
    pub fn implementation(&self) -> Implementation {
        Implementation::new(&self.name, &self.version)
    }
}

/// Which streaming protocol a URL-only backend speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteTransport {
    #[default]
    #[serde(rename = "sse")]
    Sse,
    #[serde(
        rename = "streamable-http",
        alias = "streamable",
        alias = "streamableHttp"
    )]
    StreamableHttp,
}

/// One entry of `mcpServers`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_millis: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_type: Option<RemoteTransport>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Options>,
}

/// Normalized document: current schema with defaults copied down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub mcp_proxy: ProxyConfig,
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, BackendConfig>,
}

// =============================================================================
// Deprecated schema
// =============================================================================

/// Deprecated `server` section
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyProxyConfig {
    #[serde(rename = "baseURL", default)]
    pub base_url: String,
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub global_auth_tokens: Vec<String>,
}

/// Deprecated `clients` entry
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyClientConfig {
    /// `stdio`, `sse` or `streamable`
    #[serde(rename = "type", default)]
    pub client_type: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub panic_if_invalid: bool,
    #[serde(default)]
    pub log_enabled: bool,
    #[serde(default)]
    pub auth_tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyStdioConfig {
    command: String,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LegacySseConfig {
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LegacyStreamableConfig {
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    /// Nanoseconds
    #[serde(default)]
    timeout: u64,
}

impl LegacyProxyConfig {
    fn migrate(&self) -> ProxyConfig {
        ProxyConfig {
            base_url: self.base_url.clone(),
            addr: self.addr.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            options: Some(Options {
                auth_tokens: Some(self.global_auth_tokens.clone()),
                ..Default::default()
            }),
        }
    }
}

impl LegacyClientConfig {
    /// Convert to a current-schema entry. Tokens are only carried over when
    /// the entry declared its own, so the global list is inherited otherwise.
    fn migrate(&self) -> Result<BackendConfig, String> {
        let options = Some(Options {
            panic_if_invalid: Some(self.panic_if_invalid),
            log_enabled: Some(self.log_enabled),
            auth_tokens: (!self.auth_tokens.is_empty()).then(|| self.auth_tokens.clone()),
            tool_filter: None,
        });

        let parse_error = |e: serde_json::Error| format!("invalid {} config: {}", self.client_type, e);

        match self.client_type.as_str() {
            "stdio" => {
                let config: LegacyStdioConfig =
                    serde_json::from_value(self.config.clone()).map_err(parse_error)?;
                Ok(BackendConfig {
                    command: Some(config.command),
                    args: config.args,
                    env: config.env,
                    options,
                    ..Default::default()
                })
            }
            "sse" => {
                let config: LegacySseConfig =
                    serde_json::from_value(self.config.clone()).map_err(parse_error)?;
                Ok(BackendConfig {
                    url: Some(config.url),
                    headers: config.headers,
                    transport_type: Some(RemoteTransport::Sse),
                    options,
                    ..Default::default()
                })
            }
            "streamable" => {
                let config: LegacyStreamableConfig =
                    serde_json::from_value(self.config.clone()).map_err(parse_error)?;
                Ok(BackendConfig {
                    url: Some(config.url),
                    headers: config.headers,
                    timeout_millis: Some(config.timeout / 1_000_000).filter(|t| *t > 0),
                    transport_type: Some(RemoteTransport::StreamableHttp),
                    options,
                    ..Default::default()
                })
            }
            other => Err(format!("invalid client type '{}'", other)),
        }
    }
}

/// Document as read from disk; either layout, or both
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfig {
    #[serde(rename = "server", default)]
    pub deprecated_server: Option<LegacyProxyConfig>,
    #[serde(rename = "clients", default)]
    pub deprecated_clients: BTreeMap<String, LegacyClientConfig>,
    #[serde(default)]
    pub mcp_proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, BackendConfig>,
}

impl RawConfig {
    /// Migrate the deprecated layout and copy proxy defaults into every
    /// backend. Explicit per-backend values are never overwritten.
    pub fn normalize(self) -> ProxyResult<Config> {
        let RawConfig {
            deprecated_server,
            deprecated_clients,
            mut mcp_proxy,
            mut mcp_servers,
        } = self;

        if mcp_proxy.is_none() {
            if let Some(legacy) = &deprecated_server {
                tracing::warn!("Deprecated: \"server\" section in config. Migrate to \"mcpProxy\".");
                mcp_proxy = Some(legacy.migrate());
            }
        }

        if !deprecated_clients.is_empty() && mcp_servers.is_empty() {
            tracing::warn!("Deprecated: \"clients\" section in config. Migrate to \"mcpServers\".");
            for (name, legacy) in &deprecated_clients {
                match legacy.migrate() {
                    Ok(backend) => {
                        mcp_servers.insert(name.clone(), backend);
                    }
                    Err(e) => {
                        tracing::warn!(backend = %name, error = %e, "Skipping deprecated client entry");
                    }
                }
            }
        }

        let mut mcp_proxy =
            mcp_proxy.ok_or_else(|| ProxyError::Config("mcpProxy is required".to_string()))?;

        let defaults = mcp_proxy
            .options
            .get_or_insert_with(|| Options {
                panic_if_invalid: Some(false),
                log_enabled: Some(false),
                ..Default::default()
            })
            .clone();

        for backend in mcp_servers.values_mut() {
            backend
                .options
                .get_or_insert_with(Options::default)
                .inherit(&defaults);
        }

        Ok(Config {
            mcp_proxy,
            mcp_servers,
        })
    }
}

// =============================================================================
// Resolved backend definitions
// =============================================================================

/// Process-spawned backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Network backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// `None` means the transport default
    pub timeout: Option<Duration>,
    pub transport: RemoteTransport,
}

/// How to reach one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSpec {
    Local(LocalSpec),
    Remote(RemoteSpec),
}

/// Effective options after inheritance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOptions {
    pub panic_if_invalid: bool,
    pub log_enabled: bool,
    pub auth_tokens: Vec<String>,
    pub tool_filter: Option<ToolFilterConfig>,
}

impl From<&Options> for BackendOptions {
    fn from(options: &Options) -> Self {
        Self {
            panic_if_invalid: options.panic_if_invalid.unwrap_or(false),
            log_enabled: options.log_enabled.unwrap_or(false),
            auth_tokens: options.auth_tokens.clone().unwrap_or_default(),
            tool_filter: options.tool_filter.clone(),
        }
    }
}

/// A named, resolved backend ready for the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDefinition {
    pub name: String,
    pub spec: BackendSpec,
    pub options: BackendOptions,
}

impl BackendConfig {
    /// Resolve into a tagged spec. Exactly one of `command` and `url` must be set.
    pub fn resolve(&self, name: &str) -> ProxyResult<BackendDefinition> {
        validate_name(name)?;

        let command = self.command.as_deref().filter(|c| !c.is_empty());
        let url = self.url.as_deref().filter(|u| !u.is_empty());

        let spec = match (command, url) {
            (Some(command), None) => BackendSpec::Local(LocalSpec {
                command: command.to_string(),
                args: self.args.clone(),
                env: self.env.clone(),
            }),
            (None, Some(url)) => BackendSpec::Remote(RemoteSpec {
                url: url.to_string(),
                headers: self.headers.clone(),
                timeout: self
                    .timeout_millis
                    .filter(|t| *t > 0)
                    .map(Duration::from_millis),
                transport: self.transport_type.unwrap_or_default(),
            }),
            (Some(_), Some(_)) => {
                return Err(ProxyError::Config(format!(
                    "backend '{}' sets both command and url",
                    name
                )))
            }
            (None, None) => {
                return Err(ProxyError::Config(format!(
                    "backend '{}' needs either command or url",
                    name
                )))
            }
        };

        let options = self
            .options
            .as_ref()
            .map(BackendOptions::from)
            .unwrap_or_default();

        Ok(BackendDefinition {
            name: name.to_string(),
            spec,
            options,
        })
    }
}

impl Config {
    /// Resolve every backend, in name order
    pub fn backends(&self) -> ProxyResult<Vec<BackendDefinition>> {
        self.mcp_servers
            .iter()
            .map(|(name, backend)| backend.resolve(name))
            .collect()
    }
}

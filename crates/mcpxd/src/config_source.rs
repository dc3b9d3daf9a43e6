//! Locating and reading the configuration document
//!
//! The document may live on disk or behind an http(s) URL. Its format is
//! picked from the extension of the path; anything unrecognized is read as
//! JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use mcpx_core::{Config, RawConfig};
use reqwest::Url;

/// Serialization format of the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    fn from_path(path: &str) -> Self {
        let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("yaml") | Some("yml") => Format::Yaml,
            Some("toml") => Format::Toml,
            _ => Format::Json,
        }
    }
}

/// Where the document comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Url(Url),
}

impl ConfigSource {
    /// `http://` and `https://` locations are fetched, everything else is a path
    pub fn parse(location: &str) -> Result<Self> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let url = Url::parse(location)
                .with_context(|| format!("invalid config URL '{}'", location))?;
            Ok(ConfigSource::Url(url))
        } else {
            Ok(ConfigSource::File(PathBuf::from(location)))
        }
    }

    pub fn format(&self) -> Format {
        match self {
            ConfigSource::File(path) => Format::from_path(&path.to_string_lossy()),
            ConfigSource::Url(url) => Format::from_path(url.path()),
        }
    }

    async fn read(&self, insecure: bool) -> Result<String> {
        match self {
            ConfigSource::File(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read config file {}", path.display())),
            ConfigSource::Url(url) => {
                let client = reqwest::Client::builder()
                    .danger_accept_invalid_certs(insecure)
                    .build()
                    .context("failed to build HTTP client")?;
                let response = client
                    .get(url.clone())
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .with_context(|| format!("failed to fetch config from {}", url))?;
                response
                    .text()
                    .await
                    .with_context(|| format!("failed to read config body from {}", url))
            }
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Url(url) => write!(f, "{}", url),
        }
    }
}

/// Decode a document without normalizing it
pub fn parse_document(content: &str, format: Format, origin: &str) -> Result<RawConfig> {
    let raw = match format {
        Format::Json => serde_json::from_str(content).map_err(anyhow::Error::from),
        Format::Yaml => serde_yaml::from_str(content).map_err(anyhow::Error::from),
        Format::Toml => toml::from_str(content).map_err(anyhow::Error::from),
    };
    raw.with_context(|| format!("failed to parse config from {}", origin))
}

/// Read, decode and normalize the configuration
pub async fn load(location: &str, insecure: bool) -> Result<Config> {
    let source = ConfigSource::parse(location)?;
    let content = source.read(insecure).await?;
    let raw = parse_document(&content, source.format(), &source.to_string())?;
    raw.normalize()
        .with_context(|| format!("invalid config in {}", source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpx_core::{BackendSpec, RemoteTransport};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_source_kinds() {
        assert_eq!(
            ConfigSource::parse("config.json").unwrap(),
            ConfigSource::File(PathBuf::from("config.json"))
        );
        let url = ConfigSource::parse("https://cfg.example/proxy.yml?rev=3").unwrap();
        assert!(matches!(url, ConfigSource::Url(_)));
        assert_eq!(url.format(), Format::Yaml);
        assert!(ConfigSource::parse("http://[broken").is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::from_path("a/b/config.JSON"), Format::Json);
        assert_eq!(Format::from_path("config.yaml"), Format::Yaml);
        assert_eq!(Format::from_path("config.toml"), Format::Toml);
        assert_eq!(Format::from_path("config"), Format::Json);
    }

    #[tokio::test]
    async fn test_load_json_file() {
        let file = write_config(
            ".json",
            r#"{
                "mcpProxy": {"baseURL": "http://localhost:9090", "addr": ":9090",
                             "name": "mcpx", "version": "1.0.0",
                             "options": {"authTokens": ["t1"], "logEnabled": true}},
                "mcpServers": {
                    "github": {"command": "npx", "args": ["-y", "server-github"]},
                    "remote": {"url": "https://host/mcp", "transportType": "streamable-http",
                               "timeoutMillis": 5000}
                }
            }"#,
        );

        let config = load(&file.path().to_string_lossy(), false).await.unwrap();
        assert_eq!(config.mcp_proxy.listen_addr(), "0.0.0.0:9090");

        let backends = config.backends().unwrap();
        assert_eq!(backends.len(), 2);
        let github = backends.iter().find(|b| b.name == "github").unwrap();
        assert_eq!(github.options.auth_tokens, vec!["t1".to_string()]);
        assert!(github.options.log_enabled);

        let remote = backends.iter().find(|b| b.name == "remote").unwrap();
        match &remote.spec {
            BackendSpec::Remote(spec) => {
                assert_eq!(spec.transport, RemoteTransport::StreamableHttp)
            }
            other => panic!("expected remote spec, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_yaml_file() {
        let file = write_config(
            ".yaml",
            "mcpProxy:\n  baseURL: http://localhost:9090\n  addr: 127.0.0.1:9090\n  name: mcpx\n  version: 1.0.0\nmcpServers:\n  fetch:\n    command: uvx\n    args: [mcp-server-fetch]\n",
        );

        let config = load(&file.path().to_string_lossy(), false).await.unwrap();
        assert_eq!(config.mcp_proxy.listen_addr(), "127.0.0.1:9090");
        assert_eq!(config.backends().unwrap()[0].name, "fetch");
    }

    #[tokio::test]
    async fn test_load_toml_file() {
        let file = write_config(
            ".toml",
            r#"
[mcpProxy]
baseURL = "http://localhost:9090"
addr = ":9090"
name = "mcpx"
version = "1.0.0"

[mcpServers.docs]
url = "https://docs.example/sse"
headers = { Authorization = "Bearer abc" }
"#,
        );

        let config = load(&file.path().to_string_lossy(), false).await.unwrap();
        let backends = config.backends().unwrap();
        match &backends[0].spec {
            BackendSpec::Remote(spec) => {
                assert_eq!(spec.transport, RemoteTransport::Sse);
                assert_eq!(spec.headers["Authorization"], "Bearer abc");
            }
            other => panic!("expected remote spec, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_errors_name_the_source() {
        let missing = load("/nonexistent/mcpx.json", false).await.unwrap_err();
        assert!(format!("{:#}", missing).contains("/nonexistent/mcpx.json"));

        let file = write_config(".json", "{ not json");
        let path = file.path().to_string_lossy().to_string();
        let broken = load(&path, false).await.unwrap_err();
        assert!(format!("{:#}", broken).contains(&path));
    }

    #[tokio::test]
    async fn test_missing_proxy_section_is_rejected() {
        let file = write_config(".json", r#"{"mcpServers": {}}"#);
        let err = load(&file.path().to_string_lossy(), false).await.unwrap_err();
        assert!(format!("{:#}", err).contains("mcpProxy"));
    }

    #[tokio::test]
    async fn test_load_from_url() {
        use axum::routing::get;

        let document = r#"{"mcpProxy": {"addr": ":9090", "name": "mcpx", "version": "1.0.0"}}"#;
        let app = axum::Router::new().route("/mcpx.json", get(move || async move { document }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let config = load(&format!("http://{}/mcpx.json", addr), false)
            .await
            .unwrap();
        assert_eq!(config.mcp_proxy.name, "mcpx");

        let err = load(&format!("http://{}/absent.json", addr), false)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("absent.json"));
    }
}

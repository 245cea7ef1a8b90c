//! Server and posting configuration
//!
//! Configuration is read from a TOML file with `[server]`, `[posting]` and
//! `[aliases]` tables:
//!
//! ```toml
//! [server]
//! host = "news.example.com"
//! port = 563
//! tls = true
//! username = "user"
//! password = "pass"
//! connections = 8
//! reconnect_delay_secs = 5
//!
//! [posting]
//! from = "Poster <poster@example.com>"
//! article_size = 768000
//! default_group = "alt.binaries.test"
//! generate_nzbs = true
//!
//! [aliases]
//! test = "alt.binaries.test"
//! ```

use crate::error::{PostError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default configuration file name, looked up in the home directory
pub const DEFAULT_CONFIG_FILE: &str = ".nntp-poster.toml";

/// Default bytes of file data per article
pub const DEFAULT_ARTICLE_SIZE: u64 = 768_000;

/// Default yEnc line length
pub const DEFAULT_LINE_LENGTH: usize = crate::yenc::DEFAULT_LINE_LENGTH;

/// NNTP server configuration
///
/// Contains all the information needed to open the posting connections.
///
/// # Example
///
/// ```
/// use nntp_poster::ServerConfig;
///
/// let config = ServerConfig::tls("news.example.com", "user", "pass");
/// assert_eq!(config.port, 563);
/// assert_eq!(config.connections, 1);
/// ```
#[must_use]
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server hostname (e.g., "news.example.com")
    #[serde(alias = "hostname")]
    pub host: String,

    /// Server port (typically 119 for plain, 563 for TLS)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Local address to bind outgoing sockets to
    #[serde(default)]
    pub bind_address: Option<String>,

    /// Username for authentication (empty to skip AUTHINFO)
    #[serde(default)]
    pub username: String,

    /// Password for authentication
    #[serde(default)]
    pub password: String,

    /// Use TLS/SSL encryption
    #[serde(default, alias = "use_ssl")]
    pub tls: bool,

    /// Allow insecure TLS connections (self-signed certificates, expired certificates)
    ///
    /// **Security Warning:** Setting this to `true` disables certificate validation,
    /// making your connection vulnerable to man-in-the-middle attacks.
    #[serde(default)]
    pub allow_insecure_tls: bool,

    /// Number of simultaneous connections
    #[serde(default = "default_connections")]
    pub connections: usize,

    /// Seconds to wait before reconnecting after a transport failure
    #[serde(default = "default_reconnect_delay", alias = "reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_port() -> u16 {
    119
}

fn default_connections() -> usize {
    1
}

fn default_reconnect_delay() -> u64 {
    5
}

impl ServerConfig {
    /// Create a new server configuration with a single connection
    ///
    /// # Arguments
    ///
    /// * `host` - Server hostname
    /// * `port` - Server port
    /// * `tls` - Whether to use TLS/SSL
    /// * `username` - Authentication username
    /// * `password` - Authentication password
    pub fn new(
        host: impl Into<String>,
        port: u16,
        tls: bool,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            bind_address: None,
            username: username.into(),
            password: password.into(),
            tls,
            allow_insecure_tls: false,
            connections: default_connections(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }

    /// Create a configuration for a TLS connection on the standard secure port (563)
    pub fn tls(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, 563, true, username, password)
    }

    /// Create a configuration for a plain connection on the standard port (119)
    ///
    /// **Warning:** Plain connections transmit credentials in clear text.
    pub fn plain(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, 119, false, username, password)
    }

    /// Set the number of pooled connections
    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = connections;
        self
    }

    /// Delay before a failed connection is retried
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Parsed local bind address (port 0), if configured
    pub fn bind_socket_addr(&self) -> Result<Option<SocketAddr>> {
        match self.bind_address.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(addr) => addr
                .parse::<IpAddr>()
                .map(|ip| Some(SocketAddr::new(ip, 0)))
                .map_err(|e| PostError::Config(format!("invalid bind address {addr:?}: {e}"))),
        }
    }
}

/// Article and subject settings for a posting run
#[derive(Debug, Clone, Deserialize)]
pub struct PostingConfig {
    /// Value of the `From` header and the NZB `poster` attribute
    pub from: String,

    /// Bytes of file data carried by each article
    #[serde(default = "default_article_size")]
    pub article_size: u64,

    /// yEnc line length
    #[serde(default = "default_line_length")]
    pub line_length: usize,

    /// Text prepended to every subject
    #[serde(default)]
    pub subject_prefix: String,

    /// File names never posted
    #[serde(default)]
    pub skip_filenames: Vec<String>,

    /// Write an NZB per posted directory
    #[serde(default, alias = "generate_nzb")]
    pub generate_nzbs: bool,

    /// Newsgroup(s) used when none is given on the command line
    #[serde(default)]
    pub default_group: String,

    /// Directory NZB files are written to
    #[serde(default = "default_nzb_dir")]
    pub nzb_dir: PathBuf,
}

fn default_article_size() -> u64 {
    DEFAULT_ARTICLE_SIZE
}

fn default_line_length() -> usize {
    DEFAULT_LINE_LENGTH
}

fn default_nzb_dir() -> PathBuf {
    PathBuf::from(".")
}

impl PostingConfig {
    /// Posting settings with defaults for everything but the poster
    pub fn new(from: impl Into<String>, default_group: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            article_size: DEFAULT_ARTICLE_SIZE,
            line_length: DEFAULT_LINE_LENGTH,
            subject_prefix: String::new(),
            skip_filenames: Vec::new(),
            generate_nzbs: false,
            default_group: default_group.into(),
            nzb_dir: default_nzb_dir(),
        }
    }
}

/// Complete configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// `[server]` table
    pub server: ServerConfig,
    /// `[posting]` table
    pub posting: PostingConfig,
    /// `[aliases]` table: short name -> newsgroup list
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| PostError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PostError::Config(format!(
                "config file \"{}\" is missing",
                path.display()
            )));
        }
        info!("Using config file: \"{}\"", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// `~/.nntp-poster.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_CONFIG_FILE))
    }

    /// Check values the engine relies on
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.host.trim().is_empty() {
            return Err(PostError::Config("server host is empty".into()));
        }
        if server.port == 0 {
            return Err(PostError::Config("server port must be non-zero".into()));
        }
        if server.connections == 0 {
            return Err(PostError::Config("at least one connection is required".into()));
        }
        server.bind_socket_addr()?;

        let posting = &self.posting;
        if posting.from.trim().is_empty() {
            return Err(PostError::Config("posting.from is empty".into()));
        }
        if posting.article_size == 0 {
            return Err(PostError::Config("posting.article_size must be non-zero".into()));
        }
        if posting.line_length == 0 || posting.line_length > crate::yenc::MAX_LINE_LENGTH {
            return Err(PostError::InvalidLineLength(posting.line_length));
        }
        Ok(())
    }

    /// Pick the target newsgroup(s) for a run
    ///
    /// A group without a `.` is treated as an alias. Whitespace is stripped
    /// from the resulting comma-separated list.
    pub fn resolve_newsgroup(&self, group: Option<&str>) -> Result<String> {
        let newsgroup = match group {
            Some(group) if !group.contains('.') => self
                .aliases
                .get(group)
                .cloned()
                .ok_or_else(|| PostError::UnknownAlias(group.to_string()))?,
            Some(group) => group.to_string(),
            None => self.posting.default_group.clone(),
        };

        let newsgroup: String = newsgroup.chars().filter(|c| !c.is_whitespace()).collect();
        if newsgroup.is_empty() {
            return Err(PostError::Config("no newsgroup given and no default_group set".into()));
        }
        Ok(newsgroup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[server]
hostname = "news.example.com"
port = 119
username = "user"
password = "pass"
connections = 4

[posting]
from = "poster@example.com"
article_size = 500000
default_group = "alt.binaries.test, alt.binaries.misc"
skip_filenames = ["Thumbs.db", "desktop.ini"]
generate_nzbs = true

[aliases]
abt = "alt.binaries.test"
"#;

    #[test]
    fn test_new() {
        let config = ServerConfig::new("news.example.com", 563, true, "user", "pass");
        assert_eq!(config.host, "news.example.com");
        assert_eq!(config.port, 563);
        assert!(config.tls);
        assert!(!config.allow_insecure_tls);
        assert_eq!(config.connections, 1);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_plain_helper() {
        let config = ServerConfig::plain("news.example.com", "user", "pass").with_connections(3);
        assert_eq!(config.port, 119);
        assert!(!config.tls);
        assert_eq!(config.connections, 3);
    }

    #[test]
    fn test_parse_sample() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.server.host, "news.example.com");
        assert_eq!(config.server.connections, 4);
        assert!(!config.server.tls);
        assert_eq!(config.posting.article_size, 500_000);
        assert_eq!(config.posting.line_length, DEFAULT_LINE_LENGTH);
        assert_eq!(config.posting.skip_filenames.len(), 2);
        assert!(config.posting.generate_nzbs);
    }

    #[test]
    fn test_resolve_default_group_strips_whitespace() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(
            config.resolve_newsgroup(None).unwrap(),
            "alt.binaries.test,alt.binaries.misc"
        );
    }

    #[test]
    fn test_resolve_alias() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.resolve_newsgroup(Some("abt")).unwrap(), "alt.binaries.test");
        assert_eq!(
            config.resolve_newsgroup(Some("alt.binaries.x")).unwrap(),
            "alt.binaries.x"
        );
        assert!(matches!(
            config.resolve_newsgroup(Some("nope")),
            Err(PostError::UnknownAlias(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_connections() {
        let text = SAMPLE.replace("connections = 4", "connections = 0");
        assert!(matches!(Config::from_toml(&text), Err(PostError::Config(_))));
    }

    #[test]
    fn test_bind_address() {
        let mut config = ServerConfig::plain("h", "", "");
        assert_eq!(config.bind_socket_addr().unwrap(), None);
        config.bind_address = Some("127.0.0.1".into());
        assert_eq!(
            config.bind_socket_addr().unwrap(),
            Some("127.0.0.1:0".parse().unwrap())
        );
        config.bind_address = Some("not-an-ip".into());
        assert!(config.bind_socket_addr().is_err());
    }
}

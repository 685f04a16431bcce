//! Runtime configuration.
//!
//! Defaults can be overridden by a YAML file named in `H1FRAME_CONFIG`, and
//! the listen address by `LISTEN`:
//!
//! ```yaml
//! server:
//!   listen_addr: "0.0.0.0:8080"
//!   backlog: 128
//!   reuse_address: true
//! parser:
//!   max_header_size: 16384
//! ```

use anyhow::Context;
use serde::Deserialize;

/// Default `listen(2)` backlog.
pub const DEFAULT_BACKLOG: u32 = 32;

/// Default limit on the start line plus header section, in bytes.
pub const DEFAULT_MAX_HEADER_SIZE: usize = 80 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub parser: ParserConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub backlog: u32,
    /// Set `SO_REUSEADDR` on the listening socket.
    pub reuse_address: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            backlog: DEFAULT_BACKLOG,
            reuse_address: true,
        }
    }
}

impl ServerConfig {
    /// Splits `listen_addr` into host and port. IPv6 hosts may be bracketed.
    pub fn host_port(&self) -> anyhow::Result<(String, u16)> {
        let (host, port) = self
            .listen_addr
            .rsplit_once(':')
            .with_context(|| format!("listen address {:?} has no port", self.listen_addr))?;
        let port = port
            .parse()
            .with_context(|| format!("invalid port in listen address {:?}", self.listen_addr))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok((host.to_string(), port))
    }
}

/// Limits applied by every tokenizer built from this configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub max_header_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
        }
    }
}

impl Config {
    /// Loads the configuration from the environment.
    ///
    /// Reads the YAML file named by `H1FRAME_CONFIG` when set, then applies a
    /// `LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("H1FRAME_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.server.listen_addr = listen_addr;
        }

        Ok(cfg)
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path))?;
        Self::from_yaml(&text).with_context(|| format!("invalid config file {}", path))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{LinkError, LinkResult};

/// Port the engine listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 20500;

/// Connection-level settings for a [`Link`](crate::Link).
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    /// Engine host name or address.
    pub host: String,
    /// Engine TCP port.
    pub port: u16,
    /// Ask the engine to run in safe mode, validating every request.
    pub safe_mode: bool,
    /// Let the engine redraw after every command. Sent inverted as `auto_update`.
    pub auto_render: bool,
    /// Read/write timeout for every exchange. Zero disables the timeout.
    pub timeout: Duration,
    /// Upper bound on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Read timeout applied while waiting for motion to complete.
    pub wait_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            safe_mode: true,
            auto_render: true,
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            wait_timeout: Duration::from_secs(300),
        }
    }
}

/// On-disk shape of a [`LinkConfig`]; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkConfigFile {
    host: Option<String>,
    port: Option<u16>,
    safe_mode: Option<bool>,
    auto_render: Option<bool>,
    timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    wait_timeout_ms: Option<u64>,
}

impl LinkConfig {
    /// Config for a specific endpoint with default behaviour flags.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Parse a JSON document. Missing keys keep their defaults; durations are
    /// given in milliseconds (`timeout_ms`, `connect_timeout_ms`,
    /// `wait_timeout_ms`).
    pub fn from_json_str(text: &str) -> LinkResult<Self> {
        let file: LinkConfigFile = serde_json::from_str(text)?;
        let mut config = Self::default();
        if let Some(host) = file.host {
            config.host = host;
        }
        if let Some(port) = file.port {
            config.port = port;
        }
        if let Some(flag) = file.safe_mode {
            config.safe_mode = flag;
        }
        if let Some(flag) = file.auto_render {
            config.auto_render = flag;
        }
        if let Some(ms) = file.timeout_ms {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.connect_timeout_ms {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.wait_timeout_ms {
            config.wait_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> LinkResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| LinkError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Point at an already resolved socket address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.host = addr.ip().to_string();
        self.port = addr.port();
        self
    }

    pub fn with_safe_mode(mut self, safe_mode: bool) -> Self {
        self.safe_mode = safe_mode;
        self
    }

    pub fn with_auto_render(mut self, auto_render: bool) -> Self {
        self.auto_render = auto_render;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// `host:port` as displayed in errors and logs.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolve the endpoint to the first matching socket address.
    pub fn socket_addr(&self) -> LinkResult<SocketAddr> {
        let connect_err = |source| LinkError::Connect {
            addr: self.endpoint(),
            source,
        };
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "host resolved to no addresses",
                ))
            })
    }
}

/// Process-level configuration for launching an engine binary.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the engine binary to spawn.
    pub binary_path: PathBuf,
    /// Additional CLI arguments passed through to the engine.
    pub extra_args: Vec<String>,
    /// Optional station description passed via `--station`.
    pub station_path: Option<PathBuf>,
    /// Extra environment variables applied to the child process.
    pub env: BTreeMap<String, String>,
    /// Optional working directory override for the child process.
    pub working_directory: Option<PathBuf>,
    /// Upper bound on how long to wait for the engine to announce its listen address.
    pub startup_timeout: Duration,
    /// Behaviour flags for links opened against the spawned engine. Host and
    /// port are replaced by the announced address.
    pub link: LinkConfig,
}

impl EngineConfig {
    /// Create a new config targeting a specific engine binary.
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            extra_args: Vec::new(),
            station_path: None,
            env: BTreeMap::new(),
            working_directory: None,
            startup_timeout: Duration::from_secs(5),
            link: LinkConfig::default(),
        }
    }

    /// Add a passthrough CLI argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Seed the engine from a station file.
    pub fn with_station_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.station_path = Some(path.into());
        self
    }

    /// Add an environment variable override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Override the working directory for the spawned process.
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Override the startup timeout used while waiting for the listen address.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Flags for links opened through [`EngineProcess::connect`](crate::EngineProcess::connect).
    pub fn with_link_config(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_local_engine() {
        let config = LinkConfig::default();
        assert_eq!(config.endpoint(), "127.0.0.1:20500");
        assert!(config.safe_mode);
        assert!(config.auto_render);
        assert_eq!(config.wait_timeout, Duration::from_secs(300));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = LinkConfig::from_json_str(r#"{ "port": 30000, "timeout_ms": 250 }"#).unwrap();
        assert_eq!(config.port, 30000);
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            LinkConfig::from_json_str(r#"{ "prot": 1 }"#),
            Err(LinkError::ConfigParse(_))
        ));
    }

    #[test]
    fn socket_addr_resolves_literal_ip() {
        let addr = LinkConfig::new("127.0.0.1", 4242).socket_addr().unwrap();
        assert_eq!(addr.port(), 4242);
        assert!(addr.ip().is_loopback());
    }
}

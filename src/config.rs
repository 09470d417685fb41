//! Server configuration loaded from YAML.
//!
//! The configuration is read once at startup, validated, and then shared
//! read-only by every connection through an `Rc<Config>`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::http::request::Method;

pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub timeouts: Timeouts,
    pub servers: Vec<ServerConfig>,
}

/// Idle limits, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    /// Waiting for a complete request.
    pub request_ms: u64,
    /// Waiting for a CGI child to finish.
    pub cgi_ms: u64,
    /// Waiting for the client to close after the response was sent.
    pub linger_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request_ms: 10_000,
            cgi_ms: 10_000,
            linger_ms: 1_000,
        }
    }
}

impl Timeouts {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn cgi(&self) -> Duration {
        Duration::from_millis(self.cgi_ms)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}

/// One virtual server.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: Vec<SocketAddr>,
    #[serde(default)]
    pub server_names: Vec<String>,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    #[serde(default)]
    pub error_pages: HashMap<u16, PathBuf>,
    #[serde(default)]
    pub locations: Vec<LocalRoute>,
    #[serde(default)]
    pub redirects: Vec<RedirectRoute>,
}

/// A route served from the filesystem.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalRoute {
    pub path: String,
    pub root: PathBuf,
    #[serde(default = "default_methods")]
    pub methods: Vec<Method>,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub autoindex: bool,
    #[serde(default)]
    pub upload: bool,
    #[serde(default)]
    pub upload_dir: Option<PathBuf>,
    /// File extension (without the dot) to interpreter.
    #[serde(default)]
    pub cgi: HashMap<String, PathBuf>,
}

/// A route answered with a temporary redirect.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedirectRoute {
    pub path: String,
    #[serde(default = "default_methods")]
    pub methods: Vec<Method>,
    pub location: String,
}

fn default_max_body_size() -> usize {
    DEFAULT_MAX_BODY_SIZE
}

fn default_methods() -> Vec<Method> {
    vec![Method::GET]
}

impl Config {
    /// Reads, parses and validates the YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(text).context("failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.servers.is_empty() {
            bail!("at least one server is required");
        }
        for (i, server) in self.servers.iter().enumerate() {
            server.validate().with_context(|| format!("server #{i}"))?;
        }
        Ok(())
    }

    /// Groups servers by bind address, keeping configuration order.
    ///
    /// The first server of each group is the default for that address.
    pub fn bind_groups(&self) -> Vec<(SocketAddr, Vec<usize>)> {
        let mut groups: Vec<(SocketAddr, Vec<usize>)> = Vec::new();
        for (index, server) in self.servers.iter().enumerate() {
            for addr in &server.listen {
                match groups.iter_mut().find(|(bound, _)| bound == addr) {
                    Some((_, members)) if !members.contains(&index) => members.push(index),
                    Some(_) => {}
                    None => groups.push((*addr, vec![index])),
                }
            }
        }
        groups
    }
}

impl ServerConfig {
    fn validate(&self) -> anyhow::Result<()> {
        if self.listen.is_empty() {
            bail!("no listen address");
        }
        if self.locations.is_empty() {
            bail!("no locations");
        }
        if self.max_body_size == 0 {
            bail!("max_body_size must be positive");
        }
        for status in self.error_pages.keys() {
            if !(400..=599).contains(status) {
                bail!("error page status {status} is not an error status");
            }
        }
        for route in &self.locations {
            validate_route_path(&route.path)?;
            if route.root.as_os_str().is_empty() {
                bail!("location {} has an empty root", route.path);
            }
            if route.methods.is_empty() {
                bail!("location {} allows no methods", route.path);
            }
        }
        for route in &self.redirects {
            validate_route_path(&route.path)?;
            if route.location.is_empty() {
                bail!("redirect {} has an empty location", route.path);
            }
        }
        Ok(())
    }

    /// True when `host` is one of this server's names, ignoring ASCII case.
    pub fn answers_to(&self, host: &str) -> bool {
        self.server_names.iter().any(|name| name.eq_ignore_ascii_case(host))
    }
}

fn validate_route_path(path: &str) -> anyhow::Result<()> {
    if !path.starts_with('/') {
        bail!("route path {path:?} must start with '/'");
    }
    Ok(())
}

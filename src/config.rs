use crate::sandbox::RootRegistry;
use anyhow::Context;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG: &str = "confine.toml";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub root: Root,
    pub server: Server,
    pub auth: Auth,
    pub limits: Limits,
    pub exec: Exec,
}

/// Unset means the working directory at startup.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Root {
    pub root_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Server {
    pub bind_addr: String,
    pub port: u16,
    pub base_path: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8080,
            base_path: "/mcp".to_string(),
        }
    }
}

/// No token means no bearer check; no origins means any origin.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Auth {
    pub bearer_token: Option<String>,
    pub allowed_origins: Vec<String>,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Limits {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "exec_timeout_s")]
    pub exec_timeout: Duration,
    pub max_stdout_kb: usize,
    pub max_request_kb: usize,
    pub rate_per_token_rps: u32,
    pub rate_per_token_burst: u32,
    pub rate_global_rps: u32,
    pub rate_global_burst: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            exec_timeout: Duration::from_secs(10),
            max_stdout_kb: 1024,
            max_request_kb: 1024,
            rate_per_token_rps: 20,
            rate_per_token_burst: 40,
            rate_global_rps: 50,
            rate_global_burst: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Exec {
    pub allowed_cmds: Vec<String>,
    pub pass_env: Vec<String>,
}

impl Default for Exec {
    fn default() -> Self {
        Self {
            allowed_cmds: ["tree", "cat", "ls", "pwd"].map(String::from).to_vec(),
            pass_env: vec!["PATH".to_string()],
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            Ok(serde_json::from_str(&raw)?)
        } else {
            Ok(toml::from_str(&raw)?)
        }
    }

    /// An explicit path must load; otherwise `confine.toml` is used when
    /// present and built-in defaults when not.
    pub fn discover(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::load(path).with_context(|| format!("reading {}", path.display())),
            None if Path::new(DEFAULT_CONFIG).is_file() => Self::load(Path::new(DEFAULT_CONFIG))
                .with_context(|| format!("reading {DEFAULT_CONFIG}")),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(dir) = &self.root.root_dir {
            if !dir.is_dir() {
                anyhow::bail!("root_dir does not exist or is not a directory: {}", dir.display());
            }
        }
        if let Some(token) = &self.auth.bearer_token {
            if token.trim().is_empty() { anyhow::bail!("bearer_token must not be empty when set"); }
        }
        if !self.server.base_path.starts_with('/') { anyhow::bail!("base_path must start with '/'"); }
        if self.limits.exec_timeout.is_zero() { anyhow::bail!("exec_timeout_s must be > 0"); }
        if self.limits.max_request_kb == 0 { anyhow::bail!("max_request_kb must be > 0"); }
        if self.limits.max_stdout_kb == 0 { anyhow::bail!("max_stdout_kb must be > 0"); }
        if self.limits.rate_per_token_rps == 0 || self.limits.rate_global_rps == 0 {
            anyhow::bail!("rate limits must be > 0");
        }
        Ok(())
    }

    /// Starts from the working directory, then applies `root_dir` if set.
    pub fn root_registry(&self) -> anyhow::Result<RootRegistry> {
        let root = RootRegistry::from_current_dir().context("resolving working directory as root")?;
        if let Some(dir) = &self.root.root_dir {
            root.set(dir)
                .with_context(|| format!("resolving root_dir {}", dir.display()))?;
        }
        Ok(root)
    }
}

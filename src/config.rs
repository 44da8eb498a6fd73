//! Configuration file.
//!
//! ```toml
//! connect = "127.0.0.1:5858"
//! context_id = 3
//! pause_on_exceptions = true
//!
//! [profiler]
//! active_poll_ms = 100
//! idle_poll_ms = 1000
//! log_file = "/tmp/v8.log"
//! ```

use crate::agent::{AgentConfig, ContextId};
use crate::muted_error;
use anyhow::Context;
use serde::Deserialize;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:5858";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilerConfig {
    pub active_poll_ms: u64,
    pub idle_poll_ms: u64,
    /// Log written by the VM profiler.
    pub log_file: Option<PathBuf>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            active_poll_ms: 100,
            idle_poll_ms: 1000,
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address of the VM debugger agent.
    pub connect: String,
    /// Inspected context, scripts from other contexts are ignored.
    pub context_id: Option<serde_json::Value>,
    pub pause_on_exceptions: bool,
    pub profiler: ProfilerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect: DEFAULT_ADDRESS.to_string(),
            context_id: None,
            pause_on_exceptions: true,
            profiler: ProfilerConfig::default(),
        }
    }
}

impl Config {
    const DEFAULT_PATH: &'static str = ".config/scriptdbg/config.toml";

    /// Load configuration from file. Without explicit path the file is looked up in
    /// the home directory and defaults are used if it is absent.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let data = match path {
            None => {
                let Some(home) = home::home_dir() else {
                    return Ok(Self::default());
                };
                match muted_error!(read_to_string(home.join(Self::DEFAULT_PATH))) {
                    Some(data) => data,
                    None => return Ok(Self::default()),
                }
            }
            Some(path) => read_to_string(path)
                .with_context(|| format!("read config file {}", path.display()))?,
        };
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> anyhow::Result<Self> {
        toml::de::from_str(data).context("malformed config file")
    }

    pub fn context_id(&self) -> Option<ContextId> {
        self.context_id.clone().map(ContextId::new)
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            pause_on_exceptions: self.pause_on_exceptions,
            active_poll_interval: Duration::from_millis(self.profiler.active_poll_ms),
            idle_poll_interval: Duration::from_millis(self.profiler.idle_poll_ms),
        }
    }
}

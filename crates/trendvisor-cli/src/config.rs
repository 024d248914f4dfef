use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use trendvisor_agents::{ToolConfig, DEFAULT_STOP_TIMEOUT};
use trendvisor_bus::{BusConfig, DEFAULT_CHANNEL_PREFIX};

/// Top-level `trendvisor.toml`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrendvisorConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub bus: BusSection,
    #[serde(default)]
    pub agents: AgentsSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusSection {
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentsSection {
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsSection {
    #[serde(default = "default_collection_tool")]
    pub collection: ToolConfig,
    #[serde(default = "default_analysis_tool")]
    pub analysis: ToolConfig,
}

impl Default for TrendvisorConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            bus: BusSection::default(),
            agents: AgentsSection::default(),
            tools: ToolsSection::default(),
        }
    }
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            channel_prefix: default_channel_prefix(),
            poll_interval_ms: default_poll_interval_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            collection: default_collection_tool(),
            analysis: default_analysis_tool(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_channel_prefix() -> String {
    DEFAULT_CHANNEL_PREFIX.to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_channel_capacity() -> usize {
    256
}
fn default_stop_timeout_ms() -> u64 {
    DEFAULT_STOP_TIMEOUT.as_millis() as u64
}
fn default_collection_tool() -> ToolConfig {
    ToolConfig {
        program: "python3".into(),
        args: vec!["trendvisor/tools/crawl_reviews.py".into()],
        timeout_secs: Some(600),
    }
}
fn default_analysis_tool() -> ToolConfig {
    ToolConfig {
        program: "python3".into(),
        args: vec!["trendvisor/tools/analyze_and_visualize.py".into()],
        timeout_secs: None,
    }
}

impl TrendvisorConfig {
    /// Reads and validates the config file. A missing file yields defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(raw) => toml::from_str(&raw).map_err(|e| {
                anyhow::anyhow!("Failed to parse config file '{}': {e}", path.display())
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file; using defaults");
                Self::default()
            }
            Err(e) => anyhow::bail!("Failed to read config file '{}': {e}", path.display()),
        };
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.bus.poll_interval_ms == 0 {
            anyhow::bail!("bus.poll_interval_ms must be greater than zero");
        }
        if self.bus.channel_capacity == 0 {
            anyhow::bail!("bus.channel_capacity must be greater than zero");
        }
        for (stage, tool) in [
            ("collection", &self.tools.collection),
            ("analysis", &self.tools.analysis),
        ] {
            if tool.program.trim().is_empty() {
                anyhow::bail!("tools.{stage}.program must not be empty");
            }
        }
        Ok(())
    }

    /// Directory of the file-backed task store.
    pub fn tasks_dir(&self) -> PathBuf {
        self.data_dir.join("tasks")
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            channel_prefix: self.bus.channel_prefix.clone(),
            poll_interval: Duration::from_millis(self.bus.poll_interval_ms),
            channel_capacity: self.bus.channel_capacity,
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.agents.stop_timeout_ms)
    }
}

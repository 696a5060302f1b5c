use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Executable used to read and write guest properties.
    pub control_tool: String,
    pub product_name_path: PathBuf,
    pub product_uuid_path: PathBuf,
    pub poll_interval_ms: u64,
    /// Upper bound on the network wait. Unset waits indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_timeout_secs: Option<u64>,
    /// Deepest chain of `list` encoded guest properties followed.
    pub max_list_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_tool: "VBoxControl".into(),
            product_name_path: "/sys/class/dmi/id/product_name".into(),
            product_uuid_path: "/sys/class/dmi/id/product_uuid".into(),
            poll_interval_ms: 1000,
            wait_timeout_secs: None,
            max_list_depth: 16,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::figment()
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("guestinfo.toml"))
            .merge(Json::file("guestinfo.json"))
            .merge(Env::prefixed("GUESTINFO_"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }
}

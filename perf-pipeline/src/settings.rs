//! Runtime settings.
//!
//! Values come from built-in defaults overlaid with `DASHBOARD_*`
//! environment variables, e.g. `DASHBOARD_ENGINE_URL` or
//! `DASHBOARD_QPS_HOSTS=10.0.0.1,10.0.0.2`.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::index_resolver::{Granularity, IndexResolver};

pub const ENV_PREFIX: &str = "DASHBOARD";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub listen_addr: String,
    pub engine_url: String,
    #[serde(default)]
    pub engine_user: Option<String>,
    pub request_timeout_secs: u64,
    pub qps_index_prefix: String,
    pub host_perf_index_prefix: String,
    pub index_granularity: Granularity,
    /// Zone the shard dates are named in; host-local when unset.
    #[serde(default)]
    pub index_utc_offset_secs: Option<i32>,
    pub metric_name: String,
    /// Host allow-list for the QPS overview; empty means all hosts.
    #[serde(default)]
    pub qps_hosts: Vec<String>,
    pub role_page_size: u64,
    pub role_span_max_days: i64,
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
}

impl Settings {
    /// Defaults overlaid with the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_env(Environment::with_prefix(ENV_PREFIX))
    }

    /// Built-in defaults only; the process environment is ignored.
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::from_env(Environment::with_prefix(ENV_PREFIX).source(Some(Default::default())))
    }

    pub fn from_env(env: Environment) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("listen_addr", "0.0.0.0:8080")?
            .set_default("engine_url", "http://localhost:9200")?
            .set_default("request_timeout_secs", 30)?
            .set_default("qps_index_prefix", "u2performance-")?
            .set_default("host_perf_index_prefix", "nt_zabbix_performance-")?
            .set_default("index_granularity", "day")?
            .set_default("metric_name", "每秒DNS查询数")?
            .set_default("role_page_size", 100)?
            .set_default("role_span_max_days", 30)?
            .add_source(
                env.try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("qps_hosts"),
            )
            .build()?
            .try_deserialize()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn index_resolver(&self) -> IndexResolver {
        IndexResolver::from_offset_secs(self.index_utc_offset_secs)
    }
}

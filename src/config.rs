//! Configuration layering (spec §6). A single `config.toml` carries one
//! table per role plus a `[common]` table shared by all three.

use serde::Deserialize;
use std::fs;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct MasterConfig {
    pub listen_addr: String,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PeerConfig {
    pub listen_addr: String,
    pub data_path: String,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub output_dir: String,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct CommonConfig {
    pub master_host: String,
    pub master_port: u16,
    pub chunk_size: u64,
    pub replication_factor: usize,
    pub heartbeat_interval: u64,
    pub failure_timeout: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_output")]
    pub log_output: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_output() -> String {
    "stdout".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    pub common: CommonConfig,
}

pub fn load_config(path: &str) -> anyhow::Result<Config> {
    let config_content = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&config_content)?;
    if config.common.failure_timeout < 2 * config.common.heartbeat_interval {
        tracing::warn!(
            failure_timeout = config.common.failure_timeout,
            heartbeat_interval = config.common.heartbeat_interval,
            "FAILURE_TIMEOUT should be at least 2-3x HEARTBEAT_INTERVAL"
        );
    }
    Ok(config)
}

/// Install a `tracing` subscriber per the config's `log_level`/`log_output`.
/// Returns the non-blocking writer guard when logging to a file; the
/// caller must keep it alive for the lifetime of the process.
pub fn init_tracing(common: &CommonConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(common.log_level.clone()));

    if common.log_output == "stdout" {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    } else {
        let file_appender = tracing_appender::rolling::never(".", &common.log_output);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .init();
        Some(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_minimal_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [master]
            listen_addr = "127.0.0.1:9000"
            [peer]
            listen_addr = "127.0.0.1:9001"
            data_path = "./data"
            [client]
            [common]
            master_host = "127.0.0.1"
            master_port = 9000
            chunk_size = 4
            replication_factor = 2
            heartbeat_interval = 2
            failure_timeout = 6
            "#
        )
        .unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.common.chunk_size, 4);
        assert_eq!(config.common.replication_factor, 2);
        assert_eq!(config.common.log_level, "info");
    }
}

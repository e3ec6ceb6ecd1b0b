//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration. File: ~/.config/bluepoint/config.toml or /etc/bluepoint/config.toml.
/// Env overrides: BLUEPOINT_RECORDS, BLUEPOINT_TICK_SECS, BLUEPOINT_DISCOVERY_PORT, BLUEPOINT_LOG.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Campaign record store (JSON).
    #[serde(default = "default_records_path")]
    pub records_path: PathBuf,
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
    /// Log file; stderr when unset.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// tracing filter directive, used when RUST_LOG is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Pause between dispatcher ticks (default 15).
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    /// Discovery UDP port (default 45680).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// How long each discovery round listens for beacons.
    #[serde(default = "default_inquiry_window_ms")]
    pub inquiry_window_ms: u64,
    /// Peers silent for longer than this are dropped.
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Upper bound on one whole push, connect to final answer.
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
    /// How long `stop` waits for the current tick to drain before giving up.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_records_path() -> PathBuf {
    PathBuf::from("/var/lib/bluepoint/campaigns.json")
}
fn default_pid_file() -> PathBuf {
    PathBuf::from("/tmp/bluepoint.pid")
}
fn default_log_filter() -> String {
    "bluepoint=info".to_string()
}
fn default_tick_secs() -> u64 {
    15
}
fn default_max_concurrent_sends() -> usize {
    16
}
fn default_discovery_port() -> u16 {
    45680
}
fn default_inquiry_window_ms() -> u64 {
    2000
}
fn default_peer_timeout_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_transfer_timeout_secs() -> u64 {
    120
}
fn default_stop_timeout_secs() -> u64 {
    600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            records_path: default_records_path(),
            pid_file: default_pid_file(),
            log_file: None,
            log_filter: default_log_filter(),
            tick_secs: default_tick_secs(),
            max_concurrent_sends: default_max_concurrent_sends(),
            discovery_port: default_discovery_port(),
            inquiry_window_ms: default_inquiry_window_ms(),
            peer_timeout_secs: default_peer_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl Config {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn inquiry_window(&self) -> Duration {
        Duration::from_millis(self.inquiry_window_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    /// Never shorter than one transfer plus one discovery round, the least a tick needs.
    pub fn stop_grace(&self) -> Duration {
        let floor = self.transfer_timeout() + self.inquiry_window() + Duration::from_secs(5);
        Duration::from_secs(self.stop_timeout_secs).max(floor)
    }
}

/// Load config: defaults, then the config file, then env vars.
/// An explicit `path` must exist and parse; the default locations are optional.
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match path {
        Some(p) => parse_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => parse_file(&p)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

fn parse_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
    toml::from_str(&s).map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("BLUEPOINT_RECORDS") {
        c.records_path = PathBuf::from(s);
    }
    if let Some(n) = var("BLUEPOINT_TICK_SECS").and_then(|s| s.parse().ok()) {
        c.tick_secs = n;
    }
    if let Some(p) = var("BLUEPOINT_DISCOVERY_PORT").and_then(|s| s.parse().ok()) {
        c.discovery_port = p;
    }
    if let Some(s) = var("BLUEPOINT_LOG") {
        c.log_filter = s;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/bluepoint/config.toml"));
    }
    out.push(PathBuf::from("/etc/bluepoint/config.toml"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_is_all_defaults() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c, Config::default());
        assert_eq!(c.tick_interval(), Duration::from_secs(15));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let c: Config = toml::from_str(
            r#"
            records_path = "/srv/bluepoint/index.json"
            tick_secs = 30
            log_file = "/var/log/bluepoint.log"
            "#,
        )
        .unwrap();
        assert_eq!(c.records_path, PathBuf::from("/srv/bluepoint/index.json"));
        assert_eq!(c.tick_secs, 30);
        assert_eq!(c.log_file, Some(PathBuf::from("/var/log/bluepoint.log")));
        assert_eq!(c.discovery_port, 45680);
    }

    #[test]
    fn unknown_key_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("BLUEPOINT_RECORDS", "/tmp/c.json"),
            ("BLUEPOINT_TICK_SECS", "5"),
            ("BLUEPOINT_DISCOVERY_PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.records_path, PathBuf::from("/tmp/c.json"));
        assert_eq!(c.tick_secs, 5);
        assert_eq!(c.discovery_port, 45680);
    }

    #[test]
    fn stop_grace_covers_at_least_one_transfer() {
        let c = Config::default();
        assert_eq!(c.stop_grace(), Duration::from_secs(600));

        let c: Config = toml::from_str("stop_timeout_secs = 1\ntransfer_timeout_secs = 60").unwrap();
        assert_eq!(c.stop_grace(), Duration::from_secs(60 + 2 + 5));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn explicit_path_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("config.toml");
        std::fs::write(&p, "max_concurrent_sends = 4\n").unwrap();
        assert_eq!(load(Some(&p)).unwrap().max_concurrent_sends, 4);
    }
}

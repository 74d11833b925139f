use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::console::HubSettings;
use crate::port::PortRange;

/// Environment variable that points at the config file.
pub const CONFIG_PATH_ENV: &str = "BLOCKHOST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/global.toml";

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GlobalConfig {
    pub listen_addr: SocketAddr,
    pub servers_path: PathBuf,
    pub runtimes_path: PathBuf,
    pub instances_file: PathBuf,
    /// Fixed JVM to use instead of discovery.
    pub java_path: Option<PathBuf>,
    pub ports: PortRange,
    pub console: ConsoleConfig,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub history_size: usize,
    pub subscriber_queue: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 23008)),
            servers_path: PathBuf::from("./servers"),
            runtimes_path: PathBuf::from("./runtimes"),
            instances_file: PathBuf::from("./instances.json"),
            java_path: None,
            ports: PortRange::default(),
            console: ConsoleConfig::default(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        let hub = HubSettings::default();
        Self {
            history_size: hub.history_size,
            subscriber_queue: hub.subscriber_queue,
        }
    }
}

impl From<ConsoleConfig> for HubSettings {
    fn from(c: ConsoleConfig) -> Self {
        HubSettings {
            history_size: c.history_size,
            subscriber_queue: c.subscriber_queue.max(1),
        }
    }
}

impl GlobalConfig {
    /// `BLOCKHOST_CONFIG`가 있으면 그 경로, 없으면 `config/global.toml`
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    /// A missing file yields defaults; a present but malformed one is an error.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let cfg = match std::fs::read_to_string(path) {
            Ok(s) => Self::parse(&s).with_context(|| format!("invalid config file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e).with_context(|| format!("cannot read config file {}", path.display())),
        };
        Ok(cfg)
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let cfg: Self = toml::from_str(s)?;
        cfg.ports.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = GlobalConfig::parse("").unwrap();
        assert_eq!(cfg, GlobalConfig::default());
        assert_eq!(cfg.listen_addr.port(), 23008);
        assert_eq!(cfg.ports, PortRange { start: 25565, end: 25665 });
        assert_eq!(cfg.console.history_size, 1000);
        assert_eq!(cfg.console.subscriber_queue, 256);
    }

    #[test]
    fn test_partial_override() {
        let cfg = GlobalConfig::parse(
            r#"
listen_addr = "0.0.0.0:9000"
servers_path = "/srv/minecraft"
java_path = "/opt/jdk-21"

[ports]
start = 30000
end = 30010

[console]
history_size = 0
"#,
        )
        .unwrap();

        assert_eq!(cfg.listen_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(cfg.servers_path, PathBuf::from("/srv/minecraft"));
        assert_eq!(cfg.java_path, Some(PathBuf::from("/opt/jdk-21")));
        assert_eq!(cfg.ports, PortRange { start: 30000, end: 30010 });
        assert_eq!(cfg.console.history_size, 0);
        assert_eq!(cfg.console.subscriber_queue, 256);
        assert_eq!(cfg.runtimes_path, PathBuf::from("./runtimes"));
    }

    #[test]
    fn test_invalid_range_rejected() {
        assert!(GlobalConfig::parse("[ports]\nstart = 26000\nend = 25000\n").is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = GlobalConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg, GlobalConfig::default());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.toml");
        std::fs::write(&path, "listen_addr = [").unwrap();
        assert!(GlobalConfig::load_from(&path).is_err());
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::driver::Overrides;
use crate::models::{ChannelDescriptor, ChannelKind, Mode, State, DEFAULT_NAMESPACE, DEFAULT_SAMPLING_RATE};

pub const CONFIG_ENV: &str = "SENSORSIM_KERNEL_CONFIG";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub machine: MachineConf,
    pub persistence: Option<PersistenceConf>,
    pub mqtt: Option<MqttConf>,
    pub channels: Vec<ChannelSeed>,
    pub autostart_polling: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConf {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MachineConf {
    pub state: State,
    pub mode: Mode,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PersistenceConf {
    pub path: PathBuf,
    #[serde(default)]
    pub restore_on_start: bool,
    #[serde(default)]
    pub save_on_shutdown: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

/// Canal à créer au démarrage, même forme que le corps de `POST /channels`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChannelSeed {
    pub kind: ChannelKind,
    pub identifier: u32,
    pub namespace: Option<String>,
    pub sampling_rate: Option<f64>,
    #[serde(default)]
    pub simulator_config: Overrides,
}

impl ChannelSeed {
    pub fn descriptor(&self) -> ChannelDescriptor {
        ChannelDescriptor::new(self.kind, self.identifier)
            .with_namespace(self.namespace.clone().unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()))
            .with_sampling_rate(self.sampling_rate.unwrap_or(DEFAULT_SAMPLING_RATE))
    }
}

fn default_client_id() -> String {
    "sensorsim-kernel".into()
}

fn default_topic_prefix() -> String {
    "sensorsim".into()
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { host: "0.0.0.0".into(), port: 8765 }
    }
}

impl Default for MachineConf {
    fn default() -> Self {
        Self { state: State::Normal, mode: Mode::Running }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            http: HttpConf::default(),
            machine: MachineConf::default(),
            persistence: None,
            mqtt: None,
            channels: Vec::new(),
            autostart_polling: true,
        }
    }
}

impl KernelConfig {
    /// Chemin de sauvegarde configuré, s'il existe
    pub fn persistence_path(&self) -> Option<&Path> {
        self.persistence.as_ref().map(|p| p.path.as_path())
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "kernel.yaml".into());
    load_config_from(&path).await
}

pub async fn load_config_from(path: impl AsRef<Path>) -> KernelConfig {
    let path = path.as_ref();
    if !path.exists() {
        warn!("No config at {}, using defaults", path.display());
        return KernelConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    match parse_config(&txt) {
        Ok(cfg) => {
            info!("Loaded config from {}", path.display());
            cfg
        }
        Err(e) => {
            warn!("Invalid config {}: {e}, using defaults", path.display());
            KernelConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let cfg = parse_config("   \n").unwrap();
        assert_eq!(cfg.http.port, 8765);
        assert_eq!(cfg.machine.mode, Mode::Running);
        assert!(cfg.autostart_polling);
        assert!(cfg.mqtt.is_none());
    }

    #[test]
    fn test_full_config() {
        let cfg = parse_config(
            r#"
http: { host: 127.0.0.1, port: 9000 }
machine: { state: broken, mode: idle }
persistence: { path: /tmp/machine.json, restore_on_start: true }
mqtt: { host: localhost, port: 1883 }
autostart_polling: false
channels:
  - kind: temperature
    identifier: 1
  - kind: pressure
    identifier: 2
    namespace: Line2
    sampling_rate: 2.0
    simulator_config: { st_dev: 0.1 }
"#,
        )
        .unwrap();
        assert_eq!(cfg.http.port, 9000);
        assert_eq!(cfg.machine.state, State::Broken);
        let persistence = cfg.persistence.as_ref().unwrap();
        assert!(persistence.restore_on_start);
        assert!(!persistence.save_on_shutdown);
        let mqtt = cfg.mqtt.as_ref().unwrap();
        assert_eq!(mqtt.topic_prefix, "sensorsim");

        let first = cfg.channels[0].descriptor();
        assert_eq!(first.namespace, DEFAULT_NAMESPACE);
        assert_eq!(first.sampling_rate, DEFAULT_SAMPLING_RATE);
        let second = cfg.channels[1].descriptor();
        assert_eq!(second.name(), "Pressure_sensor_002");
        assert_eq!(second.namespace, "Line2");
        assert_eq!(cfg.channels[1].simulator_config["st_dev"], 0.1);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(parse_config("channels: [{kind: humidity, identifier: 1}]").is_err());
    }

    #[tokio::test]
    async fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(dir.path().join("absent.yaml")).await;
        assert!(cfg.channels.is_empty());
    }
}

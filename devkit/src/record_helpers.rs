/*!
Construction de records de drivers à la main

Les fichiers de configuration sauvegardés sont des tableaux JSON de records
`{channel, current_value, random_seed, <paramètres>}`. Ce module permet de
fabriquer des records valides (partant des défauts d'une factory) puis de
les abîmer pour tester la restauration best-effort.
*/

use anyhow::{Context, Result};
use sensorsim_kernel::{ChannelDescriptor, ChannelKind, FactoryRegistry, Overrides};
use serde_json::{Map, Value};
use std::path::Path;

pub struct RecordBuilder {
    record: Map<String, Value>,
}

impl RecordBuilder {
    /// Record d'un driver par défaut du kind donné
    pub fn defaults(kind: ChannelKind, identifier: u32) -> Result<Self> {
        let registry = FactoryRegistry::with_defaults();
        let driver = registry.create(ChannelDescriptor::new(kind, identifier), &Overrides::new())?;
        match registry.encode(driver.as_ref())? {
            Value::Object(record) => Ok(Self { record }),
            other => anyhow::bail!("record is not an object: {other}"),
        }
    }

    pub fn temperature(identifier: u32) -> Result<Self> {
        Self::defaults(ChannelKind::Temperature, identifier)
    }

    pub fn pressure(identifier: u32) -> Result<Self> {
        Self::defaults(ChannelKind::Pressure, identifier)
    }

    /// Remplace (ou ajoute) un champ de premier niveau
    pub fn set(mut self, key: &str, value: Value) -> Self {
        self.record.insert(key.to_string(), value);
        self
    }

    /// Remplace un champ du sous-objet `channel`
    pub fn set_channel(mut self, key: &str, value: Value) -> Self {
        if let Some(Value::Object(channel)) = self.record.get_mut("channel") {
            channel.insert(key.to_string(), value);
        }
        self
    }

    pub fn without(mut self, key: &str) -> Self {
        self.record.remove(key);
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.record)
    }
}

/// Écrit un tableau de records comme le ferait `MachineModel::save`
pub fn write_records(path: impl AsRef<Path>, records: &[Value]) -> Result<()> {
    let path = path.as_ref();
    let content = serde_json::to_string_pretty(records)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

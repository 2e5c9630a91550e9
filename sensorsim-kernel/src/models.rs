use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::errors::SimError;

pub const DEFAULT_NAMESPACE: &str = "Sensors";
pub const DEFAULT_SAMPLING_RATE: f64 = 0.5;

/// Santé de la machine (axe global, recopié dans chaque driver)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Normal,
    Broken,
}

/// Phase de fonctionnement de la machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Idle,
    Running,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Normal => f.write_str("normal"),
            State::Broken => f.write_str("broken"),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Idle => f.write_str("idle"),
            Mode::Running => f.write_str("running"),
        }
    }
}

/// Type de capteur simulé. Ensemble fermé : chaque variante doit avoir une
/// factory enregistrée dans le `FactoryRegistry` pour être utilisable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Temperature,
    Pressure,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Temperature, ChannelKind::Pressure];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Temperature => "temperature",
            ChannelKind::Pressure => "pressure",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ChannelKind::Temperature => "Temperature",
            ChannelKind::Pressure => "Pressure",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // même orthographe que serde : minuscules strictes
        match s {
            "temperature" => Ok(ChannelKind::Temperature),
            "pressure" => Ok(ChannelKind::Pressure),
            _ => Err(SimError::UnsupportedKind(s.to_string())),
        }
    }
}

/// Identité d'un canal : (kind, identifier), unique dans le modèle machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    pub kind: ChannelKind,
    pub identifier: u32,
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.identifier)
    }
}

/// Description d'un canal physique. Immuable une fois créé.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub kind: ChannelKind,
    pub identifier: u32,
    pub namespace: String,
    /// Mises à jour par seconde
    pub sampling_rate: f64,
}

impl ChannelDescriptor {
    pub fn new(kind: ChannelKind, identifier: u32) -> Self {
        Self {
            kind,
            identifier,
            namespace: DEFAULT_NAMESPACE.to_string(),
            sampling_rate: DEFAULT_SAMPLING_RATE,
        }
    }

    pub fn temperature(identifier: u32) -> Self {
        Self::new(ChannelKind::Temperature, identifier)
    }

    pub fn pressure(identifier: u32) -> Self {
        Self::new(ChannelKind::Pressure, identifier)
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_sampling_rate(mut self, sampling_rate: f64) -> Self {
        self.sampling_rate = sampling_rate;
        self
    }

    pub fn id(&self) -> ChannelId {
        ChannelId { kind: self.kind, identifier: self.identifier }
    }

    /// Nom lisible, ex: "Temperature_sensor_001"
    pub fn name(&self) -> String {
        format!("{}_sensor_{:03}", self.kind.label(), self.identifier)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if !self.sampling_rate.is_finite() || self.sampling_rate <= 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "sampling_rate must be positive, got {}",
                self.sampling_rate
            )));
        }
        Ok(())
    }
}

/// Une mesure : horodatage + valeur
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: OffsetDateTime,
    pub value: f64,
}

/// Forme JSON d'une mesure (horodatage RFC3339 pour l'API et le bridge MQTT)
#[derive(Debug, Clone, Serialize)]
pub struct SampleView {
    pub timestamp: String,
    pub value: f64,
}

impl Sample {
    pub fn view(&self) -> SampleView {
        SampleView {
            timestamp: self.timestamp.format(&Rfc3339).unwrap_or_default(),
            value: self.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        assert_eq!(ChannelDescriptor::temperature(1).name(), "Temperature_sensor_001");
        assert_eq!(ChannelDescriptor::pressure(1234).name(), "Pressure_sensor_1234");
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("temperature".parse::<ChannelKind>().unwrap(), ChannelKind::Temperature);
        assert_eq!("pressure".parse::<ChannelKind>().unwrap(), ChannelKind::Pressure);
        assert!(matches!("Pressure".parse::<ChannelKind>(), Err(SimError::UnsupportedKind(_))));
        assert!(serde_json::from_str::<ChannelKind>("\"Pressure\"").is_err());
        assert!(matches!("humidity".parse::<ChannelKind>(), Err(SimError::UnsupportedKind(_))));
    }

    #[test]
    fn test_sampling_rate_validation() {
        assert!(ChannelDescriptor::temperature(1).validate().is_ok());
        assert!(ChannelDescriptor::temperature(1).with_sampling_rate(0.0).validate().is_err());
        assert!(ChannelDescriptor::temperature(1).with_sampling_rate(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_state_serde() {
        assert_eq!(serde_json::to_string(&State::Broken).unwrap(), "\"broken\"");
        let mode: Mode = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(mode, Mode::Running);
    }
}

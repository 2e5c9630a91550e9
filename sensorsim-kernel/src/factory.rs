/**
 * DRIVER FACTORIES - Registre kind -> (construction, encodeur, décodeur)
 *
 * RÔLE :
 * Point d'extension unique pour les types de capteurs. Le modèle machine ne
 * fait jamais de `match` sur le kind : il consulte ce registre pour créer un
 * driver par défaut, sérialiser un driver existant ou relire un record.
 *
 * EXEMPLE :
 * ```ignore
 * let mut registry = FactoryRegistry::new();
 * registry.register(TemperatureFactory);
 * let driver = registry.decode(&record_json)?;
 * ```
 */

use serde_json::Value;
use std::collections::HashMap;

use crate::driver::pressure::PressureFactory;
use crate::driver::temperature::TemperatureFactory;
use crate::driver::{DriverRecord, Overrides, SimulationDriver};
use crate::errors::{SimError, SimResult};
use crate::models::{ChannelDescriptor, ChannelKind};

/// Identifiant utilisé pour les configurations d'exemple
const EXAMPLE_IDENTIFIER: u32 = 1234;

/// Interface que chaque variante de driver expose au registre
pub trait DriverFactory: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Driver neuf pour `channel`, overrides appliqués sur les défauts
    fn create(&self, channel: ChannelDescriptor, overrides: &Overrides)
        -> SimResult<Box<dyn SimulationDriver>>;

    /// Reconstruit un driver équivalent depuis sa forme sérialisée.
    /// Le nouveau driver démarre à `current_value`, sans abonné branché.
    fn from_record(&self, record: &Value) -> SimResult<Box<dyn SimulationDriver>>;

    fn encode(&self, driver: &dyn SimulationDriver) -> SimResult<Value> {
        driver.to_record()?.to_value()
    }

    /// Record d'un driver par défaut, utile pour documenter le format
    fn example_record(&self) -> SimResult<Value> {
        let channel = ChannelDescriptor::new(self.kind(), EXAMPLE_IDENTIFIER);
        let driver = self.create(channel, &Overrides::new())?;
        self.encode(driver.as_ref())
    }
}

/// Registre central des factories, résolu une fois au démarrage
pub struct FactoryRegistry {
    factories: HashMap<ChannelKind, Box<dyn DriverFactory>>,
}

impl FactoryRegistry {
    /// Registre vide
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    /// Registre avec toutes les variantes livrées (température, pression)
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TemperatureFactory);
        registry.register(PressureFactory);
        registry
    }

    /// Enregistre (ou remplace) la factory de son kind
    pub fn register<T: DriverFactory + 'static>(&mut self, factory: T) {
        self.factories.insert(factory.kind(), Box::new(factory));
    }

    pub fn get(&self, kind: ChannelKind) -> SimResult<&dyn DriverFactory> {
        self.factories
            .get(&kind)
            .map(|f| f.as_ref())
            .ok_or_else(|| SimError::UnsupportedKind(kind.to_string()))
    }

    pub fn supports(&self, kind: ChannelKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn list_kinds(&self) -> Vec<ChannelKind> {
        ChannelKind::ALL.into_iter().filter(|k| self.supports(*k)).collect()
    }

    pub fn create(&self, channel: ChannelDescriptor, overrides: &Overrides) -> SimResult<Box<dyn SimulationDriver>> {
        self.get(channel.kind)?.create(channel, overrides)
    }

    /// Dispatch sur `channel.kind` puis décodage par la factory correspondante
    pub fn decode(&self, record: &Value) -> SimResult<Box<dyn SimulationDriver>> {
        let kind = DriverRecord::kind_of(record)?;
        self.get(kind)?.from_record(record)
    }

    pub fn encode(&self, driver: &dyn SimulationDriver) -> SimResult<Value> {
        self.get(driver.kind())?.encode(driver)
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::TemperatureDriver;
    use serde_json::json;

    #[test]
    fn test_defaults_registered() {
        let registry = FactoryRegistry::with_defaults();
        assert_eq!(registry.list_kinds(), vec![ChannelKind::Temperature, ChannelKind::Pressure]);
    }

    #[test]
    fn test_unregistered_kind() {
        let mut registry = FactoryRegistry::new();
        registry.register(TemperatureFactory);
        let result = registry.create(ChannelDescriptor::pressure(1), &Overrides::new());
        assert!(matches!(result, Err(SimError::UnsupportedKind(_))));
    }

    #[test]
    fn test_decode_dispatches_on_kind() {
        let registry = FactoryRegistry::with_defaults();
        let record = registry.get(ChannelKind::Pressure).unwrap().example_record().unwrap();
        assert_eq!(record["channel"]["identifier"], 1234);
        let driver = registry.decode(&record).unwrap();
        assert_eq!(driver.kind(), ChannelKind::Pressure);
    }

    #[test]
    fn test_decode_unknown_tag() {
        let registry = FactoryRegistry::with_defaults();
        let record = json!({"channel": {"kind": "flow", "identifier": 1}});
        assert!(matches!(registry.decode(&record), Err(SimError::UnsupportedKind(_))));
    }

    #[test]
    fn test_decode_rejects_capitalized_tag() {
        let registry = FactoryRegistry::with_defaults();
        let record = registry
            .get(ChannelKind::Temperature)
            .unwrap()
            .example_record()
            .unwrap();
        let mut renamed = record.clone();
        renamed["channel"]["kind"] = json!("Temperature");
        assert!(matches!(DriverRecord::kind_of(&renamed), Err(SimError::UnsupportedKind(_))));
        assert!(matches!(registry.decode(&renamed), Err(SimError::UnsupportedKind(_))));
        assert!(registry.decode(&record).is_ok());
    }

    #[test]
    fn test_encode_requires_registration() {
        let registry = FactoryRegistry::new();
        let driver = TemperatureDriver::new(ChannelDescriptor::temperature(1));
        assert!(matches!(registry.encode(&driver), Err(SimError::UnsupportedKind(_))));
    }
}

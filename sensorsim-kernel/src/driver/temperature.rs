//! Température : une seule dispersion quel que soit l'état de santé,
//! l'état "broken" ne change que la cible en fonctionnement.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use super::{
    apply_overrides, require_finite, require_positive, DriverCore, DriverRecord, Overrides,
    Setpoint, SimulationDriver, DEFAULT_RANDOM_SEED,
};
use crate::errors::{SimError, SimResult};
use crate::factory::DriverFactory;
use crate::models::{ChannelDescriptor, ChannelKind, Mode, State};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureParams {
    pub st_dev: f64,
    pub value_idle: f64,
    pub value_running: f64,
    pub value_running_broken: f64,
    #[serde(alias = "adaption_rate")]
    pub adaptation_rate: f64,
}

impl Default for TemperatureParams {
    fn default() -> Self {
        Self {
            st_dev: 0.5,
            value_idle: 20.0,
            value_running: 80.0,
            value_running_broken: 120.0,
            adaptation_rate: 10.0,
        }
    }
}

impl TemperatureParams {
    fn validate(&self) -> SimResult<()> {
        require_positive("st_dev", self.st_dev)?;
        require_finite("value_idle", self.value_idle)?;
        require_finite("value_running", self.value_running)?;
        require_finite("value_running_broken", self.value_running_broken)?;
        require_positive("adaptation_rate", self.adaptation_rate)
    }
}

/// Configuration de construction : valeur de départ, seed et paramètres
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureConfig {
    pub start_value: f64,
    pub random_seed: u64,
    #[serde(flatten)]
    pub params: TemperatureParams,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            start_value: 20.0,
            random_seed: DEFAULT_RANDOM_SEED,
            params: TemperatureParams::default(),
        }
    }
}

#[derive(Debug)]
pub struct TemperatureDriver {
    core: DriverCore,
    params: TemperatureParams,
}

impl TemperatureDriver {
    pub fn new(channel: ChannelDescriptor) -> Self {
        let config = TemperatureConfig::default();
        Self {
            core: DriverCore::new(channel, config.start_value, config.random_seed),
            params: config.params,
        }
    }

    pub fn with_config(channel: ChannelDescriptor, config: TemperatureConfig) -> SimResult<Self> {
        Self::starting_at(channel, config, OffsetDateTime::now_utc())
    }

    pub fn starting_at(
        channel: ChannelDescriptor,
        config: TemperatureConfig,
        start_time: OffsetDateTime,
    ) -> SimResult<Self> {
        require_finite("start_value", config.start_value)?;
        config.params.validate()?;
        Ok(Self {
            core: DriverCore::starting_at(channel, config.start_value, config.random_seed, start_time),
            params: config.params,
        })
    }

    pub fn from_overrides(channel: ChannelDescriptor, overrides: &Overrides) -> SimResult<Self> {
        let config = apply_overrides(&TemperatureConfig::default(), overrides)?;
        Self::with_config(channel, config)
    }

    pub fn params(&self) -> &TemperatureParams {
        &self.params
    }
}

impl SimulationDriver for TemperatureDriver {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DriverCore {
        &mut self.core
    }

    fn setpoint(&self, state: State, mode: Mode) -> Setpoint {
        let target = match (state, mode) {
            (_, Mode::Idle) => self.params.value_idle,
            (State::Normal, Mode::Running) => self.params.value_running,
            (State::Broken, Mode::Running) => self.params.value_running_broken,
        };
        Setpoint { target, noise_std: self.params.st_dev }
    }

    fn adaptation_rate(&self) -> f64 {
        self.params.adaptation_rate
    }

    fn to_record(&self) -> SimResult<DriverRecord> {
        DriverRecord::new(&self.core, &self.params)
    }
}

pub struct TemperatureFactory;

impl DriverFactory for TemperatureFactory {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Temperature
    }

    fn create(
        &self,
        channel: ChannelDescriptor,
        overrides: &Overrides,
    ) -> SimResult<Box<dyn SimulationDriver>> {
        Ok(Box::new(TemperatureDriver::from_overrides(channel, overrides)?))
    }

    fn from_record(&self, record: &Value) -> SimResult<Box<dyn SimulationDriver>> {
        let record = DriverRecord::from_value(record)?;
        if record.channel.kind != ChannelKind::Temperature {
            return Err(SimError::UnsupportedKind(record.channel.kind.to_string()));
        }
        let params: TemperatureParams = record.parameters()?;
        let config = TemperatureConfig {
            start_value: record.current_value,
            random_seed: record.random_seed,
            params,
        };
        let driver = TemperatureDriver::with_config(record.channel, config)
            .map_err(|e| SimError::MalformedRecord(e.to_string()))?;
        Ok(Box::new(driver))
    }
}

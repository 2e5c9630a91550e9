//! Pression : dispersion distincte en état "broken" pendant le fonctionnement,
//! l'arrêt en panne se comporte comme l'arrêt normal.

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

/// Valeurs en hPa
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureParams {
    pub st_dev: f64,
    pub st_dev_broken: f64,
    pub value_idle: f64,
    pub value_running: f64,
    pub value_running_broken: f64,
    #[serde(alias = "adaption_rate")]
    pub adaptation_rate: f64,
}

impl Default for PressureParams {
    fn default() -> Self {
        Self {
            st_dev: 2.0,
            st_dev_broken: 15.0,
            value_idle: 1013.25,
            value_running: 1500.0,
            value_running_broken: 900.0,
            adaptation_rate: 5.0,
        }
    }
}

impl PressureParams {
    fn validate(&self) -> SimResult<()> {
        require_positive("st_dev", self.st_dev)?;
        require_positive("st_dev_broken", self.st_dev_broken)?;
        require_finite("value_idle", self.value_idle)?;
        require_finite("value_running", self.value_running)?;
        require_finite("value_running_broken", self.value_running_broken)?;
        require_positive("adaptation_rate", self.adaptation_rate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureConfig {
    pub start_value: f64,
    pub random_seed: u64,
    #[serde(flatten)]
    pub params: PressureParams,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            start_value: 1013.0,
            random_seed: DEFAULT_RANDOM_SEED,
            params: PressureParams::default(),
        }
    }
}

#[derive(Debug)]
pub struct PressureDriver {
    core: DriverCore,
    params: PressureParams,
}

impl PressureDriver {
    pub fn new(channel: ChannelDescriptor) -> Self {
        let config = PressureConfig::default();
        Self {
            core: DriverCore::new(channel, config.start_value, config.random_seed),
            params: config.params,
        }
    }

    pub fn with_config(channel: ChannelDescriptor, config: PressureConfig) -> SimResult<Self> {
        Self::starting_at(channel, config, OffsetDateTime::now_utc())
    }

    pub fn starting_at(
        channel: ChannelDescriptor,
        config: PressureConfig,
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
        let config = apply_overrides(&PressureConfig::default(), overrides)?;
        Self::with_config(channel, config)
    }

    pub fn params(&self) -> &PressureParams {
        &self.params
    }
}

impl SimulationDriver for PressureDriver {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DriverCore {
        &mut self.core
    }

    fn setpoint(&self, state: State, mode: Mode) -> Setpoint {
        match (state, mode) {
            (_, Mode::Idle) => Setpoint { target: self.params.value_idle, noise_std: self.params.st_dev },
            (State::Normal, Mode::Running) => Setpoint {
                target: self.params.value_running,
                noise_std: self.params.st_dev,
            },
            (State::Broken, Mode::Running) => Setpoint {
                target: self.params.value_running_broken,
                noise_std: self.params.st_dev_broken,
            },
        }
    }

    fn adaptation_rate(&self) -> f64 {
        self.params.adaptation_rate
    }

    fn to_record(&self) -> SimResult<DriverRecord> {
        DriverRecord::new(&self.core, &self.params)
    }
}

pub struct PressureFactory;

impl DriverFactory for PressureFactory {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Pressure
    }

    fn create(
        &self,
        channel: ChannelDescriptor,
        overrides: &Overrides,
    ) -> SimResult<Box<dyn SimulationDriver>> {
        Ok(Box::new(PressureDriver::from_overrides(channel, overrides)?))
    }

    fn from_record(&self, record: &Value) -> SimResult<Box<dyn SimulationDriver>> {
        let record = DriverRecord::from_value(record)?;
        if record.channel.kind != ChannelKind::Pressure {
            return Err(SimError::UnsupportedKind(record.channel.kind.to_string()));
        }
        let params: PressureParams = record.parameters()?;
        let config = PressureConfig {
            start_value: record.current_value,
            random_seed: record.random_seed,
            params,
        };
        let driver = PressureDriver::with_config(record.channel, config)
            .map_err(|e| SimError::MalformedRecord(e.to_string()))?;
        Ok(Box::new(driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_setpoint_table() {
        let sut = PressureDriver::new(ChannelDescriptor::pressure(1));
        let p = sut.params().clone();
        assert_eq!(sut.setpoint(State::Normal, Mode::Idle), Setpoint { target: p.value_idle, noise_std: p.st_dev });
        assert_eq!(sut.setpoint(State::Broken, Mode::Idle), Setpoint { target: p.value_idle, noise_std: p.st_dev });
        assert_eq!(
            sut.setpoint(State::Normal, Mode::Running),
            Setpoint { target: p.value_running, noise_std: p.st_dev }
        );
        assert_eq!(
            sut.setpoint(State::Broken, Mode::Running),
            Setpoint { target: p.value_running_broken, noise_std: p.st_dev_broken }
        );
    }

    #[test]
    fn test_broken_running_converges_to_broken_target() {
        let config = PressureConfig {
            params: PressureParams { st_dev_broken: 1e-6, adaptation_rate: 1.0, ..Default::default() },
            ..Default::default()
        };
        let t0 = OffsetDateTime::now_utc();
        let mut sut = PressureDriver::starting_at(ChannelDescriptor::pressure(1), config, t0).unwrap();
        sut.set_mode(Mode::Running);
        sut.set_state(State::Broken);
        let value = sut.measure_at(t0 + Duration::seconds(60)).value;
        assert!((value - 900.0).abs() < 1e-3, "got {value}");
    }

    #[test]
    fn test_round_trip() {
        let channel = ChannelDescriptor::pressure(4).with_sampling_rate(2.0);
        let driver = PressureDriver::new(channel);
        let description = driver.to_record().unwrap().to_value().unwrap();
        assert!(description.get("st_dev_broken").is_some());

        let restored = PressureFactory.from_record(&description).unwrap();
        assert_eq!(restored.channel(), driver.channel());
        assert_eq!(restored.to_record().unwrap().to_value().unwrap(), description);
    }

    #[test]
    fn test_rejects_temperature_record() {
        let temperature = crate::driver::TemperatureDriver::new(ChannelDescriptor::temperature(1));
        let description = temperature.to_record().unwrap().to_value().unwrap();
        assert!(PressureFactory.from_record(&description).is_err());
    }
}

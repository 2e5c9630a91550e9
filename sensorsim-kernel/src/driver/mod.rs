/**
 * SIMULATION DRIVERS - Processus stochastiques derrière chaque canal
 *
 * RÔLE :
 * Un driver transforme l'état discret de la machine (State × Mode) en une
 * mesure physique continue et bruitée.
 *
 * FONCTIONNEMENT :
 * - Chaque variante (température, pression...) fournit une table
 *   (state, mode) -> Setpoint { target, noise_std }
 * - `measure()` relaxe la dernière valeur vers la cible selon le temps écoulé
 *   (filtre passe-bas du premier ordre) puis ajoute un bruit gaussien tiré
 *   d'un générateur seedé : même seed + mêmes intervalles = mêmes valeurs
 * - `to_record()` produit la forme sérialisée (DriverRecord) relue par la
 *   factory du même kind
 */

pub mod pressure;
pub mod temperature;

pub use pressure::{PressureConfig, PressureDriver, PressureParams};
pub use temperature::{TemperatureConfig, TemperatureDriver, TemperatureParams};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::errors::{SimError, SimResult};
use crate::models::{ChannelDescriptor, ChannelKind, Mode, Sample, State};

pub const DEFAULT_RANDOM_SEED: u64 = 42;

/// Paramètres de construction nommés (ex: {"st_dev": 0.2, "value_running": 200})
pub type Overrides = Map<String, Value>;

/// Cible vers laquelle le driver converge, et niveau de bruit associé
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub target: f64,
    pub noise_std: f64,
}

/// Poids de lissage exponentiel `exp(-dt / rate)`, décroissant avec `dt`
pub fn adaptation_weight(dt_seconds: f64, adaptation_rate: f64) -> f64 {
    (-dt_seconds.max(0.0) / adaptation_rate).exp()
}

/// Valeur adaptée sans bruit après `dt_seconds`
pub fn relax(last_value: f64, target: f64, dt_seconds: f64, adaptation_rate: f64) -> f64 {
    let w = adaptation_weight(dt_seconds, adaptation_rate);
    // écart pondéré : |résultat - target| = w * |last - target|, sans arrondi de (1 - w)
    target + w * (last_value - target)
}

/// État commun à toutes les variantes : canal, dernière valeur, state/mode
/// recopiés depuis le modèle machine, générateur aléatoire.
#[derive(Debug)]
pub struct DriverCore {
    channel: ChannelDescriptor,
    current_value: f64,
    value_time: OffsetDateTime,
    state: State,
    mode: Mode,
    random_seed: u64,
    rng: StdRng,
}

impl DriverCore {
    pub fn new(channel: ChannelDescriptor, start_value: f64, random_seed: u64) -> Self {
        Self::starting_at(channel, start_value, random_seed, OffsetDateTime::now_utc())
    }

    pub fn starting_at(
        channel: ChannelDescriptor,
        start_value: f64,
        random_seed: u64,
        start_time: OffsetDateTime,
    ) -> Self {
        Self {
            channel,
            current_value: start_value,
            value_time: start_time,
            state: State::Normal,
            mode: Mode::Idle,
            random_seed,
            rng: StdRng::seed_from_u64(random_seed),
        }
    }

    pub fn channel(&self) -> &ChannelDescriptor {
        &self.channel
    }

    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    /// Avance le processus jusqu'à `now` et enregistre la nouvelle valeur
    fn advance(&mut self, setpoint: Setpoint, adaptation_rate: f64, now: OffsetDateTime) -> Sample {
        let dt = (now - self.value_time).as_seconds_f64().max(0.0);
        let adapted = relax(self.current_value, setpoint.target, dt, adaptation_rate);
        let z: f64 = self.rng.sample(StandardNormal);
        let value = adapted + setpoint.noise_std * z;

        self.current_value = value;
        // horloge monotone côté driver : un `now` antérieur ne recule pas le temps
        if now > self.value_time {
            self.value_time = now;
        }
        Sample { timestamp: self.value_time, value }
    }
}

/// Contrat commun des drivers de simulation.
///
/// Les variantes implémentent l'accès au `DriverCore`, la table des cibles et
/// la sérialisation ; la loi de mise à jour est fournie ici.
pub trait SimulationDriver: Send {
    fn core(&self) -> &DriverCore;

    fn core_mut(&mut self) -> &mut DriverCore;

    /// Table (state, mode) -> cible + bruit propre à la variante
    fn setpoint(&self, state: State, mode: Mode) -> Setpoint;

    /// Constante de temps en secondes (plus grand = convergence plus lente)
    fn adaptation_rate(&self) -> f64;

    /// Forme sérialisée, relisible par la factory du même kind
    fn to_record(&self) -> SimResult<DriverRecord>;

    fn channel(&self) -> &ChannelDescriptor {
        self.core().channel()
    }

    fn kind(&self) -> ChannelKind {
        self.core().channel.kind
    }

    fn state(&self) -> State {
        self.core().state
    }

    /// Change la cible, pas la valeur courante (lissée au prochain `measure`)
    fn set_state(&mut self, state: State) {
        self.core_mut().state = state;
    }

    fn mode(&self) -> Mode {
        self.core().mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.core_mut().mode = mode;
    }

    fn last_value(&self) -> f64 {
        self.core().current_value
    }

    fn last_value_time(&self) -> OffsetDateTime {
        self.core().value_time
    }

    fn last_sample(&self) -> Sample {
        Sample { timestamp: self.last_value_time(), value: self.last_value() }
    }

    fn measure(&mut self) -> Sample {
        self.measure_at(OffsetDateTime::now_utc())
    }

    fn measure_at(&mut self, now: OffsetDateTime) -> Sample {
        let setpoint = self.setpoint(self.state(), self.mode());
        let rate = self.adaptation_rate();
        self.core_mut().advance(setpoint, rate, now)
    }
}

/// Forme sérialisée d'un driver : sous-objet `channel`, valeur courante,
/// seed, puis les paramètres de la variante à plat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub channel: ChannelDescriptor,
    pub current_value: f64,
    pub random_seed: u64,
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

impl DriverRecord {
    pub fn new<P: Serialize>(core: &DriverCore, parameters: &P) -> SimResult<Self> {
        let Value::Object(parameters) = serde_json::to_value(parameters)? else {
            return Err(SimError::MalformedRecord("driver parameters must serialize to an object".into()));
        };
        Ok(Self {
            channel: core.channel.clone(),
            current_value: core.current_value,
            random_seed: core.random_seed,
            parameters,
        })
    }

    /// Lit le tag `channel.kind` sans désérialiser le reste
    pub fn kind_of(value: &Value) -> SimResult<ChannelKind> {
        let channel = value
            .get("channel")
            .ok_or_else(|| SimError::MalformedRecord("field 'channel' must be present".into()))?;
        let channel = channel
            .as_object()
            .ok_or_else(|| SimError::MalformedRecord("field 'channel' is not an object".into()))?;
        let kind = channel
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| SimError::MalformedRecord("'channel.kind' cannot be determined".into()))?;
        kind.parse()
    }

    pub fn from_value(value: &Value) -> SimResult<Self> {
        Self::kind_of(value)?;
        let record: DriverRecord = serde_json::from_value(value.clone())
            .map_err(|e| SimError::MalformedRecord(e.to_string()))?;
        record
            .channel
            .validate()
            .map_err(|e| SimError::MalformedRecord(e.to_string()))?;
        if !record.current_value.is_finite() {
            return Err(SimError::MalformedRecord("'current_value' is not finite".into()));
        }
        Ok(record)
    }

    /// Paramètres typés de la variante ; champ manquant = record malformé
    pub fn parameters<P: DeserializeOwned>(&self) -> SimResult<P> {
        serde_json::from_value(Value::Object(self.parameters.clone()))
            .map_err(|e| SimError::MalformedRecord(e.to_string()))
    }

    pub fn to_value(&self) -> SimResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Applique des overrides nommés sur une configuration par défaut.
/// Clé inconnue ou valeur du mauvais type = `InvalidParameter`.
pub(crate) fn apply_overrides<C>(defaults: &C, overrides: &Overrides) -> SimResult<C>
where
    C: Serialize + DeserializeOwned,
{
    let Value::Object(mut merged) = serde_json::to_value(defaults)? else {
        return Err(SimError::InvalidParameter("configuration is not an object".into()));
    };
    for (key, value) in overrides {
        // ancienne orthographe des fichiers de configuration
        let key = if key == "adaption_rate" { "adaptation_rate" } else { key.as_str() };
        if !merged.contains_key(key) {
            return Err(SimError::InvalidParameter(format!("unknown parameter '{key}'")));
        }
        merged.insert(key.to_string(), value.clone());
    }
    serde_json::from_value(Value::Object(merged))
        .map_err(|e| SimError::InvalidParameter(e.to_string()))
}

pub(crate) fn require_finite(name: &str, value: f64) -> SimResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SimError::InvalidParameter(format!("{name} must be finite, got {value}")))
    }
}

pub(crate) fn require_positive(name: &str, value: f64) -> SimResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SimError::InvalidParameter(format!("{name} must be positive, got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use time::Duration;

    #[test]
    fn test_weight_bounds() {
        assert_eq!(adaptation_weight(0.0, 10.0), 1.0);
        assert!(adaptation_weight(1e6, 10.0) < 1e-12);
        // dt négatif traité comme zéro
        assert_eq!(adaptation_weight(-5.0, 10.0), 1.0);
    }

    #[test]
    fn test_relax_zero_elapsed_keeps_value() {
        assert_eq!(relax(20.0, 200.0, 0.0, 10.0), 20.0);
    }

    proptest! {
        #[test]
        fn adapted_distance_shrinks_with_elapsed_time(
            last in -500.0f64..500.0,
            offset in 1.0f64..500.0,
            rate in 0.1f64..100.0,
            dt1 in 0.001f64..100.0,
            extra in 0.001f64..50.0,
        ) {
            let target = last + offset;
            let dt2 = dt1 + extra;
            let (w1, w2) = (adaptation_weight(dt1, rate), adaptation_weight(dt2, rate));
            if w1 > 0.0 {
                prop_assert!(w2 < w1);
            }
            let d1 = (target - relax(last, target, dt1, rate)).abs();
            let d2 = (target - relax(last, target, dt2, rate)).abs();
            prop_assert!(d1 <= offset);
            prop_assert!(d2 <= d1);
            // écart encore représentable devant target : décroissance stricte
            if d2 > target.abs().max(offset) * 1e-6 {
                prop_assert!(d2 < d1);
            }
        }
    }

    #[test]
    fn test_relax_long_gap_between_pulls() {
        // rate 0.1 s, 45 s sans mesure : la valeur a rejoint la cible
        let d1 = (1.0 - relax(0.0, 1.0, 45.02, 0.1)).abs();
        let d2 = (1.0 - relax(0.0, 1.0, 45.021, 0.1)).abs();
        assert!(d2 <= d1);
        assert_eq!(relax(0.0, 1.0, 45.02, 0.1), 1.0);

        // cible nulle : l'écart reste exactement w * |last|
        let w = adaptation_weight(45.02, 0.1);
        assert!(w > 0.0);
        assert_eq!(relax(1.0, 0.0, 45.02, 0.1), w);
        assert!(relax(1.0, 0.0, 45.021, 0.1) < relax(1.0, 0.0, 45.02, 0.1));
    }

    #[test]
    fn test_record_parameters_must_be_an_object() {
        let core = DriverCore::new(ChannelDescriptor::temperature(1), 20.0, 1);
        assert!(matches!(DriverRecord::new(&core, &42.0), Err(SimError::MalformedRecord(_))));

        let mut bad_keys = std::collections::HashMap::new();
        bad_keys.insert((1u8, 2u8), 0.5);
        assert!(matches!(DriverRecord::new(&core, &bad_keys), Err(SimError::Json(_))));

        let record = DriverRecord::new(&core, &TemperatureParams::default()).unwrap();
        assert_eq!(record.parameters["st_dev"], 0.5);
    }

    #[test]
    fn test_record_kind_errors() {
        let missing = json!({"current_value": 1.0});
        assert!(matches!(DriverRecord::kind_of(&missing), Err(SimError::MalformedRecord(_))));

        let not_object = json!({"channel": "temperature"});
        assert!(matches!(DriverRecord::kind_of(&not_object), Err(SimError::MalformedRecord(_))));

        let unknown = json!({"channel": {"kind": "humidity"}});
        assert!(matches!(DriverRecord::kind_of(&unknown), Err(SimError::UnsupportedKind(_))));
    }

    #[test]
    fn test_record_rejects_bad_sampling_rate() {
        let value = json!({
            "channel": {"kind": "temperature", "identifier": 1, "namespace": "Sensors", "sampling_rate": -1.0},
            "current_value": 20.0,
            "random_seed": 42
        });
        assert!(matches!(DriverRecord::from_value(&value), Err(SimError::MalformedRecord(_))));
    }

    #[test]
    fn test_overrides_unknown_key() {
        let defaults = TemperatureConfig::default();
        let mut overrides = Overrides::new();
        overrides.insert("colour".into(), json!("red"));
        assert!(matches!(apply_overrides(&defaults, &overrides), Err(SimError::InvalidParameter(_))));
    }

    #[test]
    fn test_overrides_legacy_spelling() {
        let defaults = TemperatureConfig::default();
        let mut overrides = Overrides::new();
        overrides.insert("adaption_rate".into(), json!(0.262));
        let config = apply_overrides(&defaults, &overrides).unwrap();
        assert_eq!(config.params.adaptation_rate, 0.262);
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let t0 = OffsetDateTime::now_utc();
        let mut a = TemperatureDriver::starting_at(ChannelDescriptor::temperature(1), TemperatureConfig::default(), t0).unwrap();
        let mut b = TemperatureDriver::starting_at(ChannelDescriptor::temperature(2), TemperatureConfig::default(), t0).unwrap();
        a.set_mode(Mode::Running);
        b.set_mode(Mode::Running);
        for step in [0.1, 0.7, 2.5, 0.01] {
            let now = a.last_value_time() + Duration::seconds_f64(step);
            assert_eq!(a.measure_at(now).value, b.measure_at(now).value);
        }
    }
}

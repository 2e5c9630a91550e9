/*!
SENSORSIM KERNEL - Simulateur de capteurs industriels

RÔLE : Un modèle machine (State × Mode) pilote des canaux de mesure
simulés (température, pression). Chaque canal converge exponentiellement
vers la cible de l'état courant, avec un bruit gaussien reproductible.

MODULES :
- driver / factory : processus stochastiques et registre par kind
- channel / machine : orchestration, polling, persistance JSON
- config / http / mqtt : configuration YAML, API admin, bridge broker
*/

pub mod channel;
pub mod config;
pub mod driver;
pub mod errors;
pub mod factory;
pub mod http;
pub mod machine;
pub mod models;
pub mod mqtt;
pub mod state;

pub use channel::{ChannelHandle, Subscriber};
pub use driver::{Overrides, PressureDriver, SimulationDriver, TemperatureDriver};
pub use errors::{SimError, SimResult};
pub use factory::{DriverFactory, FactoryRegistry};
pub use machine::{MachineModel, RestoreReport};
pub use models::{ChannelDescriptor, ChannelId, ChannelKind, Mode, Sample, State};

/**
 * MACHINE MODEL - Orchestration des canaux simulés
 *
 * RÔLE : Possède toutes les paires (canal, driver), l'état global
 * (State × Mode), la persistance JSON et le petit protocole de messages de
 * contrôle.
 *
 * INVARIANT : après chaque opération publique, chaque driver reflète
 * exactement le state/mode global. Les drivers sont mis à jour avant la
 * valeur globale.
 */

use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ChannelHandle, Subscriber};
use crate::driver::{Overrides, SimulationDriver};
use crate::errors::{SimError, SimResult};
use crate::factory::FactoryRegistry;
use crate::models::{ChannelDescriptor, ChannelId, Mode, State};

/// Clé booléenne : true = machine saine, false = machine en panne
pub const MACHINE_STATE: &str = "machine_state";
/// Clé booléenne : true = job en cours (RUNNING), false = IDLE
pub const JOB_RUNNING: &str = "job_running";

/// Entrée ignorée pendant une restauration
#[derive(Debug, Clone, Serialize)]
pub struct SkippedEntry {
    pub index: usize,
    pub reason: String,
}

/// Résultat d'une restauration best-effort
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    pub restored: Vec<ChannelId>,
    pub skipped: Vec<SkippedEntry>,
}

pub struct MachineModel {
    channels: Vec<Channel>,
    registry: FactoryRegistry,
    listeners: Vec<Subscriber>,
    state: State,
    mode: Mode,
    polling: bool,
}

impl MachineModel {
    pub fn new() -> Self {
        Self::with_registry(FactoryRegistry::with_defaults())
    }

    pub fn with_registry(registry: FactoryRegistry) -> Self {
        Self {
            channels: Vec::new(),
            registry,
            listeners: Vec::new(),
            state: State::Normal,
            mode: Mode::Running,
            polling: false,
        }
    }

    pub fn registry(&self) -> &FactoryRegistry {
        &self.registry
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Ajoute un canal. Avec `driver`, celui-ci est adopté tel quel (state/mode
    /// écrasés par les valeurs globales). Sans driver, la factory du kind en
    /// crée un avec `overrides`, puis avec les défauts si un paramètre est
    /// invalide.
    pub fn add_channel(
        &mut self,
        descriptor: ChannelDescriptor,
        driver: Option<Box<dyn SimulationDriver>>,
        overrides: &Overrides,
    ) -> SimResult<()> {
        let id = descriptor.id();
        info!("Adding channel {} ({}) to machine", descriptor.name(), id);

        descriptor.validate()?;
        self.registry.get(descriptor.kind)?;
        if self.contains(id) {
            warn!("Channel {} already exists, not overwriting", id);
            return Err(SimError::DuplicateChannel(id));
        }

        let driver = match driver {
            Some(driver) => {
                if driver.channel() != &descriptor {
                    return Err(SimError::InvalidParameter(format!(
                        "driver is bound to channel {}, not {}",
                        driver.channel().id(),
                        id
                    )));
                }
                debug!("Driver for {} given, continue with present one", descriptor.name());
                driver
            }
            None => match self.registry.create(descriptor.clone(), overrides) {
                Ok(driver) => driver,
                Err(SimError::InvalidParameter(reason)) => {
                    error!("Invalid configuration for {}: {reason}. Using default config.", descriptor.name());
                    self.registry.create(descriptor, &Overrides::new())?
                }
                Err(e) => return Err(e),
            },
        };

        self.attach(driver);
        Ok(())
    }

    /// Branche un driver : state/mode globaux, listeners, polling
    fn attach(&mut self, mut driver: Box<dyn SimulationDriver>) {
        driver.set_state(self.state);
        driver.set_mode(self.mode);

        let mut channel = Channel::new(driver);
        for listener in &self.listeners {
            channel.handle().subscribe(listener.clone());
        }
        if self.polling {
            channel.start();
        }
        self.channels.push(channel);
    }

    /// Supprime un canal et arrête son polling. Idempotent.
    pub fn delete_channel(&mut self, id: ChannelId) -> bool {
        let Some(position) = self.channels.iter().position(|c| c.descriptor().id() == id) else {
            debug!("Delete ignored: {}", SimError::UnknownChannel(id));
            return false;
        };
        let mut channel = self.channels.remove(position);
        channel.stop();
        info!("Deleted channel {} ({})", channel.descriptor().name(), id);
        true
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.channels.iter().any(|c| c.descriptor().id() == id)
    }

    /// Copie des descripteurs, ordre d'insertion
    pub fn list_channels(&self) -> Vec<ChannelDescriptor> {
        self.channels.iter().map(|c| c.descriptor().clone()).collect()
    }

    pub fn channel(&self, id: ChannelId) -> Option<ChannelHandle> {
        self.channels
            .iter()
            .find(|c| c.descriptor().id() == id)
            .map(|c| c.handle().clone())
    }

    pub fn channels(&self) -> Vec<ChannelHandle> {
        self.channels.iter().map(|c| c.handle().clone()).collect()
    }

    /// Abonné branché sur tous les canaux, présents et futurs
    pub fn add_listener(&mut self, listener: Subscriber) {
        for channel in &self.channels {
            channel.handle().subscribe(listener.clone());
        }
        self.listeners.push(listener);
    }

    pub fn set_state(&mut self, state: State) {
        info!("Setting state to {state}");
        for channel in &self.channels {
            channel.handle().with_driver(|d| d.set_state(state));
        }
        self.state = state;
    }

    pub fn set_mode(&mut self, mode: Mode) {
        info!("Setting mode to {mode}");
        for channel in &self.channels {
            channel.handle().with_driver(|d| d.set_mode(mode));
        }
        self.mode = mode;
    }

    pub fn set_state_normal(&mut self) {
        self.set_state(State::Normal);
    }

    pub fn set_state_broken(&mut self) {
        self.set_state(State::Broken);
    }

    pub fn start_job(&mut self) {
        info!("Starting job");
        self.set_mode(Mode::Running);
    }

    pub fn stop_job(&mut self) {
        info!("Stopping job");
        self.set_mode(Mode::Idle);
    }

    /// Démarre le polling de tous les canaux (et des suivants).
    /// Retourne le nombre de canaux effectivement pollés.
    pub fn start_polling(&mut self) -> usize {
        self.polling = true;
        let started = self.channels.iter_mut().map(|c| c.start()).filter(|ok| *ok).count();
        info!("Polling started on {started}/{} channels", self.channels.len());
        started
    }

    pub fn stop_polling(&mut self) {
        self.polling = false;
        for channel in &mut self.channels {
            channel.stop();
        }
        info!("Polling stopped");
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// Interprète un message de contrôle à plat. Retourne true si toutes les
    /// clés ont été reconnues et appliquées.
    pub fn handle_control_message(&mut self, message: &Map<String, Value>) -> bool {
        debug!("Received control message with {} key(s)", message.len());
        let mut unused: Vec<&str> = Vec::new();

        for (key, value) in message {
            match (key.as_str(), value.as_bool()) {
                (MACHINE_STATE, Some(true)) => self.set_state_normal(),
                (MACHINE_STATE, Some(false)) => self.set_state_broken(),
                (JOB_RUNNING, Some(true)) => self.start_job(),
                (JOB_RUNNING, Some(false)) => self.stop_job(),
                _ => unused.push(key),
            }
        }

        if !unused.is_empty() {
            warn!("Unused message(s): {}", unused.join(","));
        }
        unused.is_empty()
    }

    /// Records de tous les drivers, dans l'ordre des canaux
    pub fn to_records(&self) -> SimResult<Vec<Value>> {
        self.channels
            .iter()
            .map(|c| c.handle().with_driver(|d| self.registry.encode(d)))
            .collect()
    }

    /// Sauvegarde la configuration : fichier temporaire puis rename
    pub fn save(&self, path: impl AsRef<Path>) -> SimResult<()> {
        let path = path.as_ref();
        info!("Saving configuration to file {}", path.display());

        let records = self.to_records()?;
        let content = serde_json::to_string_pretty(&Value::Array(records))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = temp_path(path);
        if let Err(e) = write_synced(&tmp, content.as_bytes()).and_then(|()| fs::rename(&tmp, path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Relit une configuration. Les erreurs d'I/O ou de JSON global sont
    /// remontées ; une entrée invalide est ignorée avec un warning.
    pub fn restore(&mut self, path: impl AsRef<Path>) -> SimResult<RestoreReport> {
        let path = path.as_ref();
        info!("Loading configuration from {}", path.display());
        let content = fs::read_to_string(path)?;
        let document: Value = serde_json::from_str(&content)?;
        self.restore_records(&document)
    }

    pub fn restore_records(&mut self, document: &Value) -> SimResult<RestoreReport> {
        let entries = document
            .as_array()
            .ok_or_else(|| SimError::MalformedRecord("configuration must be a JSON array".into()))?;

        let mut report = RestoreReport::default();
        for (index, entry) in entries.iter().enumerate() {
            debug!("Entry {index}: {entry}");
            let driver = match self.registry.decode(entry) {
                Ok(driver) => driver,
                Err(e) => {
                    warn!("Skipping entry {index}: {e}");
                    report.skipped.push(SkippedEntry { index, reason: e.to_string() });
                    continue;
                }
            };

            let id = driver.channel().id();
            if self.contains(id) {
                let e = SimError::DuplicateChannel(id);
                warn!("Skipping entry {index}: {e}");
                report.skipped.push(SkippedEntry { index, reason: e.to_string() });
                continue;
            }

            info!("Adding channel {}", driver.channel().name());
            self.attach(driver);
            report.restored.push(id);
        }
        Ok(report)
    }
}

impl Default for MachineModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Écrit puis force le contenu sur disque avant le rename
fn write_synced(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(content)?;
    file.sync_all()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/*!
Test Harness pour le simulateur

Facilite l'écriture de tests d'intégration avec:
- Un modèle machine partagé, comme celui servi par l'API
- Un répertoire temporaire pour les fichiers de configuration
- Un listener qui enregistre toutes les mesures émises
- Un bridge MQTT branché sur le mock client : mesures publiées, messages de
  contrôle reçus sur le topic souscrit
*/

use crate::mqtt_stub::{MockMessage, MockMqttClient};
use anyhow::Result;
use parking_lot::Mutex;
use rumqttc::QoS;
use sensorsim_kernel::mqtt::{control_topic, dispatch_control, run_sample_pump, sample_listener, sample_queue};
use sensorsim_kernel::state::{new_state, Shared};
use sensorsim_kernel::{ChannelDescriptor, ChannelId, MachineModel, Overrides, Sample};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct TestHarness {
    pub machine: Shared<MachineModel>,
    pub mqtt_client: MockMqttClient,
    recorded: Arc<Mutex<Vec<(ChannelId, Sample)>>>,
    control: Mutex<Option<ControlInbox>>,
    dir: TempDir,
}

/// Topic de contrôle souscrit et messages livrés par le mock
struct ControlInbox {
    topic: String,
    rx: mpsc::UnboundedReceiver<MockMessage>,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        tracing_subscriber::fmt().with_test_writer().try_init().ok();

        let machine = new_state(MachineModel::new());
        let recorded: Arc<Mutex<Vec<(ChannelId, Sample)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = recorded.clone();
        machine
            .lock()
            .add_listener(Arc::new(move |channel: &ChannelDescriptor, sample: Sample| sink.lock().push((channel.id(), sample))));

        Ok(Self {
            machine,
            mqtt_client: MockMqttClient::new(),
            recorded,
            control: Mutex::new(None),
            dir: tempfile::tempdir()?,
        })
    }

    /// Chemin dans le répertoire temporaire du harness
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn add_channel(&self, channel: ChannelDescriptor) -> Result<()> {
        self.machine.lock().add_channel(channel, None, &Overrides::new())?;
        Ok(())
    }

    /// Une mesure sur chaque canal, dans l'ordre d'insertion
    pub fn measure_all(&self) -> Vec<Sample> {
        let handles = self.machine.lock().channels();
        handles.iter().map(|h| h.measure()).collect()
    }

    pub fn recorded(&self) -> Vec<(ChannelId, Sample)> {
        self.recorded.lock().clone()
    }

    pub fn recorded_for(&self, id: ChannelId) -> Vec<f64> {
        self.recorded.lock().iter().filter(|(c, _)| *c == id).map(|(_, s)| s.value).collect()
    }

    /// Branche le bridge MQTT sur le mock client, comme `spawn_mqtt_bridge` :
    /// pump des mesures et souscription au topic de contrôle.
    /// Nécessite un runtime tokio.
    pub async fn attach_mqtt(&self, prefix: &str) -> Result<JoinHandle<usize>> {
        let (tx, rx) = sample_queue();
        self.machine.lock().add_listener(sample_listener(prefix, tx));
        let pump = tokio::spawn(run_sample_pump(self.mqtt_client.clone(), rx));

        let topic = control_topic(prefix);
        self.mqtt_client.subscribe(topic.clone(), QoS::AtLeastOnce).await?;
        let rx = self.mqtt_client.setup_receiver();
        *self.control.lock() = Some(ControlInbox { topic, rx });
        Ok(pump)
    }

    /// Publie un message de contrôle via le mock, puis traite ce que le
    /// topic souscrit a reçu, comme l'event loop du bridge.
    /// Retourne le résultat du dernier message traité.
    pub async fn send_control(&self, message: &Value) -> Result<bool> {
        let payload = serde_json::to_vec(message)?;
        let topic = match self.control.lock().as_ref() {
            Some(inbox) => inbox.topic.clone(),
            None => anyhow::bail!("MQTT bridge not attached"),
        };
        self.mqtt_client.simulate_incoming(topic, payload).await?;

        let mut handled = false;
        let mut control = self.control.lock();
        if let Some(inbox) = control.as_mut() {
            while let Ok(incoming) = inbox.rx.try_recv() {
                if incoming.topic == inbox.topic {
                    handled = dispatch_control(&self.machine, &incoming.payload);
                }
            }
        }
        Ok(handled)
    }

    /// Attend qu'un message soit publié sur un topic
    pub async fn wait_for_message(&self, topic: &str, timeout_ms: u64) -> Result<Option<Value>> {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? {
                return Ok(Some(msg));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tracing::warn!("Timeout waiting for message on {}", topic);
        Ok(None)
    }
}

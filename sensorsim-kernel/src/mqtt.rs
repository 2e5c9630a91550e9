//! Pont MQTT : publication des mesures et réception des messages de contrôle.
//!
//! Les abonnés des canaux tournent dans le poller (code synchrone) : ils ne
//! font que pousser dans un canal tokio borné, sans attendre. Quand la file
//! est pleine (broker lent ou absent), la mesure est abandonnée. Une tâche
//! "pump" publie ensuite via un `SamplePublisher`.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::channel::Subscriber;
use crate::config::MqttConf;
use crate::machine::MachineModel;
use crate::models::{ChannelDescriptor, Sample};
use crate::state::Shared;

pub const CONTROL_TOPIC: &str = "machine/message@v1";

/// Mesures en attente de publication au-delà desquelles on abandonne
pub const SAMPLE_QUEUE_CAPACITY: usize = 1024;

/// Sortie des mesures ; implémentée par le client rumqttc et par le mock du devkit
#[async_trait]
pub trait SamplePublisher: Send + Sync {
    async fn publish_sample(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()>;
}

#[async_trait]
impl SamplePublisher for AsyncClient {
    async fn publish_sample(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        self.publish(topic, QoS::AtLeastOnce, false, payload).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct SampleMessage<'a> {
    pub channel: &'a ChannelDescriptor,
    pub name: String,
    pub timestamp: String,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct OutgoingSample {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub fn sample_topic(prefix: &str, channel: &ChannelDescriptor) -> String {
    format!("{prefix}/{}/{}", channel.namespace, channel.name())
}

pub fn control_topic(prefix: &str) -> String {
    format!("{prefix}/{CONTROL_TOPIC}")
}

pub fn encode_sample(prefix: &str, channel: &ChannelDescriptor, sample: Sample) -> serde_json::Result<OutgoingSample> {
    let view = sample.view();
    let message = SampleMessage {
        channel,
        name: channel.name(),
        timestamp: view.timestamp,
        value: view.value,
    };
    Ok(OutgoingSample { topic: sample_topic(prefix, channel), payload: serde_json::to_vec(&message)? })
}

/// File entre les listeners et le pump
pub fn sample_queue() -> (Sender<OutgoingSample>, Receiver<OutgoingSample>) {
    mpsc::channel(SAMPLE_QUEUE_CAPACITY)
}

/// Abonné à brancher sur le modèle machine : chaque mesure part dans `tx`.
/// Ne bloque jamais le poller.
pub fn sample_listener(prefix: impl Into<String>, tx: Sender<OutgoingSample>) -> Subscriber {
    let prefix = prefix.into();
    Arc::new(move |channel: &ChannelDescriptor, sample: Sample| match encode_sample(&prefix, channel, sample) {
        Ok(outgoing) => match tx.try_send(outgoing) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => warn!("Sample queue full, dropping sample for {}", dropped.topic),
            // receveur fermé = bridge arrêté, la mesure est perdue
            Err(TrySendError::Closed(_)) => {}
        },
        Err(e) => error!("Cannot encode sample of {}: {e}", channel.name()),
    })
}

/// Publie tout ce qui arrive sur `rx` jusqu'à fermeture du canal.
/// Retourne le nombre de publications réussies.
pub async fn run_sample_pump<P: SamplePublisher>(publisher: P, mut rx: Receiver<OutgoingSample>) -> usize {
    let mut published = 0;
    while let Some(sample) = rx.recv().await {
        match publisher.publish_sample(&sample.topic, sample.payload).await {
            Ok(()) => published += 1,
            Err(e) => warn!("Publish on {} failed: {e}", sample.topic),
        }
    }
    debug!("Sample pump closed after {published} publications");
    published
}

/// Décode un message de contrôle et l'applique. Retourne le résultat de
/// `handle_control_message`, false si le payload n'est pas un objet JSON.
pub fn dispatch_control(machine: &Shared<MachineModel>, payload: &[u8]) -> bool {
    match serde_json::from_slice::<Map<String, Value>>(payload) {
        Ok(message) => machine.lock().handle_control_message(&message),
        Err(e) => {
            warn!("Invalid control message: {e}");
            false
        }
    }
}

/// Branche le modèle machine sur un broker : listener + pump + event loop
pub fn spawn_mqtt_bridge(machine: Shared<MachineModel>, conf: &MqttConf) -> JoinHandle<()> {
    let mut opts = MqttOptions::new(conf.client_id.clone(), conf.host.clone(), conf.port);
    opts.set_keep_alive(Duration::from_secs(15));
    let (client, mut eventloop) = AsyncClient::new(opts, 10);

    let (tx, rx) = sample_queue();
    machine.lock().add_listener(sample_listener(conf.topic_prefix.clone(), tx));
    task::spawn(run_sample_pump(client.clone(), rx));

    let control = control_topic(&conf.topic_prefix);
    info!("MQTT bridge to {}:{}, control on {control}", conf.host, conf.port);

    task::spawn(async move {
        if let Err(e) = client.subscribe(control.clone(), QoS::AtLeastOnce).await {
            error!("MQTT subscribe failed: {e:?}");
            return;
        }
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == control => {
                    dispatch_control(&machine, &p.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT error: {e:?}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}

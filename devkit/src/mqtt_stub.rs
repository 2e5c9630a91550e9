/*!
Mock MQTT Client pour tester le bridge sans broker

Enregistre toutes les publications (mesures des canaux) avec leur QoS et
permet de simuler la réception de messages de contrôle. Comme un broker, seuls
les topics souscrits sont livrés.
*/

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::QoS;
use sensorsim_kernel::mqtt::SamplePublisher;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Mock MQTT Client qui simule rumqttc::AsyncClient
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    message_sender: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel recevant les messages simulés
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.message_sender.lock() = Some(sender);
        receiver
    }

    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage { topic: topic.into(), payload: payload.into(), qos, retain };
        tracing::debug!("[MOCK] Published to {}: {} bytes", message.topic, message.payload.len());
        self.published_messages.lock().push(message);
        Ok(())
    }

    pub async fn subscribe<S: Into<String>>(&self, topic: S, qos: QoS) -> Result<()> {
        let topic = topic.into();
        tracing::debug!("[MOCK] Subscribed to {} ({:?})", topic, qos);
        self.subscriptions.lock().push((topic, qos));
        Ok(())
    }

    /// Simule la réception d'un message (pour tests).
    /// Retourne false si le topic n'est pas souscrit : rien n'est livré.
    pub async fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<bool>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let topic = topic.into();
        let Some(qos) = self.subscription_qos(&topic) else {
            tracing::debug!("[MOCK] No subscription for {}, message dropped", topic);
            return Ok(false);
        };
        let message = MockMessage { topic, payload: payload.into(), qos, retain: false };
        match self.message_sender.lock().as_ref() {
            Some(sender) => {
                sender.send(message).map_err(|e| anyhow::anyhow!("Send error: {}", e))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().clone()
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().iter().map(|(topic, _)| topic.clone()).collect()
    }

    pub fn subscription_qos(&self, topic: &str) -> Option<QoS> {
        self.subscriptions.lock().iter().find(|(t, _)| t == topic).map(|(_, qos)| *qos)
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse le dernier message d'un topic en JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.find_messages_by_topic(topic).last() {
            Some(last_msg) => Ok(Some(serde_json::from_slice(&last_msg.payload)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SamplePublisher for MockMqttClient {
    async fn publish_sample(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.publish(topic, QoS::AtLeastOnce, false, payload).await
    }
}

/// Messages de contrôle conformes à `<prefix>/machine/message@v1`
pub struct ControlMessageBuilder;

impl ControlMessageBuilder {
    pub fn machine_state(healthy: bool) -> Value {
        json!({ "machine_state": healthy })
    }

    pub fn job_running(running: bool) -> Value {
        json!({ "job_running": running })
    }

    pub fn both(healthy: bool, running: bool) -> Value {
        json!({ "machine_state": healthy, "job_running": running })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_client_publish_subscribe() {
        let client = MockMqttClient::new();
        client.subscribe("test/topic", QoS::AtLeastOnce).await.unwrap();
        assert_eq!(client.get_subscriptions(), vec!["test/topic"]);

        assert_eq!(client.subscription_qos("test/topic"), Some(QoS::AtLeastOnce));
        assert_eq!(client.subscription_qos("other"), None);

        client.publish_sample("test/topic", b"test message".to_vec()).await.unwrap();
        let messages = client.get_published_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, b"test message");
        assert_eq!(messages[0].qos, QoS::AtLeastOnce);
        assert!(!messages[0].retain);
    }

    #[tokio::test]
    async fn test_simulate_incoming() {
        let client = MockMqttClient::new();
        let mut rx = client.setup_receiver();
        let payload = serde_json::to_vec(&ControlMessageBuilder::both(false, true)).unwrap();
        assert!(!client.simulate_incoming("sensorsim/machine/message@v1", payload.clone()).await.unwrap());
        assert!(rx.try_recv().is_err());

        client.subscribe("sensorsim/machine/message@v1", QoS::AtLeastOnce).await.unwrap();
        assert!(client.simulate_incoming("sensorsim/machine/message@v1", payload).await.unwrap());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, "sensorsim/machine/message@v1");
        let json: Value = serde_json::from_slice(&received.payload).unwrap();
        assert_eq!(json["machine_state"], false);
        assert_eq!(json["job_running"], true);
    }
}

/*!
# Sensorsim DevKit - Doubles de test pour le simulateur

Bibliothèque facilitant les tests du kernel sensorsim avec:
- Client MQTT mock (implémente `SamplePublisher`) pour tester sans broker
- Construction de records de drivers à la main (restauration, cas invalides)
- Harness : modèle machine + répertoire temporaire + listener enregistreur
*/

pub mod mqtt_stub;
pub mod record_helpers;
pub mod test_utils;

pub use mqtt_stub::MockMqttClient;
pub use record_helpers::RecordBuilder;
pub use test_utils::TestHarness;

//! Canal de mesure : identité + accès pull/push au driver + polling périodique.
//!
//! Le canal ne référence jamais le driver par un callback enregistré dans le
//! driver lui-même : le modèle machine possède les deux, et la couche
//! protocole reçoit un `ChannelHandle` clonable.

use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::driver::SimulationDriver;
use crate::models::{ChannelDescriptor, ChannelId, Sample};
use crate::state::{new_state, Shared, SharedDriver};

/// Période max du poller (canaux très lents)
const MAX_POLL_PERIOD: Duration = Duration::from_secs(24 * 3600);
/// Période min : `tokio::time::interval` refuse une période nulle
const MIN_POLL_PERIOD: Duration = Duration::from_millis(1);

/// Période de polling pour `sampling_rate` mesures/s, bornée
fn poll_period(sampling_rate: f64) -> Duration {
    Duration::try_from_secs_f64(1.0 / sampling_rate)
        .unwrap_or(MAX_POLL_PERIOD)
        .clamp(MIN_POLL_PERIOD, MAX_POLL_PERIOD)
}

/// Callback appelé après chaque `measure()`
pub type Subscriber = Arc<dyn Fn(&ChannelDescriptor, Sample) + Send + Sync>;

/// Poignée clonable remise à la couche protocole (pull) et aux abonnés (push)
#[derive(Clone)]
pub struct ChannelHandle {
    descriptor: Arc<ChannelDescriptor>,
    driver: SharedDriver,
    subscribers: Shared<Vec<Subscriber>>,
}

impl ChannelHandle {
    fn new(driver: Box<dyn SimulationDriver>) -> Self {
        Self {
            descriptor: Arc::new(driver.channel().clone()),
            driver: new_state(driver),
            subscribers: new_state(Vec::new()),
        }
    }

    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> ChannelId {
        self.descriptor.id()
    }

    /// Avance le processus et notifie les abonnés
    pub fn measure(&self) -> Sample {
        let sample = self.driver.lock().measure();
        self.notify(sample);
        sample
    }

    pub fn measure_at(&self, now: OffsetDateTime) -> Sample {
        let sample = self.driver.lock().measure_at(now);
        self.notify(sample);
        sample
    }

    /// Dernière valeur, sans avancer le processus
    pub fn last(&self) -> Sample {
        self.driver.lock().last_sample()
    }

    pub fn subscribe(&self, subscriber: Subscriber) {
        self.subscribers.lock().push(subscriber);
    }

    /// Accès exclusif au driver (un seul verrou pour state/mode/valeur)
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut dyn SimulationDriver) -> R) -> R {
        let mut guard = self.driver.lock();
        f(guard.as_mut())
    }

    fn notify(&self, sample: Sample) {
        // copie de la liste : les callbacks tournent hors verrou
        let subscribers = self.subscribers.lock().clone();
        for subscriber in subscribers {
            subscriber(&self.descriptor, sample);
        }
    }
}

/// Canal possédé par le modèle machine : handle + tâche de polling éventuelle
pub struct Channel {
    handle: ChannelHandle,
    poller: Option<JoinHandle<()>>,
}

impl Channel {
    pub fn new(driver: Box<dyn SimulationDriver>) -> Self {
        Self { handle: ChannelHandle::new(driver), poller: None }
    }

    pub fn handle(&self) -> &ChannelHandle {
        &self.handle
    }

    pub fn descriptor(&self) -> &ChannelDescriptor {
        self.handle.descriptor()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|p| !p.is_finished())
    }

    /// Démarre le polling à `sampling_rate` mesures/s sur le runtime tokio
    /// courant. Retourne false hors runtime.
    pub fn start(&mut self) -> bool {
        if self.is_polling() {
            return true;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, cannot poll channel {}", self.descriptor().name());
            return false;
        };

        let period = poll_period(self.descriptor().sampling_rate);
        let handle = self.handle.clone();
        debug!("Polling {} every {:?}", self.descriptor().name(), period);

        self.poller = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                handle.measure();
            }
        }));
        true
    }

    pub fn stop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
            debug!("Stopped polling {}", self.descriptor().name());
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::TemperatureDriver;
    use parking_lot::Mutex;

    fn temperature_channel(rate: f64) -> Channel {
        let descriptor = ChannelDescriptor::temperature(1).with_sampling_rate(rate);
        Channel::new(Box::new(TemperatureDriver::new(descriptor)))
    }

    #[test]
    fn test_measure_notifies_subscribers() {
        let channel = temperature_channel(1.0);
        let seen: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        channel.handle().subscribe(Arc::new(move |_: &ChannelDescriptor, sample: Sample| sink.lock().push(sample.value)));

        let sample = channel.handle().measure();
        assert_eq!(*seen.lock(), vec![sample.value]);
        assert_eq!(channel.handle().last(), sample);
    }

    #[test]
    fn test_start_without_runtime() {
        let mut channel = temperature_channel(1.0);
        assert!(!channel.start());
        assert!(!channel.is_polling());
    }

    #[tokio::test]
    async fn test_polling_and_stop() {
        let mut channel = temperature_channel(100.0);
        let count = Arc::new(Mutex::new(0usize));
        let counter = count.clone();
        channel.handle().subscribe(Arc::new(move |_: &ChannelDescriptor, _: Sample| *counter.lock() += 1));

        assert!(channel.start());
        tokio::time::sleep(Duration::from_millis(100)).await;
        channel.stop();
        let after_stop = *count.lock();
        assert!(after_stop > 0, "poller should have measured");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*count.lock(), after_stop);
        assert!(!channel.is_polling());
    }

    #[test]
    fn test_poll_period_bounds() {
        assert_eq!(poll_period(100.0), Duration::from_millis(10));
        assert_eq!(poll_period(1e10), MIN_POLL_PERIOD);
        assert_eq!(poll_period(f64::MAX), MIN_POLL_PERIOD);
        assert_eq!(poll_period(1e-9), MAX_POLL_PERIOD);
    }

    #[tokio::test]
    async fn test_very_high_rate_still_polls() {
        let mut channel = temperature_channel(1e10);
        let count = Arc::new(Mutex::new(0usize));
        let counter = count.clone();
        channel.handle().subscribe(Arc::new(move |_: &ChannelDescriptor, _: Sample| *counter.lock() += 1));

        assert!(channel.start());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(channel.is_polling());
        assert!(*count.lock() > 0);
        channel.stop();
    }
}

use parking_lot::Mutex;
use std::sync::Arc;

use crate::driver::SimulationDriver;

pub type Shared<T> = Arc<Mutex<T>>;

/// Driver partagé entre le modèle machine, le poller du canal et les handles
/// remis à la couche protocole. Un seul verrou par driver.
pub type SharedDriver = Shared<Box<dyn SimulationDriver>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

//! Change notification from a job to its observers.
//!
//! Signals carry no payload: an observer that wakes up re-reads whatever job
//! fields it cares about.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};

pub trait Observer: Send + Sync {
    fn changed(&self);
}

impl<F> Observer for F
where
    F: Fn() + Send + Sync,
{
    fn changed(&self) {
        self()
    }
}

#[derive(Default)]
pub struct Notifier {
    observers: RwLock<Vec<Arc<dyn Observer>>>,
    channels: Mutex<Vec<Sender<()>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    /// One `()` per change lands on the returned receiver until it is dropped.
    pub fn channel(&self) -> Receiver<()> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut channels) = self.channels.lock() {
            channels.push(tx);
        }
        rx
    }

    pub fn notify(&self) {
        let observers = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(_) => Vec::new(),
        };
        for observer in observers {
            observer.changed();
        }
        if let Ok(mut channels) = self.channels.lock() {
            channels.retain(|tx| tx.send(()).is_ok());
        }
    }
}

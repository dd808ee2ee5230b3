//! Modem facade
//!
//! Owns one transmit path and one receive path and keeps them mutually
//! exclusive. Receive-side results reach collaborators as [`ModemEvent`]s
//! on per-subscriber channels.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::ModemConfig;
use crate::detector::{FrequencyReading, SpectralDetector};
use crate::error::{ModemError, Result};
use crate::sink::ToneSink;
use crate::spectrum::SpectrumSource;
use crate::symbol::SymbolDecoder;
use crate::transmitter::{ToneScheduler, Transmission};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModemState {
    Idle,
    Transmitting,
    Listening,
}

impl fmt::Display for ModemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModemState::Idle => "idle",
            ModemState::Transmitting => "transmitting",
            ModemState::Listening => "listening",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModemEvent {
    /// A reading that passed the detection threshold
    Frequency(FrequencyReading),
    /// One decoded character
    Message(String),
    /// A failure inside an active listen session
    Error(ModemError),
}

pub type SubscriberId = u64;

pub struct Subscription {
    pub id: SubscriberId,
    pub events: UnboundedReceiver<ModemEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModemStatus {
    pub state: ModemState,
    pub sink_attached: bool,
    pub bit_rate: f64,
    pub version: &'static str,
}

#[derive(Clone, Default)]
struct Subscribers {
    senders: Arc<Mutex<Vec<(SubscriberId, UnboundedSender<ModemEvent>)>>>,
    next_id: Arc<AtomicU64>,
}

impl Subscribers {
    fn add(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push((id, tx));
        Subscription { id, events: rx }
    }

    fn remove(&self, id: SubscriberId) -> bool {
        let mut senders = self.lock();
        let before = senders.len();
        senders.retain(|(existing, _)| *existing != id);
        senders.len() != before
    }

    /// Deliver to every subscriber, pruning those whose receiver is gone.
    fn emit(&self, event: ModemEvent) {
        self.lock().retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriberId, UnboundedSender<ModemEvent>)>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Modem {
    config: ModemConfig,
    scheduler: ToneScheduler,
    detector: SpectralDetector,
    subscribers: Subscribers,
}

impl Modem {
    pub fn new(config: ModemConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scheduler: ToneScheduler::new(&config),
            detector: SpectralDetector::from_config(&config),
            subscribers: Subscribers::default(),
            config,
        })
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    /// Replace the configuration. Only allowed while idle; an attached
    /// sink stays attached.
    pub fn set_config(&mut self, config: ModemConfig) -> Result<()> {
        if self.state() != ModemState::Idle {
            return Err(ModemError::Busy);
        }
        config.validate()?;
        let sink = self.scheduler.detach_sink();
        self.scheduler = ToneScheduler::new(&config);
        if let Some(sink) = sink {
            self.scheduler.attach_sink(sink);
        }
        self.detector = SpectralDetector::from_config(&config);
        self.config = config;
        Ok(())
    }

    pub fn attach_sink(&mut self, sink: Box<dyn ToneSink + Send>) -> Result<()> {
        if self.scheduler.is_transmitting() {
            return Err(ModemError::Busy);
        }
        self.scheduler.attach_sink(sink);
        Ok(())
    }

    pub fn detach_sink(&mut self) -> Option<Box<dyn ToneSink + Send>> {
        self.scheduler.detach_sink()
    }

    pub fn state(&self) -> ModemState {
        if self.scheduler.is_transmitting() {
            ModemState::Transmitting
        } else if self.detector.is_listening() {
            ModemState::Listening
        } else {
            ModemState::Idle
        }
    }

    pub fn status(&self) -> ModemStatus {
        ModemStatus {
            state: self.state(),
            sink_attached: self.scheduler.has_sink(),
            bit_rate: self.scheduler.bit_rate(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.subscribers.add()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn scheduler(&self) -> &ToneScheduler {
        &self.scheduler
    }

    pub fn detector(&self) -> &SpectralDetector {
        &self.detector
    }

    /// Start transmitting `text`. Fails with `Busy` unless idle.
    pub fn transmit(&mut self, text: &str) -> Result<Transmission> {
        if self.state() != ModemState::Idle {
            return Err(ModemError::Busy);
        }
        self.scheduler.transmit(text)
    }

    pub fn stop_transmitting(&mut self) {
        self.scheduler.stop();
    }

    /// Start decoding from `source`. Fails with `Busy` unless idle, or
    /// with the source's `DeviceError`.
    ///
    /// Each decoded character is published as its own `Message` event.
    /// The session ends by itself when the input reports `StreamEnded`.
    pub fn listen(&mut self, source: Box<dyn SpectrumSource + Send>) -> Result<()> {
        if self.state() != ModemState::Idle {
            return Err(ModemError::Busy);
        }

        let mut decoder = SymbolDecoder::from_config(&self.config);
        let subscribers = self.subscribers.clone();
        self.detector.start(source, move |outcome| match outcome {
            Ok(Some(reading)) => {
                subscribers.emit(ModemEvent::Frequency(reading));
                if let Some(character) = decoder.push(Some(&reading)) {
                    log::debug!("decoded {:?}", character);
                    subscribers.emit(ModemEvent::Message(character.to_string()));
                }
                ControlFlow::Continue(())
            }
            Ok(None) => ControlFlow::Continue(()),
            Err(ModemError::StreamEnded) => {
                log::info!("input stream ended");
                subscribers.emit(ModemEvent::Error(ModemError::StreamEnded));
                ControlFlow::Break(())
            }
            Err(err) => {
                log::warn!("capture failed: {}", err);
                subscribers.emit(ModemEvent::Error(err));
                ControlFlow::Continue(())
            }
        })
    }

    pub fn stop_listening(&mut self) {
        self.detector.stop();
    }

    /// Stop whichever path is active.
    pub fn stop(&mut self) {
        self.stop_transmitting();
        self.stop_listening();
    }
}

//! Acoustic text modem
//!
//! Binary FSK with one tone per bit: bit 0 on the base frequency, bit 1 one
//! shift above it, 8 bits per ASCII character. Receiving polls the spectrum
//! of an input stream and keeps the dominant frequency of each frame.

pub mod codec;
pub mod config;
pub mod detector;
pub mod error;
pub mod modem;
pub mod schedule;
pub mod sink;
pub mod spectrum;
pub mod symbol;
pub mod tone;
pub mod transmitter;

pub use codec::{Bit, BitStream};
pub use config::ModemConfig;
pub use detector::{FrequencyReading, SpectralDetector};
pub use error::{ModemError, Result};
pub use modem::{Modem, ModemEvent, ModemState, ModemStatus, Subscription};
pub use sink::{RenderSink, ToneSink};
pub use spectrum::{CaptureConstraints, SampleSpectrumSource, SpectrumFrame, SpectrumSource};
pub use symbol::SymbolDecoder;
pub use tone::{Envelope, FrequencyMap, ToneSpec, TransmissionPlan};
pub use transmitter::{Completion, ToneScheduler, Transmission};

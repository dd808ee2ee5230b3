//! Modem configuration
//!
//! Every field is optional when deserialised; missing fields take the
//! defaults below. The defaults are kept exactly as the web modem shipped
//! them, including the symbol duration being shorter than both the envelope
//! ramp and the detector polling interval.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ModemError, Result};

/// Carrier for bit 0 (Hz)
pub const DEFAULT_BASE_FREQUENCY: f32 = 18000.0;

/// Offset of the bit 1 carrier above the base frequency (Hz)
pub const DEFAULT_FREQUENCY_SHIFT: f32 = 1000.0;

pub const DEFAULT_SYMBOL_DURATION_MS: f64 = 2.0;

/// Fraction of full scale driven onto the shared output gain
pub const DEFAULT_AMPLITUDE: f32 = 0.3;

pub const DEFAULT_RAMP_MS: f64 = 10.0;

/// Silence appended after the last symbol before a transmission resolves
pub const DEFAULT_GUARD_MS: u64 = 500;

/// Detection threshold relative to full-scale magnitude (dB)
pub const DEFAULT_THRESHOLD_DB: f32 = -30.0;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Magnitude bins per spectrum frame (an analyser FFT size of 2048)
pub const DEFAULT_BIN_COUNT: usize = 1024;

/// Half-width of the classification window around each carrier (Hz)
pub const DEFAULT_TOLERANCE_HZ: f32 = 250.0;

/// Sample rate used when tones are rendered in software
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    pub base_frequency: f32,
    pub frequency_shift: f32,
    pub symbol_duration_ms: f64,
    pub amplitude: f32,
    pub ramp_ms: f64,
    pub guard_ms: u64,
    pub threshold_db: f32,
    pub poll_interval_ms: u64,
    pub bin_count: usize,
    pub tolerance_hz: f32,
    pub sample_rate: u32,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            base_frequency: DEFAULT_BASE_FREQUENCY,
            frequency_shift: DEFAULT_FREQUENCY_SHIFT,
            symbol_duration_ms: DEFAULT_SYMBOL_DURATION_MS,
            amplitude: DEFAULT_AMPLITUDE,
            ramp_ms: DEFAULT_RAMP_MS,
            guard_ms: DEFAULT_GUARD_MS,
            threshold_db: DEFAULT_THRESHOLD_DB,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            bin_count: DEFAULT_BIN_COUNT,
            tolerance_hz: DEFAULT_TOLERANCE_HZ,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl ModemConfig {
    /// Reject values that would make a plan or a detector meaningless.
    ///
    /// The ramp is deliberately not checked against the symbol duration:
    /// a ramp longer than half a symbol turns the envelope into a triangle
    /// that never reaches full gain, which is the shipped behaviour.
    pub fn validate(&self) -> Result<()> {
        let floats = [
            ("base frequency", self.base_frequency as f64),
            ("frequency shift", self.frequency_shift as f64),
            ("symbol duration", self.symbol_duration_ms),
            ("amplitude", self.amplitude as f64),
            ("ramp", self.ramp_ms),
            ("threshold", self.threshold_db as f64),
            ("tolerance", self.tolerance_hz as f64),
        ];
        if let Some((name, value)) = floats.iter().find(|(_, value)| !value.is_finite()) {
            return Err(ModemError::InvalidConfig(format!(
                "{} must be finite, got {}",
                name, value
            )));
        }

        if self.base_frequency <= 0.0 {
            return Err(ModemError::InvalidConfig(format!(
                "base frequency must be positive, got {}",
                self.base_frequency
            )));
        }
        if self.frequency_shift <= 0.0 {
            return Err(ModemError::InvalidConfig(format!(
                "frequency shift must be positive, got {}",
                self.frequency_shift
            )));
        }
        if self.symbol_duration_ms <= 0.0 {
            return Err(ModemError::InvalidConfig(format!(
                "symbol duration must be positive, got {} ms",
                self.symbol_duration_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.amplitude) {
            return Err(ModemError::InvalidConfig(format!(
                "amplitude must be within [0, 1], got {}",
                self.amplitude
            )));
        }
        if self.ramp_ms < 0.0 {
            return Err(ModemError::InvalidConfig(format!(
                "ramp must not be negative, got {} ms",
                self.ramp_ms
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ModemError::InvalidConfig(
                "polling interval must be at least 1 ms".to_string(),
            ));
        }
        if self.bin_count == 0 {
            return Err(ModemError::InvalidConfig(
                "bin count must be positive".to_string(),
            ));
        }
        if self.tolerance_hz <= 0.0 {
            return Err(ModemError::InvalidConfig(format!(
                "tolerance must be positive, got {} Hz",
                self.tolerance_hz
            )));
        }
        if self.sample_rate == 0 {
            return Err(ModemError::InvalidConfig(
                "sample rate must be positive".to_string(),
            ));
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        if self.base_frequency + self.frequency_shift >= nyquist {
            log::warn!(
                "carrier {} Hz is at or above the render Nyquist frequency {} Hz",
                self.base_frequency + self.frequency_shift,
                nyquist
            );
        }
        Ok(())
    }

    /// Symbol duration in seconds
    pub fn symbol_duration(&self) -> f64 {
        self.symbol_duration_ms / 1000.0
    }

    /// Envelope ramp in seconds
    pub fn ramp(&self) -> f64 {
        self.ramp_ms / 1000.0
    }

    pub fn guard(&self) -> Duration {
        Duration::from_millis(self.guard_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bits per second implied by the symbol duration
    pub fn bit_rate(&self) -> f64 {
        1.0 / self.symbol_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_shipped_parameters() {
        let config = ModemConfig::default();
        assert_eq!(config.base_frequency, 18000.0);
        assert_eq!(config.frequency_shift, 1000.0);
        assert_eq!(config.symbol_duration_ms, 2.0);
        assert_eq!(config.amplitude, 0.3);
        assert_eq!(config.ramp_ms, 10.0);
        assert_eq!(config.guard_ms, 500);
        assert_eq!(config.threshold_db, -30.0);
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.bin_count, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_timing_cannot_resolve_symbols() {
        // One reading per 100 ms against 2 ms symbols, and a 10 ms ramp on a
        // 2 ms tone. Kept as shipped; this test pins the mismatch.
        let config = ModemConfig::default();
        let symbol = config.symbol_duration();
        assert!(config.poll_interval().as_secs_f64() > symbol);
        assert!(config.ramp() > symbol);
        assert!((config.bit_rate() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            ModemConfig { base_frequency: 0.0, ..Default::default() },
            ModemConfig { frequency_shift: -1.0, ..Default::default() },
            ModemConfig { symbol_duration_ms: 0.0, ..Default::default() },
            ModemConfig { amplitude: 1.5, ..Default::default() },
            ModemConfig { ramp_ms: -2.0, ..Default::default() },
            ModemConfig { poll_interval_ms: 0, ..Default::default() },
            ModemConfig { bin_count: 0, ..Default::default() },
            ModemConfig { tolerance_hz: 0.0, ..Default::default() },
            ModemConfig { sample_rate: 0, ..Default::default() },
            ModemConfig { symbol_duration_ms: f64::INFINITY, ..Default::default() },
            ModemConfig { symbol_duration_ms: f64::NAN, ..Default::default() },
            ModemConfig { base_frequency: f32::INFINITY, ..Default::default() },
            ModemConfig { ramp_ms: f64::INFINITY, ..Default::default() },
            ModemConfig { threshold_db: f32::NEG_INFINITY, ..Default::default() },
            ModemConfig { tolerance_hz: f32::INFINITY, ..Default::default() },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(ModemError::InvalidConfig(_))),
                "accepted {:?}",
                config
            );
        }
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ModemConfig =
            serde_json::from_str(r#"{"symbol_duration_ms": 100.0, "base_frequency": 17000.0}"#)
                .unwrap();
        assert_eq!(config.symbol_duration_ms, 100.0);
        assert_eq!(config.base_frequency, 17000.0);
        assert_eq!(config.frequency_shift, DEFAULT_FREQUENCY_SHIFT);
        assert_eq!(config.bin_count, DEFAULT_BIN_COUNT);
    }
}

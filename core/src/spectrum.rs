//! Spectrum frames and the input streams that produce them
//!
//! Frames carry byte magnitudes in the analyser convention: each bin is
//! the windowed FFT magnitude in dB, mapped linearly from
//! [`ANALYSER_MIN_DB`, `ANALYSER_MAX_DB`] onto 0..=255.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::{ModemError, Result};

/// Largest representable bin magnitude
pub const FULL_SCALE: u8 = 255;

pub const ANALYSER_MIN_DB: f32 = -100.0;
pub const ANALYSER_MAX_DB: f32 = -30.0;

/// Analyser FFT sizes must be a power of two in this range
pub const MIN_FFT_SIZE: usize = 32;
pub const MAX_FFT_SIZE: usize = 32768;

#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    /// Magnitudes from 0 Hz up to Nyquist, one per bin
    pub magnitudes: Vec<u8>,
    pub sample_rate: f32,
}

impl SpectrumFrame {
    pub fn new(magnitudes: Vec<u8>, sample_rate: f32) -> Self {
        Self {
            magnitudes,
            sample_rate,
        }
    }

    /// A frame of silence
    pub fn zeroed(bin_count: usize, sample_rate: f32) -> Self {
        Self::new(vec![0; bin_count], sample_rate)
    }

    pub fn bin_count(&self) -> usize {
        self.magnitudes.len()
    }

    /// Width of one bin in Hz
    pub fn bin_width(&self) -> f32 {
        (self.sample_rate / 2.0) / self.bin_count() as f32
    }

    /// Lower edge frequency of `bin`
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * (self.sample_rate / 2.0) / self.bin_count() as f32
    }
}

/// Capture settings requested when an input stream is acquired
///
/// Echo cancellation, noise suppression and automatic gain control all
/// distort tone amplitude and frequency, so raw capture is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub bin_count: usize,
}

impl CaptureConstraints {
    pub fn raw(bin_count: usize) -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
            bin_count,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.bin_count * 2
    }
}

/// A live capture handle that produces spectrum snapshots on demand
pub trait SpectrumSource {
    /// Open the underlying input. Fails with `DeviceError` when the device
    /// is unavailable or access is denied.
    fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<()>;

    fn sample_rate(&self) -> f32;

    /// Snapshot the current spectrum.
    fn capture(&mut self) -> Result<SpectrumFrame>;

    /// Close the input. Safe to call when not acquired.
    fn release(&mut self);
}

/// Reject analyser sizes the Web Audio `AnalyserNode` would refuse.
pub fn validate_fft_size(fft_size: usize) -> Result<()> {
    if fft_size.is_power_of_two() && (MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size) {
        Ok(())
    } else {
        Err(ModemError::DeviceError(format!(
            "unsupported analyser size {} (must be a power of two in {}..={})",
            fft_size, MIN_FFT_SIZE, MAX_FFT_SIZE
        )))
    }
}

fn blackman_window(len: usize) -> Vec<f32> {
    let n = len as f32;
    (0..len)
        .map(|i| {
            let x = 2.0 * PI * i as f32 / n;
            0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
        })
        .collect()
}

fn magnitude_to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = (db - ANALYSER_MIN_DB) / (ANALYSER_MAX_DB - ANALYSER_MIN_DB) * FULL_SCALE as f32;
    scaled.clamp(0.0, FULL_SCALE as f32) as u8
}

/// Byte-magnitude analyser over a window of PCM samples
pub struct Analyser {
    fft_size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl Analyser {
    pub fn new(bin_count: usize) -> Result<Self> {
        let fft_size = bin_count * 2;
        validate_fft_size(fft_size)?;
        Ok(Self {
            fft_size,
            window: blackman_window(fft_size),
            fft: FftPlanner::new().plan_fft_forward(fft_size),
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Analyse the `fft_size` samples ending at `end` (exclusive).
    ///
    /// Positions before the start or past the end of `samples` read as
    /// silence.
    pub fn analyse(&self, samples: &[f32], end: usize, sample_rate: f32) -> SpectrumFrame {
        let start = end as isize - self.fft_size as isize;
        let mut buffer: Vec<Complex<f32>> = self
            .window
            .iter()
            .enumerate()
            .map(|(i, &weight)| {
                let index = start + i as isize;
                let sample = if index >= 0 {
                    samples.get(index as usize).copied().unwrap_or(0.0)
                } else {
                    0.0
                };
                Complex::new(sample * weight, 0.0)
            })
            .collect();

        self.fft.process(&mut buffer);

        let norm = 1.0 / self.fft_size as f32;
        let magnitudes = buffer[..self.bin_count()]
            .iter()
            .map(|bin| magnitude_to_byte(bin.norm() * norm))
            .collect();

        SpectrumFrame::new(magnitudes, sample_rate)
    }
}

/// Input stream over a recorded PCM buffer
///
/// Every capture analyses the window ending at a cursor, then moves the
/// cursor forward by `hop` samples. Polling with a hop equal to the polling
/// interval replays the recording in real time.
pub struct SampleSpectrumSource {
    samples: Vec<f32>,
    sample_rate: u32,
    hop: usize,
    cursor: usize,
    analyser: Option<Analyser>,
}

impl SampleSpectrumSource {
    pub fn new(samples: Vec<f32>, sample_rate: u32, hop: usize) -> Self {
        Self {
            samples,
            sample_rate,
            hop: hop.max(1),
            cursor: 0,
            analyser: None,
        }
    }

    /// Position of the first analysis window's end, in samples.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.cursor = offset;
        self
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor > self.samples.len()
    }
}

impl SpectrumSource for SampleSpectrumSource {
    fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ModemError::DeviceError("input has no sample rate".to_string()));
        }
        self.analyser = Some(Analyser::new(constraints.bin_count)?);
        log::debug!(
            "acquired sample input: {} samples at {} Hz, hop {}",
            self.samples.len(),
            self.sample_rate,
            self.hop
        );
        Ok(())
    }

    fn sample_rate(&self) -> f32 {
        self.sample_rate as f32
    }

    fn capture(&mut self) -> Result<SpectrumFrame> {
        if self.is_exhausted() {
            return Err(ModemError::StreamEnded);
        }
        let sample_rate = self.sample_rate as f32;
        let analyser = self
            .analyser
            .as_ref()
            .ok_or_else(|| ModemError::DeviceError("input not acquired".to_string()))?;
        let frame = analyser.analyse(&self.samples, self.cursor, sample_rate);
        self.cursor += self.hop;
        Ok(frame)
    }

    fn release(&mut self) {
        if self.analyser.take().is_some() {
            log::debug!("released sample input at cursor {}", self.cursor);
        }
    }
}

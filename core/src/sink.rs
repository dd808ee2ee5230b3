//! Audio output sinks
//!
//! A sink accepts tone bursts against its own monotonic clock plus a single
//! shared gain control. `RenderSink` is the software implementation: it
//! records everything scheduled on a virtual clock and renders PCM on demand.

use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::tone::{Envelope, ToneSpec};

pub trait ToneSink {
    /// Monotonic clock used as the scheduling time base (seconds)
    fn current_time(&self) -> f64;

    /// Set the shared output gain from time `at` onward.
    fn set_gain(&mut self, value: f32, at: f64);

    /// Commit one tone burst shaped by `envelope`.
    fn schedule_tone(&mut self, tone: &ToneSpec, envelope: &Envelope) -> Result<()>;

    /// Drop the shared gain to zero immediately. Tones already committed
    /// stay scheduled.
    fn silence(&mut self);
}

#[derive(Debug, Default)]
struct RenderState {
    clock: f64,
    tones: Vec<(ToneSpec, Envelope)>,
    // (time, value) pairs, kept sorted by time
    gain: Vec<(f64, f32)>,
}

impl RenderState {
    fn gain_at(&self, t: f64) -> f32 {
        self.gain
            .iter()
            .take_while(|(time, _)| *time <= t)
            .last()
            .map_or(1.0, |&(_, value)| value)
    }
}

/// Software sink that synthesises scheduled tones into mono PCM
///
/// Cloning yields another handle to the same sink, so a caller can keep one
/// handle to render from while the modem owns the other.
#[derive(Debug, Clone)]
pub struct RenderSink {
    sample_rate: u32,
    state: Arc<Mutex<RenderState>>,
}

impl RenderSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: Arc::new(Mutex::new(RenderState::default())),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn state(&self) -> MutexGuard<'_, RenderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, seconds: f64) {
        self.state().clock += seconds.max(0.0);
    }

    pub fn scheduled(&self) -> Vec<ToneSpec> {
        self.state().tones.iter().map(|(tone, _)| *tone).collect()
    }

    pub fn gain_events(&self) -> Vec<(f64, f32)> {
        self.state().gain.clone()
    }

    /// Render from clock zero to the end of the last tone.
    pub fn render(&self) -> Vec<f32> {
        let state = self.state();
        let end = state
            .tones
            .iter()
            .map(|(tone, _)| tone.end)
            .fold(0.0, f64::max);
        let rate = self.sample_rate as f64;
        let total = (end * rate).ceil() as usize;
        let mut samples = vec![0.0f32; total];

        for (tone, envelope) in &state.tones {
            let first = (tone.start * rate).ceil().max(0.0) as usize;
            let last = ((tone.end * rate).ceil() as usize).min(total);
            let angular = 2.0 * PI * tone.frequency as f64;
            for (i, sample) in samples.iter_mut().enumerate().take(last).skip(first) {
                let t = i as f64 / rate;
                // Phase restarts with every tone, like a fresh oscillator
                let phase = angular * (t - tone.start);
                *sample += phase.sin() as f32 * envelope.gain_at(tone, t) * state.gain_at(t);
            }
        }

        samples
    }
}

impl ToneSink for RenderSink {
    fn current_time(&self) -> f64 {
        self.state().clock
    }

    fn set_gain(&mut self, value: f32, at: f64) {
        let mut state = self.state();
        let index = state.gain.partition_point(|(time, _)| *time <= at);
        state.gain.insert(index, (at, value));
    }

    fn schedule_tone(&mut self, tone: &ToneSpec, envelope: &Envelope) -> Result<()> {
        self.state().tones.push((*tone, *envelope));
        Ok(())
    }

    fn silence(&mut self) {
        let now = self.current_time();
        self.set_gain(0.0, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_render_length_and_level() {
        let mut sink = RenderSink::new(48000);
        let tone = ToneSpec { frequency: 1000.0, start: 0.0, end: 0.1 };
        sink.set_gain(0.5, 0.0);
        sink.schedule_tone(&tone, &Envelope::new(0.0)).unwrap();

        let samples = sink.render();
        assert_eq!(samples.len(), 4800);
        let level = rms(&samples);
        assert!((level - 0.5 / 2f32.sqrt()).abs() < 0.01, "rms={}", level);
    }

    #[test]
    fn test_render_applies_envelope() {
        let mut sink = RenderSink::new(48000);
        let tone = ToneSpec { frequency: 1000.0, start: 0.0, end: 0.1 };
        sink.schedule_tone(&tone, &Envelope::new(0.02)).unwrap();

        let samples = sink.render();
        let edge = rms(&samples[..96]);
        let middle = rms(&samples[2400..2496]);
        assert!(edge < middle * 0.2, "edge={} middle={}", edge, middle);
        assert!(samples[0].abs() < 1e-6);
    }

    #[test]
    fn test_gain_is_piecewise_constant() {
        let mut sink = RenderSink::new(8000);
        sink.set_gain(0.3, 1.0);
        sink.set_gain(0.0, 0.0);
        assert_eq!(sink.gain_events(), vec![(0.0, 0.0), (1.0, 0.3)]);

        let state = sink.state();
        assert_eq!(state.gain_at(0.5), 0.0);
        assert_eq!(state.gain_at(1.0), 0.3);
        assert_eq!(state.gain_at(7.0), 0.3);
    }

    #[test]
    fn test_silence_mutes_from_now_without_unscheduling() {
        let mut sink = RenderSink::new(8000);
        let tone = ToneSpec { frequency: 500.0, start: 0.0, end: 1.0 };
        sink.set_gain(1.0, 0.0);
        sink.schedule_tone(&tone, &Envelope::new(0.0)).unwrap();

        sink.advance(0.5);
        sink.silence();

        assert_eq!(sink.scheduled().len(), 1);
        let samples = sink.render();
        assert!(rms(&samples[1000..3000]) > 0.5);
        assert!(samples[4000..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_clones_share_state() {
        let sink = RenderSink::new(8000);
        let mut handle = sink.clone();
        handle.advance(2.0);
        handle.set_gain(0.1, 2.0);
        assert_eq!(sink.current_time(), 2.0);
        assert_eq!(sink.gain_events().len(), 1);
    }
}

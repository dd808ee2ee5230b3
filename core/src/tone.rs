use serde::{Deserialize, Serialize};

use crate::codec::Bit;

/// One scheduled tone burst on the output sink's clock (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneSpec {
    pub frequency: f32,
    pub start: f64,
    pub end: f64,
}

impl ToneSpec {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }
}

/// Binary FSK carrier pair: bit 0 on the base frequency, bit 1 one shift above it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyMap {
    pub base: f32,
    pub shift: f32,
}

impl FrequencyMap {
    pub fn new(base: f32, shift: f32) -> Self {
        Self { base, shift }
    }

    pub fn frequency_for(&self, bit: Bit) -> f32 {
        match bit {
            Bit::Zero => self.base,
            Bit::One => self.base + self.shift,
        }
    }
}

/// Contiguous tones, one per bit, each exactly one symbol long
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionPlan {
    pub symbol_duration: f64,
    pub tones: Vec<ToneSpec>,
}

impl TransmissionPlan {
    /// Lay out one tone per bit starting at `start`.
    ///
    /// Symbol boundaries are computed from the index rather than by
    /// accumulating durations, so `tones[i].end == tones[i + 1].start` holds
    /// exactly.
    pub fn build(bits: &[Bit], map: FrequencyMap, start: f64, symbol_duration: f64) -> Self {
        let boundary = |i: usize| start + i as f64 * symbol_duration;
        let tones = bits
            .iter()
            .enumerate()
            .map(|(i, &bit)| ToneSpec {
                frequency: map.frequency_for(bit),
                start: boundary(i),
                end: boundary(i + 1),
            })
            .collect();
        Self {
            symbol_duration,
            tones,
        }
    }

    pub fn len(&self) -> usize {
        self.tones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tones.is_empty()
    }

    pub fn start(&self) -> Option<f64> {
        self.tones.first().map(|tone| tone.start)
    }

    pub fn end(&self) -> Option<f64> {
        self.tones.last().map(|tone| tone.end)
    }

    /// Total airtime, zero for an empty plan
    pub fn duration(&self) -> f64 {
        self.tones.len() as f64 * self.symbol_duration
    }
}

/// Linear attack/decay applied to every tone to keep amplitude steps from clicking
///
/// The shape is 0 at the tone start, rising linearly over `ramp`, holding
/// at 1, and falling linearly so it reaches 0 exactly at the tone end. When
/// the ramp is longer than half the tone the two slopes meet below 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub ramp: f64,
}

/// One gain automation step, in the order a Web Audio style param expects
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GainPoint {
    SetValue { value: f32, time: f64 },
    LinearRamp { value: f32, time: f64 },
}

impl Envelope {
    pub fn new(ramp: f64) -> Self {
        Self { ramp }
    }

    /// Envelope gain at time `t`; zero outside the tone.
    pub fn gain_at(&self, tone: &ToneSpec, t: f64) -> f32 {
        if !tone.contains(t) {
            return 0.0;
        }
        if self.ramp <= 0.0 {
            return 1.0;
        }
        let rise = (t - tone.start) / self.ramp;
        let fall = (tone.end - t) / self.ramp;
        rise.min(fall).clamp(0.0, 1.0) as f32
    }

    pub fn automation(&self, tone: &ToneSpec) -> [GainPoint; 4] {
        [
            GainPoint::SetValue { value: 0.0, time: tone.start },
            GainPoint::LinearRamp { value: 1.0, time: tone.start + self.ramp },
            GainPoint::SetValue { value: 1.0, time: tone.end - self.ramp },
            GainPoint::LinearRamp { value: 0.0, time: tone.end },
        ]
    }
}

use wasm_bindgen::prelude::*;
use web_sys::{console, AnalyserNode, AudioContext, GainNode, OscillatorType};

use tonewave_core::spectrum::validate_fft_size;
use tonewave_core::tone::GainPoint;
use tonewave_core::transmitter::realize_plan;
use tonewave_core::{
    CaptureConstraints, Envelope, ModemConfig, ModemError, SpectralDetector, SpectrumFrame,
    SymbolDecoder, ToneScheduler, ToneSink, ToneSpec,
};

fn to_js(err: impl std::fmt::Display) -> JsValue {
    js_sys::Error::new(&err.to_string()).into()
}

/// Parse an optional JSON config; missing fields take their defaults
fn parse_config(config_json: Option<String>) -> Result<ModemConfig, JsValue> {
    let config = match config_json {
        Some(json) => serde_json::from_str(&json).map_err(to_js)?,
        None => ModemConfig::default(),
    };
    config.validate().map_err(to_js)?;
    Ok(config)
}

/// Web Audio output: one oscillator and envelope gain per tone, all
/// feeding a shared master gain
struct WebAudioSink {
    context: AudioContext,
    master: GainNode,
}

impl WebAudioSink {
    fn new(context: AudioContext) -> Result<Self, JsValue> {
        let master = context.create_gain()?;
        master.connect_with_audio_node(&context.destination())?;
        Ok(Self { context, master })
    }

    fn try_schedule(&self, tone: &ToneSpec, envelope: &Envelope) -> Result<(), JsValue> {
        let oscillator = self.context.create_oscillator()?;
        oscillator.set_type(OscillatorType::Sine);
        oscillator.frequency().set_value(tone.frequency);

        let shaper = self.context.create_gain()?;
        let gain = shaper.gain();
        for point in envelope.automation(tone) {
            match point {
                GainPoint::SetValue { value, time } => gain.set_value_at_time(value, time)?,
                GainPoint::LinearRamp { value, time } => {
                    gain.linear_ramp_to_value_at_time(value, time)?
                }
            };
        }

        oscillator.connect_with_audio_node(&shaper)?;
        shaper.connect_with_audio_node(&self.master)?;
        oscillator.start_with_when(tone.start)?;
        oscillator.stop_with_when(tone.end)?;
        Ok(())
    }
}

impl ToneSink for WebAudioSink {
    fn current_time(&self) -> f64 {
        self.context.current_time()
    }

    fn set_gain(&mut self, value: f32, at: f64) {
        if let Err(err) = self.master.gain().set_value_at_time(value, at) {
            console::warn_2(&JsValue::from_str("failed to set output gain"), &err);
        }
    }

    fn schedule_tone(&mut self, tone: &ToneSpec, envelope: &Envelope) -> tonewave_core::Result<()> {
        self.try_schedule(tone, envelope)
            .map_err(|err| ModemError::DeviceError(format!("{:?}", err)))
    }

    fn silence(&mut self) {
        self.master.gain().set_value(0.0);
    }
}

/// Browser transmitter
///
/// Tones are committed to the audio graph in one go; the transmitter stays
/// busy until the audio clock passes the end of the plan plus the guard
/// interval, so JS can await `transmit`'s returned delay with a timer.
#[wasm_bindgen]
pub struct WasmTransmitter {
    scheduler: ToneScheduler,
    sink: WebAudioSink,
    amplitude: f32,
    guard: f64,
    busy_until: f64,
}

#[wasm_bindgen]
impl WasmTransmitter {
    #[wasm_bindgen(constructor)]
    pub fn new(context: AudioContext, config_json: Option<String>) -> Result<WasmTransmitter, JsValue> {
        let config = parse_config(config_json)?;
        Ok(WasmTransmitter {
            scheduler: ToneScheduler::new(&config),
            sink: WebAudioSink::new(context)?,
            amplitude: config.amplitude,
            guard: config.guard().as_secs_f64(),
            busy_until: f64::NEG_INFINITY,
        })
    }

    #[wasm_bindgen(js_name = isTransmitting)]
    pub fn is_transmitting(&self) -> bool {
        self.sink.current_time() < self.busy_until
    }

    /// Schedule `text` and return milliseconds until the transmission
    /// resolves.
    #[wasm_bindgen]
    pub fn transmit(&mut self, text: &str) -> Result<f64, JsValue> {
        if self.is_transmitting() {
            return Err(to_js(ModemError::Busy));
        }
        let now = self.sink.current_time();
        let plan = self.scheduler.plan_text(text, now).map_err(to_js)?;
        realize_plan(&mut self.sink, &plan, &self.scheduler.envelope(), self.amplitude)
            .map_err(to_js)?;

        let resolves_after = plan.duration() + self.guard;
        self.busy_until = now + resolves_after;
        Ok(resolves_after * 1000.0)
    }

    #[wasm_bindgen]
    pub fn stop(&mut self) {
        if self.is_transmitting() {
            self.sink.silence();
        }
        self.busy_until = f64::NEG_INFINITY;
    }

    /// Frequency used for bit 0 or 1
    #[wasm_bindgen(js_name = frequencyFor)]
    pub fn frequency_for(&self, bit: bool) -> f32 {
        self.scheduler.frequency_for(bit.into())
    }
}

/// Browser receiver over an `AnalyserNode`; JS drives `poll` from its own
/// interval timer
#[wasm_bindgen]
pub struct WasmReceiver {
    analyser: AnalyserNode,
    sample_rate: f32,
    detector: SpectralDetector,
    decoder: SymbolDecoder,
    buffer: Vec<u8>,
    last_frequency: Option<f32>,
}

#[wasm_bindgen]
impl WasmReceiver {
    #[wasm_bindgen(constructor)]
    pub fn new(
        analyser: AnalyserNode,
        sample_rate: f32,
        config_json: Option<String>,
    ) -> Result<WasmReceiver, JsValue> {
        let config = parse_config(config_json)?;
        let fft_size = CaptureConstraints::raw(config.bin_count).fft_size();
        validate_fft_size(fft_size).map_err(to_js)?;
        analyser.set_fft_size(fft_size as u32);
        let bins = analyser.frequency_bin_count() as usize;
        Ok(WasmReceiver {
            analyser,
            sample_rate,
            detector: SpectralDetector::from_config(&config),
            decoder: SymbolDecoder::from_config(&config),
            buffer: vec![0; bins],
            last_frequency: None,
        })
    }

    /// Capture one spectrum and return a decoded character, if one completed.
    #[wasm_bindgen]
    pub fn poll(&mut self) -> Option<String> {
        self.analyser.get_byte_frequency_data(&mut self.buffer);
        let frame = SpectrumFrame::new(self.buffer.clone(), self.sample_rate);
        let reading = self.detector.analyze(&frame);
        self.last_frequency = reading.as_ref().map(|r| r.frequency);
        self.decoder.push(reading.as_ref()).map(String::from)
    }

    /// Dominant frequency seen by the last `poll`
    #[wasm_bindgen(js_name = lastFrequency)]
    pub fn last_frequency(&self) -> Option<f32> {
        self.last_frequency
    }

    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.last_frequency = None;
    }
}

/// Text to its 8-bit-per-character binary form
#[wasm_bindgen(js_name = textToBinary)]
pub fn text_to_binary(text: &str) -> Result<String, JsValue> {
    tonewave_core::codec::encode(text)
        .map(|bits| tonewave_core::codec::format_bits(&bits))
        .map_err(to_js)
}

/// Binary form back to text; trailing partial groups are dropped
#[wasm_bindgen(js_name = binaryToText)]
pub fn binary_to_text(binary: &str) -> Result<String, JsValue> {
    tonewave_core::codec::decode_str(binary).map_err(to_js)
}

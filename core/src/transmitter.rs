//! Transmit path: bits to scheduled, envelope-shaped tones
//!
//! All tones of a message are committed to the sink up front, against the
//! sink's own clock. The transmission then resolves through a deferred task
//! once the plan and a trailing guard interval have elapsed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::codec::{self, Bit};
use crate::config::ModemConfig;
use crate::error::{ModemError, Result};
use crate::schedule::{self, TaskHandle};
use crate::sink::ToneSink;
use crate::tone::{Envelope, FrequencyMap, TransmissionPlan};

/// How a transmission ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Completed,
    Stopped,
}

type Finisher = Arc<Mutex<Option<oneshot::Sender<Completion>>>>;

fn finish(finisher: &Finisher, completion: Completion) {
    let sender = finisher.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(sender) = sender {
        // The caller may have dropped its handle; nothing to report then
        let _ = sender.send(completion);
    }
}

/// Pending transmission returned by [`ToneScheduler::transmit`]
#[derive(Debug)]
pub struct Transmission {
    plan: TransmissionPlan,
    resolves_after: Duration,
    done: oneshot::Receiver<Completion>,
}

impl Transmission {
    pub fn plan(&self) -> &TransmissionPlan {
        &self.plan
    }

    /// Plan airtime plus the guard interval
    pub fn resolves_after(&self) -> Duration {
        self.resolves_after
    }

    /// Wait until the transmission completes or is stopped.
    pub async fn finished(self) -> Completion {
        self.done.await.unwrap_or(Completion::Stopped)
    }
}

/// Commit every tone of `plan` to `sink`.
///
/// The shared gain is pinned to zero at the sink's current time and raised
/// to `amplitude` when the first symbol starts.
pub fn realize_plan(
    sink: &mut dyn ToneSink,
    plan: &TransmissionPlan,
    envelope: &Envelope,
    amplitude: f32,
) -> Result<()> {
    let Some(start) = plan.start() else {
        return Ok(());
    };
    sink.set_gain(0.0, sink.current_time());
    sink.set_gain(amplitude, start);
    for tone in &plan.tones {
        sink.schedule_tone(tone, envelope)?;
    }
    Ok(())
}

pub struct ToneScheduler {
    map: FrequencyMap,
    symbol_duration: f64,
    amplitude: f32,
    envelope: Envelope,
    guard: Duration,
    sink: Option<Box<dyn ToneSink + Send>>,
    active: Arc<AtomicBool>,
    completion: Option<TaskHandle>,
    finisher: Finisher,
}

impl ToneScheduler {
    pub fn new(config: &ModemConfig) -> Self {
        Self {
            map: FrequencyMap::new(config.base_frequency, config.frequency_shift),
            symbol_duration: config.symbol_duration(),
            amplitude: config.amplitude,
            envelope: Envelope::new(config.ramp()),
            guard: config.guard(),
            sink: None,
            active: Arc::new(AtomicBool::new(false)),
            completion: None,
            finisher: Arc::new(Mutex::new(None)),
        }
    }

    pub fn attach_sink(&mut self, sink: Box<dyn ToneSink + Send>) {
        self.sink = Some(sink);
    }

    /// Detach the sink, stopping any transmission first.
    pub fn detach_sink(&mut self) -> Option<Box<dyn ToneSink + Send>> {
        self.stop();
        self.sink.take()
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn is_transmitting(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn frequency_for(&self, bit: Bit) -> f32 {
        self.map.frequency_for(bit)
    }

    pub fn envelope(&self) -> Envelope {
        self.envelope
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    pub fn bit_rate(&self) -> f64 {
        1.0 / self.symbol_duration
    }

    pub fn plan(&self, bits: &[Bit], start: f64) -> TransmissionPlan {
        TransmissionPlan::build(bits, self.map, start, self.symbol_duration)
    }

    pub fn plan_text(&self, text: &str, start: f64) -> Result<TransmissionPlan> {
        Ok(self.plan(&codec::encode(text)?, start))
    }

    /// Schedule `text` on the attached sink.
    ///
    /// Fails with `NotReady` without a sink and `Busy` while a transmission
    /// is pending. Nothing is committed to the sink unless every check
    /// passes.
    pub fn transmit(&mut self, text: &str) -> Result<Transmission> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(ModemError::NotReady);
        };
        if self.active.load(Ordering::SeqCst) {
            return Err(ModemError::Busy);
        }

        let bits = codec::encode(text)?;
        let plan = TransmissionPlan::build(&bits, self.map, sink.current_time(), self.symbol_duration);
        let resolves_after = Duration::try_from_secs_f64(plan.duration())
            .ok()
            .and_then(|airtime| airtime.checked_add(self.guard))
            .ok_or_else(|| {
                ModemError::InvalidConfig(format!(
                    "transmission of {}s cannot be timed",
                    plan.duration()
                ))
            })?;

        let (done_tx, done_rx) = oneshot::channel();
        *self.finisher.lock().unwrap_or_else(PoisonError::into_inner) = Some(done_tx);

        let active = self.active.clone();
        let finisher = self.finisher.clone();
        let completion = schedule::deferred(resolves_after, move || {
            active.store(false, Ordering::SeqCst);
            finish(&finisher, Completion::Completed);
            log::debug!("transmission complete");
        })?;

        // Set before the commit so a failure below can be rolled back by stop()
        self.active.store(true, Ordering::SeqCst);
        self.completion = Some(completion);

        if let Err(err) = realize_plan(sink.as_mut(), &plan, &self.envelope, self.amplitude) {
            log::warn!("failed to schedule tones: {}", err);
            self.stop();
            return Err(err);
        }

        log::info!(
            "transmitting {} chars as {} symbols over {:.3}s",
            text.chars().count(),
            plan.len(),
            plan.duration()
        );

        Ok(Transmission {
            plan,
            resolves_after,
            done: done_rx,
        })
    }

    /// Silence the sink and abandon the pending transmission. No-op when idle.
    pub fn stop(&mut self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(mut completion) = self.completion.take() {
            completion.cancel();
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.silence();
        }
        finish(&self.finisher, Completion::Stopped);
        log::info!("transmission stopped");
    }
}

impl Drop for ToneScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

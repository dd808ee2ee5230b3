use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ModemConfig;
use crate::error::{ModemError, Result};
use crate::schedule::{self, TaskHandle};
use crate::spectrum::{CaptureConstraints, SpectrumFrame, SpectrumSource, FULL_SCALE};

/// Dominant frequency of one spectrum frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyReading {
    pub frequency: f32,
    pub bin: usize,
    pub magnitude: u8,
    /// Peak level relative to full scale (dB, at most 0)
    pub level_db: f32,
}

/// Level of a bin magnitude relative to full scale. Zero maps to -inf.
pub fn level_db(magnitude: u8) -> f32 {
    if magnitude == 0 {
        return f32::NEG_INFINITY;
    }
    20.0 * (magnitude as f32 / FULL_SCALE as f32).log10()
}

/// Find the strongest bin and keep it if it reaches `threshold_db`.
///
/// Ties go to the lowest bin. An all-zero frame never yields a reading.
pub fn detect(frame: &SpectrumFrame, threshold_db: f32) -> Option<FrequencyReading> {
    let (bin, magnitude) = frame
        .magnitudes
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, u8)>, (bin, magnitude)| match best {
            Some((_, top)) if magnitude <= top => best,
            _ => Some((bin, magnitude)),
        })?;

    if magnitude == 0 {
        return None;
    }
    let level = level_db(magnitude);
    if level < threshold_db {
        return None;
    }

    Some(FrequencyReading {
        frequency: frame.bin_frequency(bin),
        bin,
        magnitude,
        level_db: level,
    })
}

type SharedSource = Arc<Mutex<Box<dyn SpectrumSource + Send>>>;

struct Session {
    task: TaskHandle,
    source: SharedSource,
}

/// Polls an input stream for its dominant frequency
///
/// One reading at most per polling interval. With the default 100 ms
/// interval and 2 ms symbols this cannot see every transmitted symbol.
pub struct SpectralDetector {
    threshold_db: f32,
    poll_interval: Duration,
    bin_count: usize,
    session: Option<Session>,
}

impl SpectralDetector {
    pub fn new(threshold_db: f32, poll_interval: Duration, bin_count: usize) -> Self {
        Self {
            threshold_db,
            poll_interval,
            bin_count,
            session: None,
        }
    }

    pub fn from_config(config: &ModemConfig) -> Self {
        Self::new(config.threshold_db, config.poll_interval(), config.bin_count)
    }

    pub fn threshold_db(&self) -> f32 {
        self.threshold_db
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    pub fn analyze(&self, frame: &SpectrumFrame) -> Option<FrequencyReading> {
        detect(frame, self.threshold_db)
    }

    /// Whether a polling session is running.
    ///
    /// A session whose callback broke out of the loop is no longer
    /// listening, even before `stop` releases its input.
    pub fn is_listening(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.task.is_active())
    }

    /// Acquire `source` and start polling it.
    ///
    /// `on_tick` sees one outcome per tick: a reading, `None` for a
    /// sub-threshold frame, or the capture error. Returning
    /// `ControlFlow::Break` ends polling.
    pub fn start<F>(&mut self, mut source: Box<dyn SpectrumSource + Send>, mut on_tick: F) -> Result<()>
    where
        F: FnMut(Result<Option<FrequencyReading>>) -> ControlFlow<()> + Send + 'static,
    {
        if self.is_listening() {
            return Err(ModemError::AlreadyListening);
        }
        // Drop the handle of a session that ended on its own
        self.stop();

        source.acquire(&CaptureConstraints::raw(self.bin_count))?;
        let source: SharedSource = Arc::new(Mutex::new(source));

        let threshold_db = self.threshold_db;
        let polled = source.clone();
        let task = schedule::periodic(self.poll_interval, move || {
            let mut source = polled.lock().unwrap_or_else(PoisonError::into_inner);
            let flow = on_tick(source.capture().map(|frame| detect(&frame, threshold_db)));
            if flow.is_break() {
                source.release();
                log::info!("polling ended, input released");
            }
            flow
        });

        let task = match task {
            Ok(task) => task,
            Err(err) => {
                source.lock().unwrap_or_else(PoisonError::into_inner).release();
                return Err(err);
            }
        };

        log::info!(
            "listening: polling every {:?}, threshold {} dB, {} bins",
            self.poll_interval,
            self.threshold_db,
            self.bin_count
        );
        self.session = Some(Session { task, source });
        Ok(())
    }

    /// Stop polling and release the input. No-op when idle.
    pub fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.task.cancel();
            session
                .source
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .release();
            log::info!("stopped listening");
        }
    }
}

impl Drop for SpectralDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    fn frame_with(bins: &[(usize, u8)]) -> SpectrumFrame {
        let mut frame = SpectrumFrame::zeroed(1024, 48000.0);
        for &(bin, magnitude) in bins {
            frame.magnitudes[bin] = magnitude;
        }
        frame
    }

    /// Replays queued frames and records acquire/release
    struct ScriptedSource {
        frames: VecDeque<SpectrumFrame>,
        released: Arc<AtomicBool>,
        deny: bool,
    }

    impl ScriptedSource {
        fn new(frames: Vec<SpectrumFrame>) -> (Self, Arc<AtomicBool>) {
            let released = Arc::new(AtomicBool::new(false));
            (
                Self {
                    frames: frames.into(),
                    released: released.clone(),
                    deny: false,
                },
                released,
            )
        }
    }

    impl SpectrumSource for ScriptedSource {
        fn acquire(&mut self, _constraints: &CaptureConstraints) -> Result<()> {
            if self.deny {
                return Err(ModemError::DeviceError("permission denied".to_string()));
            }
            Ok(())
        }

        fn sample_rate(&self) -> f32 {
            48000.0
        }

        fn capture(&mut self) -> Result<SpectrumFrame> {
            self.frames.pop_front().ok_or(ModemError::StreamEnded)
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_level_db() {
        assert_eq!(level_db(255), 0.0);
        assert_eq!(level_db(0), f32::NEG_INFINITY);
        assert!((level_db(8) - -30.07).abs() < 0.01);
    }

    #[test]
    fn test_all_zero_frame_yields_nothing() {
        let frame = SpectrumFrame::zeroed(1024, 48000.0);
        assert_eq!(detect(&frame, -30.0), None);
        // Even a threshold nothing could fail stays silent
        assert_eq!(detect(&frame, f32::NEG_INFINITY), None);
        assert_eq!(detect(&SpectrumFrame::zeroed(0, 48000.0), -30.0), None);
    }

    #[test]
    fn test_threshold_boundary() {
        // 20*log10(9/255) = -29.05, 20*log10(8/255) = -30.07
        let above = frame_with(&[(768, 9)]);
        let below = frame_with(&[(768, 8)]);

        let reading = detect(&above, -30.0).unwrap();
        assert_eq!(reading.bin, 768);
        assert_eq!(reading.frequency, 18000.0);
        assert!(detect(&below, -30.0).is_none());

        // Exactly at threshold counts
        let at = level_db(8);
        assert!(detect(&below, at).is_some());
    }

    #[test]
    fn test_argmax_and_ties() {
        let frame = frame_with(&[(100, 200), (811, 250), (900, 250)]);
        let reading = detect(&frame, -30.0).unwrap();
        assert_eq!(reading.bin, 811);
        assert_eq!(reading.magnitude, 250);
        assert_eq!(reading.frequency, 811.0 * 24000.0 / 1024.0);
    }

    #[test]
    fn test_start_requires_runtime() {
        let mut detector = SpectralDetector::new(-30.0, Duration::from_millis(100), 1024);
        let (source, released) = ScriptedSource::new(vec![]);
        let result = detector.start(Box::new(source), |_| ControlFlow::Continue(()));
        assert_eq!(result, Err(ModemError::NoRuntime));
        assert!(released.load(Ordering::SeqCst));
        assert!(!detector.is_listening());
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_error_leaves_detector_idle() {
        let mut detector = SpectralDetector::new(-30.0, Duration::from_millis(100), 1024);
        let (mut source, _) = ScriptedSource::new(vec![]);
        source.deny = true;
        let result = detector.start(Box::new(source), |_| ControlFlow::Continue(()));
        assert!(matches!(result, Err(ModemError::DeviceError(_))));
        assert!(!detector.is_listening());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_in_order_and_stops() {
        let frames = vec![
            frame_with(&[(768, 255)]),
            SpectrumFrame::zeroed(1024, 48000.0),
            frame_with(&[(811, 255)]),
        ];
        let (source, released) = ScriptedSource::new(frames);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut detector = SpectralDetector::new(-30.0, Duration::from_millis(100), 1024);
        detector
            .start(Box::new(source), move |outcome| {
                let _ = tx.send(outcome);
                ControlFlow::Continue(())
            })
            .unwrap();
        assert!(detector.is_listening());

        let first = rx.recv().await.unwrap().unwrap().unwrap();
        assert_eq!(first.bin, 768);
        assert_eq!(rx.recv().await.unwrap(), Ok(None));
        let third = rx.recv().await.unwrap().unwrap().unwrap();
        assert_eq!(third.bin, 811);
        assert_eq!(rx.recv().await.unwrap(), Err(ModemError::StreamEnded));

        detector.stop();
        assert!(!detector.is_listening());
        assert!(released.load(Ordering::SeqCst));
        detector.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected() {
        let mut detector = SpectralDetector::new(-30.0, Duration::from_millis(100), 1024);
        let (first, first_released) = ScriptedSource::new(vec![]);
        detector
            .start(Box::new(first), |_| ControlFlow::Continue(()))
            .unwrap();

        let (second, _) = ScriptedSource::new(vec![]);
        let result = detector.start(Box::new(second), |_| ControlFlow::Continue(()));
        assert_eq!(result, Err(ModemError::AlreadyListening));
        assert!(detector.is_listening());
        assert!(!first_released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_break_ends_session() {
        let mut detector = SpectralDetector::new(-30.0, Duration::from_millis(10), 1024);
        let (source, released) = ScriptedSource::new(vec![]);
        detector
            .start(Box::new(source), |outcome| match outcome {
                Err(_) => ControlFlow::Break(()),
                Ok(_) => ControlFlow::Continue(()),
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!detector.is_listening());
        // Released by the poll task itself, before any stop()
        assert!(released.load(Ordering::SeqCst));

        // The finished session does not block a new one
        let (next, next_released) = ScriptedSource::new(vec![]);
        detector
            .start(Box::new(next), |_| ControlFlow::Continue(()))
            .unwrap();
        assert!(detector.is_listening());
        assert!(!next_released.load(Ordering::SeqCst));
    }
}

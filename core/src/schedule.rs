//! Cancellable timer tasks on the tokio runtime
//!
//! Detection runs as a periodic task and transmit completion as a one-shot
//! deferred task. Both are plain spawned tasks wrapped in a handle that
//! aborts them on `cancel` or drop.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::error::{ModemError, Result};

#[derive(Debug, Default)]
pub struct TaskHandle {
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Abort the task. Returns whether it was still running.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                running
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn runtime() -> Result<Handle> {
    Handle::try_current().map_err(|_| ModemError::NoRuntime)
}

/// Run `tick` every `period`, first one period from now, until it breaks.
///
/// Late ticks are delayed rather than bunched together.
pub fn periodic<F>(period: Duration, mut tick: F) -> Result<TaskHandle>
where
    F: FnMut() -> ControlFlow<()> + Send + 'static,
{
    let runtime = runtime()?;
    let handle = runtime.spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if tick().is_break() {
                break;
            }
        }
    });
    Ok(TaskHandle {
        handle: Some(handle),
    })
}

/// Run `fire` once after `delay`.
pub fn deferred<F>(delay: Duration, fire: F) -> Result<TaskHandle>
where
    F: FnOnce() + Send + 'static,
{
    let runtime = runtime()?;
    let handle = runtime.spawn(async move {
        time::sleep(delay).await;
        fire();
    });
    Ok(TaskHandle {
        handle: Some(handle),
    })
}

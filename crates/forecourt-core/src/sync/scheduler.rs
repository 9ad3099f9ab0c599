//! Owned periodic timer that drives reconciliation cycles.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Handle to at most one running timer loop.
///
/// `start` always replaces the previous loop, so repeated starts never
/// produce duplicate ticks. The first tick fires one full `period` after
/// `start`. Dropping the handle stops the loop.
#[derive(Debug, Default)]
pub struct SchedulerHandle {
    task: Option<JoinHandle<()>>,
    period: Option<Duration>,
}

impl SchedulerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking every `period`. `tick` returning `Break` ends the loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        self.stop();

        let task = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tick().is_break() {
                    tracing::debug!("Scheduler tick target gone; stopping timer");
                    break;
                }
            }
        });

        self.task = Some(task);
        self.period = Some(period);
    }

    /// Cancel the timer. Returns whether one was running.
    pub fn stop(&mut self) -> bool {
        self.period = None;
        self.task.take().is_some_and(|task| {
            let was_running = !task.is_finished();
            task.abort();
            was_running
        })
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Period of the running timer, if any.
    pub fn period(&self) -> Option<Duration> {
        if self.is_running() {
            self.period
        } else {
            None
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

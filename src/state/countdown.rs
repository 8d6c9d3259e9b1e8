use std::time::{Duration, SystemTime};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, interval_at},
};
use tracing::trace;
use uuid::Uuid;

const TICK: Duration = Duration::from_secs(1);

/// Message produced by a running countdown.
///
/// `run` identifies the countdown that produced the event so that events
/// queued before a restart or cancellation can be told apart and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEvent {
    /// One second elapsed; `remaining` seconds are left.
    Tick {
        /// Question being timed.
        question_id: Uuid,
        /// Countdown run that produced the tick.
        run: u64,
        /// Whole seconds left.
        remaining: u32,
    },
    /// The countdown reached zero.
    Expired {
        /// Question being timed.
        question_id: Uuid,
        /// Countdown run that expired.
        run: u64,
    },
}

impl CountdownEvent {
    /// Run the event belongs to.
    pub fn run(&self) -> u64 {
        match self {
            CountdownEvent::Tick { run, .. } | CountdownEvent::Expired { run, .. } => *run,
        }
    }
}

/// Cancellable per-question countdown owned by one instance.
///
/// Starting a new countdown cancels the previous one. Dropping the countdown
/// cancels it too.
#[derive(Debug, Default)]
pub struct Countdown {
    run: u64,
    question_id: Option<Uuid>,
    task: Option<JoinHandle<()>>,
}

impl Countdown {
    /// Idle countdown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting down `seconds` for `question_id`, reporting to `sink`.
    /// Returns the run id of the new countdown.
    pub fn start(
        &mut self,
        question_id: Uuid,
        seconds: u32,
        sink: mpsc::UnboundedSender<CountdownEvent>,
    ) -> u64 {
        self.cancel();
        self.run += 1;
        self.question_id = Some(question_id);
        let run = self.run;

        self.task = Some(tokio::spawn(async move {
            if seconds == 0 {
                let _ = sink.send(CountdownEvent::Expired { question_id, run });
                return;
            }

            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            let mut remaining = seconds;
            loop {
                ticker.tick().await;
                remaining -= 1;
                let event = if remaining == 0 {
                    CountdownEvent::Expired { question_id, run }
                } else {
                    CountdownEvent::Tick {
                        question_id,
                        run,
                        remaining,
                    }
                };
                if sink.send(event).is_err() || remaining == 0 {
                    break;
                }
            }
        }));

        trace!(question_id = %question_id, run, seconds, "countdown started");
        run
    }

    /// Stop the running countdown, if any. Events already queued by it keep
    /// their old run id and should be ignored by the receiver.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            if let Some(question_id) = self.question_id {
                trace!(question_id = %question_id, run = self.run, "countdown cancelled");
            }
        }
        self.question_id = None;
        self.run += 1;
    }

    /// Question the running countdown belongs to.
    pub fn question_id(&self) -> Option<Uuid> {
        self.question_id
    }

    /// Whether `event` comes from the countdown currently running.
    pub fn is_current(&self, event: &CountdownEvent) -> bool {
        self.question_id.is_some() && event.run() == self.run
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Seconds left on a question, counting whole elapsed seconds only.
///
/// A `started_at` in the future counts as zero elapsed.
pub fn remaining_seconds(time_limit_seconds: u32, started_at: SystemTime, now: SystemTime) -> u32 {
    let elapsed = now
        .duration_since(started_at)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    u64::from(time_limit_seconds)
        .saturating_sub(elapsed)
        .try_into()
        .unwrap_or(0)
}

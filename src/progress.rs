use std::time::{Duration, Instant};

/// Periodic "N <rows> processed" log lines for long-running row jobs.
///
/// Advisory only: nothing is logged between ticks, and the counter is whatever the
/// caller passes in.
#[derive(Debug)]
pub(crate) struct Progress {
    noun: String,
    interval: Duration,
    started: Instant,
    last_logged: Instant,
}

impl Progress {
    pub fn new(noun: impl Into<String>, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            noun: noun.into(),
            interval,
            started: now,
            last_logged: now,
        }
    }

    pub fn tick(&mut self, processed: u64) {
        if self.last_logged.elapsed() >= self.interval {
            self.last_logged = Instant::now();
            tracing::info!(processed, "{} {} processed", processed, self.noun);
        }
    }

    pub fn finish(&self, processed: u64) {
        tracing::info!(
            processed,
            duration_ms = self.started.elapsed().as_millis(),
            "{} {} processed",
            processed,
            self.noun
        );
    }
}

use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::Stage;

/// Clock for one stage: when it was entered, how long it may last, and the
/// last age (whole seconds) reported to clients.
#[derive(Debug, Clone)]
pub struct Ticker {
    stage: Stage,
    entered: Instant,
    duration: Duration,
    last_reported: Option<u64>,
}

impl Ticker {
    pub fn new(stage: Stage, duration: Duration) -> Self {
        Self {
            stage,
            entered: Instant::now(),
            duration,
            last_reported: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn elapsed(&self) -> Duration {
        self.entered.elapsed()
    }

    /// Whole seconds since the stage was entered.
    pub fn age(&self) -> u64 {
        self.elapsed().as_secs()
    }

    pub fn is_alive(&self) -> bool {
        self.elapsed() < self.duration
    }

    /// Returns the age when it differs from the last one reported, so stage
    /// broadcasts go out once per visible second rather than every loop.
    pub fn age_changed(&mut self) -> Option<u64> {
        let age = self.age();
        if self.last_reported == Some(age) {
            return None;
        }
        self.last_reported = Some(age);
        Some(age)
    }
}

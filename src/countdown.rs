//! Cancellable launch countdown

use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownState {
    Idle,
    Running(u32),
}

/// What the lobby screen should show for the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownDisplay {
    Remaining(u32),
    Idle,
}

impl CountdownDisplay {
    pub fn prompt(&self) -> String {
        match self {
            CountdownDisplay::Remaining(n) => format!("Game starting in {n}.."),
            CountdownDisplay::Idle => "Ready up to start the game".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    /// One tick elapsed; this many remain.
    Tick(u32),
    /// The countdown reached zero and is back to idle.
    Fired,
}

/// A restartable countdown driven by a single interval timer.
///
/// Restarting replaces the timer, so there is never more than one running.
#[derive(Debug)]
pub struct Countdown {
    ticks: u32,
    period: Duration,
    state: CountdownState,
    timer: Option<Interval>,
}

impl Countdown {
    pub fn new(ticks: u32, period: Duration) -> Self {
        Self {
            ticks: ticks.max(1),
            period,
            state: CountdownState::Idle,
            timer: None,
        }
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, CountdownState::Running(_))
    }

    /// Start the countdown, or restart it from the full duration if it is
    /// already running.
    pub fn trigger_start(&mut self) -> CountdownDisplay {
        self.timer = None;
        let mut timer = interval_at(Instant::now() + self.period, self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
        self.state = CountdownState::Running(self.ticks);
        CountdownDisplay::Remaining(self.ticks)
    }

    /// Stop the countdown. Returns the display to show if one was running.
    pub fn cancel(&mut self) -> Option<CountdownDisplay> {
        self.timer = None;
        match std::mem::replace(&mut self.state, CountdownState::Idle) {
            CountdownState::Running(_) => Some(CountdownDisplay::Idle),
            CountdownState::Idle => None,
        }
    }

    /// Wait for the next tick. Pends forever while idle.
    pub async fn tick(&mut self) -> CountdownStep {
        loop {
            let Some(timer) = self.timer.as_mut() else {
                return std::future::pending().await;
            };
            timer.tick().await;
            if let Some(step) = self.advance() {
                return step;
            }
        }
    }

    fn advance(&mut self) -> Option<CountdownStep> {
        match self.state {
            CountdownState::Running(remaining) if remaining > 1 => {
                self.state = CountdownState::Running(remaining - 1);
                Some(CountdownStep::Tick(remaining - 1))
            }
            CountdownState::Running(_) => {
                self.timer = None;
                self.state = CountdownState::Idle;
                Some(CountdownStep::Fired)
            }
            CountdownState::Idle => {
                self.timer = None;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn prompts_match_lobby_screen_text() {
        assert_eq!(CountdownDisplay::Remaining(3).prompt(), "Game starting in 3..");
        assert_eq!(CountdownDisplay::Idle.prompt(), "Ready up to start the game");
    }

    #[tokio::test(start_paused = true)]
    async fn runs_down_and_fires_once() {
        let mut countdown = Countdown::new(3, SECOND);
        assert_eq!(countdown.trigger_start(), CountdownDisplay::Remaining(3));

        assert_eq!(countdown.tick().await, CountdownStep::Tick(2));
        assert_eq!(countdown.tick().await, CountdownStep::Tick(1));
        assert_eq!(countdown.tick().await, CountdownStep::Fired);
        assert_eq!(countdown.state(), CountdownState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_resets_to_full_duration() {
        let mut countdown = Countdown::new(3, SECOND);
        countdown.trigger_start();
        assert_eq!(countdown.tick().await, CountdownStep::Tick(2));

        countdown.trigger_start();
        countdown.trigger_start();
        assert_eq!(countdown.state(), CountdownState::Running(3));
        let started = Instant::now();
        assert_eq!(countdown.tick().await, CountdownStep::Tick(2));
        assert_eq!(started.elapsed(), SECOND);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_the_timer() {
        let mut countdown = Countdown::new(3, SECOND);
        assert_eq!(countdown.cancel(), None);

        countdown.trigger_start();
        assert_eq!(countdown.cancel(), Some(CountdownDisplay::Idle));
        assert!(!countdown.is_running());

        let idle = tokio::time::timeout(SECOND * 5, countdown.tick()).await;
        assert!(idle.is_err());
    }
}

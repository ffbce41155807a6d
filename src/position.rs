//! Interpolation of the playback position between device snapshots.
//!
//! While a track is playing, the position advances by one tick length per
//! tick. Every authoritative snapshot restarts the ticker, so the next tick
//! is a full period after the snapshot. When playback pauses or there is no
//! track, the ticker is dropped rather than left idling.

use std::{future, time::Duration};

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::player::PlaybackState;

#[derive(Debug)]
pub struct PositionEstimator {
    period: Duration,
    ticker: Option<Interval>,
}

impl PositionEstimator {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            ticker: None,
        }
    }

    /// Restarts or releases the ticker to match `state`.
    pub fn rebase(&mut self, state: &PlaybackState) {
        if state.is_advancing() {
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.ticker = Some(ticker);
        } else {
            self.stop();
        }
    }

    pub fn stop(&mut self) {
        if self.ticker.take().is_some() {
            trace!("position ticker stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Completes at the next tick. Never completes while stopped.
    pub async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => future::pending().await,
        }
    }

    /// Advances `state` by one tick.
    pub fn advance(&self, state: &mut PlaybackState) {
        state.advance(self.period);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing(position: u64, duration: u64) -> PlaybackState {
        PlaybackState {
            is_paused: false,
            position: Duration::from_millis(position),
            duration: Duration::from_millis(duration),
            ..PlaybackState::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period() {
        let mut estimator = PositionEstimator::new(Duration::from_secs(1));
        let mut state = playing(5_000, 200_000);
        estimator.rebase(&state);

        let started = Instant::now();
        for _ in 0..3 {
            estimator.tick().await;
            estimator.advance(&mut state);
        }

        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(state.position, Duration::from_millis(8_000));
    }

    #[tokio::test(start_paused = true)]
    async fn pausing_releases_the_ticker() {
        let mut estimator = PositionEstimator::new(Duration::from_secs(1));
        estimator.rebase(&playing(0, 10_000));
        assert!(estimator.is_running());

        let paused = PlaybackState {
            is_paused: true,
            ..playing(0, 10_000)
        };
        estimator.rebase(&paused);
        assert!(!estimator.is_running());

        let stopped = tokio::time::timeout(Duration::from_secs(5), estimator.tick()).await;
        assert!(stopped.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_releases_the_ticker() {
        let mut estimator = PositionEstimator::new(Duration::from_secs(1));
        estimator.rebase(&playing(0, 10_000));
        estimator.rebase(&playing(0, 0));
        assert!(!estimator.is_running());
    }
}

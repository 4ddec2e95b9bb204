//! The map animation: a two state machine stepping the selected year forward one year per tick
//! while playing, and an async driver that ticks it on a fixed interval.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayState {
    Idle,
    Playing,
}

/// Snapshot of the animation as seen by the view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationState {
    pub current_year: i32,
    pub is_playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Moved on to the contained year and keeps playing
    Advanced(i32),
    /// Stepped past the last year, clamped back to it and stopped
    Finished(i32),
    /// Not playing, or the tick was scheduled before the latest start/stop
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetYearOutcome {
    Applied(i32),
    /// Manual changes are refused while playing
    Rejected,
}

/// Identifies the play run a tick was scheduled under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTicket(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationController {
    min_year: i32,
    max_year: i32,
    current_year: i32,
    state: PlayState,
    // Bumped on every start and stop so ticks scheduled before either are recognised as stale
    generation: u64,
}

impl AnimationController {
    /// A controller over `[min_year, max_year]`, idle at `min_year`
    pub fn new(min_year: i32, max_year: i32) -> Result<Self> {
        if min_year > max_year {
            bail!("Invalid animation years: {min_year} > {max_year}");
        }
        Ok(Self {
            min_year,
            max_year,
            current_year: min_year,
            state: PlayState::Idle,
            generation: 0,
        })
    }

    pub fn state(&self) -> AnimationState {
        AnimationState {
            current_year: self.current_year,
            is_playing: self.is_playing(),
        }
    }

    pub fn play_state(&self) -> PlayState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    pub fn current_year(&self) -> i32 {
        self.current_year
    }

    pub fn years(&self) -> (i32, i32) {
        (self.min_year, self.max_year)
    }

    /// Back to the session start state
    pub fn reset(&mut self) {
        if self.is_playing() {
            self.generation += 1;
        }
        self.current_year = self.min_year;
        self.state = PlayState::Idle;
    }

    /// Idle -> Playing. Returns whether the state changed.
    pub fn start(&mut self) -> bool {
        if self.is_playing() {
            return false;
        }
        self.generation += 1;
        self.state = PlayState::Playing;
        debug!("Animation started at {}", self.current_year);
        true
    }

    /// Playing -> Idle. Returns whether the state changed.
    pub fn stop(&mut self) -> bool {
        if !self.is_playing() {
            return false;
        }
        self.generation += 1;
        self.state = PlayState::Idle;
        debug!("Animation stopped at {}", self.current_year);
        true
    }

    /// Ticket for the next scheduled tick of the current play run
    pub fn ticket(&self) -> TickTicket {
        TickTicket(self.generation)
    }

    /// Advance one year. Stepping past the last year clamps back to it and stops the
    /// animation; it never wraps around.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.is_playing() {
            return TickOutcome::Ignored;
        }
        self.current_year = self.current_year.saturating_add(1);
        if self.current_year > self.max_year {
            self.current_year = self.max_year;
            self.stop();
            return TickOutcome::Finished(self.current_year);
        }
        TickOutcome::Advanced(self.current_year)
    }

    /// Tick only if no start or stop happened since `ticket` was issued
    pub fn tick_scheduled(&mut self, ticket: TickTicket) -> TickOutcome {
        if ticket.0 != self.generation {
            debug!("Ignoring stale animation tick");
            return TickOutcome::Ignored;
        }
        self.tick()
    }

    /// Manual year selection, only while idle. The year is clamped into range.
    pub fn set_year(&mut self, year: i32) -> SetYearOutcome {
        if self.is_playing() {
            return SetYearOutcome::Rejected;
        }
        self.current_year = year.clamp(self.min_year, self.max_year);
        SetYearOutcome::Applied(self.current_year)
    }
}

/// Summary of a finished `play` run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaySummary {
    pub frames: usize,
    pub last_year: i32,
    /// Whether the run reached the last year rather than being stopped
    pub finished: bool,
}

/// Drive `controller` from its current year: start it, then tick every `interval` and call
/// `on_frame` with each new year until the animation steps past the last year or the
/// controller is stopped.
///
/// The next tick is only scheduled once `on_frame` has returned. A `stop()` issued between two
/// ticks ends the run without any further change to the controller.
pub async fn play<F>(
    controller: Arc<Mutex<AnimationController>>,
    interval: Duration,
    mut on_frame: F,
) -> Result<PlaySummary>
where
    F: FnMut(i32) -> Result<()>,
{
    let ticket = {
        let mut controller = controller.lock().await;
        controller.start();
        controller.ticket()
    };
    info!("Playing animation every {interval:?}");

    let mut frames = 0;
    loop {
        tokio::time::sleep(interval).await;
        let outcome = controller.lock().await.tick_scheduled(ticket);
        match outcome {
            TickOutcome::Advanced(year) => {
                frames += 1;
                on_frame(year)?;
            }
            // The last year was already drawn by the previous tick
            TickOutcome::Finished(year) => {
                return Ok(PlaySummary {
                    frames,
                    last_year: year,
                    finished: true,
                });
            }
            TickOutcome::Ignored => {
                return Ok(PlaySummary {
                    frames,
                    last_year: controller.lock().await.current_year(),
                    finished: false,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_controller_should_be_idle_at_first_year() {
        let controller = AnimationController::new(1990, 2022).unwrap();
        assert_eq!(
            controller.state(),
            AnimationState {
                current_year: 1990,
                is_playing: false
            }
        );
        assert!(AnimationController::new(2000, 1990).is_err());
    }

    #[test]
    fn start_and_stop_should_be_idempotent() {
        let mut controller = AnimationController::new(2000, 2005).unwrap();
        assert!(controller.start());
        assert!(!controller.start(), "Starting twice is a no-op");
        assert!(controller.stop());
        let before = controller.clone();
        assert!(!controller.stop(), "Stopping twice is a no-op");
        assert_eq!(controller, before);
        assert_eq!(controller.play_state(), PlayState::Idle);
    }

    #[test]
    fn tick_should_advance_while_playing_only() {
        let mut controller = AnimationController::new(2000, 2005).unwrap();
        assert_eq!(controller.tick(), TickOutcome::Ignored);
        assert_eq!(controller.current_year(), 2000);
        controller.start();
        assert_eq!(controller.tick(), TickOutcome::Advanced(2001));
        assert_eq!(controller.tick(), TickOutcome::Advanced(2002));
        assert!(controller.is_playing());
    }

    #[test]
    fn tick_should_stop_at_last_year() {
        let mut controller = AnimationController::new(2000, 2010).unwrap();
        controller.set_year(2009);
        controller.start();
        assert_eq!(controller.tick(), TickOutcome::Advanced(2010));
        assert!(controller.is_playing());
        assert_eq!(controller.tick(), TickOutcome::Finished(2010));
        assert_eq!(controller.tick(), TickOutcome::Ignored);
        assert_eq!(
            controller.state(),
            AnimationState {
                current_year: 2010,
                is_playing: false
            }
        );
    }

    #[test]
    fn playing_from_last_year_should_not_wrap_around() {
        let mut controller = AnimationController::new(2000, 2010).unwrap();
        controller.set_year(2010);
        controller.start();
        assert_eq!(controller.tick(), TickOutcome::Finished(2010));
        assert_eq!(controller.current_year(), 2010);
    }

    #[test]
    fn set_year_should_be_rejected_while_playing() {
        let mut controller = AnimationController::new(2000, 2010).unwrap();
        assert_eq!(controller.set_year(2004), SetYearOutcome::Applied(2004));
        controller.start();
        assert_eq!(controller.set_year(2001), SetYearOutcome::Rejected);
        assert_eq!(controller.current_year(), 2004);
        controller.stop();
        assert_eq!(controller.set_year(2050), SetYearOutcome::Applied(2010));
        assert_eq!(controller.set_year(1900), SetYearOutcome::Applied(2000));
    }

    #[test]
    fn stale_ticks_should_be_ignored() {
        let mut controller = AnimationController::new(2000, 2010).unwrap();
        controller.start();
        let ticket = controller.ticket();
        controller.stop();
        assert_eq!(controller.tick_scheduled(ticket), TickOutcome::Ignored);
        // A restart does not revive tickets from the previous run either
        controller.start();
        assert_eq!(controller.tick_scheduled(ticket), TickOutcome::Ignored);
        assert_eq!(controller.current_year(), 2000);
        let ticket = controller.ticket();
        assert_eq!(controller.tick_scheduled(ticket), TickOutcome::Advanced(2001));
    }

    #[test]
    fn reset_should_return_to_session_start() {
        let mut controller = AnimationController::new(2000, 2010).unwrap();
        controller.set_year(2005);
        controller.start();
        controller.reset();
        assert_eq!(
            controller.state(),
            AnimationState {
                current_year: 2000,
                is_playing: false
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn play_should_run_to_the_last_year() {
        let controller = Arc::new(Mutex::new(AnimationController::new(2000, 2003).unwrap()));
        let mut years = vec![];
        let summary = play(controller.clone(), Duration::from_millis(500), |year| {
            years.push(year);
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(years, vec![2001, 2002, 2003]);
        assert_eq!(
            summary,
            PlaySummary {
                frames: 3,
                last_year: 2003,
                finished: true
            }
        );
        assert!(!controller.lock().await.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_between_ticks_should_end_the_run() {
        let controller = Arc::new(Mutex::new(AnimationController::new(2000, 2020).unwrap()));
        let player = tokio::spawn(play(
            controller.clone(),
            Duration::from_millis(500),
            |_| Ok(()),
        ));

        // Two ticks land at 500ms and 1000ms, stop before the third
        tokio::time::sleep(Duration::from_millis(1250)).await;
        assert!(controller.lock().await.stop());

        let summary = player.await.unwrap().unwrap();
        assert!(!summary.finished);
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.last_year, 2002);
        assert_eq!(controller.lock().await.current_year(), 2002);
    }

    #[tokio::test(start_paused = true)]
    async fn frame_errors_should_end_the_run() {
        let controller = Arc::new(Mutex::new(AnimationController::new(2000, 2020).unwrap()));
        let result = play(controller, Duration::from_millis(10), |year| {
            if year == 2002 {
                anyhow::bail!("redraw failed")
            }
            Ok(())
        })
        .await;
        assert!(result.is_err());
    }
}

//! Minute-edge tick timing.
//!
//! The loop arms a timer for each upcoming minute boundary and fires
//! the dispatcher at most once per boundary. A small jitter-correction
//! offset pulls the wakeup slightly ahead of the boundary so that by
//! the time requests actually leave, the wall clock has reached the
//! planned minute; the offset is re-derived from how long the previous
//! tick's dispatch took.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info};

use crate::matcher::Dispatcher;
use crate::util;

const MIN_JITTER_OFFSET_SECS: u64 = 1;
const MAX_JITTER_OFFSET_SECS: u64 = 30;

/// Drives the dispatcher once per wall-clock minute.
pub struct TickLoop {
    dispatcher: Dispatcher,
    jitter_offset: u64,
    /// The last minute boundary dispatched, in seconds.
    last_fired: i64,
}

impl TickLoop {
    /// Create a loop that will first fire for the minute after `now`.
    ///
    /// The partial minute the daemon starts in is never dispatched;
    /// its boundary is marked as already consumed.
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        let now = util::timestamp_ms() as i64 / 1000;
        Self {
            dispatcher,
            jitter_offset: MIN_JITTER_OFFSET_SECS,
            last_fired: current_minute(now),
        }
    }

    /// Run until `shutdown` flips to true.
    ///
    /// A failed tick is logged and abandoned; the loop itself only
    /// exits on shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("tick loop started");

        loop {
            let now_ms = util::timestamp_ms() as i64;
            let boundary = next_boundary(now_ms / 1000, self.last_fired);
            let fire_at_ms = (boundary - self.jitter_offset as i64) * 1000;
            let delay = Duration::from_millis(u64::try_from(fire_at_ms - now_ms).unwrap_or(0));

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            // The sampling clock runs ahead by the jitter offset, so the
            // matching instant lands on the boundary we armed for.
            let for_time = util::timestamp_ms() as i64 / 1000 + self.jitter_offset as i64;
            self.last_fired = boundary;

            let dispatch_started = Instant::now();
            if let Err(error) = self.dispatcher.process_tick(for_time, boundary).await {
                error!(%error, "tick aborted");
            }
            self.jitter_offset = jitter_correction(dispatch_started.elapsed());
        }

        info!("tick loop stopped");
    }
}

/// The minute boundary at or before `now` (seconds).
fn current_minute(now: i64) -> i64 {
    now.div_euclid(60) * 60
}

/// The next boundary to fire for, given the last one dispatched.
///
/// While a tick overruns its minute, the in-progress minute is still
/// dispatched (immediately); boundaries never repeat even if the wall
/// clock steps backwards.
fn next_boundary(now: i64, last_fired: i64) -> i64 {
    let current = current_minute(now);
    if current > last_fired {
        current
    } else {
        last_fired + 60
    }
}

/// Derive the next tick's sampling offset from the previous tick's
/// dispatch duration, clamped to a sane window.
fn jitter_correction(last_dispatch: Duration) -> u64 {
    (last_dispatch.as_secs() + MIN_JITTER_OFFSET_SECS)
        .clamp(MIN_JITTER_OFFSET_SECS, MAX_JITTER_OFFSET_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_minute_floors() {
        assert_eq!(current_minute(1_578_304_500), 1_578_304_500); // already on a boundary
        assert_eq!(current_minute(1_578_304_559), 1_578_304_500);
        assert_eq!(current_minute(1_578_304_560), 1_578_304_560);
    }

    #[test]
    fn test_next_boundary_advances() {
        let last = 1_578_304_500;
        // Mid-minute after firing: wait for the next boundary.
        assert_eq!(next_boundary(1_578_304_530, last), 1_578_304_560);
        // Overran into the next minute: fire for it immediately.
        assert_eq!(next_boundary(1_578_304_561, last), 1_578_304_560);
    }

    #[test]
    fn test_next_boundary_never_repeats_after_clock_step() {
        let last = 1_578_304_560;
        // Wall clock stepped back a minute; the already-fired boundary
        // must not fire again.
        assert_eq!(next_boundary(1_578_304_510, last), 1_578_304_620);
    }

    #[test]
    fn test_boundaries_fire_at_most_once() {
        // Simulate an hour of probes at 100ms granularity equivalents.
        let mut last_fired = current_minute(1_578_304_512);
        let mut fired = Vec::new();
        let mut now = 1_578_304_512;
        while now < 1_578_304_512 + 3600 {
            let boundary = next_boundary(now, last_fired);
            if boundary <= now {
                fired.push(boundary);
                last_fired = boundary;
            }
            now += 1;
        }

        let mut deduped = fired.clone();
        deduped.dedup();
        assert_eq!(fired, deduped);
        assert_eq!(fired.len(), 60);
        assert!(fired.windows(2).all(|w| w[1] - w[0] == 60));
    }

    #[test]
    fn test_jitter_correction_window() {
        assert_eq!(jitter_correction(Duration::ZERO), 1);
        assert_eq!(jitter_correction(Duration::from_secs(3)), 4);
        assert_eq!(jitter_correction(Duration::from_secs(600)), 30);
    }
}

use std::time::{Duration, Instant};

/// Frame timing snapshot.
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Seconds since the clock started.
    pub elapsed: f64,

    /// Seconds since the previous tick, clamped.
    pub delta: f32,

    /// Monotonic timestamp taken at the tick.
    pub now: Instant,

    /// Monotonic frame counter.
    pub frame_index: u64,
}

impl FrameTime {
    /// Snapshot for a clock that has not ticked yet.
    pub fn at_start(start: Instant) -> Self {
        Self { elapsed: 0.0, delta: 0.0, now: start, frame_index: 0 }
    }
}

/// Frame clock producing `FrameTime` snapshots.
///
/// Delta time is clamped to avoid pathological values when the process is
/// paused by a debugger or stalls; elapsed time is not.
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Instant,
    last: Option<Instant>,
    frame_index: u64,
    dt_min: Duration,
    dt_max: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Clock whose elapsed time is measured from `start`.
    pub fn starting_at(start: Instant) -> Self {
        Self {
            start,
            last: None,
            frame_index: 0,
            dt_min: Duration::ZERO,
            dt_max: Duration::from_millis(250),
        }
    }

    /// Creates a clock with custom delta-time clamps.
    pub fn with_clamps(dt_min: Duration, dt_max: Duration) -> Self {
        debug_assert!(dt_min <= dt_max);
        Self { dt_min, dt_max, ..Self::new() }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    /// Forgets the previous tick so the next delta starts from zero.
    ///
    /// Useful when resuming after the loop was stopped.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Advances the clock to now.
    pub fn tick(&mut self) -> FrameTime {
        self.tick_at(Instant::now())
    }

    /// Advances the clock to `now`. The first tick reports a zero delta.
    pub fn tick_at(&mut self, now: Instant) -> FrameTime {
        let dt = match self.last {
            Some(last) => now.saturating_duration_since(last).clamp(self.dt_min, self.dt_max),
            None => Duration::ZERO,
        };

        self.last = Some(now);

        let ft = FrameTime {
            elapsed: now.saturating_duration_since(self.start).as_secs_f64(),
            delta: dt.as_secs_f32(),
            now,
            frame_index: self.frame_index,
        };

        self.frame_index = self.frame_index.wrapping_add(1);

        ft
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_has_zero_delta() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start);
        let ft = clock.tick_at(start + Duration::from_millis(5));
        assert_eq!(ft.delta, 0.0);
        assert_eq!(ft.frame_index, 0);
        assert!((ft.elapsed - 0.005).abs() < 1e-9);
    }

    #[test]
    fn delta_is_measured_from_previous_tick() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start);
        clock.tick_at(start);
        let ft = clock.tick_at(start + Duration::from_millis(16));
        assert!((ft.delta - 0.016).abs() < 1e-6);
        assert_eq!(ft.frame_index, 1);
    }

    #[test]
    fn long_stalls_are_clamped_but_elapsed_is_not() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start);
        clock.tick_at(start);
        let ft = clock.tick_at(start + Duration::from_secs(3));
        assert!((ft.delta - 0.25).abs() < 1e-6);
        assert!((ft.elapsed - 3.0).abs() < 1e-9);
    }
}

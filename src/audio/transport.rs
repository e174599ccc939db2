/// Playback position bookkeeping for one deck.
///
/// Position is `offset + (now - started_at)` while running and `offset`
/// while stopped, where `now` is the output clock in seconds. Nothing is
/// polled during playback; the clock reading is supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransportClock {
    /// Elapsed seconds accumulated before the current run.
    offset: f64,
    /// Clock reading when the current run began; `None` while stopped.
    started_at: Option<f64>,
}

impl TransportClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Accumulated offset, excluding the current run.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Begin a run at `now`. No effect when already running.
    pub fn play(&mut self, now: f64) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    /// Fold the current run into the offset and stop.
    pub fn pause(&mut self, now: f64) {
        if let Some(start) = self.started_at.take() {
            self.offset += (now - start).max(0.0);
        }
    }

    /// Jump to `position`. A running clock keeps running from there.
    pub fn seek(&mut self, position: f64, now: f64) {
        self.offset = position.max(0.0);
        if self.started_at.is_some() {
            self.started_at = Some(now);
        }
    }

    /// Stop and rewind to zero.
    pub fn reset(&mut self) {
        self.offset = 0.0;
        self.started_at = None;
    }

    /// Position in seconds at clock reading `now`.
    #[inline]
    pub fn elapsed(&self, now: f64) -> f64 {
        match self.started_at {
            Some(start) => self.offset + (now - start).max(0.0),
            None => self.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_pause_accumulates() {
        let mut t = TransportClock::new();
        t.play(10.0);
        assert!((t.elapsed(13.0) - 3.0).abs() < 1e-9);
        t.pause(13.0);
        assert!(!t.is_running());
        assert!((t.elapsed(100.0) - 3.0).abs() < 1e-9, "paused clock must not advance");
        t.play(100.0);
        assert!((t.elapsed(102.0) - 5.0).abs() < 1e-9, "resume continues from paused value");
    }

    #[test]
    fn seek_while_running_restarts_run() {
        let mut t = TransportClock::new();
        t.play(0.0);
        t.seek(8.0, 4.0);
        assert!((t.elapsed(4.0) - 8.0).abs() < 1e-9);
        assert!((t.elapsed(5.5) - 9.5).abs() < 1e-9);
    }

    #[test]
    fn seek_while_stopped_only_moves_offset() {
        let mut t = TransportClock::new();
        t.seek(2.5, 50.0);
        assert!(!t.is_running());
        assert_eq!(t.offset(), 2.5);
        assert_eq!(t.elapsed(60.0), 2.5);
    }

    #[test]
    fn reset_rewinds_and_stops() {
        let mut t = TransportClock::new();
        t.play(1.0);
        t.reset();
        assert!(!t.is_running());
        assert_eq!(t.elapsed(9.0), 0.0);
    }

    #[test]
    fn clock_going_backwards_never_rewinds() {
        let mut t = TransportClock::new();
        t.play(5.0);
        assert_eq!(t.elapsed(4.0), 0.0);
        t.pause(4.0);
        assert_eq!(t.offset(), 0.0);
    }
}

use byteorder::{BigEndian, ByteOrder};
use std::time::{Instant, SystemTime};

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01).
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_secs()
}

/// Tracks the wall-clock delta between successive frames, in seconds.
///
/// `syncTime` broadcasts this value from master to slaves every frame so
/// that statistics sinks on every node agree on the current frame duration.
pub struct FrameClock {
    last: Instant,
}

impl FrameClock {
    #[inline]
    pub fn new() -> FrameClock {
        FrameClock { last: Instant::now() }
    }

    /// Marks the start of a new frame and returns the duration since the
    /// previous call, in seconds.
    #[inline]
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        dt
    }
}

impl Default for FrameClock {
    #[inline]
    fn default() -> FrameClock {
        FrameClock::new()
    }
}

/// Wire size of an encoded `TimeSample`: one `f64` plus one `u64`.
pub const TIME_SAMPLE_SIZE: usize = 16;

/// The value `syncTime` broadcasts from master to slaves: the master's
/// most recent frame delta and its current wall-clock timestamp.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimeSample {
    pub frame_dt: f64,
    pub wall_clock_secs: u64,
}

impl TimeSample {
    pub fn to_bytes(self) -> [u8; TIME_SAMPLE_SIZE] {
        let mut buf = [0u8; TIME_SAMPLE_SIZE];
        BigEndian::write_f64(&mut buf[0..8], self.frame_dt);
        BigEndian::write_u64(&mut buf[8..16], self.wall_clock_secs);
        buf
    }

    pub fn from_bytes(buf: &[u8; TIME_SAMPLE_SIZE]) -> TimeSample {
        TimeSample {
            frame_dt: BigEndian::read_f64(&buf[0..8]),
            wall_clock_secs: BigEndian::read_u64(&buf[8..16]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn tick_reports_elapsed_time() {
        let mut clock = FrameClock::new();
        sleep(Duration::from_millis(5));
        let dt = clock.tick();
        assert!(dt > 0.0);
    }

    #[test]
    fn time_sample_round_trips_through_bytes() {
        let sample = TimeSample { frame_dt: 0.0166, wall_clock_secs: 1_700_000_000 };
        let decoded = TimeSample::from_bytes(&sample.to_bytes());
        assert_eq!(decoded, sample);
    }
}

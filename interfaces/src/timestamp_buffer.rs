//! Timestamped Sample Ring Buffer
//!
//! Stores per-channel IQ samples indexed by absolute device timestamp and
//! presents random-access reads over a sliding valid window. The buffer holds
//! a single contiguous timestamp interval `[first_time, last_time)`; writes
//! must land exactly at `last_time` and reads advance `first_time`.

use std::fmt;

/// Rejected write reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// Write would wrap past the oldest unread sample
    Overflow,
    /// Write timestamp lies beyond the end of the stored interval
    Gap { ts: i64, last: i64 },
    /// Write timestamp lies inside the stored interval
    Overwrite { ts: i64, last: i64 },
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::Overflow => write!(f, "ring buffer overflow"),
            WriteError::Gap { ts, last } => {
                write!(f, "timestamp gap: write at {} past end {}", ts, last)
            }
            WriteError::Overwrite { ts, last } => {
                write!(f, "timestamp overwrite: write at {} before end {}", ts, last)
            }
        }
    }
}

/// Ring of samples addressed by device timestamp
pub struct TimestampBuffer<T> {
    data: Vec<T>,
    first_time: i64,
    last_time: i64,
}

impl<T: Copy + Default> TimestampBuffer<T> {
    /// Create a buffer holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity],
            first_time: 0,
            last_time: 0,
        }
    }

    /// Initialise the valid window to the empty interval at `ts`
    pub fn set_start(&mut self, ts: i64) {
        self.first_time = ts;
        self.last_time = ts;
    }

    /// Oldest stored timestamp
    pub fn first_time(&self) -> i64 {
        self.first_time
    }

    /// One past the newest stored timestamp
    pub fn last_time(&self) -> i64 {
        self.last_time
    }

    /// Samples stored at or after `ts`, negative when `ts` has already
    /// slid out of the window
    pub fn avail_samples(&self, ts: i64) -> i64 {
        if ts < self.first_time {
            return -1;
        }
        self.last_time - ts
    }

    /// Append `src` at timestamp `ts`, which must equal `last_time`
    pub fn write(&mut self, src: &[T], ts: i64) -> Result<(), WriteError> {
        if ts > self.last_time {
            return Err(WriteError::Gap { ts, last: self.last_time });
        }
        if ts < self.last_time {
            return Err(WriteError::Overwrite { ts, last: self.last_time });
        }
        if (ts + src.len() as i64 - self.first_time) as usize > self.data.len() {
            return Err(WriteError::Overflow);
        }

        let cap = self.data.len();
        for (i, &s) in src.iter().enumerate() {
            self.data[(ts as usize).wrapping_add(i) % cap] = s;
        }
        self.last_time = ts + src.len() as i64;
        Ok(())
    }

    /// Copy `dst.len()` samples starting at `ts` and release everything
    /// before `ts + dst.len()`
    pub fn read(&mut self, dst: &mut [T], ts: i64) -> Result<usize, i64> {
        let len = dst.len() as i64;
        if ts < self.first_time || ts + len > self.last_time {
            return Err(self.avail_samples(ts));
        }

        let cap = self.data.len();
        for (i, d) in dst.iter_mut().enumerate() {
            *d = self.data[(ts as usize).wrapping_add(i) % cap];
        }
        self.first_time = ts + len;
        Ok(dst.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: i16, len: usize) -> Vec<i16> {
        (0..len as i16).map(|i| start + i).collect()
    }

    #[test]
    fn test_contiguity() {
        let mut buf = TimestampBuffer::<i16>::new(1024);
        buf.set_start(100);

        assert!(buf.write(&ramp(0, 256), 100).is_ok());
        assert_eq!(buf.last_time(), 356);

        assert!(buf.write(&ramp(0, 256), 356).is_ok());

        let mut out = vec![0i16; 100];
        assert_eq!(buf.read(&mut out, 150), Ok(100));
        assert_eq!(buf.first_time(), 250);
        assert_eq!(buf.avail_samples(250), 362);

        assert_eq!(
            buf.write(&ramp(0, 10), 355),
            Err(WriteError::Overwrite { ts: 355, last: 612 })
        );
        assert_eq!(
            buf.write(&ramp(0, 10), 700),
            Err(WriteError::Gap { ts: 700, last: 612 })
        );
    }

    #[test]
    fn test_write_advances_last_time() {
        let mut buf = TimestampBuffer::<i16>::new(4096);
        buf.set_start(0);
        for _ in 0..8 {
            let before = buf.last_time();
            buf.write(&ramp(0, 512), before).unwrap();
            assert_eq!(buf.last_time(), before + 512);
        }
        assert_eq!(buf.last_time(), 4096);
    }

    #[test]
    fn test_read_contents_across_wrap() {
        let mut buf = TimestampBuffer::<i16>::new(256);
        buf.set_start(0);

        buf.write(&ramp(0, 200), 0).unwrap();
        let mut out = vec![0i16; 200];
        buf.read(&mut out, 0).unwrap();

        // Second write wraps the physical ring
        buf.write(&ramp(100, 200), 200).unwrap();
        buf.read(&mut out, 200).unwrap();
        assert_eq!(out, ramp(100, 200));
    }

    #[test]
    fn test_overflow() {
        let mut buf = TimestampBuffer::<i16>::new(512);
        buf.set_start(0);
        buf.write(&ramp(0, 512), 0).unwrap();
        assert_eq!(buf.write(&ramp(0, 1), 512), Err(WriteError::Overflow));

        // Releasing samples makes room again
        let mut out = vec![0i16; 128];
        buf.read(&mut out, 0).unwrap();
        assert!(buf.write(&ramp(0, 128), 512).is_ok());
    }

    #[test]
    fn test_read_outside_window() {
        let mut buf = TimestampBuffer::<i16>::new(512);
        buf.set_start(1000);
        buf.write(&ramp(0, 256), 1000).unwrap();

        let mut out = vec![0i16; 64];
        assert!(buf.read(&mut out, 999).is_err());
        assert!(buf.read(&mut out, 1200).is_err());
        assert_eq!(buf.avail_samples(999), -1);
        assert_eq!(buf.avail_samples(1200), 56);
    }
}

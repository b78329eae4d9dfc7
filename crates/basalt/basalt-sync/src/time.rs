use std::time::Duration;

const NS_PER_SEC: libc::c_long = 1_000_000_000;

/// An absolute deadline on `CLOCK_MONOTONIC`.
///
/// All timed waits in this crate take absolute monotonic deadlines, so one
/// deadline can bound a whole retry loop without drifting.
#[derive(Debug, Clone, Copy)]
pub struct TimeMono(libc::timespec);

impl TimeMono {
    pub fn now() -> Self {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        // clock_gettime on CLOCK_MONOTONIC cannot fail with a valid pointer.
        unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        TimeMono(ts)
    }

    /// The current time plus `d`.
    pub fn after(d: Duration) -> Self {
        Self::now().add(d)
    }

    pub fn add(self, d: Duration) -> Self {
        let mut sec = self.0.tv_sec + d.as_secs() as libc::time_t;
        let mut nsec = self.0.tv_nsec + d.subsec_nanos() as libc::c_long;
        if nsec >= NS_PER_SEC {
            sec += 1;
            nsec -= NS_PER_SEC;
        }
        TimeMono(libc::timespec { tv_sec: sec, tv_nsec: nsec })
    }

    pub(crate) fn as_timespec(&self) -> &libc::timespec {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_carries_nanoseconds() {
        let base = TimeMono(libc::timespec { tv_sec: 10, tv_nsec: 900_000_000 });
        let t = base.add(Duration::from_millis(200));
        assert_eq!(t.0.tv_sec, 11);
        assert_eq!(t.0.tv_nsec, 100_000_000);
    }

    #[test]
    fn now_is_monotonic() {
        let a = TimeMono::now();
        let b = TimeMono::now();
        assert!(
            (b.0.tv_sec, b.0.tv_nsec) >= (a.0.tv_sec, a.0.tv_nsec),
            "monotonic clock went backwards"
        );
    }
}

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Three-state failure gate for one upstream pool (§4.B).
///
/// `allow()` never blocks on I/O: the whole read/transition happens under a
/// single, short-held `Mutex` lock.
pub struct Breaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    mode: Mode,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// At most one probe is admitted per half-open window (single-shot probe).
    half_open_probe_sent: bool,
}

impl Breaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            inner: Mutex::new(Inner {
                mode: Mode::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_probe_sent: false,
            }),
        }
    }

    pub fn mode(&self) -> Mode {
        self.inner.lock().unwrap().mode
    }

    /// Returns whether a request may proceed, transitioning `open -> half_open`
    /// on the first call after `reset_timeout` has elapsed.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.mode {
            Mode::Closed => true,
            Mode::Open => {
                let opened_at = inner.opened_at.expect("open implies opened_at is set");
                if opened_at.elapsed() > self.reset_timeout {
                    inner.mode = Mode::HalfOpen;
                    inner.half_open_probe_sent = true;
                    true
                } else {
                    false
                }
            }
            Mode::HalfOpen => {
                if inner.half_open_probe_sent {
                    false
                } else {
                    inner.half_open_probe_sent = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.mode = Mode::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.half_open_probe_sent = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.mode {
            Mode::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.mode = Mode::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            Mode::HalfOpen => {
                inner.mode = Mode::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_probe_sent = false;
            }
            Mode::Open => {
                inner.opened_at = Some(Instant::now());
            }
        }
    }
}

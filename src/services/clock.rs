//! Virtual clock
//!
//! Fires every `1 / frequency` seconds of real time and advances simulated
//! time by `interval × warp` on each fire. The same clock can feed one vehicle
//! or be shared by the whole fleet, one subscription per vehicle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::types::VirtualTime;

/// Ticks buffered per subscriber before the clock waits for it
const SUBSCRIBER_BUFFER: usize = 8;

/// Longest real time between two ticks
const MAX_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClockError {
    #[error("tick frequency must be a positive number of at least one tick per day, got {0}")]
    InvalidFrequency(f64),

    #[error("warp factor must be a positive number, got {0}")]
    InvalidWarp(f64),

    #[error("simulated step of {0:?} is below one millisecond")]
    StepTooSmall(Duration),

    #[error("clock is already running")]
    AlreadyStarted,
}

struct ClockInner {
    start: VirtualTime,
    period: Duration,
    step: Duration,
    subscribers: Mutex<Vec<mpsc::Sender<VirtualTime>>>,
    cancel: CancellationToken,
    started: AtomicBool,
}

/// Push-only source of simulated time
#[derive(Clone)]
pub struct VirtualClock {
    inner: Arc<ClockInner>,
}

impl VirtualClock {
    pub fn new(start: VirtualTime, frequency: f64, warp: f64) -> Result<Self, ClockError> {
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(ClockError::InvalidFrequency(frequency));
        }
        if !warp.is_finite() || warp <= 0.0 {
            return Err(ClockError::InvalidWarp(warp));
        }

        let period = Duration::try_from_secs_f64(1.0 / frequency)
            .ok()
            .filter(|period| *period <= MAX_PERIOD)
            .ok_or(ClockError::InvalidFrequency(frequency))?;
        let step = Duration::try_from_secs_f64(period.as_secs_f64() * warp)
            .map_err(|_| ClockError::InvalidWarp(warp))?;
        if step < Duration::from_millis(1) {
            return Err(ClockError::StepTooSmall(step));
        }

        Ok(Self {
            inner: Arc::new(ClockInner {
                start,
                period,
                step,
                subscribers: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        })
    }

    pub fn start_time(&self) -> VirtualTime {
        self.inner.start
    }

    /// Real time between two ticks
    pub fn period(&self) -> Duration {
        self.inner.period
    }

    /// Simulated time added by each tick
    pub fn step(&self) -> Duration {
        self.inner.step
    }

    /// New receive-only subscription. Ticks fired before this call are not replayed.
    ///
    /// Subscribing to a stopped clock yields an already closed channel.
    pub fn subscribe(&self) -> mpsc::Receiver<VirtualTime> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        if !self.inner.cancel.is_cancelled() {
            self.inner.subscribers.lock().push(tx);
        }
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Spawn the ticking task.
    ///
    /// The task ends after `stop()` or once every subscriber has gone away.
    pub fn start(&self) -> Result<JoinHandle<()>, ClockError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ClockError::AlreadyStarted);
        }
        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(async move { inner.run().await }))
    }

    /// Halt firing and close every subscription.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
        self.inner.subscribers.lock().clear();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl ClockInner {
    async fn run(&self) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        let mut elapsed = Duration::ZERO;

        debug!(
            "Clock started at {} (period {:?}, step {:?})",
            self.start, self.period, self.step
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            elapsed = elapsed.saturating_add(self.step);
            let now = self.start + elapsed;
            trace!("Tick {}", now);

            let senders: Vec<_> = self.subscribers.lock().clone();
            if senders.is_empty() {
                break;
            }

            let mut gone = false;
            for sender in &senders {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    sent = sender.send(now) => gone |= sent.is_err(),
                }
            }
            if self.cancel.is_cancelled() {
                break;
            }

            if gone {
                let mut subscribers = self.subscribers.lock();
                subscribers.retain(|s| !s.is_closed());
                if subscribers.is_empty() {
                    break;
                }
            }
        }

        self.subscribers.lock().clear();
        debug!("Clock stopped at {}", self.start + elapsed);
    }
}
